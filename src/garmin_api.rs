use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use reqwest::{Client, Method, RequestBuilder};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::models::{GarminProfile, RawActivity};

pub(crate) const CONSUMER_KEY: &str = "fc3e99d2-118c-44b8-8ae3-03370dde24c0";
pub(crate) const CONSUMER_SECRET: &str = "E08WAR897WEy2knn7aFBrvegVAf0AFdWBBF";

const CONNECTAPI_BASE: &str = "https://connectapi.garmin.com";
const EXCHANGE_URL: &str = "https://connectapi.garmin.com/oauth-service/oauth/exchange/user/2.0";
const API_USER_AGENT: &str = "GCM-iOS-5.7.2.1";

// Same file layout garth uses, so a tokens dir seeded by the python
// tooling keeps working here.
pub const OAUTH1_FILE: &str = "oauth1_token.json";
pub const OAUTH2_FILE: &str = "oauth2_token.json";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OAuth1Token {
    pub oauth_token: String,
    pub oauth_token_secret: String,
    pub mfa_token: Option<String>,
    pub mfa_expiration_timestamp: Option<String>,
    pub domain: String,
}

#[derive(Debug, Default, Deserialize, Serialize, Clone)]
pub struct OAuth2Token {
    pub scope: String,
    pub jti: String,
    pub token_type: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
    pub expires_at: Option<u64>,
    pub refresh_token_expires_in: u64,
    pub refresh_token_expires_at: Option<u64>,
}

/// Authenticated Garmin Connect client. The OAuth1 token is long-lived; the
/// OAuth2 bearer it is exchanged for expires and gets refreshed in place.
pub struct GarminApi {
    oauth1: OAuth1Token,
    oauth2: tokio::sync::RwLock<OAuth2Token>,
    client: Client,
    /// Where refreshed tokens are persisted; `None` only during the initial
    /// login exchange, before a cache location is known.
    tokens_dir: Option<PathBuf>,
}

impl GarminApi {
    /// Build a client from token files cached in `tokens_dir`.
    pub fn from_token_dir(tokens_dir: &Path) -> Result<Self> {
        let oauth1: OAuth1Token = read_token_file(&tokens_dir.join(OAUTH1_FILE))?;
        let oauth2: OAuth2Token = read_token_file(&tokens_dir.join(OAUTH2_FILE))?;
        Self::build(oauth1, oauth2, Some(tokens_dir.to_path_buf()))
    }

    /// Build a client from freshly obtained tokens.
    pub fn from_tokens(oauth1: OAuth1Token, oauth2: OAuth2Token, tokens_dir: &Path) -> Result<Self> {
        Self::build(oauth1, oauth2, Some(tokens_dir.to_path_buf()))
    }

    /// Client used only to drive the OAuth1 -> OAuth2 exchange during login.
    pub(crate) fn from_oauth1_for_exchange(oauth1: OAuth1Token, client: Client) -> Self {
        Self {
            oauth1,
            oauth2: tokio::sync::RwLock::new(OAuth2Token::default()),
            client,
            tokens_dir: None,
        }
    }

    fn build(oauth1: OAuth1Token, oauth2: OAuth2Token, tokens_dir: Option<PathBuf>) -> Result<Self> {
        let client = Client::builder().user_agent(API_USER_AGENT).build()?;
        Ok(Self {
            oauth1,
            oauth2: tokio::sync::RwLock::new(oauth2),
            client,
            tokens_dir,
        })
    }

    pub(crate) async fn oauth2_cloned(&self) -> OAuth2Token {
        self.oauth2.read().await.clone()
    }

    #[cfg(test)]
    fn oauth1(&self) -> &OAuth1Token {
        &self.oauth1
    }

    /// Attach the OAuth2 bearer token to a connectapi request.
    async fn attach_oauth2(&self, mut req: RequestBuilder) -> RequestBuilder {
        let token = self.oauth2.read().await.access_token.clone();
        req = req.header("Authorization", format!("Bearer {}", token));
        req = req.header("DI-Backend", "connectapi.garmin.com");
        req
    }

    /// Check if the bearer token is close to expiry (5 minute buffer).
    async fn is_oauth2_expired(&self) -> bool {
        let oauth2 = self.oauth2.read().await;
        match oauth2.expires_at {
            Some(expires_at) => unix_now() >= expires_at.saturating_sub(300),
            None => false,
        }
    }

    /// Refresh the OAuth2 bearer via the OAuth1-signed exchange endpoint and
    /// persist the new token for future runs.
    pub(crate) async fn refresh_oauth2(&self) -> Result<()> {
        let token = oauth1_request::Token::from_parts(
            CONSUMER_KEY,
            CONSUMER_SECRET,
            &self.oauth1.oauth_token,
            &self.oauth1.oauth_token_secret,
        );

        let authorization = if let Some(mfa) = &self.oauth1.mfa_token {
            let request =
                oauth1_request::ParameterList::new([("mfa_token", mfa as &dyn std::fmt::Display)]);
            oauth1_request::post(
                EXCHANGE_URL,
                &request,
                &token,
                oauth1_request::signature_method::HmacSha1::new(),
            )
        } else {
            oauth1_request::post(
                EXCHANGE_URL,
                &(),
                &token,
                oauth1_request::signature_method::HmacSha1::new(),
            )
        };

        let mut req = self
            .client
            .post(EXCHANGE_URL)
            .header("Authorization", authorization)
            .header("Content-Type", "application/x-www-form-urlencoded");
        if let Some(mfa) = &self.oauth1.mfa_token {
            req = req.form(&[("mfa_token", mfa)]);
        }

        let res = req.send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(anyhow!("Failed to refresh OAuth2 token {}: {}", status, text));
        }

        let mut new_oauth2: OAuth2Token = res.json().await?;
        let now = unix_now();
        new_oauth2.expires_at = Some(now + new_oauth2.expires_in);
        new_oauth2.refresh_token_expires_at = Some(now + new_oauth2.refresh_token_expires_in);

        if let Some(dir) = &self.tokens_dir {
            write_token_file(&dir.join(OAUTH2_FILE), &new_oauth2)?;
        }
        *self.oauth2.write().await = new_oauth2;

        info!("Refreshed Garmin OAuth2 token");
        Ok(())
    }

    /// Single-attempt connectapi GET. Upstream failures propagate; the only
    /// recovery this tool knows is the cached-session -> fresh-login path.
    async fn connectapi_get(&self, endpoint: &str) -> Result<serde_json::Value> {
        if self.is_oauth2_expired().await {
            self.refresh_oauth2().await?;
        }

        let url = format!("{}{}", CONNECTAPI_BASE, endpoint);
        let mut req = self.client.request(Method::GET, &url);
        req = self.attach_oauth2(req).await;

        let res = req
            .send()
            .await
            .with_context(|| format!("Garmin API GET {} failed", endpoint))?;
        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(anyhow!("Garmin API GET {} returned {}: {}", endpoint, status, text));
        }
        Ok(res.json().await?)
    }

    pub async fn get_user_profile(&self) -> Result<GarminProfile> {
        let val = self
            .connectapi_get("/userprofile-service/socialProfile")
            .await?;
        let profile = serde_json::from_value(val).context("Failed to parse social profile")?;
        Ok(profile)
    }

    pub async fn get_activities(&self, start: u32, limit: u32) -> Result<Vec<RawActivity>> {
        let endpoint = format!(
            "/activitylist-service/activities/search/activities?start={}&limit={}",
            start, limit
        );
        let val = self.connectapi_get(&endpoint).await?;
        let activities = serde_json::from_value(val).context("Failed to parse activity list")?;
        Ok(activities)
    }
}

/// Persist both tokens for reuse by future invocations.
pub fn save_token_files(dir: &Path, oauth1: &OAuth1Token, oauth2: &OAuth2Token) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create tokens directory {}", dir.display()))?;
    write_token_file(&dir.join(OAUTH1_FILE), oauth1)?;
    write_token_file(&dir.join(OAUTH2_FILE), oauth2)?;
    Ok(())
}

fn read_token_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

fn write_token_file<T: Serialize>(path: &Path, token: &T) -> Result<()> {
    std::fs::write(path, serde_json::to_string_pretty(token)?)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
