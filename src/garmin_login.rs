use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Client;

use crate::garmin_api::{GarminApi, OAuth1Token, OAuth2Token, CONSUMER_KEY, CONSUMER_SECRET};

lazy_static! {
    static ref CSRF_RE: Regex = Regex::new(r#"name="_csrf"\s+value="(.+?)""#).unwrap();
    static ref TITLE_RE: Regex = Regex::new(r#"<title>(.+?)</title>"#).unwrap();
    static ref TICKET_RE: Regex = Regex::new(r#"embed\?ticket=([^"]+)""#).unwrap();
}

const SSO_DOMAIN: &str = "garmin.com";
const SSO_EMBED_URL: &str = "https://sso.garmin.com/sso/embed";
const SSO_SIGNIN_URL: &str = "https://sso.garmin.com/sso/signin";
const SSO_MFA_URL: &str = "https://sso.garmin.com/sso/verifyMFA/loginEnterMfaCode";
const PREAUTH_URL: &str = "https://connectapi.garmin.com/oauth-service/oauth/preauthorized";
const LOGIN_USER_AGENT: &str = "com.garmin.android.apps.connectmobile";

/// Cookie-carrying SSO session for a login that stopped at the MFA prompt.
pub struct PendingMfa {
    client: Client,
    signin_params: HashMap<&'static str, &'static str>,
}

pub enum LoginOutcome {
    Success(OAuth1Token, Box<OAuth2Token>),
    MfaRequired(PendingMfa),
}

fn signin_params() -> HashMap<&'static str, &'static str> {
    let mut params = HashMap::new();
    params.insert("id", "gauth-widget");
    params.insert("embedWidget", "true");
    params.insert("gauthHost", "https://sso.garmin.com/sso");
    params.insert("service", SSO_EMBED_URL);
    params.insert("source", SSO_EMBED_URL);
    params.insert("redirectAfterAccountLoginUrl", SSO_EMBED_URL);
    params.insert("redirectAfterAccountCreationUrl", SSO_EMBED_URL);
    params
}

/// Run the Garmin SSO credential login. Stops at `MfaRequired` when the
/// account has multi-factor enabled; `complete_mfa` finishes the handshake.
pub async fn login_with_credentials(email: &str, password: &str) -> Result<LoginOutcome> {
    let client = Client::builder()
        .user_agent(LOGIN_USER_AGENT)
        .cookie_store(true)
        .build()?;
    let signin_params = signin_params();

    // 1. Initial embed load sets the SSO cookies.
    let mut embed_params = HashMap::new();
    embed_params.insert("id", "gauth-widget");
    embed_params.insert("embedWidget", "true");
    embed_params.insert("gauthHost", "https://sso.garmin.com/sso");

    client
        .get(SSO_EMBED_URL)
        .query(&embed_params)
        .send()
        .await?
        .error_for_status()?;

    // 2. Load the signin page to get a CSRF token.
    let signin_resp = client
        .get(SSO_SIGNIN_URL)
        .query(&signin_params)
        .header("referer", SSO_EMBED_URL)
        .send()
        .await?
        .error_for_status()?;

    let signin_html = signin_resp.text().await?;
    let csrf_token = extract_csrf(&signin_html)
        .context("Could not find CSRF token on Garmin login page")?;

    // 3. Post the credentials.
    let mut form_data = HashMap::new();
    form_data.insert("username", email);
    form_data.insert("password", password);
    form_data.insert("embed", "true");
    form_data.insert("_csrf", csrf_token.as_str());

    let login_resp = client
        .post(SSO_SIGNIN_URL)
        .query(&signin_params)
        .header("referer", SSO_SIGNIN_URL)
        .form(&form_data)
        .send()
        .await?
        .error_for_status()?;

    let result_html = login_resp.text().await?;
    let title = extract_title(&result_html)
        .context("Could not find title on Garmin result page")?;

    if title.contains("MFA") {
        return Ok(LoginOutcome::MfaRequired(PendingMfa {
            client,
            signin_params,
        }));
    } else if title != "Success" {
        return Err(anyhow!("Unexpected login result title: {}", title));
    }

    let ticket = extract_ticket(&result_html)?;
    complete_login(client, ticket)
        .await
        .map(|(o1, o2)| LoginOutcome::Success(o1, Box::new(o2)))
}

/// Finish a login that stopped at MFA by posting the verification code.
pub async fn complete_mfa(pending: PendingMfa, mfa_code: &str) -> Result<(OAuth1Token, OAuth2Token)> {
    let PendingMfa {
        client,
        signin_params,
    } = pending;

    // The MFA form carries a fresh CSRF token; re-fetch the signin page to
    // read it (the session cookies keep us on the MFA screen).
    let mfa_page_resp = client
        .get(SSO_SIGNIN_URL)
        .query(&signin_params)
        .send()
        .await?
        .error_for_status()?;
    let mfa_html = mfa_page_resp.text().await?;
    let csrf_token = extract_csrf(&mfa_html).context("Could not find CSRF token on MFA page")?;

    let mut form_data = HashMap::new();
    form_data.insert("mfa-code", mfa_code);
    form_data.insert("embed", "true");
    form_data.insert("_csrf", csrf_token.as_str());
    form_data.insert("fromPage", "setupEnterMfaCode");

    let verify_resp = client
        .post(SSO_MFA_URL)
        .query(&signin_params)
        .header("referer", SSO_SIGNIN_URL)
        .form(&form_data)
        .send()
        .await?
        .error_for_status()?;

    let result_html = verify_resp.text().await?;
    let title = extract_title(&result_html)
        .context("Could not find title after MFA verification")?;
    if title != "Success" {
        return Err(anyhow!("MFA verification failed. Title: {}", title));
    }

    let ticket = extract_ticket(&result_html)?;
    complete_login(client, ticket).await
}

fn extract_csrf(html: &str) -> Option<String> {
    CSRF_RE
        .captures(html)
        .map(|m| m.get(1).unwrap().as_str().to_string())
}

fn extract_title(html: &str) -> Option<String> {
    TITLE_RE
        .captures(html)
        .map(|m| m.get(1).unwrap().as_str().to_string())
}

fn extract_ticket(html: &str) -> Result<String> {
    let ticket_match = TICKET_RE
        .captures(html)
        .context("Could not find ticket in response HTML")?;
    Ok(ticket_match.get(1).unwrap().as_str().to_string())
}

/// Trade the SSO ticket for an OAuth1 token, then exchange that for the
/// OAuth2 bearer the connectapi endpoints expect.
async fn complete_login(client: Client, ticket: String) -> Result<(OAuth1Token, OAuth2Token)> {
    let request_params = oauth1_request::ParameterList::new([
        ("ticket", ticket.as_str()),
        ("login-url", SSO_EMBED_URL),
        ("accepts-mfa-tokens", "true"),
    ]);

    // The preauthorized GET is signed with the consumer key alone, no token.
    let builder: oauth1_request::Builder<
        '_,
        oauth1_request::signature_method::HmacSha1,
        &str,
        &str,
    > = oauth1_request::Builder::new(
        oauth1_request::Credentials::new(CONSUMER_KEY, CONSUMER_SECRET),
        oauth1_request::signature_method::HmacSha1::new(),
    );
    let authorization = builder.authorize("GET", PREAUTH_URL, &request_params);

    let o1_resp = client
        .get(PREAUTH_URL)
        .query(&[
            ("ticket", ticket.as_str()),
            ("login-url", SSO_EMBED_URL),
            ("accepts-mfa-tokens", "true"),
        ])
        .header("Authorization", authorization)
        .header("User-Agent", LOGIN_USER_AGENT)
        .send()
        .await?
        .error_for_status()?;

    let o1_text = o1_resp.text().await?;
    let parsed_qs: HashMap<String, String> = url::form_urlencoded::parse(o1_text.as_bytes())
        .into_owned()
        .collect();

    let oauth_token = parsed_qs
        .get("oauth_token")
        .context("Missing oauth_token")?
        .clone();
    let oauth_token_secret = parsed_qs
        .get("oauth_token_secret")
        .context("Missing oauth_token_secret")?
        .clone();

    let oauth1 = OAuth1Token {
        oauth_token,
        oauth_token_secret,
        mfa_token: parsed_qs.get("mfa_token").cloned(),
        mfa_expiration_timestamp: parsed_qs.get("mfa_expiration_timestamp").cloned(),
        domain: SSO_DOMAIN.to_string(),
    };

    let exchange = GarminApi::from_oauth1_for_exchange(oauth1.clone(), client);
    exchange.refresh_oauth2().await?;
    let oauth2 = exchange.oauth2_cloned().await;

    Ok((oauth1, oauth2))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_csrf_from_signin_html() {
        let html = r#"<input type="hidden" name="_csrf" value="deadbeefcafe" />"#;
        assert_eq!(extract_csrf(html).as_deref(), Some("deadbeefcafe"));
        assert_eq!(extract_csrf("<html></html>"), None);
    }

    #[test]
    fn extracts_title_from_result_html() {
        let html = "<html><head><title>Success</title></head></html>";
        assert_eq!(extract_title(html).as_deref(), Some("Success"));
    }

    #[test]
    fn extracts_ticket_from_redirect_html() {
        let html = r#"var url = "https://sso.garmin.com/sso/embed?ticket=ST-0123-abcdef-cas";"#;
        let ticket = extract_ticket(html).expect("ticket should be found");
        assert_eq!(ticket, "ST-0123-abcdef-cas");
    }

    #[test]
    fn missing_ticket_is_an_error() {
        assert!(extract_ticket("<html>nothing here</html>").is_err());
    }
}
