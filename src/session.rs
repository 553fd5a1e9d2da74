use anyhow::{bail, Context, Result};
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::garmin_api::{self, GarminApi};
use crate::garmin_login::{self, LoginOutcome};

/// Produce an authenticated client, preferring cached tokens and falling
/// back to a credential login. A fresh login persists its tokens so the
/// next run (CI/cron) needs no credentials.
pub async fn acquire(cfg: &AppConfig, interactive: bool) -> Result<GarminApi> {
    match cached_client(cfg).await {
        Ok(api) => {
            info!("Reusing cached Garmin tokens from {}", cfg.tokens_dir.display());
            return Ok(api);
        }
        Err(err) => {
            debug!("Cached Garmin session unusable: {:#}", err);
        }
    }

    let (email, password) = match (cfg.email.as_deref(), cfg.password.as_deref()) {
        (Some(email), Some(password)) => (email, password),
        _ => bail!(
            "GARMIN_EMAIL / GARMIN_PASSWORD not set and no cached tokens available.\n\
             Run locally once with credentials to seed tokens (and pass MFA if prompted)."
        ),
    };

    info!("Logging in to Garmin Connect as {}", email);
    let (oauth1, oauth2) = match garmin_login::login_with_credentials(email, password).await? {
        LoginOutcome::Success(oauth1, oauth2) => (oauth1, *oauth2),
        LoginOutcome::MfaRequired(pending) => {
            if !interactive {
                bail!(
                    "MFA required. Run locally once with --interactive to complete MFA and seed tokens.\n\
                     Tokens will be saved in: {}",
                    cfg.tokens_dir.display()
                );
            }
            let code = rpassword::prompt_password("Garmin MFA code: ")
                .context("Failed to read MFA code")?;
            garmin_login::complete_mfa(pending, code.trim()).await?
        }
    };

    garmin_api::save_token_files(&cfg.tokens_dir, &oauth1, &oauth2)?;
    info!("Saved Garmin tokens to {}", cfg.tokens_dir.display());

    GarminApi::from_tokens(oauth1, oauth2, &cfg.tokens_dir)
}

/// Load cached tokens and prove they still work with a light profile call.
async fn cached_client(cfg: &AppConfig) -> Result<GarminApi> {
    let api = GarminApi::from_token_dir(&cfg.tokens_dir)?;
    api.get_user_profile()
        .await
        .context("Cached tokens were rejected by Garmin")?;
    Ok(api)
}
