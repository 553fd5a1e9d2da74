use std::path::PathBuf;

use figment::{
    providers::{Env, Serialized},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Runtime configuration, resolved once at startup and passed down from
/// there. Every field can be overridden through a `GARMIN_`-prefixed
/// environment variable (`GARMIN_TOKENS_DIR`, `GARMIN_FETCH_LIMIT`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Account email, only needed until tokens are cached.
    pub email: Option<String>,
    /// Account password, only needed until tokens are cached.
    pub password: Option<String>,
    /// Directory where OAuth tokens are cached between runs.
    pub tokens_dir: PathBuf,
    /// Where the stats document is written.
    pub out: PathBuf,
    /// How much history for the weekly series, in weeks.
    pub weekly_window: u32,
    /// Trailing window for the monthly totals, in days.
    pub monthly_window_days: u32,
    /// How many recent activities to include.
    pub recent_count: usize,
    /// How many activities to fetch from Garmin per run.
    pub fetch_limit: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        let tokens_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".garminconnect");
        Self {
            email: None,
            password: None,
            tokens_dir,
            out: PathBuf::from("public/stats.json"),
            weekly_window: 12,
            monthly_window_days: 30,
            recent_count: 3,
            fetch_limit: 200,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Env::prefixed("GARMIN_"))
            .extract()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.weekly_window, 12);
        assert_eq!(cfg.monthly_window_days, 30);
        assert_eq!(cfg.recent_count, 3);
        assert_eq!(cfg.fetch_limit, 200);
        assert_eq!(cfg.out, PathBuf::from("public/stats.json"));
        assert!(cfg.tokens_dir.ends_with(".garminconnect"));
        assert!(cfg.email.is_none());
        assert!(cfg.password.is_none());
    }

    #[test]
    fn environment_overrides_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("GARMIN_EMAIL", "you@example.com");
            jail.set_env("GARMIN_FETCH_LIMIT", "50");
            jail.set_env("GARMIN_OUT", "out/custom.json");
            let cfg = AppConfig::load()?;
            assert_eq!(cfg.email.as_deref(), Some("you@example.com"));
            assert_eq!(cfg.fetch_limit, 50);
            assert_eq!(cfg.out, PathBuf::from("out/custom.json"));
            assert_eq!(cfg.recent_count, 3);
            Ok(())
        });
    }
}
