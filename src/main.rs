mod config;
mod garmin_api;
mod garmin_login;
mod models;
mod session;
mod snapshot;
mod stats;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::models::Activity;

/// Fetch Garmin Connect data and write a stats.json snapshot for the site.
///
/// First run (to seed tokens, especially with MFA enabled):
///   GARMIN_EMAIL=you@example.com GARMIN_PASSWORD=... garmin_stats --interactive
///
/// Subsequent runs (CI/cron) reuse the cached tokens and need no credentials.
#[derive(Debug, Parser)]
#[command(version, about = "Builds a stats.json snapshot from Garmin Connect data")]
struct Cli {
    /// Allow prompting on the terminal for an MFA code during login.
    #[arg(long)]
    interactive: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = AppConfig::load().context("Failed to load configuration")?;

    let api = session::acquire(&cfg, cli.interactive).await?;

    let profile = api
        .get_user_profile()
        .await
        .context("Failed to fetch user profile")?;
    let raw = api
        .get_activities(0, cfg.fetch_limit)
        .await
        .context("Failed to fetch activities")?;
    tracing::info!("Fetched {} activities", raw.len());

    let activities: Vec<Activity> = raw.iter().map(Activity::from_raw).collect();
    let snapshot = stats::build_snapshot(profile, &activities, chrono::Utc::now(), &cfg);

    let written = snapshot::write_snapshot(&snapshot, &cfg.out)?;
    println!("Wrote {}", written.display());
    Ok(())
}
