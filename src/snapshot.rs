use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::debug;

use crate::models::GarminProfile;

/// The document the website consumes, written whole-file each run.
#[derive(Debug, Serialize)]
pub struct StatsSnapshot {
    pub generated_at: String,
    pub profile: GarminProfile,
    pub monthly: MonthlyAggregate,
    pub recent: RecentSection,
    pub weekly: WeeklySection,
}

#[derive(Debug, Serialize)]
pub struct MonthlyAggregate {
    pub window_days: u32,
    pub activities_count: usize,
    pub distance_km: f64,
    pub distance_mi: f64,
    pub time_hours: f64,
    pub longest_km: f64,
    pub longest_mi: f64,
}

#[derive(Debug, Serialize)]
pub struct RecentSection {
    pub last3: Vec<RecentActivity>,
}

#[derive(Debug, Serialize)]
pub struct RecentActivity {
    pub id: Option<i64>,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub type_key: Option<String>,
    pub start: Option<String>,
    pub distance_km: f64,
    pub distance_mi: f64,
    pub duration_min: f64,
    pub avg_speed_kmh: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct WeeklySection {
    pub window_weeks: u32,
    pub series: Vec<WeeklyBucket>,
}

#[derive(Debug, Serialize)]
pub struct WeeklyBucket {
    pub week_start: String,
    pub week_end: String,
    pub distance_km: f64,
    pub distance_mi: f64,
    pub time_hours: f64,
}

/// Write the snapshot as pretty JSON and return the resolved path.
///
/// Goes through a sibling temp file and a rename so a crash mid-write can
/// never leave a truncated document where the site expects a full one.
pub fn write_snapshot(snapshot: &StatsSnapshot, path: &Path) -> Result<PathBuf> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create output directory {}", parent.display())
            })?;
        }
    }

    let json = serde_json::to_string_pretty(snapshot).context("Failed to serialize snapshot")?;

    let tmp = tmp_path(path);
    fs::write(&tmp, json.as_bytes())
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move {} into place", tmp.display()))?;
    debug!("Wrote {} bytes to {}", json.len(), path.display());

    Ok(path.canonicalize().unwrap_or_else(|_| path.to_path_buf()))
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "stats.json".into());
    name.push(".tmp");
    path.with_file_name(name)
}
