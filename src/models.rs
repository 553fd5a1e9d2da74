use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stats::parse_start_time;

/// One activity as returned by the activitylist search endpoint.
///
/// Garmin is inconsistent about where it puts things: distance and duration
/// may live at the top level or under `summaryDTO`, and `activityType` is
/// either a bare string or a descriptor object carrying a `typeKey`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawActivity {
    #[serde(default)]
    pub activity_id: Option<i64>,
    #[serde(default)]
    pub activity_name: Option<String>,
    #[serde(default)]
    pub activity_type: Option<ActivityTypeField>,
    #[serde(default)]
    pub start_time_local: Option<String>,
    #[serde(default, rename = "startTimeGMT")]
    pub start_time_gmt: Option<String>,
    #[serde(default)]
    pub distance: Option<f64>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default, rename = "summaryDTO")]
    pub summary: Option<RawSummary>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawSummary {
    #[serde(default)]
    pub distance: Option<f64>,
    #[serde(default)]
    pub duration: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ActivityTypeField {
    Key(String),
    Descriptor {
        #[serde(rename = "typeKey")]
        type_key: Option<String>,
    },
}

impl ActivityTypeField {
    pub fn type_key(&self) -> Option<&str> {
        match self {
            ActivityTypeField::Key(key) => Some(key),
            ActivityTypeField::Descriptor { type_key } => type_key.as_deref(),
        }
    }
}

/// Uniform internal record, produced once on ingestion. Aggregation only
/// ever sees this shape, never the raw one.
#[derive(Debug, Clone)]
pub struct Activity {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub type_key: Option<String>,
    /// Start string as Garmin sent it, kept for display.
    pub start_raw: Option<String>,
    /// Parsed UTC start instant; `None` when the string was unparseable.
    pub start: Option<DateTime<Utc>>,
    pub distance_m: f64,
    pub duration_s: f64,
}

impl Activity {
    pub fn from_raw(raw: &RawActivity) -> Self {
        let summary = raw.summary.as_ref();
        let start_raw = raw
            .start_time_local
            .clone()
            .or_else(|| raw.start_time_gmt.clone());
        let start = start_raw.as_deref().and_then(parse_start_time);
        Self {
            id: raw.activity_id,
            name: raw.activity_name.clone(),
            type_key: raw
                .activity_type
                .as_ref()
                .and_then(|t| t.type_key())
                .map(str::to_owned),
            distance_m: raw
                .distance
                .or_else(|| summary.and_then(|s| s.distance))
                .unwrap_or(0.0),
            duration_s: raw
                .duration
                .or_else(|| summary.and_then(|s| s.duration))
                .unwrap_or(0.0),
            start_raw,
            start,
        }
    }
}

/// Subset of `/userprofile-service/socialProfile` the snapshot carries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GarminProfile {
    #[serde(rename = "displayName")]
    pub display_name: Option<String>,
    #[serde(rename = "fullName")]
    pub full_name: Option<String>,
    #[serde(rename = "userId")]
    pub user_id: Option<i64>,
}
