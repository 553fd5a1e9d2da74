use std::cmp::Reverse;
use std::collections::BTreeMap;

use chrono::{
    DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc,
};

use crate::config::AppConfig;
use crate::models::{Activity, GarminProfile};
use crate::snapshot::{
    MonthlyAggregate, RecentActivity, RecentSection, StatsSnapshot, WeeklyBucket, WeeklySection,
};

const METERS_PER_KM: f64 = 1000.0;
const METERS_PER_MILE: f64 = 1609.344;

/// Parse the start-time strings Garmin hands out into a UTC instant.
///
/// Observed shapes: `2025-08-18 17:12:07`, `2025-08-18T17:12:07.0Z`,
/// `2025-08-18`. Anything unrecognized is treated as absent rather than an
/// error; those records drop out of the date-windowed views.
pub fn parse_start_time(s: &str) -> Option<DateTime<Utc>> {
    let cleaned = s.replace('T', " ").replace('Z', "");
    // Bound over-long fractional seconds the way Garmin sometimes emits them.
    let cleaned = cleaned.get(..26).unwrap_or(cleaned.as_str());

    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(cleaned, fmt) {
            return Some(dt.and_utc());
        }
    }
    NaiveDate::parse_from_str(cleaned, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(NaiveTime::MIN).and_utc())
}

/// (Monday, Sunday) of the UTC calendar week containing `dt`, Monday first.
pub fn week_key(dt: DateTime<Utc>) -> (NaiveDate, NaiveDate) {
    let date = dt.date_naive();
    let monday = date - Duration::days(i64::from(date.weekday().num_days_from_monday()));
    (monday, monday + Duration::days(6))
}

/// Derive all three views plus the generation stamp from one fetched set.
///
/// Windows are anchored at 00:00 UTC of `now`'s date, matching what the
/// website has always displayed.
pub fn build_snapshot(
    profile: GarminProfile,
    activities: &[Activity],
    now: DateTime<Utc>,
    cfg: &AppConfig,
) -> StatsSnapshot {
    let today = now.date_naive().and_time(NaiveTime::MIN).and_utc();

    StatsSnapshot {
        generated_at: now.to_rfc3339_opts(SecondsFormat::Secs, true),
        profile,
        monthly: monthly_aggregate(activities, today, cfg.monthly_window_days),
        recent: RecentSection {
            last3: recent_activities(activities, cfg.recent_count),
        },
        weekly: WeeklySection {
            window_weeks: cfg.weekly_window,
            series: weekly_series(activities, today, cfg.weekly_window),
        },
    }
}

fn monthly_aggregate(
    activities: &[Activity],
    today: DateTime<Utc>,
    window_days: u32,
) -> MonthlyAggregate {
    let cutoff = today - Duration::days(i64::from(window_days));
    let in_window: Vec<&Activity> = activities
        .iter()
        .filter(|a| a.start.map_or(false, |start| start >= cutoff))
        .collect();

    let total_m: f64 = in_window.iter().map(|a| a.distance_m).sum();
    let total_s: f64 = in_window.iter().map(|a| a.duration_s).sum();
    let longest_m = in_window.iter().map(|a| a.distance_m).fold(0.0, f64::max);

    MonthlyAggregate {
        window_days,
        activities_count: in_window.len(),
        distance_km: round2(total_m / METERS_PER_KM),
        distance_mi: round2(total_m / METERS_PER_MILE),
        time_hours: round2(total_s / 3600.0),
        longest_km: round2(longest_m / METERS_PER_KM),
        longest_mi: round2(longest_m / METERS_PER_MILE),
    }
}

fn recent_activities(activities: &[Activity], count: usize) -> Vec<RecentActivity> {
    let mut sorted: Vec<&Activity> = activities.iter().collect();
    // Unparseable starts sort as the minimum instant, i.e. after everything
    // with a real date.
    sorted.sort_by_key(|a| Reverse(a.start.unwrap_or(DateTime::<Utc>::MIN_UTC)));

    sorted
        .into_iter()
        .take(count)
        .map(|a| {
            let km = a.distance_m / METERS_PER_KM;
            RecentActivity {
                id: a.id,
                name: a.name.clone(),
                type_key: a.type_key.clone(),
                start: a.start_raw.clone(),
                distance_km: round2(km),
                distance_mi: round2(a.distance_m / METERS_PER_MILE),
                duration_min: round1(a.duration_s / 60.0),
                avg_speed_kmh: if a.duration_s > 0.0 {
                    Some(round2(km / (a.duration_s / 3600.0)))
                } else {
                    None
                },
            }
        })
        .collect()
}

fn weekly_series(
    activities: &[Activity],
    today: DateTime<Utc>,
    window_weeks: u32,
) -> Vec<WeeklyBucket> {
    let cutoff = today - Duration::weeks(i64::from(window_weeks));

    // BTreeMap keeps the buckets ordered by week, oldest first.
    let mut buckets: BTreeMap<(NaiveDate, NaiveDate), (f64, f64)> = BTreeMap::new();
    for a in activities {
        let start = match a.start {
            Some(start) if start >= cutoff => start,
            _ => continue,
        };
        let bucket = buckets.entry(week_key(start)).or_insert((0.0, 0.0));
        bucket.0 += a.distance_m;
        bucket.1 += a.duration_s;
    }

    buckets
        .into_iter()
        .map(|((monday, sunday), (meters, seconds))| WeeklyBucket {
            week_start: monday.to_string(),
            week_end: sunday.to_string(),
            distance_km: round2(meters / METERS_PER_KM),
            distance_mi: round2(meters / METERS_PER_MILE),
            time_hours: round2(seconds / 3600.0),
        })
        .collect()
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn activity(start: Option<&str>, distance_m: f64, duration_s: f64) -> Activity {
        Activity {
            id: Some(1),
            name: Some("Workout".to_string()),
            type_key: Some("running".to_string()),
            start_raw: start.map(str::to_owned),
            start: start.and_then(parse_start_time),
            distance_m,
            duration_s,
        }
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn parses_datetime_with_fractional_seconds() {
        let dt = parse_start_time("2025-08-18T17:12:07.5Z").expect("should parse");
        assert_eq!(dt.date_naive(), NaiveDate::from_ymd_opt(2025, 8, 18).unwrap());
        assert_eq!(dt.timestamp_subsec_millis(), 500);
    }

    #[test]
    fn parses_plain_datetime() {
        assert_eq!(
            parse_start_time("2025-08-18 17:12:07"),
            Some(utc(2025, 8, 18, 17, 12, 7))
        );
    }

    #[test]
    fn parses_date_only_as_midnight() {
        assert_eq!(parse_start_time("2025-08-18"), Some(utc(2025, 8, 18, 0, 0, 0)));
    }

    #[test]
    fn rejects_unrecognized_formats() {
        assert_eq!(parse_start_time("18/08/2025"), None);
        assert_eq!(parse_start_time("not a date"), None);
        assert_eq!(parse_start_time(""), None);
    }

    #[test]
    fn week_key_brackets_the_date() {
        // 2025-08-20 is a Wednesday.
        let (monday, sunday) = week_key(utc(2025, 8, 20, 15, 30, 0));
        assert_eq!(monday, NaiveDate::from_ymd_opt(2025, 8, 18).unwrap());
        assert_eq!(sunday, NaiveDate::from_ymd_opt(2025, 8, 24).unwrap());
        assert_eq!((sunday - monday).num_days(), 6);
    }

    #[test]
    fn week_key_identical_across_the_whole_week() {
        let monday_morning = week_key(utc(2025, 8, 18, 0, 0, 0));
        let sunday_night = week_key(utc(2025, 8, 24, 23, 59, 59));
        assert_eq!(monday_morning, sunday_night);

        let next_monday = week_key(utc(2025, 8, 25, 0, 0, 0));
        assert_ne!(monday_morning, next_monday);
    }

    #[test]
    fn monthly_on_empty_set_is_all_zero() {
        let monthly = monthly_aggregate(&[], utc(2025, 8, 20, 0, 0, 0), 30);
        assert_eq!(monthly.activities_count, 0);
        assert_eq!(monthly.distance_km, 0.0);
        assert_eq!(monthly.longest_km, 0.0);
        assert_eq!(monthly.longest_mi, 0.0);
    }

    #[test]
    fn monthly_longest_is_max_of_filtered_set() {
        let activities = vec![
            activity(Some("2025-08-15 09:00:00"), 5000.0, 1800.0),
            activity(Some("2025-08-10 09:00:00"), 12000.0, 4000.0),
            // Outside the window, must not win.
            activity(Some("2025-05-01 09:00:00"), 42195.0, 14400.0),
        ];
        let monthly = monthly_aggregate(&activities, utc(2025, 8, 20, 0, 0, 0), 30);
        assert_eq!(monthly.activities_count, 2);
        assert_eq!(monthly.longest_km, 12.0);
        assert_eq!(monthly.distance_km, 17.0);
    }

    #[test]
    fn unparseable_dates_sort_after_parseable_ones() {
        let activities = vec![
            activity(None, 1000.0, 600.0),
            activity(Some("2025-08-18 09:00:00"), 2000.0, 600.0),
            activity(Some("garbage"), 1500.0, 600.0),
            activity(Some("2025-08-19 09:00:00"), 3000.0, 600.0),
        ];
        let recent = recent_activities(&activities, 4);
        assert_eq!(recent[0].distance_km, 3.0);
        assert_eq!(recent[1].distance_km, 2.0);
        // Both dateless records come strictly after the dated ones.
        assert!(recent[2].start.is_none() || recent[2].start.as_deref() == Some("garbage"));
        assert!(recent[3].start.is_none() || recent[3].start.as_deref() == Some("garbage"));
    }

    #[test]
    fn avg_speed_is_none_exactly_when_duration_is_zero() {
        let activities = vec![
            activity(Some("2025-08-19 09:00:00"), 5000.0, 1800.0),
            activity(Some("2025-08-18 09:00:00"), 5000.0, 0.0),
        ];
        let recent = recent_activities(&activities, 2);
        assert_eq!(recent[0].avg_speed_kmh, Some(10.0));
        assert_eq!(recent[1].avg_speed_kmh, None);
    }

    #[test]
    fn weekly_series_is_chronological_and_windowed() {
        let activities = vec![
            activity(Some("2025-08-19 09:00:00"), 4000.0, 1200.0),
            activity(Some("2025-08-12 09:00:00"), 6000.0, 1800.0),
            // Same week as the one above, accumulates into its bucket.
            activity(Some("2025-08-13 18:00:00"), 1000.0, 300.0),
            // Well past the 12-week cutoff.
            activity(Some("2024-01-01 09:00:00"), 9000.0, 2700.0),
        ];
        let series = weekly_series(&activities, utc(2025, 8, 20, 0, 0, 0), 12);
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].week_start, "2025-08-11");
        assert_eq!(series[0].distance_km, 7.0);
        assert_eq!(series[0].time_hours, 0.58);
        assert_eq!(series[1].week_start, "2025-08-18");
        assert!(series[0].week_start < series[1].week_start);
    }

    #[test]
    fn snapshot_scenario_with_default_windows() {
        // Three synthetic activities: today, 10 days ago, 40 days ago.
        let now = utc(2025, 8, 20, 12, 0, 0);
        let activities = vec![
            activity(Some("2025-08-20 08:00:00"), 0.0, 0.0),
            activity(Some("2025-08-10 08:00:00"), 5000.0, 1800.0),
            activity(Some("2025-07-11 08:00:00"), 10000.0, 3600.0),
        ];
        let cfg = AppConfig::default();
        let snapshot = build_snapshot(GarminProfile::default(), &activities, now, &cfg);

        assert!(snapshot.generated_at.ends_with('Z'));
        assert_eq!(snapshot.monthly.activities_count, 2);
        assert_eq!(snapshot.monthly.distance_km, 5.0);
        assert_eq!(snapshot.monthly.longest_km, 5.0);

        // All three, newest first.
        assert_eq!(snapshot.recent.last3.len(), 3);
        assert_eq!(
            snapshot.recent.last3[0].start.as_deref(),
            Some("2025-08-20 08:00:00")
        );
        assert_eq!(
            snapshot.recent.last3[2].start.as_deref(),
            Some("2025-07-11 08:00:00")
        );

        // 40 days ago is inside the 12-week weekly window, so it keeps its
        // bucket; the series stays oldest-first.
        assert_eq!(snapshot.weekly.window_weeks, 12);
        assert_eq!(snapshot.weekly.series.len(), 3);
        assert_eq!(snapshot.weekly.series[0].week_start, "2025-07-07");
        assert_eq!(snapshot.weekly.series[0].distance_km, 10.0);
        let starts: Vec<&str> = snapshot
            .weekly
            .series
            .iter()
            .map(|b| b.week_start.as_str())
            .collect();
        let mut ordered = starts.clone();
        ordered.sort_unstable();
        assert_eq!(starts, ordered);
    }
}
