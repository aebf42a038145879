//! Chart series, rankings and export rows derived from detections.
//!
//! Everything here is a pure function of its input. Empty input yields
//! zero-filled output.

use std::borrow::Borrow;
use std::collections::HashMap;

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, SecondsFormat, TimeZone};
use serde::Serialize;

use crate::models::{DetectionRecord, UserRecord};

/// Label used when a reporter cannot be resolved
pub const UNKNOWN_USER: &str = "Unknown";

/// Look up the user a detection refers to
pub fn find_user<'a>(users: &'a [UserRecord], uid: &str) -> Option<&'a UserRecord> {
    if uid.is_empty() {
        return None;
    }
    users.iter().find(|u| u.uid == uid)
}

/// Name, falling back to email
fn user_label(user: &UserRecord) -> &str {
    if user.name.is_empty() {
        &user.email
    } else {
        &user.name
    }
}

/// Display name for a reporter: name, then email, then "Unknown"
pub fn display_name<'a>(users: &'a [UserRecord], uid: &str) -> &'a str {
    find_user(users, uid).map_or(UNKNOWN_USER, user_label)
}

/// Confidence class of a detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceClass {
    /// 80 and above
    High,
    /// 60 up to 80
    Medium,
    /// Below 60
    Low,
}

impl ConfidenceClass {
    pub fn of(confidence: f64) -> Self {
        if confidence >= 80.0 {
            ConfidenceClass::High
        } else if confidence >= 60.0 {
            ConfidenceClass::Medium
        } else {
            ConfidenceClass::Low
        }
    }
}

/// One point of a time series chart
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeriesPoint {
    pub label: String,
    /// First day covered by the point
    pub start: NaiveDate,
    pub count: usize,
}

/// Detections per day for the last `days` days including today, oldest first.
///
/// Days are calendar days in the time zone of `now`.
pub fn daily_series<Tz: TimeZone>(
    detections: &[DetectionRecord],
    days: usize,
    now: &DateTime<Tz>,
) -> Vec<SeriesPoint> {
    let tz = now.timezone();
    let mut per_day: HashMap<NaiveDate, usize> = HashMap::new();
    for d in detections {
        *per_day
            .entry(d.timestamp.with_timezone(&tz).date_naive())
            .or_default() += 1;
    }

    let today = now.date_naive();
    (0..days)
        .rev()
        .filter_map(|back| today.checked_sub_days(Days::new(back as u64)))
        .map(|date| SeriesPoint {
            label: date.format("%a").to_string(),
            start: date,
            count: per_day.get(&date).copied().unwrap_or(0),
        })
        .collect()
}

/// Detections per calendar month for the last `months` months including the
/// current one, oldest first
pub fn monthly_trend<Tz: TimeZone>(
    detections: &[DetectionRecord],
    months: usize,
    now: &DateTime<Tz>,
) -> Vec<SeriesPoint> {
    let tz = now.timezone();
    let mut per_month: HashMap<(i32, u32), usize> = HashMap::new();
    for d in detections {
        let date = d.timestamp.with_timezone(&tz).date_naive();
        *per_month.entry((date.year(), date.month())).or_default() += 1;
    }

    let this_month = now.date_naive().with_day(1);
    (0..months)
        .rev()
        .filter_map(|back| this_month?.checked_sub_months(Months::new(back as u32)))
        .map(|start| SeriesPoint {
            label: start.format("%b").to_string(),
            start,
            count: per_month
                .get(&(start.year(), start.month()))
                .copied()
                .unwrap_or(0),
        })
        .collect()
}

/// Detection counts per confidence class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ConfidenceBuckets {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl ConfidenceBuckets {
    /// Chart labels paired with counts
    pub fn labeled(&self) -> [(&'static str, usize); 3] {
        [
            ("High (80%+)", self.high),
            ("Medium (60-79%)", self.medium),
            ("Low (<60%)", self.low),
        ]
    }
}

pub fn confidence_buckets(detections: &[DetectionRecord]) -> ConfidenceBuckets {
    detections
        .iter()
        .fold(ConfidenceBuckets::default(), |mut buckets, d| {
            match ConfidenceClass::of(d.confidence) {
                ConfidenceClass::High => buckets.high += 1,
                ConfidenceClass::Medium => buckets.medium += 1,
                ConfidenceClass::Low => buckets.low += 1,
            }
            buckets
        })
}

/// Detection counts per speed range, km/h
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SpeedBuckets {
    /// [0, 20]
    pub up_to_20: usize,
    /// (20, 40]
    pub up_to_40: usize,
    /// (40, 60]
    pub up_to_60: usize,
    /// Above 60
    pub over_60: usize,
}

impl SpeedBuckets {
    pub fn labeled(&self) -> [(&'static str, usize); 4] {
        [
            ("0-20 km/h", self.up_to_20),
            ("21-40 km/h", self.up_to_40),
            ("41-60 km/h", self.up_to_60),
            ("60+ km/h", self.over_60),
        ]
    }
}

pub fn speed_buckets(detections: &[DetectionRecord]) -> SpeedBuckets {
    detections
        .iter()
        .fold(SpeedBuckets::default(), |mut buckets, d| {
            match d.speed {
                s if s <= 20.0 => buckets.up_to_20 += 1,
                s if s <= 40.0 => buckets.up_to_40 += 1,
                s if s <= 60.0 => buckets.up_to_60 += 1,
                _ => buckets.over_60 += 1,
            }
            buckets
        })
}

/// Hotspot: detections sharing a coordinate cell of 0.01 degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LocationCount {
    pub latitude: f64,
    pub longitude: f64,
    pub count: usize,
}

/// Coordinate rounded to two decimals, as integer hundredths.
///
/// Halves round up, so `-0.125` lands in the `-0.12` cell.
fn hundredths(value: f64) -> i64 {
    (value * 100.0 + 0.5).floor() as i64
}

/// The `n` busiest coordinate cells, most detections first.
///
/// Cells with equal counts keep the order in which they were first seen.
pub fn top_locations(detections: &[DetectionRecord], n: usize) -> Vec<LocationCount> {
    let mut index: HashMap<(i64, i64), usize> = HashMap::new();
    let mut cells: Vec<LocationCount> = Vec::new();

    for d in detections {
        let key = (hundredths(d.latitude), hundredths(d.longitude));
        match index.get(&key) {
            Some(&i) => cells[i].count += 1,
            None => {
                index.insert(key, cells.len());
                cells.push(LocationCount {
                    latitude: key.0 as f64 / 100.0,
                    longitude: key.1 as f64 / 100.0,
                    count: 1,
                });
            }
        }
    }

    cells.sort_by(|a, b| b.count.cmp(&a.count));
    cells.truncate(n);
    cells
}

/// Detections attributed to one reporter
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserCount {
    pub user_id: String,
    pub label: String,
    pub count: usize,
}

/// The `n` most active reporters, most detections first
pub fn top_users(detections: &[DetectionRecord], users: &[UserRecord], n: usize) -> Vec<UserCount> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut counts: Vec<(&str, usize)> = Vec::new();

    for d in detections {
        match index.get(d.user_id.as_str()) {
            Some(&i) => counts[i].1 += 1,
            None => {
                index.insert(d.user_id.as_str(), counts.len());
                counts.push((d.user_id.as_str(), 1));
            }
        }
    }

    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
        .into_iter()
        .take(n)
        .map(|(user_id, count)| UserCount {
            user_id: user_id.to_string(),
            label: ranking_label(users, user_id),
            count,
        })
        .collect()
}

fn ranking_label(users: &[UserRecord], user_id: &str) -> String {
    if user_id.is_empty() {
        return UNKNOWN_USER.to_string();
    }
    match find_user(users, user_id) {
        Some(user) => user_label(user).to_string(),
        None => format!("User {}", user_id.chars().take(6).collect::<String>()),
    }
}

/// The `n` most recent detections, newest first
pub fn recent_detections(detections: &[DetectionRecord], n: usize) -> Vec<&DetectionRecord> {
    let mut recent: Vec<&DetectionRecord> = detections.iter().collect();
    recent.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    recent.truncate(n);
    recent
}

/// Flat export record, one per detection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportRow {
    pub id: String,
    /// RFC 3339, UTC, millisecond precision
    pub timestamp: String,
    pub latitude: f64,
    pub longitude: f64,
    pub confidence: f64,
    pub speed: f64,
    pub user_name: String,
    pub user_email: String,
    pub user_id: String,
    pub accelerometer_x: f64,
    pub accelerometer_y: f64,
    pub accelerometer_z: f64,
}

impl ExportRow {
    /// Column names, in serialization order
    pub const FIELDS: [&'static str; 12] = [
        "id",
        "timestamp",
        "latitude",
        "longitude",
        "confidence",
        "speed",
        "user_name",
        "user_email",
        "user_id",
        "accelerometer_x",
        "accelerometer_y",
        "accelerometer_z",
    ];
}

/// Join each detection with its reporter for export
pub fn to_export_rows<D: Borrow<DetectionRecord>>(
    detections: &[D],
    users: &[UserRecord],
) -> Vec<ExportRow> {
    detections
        .iter()
        .map(|d| {
            let d: &DetectionRecord = d.borrow();
            let user = find_user(users, &d.user_id);
            let or_unknown = |s: &str| {
                if s.is_empty() {
                    UNKNOWN_USER.to_string()
                } else {
                    s.to_string()
                }
            };
            let accel = d.accelerometer.unwrap_or_default();

            ExportRow {
                id: d.id.clone(),
                timestamp: d.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
                latitude: d.latitude,
                longitude: d.longitude,
                confidence: d.confidence,
                speed: d.speed,
                user_name: or_unknown(user.map_or("", |u| u.name.as_str())),
                user_email: or_unknown(user.map_or("", |u| u.email.as_str())),
                user_id: d.user_id.clone(),
                accelerometer_x: accel.x.unwrap_or(0.0),
                accelerometer_y: accel.y.unwrap_or(0.0),
                accelerometer_z: accel.z.unwrap_or(0.0),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Accelerometer, Role};
    use chrono::{Duration, FixedOffset, Utc};

    fn detection(id: &str, confidence: f64) -> DetectionRecord {
        DetectionRecord {
            id: id.to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap(),
            latitude: 40.7128,
            longitude: -74.006,
            confidence,
            speed: 0.0,
            user_id: String::new(),
            accelerometer: None,
        }
    }

    fn at(id: &str, timestamp: DateTime<Utc>) -> DetectionRecord {
        DetectionRecord {
            timestamp,
            ..detection(id, 50.0)
        }
    }

    fn by(id: &str, user_id: &str) -> DetectionRecord {
        DetectionRecord {
            user_id: user_id.to_string(),
            ..detection(id, 50.0)
        }
    }

    fn user(uid: &str, name: &str, email: &str) -> UserRecord {
        UserRecord {
            uid: uid.to_string(),
            name: name.to_string(),
            email: email.to_string(),
            role: Role::User,
            created_at: DateTime::UNIX_EPOCH,
            last_active: None,
        }
    }

    #[test]
    fn confidence_bucket_boundaries() {
        let detections: Vec<_> = [10.0, 60.0, 79.0, 80.0, 95.0]
            .iter()
            .map(|&c| detection("p", c))
            .collect();
        assert_eq!(
            confidence_buckets(&detections),
            ConfidenceBuckets {
                high: 2,
                medium: 2,
                low: 1
            }
        );
        assert_eq!(confidence_buckets(&[]), ConfidenceBuckets::default());
        assert_eq!(
            confidence_buckets(&detections).labeled(),
            [("High (80%+)", 2), ("Medium (60-79%)", 2), ("Low (<60%)", 1)]
        );
    }

    #[test]
    fn speed_bucket_boundaries() {
        let detections: Vec<_> = [0.0, 20.0, 20.5, 40.0, 40.1, 60.0, 60.1, 130.0]
            .iter()
            .map(|&speed| DetectionRecord {
                speed,
                ..detection("p", 50.0)
            })
            .collect();
        assert_eq!(
            speed_buckets(&detections),
            SpeedBuckets {
                up_to_20: 2,
                up_to_40: 2,
                up_to_60: 2,
                over_60: 2
            }
        );
        assert_eq!(speed_buckets(&[]), SpeedBuckets::default());
        assert_eq!(
            speed_buckets(&detections).labeled()[3],
            ("60+ km/h", 2)
        );
    }

    #[test]
    fn daily_series_is_zero_filled() {
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap();
        let series = daily_series(&[], 7, &now);
        assert_eq!(series.len(), 7);
        assert!(series.iter().all(|p| p.count == 0));
        assert_eq!(series[0].start, NaiveDate::from_ymd_opt(2024, 6, 9).unwrap());
        assert_eq!(series[6].start, NaiveDate::from_ymd_opt(2024, 6, 15).unwrap());
        assert_eq!(series[6].label, "Sat");
    }

    #[test]
    fn daily_series_counts_local_days() {
        let zone = FixedOffset::west_opt(5 * 3600).unwrap();
        let now = zone.with_ymd_and_hms(2024, 6, 15, 9, 0, 0).unwrap();
        let detections = vec![
            // 03:00 UTC on the 15th is still the 14th at UTC-05:00
            at("a", Utc.with_ymd_and_hms(2024, 6, 15, 3, 0, 0).unwrap()),
            at("b", Utc.with_ymd_and_hms(2024, 6, 15, 13, 0, 0).unwrap()),
            at("c", Utc.with_ymd_and_hms(2024, 6, 15, 14, 0, 0).unwrap()),
            // Too old for the window
            at("d", Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()),
        ];

        let counts: Vec<usize> = daily_series(&detections, 7, &now)
            .iter()
            .map(|p| p.count)
            .collect();
        assert_eq!(counts, vec![0, 0, 0, 0, 0, 1, 2]);
    }

    #[test]
    fn monthly_trend_uses_calendar_months() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        let detections = vec![
            at("a", Utc.with_ymd_and_hms(2024, 2, 29, 23, 59, 59).unwrap()),
            at("b", Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()),
            at("c", Utc.with_ymd_and_hms(2023, 10, 31, 18, 0, 0).unwrap()),
            at("d", Utc.with_ymd_and_hms(2023, 9, 30, 18, 0, 0).unwrap()),
        ];

        let trend = monthly_trend(&detections, 6, &now);
        let labels: Vec<&str> = trend.iter().map(|p| p.label.as_str()).collect();
        let counts: Vec<usize> = trend.iter().map(|p| p.count).collect();
        assert_eq!(labels, vec!["Oct", "Nov", "Dec", "Jan", "Feb", "Mar"]);
        assert_eq!(counts, vec![1, 0, 0, 0, 1, 1]);
        assert_eq!(monthly_trend(&[], 6, &now).len(), 6);
    }

    #[test]
    fn nearby_detections_share_a_hotspot() {
        let mut a = detection("a", 50.0);
        a.latitude = 40.75801;
        a.longitude = -73.98551;
        let mut b = detection("b", 50.0);
        b.latitude = 40.75804;
        b.longitude = -73.98549;

        let hotspots = top_locations(&[a, b], 5);
        assert_eq!(hotspots.len(), 1);
        assert_eq!(hotspots[0].count, 2);
        assert_eq!(hotspots[0].latitude, 40.76);
        assert_eq!(hotspots[0].longitude, -73.99);
    }

    #[test]
    fn negative_halves_round_up() {
        let place = |id: &str, lat: f64, lng: f64| DetectionRecord {
            latitude: lat,
            longitude: lng,
            ..detection(id, 50.0)
        };
        let detections = vec![
            place("a", -0.125, 0.125),
            place("b", -0.12, 0.13),
            place("c", -0.13, 0.12),
        ];

        let hotspots = top_locations(&detections, 5);
        assert_eq!(hotspots.len(), 2);
        assert_eq!(hotspots[0].count, 2);
        assert_eq!(hotspots[0].latitude, -0.12);
        assert_eq!(hotspots[0].longitude, 0.13);
    }

    #[test]
    fn hotspot_ties_keep_first_seen_order() {
        let place = |id: &str, lat: f64| DetectionRecord {
            latitude: lat,
            ..detection(id, 50.0)
        };
        let detections = vec![
            place("a", 10.0),
            place("b", 20.0),
            place("c", 30.0),
            place("d", 30.0),
            place("e", 20.0),
            place("f", 40.0),
        ];

        let lats: Vec<f64> = top_locations(&detections, 3)
            .iter()
            .map(|l| l.latitude)
            .collect();
        assert_eq!(lats, vec![20.0, 30.0, 10.0]);
        assert!(top_locations(&[], 5).is_empty());
    }

    #[test]
    fn top_users_resolves_labels() {
        let users = vec![
            user("u1", "Ada", "ada@example.com"),
            user("u2", "", "bob@example.com"),
        ];
        let detections = vec![
            by("1", "u2"),
            by("2", "abcdefghij"),
            by("3", "u1"),
            by("4", "u1"),
            by("5", "abcdefghij"),
            by("6", "u1"),
        ];

        let ranking = top_users(&detections, &users, 10);
        let labels: Vec<(&str, usize)> = ranking.iter().map(|u| (u.label.as_str(), u.count)).collect();
        assert_eq!(
            labels,
            vec![("Ada", 3), ("User abcdef", 2), ("bob@example.com", 1)]
        );
        assert_eq!(top_users(&detections, &users, 1).len(), 1);
    }

    #[test]
    fn recent_detections_newest_first() {
        let base = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap();
        let detections: Vec<_> = (0..8)
            .map(|i| at(&i.to_string(), base + Duration::minutes(i)))
            .collect();
        let recent: Vec<&str> = recent_detections(&detections, 5)
            .iter()
            .map(|d| d.id.as_str())
            .collect();
        assert_eq!(recent, vec!["7", "6", "5", "4", "3"]);
    }

    #[test]
    fn export_rows_join_users() {
        let users = vec![user("u1", "Ada", "ada@example.com")];
        let mut known = by("p1", "u1");
        known.latitude = 40.758012345;
        known.accelerometer = Some(Accelerometer {
            x: Some(1.5),
            y: None,
            z: Some(-0.25),
        });
        let unknown = by("p2", "ghost");

        let rows = to_export_rows(&[known.clone(), unknown], &users);
        assert_eq!(rows.len(), 2);

        assert_eq!(rows[0].user_name, "Ada");
        assert_eq!(rows[0].user_email, "ada@example.com");
        assert_eq!(rows[0].latitude, known.latitude);
        assert_eq!(rows[0].timestamp, "2024-06-15T12:00:00.000Z");
        assert_eq!(rows[0].accelerometer_x, 1.5);
        assert_eq!(rows[0].accelerometer_y, 0.0);
        assert_eq!(rows[0].accelerometer_z, -0.25);

        assert_eq!(rows[1].user_name, UNKNOWN_USER);
        assert_eq!(rows[1].user_email, UNKNOWN_USER);
        assert_eq!(rows[1].user_id, "ghost");
    }

    #[test]
    fn display_name_fallbacks() {
        let users = vec![
            user("u1", "Ada", "ada@example.com"),
            user("u2", "", "bob@example.com"),
        ];
        assert_eq!(display_name(&users, "u1"), "Ada");
        assert_eq!(display_name(&users, "u2"), "bob@example.com");
        assert_eq!(display_name(&users, "u3"), UNKNOWN_USER);
        assert_eq!(display_name(&users, ""), UNKNOWN_USER);
        assert_eq!(ConfidenceClass::of(79.9), ConfidenceClass::Medium);
    }
}
