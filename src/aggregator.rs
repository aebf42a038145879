//! Summary statistics over a snapshot

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::Serialize;

use crate::models::{DetectionRecord, Role, Snapshot};

/// Dashboard headline numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Statistics {
    pub total_detections: usize,
    pub total_users: usize,
    /// Detections since local midnight
    pub today_detections: usize,
    /// Mean confidence rounded half-up, 0 without detections
    pub avg_confidence: u32,
    pub total_admins: usize,
    pub total_regular_users: usize,
}

/// Compute [`Statistics`] for `snapshot` as seen at `now`.
///
/// "Today" starts at midnight in the time zone of `now`.
pub fn compute_statistics<Tz: TimeZone>(snapshot: &Snapshot, now: &DateTime<Tz>) -> Statistics {
    let detections = snapshot.detections();
    let users = snapshot.users();

    let midnight = start_of_day(now);
    let today_detections = detections
        .iter()
        .filter(|d| midnight.map_or(true, |m| d.timestamp >= m))
        .count();

    let total_admins = users.iter().filter(|u| u.role == Role::Admin).count();

    Statistics {
        total_detections: detections.len(),
        total_users: users.len(),
        today_detections,
        avg_confidence: average_confidence(detections),
        total_admins,
        total_regular_users: users.len() - total_admins,
    }
}

/// Mean confidence rounded half-up
pub fn average_confidence(detections: &[DetectionRecord]) -> u32 {
    if detections.is_empty() {
        return 0;
    }
    let sum: f64 = detections.iter().map(|d| d.confidence).sum();
    (sum / detections.len() as f64).round() as u32
}

/// UTC instant of the local midnight that starts the day containing `now`.
///
/// `None` only if that midnight does not exist in the zone (a DST gap at
/// midnight); callers then treat the whole range as today.
pub(crate) fn start_of_day<Tz: TimeZone>(now: &DateTime<Tz>) -> Option<DateTime<Utc>> {
    local_midnight(&now.timezone(), now.date_naive())
}

/// UTC instant of local midnight on `date` in zone `tz`
pub(crate) fn local_midnight<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> Option<DateTime<Utc>> {
    let naive = date.and_hms_opt(0, 0, 0)?;
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}
