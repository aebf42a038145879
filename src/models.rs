//! Data models.
//!
//! Raw provider documents (`Raw*`) are deserialized loosely and pass through a
//! strict normalization step that produces the canonical records used by every
//! other module. Nothing past this module handles untyped documents.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::DashboardError;
use serde_helpers::*;

/// Highest confidence score a detection can report.
pub const MAX_CONFIDENCE: f64 = 100.0;

/// Timestamp as stored by the data provider.
///
/// Depending on the client that wrote the document, the provider hands back
/// one of three encodings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    /// Milliseconds from Unix epoch
    Epoch(f64),
    /// ISO-8601 / RFC 3339 string
    Text(String),
    /// Native provider timestamp object
    Provider(ProviderTimestamp),
}

/// Provider timestamp object, `{"seconds": .., "nanoseconds": ..}`.
///
/// The admin SDK serializes the same object with underscore-prefixed keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ProviderTimestamp {
    #[serde(alias = "_seconds")]
    pub seconds: i64,
    #[serde(alias = "_nanoseconds", default)]
    pub nanoseconds: u32,
}

impl RawTimestamp {
    /// Convert to a UTC instant. `id` is only used for error reporting.
    pub fn to_datetime(&self, id: &str) -> Result<DateTime<Utc>, DashboardError> {
        match self {
            RawTimestamp::Epoch(millis) => {
                if !millis.is_finite() {
                    return Err(DashboardError::malformed(id, "non-finite epoch timestamp"));
                }
                DateTime::from_timestamp_millis(millis.trunc() as i64).ok_or_else(|| {
                    DashboardError::malformed(id, format!("epoch timestamp out of range: {millis}"))
                })
            }
            RawTimestamp::Text(text) => parse_timestamp_text(text)
                .ok_or_else(|| DashboardError::malformed(id, format!("unparseable timestamp '{text}'"))),
            RawTimestamp::Provider(ts) => DateTime::from_timestamp(ts.seconds, ts.nanoseconds)
                .ok_or_else(|| {
                    DashboardError::malformed(id, format!("provider timestamp out of range: {}s", ts.seconds))
                }),
        }
    }
}

/// Parse an ISO-8601 string. Strings without an offset are read as UTC.
fn parse_timestamp_text(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Resolve an optional raw timestamp, falling back to `now` when absent.
fn timestamp_or_now(
    raw: Option<&RawTimestamp>,
    id: &str,
    field: &str,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, DashboardError> {
    match raw {
        Some(ts) => ts.to_datetime(id),
        None => {
            debug!("Record {} has no {}, using normalization time", id, field);
            Ok(now)
        }
    }
}

/// Accelerometer reading attached to a detection.
///
/// Individual axes may be missing from the source document; they stay `None`
/// here and are zero-filled only when projected for display or export.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Accelerometer {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
}

/// Pothole detection document as delivered by the provider
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct RawDetection {
    #[serde(default, deserialize_with = "deserialize_trimmed_string")]
    pub id: Option<String>,
    pub timestamp: Option<RawTimestamp>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub confidence: Option<f64>,
    pub speed: Option<f64>,
    #[serde(
        default,
        alias = "userId",
        deserialize_with = "deserialize_trimmed_string"
    )]
    pub user_id: Option<String>,
    #[serde(rename = "accelerometer_data", alias = "accelerometer")]
    pub accelerometer: Option<Accelerometer>,
}

/// Canonical pothole detection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionRecord {
    /// Unique within a snapshot
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// Latitude in WGS84 decimal degrees
    pub latitude: f64,
    /// Longitude in WGS84 decimal degrees
    pub longitude: f64,
    /// Model confidence, 0 - 100
    pub confidence: f64,
    /// Vehicle speed in km/h
    pub speed: f64,
    /// Reporting user, weak reference to [`UserRecord::uid`]. Empty if unknown.
    pub user_id: String,
    pub accelerometer: Option<Accelerometer>,
}

impl RawDetection {
    /// Normalize into a [`DetectionRecord`].
    ///
    /// A missing timestamp is replaced with `now`. A missing speed reads as 0.
    pub fn normalize(self, now: DateTime<Utc>) -> Result<DetectionRecord, DashboardError> {
        let id = self
            .id
            .ok_or_else(|| DashboardError::malformed("<missing>", "missing id"))?;

        let latitude = require_finite(self.latitude, &id, "latitude")?;
        let longitude = require_finite(self.longitude, &id, "longitude")?;

        let confidence = require_finite(self.confidence, &id, "confidence")?;
        if !(0.0..=MAX_CONFIDENCE).contains(&confidence) {
            return Err(DashboardError::malformed(
                &id,
                format!("confidence {confidence} outside [0, 100]"),
            ));
        }

        let speed = self.speed.unwrap_or(0.0);
        if !speed.is_finite() || speed < 0.0 {
            return Err(DashboardError::malformed(&id, format!("invalid speed {speed}")));
        }

        let timestamp = timestamp_or_now(self.timestamp.as_ref(), &id, "timestamp", now)?;

        Ok(DetectionRecord {
            id,
            timestamp,
            latitude,
            longitude,
            confidence,
            speed,
            user_id: self.user_id.unwrap_or_default(),
            accelerometer: self.accelerometer,
        })
    }
}

fn require_finite(value: Option<f64>, id: &str, field: &str) -> Result<f64, DashboardError> {
    match value {
        Some(v) if v.is_finite() => Ok(v),
        Some(v) => Err(DashboardError::malformed(id, format!("non-finite {field}: {v}"))),
        None => Err(DashboardError::malformed(id, format!("missing {field}"))),
    }
}

/// User role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }

    /// The role an admin would switch this user to (promote / demote)
    pub fn toggled(&self) -> Role {
        match self {
            Role::Admin => Role::User,
            Role::User => Role::Admin,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = DashboardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            other => Err(DashboardError::malformed(
                "<role>",
                format!("unknown role '{other}'"),
            )),
        }
    }
}

/// User profile document as delivered by the provider
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct RawUser {
    #[serde(default, deserialize_with = "deserialize_trimmed_string")]
    pub uid: Option<String>,
    /// Document id, duplicated into the document by some clients
    #[serde(default, deserialize_with = "deserialize_trimmed_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_trimmed_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_trimmed_string")]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "deserialize_trimmed_string")]
    pub role: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: Option<RawTimestamp>,
    #[serde(rename = "lastActive")]
    pub last_active: Option<RawTimestamp>,
}

/// Canonical user profile
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserRecord {
    pub uid: String,
    /// Display name, empty string if not set
    pub name: String,
    /// Never empty
    pub email: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub last_active: Option<DateTime<Utc>>,
}

impl RawUser {
    /// Normalize into a [`UserRecord`].
    ///
    /// Missing role reads as [`Role::User`], missing `createdAt` as `now`.
    pub fn normalize(self, now: DateTime<Utc>) -> Result<UserRecord, DashboardError> {
        let uid = self
            .uid
            .or(self.id)
            .ok_or_else(|| DashboardError::malformed("<missing>", "missing uid"))?;

        let email = self
            .email
            .ok_or_else(|| DashboardError::malformed(&uid, "missing email"))?;

        let role = match self.role {
            Some(role) => role.parse::<Role>().map_err(|_| {
                DashboardError::malformed(&uid, format!("unknown role '{role}'"))
            })?,
            None => Role::default(),
        };

        let created_at = timestamp_or_now(self.created_at.as_ref(), &uid, "createdAt", now)?;
        let last_active = self
            .last_active
            .as_ref()
            .map(|ts| ts.to_datetime(&uid))
            .transpose()?;

        Ok(UserRecord {
            uid,
            name: self.name.unwrap_or_default(),
            email,
            role,
            created_at,
            last_active,
        })
    }
}

/// Full provider state as of one fetch, before normalization
///
/// Documents are kept untyped so that one bad document cannot fail the
/// whole batch at deserialization time.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct RawSnapshot {
    #[serde(default, alias = "detections")]
    pub potholes: Vec<Value>,
    #[serde(default)]
    pub users: Vec<Value>,
}

/// Immutable dataset snapshot
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot {
    detections: Vec<DetectionRecord>,
    users: Vec<UserRecord>,
}

impl Snapshot {
    pub fn new(detections: Vec<DetectionRecord>, users: Vec<UserRecord>) -> Self {
        Self { detections, users }
    }

    pub fn detections(&self) -> &[DetectionRecord] {
        &self.detections
    }

    pub fn users(&self) -> &[UserRecord] {
        &self.users
    }

    /// Normalize a raw batch, skipping malformed documents.
    ///
    /// Each rejected document is logged; the rest of the batch is kept.
    /// Detections repeating an already seen id are dropped.
    pub fn normalize(raw: RawSnapshot, now: DateTime<Utc>) -> Self {
        let mut detections: Vec<DetectionRecord> = Vec::with_capacity(raw.potholes.len());
        let mut seen: HashSet<String> = HashSet::with_capacity(raw.potholes.len());
        for value in raw.potholes {
            match normalize_document::<RawDetection, _>(value, |d| d.normalize(now)) {
                Ok(detection) => {
                    if !seen.insert(detection.id.clone()) {
                        warn!("Skipping detection with duplicate id {}", detection.id);
                        continue;
                    }
                    detections.push(detection);
                }
                Err(e) => warn!("Skipping detection: {}", e),
            }
        }

        let mut users = Vec::with_capacity(raw.users.len());
        for value in raw.users {
            match normalize_document::<RawUser, _>(value, |u| u.normalize(now)) {
                Ok(user) => users.push(user),
                Err(e) => warn!("Skipping user: {}", e),
            }
        }

        debug!(
            "Normalized snapshot: {} detections, {} users",
            detections.len(),
            users.len()
        );

        Self { detections, users }
    }
}

/// Deserialize a single untyped document and normalize it
fn normalize_document<R, T>(
    value: Value,
    normalize: impl FnOnce(R) -> Result<T, DashboardError>,
) -> Result<T, DashboardError>
where
    R: for<'de> Deserialize<'de>,
{
    let id = ["id", "uid"]
        .iter()
        .find_map(|key| value.get(key).and_then(Value::as_str))
        .unwrap_or("<missing>")
        .to_string();
    let raw: R = serde_json::from_value(value)
        .map_err(|e| DashboardError::malformed(id, e.to_string()))?;
    normalize(raw)
}

/// Custom deserializers
mod serde_helpers {
    use serde::{self, Deserialize, Deserializer};

    /// Trim strings, reading empty ones (and `null`) as `None`
    pub fn deserialize_trimmed_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: Option<String> = Option::deserialize(deserializer)?;
        Ok(s.and_then(|s| {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }))
    }
}
