//! Search, sort and pagination over detections and users
//!
//! The functions here are independent; callers chain them as
//! search -> sort -> paginate.

use std::borrow::Borrow;
use std::str::FromStr;

use chrono::{NaiveDate, TimeZone};
use serde::{Deserialize, Serialize};

use crate::errors::DashboardError;
use crate::models::{DetectionRecord, Role, UserRecord};
use crate::projection::display_name;

/// Detections whose id, reporter name or coordinates contain `term`
///
/// Matching is case-insensitive. An empty term keeps every detection.
pub fn search_detections<'a>(
    detections: &'a [DetectionRecord],
    users: &[UserRecord],
    term: &str,
) -> Vec<&'a DetectionRecord> {
    let term = term.to_lowercase();
    detections
        .iter()
        .filter(|d| term.is_empty() || detection_search_text(d, users).contains(&term))
        .collect()
}

fn detection_search_text(detection: &DetectionRecord, users: &[UserRecord]) -> String {
    format!(
        "{} {} {} {}",
        detection.id,
        display_name(users, &detection.user_id),
        detection.latitude,
        detection.longitude
    )
    .to_lowercase()
}

/// Users whose name, email or role contain `term`, case-insensitive
pub fn search_users<'a>(users: &'a [UserRecord], term: &str) -> Vec<&'a UserRecord> {
    let term = term.to_lowercase();
    users
        .iter()
        .filter(|u| {
            term.is_empty()
                || format!("{} {} {}", u.name, u.email, u.role)
                    .to_lowercase()
                    .contains(&term)
        })
        .collect()
}

/// Role selector of the user table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleFilter {
    #[default]
    All,
    Admin,
    User,
}

impl RoleFilter {
    pub fn matches(&self, role: Role) -> bool {
        match self {
            RoleFilter::All => true,
            RoleFilter::Admin => role == Role::Admin,
            RoleFilter::User => role == Role::User,
        }
    }
}

impl FromStr for RoleFilter {
    type Err = DashboardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" | "" => Ok(RoleFilter::All),
            other => other.parse::<Role>().map(|role| match role {
                Role::Admin => RoleFilter::Admin,
                Role::User => RoleFilter::User,
            }),
        }
    }
}

pub fn filter_users_by_role<U: Borrow<UserRecord>>(users: Vec<U>, filter: RoleFilter) -> Vec<U> {
    users
        .into_iter()
        .filter(|u| filter.matches(u.borrow().role))
        .collect()
}

/// Marker filter of the map view
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MapFilter {
    /// Applied only when greater than zero
    pub min_confidence: f64,
    /// Calendar day in the viewer's time zone
    pub date: Option<NaiveDate>,
}

/// Detections to be shown as map markers
pub fn filter_for_map<'a, Tz: TimeZone>(
    detections: &'a [DetectionRecord],
    filter: &MapFilter,
    tz: &Tz,
) -> Vec<&'a DetectionRecord> {
    detections
        .iter()
        .filter(|d| filter.min_confidence <= 0.0 || d.confidence >= filter.min_confidence)
        .filter(|d| {
            filter
                .date
                .map_or(true, |date| d.timestamp.with_timezone(tz).date_naive() == date)
        })
        .collect()
}

/// Ordering of the detection table
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SortKey {
    /// Most recent first
    #[default]
    Timestamp,
    /// Highest confidence first
    Confidence,
    /// Reporter id, ascending
    UserId,
    /// Leaves the input order untouched
    Unknown(String),
}

impl From<&str> for SortKey {
    fn from(value: &str) -> Self {
        match value {
            "timestamp" => SortKey::Timestamp,
            "confidence" => SortKey::Confidence,
            "user_id" | "userId" => SortKey::UserId,
            other => SortKey::Unknown(other.to_string()),
        }
    }
}

/// Stable sort of detections by `key`
pub fn sort_detections<D: Borrow<DetectionRecord>>(mut records: Vec<D>, key: &SortKey) -> Vec<D> {
    match key {
        SortKey::Timestamp => {
            records.sort_by(|a, b| b.borrow().timestamp.cmp(&a.borrow().timestamp))
        }
        SortKey::Confidence => records.sort_by(|a, b| {
            b.borrow()
                .confidence
                .total_cmp(&a.borrow().confidence)
        }),
        SortKey::UserId => {
            records.sort_by(|a, b| a.borrow().user_id.cmp(&b.borrow().user_id))
        }
        SortKey::Unknown(_) => {}
    }
    records
}

/// One page of a result list
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// 1-indexed page number as requested
    pub page: usize,
    pub page_size: usize,
    pub total_items: usize,
    pub total_pages: usize,
}

impl<T> Page<T> {
    pub fn has_prev(&self) -> bool {
        self.page > 1
    }

    pub fn has_next(&self) -> bool {
        self.page >= 1 && self.page < self.total_pages
    }
}

/// Number of pages needed for `total_items`
pub fn total_pages(total_items: usize, page_size: usize) -> usize {
    if page_size == 0 {
        0
    } else {
        total_items.div_ceil(page_size)
    }
}

/// Slice out 1-indexed `page`. Out-of-range pages come back empty.
pub fn paginate<T: Clone>(records: &[T], page: usize, page_size: usize) -> Page<T> {
    let total_pages = total_pages(records.len(), page_size);
    let items = if page == 0 || page > total_pages {
        Vec::new()
    } else {
        let start = (page - 1) * page_size;
        let end = (start + page_size).min(records.len());
        records[start..end].to_vec()
    };

    Page {
        items,
        page,
        page_size,
        total_items: records.len(),
        total_pages,
    }
}
