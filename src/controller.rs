//! Dashboard controller
//!
//! Owns the view state of one admin session and the latest snapshot. Every
//! view is recomputed from the snapshot on demand.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeZone};
use serde::Serialize;
use tracing::{debug, info};

use crate::aggregator::{compute_statistics, Statistics};
use crate::config::DashboardConfig;
use crate::errors::DashboardError;
use crate::export::{self, ExportFormat};
use crate::models::{DetectionRecord, Role, Snapshot, UserRecord};
use crate::projection::{
    self, ConfidenceBuckets, LocationCount, SeriesPoint, SpeedBuckets, UserCount,
};
use crate::query::{self, MapFilter, Page, RoleFilter, SortKey};
use crate::source::SnapshotSource;

/// Interactive state of the dashboard tables and map
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ViewState {
    pub search: String,
    pub sort: SortKey,
    /// 1-indexed
    pub page: usize,
    pub user_search: String,
    pub role_filter: RoleFilter,
    pub map_filter: MapFilter,
}

/// A row of the user management table
#[derive(Debug, Clone, PartialEq)]
pub struct UserRow<'a> {
    pub user: &'a UserRecord,
    /// The signed-in admin; shown as "You" instead of a role action
    pub is_acting_user: bool,
    /// Role a promote / demote action would assign, `None` when not allowed
    pub role_action: Option<Role>,
}

/// Everything the overview and analytics tabs render
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardSummary {
    pub statistics: Statistics,
    pub daily: Vec<SeriesPoint>,
    pub monthly: Vec<SeriesPoint>,
    pub confidence: ConfidenceBuckets,
    pub speed: SpeedBuckets,
    pub top_locations: Vec<LocationCount>,
    pub top_users: Vec<UserCount>,
    pub recent: Vec<DetectionRecord>,
}

pub struct Dashboard {
    snapshot: Arc<Snapshot>,
    state: ViewState,
    settings: DashboardConfig,
    acting_user: Option<String>,
}

impl Dashboard {
    pub fn new(settings: DashboardConfig) -> Self {
        Self {
            snapshot: Arc::new(Snapshot::default()),
            state: ViewState {
                page: 1,
                ..Default::default()
            },
            acting_user: settings.acting_user.clone(),
            settings,
        }
    }

    pub fn snapshot(&self) -> &Arc<Snapshot> {
        &self.snapshot
    }

    pub fn state(&self) -> &ViewState {
        &self.state
    }

    /// Replace the whole dataset. The table goes back to its first page.
    pub fn apply_snapshot(&mut self, snapshot: impl Into<Arc<Snapshot>>) {
        self.snapshot = snapshot.into();
        self.state.page = 1;
        debug!(
            "Applied snapshot: {} detections, {} users",
            self.snapshot.detections().len(),
            self.snapshot.users().len()
        );
    }

    pub fn set_acting_user(&mut self, uid: Option<String>) {
        self.acting_user = uid;
    }

    pub fn set_search(&mut self, term: &str) {
        self.state.search = term.to_string();
        self.state.page = 1;
    }

    pub fn set_sort(&mut self, key: impl Into<SortKey>) {
        self.state.sort = key.into();
    }

    pub fn set_user_search(&mut self, term: &str) {
        self.state.user_search = term.to_string();
    }

    pub fn set_role_filter(&mut self, filter: RoleFilter) {
        self.state.role_filter = filter;
    }

    pub fn set_map_filter(&mut self, min_confidence: f64, date: Option<NaiveDate>) {
        self.state.map_filter = MapFilter {
            min_confidence,
            date,
        };
    }

    /// Detections matching the current search, in the current order
    pub fn filtered_detections(&self) -> Vec<&DetectionRecord> {
        let found = query::search_detections(
            self.snapshot.detections(),
            self.snapshot.users(),
            &self.state.search,
        );
        query::sort_detections(found, &self.state.sort)
    }

    pub fn table_page(&self) -> Page<&DetectionRecord> {
        query::paginate(
            &self.filtered_detections(),
            self.state.page,
            self.settings.page_size,
        )
    }

    pub fn next_page(&mut self) {
        let total = query::total_pages(self.filtered_detections().len(), self.settings.page_size);
        if self.state.page < total {
            self.state.page += 1;
        }
    }

    pub fn prev_page(&mut self) {
        if self.state.page > 1 {
            self.state.page -= 1;
        }
    }

    pub fn is_acting_user(&self, uid: &str) -> bool {
        self.acting_user.as_deref() == Some(uid)
    }

    /// Admins cannot change their own role
    pub fn can_change_role(&self, uid: &str) -> bool {
        !self.is_acting_user(uid)
    }

    pub fn user_rows(&self) -> Vec<UserRow<'_>> {
        let found = query::search_users(self.snapshot.users(), &self.state.user_search);
        query::filter_users_by_role(found, self.state.role_filter)
            .into_iter()
            .map(|user| {
                let is_acting_user = self.is_acting_user(&user.uid);
                UserRow {
                    user,
                    is_acting_user,
                    role_action: (!is_acting_user).then(|| user.role.toggled()),
                }
            })
            .collect()
    }

    /// Promote or demote user `uid` through `source`, returning the new role.
    ///
    /// The change becomes visible with the next snapshot pushed by the source.
    pub fn change_user_role<S: SnapshotSource>(
        &self,
        source: &S,
        uid: &str,
    ) -> Result<Role, DashboardError> {
        if !self.can_change_role(uid) {
            return Err(DashboardError::RoleChangeNotAllowed {
                uid: uid.to_string(),
            });
        }
        let user = self
            .snapshot
            .users()
            .iter()
            .find(|u| u.uid == uid)
            .ok_or_else(|| DashboardError::RecordNotFound {
                kind: "user",
                id: uid.to_string(),
            })?;

        let role = user.role.toggled();
        source.update_user_role(uid, role)?;
        info!("Changed role of {} from {} to {}", uid, user.role, role);
        Ok(role)
    }

    /// Delete a flagged detection through `source`
    pub fn delete_detection<S: SnapshotSource>(
        &self,
        source: &S,
        id: &str,
    ) -> Result<(), DashboardError> {
        if !self.snapshot.detections().iter().any(|d| d.id == id) {
            return Err(DashboardError::RecordNotFound {
                kind: "detection",
                id: id.to_string(),
            });
        }
        source.delete_detection(id)
    }

    pub fn statistics<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Statistics {
        compute_statistics(&self.snapshot, now)
    }

    pub fn map_markers<Tz: TimeZone>(&self, tz: &Tz) -> Vec<&DetectionRecord> {
        query::filter_for_map(self.snapshot.detections(), &self.state.map_filter, tz)
    }

    pub fn summary<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> DashboardSummary {
        let detections = self.snapshot.detections();
        let users = self.snapshot.users();

        DashboardSummary {
            statistics: self.statistics(now),
            daily: projection::daily_series(detections, self.settings.daily_days, now),
            monthly: projection::monthly_trend(detections, self.settings.monthly_months, now),
            confidence: projection::confidence_buckets(detections),
            speed: projection::speed_buckets(detections),
            top_locations: projection::top_locations(detections, self.settings.top_locations),
            top_users: projection::top_users(detections, users, self.settings.top_users),
            recent: projection::recent_detections(detections, self.settings.recent_detections)
                .into_iter()
                .cloned()
                .collect(),
        }
    }

    /// Render the filtered detections for download
    pub fn export(&self, format: ExportFormat) -> Result<String, DashboardError> {
        let rows = projection::to_export_rows(&self.filtered_detections(), self.snapshot.users());
        if rows.is_empty() {
            return Err(DashboardError::NothingToExport);
        }
        export::render(&rows, format)
    }

    pub fn write_export(&self, format: ExportFormat, path: &Path) -> Result<usize, DashboardError> {
        let rows = projection::to_export_rows(&self.filtered_detections(), self.snapshot.users());
        export::write_export(&rows, format, path)
    }
}
