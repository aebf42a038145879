//! Snapshot source and push subscription
//!
//! The data provider is an external collaborator. This module adapts it to a
//! one-shot `fetch`, the few writes an admin can make, and a push channel
//! whose lifetime is tied to an explicit [`Subscription`] handle.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::{
    errors::DashboardError,
    models::{RawSnapshot, Role},
};

/// Anything that can produce the provider's current state and apply admin
/// writes to it.
///
/// Writes are not reflected locally; they show up in the next fetched
/// snapshot.
pub trait SnapshotSource: Send + Sync + 'static {
    fn fetch(&self) -> Result<RawSnapshot, DashboardError>;

    /// Set the role of user `uid`, stamping `updatedAt`
    fn update_user_role(&self, uid: &str, role: Role) -> Result<(), DashboardError>;

    /// Remove detection `id`
    fn delete_detection(&self, id: &str) -> Result<(), DashboardError>;

    /// Stamp `lastActive` of user `uid` with the current time
    fn update_last_active(&self, uid: &str) -> Result<(), DashboardError>;
}

/// Provider export stored as a JSON document `{"potholes": [..], "users": [..]}`
///
/// Writes replace the whole file through a temporary sibling and a rename,
/// so a concurrent `fetch` sees either the old or the new document.
#[derive(Debug, Clone)]
pub struct FileSnapshotSource {
    path: PathBuf,
}

impl FileSnapshotSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn source_error(&self, origin: impl ToString) -> DashboardError {
        DashboardError::SourceError {
            path: self.path.clone(),
            origin: origin.to_string(),
        }
    }

    fn read_document(&self) -> Result<Value, DashboardError> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| self.source_error(e))?;
        serde_json::from_str(&content).map_err(|e| self.source_error(e))
    }

    fn write_document(&self, document: &Value) -> Result<(), DashboardError> {
        let content = serde_json::to_string_pretty(document)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, content).map_err(|e| self.source_error(e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.source_error(e))
    }

    /// Apply `edit` to the user document `uid` and write the file back
    fn update_user(
        &self,
        uid: &str,
        edit: impl FnOnce(&mut serde_json::Map<String, Value>),
    ) -> Result<(), DashboardError> {
        let mut document = self.read_document()?;
        let user = document
            .get_mut("users")
            .and_then(Value::as_array_mut)
            .and_then(|users| users.iter_mut().find(|u| document_id(u, "uid") == Some(uid)))
            .and_then(Value::as_object_mut)
            .ok_or_else(|| DashboardError::RecordNotFound {
                kind: "user",
                id: uid.to_string(),
            })?;
        edit(user);
        self.write_document(&document)
    }
}

/// Id of a provider document, falling back to its `id` field
fn document_id<'a>(document: &'a Value, key: &str) -> Option<&'a str> {
    document
        .get(key)
        .or_else(|| document.get("id"))
        .and_then(Value::as_str)
}

fn now_rfc3339() -> Value {
    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))
}

impl SnapshotSource for FileSnapshotSource {
    fn fetch(&self) -> Result<RawSnapshot, DashboardError> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| self.source_error(e))?;
        serde_json::from_str(&content).map_err(|e| self.source_error(e))
    }

    fn update_user_role(&self, uid: &str, role: Role) -> Result<(), DashboardError> {
        self.update_user(uid, |user| {
            user.insert("role".to_string(), Value::String(role.as_str().to_string()));
            user.insert("updatedAt".to_string(), now_rfc3339());
        })?;
        info!("User {} role updated to {}", uid, role);
        Ok(())
    }

    fn delete_detection(&self, id: &str) -> Result<(), DashboardError> {
        let mut document = self.read_document()?;
        let key = if document.get("potholes").is_some() {
            "potholes"
        } else {
            "detections"
        };
        let detections = document
            .get_mut(key)
            .and_then(Value::as_array_mut)
            .ok_or_else(|| DashboardError::RecordNotFound {
                kind: "detection",
                id: id.to_string(),
            })?;

        let before = detections.len();
        detections.retain(|d| d.get("id").and_then(Value::as_str) != Some(id));
        if detections.len() == before {
            return Err(DashboardError::RecordNotFound {
                kind: "detection",
                id: id.to_string(),
            });
        }

        self.write_document(&document)?;
        info!("Deleted detection {}", id);
        Ok(())
    }

    fn update_last_active(&self, uid: &str) -> Result<(), DashboardError> {
        self.update_user(uid, |user| {
            user.insert("lastActive".to_string(), now_rfc3339());
        })
    }
}

/// Handle of a running push subscription
///
/// The background poller stops on [`Subscription::close`] or when the handle
/// is dropped. The receiving end then yields `None`.
#[derive(Debug)]
pub struct Subscription {
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Stop pushing snapshots
    pub fn close(mut self) {
        self.stop();
        info!("Snapshot subscription closed");
    }

    pub fn is_closed(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Poll `source` every `interval` and push each changed snapshot.
///
/// The first snapshot is pushed right away. A failed fetch is logged and
/// pushed as an empty snapshot, so the receiver falls back to an empty
/// dataset instead of showing stale data.
pub fn subscribe<S: SnapshotSource>(
    source: S,
    interval: Duration,
) -> (Subscription, mpsc::Receiver<RawSnapshot>) {
    let (tx, rx) = mpsc::channel(16);
    let handle = tokio::spawn(poll_source(Arc::new(source), interval, tx));

    (
        Subscription {
            handle: Some(handle),
        },
        rx,
    )
}

async fn poll_source<S: SnapshotSource>(
    source: Arc<S>,
    interval: Duration,
    tx: mpsc::Sender<RawSnapshot>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last: Option<RawSnapshot> = None;

    loop {
        ticker.tick().await;

        let fetching = Arc::clone(&source);
        let snapshot = match tokio::task::spawn_blocking(move || fetching.fetch()).await {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(e)) => {
                error!("Snapshot fetch failed: {}", e);
                RawSnapshot::default()
            }
            Err(e) => {
                error!("Snapshot fetch task failed: {}", e);
                RawSnapshot::default()
            }
        };

        if last.as_ref() == Some(&snapshot) {
            continue;
        }

        debug!(
            "Pushing snapshot: {} detections, {} users",
            snapshot.potholes.len(),
            snapshot.users.len()
        );
        if tx.send(snapshot.clone()).await.is_err() {
            info!("Snapshot receiver dropped, stopping poller");
            break;
        }
        last = Some(snapshot);
    }
}
