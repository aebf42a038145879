//! Errors for the pothole dashboard
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DashboardError {
    #[error("Malformed record {id}: {reason}")]
    MalformedRecord { id: String, reason: String },

    #[error("Serialization error")]
    SerdeError(#[from] serde_json::Error),

    #[error("Configuration error")]
    ConfigError(#[from] config::ConfigError),

    #[error("IO error")]
    IoError(#[from] std::io::Error),

    #[error("Invalid configuration: {message}")]
    ConfigurationError { message: String },

    #[error("Invalid export format: {0}")]
    InvalidExportFormat(String),

    #[error("No data to export")]
    NothingToExport,

    #[error("Could not access snapshot at {path}: {origin}")]
    SourceError { path: PathBuf, origin: String },

    #[error("No {kind} with id {id}")]
    RecordNotFound { kind: &'static str, id: String },

    #[error("User {uid} cannot change their own role")]
    RoleChangeNotAllowed { uid: String },
}

impl DashboardError {
    pub(crate) fn malformed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        DashboardError::MalformedRecord {
            id: id.into(),
            reason: reason.into(),
        }
    }
}
