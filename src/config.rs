//! Application configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use serde_with::serde_as;
use tracing::warn;

use crate::errors::DashboardError;
use crate::export::ExportFormat;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub export: ExportConfig,
}

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SourceConfig {
    /// JSON snapshot exported from the data provider
    pub path: PathBuf,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub poll_interval: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/snapshot.json"),
            poll_interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DashboardConfig {
    /// Rows per page of the detection table
    pub page_size: usize,
    /// Days covered by the daily chart
    pub daily_days: usize,
    /// Months covered by the trend chart
    pub monthly_months: usize,
    pub top_locations: usize,
    pub top_users: usize,
    pub recent_detections: usize,
    /// Signed-in admin, never offered a role change on themselves
    pub acting_user: Option<String>,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            page_size: 10,
            daily_days: 7,
            monthly_months: 6,
            top_locations: 5,
            top_users: 10,
            recent_detections: 5,
            acting_user: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ExportConfig {
    pub format: ExportFormat,
    /// Export is written on every refresh when set
    pub path: Option<PathBuf>,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(
                Environment::with_prefix("POTHOLE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), DashboardError> {
        self.source.validate()?;
        self.dashboard.validate()?;
        self.export.validate()?;
        Ok(())
    }
}

fn configuration_error(message: &str) -> DashboardError {
    DashboardError::ConfigurationError {
        message: message.to_string(),
    }
}

impl SourceConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), DashboardError> {
        if self.path.as_os_str().is_empty() {
            return Err(configuration_error("Snapshot path cannot be empty"));
        }
        if self.poll_interval.is_zero() {
            return Err(configuration_error("Poll interval must be greater than zero"));
        }
        Ok(())
    }
}

impl DashboardConfig {
    pub fn validate(&self) -> Result<(), DashboardError> {
        if self.page_size == 0 {
            return Err(configuration_error("Page size must be greater than zero"));
        }
        if self.daily_days == 0 || self.monthly_months == 0 {
            return Err(configuration_error("Chart ranges must be greater than zero"));
        }
        Ok(())
    }
}

impl ExportConfig {
    pub fn validate(&self) -> Result<(), DashboardError> {
        match self.path.as_deref().map(Path::parent) {
            Some(Some(dir)) if !dir.as_os_str().is_empty() => ensure_directory_exists(dir),
            _ => Ok(()),
        }
    }
}

fn ensure_directory_exists(dir: &Path) -> Result<(), DashboardError> {
    if !dir.exists() {
        warn!("Export directory does not exist, attempting to create it");
        std::fs::create_dir_all(dir).map_err(|e| DashboardError::ConfigurationError {
            message: format!("Could not create export directory: {}", e),
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use tempfile::tempdir;

    #[test]
    fn test_load_config() {
        env::set_var("POTHOLE__SOURCE__PATH", "/tmp/snapshot.json");
        env::set_var("POTHOLE__SOURCE__POLL_INTERVAL", "30");
        env::set_var("POTHOLE__DASHBOARD__PAGE_SIZE", "25");
        env::set_var("POTHOLE__DASHBOARD__ACTING_USER", "admin-uid");
        env::set_var("POTHOLE__EXPORT__FORMAT", "csv");

        let config = AppConfig::load().unwrap();
        assert_eq!(config.source.path, PathBuf::from("/tmp/snapshot.json"));
        assert_eq!(config.source.poll_interval, Duration::from_secs(30));
        assert_eq!(config.dashboard.page_size, 25);
        assert_eq!(config.dashboard.daily_days, 7);
        assert_eq!(config.dashboard.acting_user.as_deref(), Some("admin-uid"));
        assert_eq!(config.export.format, ExportFormat::Csv);
        assert_eq!(config.export.path, None);
    }

    #[test]
    fn test_default_config_validates() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_source_config_validate_invalid_path() {
        let config = SourceConfig {
            path: PathBuf::from(""),
            ..Default::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_source_config_validate_invalid_poll_interval() {
        let config = SourceConfig {
            poll_interval: Duration::from_secs(0),
            ..Default::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_dashboard_config_validate_page_size() {
        let config = DashboardConfig {
            page_size: 0,
            ..Default::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_export_config_creates_directory() {
        let dir = tempdir().unwrap();
        let export_dir = dir.path().join("exports");
        let config = ExportConfig {
            format: ExportFormat::Json,
            path: Some(export_dir.join("pothole_data.json")),
        };

        assert!(config.validate().is_ok());
        assert!(export_dir.is_dir());
    }
}
