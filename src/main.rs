//! Pothole dashboard

use chrono::{Local, Utc};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use pothole_dashboard::{
    config::AppConfig,
    controller::Dashboard,
    errors::DashboardError,
    models::{RawSnapshot, Snapshot},
    source::{subscribe, FileSnapshotSource, SnapshotSource},
};

#[tokio::main]
async fn main() -> Result<(), DashboardError> {
    #[cfg(feature = "dotenvy")]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = AppConfig::load()?;
    config.validate()?;

    info!(
        "Watching {} every {:?}",
        config.source.path.display(),
        config.source.poll_interval
    );
    let source = FileSnapshotSource::new(&config.source.path);
    if let Some(uid) = &config.dashboard.acting_user {
        if let Err(e) = source.update_last_active(uid) {
            warn!("Could not update last active time of {}: {}", uid, e);
        }
    }

    let (subscription, snapshots) = subscribe(source, config.source.poll_interval);
    let mut dashboard = Dashboard::new(config.dashboard.clone());

    tokio::select! {
        _ = run_dashboard(&mut dashboard, snapshots, &config) => {
            info!("Snapshot stream ended");
        }
        _ = signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    subscription.close();

    Ok(())
}

async fn run_dashboard(
    dashboard: &mut Dashboard,
    mut snapshots: mpsc::Receiver<RawSnapshot>,
    config: &AppConfig,
) {
    while let Some(raw) = snapshots.recv().await {
        dashboard.apply_snapshot(Snapshot::normalize(raw, Utc::now()));

        let summary = dashboard.summary(&Local::now());
        let stats = &summary.statistics;
        info!(
            "Detections: {} ({} today, avg confidence {}%), users: {} ({} admins, {} regular)",
            stats.total_detections,
            stats.today_detections,
            stats.avg_confidence,
            stats.total_users,
            stats.total_admins,
            stats.total_regular_users
        );
        debug!(
            "Confidence: {:?}, speed: {:?}",
            summary.confidence.labeled(),
            summary.speed.labeled()
        );
        match serde_json::to_string(&summary) {
            Ok(json) => debug!("Summary: {}", json),
            Err(e) => error!("Could not serialize summary: {}", e),
        }

        if let Some(path) = &config.export.path {
            match dashboard.write_export(config.export.format, path) {
                Ok(_) => {}
                Err(DashboardError::NothingToExport) => debug!("No data to export"),
                Err(e) => error!("Export failed: {}", e),
            }
        }
    }
}
