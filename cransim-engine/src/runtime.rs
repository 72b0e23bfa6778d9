//! # Runtime
//!
//! Startup wiring for the replay server. Only two things may fail here:
//! preparing the archive directory and binding the listener. Everything
//! spawned afterwards logs its own errors and keeps running.

use std::path::Path;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use cransim_config::CransimConfig;
use cransim_core::archive::ArchiveScanner;
use cransim_core::clock::VirtualClock;
use cransim_core::hub::BroadcastHub;
use cransim_core::player::Player;
use cransim_telemetry::{EventLogger, MetricsRecorder};

use crate::connection::ConnectionManager;
use crate::error::EngineError;
use crate::maintenance::{ArchiveMaintainer, SyncReport};

/// Runs the replay server until Ctrl-C.
#[instrument(level = "info", name = "run_server", skip_all, fields(bind = %config.server.bind))]
pub async fn run_server(config: CransimConfig, metrics: MetricsRecorder) -> Result<(), EngineError> {
    let data_dir = Path::new(&config.archive.data_dir);
    prepare_data_dir(data_dir).await?;

    let clock = VirtualClock::from_days(config.archive.offset_days);
    info!(offset_days = config.archive.offset_days, today = %clock.today(), "Virtual clock ready");

    let maintainer = ArchiveMaintainer::from_config(&config.archive, &config.maintenance, clock.clone());
    log_sync(maintainer.sync().await);
    if config.maintenance.enabled {
        tokio::spawn(maintainer.run_periodic(config.maintenance.interval()));
    }

    let (hub, _hub_task) = BroadcastHub::spawn(config.hub.command_capacity, metrics.clone());

    let scanner = ArchiveScanner::new(data_dir, &clock).with_min_file_size(config.archive.min_file_size);
    let player = Player::new(scanner, clock, hub.clone(), metrics.clone())
        .with_backoff(config.archive.retry_backoff());
    tokio::spawn(player.run());

    let _stats = spawn_stats_reporter(metrics.clone(), config.telemetry.stats_interval_secs);

    let manager = ConnectionManager::bind(&config.server, hub, metrics).await?;
    tokio::select! {
        _ = manager.run() => {}
        signal = tokio::signal::ctrl_c() => {
            if let Err(err) = signal {
                warn!(error = %err, "Failed to listen for shutdown signal");
            }
            info!("Shutting down");
        }
    }
    Ok(())
}

/// A single maintenance pass, for the `sync` command.
pub async fn run_sync(config: &CransimConfig) -> Result<SyncReport, EngineError> {
    prepare_data_dir(Path::new(&config.archive.data_dir)).await?;
    let clock = VirtualClock::from_days(config.archive.offset_days);
    let report = ArchiveMaintainer::from_config(&config.archive, &config.maintenance, clock)
        .sync()
        .await?;
    Ok(report)
}

async fn prepare_data_dir(dir: &Path) -> Result<(), EngineError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| EngineError::DataDir {
            path: dir.to_path_buf(),
            source,
        })
}

fn log_sync(result: Result<SyncReport, crate::error::MaintenanceError>) {
    match result {
        Ok(report) => info!(
            pruned = report.pruned.len(),
            fetched = report.fetched.len(),
            missing = report.missing.len(),
            "Initial archive sync done"
        ),
        Err(err) => warn!(error = %err, "Initial archive sync failed"),
    }
}

/// Logs a metrics snapshot every `interval_secs`; 0 disables the reporter.
fn spawn_stats_reporter(metrics: MetricsRecorder, interval_secs: u64) -> Option<JoinHandle<()>> {
    if interval_secs == 0 {
        return None;
    }
    let period = Duration::from_secs(interval_secs);
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            ticker.tick().await;
            EventLogger::log_stats(&metrics.snapshot());
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn data_dir_is_created() {
        let root = TempDir::new().unwrap();
        let nested = root.path().join("a/b/data");
        prepare_data_dir(&nested).await.unwrap();
        assert!(nested.is_dir());
    }

    #[tokio::test]
    async fn data_dir_under_a_file_is_fatal() {
        let root = TempDir::new().unwrap();
        let file = root.path().join("plain");
        std::fs::write(&file, b"x").unwrap();
        let err = prepare_data_dir(&file.join("data")).await.unwrap_err();
        assert!(matches!(err, EngineError::DataDir { .. }));
    }

    #[tokio::test]
    async fn sync_command_reports_gaps_without_fetcher() {
        let root = TempDir::new().unwrap();
        let mut config = CransimConfig::default();
        config.archive.data_dir = root.path().join("data").to_string_lossy().into_owned();
        config.maintenance.days_ahead = 2;

        let report = run_sync(&config).await.unwrap();
        assert!(report.pruned.is_empty());
        assert!(report.fetched.is_empty());
        assert_eq!(report.missing.len(), 2);
    }

    #[tokio::test]
    async fn bind_failure_aborts_startup() {
        let root = TempDir::new().unwrap();
        let mut config = CransimConfig::default();
        config.archive.data_dir = root.path().to_string_lossy().into_owned();
        config.server.bind = "203.0.113.1:1".into();
        config.maintenance.enabled = false;
        config.telemetry.stats_interval_secs = 0;

        let metrics = MetricsRecorder::new().unwrap();
        let err = run_server(config, metrics).await.unwrap_err();
        assert!(matches!(err, EngineError::Bind { .. }));
    }
}
