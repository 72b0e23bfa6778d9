//! # Archive Maintenance
//!
//! Keeps the local archive directory current for the scanner:
//! - day files dated before virtual "today" are deleted
//! - missing or undersized files for the coming days are fetched
//!
//! Fetching goes through [`ArchiveFetcher`]; the stock implementation runs
//! a configured shell command. Fetches write to a `.part` file that is
//! renamed into place only once it is large enough, so the scanner never
//! sees a half-written day.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, TimeDelta};
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use cransim_config::{ArchiveConfig, MaintenanceConfig};
use cransim_core::archive::{archive_file_name, parse_archive_file_name};
use cransim_core::clock::VirtualClock;

use crate::error::MaintenanceError;

/// Produces the archive file for one day at `dest`.
#[async_trait]
pub trait ArchiveFetcher: Send + Sync {
    async fn fetch(&self, date: NaiveDate, dest: &Path) -> Result<(), MaintenanceError>;
}

/// Runs a shell command template with `{year}`, `{date}` and `{dest}` substituted.
#[derive(Debug, Clone)]
pub struct CommandFetcher {
    template: String,
}

impl CommandFetcher {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    fn render(&self, date: NaiveDate, dest: &Path) -> String {
        self.template
            .replace("{year}", &date.year().to_string())
            .replace("{date}", &date.format("%Y-%m-%d").to_string())
            .replace("{dest}", &dest.to_string_lossy())
    }
}

#[async_trait]
impl ArchiveFetcher for CommandFetcher {
    async fn fetch(&self, date: NaiveDate, dest: &Path) -> Result<(), MaintenanceError> {
        let command = self.render(date, dest);
        debug!(%command, "Running fetch command");

        let status = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|err| MaintenanceError::Fetch {
                date,
                reason: err.to_string(),
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(MaintenanceError::Fetch {
                date,
                reason: format!("command exited with {status}"),
            })
        }
    }
}

/// What one maintenance pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub pruned: Vec<PathBuf>,
    pub fetched: Vec<NaiveDate>,
    /// Days still without a valid file after the pass.
    pub missing: Vec<NaiveDate>,
}

pub struct ArchiveMaintainer {
    dir: PathBuf,
    clock: VirtualClock,
    min_file_size: u64,
    days_ahead: u32,
    fetcher: Option<Arc<dyn ArchiveFetcher>>,
}

impl ArchiveMaintainer {
    pub fn new(dir: impl Into<PathBuf>, clock: VirtualClock) -> Self {
        let defaults = MaintenanceConfig::default();
        Self {
            dir: dir.into(),
            clock,
            min_file_size: ArchiveConfig::default().min_file_size,
            days_ahead: defaults.days_ahead,
            fetcher: None,
        }
    }

    pub fn from_config(
        archive: &ArchiveConfig,
        maintenance: &MaintenanceConfig,
        clock: VirtualClock,
    ) -> Self {
        let mut maintainer = Self::new(&archive.data_dir, clock)
            .with_min_file_size(archive.min_file_size)
            .with_days_ahead(maintenance.days_ahead);
        if let Some(template) = &maintenance.fetch_command {
            maintainer = maintainer.with_fetcher(CommandFetcher::new(template.clone()));
        }
        maintainer
    }

    pub fn with_min_file_size(mut self, min_file_size: u64) -> Self {
        self.min_file_size = min_file_size;
        self
    }

    pub fn with_days_ahead(mut self, days_ahead: u32) -> Self {
        self.days_ahead = days_ahead;
        self
    }

    pub fn with_fetcher(mut self, fetcher: impl ArchiveFetcher + 'static) -> Self {
        self.fetcher = Some(Arc::new(fetcher));
        self
    }

    /// One maintenance pass: prune, then make sure upcoming days exist.
    #[instrument(level = "debug", name = "archive_sync", skip(self), fields(dir = ?self.dir))]
    pub async fn sync(&self) -> Result<SyncReport, MaintenanceError> {
        let today = self.clock.today();
        let mut report = SyncReport {
            pruned: self.prune_before(today).await?,
            ..SyncReport::default()
        };

        for ahead in 0..self.days_ahead {
            let date = today + TimeDelta::days(i64::from(ahead));
            let dest = self.dir.join(archive_file_name(date));
            if self.is_valid(&dest).await {
                continue;
            }

            let Some(fetcher) = &self.fetcher else {
                warn!(%date, "Archive file missing and no fetch command configured");
                report.missing.push(date);
                continue;
            };

            info!(%date, "Fetching archive file");
            match self.fetch_into_place(fetcher.as_ref(), date, &dest).await {
                Ok(()) => report.fetched.push(date),
                Err(err) => {
                    warn!(error = %err, "Archive fetch failed");
                    report.missing.push(date);
                }
            }
        }

        Ok(report)
    }

    /// Re-syncs every `interval`. Failures are logged and retried next round.
    pub async fn run_periodic(self, interval: Duration) {
        loop {
            tokio::time::sleep(interval).await;
            if let Err(err) = self.sync().await {
                warn!(error = %err, "Archive maintenance failed");
            }
        }
    }

    async fn prune_before(&self, today: NaiveDate) -> Result<Vec<PathBuf>, MaintenanceError> {
        let list_err = |source| MaintenanceError::ListDir {
            path: self.dir.clone(),
            source,
        };
        let mut entries = fs::read_dir(&self.dir).await.map_err(list_err)?;
        let mut pruned = Vec::new();

        while let Some(entry) = entries.next_entry().await.map_err(list_err)? {
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            let name = entry.file_name();
            let Some(date) = name.to_str().and_then(parse_archive_file_name) else {
                continue;
            };
            if date >= today {
                continue;
            }

            let path = entry.path();
            info!(path = ?path, "Deleting stale archive");
            match fs::remove_file(&path).await {
                Ok(()) => pruned.push(path),
                Err(err) => warn!(path = ?path, error = %err, "Failed to delete stale archive"),
            }
        }

        Ok(pruned)
    }

    async fn fetch_into_place(
        &self,
        fetcher: &dyn ArchiveFetcher,
        date: NaiveDate,
        dest: &Path,
    ) -> Result<(), MaintenanceError> {
        let mut partial = dest.as_os_str().to_owned();
        partial.push(".part");
        let partial = PathBuf::from(partial);

        let result = self.install(fetcher, date, &partial, dest).await;
        if result.is_err() {
            let _ = fs::remove_file(&partial).await;
        }
        result
    }

    async fn install(
        &self,
        fetcher: &dyn ArchiveFetcher,
        date: NaiveDate,
        partial: &Path,
        dest: &Path,
    ) -> Result<(), MaintenanceError> {
        fetcher.fetch(date, partial).await?;
        if !self.is_valid(partial).await {
            return Err(MaintenanceError::Fetch {
                date,
                reason: "fetched file is empty or too small".into(),
            });
        }
        fs::rename(partial, dest)
            .await
            .map_err(|err| MaintenanceError::Fetch {
                date,
                reason: err.to_string(),
            })
    }

    async fn is_valid(&self, path: &Path) -> bool {
        match fs::metadata(path).await {
            Ok(meta) => meta.is_file() && meta.len() >= self.min_file_size,
            Err(_) => false,
        }
    }
}
