//! Archive location, virtual time offset and local archive upkeep.
//!
//! Two sections live here:
//! - `archive`: where day files are read from and how the replay clock is shifted
//! - `maintenance`: how stale files are pruned and upcoming days fetched

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

use crate::validation;

/// Day-partitioned archive parameters.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct ArchiveConfig {
    /// Directory holding `YYYY-MM-DD.csv.gz` files.
    #[serde(default = "default_data_dir")]
    #[validate(custom(function = validation::validate_dir))]
    pub data_dir: String,

    /// How far in the past the replay runs (days).
    #[serde(default = "default_offset_days")]
    #[validate(range(min = 1, max = 3650))]
    pub offset_days: u32,

    /// Files smaller than this are failed downloads, not data (bytes).
    #[serde(default = "default_min_file_size")]
    #[validate(range(min = 1))]
    pub min_file_size: u64,

    /// Delay before retrying after a scanner failure (milliseconds).
    #[serde(default = "default_retry_backoff_ms")]
    #[validate(range(min = 1, max = 600_000))]
    pub retry_backoff_ms: u64,
}

fn default_data_dir() -> String {
    "data".into()
}

fn default_offset_days() -> u32 {
    28
}

fn default_min_file_size() -> u64 {
    30
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            offset_days: default_offset_days(),
            min_file_size: default_min_file_size(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

/// Local archive upkeep.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct MaintenanceConfig {
    /// Run the periodic maintenance task.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between maintenance passes.
    #[serde(default = "default_interval_secs")]
    #[validate(range(min = 1, max = 86_400))]
    pub interval_secs: u64,

    /// Number of days, starting at virtual today, kept available locally.
    #[serde(default = "default_days_ahead")]
    #[validate(range(min = 1, max = 31))]
    pub days_ahead: u32,

    /// Shell command fetching one day file. `{year}`, `{date}` and `{dest}`
    /// are substituted before it runs under `sh -c`.
    #[serde(default)]
    #[validate(custom(function = validation::validate_fetch_command))]
    pub fetch_command: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    30
}

fn default_days_ahead() -> u32 {
    2
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            interval_secs: default_interval_secs(),
            days_ahead: default_days_ahead(),
            fetch_command: None,
        }
    }
}
