use std::path::PathBuf;

use chrono::NaiveDate;
use thiserror::Error;

/// Fatal startup failures. Nothing after startup is allowed to end the process.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("cannot prepare archive directory {path:?}: {source}")]
    DataDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot bind listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Maintenance(#[from] MaintenanceError),
}

#[derive(Debug, Error)]
pub enum MaintenanceError {
    #[error("cannot list archive directory {path:?}: {source}")]
    ListDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("fetch of {date} failed: {reason}")]
    Fetch { date: NaiveDate, reason: String },
}
