use std::path::PathBuf;

use thiserror::Error;

/// Failures reading the local archive.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The day file is absent or too small to be a finished download.
    #[error("archive {path:?} is missing or empty (size: {size:?})")]
    MissingOrEmpty { path: PathBuf, size: Option<u64> },

    /// Decompression or read failure part-way through a day file.
    #[error("archive {path:?} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error on archive {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A record line whose leading timestamp field cannot be interpreted.
#[derive(Debug, Error)]
pub enum TimestampError {
    #[error("record shorter than its timestamp field")]
    Truncated,

    #[error("record does not start with a timestamp field")]
    Malformed,

    #[error("invalid record timestamp: {0}")]
    Invalid(#[from] chrono::ParseError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    #[error("broadcast hub is no longer running")]
    Closed,
}
