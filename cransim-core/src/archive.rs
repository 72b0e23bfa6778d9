//! # Archive Scanner
//!
//! Streams record lines out of day-partitioned, gzip-compressed archive
//! files named `YYYY-MM-DD.csv.gz`, rolling over to the following day when a
//! file is exhausted.
//!
//! ## Guarantees
//! - At most one day file is open at a time
//! - The day cursor only moves forward, one day per opened file
//! - A missing or undersized file never advances the cursor, so the same day
//!   is retried until it becomes valid

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, TimeDelta};
use flate2::read::MultiGzDecoder;
use tracing::{debug, info};

use crate::clock::VirtualClock;
use crate::error::ArchiveError;

/// Files under this size are failed downloads, not valid empty days.
pub const DEFAULT_MIN_FILE_SIZE: u64 = 30;

const FILE_SUFFIX: &str = ".csv.gz";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// File name holding the records of `date`.
pub fn archive_file_name(date: NaiveDate) -> String {
    format!("{}{}", date.format(DATE_FORMAT), FILE_SUFFIX)
}

/// Day encoded in an archive file name, if it is one.
pub fn parse_archive_file_name(name: &str) -> Option<NaiveDate> {
    let stem = name.strip_suffix(FILE_SUFFIX)?;
    NaiveDate::parse_from_str(stem, DATE_FORMAT).ok()
}

/// Anything that yields record lines in order.
pub trait LineSource: Send {
    fn next_line(&mut self) -> Result<String, ArchiveError>;
}

struct OpenArchive {
    path: PathBuf,
    reader: BufReader<MultiGzDecoder<File>>,
}

/// Forward-only reader over the archive directory.
pub struct ArchiveScanner {
    dir: PathBuf,
    next_date: NaiveDate,
    min_file_size: u64,
    current: Option<OpenArchive>,
    buf: Vec<u8>,
}

impl ArchiveScanner {
    /// Starts at the archive day virtual "now" falls on.
    pub fn new(dir: impl Into<PathBuf>, clock: &VirtualClock) -> Self {
        Self::starting_at(dir, clock.today())
    }

    pub fn starting_at(dir: impl Into<PathBuf>, date: NaiveDate) -> Self {
        Self {
            dir: dir.into(),
            next_date: date,
            min_file_size: DEFAULT_MIN_FILE_SIZE,
            current: None,
            buf: Vec::with_capacity(512),
        }
    }

    pub fn with_min_file_size(mut self, min_file_size: u64) -> Self {
        self.min_file_size = min_file_size;
        self
    }

    /// Day the next file will be opened for.
    pub fn next_date(&self) -> NaiveDate {
        self.next_date
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the next record line, opening the following day's file
    /// whenever the current one ends cleanly.
    pub fn next_line(&mut self) -> Result<String, ArchiveError> {
        loop {
            let mut archive = match self.current.take() {
                Some(archive) => archive,
                None => self.open_next()?,
            };

            self.buf.clear();
            match archive.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => debug!(path = ?archive.path, "Archive exhausted"),
                Ok(_) => {
                    self.current = Some(archive);
                    return Ok(decode_line(&self.buf));
                }
                Err(source) => {
                    return Err(ArchiveError::Corrupt {
                        path: archive.path,
                        source,
                    })
                }
            }
        }
    }

    fn open_next(&mut self) -> Result<OpenArchive, ArchiveError> {
        let path = self.dir.join(archive_file_name(self.next_date));

        let size = match fs::metadata(&path) {
            Ok(meta) => meta.len(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ArchiveError::MissingOrEmpty { path, size: None });
            }
            Err(source) => return Err(ArchiveError::Io { path, source }),
        };
        if size < self.min_file_size {
            return Err(ArchiveError::MissingOrEmpty {
                path,
                size: Some(size),
            });
        }

        let file = File::open(&path).map_err(|source| ArchiveError::Io {
            path: path.clone(),
            source,
        })?;

        info!(path = ?path, "Scanning archive");
        self.next_date += TimeDelta::days(1);

        Ok(OpenArchive {
            reader: BufReader::new(MultiGzDecoder::new(file)),
            path,
        })
    }
}

impl LineSource for ArchiveScanner {
    fn next_line(&mut self) -> Result<String, ArchiveError> {
        ArchiveScanner::next_line(self)
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}
