//! Incremental reads of the server log.
//!
//! The byte offset is owned by the caller (see [`crate::monitor::MonitorState`]);
//! the watcher only opens the file, reads from that offset to end of file, and
//! closes it again. Invalid UTF-8 is replaced rather than rejected.

use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::warn;

/// Errors produced while reading the log.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    /// The log file could not be opened.
    #[error("failed to open log file {path}: {source}")]
    Open {
        /// Log path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// File metadata could not be read.
    #[error("failed to read metadata for {path}: {source}")]
    Metadata {
        /// Log path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Seeking to the cursor failed.
    #[error("failed to seek to offset {offset} in {path}: {source}")]
    Seek {
        /// Log path.
        path: PathBuf,
        /// Requested offset.
        offset: u64,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Reading the appended bytes failed.
    #[error("failed to read log file {path}: {source}")]
    Read {
        /// Log path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Text appended to the log since a given offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogWindow {
    /// Decoded text; invalid byte sequences become U+FFFD.
    pub text: String,
    /// Offset the read started at.
    pub start: u64,
    /// Offset just past the last byte read. The next cursor value.
    pub end: u64,
    /// Whether the file had shrunk below the requested offset.
    pub truncated: bool,
}

impl LogWindow {
    /// Whether nothing new was read.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Number of raw bytes consumed.
    pub fn len_bytes(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }
}

/// Source of cycle windows. [`Watcher`] is the file-backed implementation.
pub trait LogSource: Send + Sync {
    /// Read everything appended since `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`ReadError`] when the underlying log cannot be read.
    fn read_from(&self, offset: u64) -> Result<LogWindow, ReadError>;
}

/// Reads newly appended bytes from one log file.
#[derive(Debug, Clone)]
pub struct Watcher {
    log_path: PathBuf,
}

impl Watcher {
    /// Create a watcher for the given log file.
    pub fn new(log_path: PathBuf) -> Self {
        Self { log_path }
    }

    /// Path of the watched log.
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Read everything appended since `offset`.
    ///
    /// If the file is now shorter than `offset` it was truncated or rotated;
    /// the read restarts from the beginning and the window is flagged.
    ///
    /// # Errors
    ///
    /// Returns [`ReadError`] if the file cannot be opened, inspected, or read.
    /// The handle is dropped before returning in every case.
    pub fn read_from(&self, offset: u64) -> Result<LogWindow, ReadError> {
        let mut file = fs::File::open(&self.log_path).map_err(|source| ReadError::Open {
            path: self.log_path.clone(),
            source,
        })?;

        let file_len = file
            .metadata()
            .map_err(|source| ReadError::Metadata {
                path: self.log_path.clone(),
                source,
            })?
            .len();

        let (start, truncated) = if file_len < offset {
            warn!(
                path = %self.log_path.display(),
                offset,
                file_len,
                "log shrank below cursor, rereading from start"
            );
            (0, true)
        } else {
            (offset, false)
        };

        if file_len == start {
            return Ok(LogWindow {
                text: String::new(),
                start,
                end: start,
                truncated,
            });
        }

        file.seek(SeekFrom::Start(start))
            .map_err(|source| ReadError::Seek {
                path: self.log_path.clone(),
                offset: start,
                source,
            })?;

        let mut bytes = Vec::new();
        let read = file
            .read_to_end(&mut bytes)
            .map_err(|source| ReadError::Read {
                path: self.log_path.clone(),
                source,
            })?;

        let read = u64::try_from(read).unwrap_or(u64::MAX);
        Ok(LogWindow {
            text: String::from_utf8_lossy(&bytes).into_owned(),
            start,
            end: start.saturating_add(read),
            truncated,
        })
    }
}

impl LogSource for Watcher {
    fn read_from(&self, offset: u64) -> Result<LogWindow, ReadError> {
        Watcher::read_from(self, offset)
    }
}
