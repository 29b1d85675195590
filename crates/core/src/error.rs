//! Error types for the replicated log
//!
//! This module defines the error taxonomy shared by every layer that reads
//! or writes log entries. We use `thiserror` for automatic `Display` and
//! `Error` trait implementations.

use std::io;
use thiserror::Error;

/// Result type alias for log operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the replicated log
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (segment files, directory scans)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialized entry is larger than the configured maximum entry size.
    ///
    /// Rejected before anything touches the segment.
    #[error("Entry size {size} exceeds maximum entry size {max}")]
    EntrySizeExceeded {
        /// Encoded entry length (type id plus payload)
        size: usize,
        /// Configured maximum
        max: usize,
    },

    /// A record failed validation during replay or a read.
    #[error("Entry corrupted at offset {offset}: {detail}")]
    EntryCorrupted {
        /// Byte offset of the record within its segment file
        offset: u64,
        /// Human-readable description
        detail: String,
    },

    /// Requested index lies beyond the end of the log
    #[error("Index {index} out of range (last index {last_index})")]
    IndexOutOfRange {
        /// Requested index
        index: u64,
        /// Last index currently in the log
        last_index: u64,
    },

    /// Requested index was reclaimed by compaction (or never written)
    #[error("Entry {index} has been compacted")]
    EntryCompacted {
        /// Requested index
        index: u64,
    },

    /// Decode of a type id with no registered codec
    #[error("Unregistered entry type id {0}")]
    UnregisteredEntryType(u8),

    /// Invalid operation or state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// The log has been closed
    #[error("Log is closed")]
    Closed,
}

impl Error {
    /// Create a corruption error at the given offset
    pub fn corrupted(offset: u64, detail: impl Into<String>) -> Self {
        Error::EntryCorrupted {
            offset,
            detail: detail.into(),
        }
    }

    /// Create an invalid operation error
    pub fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidOperation(msg.into())
    }

    /// Whether a caller can recover locally (retry, fall back to a
    /// snapshot transfer, reject the request) rather than halting replay.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::EntrySizeExceeded { .. }
                | Error::IndexOutOfRange { .. }
                | Error::EntryCompacted { .. }
                | Error::InvalidOperation(_)
        )
    }
}
