//! Materialized log records

use crate::entry::{CompactionMode, Entry};

/// An entry together with its position in the log.
///
/// Produced by the segment writer and readers on demand. `size` is the
/// full on-disk record length, header included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Indexed {
    /// Log index
    pub index: u64,
    /// Term in which the entry was created
    pub term: u64,
    /// The decoded entry
    pub entry: Entry,
    /// Encoded record length in bytes
    pub size: u32,
}

impl Indexed {
    /// Create an indexed entry
    pub fn new(index: u64, term: u64, entry: impl Into<Entry>, size: u32) -> Self {
        Indexed {
            index,
            term,
            entry: entry.into(),
            size,
        }
    }

    /// Reclamation policy of the wrapped entry
    pub fn compaction_mode(&self) -> CompactionMode {
        self.entry.compaction_mode()
    }

    /// Compaction key of the wrapped entry
    pub fn compaction_key(&self) -> Option<&[u8]> {
        self.entry.compaction_key()
    }
}
