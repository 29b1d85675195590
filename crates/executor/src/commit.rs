//! Commit guard handed to state machines.
//!
//! A `Commit` names one committed command and its decoded operation.
//! Releasing it tells compaction the entry's effects are applied. Release
//! happens exactly once: explicitly through [`Commit::release`] or when the
//! guard drops, so handler failures and early returns cannot leak an entry.

use replog_core::CompactionMode;
use replog_durability::CompactionTracker;
use std::sync::Arc;

/// A committed command awaiting application.
pub struct Commit<O> {
    index: u64,
    term: u64,
    timestamp: u64,
    session: u64,
    sequence: u64,
    mode: CompactionMode,
    key: Option<Vec<u8>>,
    operation: O,
    tracker: Arc<CompactionTracker>,
    released: bool,
}

/// Log position and client metadata of a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitMeta {
    /// Log index
    pub index: u64,
    /// Term the entry was written in
    pub term: u64,
    /// Leader timestamp
    pub timestamp: u64,
    /// Client session
    pub session: u64,
    /// Request sequence within the session
    pub sequence: u64,
}

impl<O> Commit<O> {
    pub(crate) fn new(
        meta: CommitMeta,
        mode: CompactionMode,
        key: Option<Vec<u8>>,
        operation: O,
        tracker: Arc<CompactionTracker>,
    ) -> Self {
        Commit {
            index: meta.index,
            term: meta.term,
            timestamp: meta.timestamp,
            session: meta.session,
            sequence: meta.sequence,
            mode,
            key,
            operation,
            tracker,
            released: false,
        }
    }

    /// Log index
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Term the entry was written in
    pub fn term(&self) -> u64 {
        self.term
    }

    /// Leader timestamp
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Client session
    pub fn session(&self) -> u64 {
        self.session
    }

    /// Request sequence within the session
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Compaction mode the entry was written with
    pub fn compaction_mode(&self) -> CompactionMode {
        self.mode
    }

    /// Compaction key, if any
    pub fn key(&self) -> Option<&[u8]> {
        self.key.as_deref()
    }

    /// The decoded operation
    pub fn operation(&self) -> &O {
        &self.operation
    }

    /// Whether the commit has been released
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Release the entry for compaction.
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.tracker
                .release(self.index, self.mode, self.key.as_deref());
        }
    }
}

impl<O> Drop for Commit<O> {
    fn drop(&mut self) {
        self.release_once();
    }
}

impl<O: std::fmt::Debug> std::fmt::Debug for Commit<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Commit")
            .field("index", &self.index)
            .field("term", &self.term)
            .field("mode", &self.mode)
            .field("operation", &self.operation)
            .field("released", &self.released)
            .finish()
    }
}
