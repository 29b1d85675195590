//! Log compaction
//!
//! Compaction physically removes entries the state machine has released
//! and whose compaction mode allows reclamation.
//!
//! # Passes
//!
//! - **Minor**: frequent. Rewrites each sealed segment holding reclaimable
//!   entries as a new version with the same boundaries.
//! - **Major**: infrequent. Segments whose reclaimable fraction reached the
//!   configured threshold are merged with adjacent candidates into fewer,
//!   denser segments.
//!
//! # Key Invariants
//!
//! - The tail segment is never rewritten
//! - Rewrites are copy-then-swap: the installed segment is never modified,
//!   and a failed or cancelled rewrite leaves nothing installed
//! - An entry above the pass watermark (commit index for minor, the index
//!   applied on every member for major) is never reclaimed

mod compactor;
mod major;
mod minor;
mod rewrite;
mod scheduler;
pub mod tracker;

pub(crate) use compactor::Compactor;
pub use scheduler::{PoolStats, SubmitError, TaskPriority, WorkerPool};
pub use tracker::{CompactionTracker, TrackerStats};

pub(crate) use rewrite::{rewrite, RewriteUnit};

use crate::log::LogShared;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Compaction pass kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompactionKind {
    /// Frequent in-place reclamation
    Minor,
    /// Infrequent segment-merging rewrite
    Major,
}

impl CompactionKind {
    /// Get the name of this pass kind for logging
    pub fn name(&self) -> &'static str {
        match self {
            CompactionKind::Minor => "minor",
            CompactionKind::Major => "major",
        }
    }

    /// Worker pool priority for this kind
    pub fn priority(&self) -> TaskPriority {
        match self {
            CompactionKind::Minor => TaskPriority::Minor,
            CompactionKind::Major => TaskPriority::Major,
        }
    }
}

impl std::fmt::Display for CompactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Result of a compaction pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactInfo {
    /// Pass kind
    pub kind: CompactionKind,
    /// Rewritten outputs installed
    pub segments_written: usize,
    /// Source segments replaced
    pub segments_replaced: usize,
    /// Entries physically removed
    pub entries_reclaimed: usize,
    /// Record bytes removed
    pub reclaimed_bytes: u64,
    /// Rewrites abandoned because a source changed underneath them
    pub units_skipped: usize,
    /// Duration of the pass in milliseconds
    pub duration_ms: u64,
}

impl CompactInfo {
    /// Create an empty result for a pass kind
    pub fn new(kind: CompactionKind) -> Self {
        CompactInfo {
            kind,
            segments_written: 0,
            segments_replaced: 0,
            entries_reclaimed: 0,
            reclaimed_bytes: 0,
            units_skipped: 0,
            duration_ms: 0,
        }
    }

    /// Check if any compaction actually occurred
    pub fn did_compact(&self) -> bool {
        self.segments_written > 0
    }

    /// Get a summary string for logging
    pub fn summary(&self) -> String {
        format!(
            "kind={}, written={}, replaced={}, entries_reclaimed={}, bytes_reclaimed={}, skipped={}, duration_ms={}",
            self.kind,
            self.segments_written,
            self.segments_replaced,
            self.entries_reclaimed,
            self.reclaimed_bytes,
            self.units_skipped,
            self.duration_ms
        )
    }
}

/// Compaction error types
#[derive(Debug, thiserror::Error)]
pub enum CompactionError {
    /// Another pass is still running
    #[error("Compaction already in progress")]
    AlreadyInProgress,

    /// The log is closing
    #[error("Compaction cancelled")]
    Cancelled,

    /// A source segment was truncated, replaced or removed mid-rewrite
    #[error("Segment {segment_id} changed during compaction")]
    Superseded {
        /// Id of the changed source
        segment_id: u64,
    },

    /// IO error during compaction
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Log error while reading sources or writing the output
    #[error("Log error: {0}")]
    Log(#[from] replog_core::Error),
}

/// Single-pass gate shared by the synchronous and background paths.
#[derive(Debug, Default)]
pub(crate) struct PassControl {
    active: AtomicBool,
    outstanding: AtomicUsize,
    cancelled: AtomicBool,
}

impl PassControl {
    /// Claim the pass slot; false if a pass is running.
    pub(crate) fn try_begin(&self) -> bool {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn end(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn set_outstanding(&self, units: usize) {
        self.outstanding.store(units, Ordering::Release);
    }

    /// Mark one background unit done; the last one ends the pass.
    pub(crate) fn finish_unit(&self) {
        if self.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.end();
        }
    }

    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Ends a synchronous pass on every exit path.
struct PassGuard<'a>(&'a PassControl);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.end();
    }
}

/// Plan the rewrite units of a pass.
pub(crate) fn plan(shared: &LogShared, kind: CompactionKind) -> Vec<RewriteUnit> {
    match kind {
        CompactionKind::Minor => minor::plan(shared),
        CompactionKind::Major => major::plan(shared),
    }
}

/// Run a whole pass on the calling thread.
pub(crate) fn run_pass(
    shared: &LogShared,
    kind: CompactionKind,
) -> Result<CompactInfo, CompactionError> {
    if !shared.passes.try_begin() {
        return Err(CompactionError::AlreadyInProgress);
    }
    let _guard = PassGuard(&shared.passes);
    let started = Instant::now();
    let mut info = CompactInfo::new(kind);

    for unit in plan(shared, kind) {
        if shared.passes.is_cancelled() {
            return Err(CompactionError::Cancelled);
        }
        match rewrite(shared, unit) {
            Ok(outcome) => {
                info.segments_written += 1;
                info.segments_replaced += outcome.sources;
                info.entries_reclaimed += outcome.entries_reclaimed;
                info.reclaimed_bytes += outcome.reclaimed_bytes;
            }
            Err(CompactionError::Superseded { segment_id }) => {
                debug!(target: "replog::compaction", segment_id, "Skipped rewrite of changed segment");
                info.units_skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }

    info.duration_ms = started.elapsed().as_millis() as u64;
    if info.did_compact() {
        info!(target: "replog::compaction", "Compaction pass complete: {}", info.summary());
    }
    Ok(info)
}

/// Run one background unit, logging instead of propagating failures; the
/// next cadence retries whatever failed.
pub(crate) fn run_unit(shared: &LogShared, unit: RewriteUnit) {
    let kind = unit.kind;
    match rewrite(shared, unit) {
        Ok(outcome) => debug!(
            target: "replog::compaction",
            kind = %kind,
            entries_reclaimed = outcome.entries_reclaimed,
            reclaimed_bytes = outcome.reclaimed_bytes,
            "Background rewrite installed"
        ),
        Err(CompactionError::Cancelled) => {
            debug!(target: "replog::compaction", kind = %kind, "Background rewrite cancelled")
        }
        Err(CompactionError::Superseded { segment_id }) => debug!(
            target: "replog::compaction",
            kind = %kind,
            segment_id,
            "Background rewrite skipped; source changed"
        ),
        Err(e) => warn!(
            target: "replog::compaction",
            kind = %kind,
            error = %e,
            "Background rewrite failed; will retry next cadence"
        ),
    }
}
