//! Segmented log
//!
//! The log owns an ordered chain of segments keyed by starting index. The
//! last segment is the tail and is the only one accepting appends; every
//! earlier segment is sealed and covers a fixed index range.
//!
//! # Concurrency
//!
//! - Appends, truncation and rotation take `&mut self`; the log is
//!   single-writer by construction.
//! - The chain is guarded by one `RwLock`. Rotation and compaction swaps
//!   take it for writing; reads and `LogReader` take it for reading only
//!   long enough to resolve a segment.
//! - Entry bytes are immutable once published, so reads never block on
//!   the writer.

mod reader;
mod recovery;

pub use reader::LogReader;

use crate::compaction::{
    self, CompactInfo, CompactionError, CompactionKind, CompactionTracker, Compactor,
    PassControl, PoolStats,
};
use crate::config::StorageConfig;
use crate::format::SegmentDescriptor;
use crate::segment::{Segment, SegmentWriter};
use parking_lot::RwLock;
use replog_core::{CompactionMode, Entry, EntryRegistry, Error, Indexed, Result};
use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// State shared between the log, its readers and compaction.
pub(crate) struct LogShared {
    pub(crate) name: String,
    pub(crate) config: StorageConfig,
    pub(crate) registry: Arc<EntryRegistry>,
    pub(crate) chain: RwLock<BTreeMap<u64, Arc<Segment>>>,
    pub(crate) tracker: Arc<CompactionTracker>,
    commit_index: AtomicU64,
    major_index: AtomicU64,
    next_segment_id: AtomicU64,
    pub(crate) passes: PassControl,
}

impl LogShared {
    /// Quorum commit index (minor compaction watermark)
    pub(crate) fn commit_index(&self) -> u64 {
        self.commit_index.load(Ordering::Acquire)
    }

    /// Index applied on every member (major compaction watermark)
    pub(crate) fn major_index(&self) -> u64 {
        self.major_index.load(Ordering::Acquire)
    }

    /// Create a segment file for this log.
    pub(crate) fn create_segment(&self, descriptor: SegmentDescriptor) -> Result<Segment> {
        Segment::create(
            self.config.storage_level,
            &self.config.directory,
            &self.name,
            descriptor,
        )
    }

    fn create_tail(&self, starting_index: u64) -> Result<Arc<Segment>> {
        let id = self.next_segment_id.fetch_add(1, Ordering::AcqRel);
        create_tail(&self.config, &self.name, id, starting_index)
    }

    /// Segment whose range holds `index`, or failing that the first segment
    /// starting after it.
    pub(crate) fn segment_at_or_after(&self, index: u64) -> Option<Arc<Segment>> {
        let chain = self.chain.read();
        if let Some((_, segment)) = chain.range(..=index).next_back() {
            if segment.end_index().map_or(true, |end| index <= end) {
                return Some(Arc::clone(segment));
            }
        }
        chain
            .range((Excluded(index), Unbounded))
            .next()
            .map(|(_, segment)| Arc::clone(segment))
    }
}

/// Create an installable, open segment of version 1.
pub(crate) fn create_tail(
    config: &StorageConfig,
    name: &str,
    id: u64,
    starting_index: u64,
) -> Result<Arc<Segment>> {
    let mut descriptor = SegmentDescriptor::new(
        id,
        1,
        starting_index,
        config.max_segment_size,
        config.max_entries_per_segment,
    );
    descriptor.locked = true;
    let segment = Segment::create(config.storage_level, &config.directory, name, descriptor)?;
    Ok(Arc::new(segment))
}

/// A durable, segmented, replicated log.
pub struct Log {
    shared: Arc<LogShared>,
    writer: SegmentWriter,
    compactor: Option<Compactor>,
    closed: bool,
}

impl Log {
    /// Open (or create) the log `name` with the standard entry registry.
    pub fn open(name: &str, config: StorageConfig) -> Result<Self> {
        Self::open_with_registry(name, config, EntryRegistry::standard())
    }

    /// Open (or create) the log `name` decoding entries with `registry`.
    ///
    /// Existing segments are recovered: incomplete compaction output and
    /// stale versions are deleted, every segment is replayed, and a partial
    /// trailing record is discarded.
    pub fn open_with_registry(
        name: &str,
        config: StorageConfig,
        registry: EntryRegistry,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| Error::invalid(format!("invalid storage config: {}", e)))?;
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(Error::invalid(format!("invalid log name {:?}", name)));
        }

        let registry = Arc::new(registry);
        let recovered = recovery::recover(name, &config, &registry)?;
        let tracker = Arc::new(CompactionTracker::new());
        for (index, key) in &recovered.keyed {
            tracker.appended(*index, key);
        }
        let shared = Arc::new(LogShared {
            name: name.to_string(),
            config,
            registry,
            chain: RwLock::new(recovered.chain),
            tracker,
            commit_index: AtomicU64::new(0),
            major_index: AtomicU64::new(0),
            next_segment_id: AtomicU64::new(recovered.next_segment_id),
            passes: PassControl::default(),
        });
        let compactor = Compactor::start(Arc::clone(&shared))?;

        let log = Log {
            shared,
            writer: recovered.writer,
            compactor: Some(compactor),
            closed: false,
        };
        info!(
            target: "replog::log",
            name,
            segments = log.segment_count(),
            first_index = log.first_index(),
            last_index = log.last_index(),
            "Opened log"
        );
        Ok(log)
    }

    /// Log name
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Storage configuration
    pub fn config(&self) -> &StorageConfig {
        &self.shared.config
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Append `entry` at the next index.
    ///
    /// Fails with `EntrySizeExceeded` and leaves the log unchanged if the
    /// encoded entry is larger than `max_entry_size`.
    pub fn append(&mut self, term: u64, entry: impl Into<Entry>) -> Result<Indexed> {
        self.ensure_open()?;
        self.check_term(term)?;
        if self.writer.is_full() {
            self.rotate()?;
        }
        let indexed = self.writer.append(term, entry.into())?;
        self.note_appended(&indexed);
        if self.writer.is_full() {
            self.rotate()?;
        }
        Ok(indexed)
    }

    /// Append an entry whose index was assigned by a leader.
    ///
    /// An index at or below the last index first truncates the divergent
    /// suffix; an index past the next one records the gap as a skip.
    pub fn append_indexed(&mut self, indexed: Indexed) -> Result<Indexed> {
        self.ensure_open()?;
        if indexed.index == 0 {
            return Err(Error::invalid("entry index must be positive"));
        }
        if indexed.index <= self.last_index() {
            self.truncate(indexed.index - 1)?;
        }
        self.check_term(indexed.term)?;
        if self.writer.is_full() {
            self.rotate()?;
        }

        let next = self.next_index();
        let gap = indexed.index.saturating_sub(next);
        if gap > 0 {
            self.writer.skip(gap);
        }
        let appended = match self.writer.append(indexed.term, indexed.entry) {
            Ok(appended) => appended,
            Err(e) => {
                if gap > 0 {
                    self.writer.truncate(next - 1)?;
                }
                return Err(e);
            }
        };
        self.note_appended(&appended);
        if self.writer.is_full() {
            self.rotate()?;
        }
        Ok(appended)
    }

    fn note_appended(&self, indexed: &Indexed) {
        if let Some(key) = indexed.compaction_key() {
            self.shared.tracker.appended(indexed.index, key);
        }
    }

    fn check_term(&self, term: u64) -> Result<()> {
        let last_term = self.last_term();
        if term < last_term {
            return Err(Error::invalid(format!(
                "term {} is lower than last term {}",
                term, last_term
            )));
        }
        Ok(())
    }

    /// Seal the tail at its last index and open a fresh one after it.
    fn rotate(&mut self) -> Result<()> {
        self.writer.flush()?;
        let end_index = self.writer.last_index();
        let sealed = Arc::clone(self.writer.segment());
        sealed.update_descriptor(|d| d.end_index = end_index)?;
        sealed.bump_generation();

        let tail = self.shared.create_tail(end_index + 1)?;
        self.shared
            .chain
            .write()
            .insert(end_index + 1, Arc::clone(&tail));
        let (writer, _) = SegmentWriter::open(
            tail,
            Arc::clone(&self.shared.registry),
            self.shared.config.max_entry_size as usize,
        )?;
        self.writer = writer;

        info!(
            target: "replog::log",
            sealed_id = sealed.id(),
            end_index,
            tail_id = self.writer.segment().id(),
            "Rotated segment"
        );
        Ok(())
    }

    /// Remove every entry after `index`.
    pub fn truncate(&mut self, index: u64) -> Result<()> {
        self.ensure_open()?;
        if index >= self.last_index() {
            return Ok(());
        }

        if index.saturating_add(1) >= self.writer.first_index() {
            self.writer.truncate(index)?;
        } else {
            let target = {
                let mut chain = self.shared.chain.write();
                let target_key = chain
                    .range(..=index)
                    .next_back()
                    .or_else(|| chain.iter().next())
                    .map(|(key, _)| *key)
                    .ok_or_else(|| Error::invalid("log has no segments"))?;
                let later: Vec<u64> = chain
                    .range((Excluded(target_key), Unbounded))
                    .map(|(key, _)| *key)
                    .collect();
                // Later files go first, newest first, so a crash at any
                // point leaves a prefix of the chain that recovery accepts
                for key in later.into_iter().rev() {
                    if let Some(segment) = chain.remove(&key) {
                        if let Err(e) = segment.delete() {
                            chain.insert(key, segment);
                            return Err(e);
                        }
                    }
                }
                let target = chain
                    .get(&target_key)
                    .map(Arc::clone)
                    .ok_or_else(|| Error::invalid("log has no segments"))?;
                target.update_descriptor(|d| d.end_index = 0)?;
                target.bump_generation();
                target
            };

            let (mut writer, _) = SegmentWriter::open(
                target,
                Arc::clone(&self.shared.registry),
                self.shared.config.max_entry_size as usize,
            )?;
            writer.truncate(index)?;
            if index > writer.last_index() {
                writer.skip(index - writer.last_index());
            }
            self.writer = writer;
        }

        self.shared.tracker.truncate(index);
        self.shared.commit_index.fetch_min(index, Ordering::AcqRel);
        self.shared.major_index.fetch_min(index, Ordering::AcqRel);
        debug!(target: "replog::log", index, "Truncated log");
        Ok(())
    }

    /// Record a logical gap of `entries` indices after the last index.
    pub fn skip(&mut self, entries: u64) -> Result<()> {
        self.ensure_open()?;
        self.writer.skip(entries);
        Ok(())
    }

    /// Read the entry at `index`.
    ///
    /// Fails with `IndexOutOfRange` past the last index and with
    /// `EntryCompacted` for an index that was reclaimed or skipped.
    pub fn get(&self, index: u64) -> Result<Indexed> {
        self.ensure_open()?;
        let last_index = self.last_index();
        if index == 0 || index > last_index {
            return Err(Error::IndexOutOfRange { index, last_index });
        }
        let segment = self
            .shared
            .segment_at_or_after(index)
            .filter(|s| s.starting_index() <= index)
            .ok_or(Error::EntryCompacted { index })?;
        segment
            .get(index, &self.shared.registry)?
            .ok_or(Error::EntryCompacted { index })
    }

    /// Whether the entry at `index` is physically present.
    pub fn contains(&self, index: u64) -> bool {
        if index == 0 || index > self.last_index() {
            return false;
        }
        self.shared
            .segment_at_or_after(index)
            .map_or(false, |s| s.locate(index).is_some())
    }

    /// Lowest index the log may hold
    pub fn first_index(&self) -> u64 {
        self.shared
            .chain
            .read()
            .keys()
            .next()
            .copied()
            .unwrap_or_else(|| self.writer.first_index())
    }

    /// Last index, including any pending skip
    pub fn last_index(&self) -> u64 {
        self.writer.last_index()
    }

    /// Index the next `append` will assign
    pub fn next_index(&self) -> u64 {
        self.writer.next_index()
    }

    /// Term of the last retained entry, 0 if the log holds none.
    pub fn last_term(&self) -> u64 {
        if self.writer.entry_count() > 0 {
            return self.writer.last_term();
        }
        self.shared
            .chain
            .read()
            .values()
            .rev()
            .find_map(|s| s.last_entry())
            .map_or(0, |e| e.term)
    }

    /// Whether no index has been assigned yet.
    pub fn is_empty(&self) -> bool {
        self.last_index() < self.first_index()
    }

    /// Bytes held by all segments, descriptors included
    pub fn size(&self) -> u64 {
        self.shared
            .chain
            .read()
            .values()
            .map(|s| s.committed_len())
            .sum()
    }

    /// Number of installed segments, tail included
    pub fn segment_count(&self) -> usize {
        self.shared.chain.read().len()
    }

    /// Descriptors of the installed segments in index order.
    pub fn segment_descriptors(&self) -> Vec<SegmentDescriptor> {
        self.shared
            .chain
            .read()
            .values()
            .map(|s| s.descriptor())
            .collect()
    }

    /// Sequential reader starting at `from_index`.
    pub fn reader(&self, from_index: u64) -> LogReader {
        LogReader::new(Arc::clone(&self.shared), from_index)
    }

    /// Force written entries to durable storage.
    pub fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.writer.flush()
    }

    /// Record the quorum commit index. Never moves backwards.
    pub fn commit(&self, index: u64) {
        self.shared.commit_index.fetch_max(index, Ordering::AcqRel);
    }

    /// Quorum commit index
    pub fn commit_index(&self) -> u64 {
        self.shared.commit_index()
    }

    /// Record the index applied on every member. Never moves backwards.
    pub fn set_major_index(&self, index: u64) {
        self.shared.major_index.fetch_max(index, Ordering::AcqRel);
    }

    /// Index applied on every member
    pub fn major_index(&self) -> u64 {
        self.shared.major_index()
    }

    /// Mark entry `index` as released by the state machine.
    pub fn release(&self, index: u64, mode: CompactionMode, key: Option<&[u8]>) {
        self.shared.tracker.release(index, mode, key);
    }

    /// Release tracker shared with commit guards
    pub fn tracker(&self) -> &Arc<CompactionTracker> {
        &self.shared.tracker
    }

    /// Run a compaction pass on the calling thread.
    pub fn compact(&self, kind: CompactionKind) -> std::result::Result<CompactInfo, CompactionError> {
        self.ensure_open()?;
        compaction::run_pass(&self.shared, kind)
    }

    /// Handle that can run compaction passes from another thread.
    pub fn compaction_handle(&self) -> CompactionHandle {
        CompactionHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Background worker pool metrics, `None` once closed.
    pub fn pool_stats(&self) -> Option<PoolStats> {
        self.compactor.as_ref().map(Compactor::pool_stats)
    }

    /// Stop compaction and flush the tail. Later operations fail with
    /// `Closed`.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.shared.passes.cancel();
        if let Some(compactor) = self.compactor.take() {
            compactor.shutdown();
        }
        self.writer.flush()?;
        info!(target: "replog::log", name = %self.shared.name, "Closed log");
        Ok(())
    }

    /// Close the log and delete every segment file.
    ///
    /// Files still referenced by a live reader are removed when it drops.
    pub fn delete(mut self) -> Result<()> {
        self.close()?;
        let segments: Vec<Arc<Segment>> = {
            let mut chain = self.shared.chain.write();
            std::mem::take(&mut *chain).into_values().collect()
        };
        for segment in &segments {
            segment.retire();
        }
        info!(
            target: "replog::log",
            name = %self.shared.name,
            segments = segments.len(),
            "Deleted log"
        );
        Ok(())
    }
}

impl Drop for Log {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(target: "replog::log", error = %e, "Failed to close log on drop");
        }
    }
}

impl std::fmt::Debug for Log {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Log")
            .field("name", &self.shared.name)
            .field("segments", &self.segment_count())
            .field("last_index", &self.last_index())
            .field("closed", &self.closed)
            .finish()
    }
}

/// Runs compaction passes against a log from any thread.
#[derive(Clone)]
pub struct CompactionHandle {
    shared: Arc<LogShared>,
}

impl CompactionHandle {
    /// Run a compaction pass on the calling thread.
    pub fn compact(&self, kind: CompactionKind) -> std::result::Result<CompactInfo, CompactionError> {
        if self.shared.passes.is_cancelled() {
            return Err(CompactionError::Cancelled);
        }
        compaction::run_pass(&self.shared, kind)
    }
}

impl std::fmt::Debug for CompactionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompactionHandle")
            .field("log", &self.shared.name)
            .finish()
    }
}
