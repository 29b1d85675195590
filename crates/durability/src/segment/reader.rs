//! Random and sequential reads over one segment.
//!
//! Any number of readers may coexist with the writer. A reader holds its
//! own `Arc` to the segment, so a segment replaced by compaction stays
//! readable until the reader is dropped.

use super::Segment;
use replog_core::{EntryRegistry, Indexed, Result};
use std::sync::Arc;

/// Cursor over the entries of one segment.
pub struct SegmentReader {
    segment: Arc<Segment>,
    registry: Arc<EntryRegistry>,
    next: u64,
}

impl SegmentReader {
    /// Create a reader positioned at the segment's first index.
    pub fn new(segment: Arc<Segment>, registry: Arc<EntryRegistry>) -> Self {
        let next = segment.starting_index();
        SegmentReader {
            segment,
            registry,
            next,
        }
    }

    /// The segment being read
    pub fn segment(&self) -> &Arc<Segment> {
        &self.segment
    }

    /// Index the iterator will look at next
    pub fn position(&self) -> u64 {
        self.next
    }

    /// Position the iterator at `index`. Missing indices are skipped when
    /// iterating.
    pub fn seek(&mut self, index: u64) {
        self.next = index.max(self.segment.starting_index());
    }

    /// Read the entry at `index`, `None` if not present.
    pub fn get(&self, index: u64) -> Result<Option<Indexed>> {
        self.segment.get(index, &self.registry)
    }
}

impl Iterator for SegmentReader {
    type Item = Result<Indexed>;

    fn next(&mut self) -> Option<Self::Item> {
        let loc = self.segment.locate_from(self.next)?;
        self.next = loc.index + 1;
        Some(self.segment.read_located(loc, &self.registry))
    }
}
