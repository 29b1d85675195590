//! Sequential writer over one segment.
//!
//! The writer owns the only mutable cursor into its segment. Each append
//! serializes the entry into a reusable scratch buffer first, so the
//! record length is known before anything reaches the segment, then writes
//! the whole record in one call and only afterwards publishes it to
//! readers.

use super::replay::{replay, SegmentRecovery};
use super::{OffsetEntry, Segment};
use crate::format::{RecordHeader, DESCRIPTOR_SIZE};
use replog_core::{Entry, EntryRegistry, Error, Indexed, Result};
use std::sync::Arc;
use tracing::{debug, trace};

/// Appends, skips and truncates entries in one segment.
pub struct SegmentWriter {
    segment: Arc<Segment>,
    registry: Arc<EntryRegistry>,
    scratch: Vec<u8>,
    record: Vec<u8>,
    /// Byte offset of the next record
    position: u64,
    /// Index of the last physically written entry, `starting_index - 1` if none
    last_written: u64,
    /// Term of the last written entry, 0 if none
    last_term: u64,
    /// Logical gap after `last_written`
    skip: u64,
    max_entry_size: usize,
}

impl SegmentWriter {
    /// Open a writer on `segment`, replaying it to recover the cursor.
    pub fn open(
        segment: Arc<Segment>,
        registry: Arc<EntryRegistry>,
        max_entry_size: usize,
    ) -> Result<(Self, SegmentRecovery)> {
        let recovery = replay(&segment, &registry)?;
        let writer = SegmentWriter::from_recovery(segment, registry, max_entry_size, &recovery);
        Ok((writer, recovery))
    }

    /// Build a writer for a segment that has already been replayed.
    pub fn from_recovery(
        segment: Arc<Segment>,
        registry: Arc<EntryRegistry>,
        max_entry_size: usize,
        recovery: &SegmentRecovery,
    ) -> Self {
        SegmentWriter {
            segment,
            registry,
            scratch: Vec::new(),
            record: Vec::new(),
            position: recovery.valid_len,
            last_written: recovery.last_index,
            last_term: recovery.last_term,
            skip: 0,
            max_entry_size,
        }
    }

    /// The segment being written
    pub fn segment(&self) -> &Arc<Segment> {
        &self.segment
    }

    /// Index of the first entry the segment may hold
    pub fn first_index(&self) -> u64 {
        self.segment.starting_index()
    }

    /// Last logical index, including any pending skip.
    pub fn last_index(&self) -> u64 {
        self.last_written + self.skip
    }

    /// Index the next `append` will assign.
    pub fn next_index(&self) -> u64 {
        self.last_index() + 1
    }

    /// Term of the last written entry, 0 if the segment holds none.
    pub fn last_term(&self) -> u64 {
        self.last_term
    }

    /// Entries physically in the segment
    pub fn entry_count(&self) -> usize {
        self.segment.entry_count()
    }

    /// Bytes written, descriptor included
    pub fn size(&self) -> u64 {
        self.position
    }

    /// Pending logical gap
    pub fn pending_skip(&self) -> u64 {
        self.skip
    }

    /// Whether the segment reached its byte or entry capacity.
    pub fn is_full(&self) -> bool {
        let descriptor = self.segment.descriptor();
        self.position >= descriptor.max_segment_size
            || self.entry_count() >= descriptor.max_entries as usize
    }

    /// Record a logical gap of `entries` indices.
    pub fn skip(&mut self, entries: u64) {
        self.skip += entries;
        self.segment.bump_generation();
    }

    /// Append `entry` at the next index.
    ///
    /// Fails with `EntrySizeExceeded` before touching the segment if the
    /// encoded entry is larger than the configured maximum.
    pub fn append(&mut self, term: u64, entry: Entry) -> Result<Indexed> {
        if term < self.last_term {
            return Err(Error::invalid(format!(
                "term {} is lower than last term {}",
                term, self.last_term
            )));
        }

        self.scratch.clear();
        self.registry.encode(&entry, &mut self.scratch)?;
        if self.scratch.len() > self.max_entry_size {
            return Err(Error::EntrySizeExceeded {
                size: self.scratch.len(),
                max: self.max_entry_size,
            });
        }

        let index = self.next_index();
        let header = RecordHeader {
            index,
            term: (term > self.last_term).then_some(term),
            length: self.scratch.len() as u32,
        };
        self.record.clear();
        header.encode_into(&mut self.record);
        self.record.extend_from_slice(&self.scratch);

        self.segment.write_at(self.position, &self.record)?;

        // Bytes become readable before the offset that points at them
        let size = self.record.len() as u32;
        let offset = self.position;
        self.position += size as u64;
        self.segment.set_committed_len(self.position);
        self.segment.push_offset(OffsetEntry {
            index,
            offset,
            term,
            size,
        });
        self.segment.bump_generation();
        self.last_written = index;
        self.last_term = term;
        self.skip = 0;

        trace!(target: "replog::segment", index, term, size, "Appended entry");
        Ok(Indexed {
            index,
            term,
            entry,
            size,
        })
    }

    /// Append an entry whose index was assigned elsewhere.
    ///
    /// A higher index than expected records the gap as a skip. A lower
    /// index first truncates back to `index - 1`, discarding the divergent
    /// suffix.
    pub fn append_indexed(&mut self, indexed: Indexed) -> Result<Indexed> {
        if indexed.index == 0 {
            return Err(Error::invalid("entry index must be positive"));
        }
        let next = self.next_index();
        if indexed.index > next {
            self.skip(indexed.index - next);
        } else if indexed.index < next {
            self.truncate(indexed.index - 1)?;
        }
        self.append(indexed.term, indexed.entry)
    }

    /// Remove every entry after `index`.
    ///
    /// Nothing after the new end survives in the backing bytes, so a later
    /// replay cannot mistake stale records for valid ones.
    pub fn truncate(&mut self, index: u64) -> Result<()> {
        if index >= self.last_index() {
            return Ok(());
        }
        if index >= self.last_written {
            // Only the pending skip extends past `index`
            self.skip = index - self.last_written;
            self.segment.bump_generation();
            return Ok(());
        }

        let starting_index = self.first_index();
        let (position, last_written, last_term) = if index < starting_index {
            self.segment.truncate_offsets(0);
            (DESCRIPTOR_SIZE as u64, starting_index - 1, 0)
        } else {
            match self.segment.truncate_offsets(index) {
                Some(last) => (last.offset + last.size as u64, last.index, last.term),
                None => (DESCRIPTOR_SIZE as u64, starting_index - 1, 0),
            }
        };

        self.segment.set_committed_len(position);
        self.segment.bump_generation();
        self.segment.zero_from(position)?;

        self.position = position;
        self.last_written = last_written;
        self.last_term = last_term;
        // Entries removed by compaction below `index` stay a gap
        self.skip = if index >= starting_index {
            index - last_written
        } else {
            0
        };

        debug!(
            target: "replog::segment",
            segment_id = self.segment.id(),
            index,
            position,
            "Truncated segment"
        );
        Ok(())
    }

    /// Force written bytes to durable storage.
    pub fn flush(&mut self) -> Result<()> {
        self.segment.sync()
    }

    /// Flush and give up the writer.
    pub fn close(mut self) -> Result<Arc<Segment>> {
        self.flush()?;
        Ok(self.segment)
    }
}

impl std::fmt::Debug for SegmentWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentWriter")
            .field("segment_id", &self.segment.id())
            .field("position", &self.position)
            .field("last_index", &self.last_index())
            .field("last_term", &self.last_term)
            .field("skip", &self.skip)
            .finish()
    }
}
