//! Segment replay.
//!
//! Re-parses a segment from its first record to rebuild the offset index
//! and the writer cursor. Stopping early is a normal outcome: a crash in
//! the middle of an append leaves a partial trailing record, and the bytes
//! from that point on are discarded.

use super::{OffsetEntry, RecordRead, Segment};
use crate::format::DESCRIPTOR_SIZE;
use replog_core::{EntryRegistry, Error, Result};
use tracing::{error, warn};

/// Why replay stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayStop {
    /// Reached a zero index field or the end of the bytes
    EndOfData,
    /// A record extends beyond the written bytes
    PartialRecord {
        /// Offset of the partial record
        offset: u64,
    },
    /// A record failed validation
    Corrupted {
        /// Offset of the bad record
        offset: u64,
        /// What was wrong
        detail: String,
    },
}

impl ReplayStop {
    /// Whether replay consumed every record cleanly
    pub fn is_clean(&self) -> bool {
        matches!(self, ReplayStop::EndOfData)
    }
}

/// Cursor state reconstructed by replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRecovery {
    /// Last valid index, or `starting_index - 1` when empty
    pub last_index: u64,
    /// Term of the last valid entry, 0 when empty
    pub last_term: u64,
    /// Valid entries
    pub entry_count: usize,
    /// Byte length of the descriptor plus all valid records
    pub valid_len: u64,
    /// Why replay stopped
    pub stop: ReplayStop,
    /// Index and compaction key of every valid keyed entry
    pub keyed: Vec<(u64, Vec<u8>)>,
}

/// Replay `segment`, rebuild its offset index and drop anything past the
/// last valid record.
///
/// A record of an unregistered entry type fails with
/// `UnregisteredEntryType` and leaves the segment untouched.
pub fn replay(segment: &Segment, registry: &EntryRegistry) -> Result<SegmentRecovery> {
    let descriptor = segment.descriptor();
    let limit = segment.store_len()?;
    let mut pos = DESCRIPTOR_SIZE as u64;
    let mut last_index = descriptor.starting_index.saturating_sub(1);
    let mut last_term = 0u64;
    let mut offsets = Vec::new();
    let mut keyed = Vec::new();

    let stop = loop {
        match segment.read_record(pos, limit, last_term, registry)? {
            RecordRead::End => break ReplayStop::EndOfData,
            RecordRead::Partial => break ReplayStop::PartialRecord { offset: pos },
            RecordRead::Unregistered(type_id) => {
                // Written by a newer registry; keep the bytes and refuse to open
                error!(
                    target: "replog::recovery",
                    segment_id = descriptor.id,
                    offset = pos,
                    type_id,
                    "Segment holds an unregistered entry type"
                );
                return Err(Error::UnregisteredEntryType(type_id));
            }
            RecordRead::Corrupt(detail) => break ReplayStop::Corrupted { offset: pos, detail },
            RecordRead::Entry(indexed) => {
                if indexed.index <= last_index {
                    break ReplayStop::Corrupted {
                        offset: pos,
                        detail: format!(
                            "index {} does not follow {}",
                            indexed.index, last_index
                        ),
                    };
                }
                if descriptor.is_sealed() && indexed.index > descriptor.end_index {
                    break ReplayStop::Corrupted {
                        offset: pos,
                        detail: format!(
                            "index {} beyond sealed end {}",
                            indexed.index, descriptor.end_index
                        ),
                    };
                }
                if indexed.term < last_term {
                    break ReplayStop::Corrupted {
                        offset: pos,
                        detail: format!("term {} after term {}", indexed.term, last_term),
                    };
                }
                if let Some(key) = indexed.compaction_key() {
                    keyed.push((indexed.index, key.to_vec()));
                }
                offsets.push(OffsetEntry {
                    index: indexed.index,
                    offset: pos,
                    term: indexed.term,
                    size: indexed.size,
                });
                pos += indexed.size as u64;
                last_index = indexed.index;
                last_term = indexed.term;
            }
        }
    };

    if !stop.is_clean() {
        warn!(
            target: "replog::recovery",
            segment_id = descriptor.id,
            version = descriptor.version,
            valid_len = pos,
            stop = ?stop,
            "Segment replay stopped early; discarding trailing bytes"
        );
    }
    if pos < limit {
        segment.zero_from(pos)?;
    }

    let entry_count = offsets.len();
    segment.set_committed_len(pos);
    segment.replace_offsets(offsets);

    Ok(SegmentRecovery {
        last_index,
        last_term,
        entry_count,
        valid_len: pos,
        stop,
        keyed,
    })
}
