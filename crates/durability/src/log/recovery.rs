//! Log recovery
//!
//! Rebuilds the segment chain from the files in the log directory.
//!
//! ## Recovery Steps
//!
//! 1. Scan `{name}-{id}-{version}.log` files and validate descriptors
//! 2. Delete unlocked files (incomplete compaction output)
//! 3. Keep the highest version of each segment id, delete the rest
//! 4. Delete segments whose range an earlier sealed segment already covers,
//!    and every segment after an open one
//! 5. Replay every survivor, discarding partial trailing records
//! 6. Use the last survivor as the tail, or create one after it if sealed
//!
//! Rotation seals a segment before creating the next, so an open segment
//! is always last unless a truncation was interrupted after reopening its
//! target. The open segment is authoritative in that case.
//!
//! A record of an unregistered entry type fails recovery without touching
//! the file.

use super::create_tail;
use crate::config::{StorageConfig, StorageLevel};
use crate::format::parse_segment_file_name;
use crate::segment::{replay, Segment, SegmentRecovery, SegmentWriter};
use replog_core::{EntryRegistry, Result};
use std::collections::btree_map::Entry as MapEntry;
use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What recovery hands back to `Log::open`.
pub(crate) struct Recovered {
    pub(crate) chain: BTreeMap<u64, Arc<Segment>>,
    pub(crate) writer: SegmentWriter,
    pub(crate) next_segment_id: u64,
    /// Index and key of every keyed entry in the log
    pub(crate) keyed: Vec<(u64, Vec<u8>)>,
}

pub(crate) fn recover(
    name: &str,
    config: &StorageConfig,
    registry: &Arc<EntryRegistry>,
) -> Result<Recovered> {
    let (survivors, max_id) = match config.storage_level {
        StorageLevel::Memory => (Vec::new(), 0),
        StorageLevel::Disk => scan(name, config)?,
    };
    let max_entry_size = config.max_entry_size as usize;
    let mut next_segment_id = max_id + 1;

    let mut chain = BTreeMap::new();
    let mut keyed = Vec::new();
    let mut last: Option<(Arc<Segment>, SegmentRecovery)> = None;
    let count = survivors.len();
    for (i, segment) in survivors.iter().enumerate() {
        let mut recovery = replay(segment, registry)?;
        keyed.append(&mut recovery.keyed);

        debug!(
            target: "replog::recovery",
            segment_id = segment.id(),
            version = segment.version(),
            entries = recovery.entry_count,
            last_index = recovery.last_index,
            "Recovered segment"
        );
        chain.insert(segment.starting_index(), Arc::clone(segment));
        if i + 1 == count {
            last = Some((Arc::clone(segment), recovery));
        }
    }

    let writer = match last {
        Some((segment, recovery)) if !segment.is_sealed() => SegmentWriter::from_recovery(
            segment,
            Arc::clone(registry),
            max_entry_size,
            &recovery,
        ),
        last => {
            let starting_index = last
                .as_ref()
                .and_then(|(segment, _)| segment.end_index())
                .map_or(1, |end| end + 1);
            let tail = create_tail(config, name, next_segment_id, starting_index)?;
            next_segment_id += 1;
            chain.insert(starting_index, Arc::clone(&tail));
            SegmentWriter::open(tail, Arc::clone(registry), max_entry_size)?.0
        }
    };

    info!(
        target: "replog::recovery",
        name,
        segments = chain.len(),
        last_index = writer.last_index(),
        "Recovery complete"
    );
    Ok(Recovered {
        chain,
        writer,
        next_segment_id,
        keyed,
    })
}

/// Open and filter the segment files of `name`, returning survivors in
/// starting-index order and the highest id seen in any file name.
fn scan(name: &str, config: &StorageConfig) -> Result<(Vec<Arc<Segment>>, u64)> {
    fs::create_dir_all(&config.directory)?;

    let mut max_id = 0;
    let mut latest: BTreeMap<u64, Segment> = BTreeMap::new();
    for dir_entry in fs::read_dir(&config.directory)? {
        let dir_entry = dir_entry?;
        let file_name = dir_entry.file_name();
        let Some((id, version)) = file_name
            .to_str()
            .and_then(|f| parse_segment_file_name(name, f))
        else {
            continue;
        };
        max_id = max_id.max(id);

        let path = dir_entry.path();
        let segment = match Segment::open(&path) {
            Ok(segment) => segment,
            Err(e) => {
                warn!(
                    target: "replog::recovery",
                    path = %path.display(),
                    error = %e,
                    "Ignoring unreadable segment file"
                );
                continue;
            }
        };
        let descriptor = segment.descriptor();
        if descriptor.id != id || descriptor.version != version {
            warn!(
                target: "replog::recovery",
                path = %path.display(),
                id = descriptor.id,
                version = descriptor.version,
                "Ignoring segment whose descriptor does not match its file name"
            );
            continue;
        }
        if !descriptor.locked {
            info!(
                target: "replog::recovery",
                path = %path.display(),
                "Deleting incomplete compaction output"
            );
            segment.retire();
            continue;
        }

        match latest.entry(id) {
            MapEntry::Vacant(slot) => {
                slot.insert(segment);
            }
            MapEntry::Occupied(mut slot) => {
                let stale = if version > slot.get().version() {
                    slot.insert(segment)
                } else {
                    segment
                };
                debug!(
                    target: "replog::recovery",
                    id,
                    version = stale.version(),
                    "Deleting superseded segment version"
                );
                stale.retire();
            }
        }
    }

    let mut ordered: Vec<Segment> = latest.into_values().collect();
    ordered.sort_by_key(Segment::starting_index);

    let mut survivors: Vec<Arc<Segment>> = Vec::with_capacity(ordered.len());
    let mut covered: Option<u64> = None;
    let mut open_before: Option<u64> = None;
    for segment in ordered {
        let start = segment.starting_index();
        if let Some(open_id) = open_before {
            warn!(
                target: "replog::recovery",
                id = segment.id(),
                version = segment.version(),
                starting_index = start,
                open_id,
                "Deleting segment left behind by an interrupted truncation"
            );
            segment.retire();
            continue;
        }
        if covered.map_or(false, |end| start <= end) {
            info!(
                target: "replog::recovery",
                id = segment.id(),
                version = segment.version(),
                starting_index = start,
                "Deleting segment covered by an earlier merged segment"
            );
            segment.retire();
            continue;
        }
        match segment.end_index() {
            Some(end) => covered = Some(end),
            None => open_before = Some(segment.id()),
        }
        survivors.push(Arc::new(segment));
    }
    Ok((survivors, max_id))
}
