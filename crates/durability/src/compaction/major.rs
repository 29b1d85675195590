//! Major compaction planning.
//!
//! A sealed segment is a candidate when the fraction of its entries that
//! are reclaimable is at least `compaction_threshold`; an empty sealed
//! segment always qualifies. Runs of adjacent candidates are merged
//! greedily while the surviving bytes and entries fit one segment.

use super::{CompactionKind, RewriteUnit};
use crate::format::DESCRIPTOR_SIZE;
use crate::log::LogShared;
use crate::segment::Segment;
use std::sync::Arc;

struct Candidate {
    segment: Arc<Segment>,
    reclaim: Vec<u64>,
    live_bytes: u64,
    live_entries: u64,
}

#[derive(Default)]
struct Group {
    members: Vec<Candidate>,
    live_bytes: u64,
    live_entries: u64,
}

impl Group {
    fn into_unit(self) -> Option<RewriteUnit> {
        let reclaims: usize = self.members.iter().map(|c| c.reclaim.len()).sum();
        // A lone segment with nothing to drop gains nothing from a rewrite
        if self.members.len() < 2 && reclaims == 0 {
            return None;
        }
        let mut sources = Vec::with_capacity(self.members.len());
        let mut reclaim = Vec::with_capacity(reclaims);
        for member in self.members {
            sources.push(member.segment);
            reclaim.extend(member.reclaim);
        }
        Some(RewriteUnit::new(CompactionKind::Major, sources, reclaim))
    }
}

pub(crate) fn plan(shared: &LogShared) -> Vec<RewriteUnit> {
    let commit_index = shared.commit_index();
    let major_index = shared.major_index();
    let threshold = shared.config.compaction_threshold;
    let max_bytes = shared.config.max_segment_size;
    let max_entries = shared.config.max_entries_per_segment as u64;
    let chain = shared.chain.read();

    let mut units = Vec::new();
    let mut group = Group::default();

    for segment in chain.values() {
        let candidate = segment.end_index().and_then(|end| {
            let offsets = segment.offsets();
            let mut reclaim = shared.tracker.reclaimable(
                segment.starting_index()..=end,
                CompactionKind::Major,
                commit_index,
                major_index,
            );
            reclaim.retain(|index| offsets.binary_search_by_key(index, |e| e.index).is_ok());

            let ratio = if offsets.is_empty() {
                1.0
            } else {
                reclaim.len() as f64 / offsets.len() as f64
            };
            if ratio < threshold {
                return None;
            }
            let reclaimed_bytes: u64 = offsets
                .iter()
                .filter(|e| reclaim.binary_search(&e.index).is_ok())
                .map(|e| e.size as u64)
                .sum();
            let total_bytes: u64 = offsets.iter().map(|e| e.size as u64).sum();
            Some(Candidate {
                segment: Arc::clone(segment),
                live_entries: (offsets.len() - reclaim.len()) as u64,
                live_bytes: total_bytes - reclaimed_bytes,
                reclaim,
            })
        });

        let Some(candidate) = candidate else {
            // A non-candidate (or the tail) breaks adjacency
            units.extend(std::mem::take(&mut group).into_unit());
            continue;
        };

        let fits = DESCRIPTOR_SIZE as u64 + group.live_bytes + candidate.live_bytes <= max_bytes
            && group.live_entries + candidate.live_entries <= max_entries;
        if !fits && !group.members.is_empty() {
            units.extend(std::mem::take(&mut group).into_unit());
        }
        group.live_bytes += candidate.live_bytes;
        group.live_entries += candidate.live_entries;
        group.members.push(candidate);
    }
    units.extend(group.into_unit());
    units
}
