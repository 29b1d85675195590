//! Release and supersession bookkeeping.
//!
//! The tracker learns about an entry when the state machine releases it.
//! Releasing a keyed entry supersedes every earlier released entry with the
//! same key. Compaction asks the tracker which entries of a segment may be
//! dropped, then reports back the ones it physically removed.
//!
//! Independently of releases, the log reports every keyed entry it holds
//! (on append and on recovery). A tombstone stays until no earlier entry
//! for its key is left in the log, released or not.
//!
//! Release state is in memory only. After a restart the executor re-applies
//! the retained log from the beginning, which releases everything again.

use super::CompactionKind;
use parking_lot::Mutex;
use replog_core::CompactionMode;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound::{Excluded, Unbounded};
use std::ops::RangeInclusive;

#[derive(Debug, Clone)]
struct Tracked {
    mode: CompactionMode,
    key: Option<Vec<u8>>,
    superseded_by: Option<u64>,
}

#[derive(Debug, Default)]
struct TrackerState {
    entries: BTreeMap<u64, Tracked>,
    keys: HashMap<Vec<u8>, BTreeSet<u64>>,
    /// Keyed entries present in the log, released or not
    present: HashMap<Vec<u8>, BTreeSet<u64>>,
    reclaimed_total: u64,
}

fn remove_index(map: &mut HashMap<Vec<u8>, BTreeSet<u64>>, key: &[u8], index: u64) {
    if let Some(set) = map.get_mut(key) {
        set.remove(&index);
        if set.is_empty() {
            map.remove(key);
        }
    }
}

impl TrackerState {
    fn forget(&mut self, index: u64) {
        if let Some(tracked) = self.entries.remove(&index) {
            if let Some(key) = tracked.key {
                remove_index(&mut self.keys, &key, index);
            }
        }
    }

    fn has_earlier(&self, key: &[u8], index: u64) -> bool {
        [&self.keys, &self.present].iter().any(|map| {
            map.get(key)
                .map_or(false, |set| set.range(..index).next().is_some())
        })
    }
}

/// Counters for observability and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerStats {
    /// Released entries not yet reclaimed
    pub tracked: usize,
    /// Distinct compaction keys among them
    pub keys: usize,
    /// Entries physically removed since creation
    pub reclaimed_total: u64,
}

/// Shared release/supersession state for one log.
#[derive(Debug, Default)]
pub struct CompactionTracker {
    state: Mutex<TrackerState>,
}

impl CompactionTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that the log holds a keyed entry at `index`.
    pub fn appended(&self, index: u64, key: &[u8]) {
        self.state
            .lock()
            .present
            .entry(key.to_vec())
            .or_default()
            .insert(index);
    }

    /// Record that the state machine is done with entry `index`.
    ///
    /// Releasing the same index twice is a no-op.
    pub fn release(&self, index: u64, mode: CompactionMode, key: Option<&[u8]>) {
        let mut state = self.state.lock();
        if state.entries.contains_key(&index) {
            return;
        }

        let mut superseded_by = None;
        if let Some(key) = key {
            let set = state.keys.entry(key.to_vec()).or_default();
            let earlier: Vec<u64> = set.range(..index).copied().collect();
            // A later release for this key already supersedes this entry
            superseded_by = set.range((Excluded(index), Unbounded)).next().copied();
            set.insert(index);
            for idx in earlier {
                if let Some(tracked) = state.entries.get_mut(&idx) {
                    let current = tracked.superseded_by.get_or_insert(index);
                    *current = (*current).min(index);
                }
            }
        }

        state.entries.insert(
            index,
            Tracked {
                mode,
                key: key.map(<[u8]>::to_vec),
                superseded_by,
            },
        );
    }

    /// Whether `index` has been released and not yet reclaimed
    pub fn is_released(&self, index: u64) -> bool {
        self.state.lock().entries.contains_key(&index)
    }

    /// Indices in `range` that a pass of `kind` may drop, given the commit
    /// index and the index applied on every member.
    pub fn reclaimable(
        &self,
        range: RangeInclusive<u64>,
        kind: CompactionKind,
        commit_index: u64,
        major_index: u64,
    ) -> Vec<u64> {
        let watermark = match kind {
            CompactionKind::Minor => commit_index,
            CompactionKind::Major => major_index,
        };
        let state = self.state.lock();
        state
            .entries
            .range(range)
            .filter(|(index, tracked)| {
                let index = **index;
                if index > watermark {
                    return false;
                }
                match tracked.mode {
                    CompactionMode::Release => true,
                    CompactionMode::Quorum => tracked
                        .superseded_by
                        .map_or(false, |by| by <= commit_index),
                    CompactionMode::Sequential => {
                        tracked.superseded_by.map_or(false, |by| by <= major_index)
                    }
                    CompactionMode::Full => kind == CompactionKind::Major && index <= major_index,
                    CompactionMode::Tombstone => {
                        index <= major_index
                            && tracked
                                .key
                                .as_ref()
                                .map_or(true, |key| !state.has_earlier(key, index))
                    }
                }
            })
            .map(|(index, _)| *index)
            .collect()
    }

    /// Forget entries that compaction physically removed.
    pub fn reclaimed(&self, indices: &[u64]) {
        let mut state = self.state.lock();
        for index in indices {
            let key = state.entries.get(index).and_then(|t| t.key.clone());
            if let Some(key) = key {
                remove_index(&mut state.present, &key, *index);
            }
            state.forget(*index);
        }
        state.reclaimed_total += indices.len() as u64;
    }

    /// Forget every entry after `index`, undoing supersession by them.
    pub fn truncate(&self, index: u64) {
        let mut state = self.state.lock();
        let removed: Vec<u64> = state
            .entries
            .range((Excluded(index), Unbounded))
            .map(|(idx, _)| *idx)
            .collect();
        for idx in removed {
            state.forget(idx);
        }
        state.present.retain(|_, set| {
            set.split_off(&(index + 1));
            !set.is_empty()
        });
        // Recompute supersession from the surviving releases
        let TrackerState { entries, keys, .. } = &mut *state;
        for set in keys.values() {
            let mut later: Option<u64> = None;
            for idx in set.iter().rev() {
                if let Some(tracked) = entries.get_mut(idx) {
                    tracked.superseded_by = later;
                }
                later = Some(*idx);
            }
        }
    }

    /// Snapshot of tracker counters
    pub fn stats(&self) -> TrackerStats {
        let state = self.state.lock();
        TrackerStats {
            tracked: state.entries.len(),
            keys: state.keys.len(),
            reclaimed_total: state.reclaimed_total,
        }
    }
}
