//! Minor compaction planning.
//!
//! Every sealed segment with at least one reclaimable entry becomes its
//! own rewrite unit; boundaries never change.

use super::{CompactionKind, RewriteUnit};
use crate::log::LogShared;
use std::sync::Arc;

pub(crate) fn plan(shared: &LogShared) -> Vec<RewriteUnit> {
    let commit_index = shared.commit_index();
    let major_index = shared.major_index();
    let chain = shared.chain.read();

    chain
        .values()
        .filter_map(|segment| {
            let end = segment.end_index()?;
            let mut reclaim = shared.tracker.reclaimable(
                segment.starting_index()..=end,
                CompactionKind::Minor,
                commit_index,
                major_index,
            );
            reclaim.retain(|index| segment.locate(*index).is_some());
            if reclaim.is_empty() {
                return None;
            }
            Some(RewriteUnit::new(
                CompactionKind::Minor,
                vec![Arc::clone(segment)],
                reclaim,
            ))
        })
        .collect()
}
