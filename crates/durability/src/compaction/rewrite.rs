//! Copy-then-swap segment rewrite.
//!
//! The output is written as a new, unlocked version of the first source's
//! id. Only after it is complete, flushed and locked is it swapped into the
//! chain, and only if every source is still installed and untouched.
//! Sources are retired; their files go away when the last reader drops
//! them.

use super::{CompactionError, CompactionKind};
use crate::format::SegmentDescriptor;
use crate::log::LogShared;
use crate::segment::{Segment, SegmentWriter};
use std::sync::Arc;
use tracing::info;

/// One rewrite: a run of adjacent sealed segments and the entries to drop.
#[derive(Debug)]
pub(crate) struct RewriteUnit {
    pub(crate) kind: CompactionKind,
    pub(crate) sources: Vec<Arc<Segment>>,
    /// Source generations observed at planning time
    pub(crate) generations: Vec<u64>,
    /// Sorted indices to drop
    pub(crate) reclaim: Vec<u64>,
}

impl RewriteUnit {
    /// Capture `sources` with their current generations.
    pub(crate) fn new(kind: CompactionKind, sources: Vec<Arc<Segment>>, mut reclaim: Vec<u64>) -> Self {
        let generations = sources.iter().map(|s| s.generation()).collect();
        reclaim.sort_unstable();
        RewriteUnit {
            kind,
            sources,
            generations,
            reclaim,
        }
    }
}

/// What an installed rewrite removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RewriteOutcome {
    pub(crate) sources: usize,
    pub(crate) entries_reclaimed: usize,
    pub(crate) reclaimed_bytes: u64,
}

/// Rewrite `unit` and install the result.
pub(crate) fn rewrite(
    shared: &LogShared,
    unit: RewriteUnit,
) -> Result<RewriteOutcome, CompactionError> {
    let (first, last) = match (unit.sources.first(), unit.sources.last()) {
        (Some(first), Some(last)) => (Arc::clone(first), Arc::clone(last)),
        _ => {
            return Ok(RewriteOutcome {
                sources: 0,
                entries_reclaimed: 0,
                reclaimed_bytes: 0,
            })
        }
    };
    let end_index = last.end_index().ok_or(CompactionError::Superseded {
        segment_id: last.id(),
    })?;
    let version = unit
        .sources
        .iter()
        .map(|s| s.version())
        .max()
        .unwrap_or(0)
        + 1;

    let descriptor = SegmentDescriptor::new(
        first.id(),
        version,
        first.starting_index(),
        shared.config.max_segment_size,
        shared.config.max_entries_per_segment,
    );
    let output = Arc::new(shared.create_segment(descriptor)?);

    let copied = copy_live(shared, &unit, &output, end_index);
    let (entries_reclaimed, reclaimed_bytes) = match copied {
        Ok(stats) => stats,
        Err(e) => {
            output.retire();
            return Err(e);
        }
    };

    {
        let mut chain = shared.chain.write();
        for (source, generation) in unit.sources.iter().zip(&unit.generations) {
            let unchanged = chain
                .get(&source.starting_index())
                .map_or(false, |installed| {
                    Arc::ptr_eq(installed, source)
                        && installed.generation() == *generation
                        && installed.is_sealed()
                });
            if !unchanged {
                output.retire();
                return Err(CompactionError::Superseded {
                    segment_id: source.id(),
                });
            }
        }
        for source in &unit.sources {
            chain.remove(&source.starting_index());
            source.retire();
        }
        chain.insert(output.starting_index(), Arc::clone(&output));
    }

    shared.tracker.reclaimed(&unit.reclaim);

    info!(
        target: "replog::compaction",
        kind = %unit.kind,
        segment_id = output.id(),
        version,
        sources = unit.sources.len(),
        entries_reclaimed,
        reclaimed_bytes,
        "Installed rewritten segment"
    );
    Ok(RewriteOutcome {
        sources: unit.sources.len(),
        entries_reclaimed,
        reclaimed_bytes,
    })
}

fn copy_live(
    shared: &LogShared,
    unit: &RewriteUnit,
    output: &Arc<Segment>,
    end_index: u64,
) -> Result<(usize, u64), CompactionError> {
    // Entries were accepted under the size limit when first appended
    let (mut writer, _) =
        SegmentWriter::open(Arc::clone(output), Arc::clone(&shared.registry), usize::MAX)?;
    let mut entries_reclaimed = 0;
    let mut reclaimed_bytes = 0;

    for source in &unit.sources {
        if shared.passes.is_cancelled() {
            return Err(CompactionError::Cancelled);
        }
        for loc in source.offsets() {
            if unit.reclaim.binary_search(&loc.index).is_ok() {
                entries_reclaimed += 1;
                reclaimed_bytes += loc.size as u64;
                continue;
            }
            let indexed = source.read_located(loc, &shared.registry)?;
            writer.append_indexed(indexed)?;
        }
    }
    if shared.passes.is_cancelled() {
        return Err(CompactionError::Cancelled);
    }

    writer.flush()?;
    output.update_descriptor(|d| {
        d.end_index = end_index;
        d.locked = true;
    })?;
    Ok((entries_reclaimed, reclaimed_bytes))
}
