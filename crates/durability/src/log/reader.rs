//! Sequential reader across the segment chain.

use super::LogShared;
use crate::segment::Segment;
use replog_core::{Indexed, Result};
use std::sync::Arc;

/// Forward iterator over the retained entries of a log.
///
/// Reclaimed and skipped indices are passed over. Iteration ends at the
/// last published entry; calling `next` again later picks up entries
/// appended since.
pub struct LogReader {
    shared: Arc<LogShared>,
    segment: Option<Arc<Segment>>,
    next: u64,
}

impl LogReader {
    pub(crate) fn new(shared: Arc<LogShared>, from_index: u64) -> Self {
        LogReader {
            shared,
            segment: None,
            next: from_index.max(1),
        }
    }

    /// Index the next call to `next` starts looking at
    pub fn position(&self) -> u64 {
        self.next
    }

    /// Move the reader to `index`.
    pub fn seek(&mut self, index: u64) {
        self.next = index.max(1);
        self.segment = None;
    }
}

impl Iterator for LogReader {
    type Item = Result<Indexed>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let segment = match &self.segment {
                // A swapped-out segment is re-resolved so readers follow merges
                Some(segment) if !segment.is_retired() => Arc::clone(segment),
                _ => {
                    let segment = self.shared.segment_at_or_after(self.next)?;
                    self.segment = Some(Arc::clone(&segment));
                    segment
                }
            };

            // Read the end before the offsets so a concurrent seal cannot
            // hide entries published just before it
            let end_index = segment.end_index();
            match segment.locate_from(self.next) {
                Some(loc) if end_index.map_or(true, |end| loc.index <= end) => {
                    self.next = loc.index + 1;
                    return Some(segment.read_located(loc, &self.shared.registry));
                }
                _ => match end_index {
                    Some(end) => {
                        self.next = self.next.max(end + 1);
                        self.segment = None;
                    }
                    None => return None,
                },
            }
        }
    }
}

impl std::fmt::Debug for LogReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogReader")
            .field("log", &self.shared.name)
            .field("next", &self.next)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::config::StorageConfig;
    use crate::log::Log;
    use replog_core::{CommandEntry, CompactionMode};
    use tempfile::tempdir;

    fn command(n: u64) -> CommandEntry {
        CommandEntry::new(1, n, n, CompactionMode::Release, vec![n as u8; 16])
    }

    #[test]
    fn test_reader_crosses_segments() {
        let dir = tempdir().unwrap();
        let mut log = Log::open("reader", StorageConfig::for_testing(dir.path())).unwrap();
        for i in 1..=150 {
            log.append(1, command(i)).unwrap();
        }
        assert!(log.segment_count() >= 3);

        let indices: Vec<u64> = log.reader(1).map(|r| r.unwrap().index).collect();
        assert_eq!(indices, (1..=150).collect::<Vec<_>>());
    }

    #[test]
    fn test_reader_skips_gaps_and_resumes() {
        let dir = tempdir().unwrap();
        let mut log = Log::open("reader", StorageConfig::for_testing(dir.path())).unwrap();
        log.append(1, command(1)).unwrap();
        log.skip(2).unwrap();
        log.append(1, command(4)).unwrap();

        let mut reader = log.reader(1);
        assert_eq!(reader.next().unwrap().unwrap().index, 1);
        assert_eq!(reader.next().unwrap().unwrap().index, 4);
        assert!(reader.next().is_none());

        log.append(1, command(5)).unwrap();
        assert_eq!(reader.next().unwrap().unwrap().index, 5);
    }

    #[test]
    fn test_reader_seek() {
        let dir = tempdir().unwrap();
        let mut log = Log::open("reader", StorageConfig::for_testing(dir.path())).unwrap();
        for i in 1..=10 {
            log.append(1, command(i)).unwrap();
        }
        let mut reader = log.reader(1);
        reader.seek(7);
        assert_eq!(reader.position(), 7);
        let indices: Vec<u64> = reader.map(|r| r.unwrap().index).collect();
        assert_eq!(indices, vec![7, 8, 9, 10]);
    }
}
