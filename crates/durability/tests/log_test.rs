//! Log Behaviour Tests
//!
//! Appends, reads, truncation and rotation through the public `Log` API:
//!
//! - Truncate then re-append replaces the divergent suffix
//! - Oversized entries are rejected without changing the log
//! - Rotation creates exactly one new segment with no gap or duplicate
//! - Truncate-then-append produces the same bytes as never diverging
//! - Term changes are the only records carrying a term field

use proptest::prelude::*;
use replog_core::{CommandEntry, CompactionMode, Error};
use replog_durability::format::{parse_header, HeaderParse, DESCRIPTOR_SIZE};
use replog_durability::{Log, StorageConfig};
use std::path::Path;
use tempfile::TempDir;

fn command(n: u64) -> CommandEntry {
    CommandEntry::new(1, n, 1_000 + n, CompactionMode::Quorum, n.to_be_bytes().to_vec())
}

fn open(dir: &Path, name: &str) -> Log {
    Log::open(name, StorageConfig::for_testing(dir)).unwrap()
}

fn tail_file(log: &Log, dir: &Path) -> Vec<u8> {
    let descriptor = log.segment_descriptors().pop().unwrap();
    std::fs::read(dir.join(descriptor.file_name(log.name()))).unwrap()
}

// ============================================================================
// Truncation
// ============================================================================

#[test]
fn test_truncate_then_append_new_term() {
    let temp_dir = TempDir::new().unwrap();
    let mut log = open(temp_dir.path(), "scenario");

    for i in 1..=5 {
        log.append(1, command(i)).unwrap();
    }
    log.truncate(3).unwrap();
    assert_eq!(log.last_index(), 3);

    assert_eq!(log.append(2, command(40)).unwrap().index, 4);
    assert_eq!(log.append(2, command(50)).unwrap().index, 5);

    assert_eq!(log.get(4).unwrap().term, 2);
    assert_eq!(log.get(3).unwrap().term, 1);
    assert!(matches!(
        log.get(6),
        Err(Error::IndexOutOfRange { index: 6, .. })
    ));
}

#[test]
fn test_truncate_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    {
        let mut log = open(temp_dir.path(), "reopen");
        for i in 1..=5 {
            log.append(1, command(i)).unwrap();
        }
        log.truncate(2).unwrap();
        log.flush().unwrap();
    }

    let log = open(temp_dir.path(), "reopen");
    assert_eq!(log.last_index(), 2);
    assert!(matches!(log.get(3), Err(Error::IndexOutOfRange { .. })));
}

#[test]
fn test_truncate_across_segments() {
    let temp_dir = TempDir::new().unwrap();
    let mut log = open(temp_dir.path(), "across");
    for i in 1..=150 {
        log.append(1, command(i)).unwrap();
    }
    assert_eq!(log.segment_count(), 3);

    log.truncate(10).unwrap();
    assert_eq!(log.segment_count(), 1);
    assert_eq!(log.last_index(), 10);
    assert_eq!(log.append(2, command(11)).unwrap().index, 11);
    drop(log);

    let files = std::fs::read_dir(temp_dir.path()).unwrap().count();
    assert_eq!(files, 1);

    let log = open(temp_dir.path(), "across");
    assert_eq!(log.last_index(), 11);
    assert_eq!(log.get(11).unwrap().term, 2);
    assert_eq!(log.get(10).unwrap().term, 1);
}

#[test]
fn test_truncate_to_zero_empties_log() {
    let temp_dir = TempDir::new().unwrap();
    let mut log = open(temp_dir.path(), "empty");
    for i in 1..=5 {
        log.append(1, command(i)).unwrap();
    }
    log.truncate(0).unwrap();
    assert!(log.is_empty());
    assert_eq!(log.last_term(), 0);
    assert_eq!(log.append(1, command(1)).unwrap().index, 1);
}

#[test]
fn test_truncate_then_append_is_byte_identical() {
    let diverged_dir = TempDir::new().unwrap();
    let straight_dir = TempDir::new().unwrap();

    let mut diverged = open(diverged_dir.path(), "bytes");
    for i in 1..=8 {
        diverged.append(1, command(i)).unwrap();
    }
    diverged.truncate(3).unwrap();
    for i in 4..=6 {
        diverged.append(2, command(i * 10)).unwrap();
    }
    diverged.flush().unwrap();

    let mut straight = open(straight_dir.path(), "bytes");
    for i in 1..=3 {
        straight.append(1, command(i)).unwrap();
    }
    for i in 4..=6 {
        straight.append(2, command(i * 10)).unwrap();
    }
    straight.flush().unwrap();

    assert_eq!(
        tail_file(&diverged, diverged_dir.path()),
        tail_file(&straight, straight_dir.path())
    );
}

// ============================================================================
// Entry size
// ============================================================================

#[test]
fn test_oversized_entry_leaves_log_unchanged() {
    let temp_dir = TempDir::new().unwrap();
    let mut log = open(temp_dir.path(), "size");
    log.append(1, command(1)).unwrap();
    let size_before = log.size();

    let max = log.config().max_entry_size as usize;
    // type id + 3 x u64 + mode + key flag + length prefix
    let overhead = 1 + 24 + 1 + 1 + 4;
    let oversized = CommandEntry::new(1, 2, 2, CompactionMode::Release, vec![7; max + 1 - overhead]);

    let err = log.append(1, oversized).unwrap_err();
    assert!(matches!(
        err,
        Error::EntrySizeExceeded { size, max: m } if size == max + 1 && m == max
    ));
    assert_eq!(log.last_index(), 1);
    assert_eq!(log.size(), size_before);

    let fits = CommandEntry::new(1, 2, 2, CompactionMode::Release, vec![7; max - overhead]);
    assert_eq!(log.append(1, fits).unwrap().index, 2);
}

// ============================================================================
// Rotation
// ============================================================================

#[test]
fn test_rotation_on_entry_limit() {
    let temp_dir = TempDir::new().unwrap();
    let mut log = open(temp_dir.path(), "rotate");
    let per_segment = log.config().max_entries_per_segment as u64;

    for i in 1..per_segment {
        log.append(1, command(i)).unwrap();
    }
    assert_eq!(log.segment_count(), 1);

    log.append(1, command(per_segment)).unwrap();
    assert_eq!(log.segment_count(), 2);

    let next = log.append(1, command(per_segment + 1)).unwrap();
    assert_eq!(next.index, per_segment + 1);
    assert_eq!(log.segment_count(), 2);

    let descriptors = log.segment_descriptors();
    assert_eq!(descriptors[0].starting_index, 1);
    assert_eq!(descriptors[0].end_index, per_segment);
    assert_eq!(descriptors[1].starting_index, per_segment + 1);
    assert!(!descriptors[1].is_sealed());

    let indices: Vec<u64> = log.reader(1).map(|r| r.unwrap().index).collect();
    assert_eq!(indices, (1..=per_segment + 1).collect::<Vec<_>>());
}

#[test]
fn test_rotation_on_byte_limit() {
    let temp_dir = TempDir::new().unwrap();
    let config = StorageConfig::for_testing(temp_dir.path())
        .with_max_segment_size(4096)
        .with_max_entry_size(1024);
    let mut log = Log::open("bytes", config).unwrap();

    let mut index = 0;
    while log.segment_count() == 1 {
        index += 1;
        log.append(
            1,
            CommandEntry::new(1, index, index, CompactionMode::Release, vec![1; 500]),
        )
        .unwrap();
    }
    assert_eq!(log.segment_count(), 2);
    let sealed = log.segment_descriptors()[0];
    assert_eq!(sealed.end_index, index);
    assert_eq!(log.next_index(), index + 1);
}

#[test]
fn test_skip_spans_rotation() {
    let temp_dir = TempDir::new().unwrap();
    let mut log = open(temp_dir.path(), "skip");
    log.append(1, command(1)).unwrap();
    log.skip(5).unwrap();
    assert_eq!(log.last_index(), 6);
    assert_eq!(log.append(1, command(7)).unwrap().index, 7);
    assert!(matches!(log.get(4), Err(Error::EntryCompacted { index: 4 })));
}

// ============================================================================
// Term delta encoding
// ============================================================================

fn count_term_fields(bytes: &[u8]) -> usize {
    let mut pos = DESCRIPTOR_SIZE;
    let mut count = 0;
    while pos < bytes.len() {
        match parse_header(&bytes[pos..]) {
            HeaderParse::Header(header) => {
                if header.term.is_some() {
                    count += 1;
                }
                pos += header.record_len() as usize;
            }
            _ => break,
        }
    }
    count
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_term_written_only_on_change(bumps in proptest::collection::vec(0u64..3, 1..60)) {
        let temp_dir = TempDir::new().unwrap();
        let mut log = open(temp_dir.path(), "terms");

        let mut terms = Vec::with_capacity(bumps.len());
        let mut term = 1;
        for (i, bump) in bumps.iter().enumerate() {
            term += bump;
            terms.push(term);
            log.append(term, command(i as u64 + 1)).unwrap();
        }
        log.flush().unwrap();

        let mut expected_fields = 0;
        let mut previous = 0;
        for term in &terms {
            if *term > previous {
                expected_fields += 1;
            }
            previous = *term;
        }
        prop_assert_eq!(count_term_fields(&tail_file(&log, temp_dir.path())), expected_fields);

        drop(log);
        let log = open(temp_dir.path(), "terms");
        for (i, term) in terms.iter().enumerate() {
            prop_assert_eq!(log.get(i as u64 + 1).unwrap().term, *term);
        }
    }
}
