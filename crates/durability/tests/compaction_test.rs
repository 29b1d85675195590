//! Compaction Tests
//!
//! Minor and major passes end to end:
//!
//! - Released entries under the watermark disappear, everything else stays
//! - Minor keeps segment boundaries and bumps the version
//! - Major merges sparse adjacent segments
//! - Recovery discards files left behind by an interrupted swap
//! - Compaction running alongside appends never reclaims above the watermark

use replog_core::{CommandEntry, CompactionMode, Error};
use replog_durability::{CompactionKind, Log, StorageConfig};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn released(n: u64) -> CommandEntry {
    CommandEntry::new(1, n, n, CompactionMode::Release, vec![n as u8; 24])
}

fn keyed(n: u64, key: &str, mode: CompactionMode) -> CommandEntry {
    CommandEntry::new(1, n, n, mode, vec![n as u8; 24]).with_key(key)
}

fn open(dir: &Path) -> Log {
    Log::open("compact", StorageConfig::for_testing(dir)).unwrap()
}

/// 130 entries: two sealed segments of 64 and a tail holding 129..=130.
fn filled(dir: &Path) -> Log {
    let mut log = open(dir);
    for i in 1..=130 {
        log.append(1, released(i)).unwrap();
    }
    assert_eq!(log.segment_count(), 3);
    log
}

// ============================================================================
// Minor
// ============================================================================

#[test]
fn test_minor_reclaims_released_entries() {
    let temp_dir = TempDir::new().unwrap();
    let log = filled(temp_dir.path());
    for i in 1..=10 {
        log.release(i, CompactionMode::Release, None);
    }
    log.commit(130);

    let info = log.compact(CompactionKind::Minor).unwrap();
    assert!(info.did_compact());
    assert_eq!(info.segments_written, 1);
    assert_eq!(info.entries_reclaimed, 10);
    assert!(info.reclaimed_bytes > 0);

    assert!(matches!(log.get(5), Err(Error::EntryCompacted { index: 5 })));
    assert_eq!(log.get(11).unwrap().index, 11);

    let descriptors = log.segment_descriptors();
    assert_eq!(descriptors.len(), 3);
    assert_eq!(descriptors[0].id, 1);
    assert_eq!(descriptors[0].version, 2);
    assert_eq!(descriptors[0].starting_index, 1);
    assert_eq!(descriptors[0].end_index, 64);
    assert_eq!(log.tracker().stats().reclaimed_total, 10);
}

#[test]
fn test_minor_respects_commit_watermark() {
    let temp_dir = TempDir::new().unwrap();
    let log = filled(temp_dir.path());
    for i in 1..=10 {
        log.release(i, CompactionMode::Release, None);
    }
    log.commit(5);

    let info = log.compact(CompactionKind::Minor).unwrap();
    assert_eq!(info.entries_reclaimed, 5);
    assert!(!log.contains(5));
    assert!(log.contains(6));
}

#[test]
fn test_minor_never_touches_tail() {
    let temp_dir = TempDir::new().unwrap();
    let log = filled(temp_dir.path());
    log.release(129, CompactionMode::Release, None);
    log.commit(130);

    let info = log.compact(CompactionKind::Minor).unwrap();
    assert!(!info.did_compact());
    assert!(log.contains(129));
}

#[test]
fn test_quorum_keeps_latest_value() {
    let temp_dir = TempDir::new().unwrap();
    let mut log = open(temp_dir.path());
    for i in 1..=70 {
        log.append(1, keyed(i, "counter", CompactionMode::Quorum)).unwrap();
    }
    for i in 1..=64 {
        log.release(i, CompactionMode::Quorum, Some(b"counter"));
    }
    log.commit(70);

    // Entry 64 is the newest released value for the key
    let info = log.compact(CompactionKind::Minor).unwrap();
    assert_eq!(info.entries_reclaimed, 63);
    assert!(log.contains(64));
    assert!(!log.contains(63));
}

#[test]
fn test_tombstone_outlives_earlier_entries() {
    let temp_dir = TempDir::new().unwrap();
    let mut log = open(temp_dir.path());
    log.append(1, keyed(1, "k", CompactionMode::Quorum)).unwrap();
    log.append(1, keyed(2, "k", CompactionMode::Tombstone)).unwrap();
    for i in 3..=64 {
        log.append(1, released(i)).unwrap();
    }
    log.release(1, CompactionMode::Quorum, Some(b"k"));
    log.release(2, CompactionMode::Tombstone, Some(b"k"));
    log.commit(64);
    log.set_major_index(64);

    log.compact(CompactionKind::Minor).unwrap();
    assert!(!log.contains(1));
    assert!(log.contains(2));

    log.compact(CompactionKind::Minor).unwrap();
    assert!(!log.contains(2));
}

#[test]
fn test_tombstone_waits_for_unreleased_put() {
    let temp_dir = TempDir::new().unwrap();
    {
        let mut log = open(temp_dir.path());
        log.append(1, keyed(1, "k", CompactionMode::Quorum)).unwrap();
        log.append(1, keyed(2, "k", CompactionMode::Tombstone)).unwrap();
        for i in 3..=65 {
            log.append(1, released(i)).unwrap();
        }
        log.flush().unwrap();
    }

    // After a restart nothing is released yet, but the put is on disk
    let log = open(temp_dir.path());
    log.release(2, CompactionMode::Tombstone, Some(b"k"));
    for i in 3..=64 {
        log.release(i, CompactionMode::Release, None);
    }
    log.commit(65);
    log.set_major_index(65);

    log.compact(CompactionKind::Minor).unwrap();
    assert!(log.contains(1));
    assert!(log.contains(2));
    assert!(!log.contains(3));

    log.release(1, CompactionMode::Quorum, Some(b"k"));
    log.compact(CompactionKind::Minor).unwrap();
    assert!(!log.contains(1));
    assert!(log.contains(2));

    log.compact(CompactionKind::Minor).unwrap();
    assert!(!log.contains(2));
}

// ============================================================================
// Major
// ============================================================================

#[test]
fn test_major_merges_sparse_segments() {
    let temp_dir = TempDir::new().unwrap();
    {
        let log = filled(temp_dir.path());
        for i in 1..=100 {
            log.release(i, CompactionMode::Release, None);
        }
        log.commit(130);
        log.set_major_index(128);

        let info = log.compact(CompactionKind::Major).unwrap();
        assert_eq!(info.segments_written, 1);
        assert_eq!(info.segments_replaced, 2);
        assert_eq!(info.entries_reclaimed, 100);

        let descriptors = log.segment_descriptors();
        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[0].starting_index, 1);
        assert_eq!(descriptors[0].end_index, 128);
        assert_eq!(descriptors[0].version, 2);
        assert_eq!(descriptors[1].starting_index, 129);

        let indices: Vec<u64> = log.reader(1).map(|r| r.unwrap().index).collect();
        assert_eq!(indices, (101..=130).collect::<Vec<_>>());
    }

    let log = open(temp_dir.path());
    assert_eq!(log.segment_count(), 2);
    assert!(matches!(log.get(50), Err(Error::EntryCompacted { .. })));
    assert_eq!(log.get(101).unwrap().index, 101);
    assert_eq!(log.last_index(), 130);
}

#[test]
fn test_major_skips_dense_segments() {
    let temp_dir = TempDir::new().unwrap();
    let log = filled(temp_dir.path());
    // 10 of 64 is below the 0.5 threshold
    for i in 1..=10 {
        log.release(i, CompactionMode::Release, None);
    }
    log.commit(130);
    log.set_major_index(130);

    let info = log.compact(CompactionKind::Major).unwrap();
    assert!(!info.did_compact());
    assert!(log.contains(1));
}

#[test]
fn test_full_mode_is_major_only() {
    let temp_dir = TempDir::new().unwrap();
    let log = filled(temp_dir.path());
    for i in 1..=64 {
        log.release(i, CompactionMode::Full, None);
    }
    log.commit(130);
    log.set_major_index(130);

    assert!(!log.compact(CompactionKind::Minor).unwrap().did_compact());
    let info = log.compact(CompactionKind::Major).unwrap();
    assert_eq!(info.entries_reclaimed, 64);
}

// ============================================================================
// Recovery after interrupted swaps
// ============================================================================

#[test]
fn test_recovery_drops_stale_merge_sources() {
    let temp_dir = TempDir::new().unwrap();
    let backup_dir = TempDir::new().unwrap();
    let second_file = {
        let log = filled(temp_dir.path());
        let second = log.segment_descriptors()[1].file_name("compact");
        std::fs::copy(temp_dir.path().join(&second), backup_dir.path().join(&second)).unwrap();

        for i in 1..=128 {
            log.release(i, CompactionMode::Release, None);
        }
        log.commit(130);
        log.set_major_index(128);
        log.compact(CompactionKind::Major).unwrap();
        second
    };
    assert!(!temp_dir.path().join(&second_file).exists());

    // The crash happened before the merged-away source was deleted
    std::fs::copy(backup_dir.path().join(&second_file), temp_dir.path().join(&second_file))
        .unwrap();

    let log = open(temp_dir.path());
    assert!(!temp_dir.path().join(&second_file).exists());
    assert_eq!(log.segment_count(), 2);
    assert!(!log.contains(70));
    assert_eq!(log.get(129).unwrap().index, 129);
}

#[test]
fn test_recovery_drops_superseded_minor_version() {
    let temp_dir = TempDir::new().unwrap();
    let backup_dir = TempDir::new().unwrap();
    let first_file = {
        let log = filled(temp_dir.path());
        let first = log.segment_descriptors()[0].file_name("compact");
        std::fs::copy(temp_dir.path().join(&first), backup_dir.path().join(&first)).unwrap();
        for i in 1..=5 {
            log.release(i, CompactionMode::Release, None);
        }
        log.commit(130);
        log.compact(CompactionKind::Minor).unwrap();
        first
    };
    std::fs::copy(backup_dir.path().join(&first_file), temp_dir.path().join(&first_file)).unwrap();

    let log = open(temp_dir.path());
    assert!(!temp_dir.path().join(&first_file).exists());
    assert_eq!(log.segment_descriptors()[0].version, 2);
    assert!(!log.contains(3));
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn test_concurrent_minor_compaction_while_appending() {
    let temp_dir = TempDir::new().unwrap();
    let mut log = open(temp_dir.path());
    let handle = log.compaction_handle();
    let done = Arc::new(AtomicBool::new(false));

    let compactor = {
        let done = Arc::clone(&done);
        std::thread::spawn(move || {
            let mut passes = 0;
            while !done.load(Ordering::Acquire) {
                if handle.compact(CompactionKind::Minor).is_ok() {
                    passes += 1;
                }
                std::thread::sleep(Duration::from_millis(1));
            }
            passes
        })
    };

    let lag = 20;
    for i in 1..=600u64 {
        let started = Instant::now();
        log.append(1, released(i)).unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        if i > lag {
            log.release(i - lag, CompactionMode::Release, None);
            log.commit(i - lag);
        }
    }
    done.store(true, Ordering::Release);
    let passes = compactor.join().unwrap();
    assert!(passes > 0);

    let commit = log.commit_index();
    for index in commit + 1..=log.last_index() {
        assert_eq!(log.get(index).unwrap().index, index);
    }

    log.compact(CompactionKind::Minor).unwrap();
    let sealed_end = log.segment_descriptors().iter().rev().nth(1).unwrap().end_index;
    for index in 1..=sealed_end.min(commit) {
        assert!(!log.contains(index), "index {} should be reclaimed", index);
    }
}

#[test]
fn test_background_minor_compaction() {
    let temp_dir = TempDir::new().unwrap();
    let config = StorageConfig::for_testing(temp_dir.path())
        .with_minor_compaction_interval(Duration::from_millis(20));
    let mut log = Log::open("background", config).unwrap();
    for i in 1..=70 {
        log.append(1, released(i)).unwrap();
    }
    for i in 1..=64 {
        log.release(i, CompactionMode::Release, None);
    }
    log.commit(70);

    let deadline = Instant::now() + Duration::from_secs(10);
    let pending = |log: &Log| {
        log.segment_descriptors()[0].version == 1 || log.pool_stats().unwrap().tasks_completed == 0
    };
    while pending(&log) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(log.segment_descriptors()[0].version, 2);
    assert!(!log.contains(1));
    assert!(log.contains(65));
    assert!(log.pool_stats().unwrap().tasks_completed >= 1);
}

#[test]
fn test_compaction_after_close_is_cancelled() {
    let temp_dir = TempDir::new().unwrap();
    let mut log = filled(temp_dir.path());
    let handle = log.compaction_handle();
    log.close().unwrap();
    assert!(handle.compact(CompactionKind::Minor).is_err());
}
