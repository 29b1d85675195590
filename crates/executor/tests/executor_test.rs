//! Executor Tests
//!
//! The key-value machine driven from a real log:
//!
//! - Committed operations reach the store in index order
//! - Store failures are reported per index and the commit is still released
//! - Released writes make superseded values reclaimable by compaction
//! - A restarted executor resumes from its applied index

use replog_core::CompactionMode;
use replog_durability::{CompactionKind, Log, StorageConfig};
use replog_executor::{
    ApplyError, Executor, KeyValueStore, KvOperation, KvOutput, KvStateMachine, MemoryStore,
    StoreError,
};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

fn put(key: &str, value: &str) -> KvOperation {
    KvOperation::Put {
        key: key.as_bytes().to_vec(),
        value: value.as_bytes().to_vec(),
    }
}

fn get(key: &str) -> KvOperation {
    KvOperation::Get {
        key: key.as_bytes().to_vec(),
    }
}

fn delete(key: &str) -> KvOperation {
    KvOperation::Delete {
        key: key.as_bytes().to_vec(),
    }
}

fn open(dir: &Path) -> Log {
    Log::open("kv", StorageConfig::for_testing(dir)).unwrap()
}

fn submit(log: &mut Log, ops: &[KvOperation]) {
    for op in ops {
        let sequence = log.next_index();
        log.append(1, op.to_command(1, sequence, sequence).unwrap())
            .unwrap();
    }
}

/// Store whose writes fail while `failing` is set
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    failing: AtomicBool,
}

impl KeyValueStore for FlakyStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.get(key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        if self.failing.load(Ordering::Acquire) {
            return Err(StoreError::Unavailable("write rejected".into()));
        }
        self.inner.put(key, value)
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.inner.delete(key)
    }
}

#[test]
fn test_operations_applied_in_order() {
    let temp_dir = TempDir::new().unwrap();
    let mut log = open(temp_dir.path());
    submit(
        &mut log,
        &[put("a", "1"), put("b", "2"), get("a"), delete("a"), get("a"), get("b")],
    );
    log.commit(log.last_index());

    let store = Arc::new(MemoryStore::new());
    let mut executor = Executor::new(KvStateMachine::new(Arc::clone(&store)));
    let outputs: Vec<KvOutput> = executor
        .apply(&log)
        .unwrap()
        .into_iter()
        .map(|a| a.result.unwrap())
        .collect();

    assert_eq!(
        outputs,
        vec![
            KvOutput::Ack,
            KvOutput::Ack,
            KvOutput::Value(Some(b"1".to_vec())),
            KvOutput::Ack,
            KvOutput::Value(None),
            KvOutput::Value(Some(b"2".to_vec())),
        ]
    );
    assert_eq!(store.len(), 1);
    assert_eq!(executor.last_applied(), 6);
    for index in 1..=6 {
        assert!(log.tracker().is_released(index));
    }
}

#[test]
fn test_store_failure_reported_and_released() {
    let temp_dir = TempDir::new().unwrap();
    let mut log = open(temp_dir.path());
    submit(&mut log, &[put("a", "1"), put("a", "2"), put("a", "3")]);
    log.commit(3);

    let store = Arc::new(FlakyStore::default());
    let mut executor = Executor::new(KvStateMachine::new(Arc::clone(&store)));

    store.failing.store(true, Ordering::Release);
    let applied = executor.apply(&log).unwrap();
    assert_eq!(applied.len(), 3);
    for a in &applied {
        assert!(matches!(a.result, Err(ApplyError::Store(StoreError::Unavailable(_)))));
        assert!(log.tracker().is_released(a.index));
    }
    assert_eq!(store.get(b"a").unwrap(), None);

    // The loop kept going and later commands still apply
    store.failing.store(false, Ordering::Release);
    submit(&mut log, &[put("a", "4")]);
    log.commit(4);
    let applied = executor.apply(&log).unwrap();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].result.as_ref().unwrap(), &KvOutput::Ack);
    assert_eq!(store.get(b"a").unwrap(), Some(b"4".to_vec()));
}

#[test]
fn test_superseded_writes_compacted() {
    let temp_dir = TempDir::new().unwrap();
    let mut log = open(temp_dir.path());
    // Fill the first segment with overwrites of one key, then one more
    // write so the segment seals
    for i in 1..=65 {
        submit(&mut log, &[put("hot", &i.to_string())]);
    }
    assert_eq!(log.segment_count(), 2);
    log.commit(65);

    let store = Arc::new(MemoryStore::new());
    let mut executor = Executor::new(KvStateMachine::new(Arc::clone(&store)));
    executor.apply(&log).unwrap();

    let info = log.compact(CompactionKind::Minor).unwrap();
    assert_eq!(info.entries_reclaimed, 64);
    assert!(!log.contains(1));
    assert!(!log.contains(64));
    assert!(log.contains(65));
    assert_eq!(store.get(b"hot").unwrap(), Some(b"65".to_vec()));
}

#[test]
fn test_tombstone_kept_until_major_watermark() {
    let temp_dir = TempDir::new().unwrap();
    let mut log = open(temp_dir.path());
    submit(&mut log, &[put("k", "v"), delete("k")]);
    for i in 3..=64 {
        submit(&mut log, &[get(&format!("g{}", i))]);
    }
    submit(&mut log, &[get("tail")]);
    log.commit(65);

    let store = Arc::new(MemoryStore::new());
    let mut executor = Executor::new(KvStateMachine::new(store));
    executor.apply(&log).unwrap();
    assert_eq!(log.get(2).unwrap().compaction_mode(), CompactionMode::Tombstone);

    log.compact(CompactionKind::Minor).unwrap();
    assert!(!log.contains(1));
    assert!(log.contains(2));

    log.set_major_index(65);
    log.compact(CompactionKind::Minor).unwrap();
    assert!(!log.contains(2));
}

#[test]
fn test_executor_resumes_after_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let applied_before = {
        let mut log = open(temp_dir.path());
        submit(&mut log, &[put("a", "1"), put("b", "2")]);
        log.commit(2);
        let mut executor = Executor::new(KvStateMachine::new(Arc::clone(&store)));
        executor.apply(&log).unwrap();
        executor.last_applied()
    };

    let mut log = open(temp_dir.path());
    submit(&mut log, &[delete("a")]);
    log.commit(3);
    let mut executor = Executor::resume(KvStateMachine::new(Arc::clone(&store)), applied_before);
    let applied = executor.apply(&log).unwrap();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].index, 3);
    assert_eq!(store.get(b"a").unwrap(), None);
    assert_eq!(store.get(b"b").unwrap(), Some(b"2".to_vec()));
}
