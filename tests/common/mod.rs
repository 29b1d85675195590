//! Shared test utilities for the root integration suites.
//!
//! Import via `mod common;` from any test file.

#![allow(dead_code)]

use replog::{KvOperation, Log, StorageConfig};
use std::path::Path;
use std::sync::Once;
use std::time::{Duration, Instant};

static INIT_TRACING: Once = Once::new();

/// Route `tracing` output through the test harness so it shows up only for
/// failing tests.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_test_writer()
            .try_init();
    });
}

/// Small-segment configuration rooted at `dir`
pub fn config(dir: &Path) -> StorageConfig {
    StorageConfig::for_testing(dir)
}

/// Open `name` under `dir` with the testing configuration
pub fn open_log(dir: &Path, name: &str) -> Log {
    init_tracing();
    Log::open(name, config(dir)).unwrap()
}

pub fn put(key: &str, value: &str) -> KvOperation {
    KvOperation::Put {
        key: key.as_bytes().to_vec(),
        value: value.as_bytes().to_vec(),
    }
}

pub fn get(key: &str) -> KvOperation {
    KvOperation::Get {
        key: key.as_bytes().to_vec(),
    }
}

pub fn delete(key: &str) -> KvOperation {
    KvOperation::Delete {
        key: key.as_bytes().to_vec(),
    }
}

/// Append `op` as a command in `term`, using the index as sequence number
pub fn submit(log: &mut Log, term: u64, op: &KvOperation) -> u64 {
    let sequence = log.next_index();
    log.append(term, op.to_command(1, sequence, sequence).unwrap())
        .unwrap()
        .index
}

/// Poll `condition` every 10ms until it holds or `timeout` elapses
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}
