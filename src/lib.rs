//! replog - segmented replicated-log storage and state machine execution
//!
//! replog stores the entries of a Raft-style consensus log in rotating
//! segment files, reclaims entries once the state machine has released them,
//! and applies committed commands to a pluggable state machine.
//!
//! # Quick Start
//!
//! ```ignore
//! use replog::{Executor, KvOperation, KvStateMachine, Log, MemoryStore, StorageConfig};
//! use std::sync::Arc;
//!
//! let mut log = Log::open("kv", StorageConfig::default().with_directory("/var/lib/replog"))?;
//! let put = KvOperation::Put { key: b"k".to_vec(), value: b"v".to_vec() };
//! let entry = log.append(1, put.to_command(1, 1, 0)?)?;
//! log.commit(entry.index);
//!
//! let mut executor = Executor::new(KvStateMachine::new(Arc::new(MemoryStore::new())));
//! executor.apply(&log)?;
//! ```
//!
//! # Architecture
//!
//! - `replog-core`: entry model, codecs and the error taxonomy
//! - `replog-durability`: segments, the log router, recovery and compaction
//! - `replog-executor`: commit guards, the executor and the example KV machine

pub use replog_core::{
    CommandEntry, CompactionMode, ConfigurationEntry, Entry, EntryRegistry, EntryType, Error,
    Indexed, InitializeEntry, Member, MemberType, Result,
};
pub use replog_durability::{
    CompactInfo, CompactionError, CompactionHandle, CompactionKind, Log, LogReader,
    StorageConfig, StorageLevel,
};
pub use replog_executor::{
    Applied, ApplyError, Commit, Executor, KeyValueStore, KvOperation, KvOutput, KvStateMachine,
    MemoryStore, StateMachine, StoreError,
};

