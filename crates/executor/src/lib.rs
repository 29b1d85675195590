//! State machine execution for replog
//!
//! This crate applies committed log entries to a user state machine:
//! - Commit: guard naming one committed command, released exactly once
//! - StateMachine: the contract a state machine implements
//! - Executor: walks the log up to the commit index and dispatches commands
//! - kv: example key-value state machine over a pluggable store

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod commit;
pub mod error;
pub mod executor;
pub mod kv;
pub mod state_machine;

pub use commit::{Commit, CommitMeta};
pub use error::{ApplyError, Error, Result};
pub use executor::{Applied, Executor};
pub use kv::{KeyValueStore, KvOperation, KvOutput, KvStateMachine, MemoryStore, StoreError};
pub use state_machine::StateMachine;
