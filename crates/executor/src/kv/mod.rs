//! Example key-value state machine.
//!
//! Operations are encoded with MessagePack into command payloads. Writes
//! carry the key as their compaction key so superseded values can be
//! reclaimed: `Put` uses quorum compaction, `Delete` leaves a tombstone,
//! and `Get` is released as soon as it is answered.

mod machine;
mod operation;
mod store;

pub use machine::KvStateMachine;
pub use operation::{KvOperation, KvOutput};
pub use store::{KeyValueStore, MemoryStore, StoreError};
