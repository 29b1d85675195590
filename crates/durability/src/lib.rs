//! Storage layer for the replicated log
//!
//! This crate handles everything that touches disk:
//!
//! - Storage configuration (`StorageConfig`, TOML file support)
//! - Binary on-disk formats (segment descriptor, record layout)
//! - Segments with their writer, reader and replay
//! - The segmented log: routing, rotation, truncation and recovery
//! - Minor and major compaction driven by released entries

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod compaction; // Release tracking, rewrite planning and the background compactor
pub mod config; // Storage configuration
pub mod format; // Binary on-disk formats
pub mod log; // Segment chain, rotation, recovery
pub mod segment; // Segment storage, writer, reader, replay

pub use compaction::{
    CompactInfo, CompactionError, CompactionKind, CompactionTracker, PoolStats, SubmitError,
    TaskPriority, TrackerStats, WorkerPool,
};
pub use config::{ConfigError, StorageConfig, StorageLevel, CONFIG_FILE_NAME};
pub use format::{SegmentDescriptor, DESCRIPTOR_SIZE};
pub use log::{CompactionHandle, Log, LogReader};
pub use segment::{
    OffsetEntry, OpenError, ReplayStop, Segment, SegmentReader, SegmentRecovery, SegmentWriter,
};
