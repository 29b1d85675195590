//! Core types for replog
//!
//! This crate defines the foundational types shared by the storage engine
//! and the state machine executor:
//! - Entry: closed union of log record variants (initialize, configuration, command)
//! - EntryCodec / EntryRegistry: deterministic payload codecs and type id dispatch
//! - CompactionMode: per-entry reclamation policy
//! - Indexed: an entry materialized with its index, term and record size
//! - Error: error taxonomy for log reads and writes

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod entry;
pub mod error;
pub mod indexed;

pub use entry::{
    CodecError, CommandEntry, CompactionMode, ConfigurationEntry, Entry, EntryCodec,
    EntryRegistry, EntryType, InitializeEntry, Member, MemberType, CONFIGURATION_KEY,
};
pub use error::{Error, Result};
pub use indexed::Indexed;
