//! Log entry model
//!
//! An [`Entry`] is a closed union over the variants the log knows how to
//! store. Each variant owns a deterministic payload codec
//! ([`EntryCodec`]); the [`EntryRegistry`] maps on-disk type ids back to
//! those codecs.

mod codec;
mod command;
mod configuration;
mod initialize;
mod mode;
mod registry;

pub use codec::{CodecError, EntryCodec};
pub use command::CommandEntry;
pub use configuration::{ConfigurationEntry, Member, MemberType, CONFIGURATION_KEY};
pub use initialize::InitializeEntry;
pub use mode::CompactionMode;
pub use registry::EntryRegistry;

/// On-disk entry type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum EntryType {
    /// Leader term start marker
    Initialize = 1,
    /// Cluster membership change
    Configuration = 2,
    /// Client command
    Command = 3,
}

impl EntryType {
    /// All built-in entry types
    pub const ALL: [EntryType; 3] = [
        EntryType::Initialize,
        EntryType::Configuration,
        EntryType::Command,
    ];

    /// Wire id
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Parse a wire id
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(EntryType::Initialize),
            2 => Some(EntryType::Configuration),
            3 => Some(EntryType::Command),
            _ => None,
        }
    }
}

/// One logical log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    /// Leader term start marker
    Initialize(InitializeEntry),
    /// Cluster membership change
    Configuration(ConfigurationEntry),
    /// Client command
    Command(CommandEntry),
}

impl Entry {
    /// Type tag of this entry
    pub fn entry_type(&self) -> EntryType {
        match self {
            Entry::Initialize(_) => EntryType::Initialize,
            Entry::Configuration(_) => EntryType::Configuration,
            Entry::Command(_) => EntryType::Command,
        }
    }

    /// Reclamation policy of this entry
    pub fn compaction_mode(&self) -> CompactionMode {
        match self {
            Entry::Initialize(_) => CompactionMode::Release,
            Entry::Configuration(_) => CompactionMode::Quorum,
            Entry::Command(cmd) => cmd.mode,
        }
    }

    /// Key under which newer entries supersede this one, if any
    pub fn compaction_key(&self) -> Option<&[u8]> {
        match self {
            Entry::Initialize(_) => None,
            Entry::Configuration(_) => Some(CONFIGURATION_KEY),
            Entry::Command(cmd) => cmd.key.as_deref(),
        }
    }

    /// Leader timestamp carried by every variant
    pub fn timestamp(&self) -> u64 {
        match self {
            Entry::Initialize(e) => e.timestamp,
            Entry::Configuration(e) => e.timestamp,
            Entry::Command(e) => e.timestamp,
        }
    }
}

impl From<InitializeEntry> for Entry {
    fn from(e: InitializeEntry) -> Self {
        Entry::Initialize(e)
    }
}

impl From<ConfigurationEntry> for Entry {
    fn from(e: ConfigurationEntry) -> Self {
        Entry::Configuration(e)
    }
}

impl From<CommandEntry> for Entry {
    fn from(e: CommandEntry) -> Self {
        Entry::Command(e)
    }
}
