//! Compaction modes
//!
//! Each entry carries a policy tag deciding when, after the state machine
//! releases it, the entry may be physically reclaimed from the log.

use serde::{Deserialize, Serialize};

/// Per-entry reclamation policy.
///
/// | Mode | Reclaimable when |
/// |------|------------------|
/// | Release | released and committed |
/// | Quorum | superseded for its key by a released, committed entry |
/// | Sequential | superseded for its key by an entry applied on every member |
/// | Full | released and applied on every member (major compaction only) |
/// | Tombstone | released, applied on every member, no earlier live entry for its key |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactionMode {
    /// Reclaimable as soon as the state machine releases it
    Release,
    /// Reclaimable once a newer entry for the same key is committed
    Quorum,
    /// Reclaimable once a newer entry for the same key is applied everywhere
    Sequential,
    /// Reclaimable only by major compaction
    Full,
    /// Deletion marker; outlives every earlier entry for its key
    Tombstone,
}

impl CompactionMode {
    /// Convert to byte representation
    pub fn to_byte(self) -> u8 {
        match self {
            CompactionMode::Release => 0x01,
            CompactionMode::Quorum => 0x02,
            CompactionMode::Sequential => 0x03,
            CompactionMode::Full => 0x04,
            CompactionMode::Tombstone => 0x05,
        }
    }

    /// Parse from byte representation
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(CompactionMode::Release),
            0x02 => Some(CompactionMode::Quorum),
            0x03 => Some(CompactionMode::Sequential),
            0x04 => Some(CompactionMode::Full),
            0x05 => Some(CompactionMode::Tombstone),
            _ => None,
        }
    }

    /// Get human-readable name
    pub fn name(self) -> &'static str {
        match self {
            CompactionMode::Release => "release",
            CompactionMode::Quorum => "quorum",
            CompactionMode::Sequential => "sequential",
            CompactionMode::Full => "full",
            CompactionMode::Tombstone => "tombstone",
        }
    }

    /// Whether reclamation depends on a newer entry for the same key
    pub fn is_keyed(self) -> bool {
        matches!(
            self,
            CompactionMode::Quorum | CompactionMode::Sequential | CompactionMode::Tombstone
        )
    }
}

impl std::fmt::Display for CompactionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
