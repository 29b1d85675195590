//! Key-value operations and their command encoding

use replog_core::{CommandEntry, CompactionMode};
use serde::{Deserialize, Serialize};

/// A client request against the key-value store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KvOperation {
    /// Set `key` to `value`
    Put {
        /// Key
        key: Vec<u8>,
        /// Value
        value: Vec<u8>,
    },
    /// Read `key`
    Get {
        /// Key
        key: Vec<u8>,
    },
    /// Remove `key`
    Delete {
        /// Key
        key: Vec<u8>,
    },
}

impl KvOperation {
    /// Reclamation policy for commands carrying this operation
    pub fn compaction_mode(&self) -> CompactionMode {
        match self {
            KvOperation::Put { .. } => CompactionMode::Quorum,
            KvOperation::Get { .. } => CompactionMode::Release,
            KvOperation::Delete { .. } => CompactionMode::Tombstone,
        }
    }

    /// Key the operation touches
    pub fn key(&self) -> &[u8] {
        match self {
            KvOperation::Put { key, .. }
            | KvOperation::Get { key }
            | KvOperation::Delete { key } => key,
        }
    }

    /// Build the log command for this operation.
    ///
    /// Keyed modes attach the key so later writes supersede earlier ones.
    pub fn to_command(
        &self,
        session: u64,
        sequence: u64,
        timestamp: u64,
    ) -> Result<CommandEntry, rmp_serde::encode::Error> {
        let mode = self.compaction_mode();
        let command = CommandEntry::new(session, sequence, timestamp, mode, rmp_serde::to_vec(self)?);
        Ok(if mode.is_keyed() {
            command.with_key(self.key())
        } else {
            command
        })
    }
}

/// Value returned to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KvOutput {
    /// Write acknowledged
    Ack,
    /// Read result
    Value(Option<Vec<u8>>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modes() {
        let put = KvOperation::Put {
            key: b"a".to_vec(),
            value: b"1".to_vec(),
        };
        let get = KvOperation::Get { key: b"a".to_vec() };
        let delete = KvOperation::Delete { key: b"a".to_vec() };
        assert_eq!(put.compaction_mode(), CompactionMode::Quorum);
        assert_eq!(get.compaction_mode(), CompactionMode::Release);
        assert_eq!(delete.compaction_mode(), CompactionMode::Tombstone);
    }

    #[test]
    fn test_to_command_keys_writes_only() {
        let put = KvOperation::Put {
            key: b"a".to_vec(),
            value: b"1".to_vec(),
        };
        let command = put.to_command(3, 4, 5).unwrap();
        assert_eq!(command.session, 3);
        assert_eq!(command.sequence, 4);
        assert_eq!(command.key.as_deref(), Some(&b"a"[..]));
        let decoded: KvOperation = rmp_serde::from_slice(&command.operation).unwrap();
        assert_eq!(decoded, put);

        let get = KvOperation::Get { key: b"a".to_vec() };
        assert!(get.to_command(3, 5, 6).unwrap().key.is_none());
    }
}
