//! Backing store collaborator for the key-value state machine

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io;

/// Store-specific failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// I/O failure in the backing store
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The store cannot serve requests right now
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// External key-value storage written by [`super::KvStateMachine`].
pub trait KeyValueStore: Send + Sync {
    /// Read `key`
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;
    /// Write `key`
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;
    /// Remove `key`; removing an absent key succeeds
    fn delete(&self, key: &[u8]) -> Result<(), StoreError>;
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Whether the store holds no keys
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.data.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.data.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.data.write().remove(key);
        Ok(())
    }
}
