//! Key-value state machine

use super::operation::{KvOperation, KvOutput};
use super::store::KeyValueStore;
use crate::commit::Commit;
use crate::error::ApplyError;
use crate::state_machine::StateMachine;
use std::sync::Arc;

/// Applies [`KvOperation`]s to a [`KeyValueStore`].
///
/// Every commit is released once the store call returns, whether it
/// succeeded or not.
pub struct KvStateMachine<K: KeyValueStore> {
    store: Arc<K>,
}

impl<K: KeyValueStore> KvStateMachine<K> {
    /// Create a machine writing to `store`
    pub fn new(store: Arc<K>) -> Self {
        KvStateMachine { store }
    }

    /// The backing store
    pub fn store(&self) -> &Arc<K> {
        &self.store
    }
}

impl<K: KeyValueStore> StateMachine for KvStateMachine<K> {
    type Operation = KvOperation;
    type Output = KvOutput;

    fn apply(&mut self, commit: Commit<KvOperation>) -> Result<KvOutput, ApplyError> {
        let output = match commit.operation() {
            KvOperation::Put { key, value } => self.store.put(key, value).map(|()| KvOutput::Ack),
            KvOperation::Get { key } => self.store.get(key).map(KvOutput::Value),
            KvOperation::Delete { key } => self.store.delete(key).map(|()| KvOutput::Ack),
        };
        commit.release();
        Ok(output?)
    }
}

impl<K: KeyValueStore> std::fmt::Debug for KvStateMachine<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvStateMachine").finish_non_exhaustive()
    }
}
