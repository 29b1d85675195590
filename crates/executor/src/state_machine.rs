//! State machine contract.

use crate::commit::Commit;
use crate::error::ApplyError;
use serde::de::DeserializeOwned;

/// A deterministic state machine fed by committed commands.
///
/// `apply` receives each command exactly once, in index order. The commit
/// is released when it drops; handlers may release earlier once their
/// effects are durable.
pub trait StateMachine {
    /// Operation type commands decode into
    type Operation: DeserializeOwned;
    /// Value relayed back to the client
    type Output;

    /// Apply one committed operation.
    fn apply(&mut self, commit: Commit<Self::Operation>) -> Result<Self::Output, ApplyError>;
}
