//! Error types for applying committed entries.
//!
//! Two levels:
//! - [`ApplyError`]: one entry failed to apply. Reported per index, never
//!   stops the apply loop.
//! - [`Error`]: the executor could not read the log. Stops the apply loop.

use crate::kv::StoreError;

/// Result type alias for executor operations
pub type Result<T> = std::result::Result<T, Error>;

/// Failure applying a single committed entry.
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    /// Command payload could not be decoded as the machine's operation type
    #[error("failed to decode operation at index {index}: {message}")]
    Decode {
        /// Log index of the command
        index: u64,
        /// Decoder message
        message: String,
    },

    /// The external store rejected the operation
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The operation is not valid for the machine's current state
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

/// Executor-level failure.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Reading the log failed
    #[error("log error: {0}")]
    Log(#[from] replog_core::Error),
}
