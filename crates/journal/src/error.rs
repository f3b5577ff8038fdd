use thiserror::Error;

use crate::{InvocationId, StepKey, Version};

/// Errors that can occur when interacting with the journal.
#[derive(Debug, Error)]
pub enum JournalError {
    /// A concurrency conflict occurred when appending invocation events.
    /// The expected version did not match the actual version.
    #[error(
        "Concurrency conflict for invocation {invocation_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        invocation_id: InvocationId,
        expected: Version,
        actual: Version,
    },

    /// A finished step record cannot be overwritten.
    #[error("Step '{}' of invocation {} is already recorded", .0.step, .0.invocation_id)]
    StepAlreadyRecorded(StepKey),

    /// The events handed to `append_events` are malformed.
    #[error("Invalid append: {0}")]
    InvalidAppend(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for journal operations.
pub type Result<T> = std::result::Result<T, JournalError>;
