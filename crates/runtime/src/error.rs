//! Runtime error types.

use journal::JournalError;
use thiserror::Error;

use crate::awakeable::AwakeableId;

/// Errors surfaced by the durable execution primitives.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// A step failed in a way that may succeed on a later attempt.
    /// The step stays pending and is re-executed when the invocation is retried.
    #[error("Step '{step}' failed, retry later: {reason}")]
    StepRetryable { step: String, reason: String },

    /// A step failed permanently. The failure is journaled and replayed.
    #[error("Step '{step}' failed terminally: {reason}")]
    StepTerminalFailure { step: String, reason: String },

    /// An awakeable was not resolved before its deadline.
    #[error("Awakeable {0} timed out")]
    AwaitTimeout(AwakeableId),

    /// The reporter of an awakeable signalled failure instead of a payload.
    #[error("Awakeable {id} rejected: {reason}")]
    AwakeableRejected { id: AwakeableId, reason: String },

    /// No awakeable is registered under this id.
    #[error("Unknown awakeable: {0}")]
    UnknownToken(AwakeableId),

    /// Journal error.
    #[error("Journal error: {0}")]
    Journal(#[from] JournalError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RuntimeError {
    /// Returns true for errors that end the invocation once compensated.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RuntimeError::StepTerminalFailure { .. }
                | RuntimeError::AwaitTimeout(_)
                | RuntimeError::AwakeableRejected { .. }
        )
    }
}

/// Failure reported by a step action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    /// Transient failure; the step stays pending.
    #[error("retryable: {0}")]
    Retryable(String),

    /// Permanent failure; the step is recorded as failed.
    #[error("terminal: {0}")]
    Terminal(String),
}

impl ActionError {
    pub fn retryable(reason: impl Into<String>) -> Self {
        ActionError::Retryable(reason.into())
    }

    pub fn terminal(reason: impl Into<String>) -> Self {
        ActionError::Terminal(reason.into())
    }
}

impl From<RuntimeError> for ActionError {
    /// Terminal runtime failures stay terminal; anything else is worth a retry.
    fn from(err: RuntimeError) -> Self {
        if err.is_terminal() {
            ActionError::Terminal(err.to_string())
        } else {
            ActionError::Retryable(err.to_string())
        }
    }
}

/// Convenience type alias for runtime results.
pub type Result<T> = std::result::Result<T, RuntimeError>;
