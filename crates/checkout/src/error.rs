//! Checkout error types.

use common::InvocationId;
use journal::JournalError;
use runtime::{CompensationFailure, RuntimeError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why an invocation ended in a terminal failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// A journaled step failed in a non-retryable way, or the payment
    /// reporter rejected the awakeable.
    StepTerminalFailure,
    /// The payment outcome was not reported before the deadline.
    AwaitTimeout,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::StepTerminalFailure => "StepTerminalFailure",
            FailureKind::AwaitTimeout => "AwaitTimeout",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by a checkout invocation.
///
/// A ticket that is not available is not an error: the checkout returns `Ok(false)`.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// The invocation ended for good after its compensations ran.
    /// Failed compensations are reported alongside the primary failure.
    #[error("Checkout failed ({kind}): {reason}")]
    Terminal {
        kind: FailureKind,
        reason: String,
        compensation_failures: Vec<CompensationFailure>,
    },

    /// A step failed transiently; re-invoke with the same invocation id.
    #[error("Checkout step '{step}' must be retried: {reason}")]
    Retry { step: String, reason: String },

    /// The invocation id is already bound to another ticket.
    #[error("Invocation {invocation_id} belongs to ticket '{expected}', not '{actual}'")]
    InvocationMismatch {
        invocation_id: InvocationId,
        expected: String,
        actual: String,
    },

    /// Runtime error.
    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// Journal error.
    #[error("Journal error: {0}")]
    Journal(#[from] JournalError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CheckoutError {
    /// Returns true if re-invoking the same invocation id cannot change the outcome.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CheckoutError::Terminal { .. } | CheckoutError::InvocationMismatch { .. }
        )
    }

    /// Returns the failures collected while compensating, if any.
    pub fn compensation_failures(&self) -> &[CompensationFailure] {
        match self {
            CheckoutError::Terminal {
                compensation_failures,
                ..
            } => compensation_failures,
            _ => &[],
        }
    }
}

/// Convenience type alias for checkout results.
pub type Result<T> = std::result::Result<T, CheckoutError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_display_and_failures() {
        let err = CheckoutError::Terminal {
            kind: FailureKind::AwaitTimeout,
            reason: "Awakeable awk_1 timed out".into(),
            compensation_failures: vec![CompensationFailure {
                label: "abort-payment".into(),
                reason: "provider down".into(),
            }],
        };

        assert!(err.is_terminal());
        assert_eq!(
            err.to_string(),
            "Checkout failed (AwaitTimeout): Awakeable awk_1 timed out"
        );
        assert_eq!(err.compensation_failures().len(), 1);
    }

    #[test]
    fn test_retry_is_not_terminal() {
        let err = CheckoutError::Retry {
            step: "payment".into(),
            reason: "503".into(),
        };
        assert!(!err.is_terminal());
        assert!(err.compensation_failures().is_empty());
    }

    #[test]
    fn test_failure_kind_serialization() {
        let json = serde_json::to_string(&FailureKind::StepTerminalFailure).unwrap();
        assert_eq!(json, "\"StepTerminalFailure\"");
    }
}
