//! Step records: the memoization log of side-effecting actions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::InvocationId;

/// Identifies one journaled step: a step name within an invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepKey {
    pub invocation_id: InvocationId,
    pub step: String,
}

impl StepKey {
    pub fn new(invocation_id: InvocationId, step: impl Into<String>) -> Self {
        Self {
            invocation_id,
            step: step.into(),
        }
    }
}

impl std::fmt::Display for StepKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.invocation_id, self.step)
    }
}

/// Lifecycle of a step record.
///
/// ```text
/// Pending ──┬──► Completed
///           └──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepStatus {
    /// The action has been started at least once but has no recorded outcome.
    Pending,
    /// The action succeeded; its payload is final.
    Completed,
    /// The action failed terminally; the failure is final.
    Failed,
}

impl StepStatus {
    /// Returns true if the record can no longer change.
    pub fn is_final(&self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Failed)
    }
}

/// The stored outcome of a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub status: StepStatus,
    /// Result payload, set when `Completed`.
    pub payload: Option<serde_json::Value>,
    /// Failure description, set when `Failed` (and on retryable attempts).
    pub error: Option<String>,
    /// Number of times the action has been executed.
    pub attempts: u32,
    pub recorded_at: DateTime<Utc>,
}

impl StepRecord {
    /// A step that is about to run its first attempt.
    pub fn pending() -> Self {
        Self {
            status: StepStatus::Pending,
            payload: None,
            error: None,
            attempts: 0,
            recorded_at: Utc::now(),
        }
    }

    /// Counts a new execution of the action.
    pub fn begin_attempt(mut self) -> Self {
        self.attempts += 1;
        self.recorded_at = Utc::now();
        self
    }

    /// Keeps the step pending after a failure that may succeed on retry.
    pub fn retryable_failure(self, error: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Pending,
            error: Some(error.into()),
            recorded_at: Utc::now(),
            ..self
        }
    }

    pub fn completed(self, payload: serde_json::Value) -> Self {
        Self {
            status: StepStatus::Completed,
            payload: Some(payload),
            error: None,
            recorded_at: Utc::now(),
            ..self
        }
    }

    pub fn failed(self, error: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Failed,
            payload: None,
            error: Some(error.into()),
            recorded_at: Utc::now(),
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_is_not_final() {
        assert!(!StepStatus::Pending.is_final());
        assert!(StepStatus::Completed.is_final());
        assert!(StepStatus::Failed.is_final());
    }

    #[test]
    fn test_record_lifecycle_keeps_attempts() {
        let record = StepRecord::pending()
            .begin_attempt()
            .retryable_failure("flaky")
            .begin_attempt();
        assert_eq!(record.attempts, 2);
        assert_eq!(record.status, StepStatus::Pending);
        assert_eq!(record.error.as_deref(), Some("flaky"));

        let done = record.completed(serde_json::json!(true));
        assert_eq!(done.status, StepStatus::Completed);
        assert_eq!(done.attempts, 2);
        assert_eq!(done.payload, Some(serde_json::json!(true)));
        assert!(done.error.is_none());
    }

    #[test]
    fn test_failed_record_keeps_reason() {
        let record = StepRecord::pending().begin_attempt().failed("card declined");
        assert_eq!(record.status, StepStatus::Failed);
        assert!(record.payload.is_none());
        assert_eq!(record.error.as_deref(), Some("card declined"));
    }

    #[test]
    fn test_step_key_display() {
        let id = InvocationId::new();
        let key = StepKey::new(id, "payment");
        assert_eq!(key.to_string(), format!("{id}/payment"));
    }
}
