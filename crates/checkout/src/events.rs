//! Invocation log events.

use chrono::{DateTime, Utc};
use common::InvocationId;
use serde::{Deserialize, Serialize};

use crate::error::FailureKind;
use crate::state::CheckoutPhase;

/// Events recorded in the log of a checkout invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum InvocationEvent {
    /// The invocation was created.
    InvocationStarted(InvocationStartedData),

    /// The invocation moved to a new phase.
    PhaseEntered(PhaseData),

    /// An undo action ran successfully.
    CompensationStepCompleted(CompensationStepData),

    /// An undo action failed (logged, the unwind continues).
    CompensationStepFailed(CompensationStepFailedData),

    /// The invocation produced its result.
    InvocationCompleted(InvocationCompletedData),

    /// The invocation failed terminally after compensating.
    InvocationFailed(InvocationFailedData),
}

impl InvocationEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            InvocationEvent::InvocationStarted(_) => "InvocationStarted",
            InvocationEvent::PhaseEntered(_) => "PhaseEntered",
            InvocationEvent::CompensationStepCompleted(_) => "CompensationStepCompleted",
            InvocationEvent::CompensationStepFailed(_) => "CompensationStepFailed",
            InvocationEvent::InvocationCompleted(_) => "InvocationCompleted",
            InvocationEvent::InvocationFailed(_) => "InvocationFailed",
        }
    }
}

/// Data for InvocationStarted event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationStartedData {
    pub invocation_id: InvocationId,
    /// The ticket being checked out.
    pub ticket: String,
    /// The workflow type (e.g., "TicketCheckout").
    pub workflow_type: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseData {
    pub phase: CheckoutPhase,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationStepData {
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationStepFailedData {
    pub label: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationCompletedData {
    /// Whether the ticket was sold.
    pub result: bool,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationFailedData {
    pub kind: FailureKind,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

// Convenience constructors
impl InvocationEvent {
    pub fn invocation_started(
        invocation_id: InvocationId,
        ticket: impl Into<String>,
        workflow_type: impl Into<String>,
    ) -> Self {
        InvocationEvent::InvocationStarted(InvocationStartedData {
            invocation_id,
            ticket: ticket.into(),
            workflow_type: workflow_type.into(),
            started_at: Utc::now(),
        })
    }

    pub fn phase_entered(phase: CheckoutPhase) -> Self {
        InvocationEvent::PhaseEntered(PhaseData { phase })
    }

    pub fn compensation_step_completed(label: impl Into<String>) -> Self {
        InvocationEvent::CompensationStepCompleted(CompensationStepData {
            label: label.into(),
        })
    }

    pub fn compensation_step_failed(label: impl Into<String>, error: impl Into<String>) -> Self {
        InvocationEvent::CompensationStepFailed(CompensationStepFailedData {
            label: label.into(),
            error: error.into(),
        })
    }

    pub fn invocation_completed(result: bool) -> Self {
        InvocationEvent::InvocationCompleted(InvocationCompletedData {
            result,
            completed_at: Utc::now(),
        })
    }

    pub fn invocation_failed(kind: FailureKind, reason: impl Into<String>) -> Self {
        InvocationEvent::InvocationFailed(InvocationFailedData {
            kind,
            reason: reason.into(),
            failed_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_types() {
        let id = InvocationId::new();
        assert_eq!(
            InvocationEvent::invocation_started(id, "T1", "TicketCheckout").event_type(),
            "InvocationStarted"
        );
        assert_eq!(
            InvocationEvent::phase_entered(CheckoutPhase::Reserving).event_type(),
            "PhaseEntered"
        );
        assert_eq!(
            InvocationEvent::compensation_step_failed("abort-payment", "down").event_type(),
            "CompensationStepFailed"
        );
        assert_eq!(
            InvocationEvent::invocation_failed(FailureKind::AwaitTimeout, "late").event_type(),
            "InvocationFailed"
        );
    }

    #[test]
    fn test_tagged_serialization() {
        let event = InvocationEvent::phase_entered(CheckoutPhase::PaymentPending);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "PhaseEntered");
        assert_eq!(json["data"]["phase"], "PaymentPending");

        let back: InvocationEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
