//! Event-sourced record of one checkout invocation.

use common::InvocationId;
use journal::{EventEnvelope, Journal, Version};
use runtime::CompensationFailure;
use serde::{Deserialize, Serialize};

use crate::error::{CheckoutError, FailureKind, Result};
use crate::events::InvocationEvent;
use crate::state::CheckoutPhase;

/// Terminal result of an invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvocationOutcome {
    /// The checkout finished and returned this value.
    Completed(bool),
    /// The checkout failed terminally.
    Failed { kind: FailureKind, reason: String },
}

/// A checkout invocation rebuilt from its event log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowInvocation {
    id: Option<InvocationId>,
    version: Version,
    workflow_type: String,
    ticket: Option<String>,
    phase: CheckoutPhase,
    outcome: Option<InvocationOutcome>,
    compensated: Vec<String>,
    compensation_failures: Vec<CompensationFailure>,
}

impl WorkflowInvocation {
    /// Applies an event. Must stay pure: it only folds facts already recorded.
    pub fn apply(&mut self, event: InvocationEvent) {
        match event {
            InvocationEvent::InvocationStarted(data) => {
                self.id = Some(data.invocation_id);
                self.ticket = Some(data.ticket);
                self.workflow_type = data.workflow_type;
            }
            InvocationEvent::PhaseEntered(data) => {
                self.phase = data.phase;
            }
            InvocationEvent::CompensationStepCompleted(data) => {
                self.compensated.push(data.label);
            }
            InvocationEvent::CompensationStepFailed(data) => {
                self.compensation_failures.push(CompensationFailure {
                    label: data.label,
                    reason: data.error,
                });
            }
            InvocationEvent::InvocationCompleted(data) => {
                self.outcome = Some(InvocationOutcome::Completed(data.result));
            }
            InvocationEvent::InvocationFailed(data) => {
                self.outcome = Some(InvocationOutcome::Failed {
                    kind: data.kind,
                    reason: data.reason,
                });
            }
        }
    }

    /// Rebuilds an invocation from its stored log.
    pub fn from_envelopes(envelopes: Vec<EventEnvelope>) -> Result<Self> {
        let mut invocation = Self::default();
        for envelope in envelopes {
            invocation.version = envelope.version;
            invocation.apply(serde_json::from_value(envelope.payload)?);
        }
        Ok(invocation)
    }

    /// Turns a terminal invocation back into the value its caller received.
    pub fn replay_outcome(&self) -> Option<Result<bool>> {
        self.outcome.as_ref().map(|outcome| match outcome {
            InvocationOutcome::Completed(result) => Ok(*result),
            InvocationOutcome::Failed { kind, reason } => Err(CheckoutError::Terminal {
                kind: *kind,
                reason: reason.clone(),
                compensation_failures: self.compensation_failures.clone(),
            }),
        })
    }
}

// Query methods
impl WorkflowInvocation {
    pub fn id(&self) -> Option<InvocationId> {
        self.id
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn workflow_type(&self) -> &str {
        &self.workflow_type
    }

    pub fn ticket(&self) -> Option<&str> {
        self.ticket.as_deref()
    }

    pub fn phase(&self) -> CheckoutPhase {
        self.phase
    }

    pub fn outcome(&self) -> Option<&InvocationOutcome> {
        self.outcome.as_ref()
    }

    /// Labels of the compensations that ran, in execution order.
    pub fn compensated(&self) -> &[String] {
        &self.compensated
    }

    pub fn compensation_failures(&self) -> &[CompensationFailure] {
        &self.compensation_failures
    }
}

/// Appends to the log of one invocation while keeping its folded state current.
pub(crate) struct InvocationLog<J> {
    journal: J,
    invocation_id: InvocationId,
    invocation: WorkflowInvocation,
}

impl<J: Journal> InvocationLog<J> {
    pub(crate) async fn open(journal: J, invocation_id: InvocationId) -> Result<Self> {
        let envelopes = journal.load_events(invocation_id).await?;
        let invocation = WorkflowInvocation::from_envelopes(envelopes)?;
        Ok(Self {
            journal,
            invocation_id,
            invocation,
        })
    }

    pub(crate) fn invocation(&self) -> &WorkflowInvocation {
        &self.invocation
    }

    pub(crate) async fn record(&mut self, event: InvocationEvent) -> Result<()> {
        self.record_all(vec![event]).await
    }

    pub(crate) async fn record_all(&mut self, events: Vec<InvocationEvent>) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        let expected = self.invocation.version;
        let mut version = expected;
        let mut envelopes = Vec::with_capacity(events.len());
        for event in &events {
            version = version.next();
            envelopes.push(EventEnvelope::new(
                self.invocation_id,
                version,
                event.event_type(),
                event,
            )?);
        }

        self.invocation.version = self
            .journal
            .append_events(self.invocation_id, expected, envelopes)
            .await?;
        for event in events {
            self.invocation.apply(event);
        }
        Ok(())
    }

    /// Records a move to `phase`.
    ///
    /// A resumed invocation walks through phases it has already logged; those
    /// are skipped so the log only ever moves forward.
    pub(crate) async fn enter_phase(&mut self, phase: CheckoutPhase) -> Result<()> {
        if !self.invocation.phase.can_transition_to(phase) {
            tracing::trace!(
                invocation_id = %self.invocation_id,
                current = %self.invocation.phase,
                %phase,
                "phase already passed, not recorded again"
            );
            return Ok(());
        }
        tracing::debug!(invocation_id = %self.invocation_id, %phase, "entering phase");
        self.record(InvocationEvent::phase_entered(phase)).await
    }
}
