//! Workflow orchestrator for the ticket checkout saga.

use std::sync::Arc;

use common::InvocationId;
use journal::Journal;
use runtime::{
    ActionError, CompensationReport, CompensationStack, InvocationContext, Runtime, RuntimeError,
};

use crate::checkout_saga::{
    AWAKEABLE_PAYMENT, COMPENSATE_ABORT_PAYMENT, COMPENSATE_UNRESERVE, STEP_PAYMENT,
    STEP_PAYMENT_ID, STEP_RESERVE, WORKFLOW_TYPE,
};
use crate::config::CheckoutConfig;
use crate::error::{CheckoutError, FailureKind, Result};
use crate::events::InvocationEvent;
use crate::invocation::{InvocationLog, WorkflowInvocation};
use crate::payment::{ChargeOutcome, PaymentProvider};
use crate::state::CheckoutPhase;
use crate::ticket::TicketService;

/// Orchestrates checkout invocations.
///
/// The saga reserves the ticket, charges the payment and waits for its
/// outcome on an awakeable, then either confirms the sale or unwinds the
/// registered compensations. The invocation itself is event-sourced, and
/// every side effect is a journaled step: calling [`checkout`](Self::checkout)
/// again with the same invocation id resumes it, or returns its archived
/// result once it has finished.
pub struct CheckoutWorkflow<J, P> {
    runtime: Runtime<J>,
    tickets: TicketService<J>,
    payments: Arc<P>,
    config: CheckoutConfig,
}

impl<J: Clone, P> Clone for CheckoutWorkflow<J, P> {
    fn clone(&self) -> Self {
        Self {
            runtime: self.runtime.clone(),
            tickets: self.tickets.clone(),
            payments: Arc::clone(&self.payments),
            config: self.config.clone(),
        }
    }
}

impl<J, P> CheckoutWorkflow<J, P>
where
    J: Journal + Clone + 'static,
    P: PaymentProvider + 'static,
{
    /// Creates a new checkout workflow.
    pub fn new(runtime: Runtime<J>, payments: P, config: CheckoutConfig) -> Self {
        let tickets = TicketService::new(&runtime);
        Self {
            runtime,
            tickets,
            payments: Arc::new(payments),
            config,
        }
    }

    pub fn runtime(&self) -> &Runtime<J> {
        &self.runtime
    }

    pub fn tickets(&self) -> &TicketService<J> {
        &self.tickets
    }

    pub fn payments(&self) -> &P {
        &self.payments
    }

    pub fn config(&self) -> &CheckoutConfig {
        &self.config
    }

    /// Checks out `ticket` under a freshly allocated invocation id.
    pub async fn checkout_new(&self, ticket: &str) -> Result<bool> {
        self.checkout(InvocationId::new(), ticket).await
    }

    /// Runs or resumes checkout invocation `invocation_id` for `ticket`.
    ///
    /// Returns `Ok(true)` when the ticket was sold, `Ok(false)` when it was
    /// not available or the payment was refused. `CheckoutError::Terminal`
    /// means the compensations ran and the invocation is over;
    /// `CheckoutError::Retry` means it should be re-invoked with the same id.
    #[tracing::instrument(skip(self, invocation_id), fields(%invocation_id, workflow_type = WORKFLOW_TYPE))]
    pub async fn checkout(&self, invocation_id: InvocationId, ticket: &str) -> Result<bool> {
        metrics::counter!("checkout_invocations_total").increment(1);
        let started = std::time::Instant::now();

        let result = self.execute(invocation_id, ticket).await;

        let duration = started.elapsed().as_secs_f64();
        metrics::histogram!("checkout_duration_seconds").record(duration);
        match &result {
            Ok(sold) => {
                metrics::counter!("checkout_completed", "sold" => if *sold { "true" } else { "false" })
                    .increment(1);
                tracing::info!(sold, duration, "checkout finished");
            }
            Err(CheckoutError::Retry { step, reason }) => {
                metrics::counter!("checkout_retries_total").increment(1);
                tracing::warn!(%step, %reason, "checkout suspended, re-invoke to resume");
            }
            Err(e) => tracing::warn!(error = %e, duration, "checkout failed"),
        }
        result
    }

    /// Loads an invocation by id from the journal.
    pub async fn get_invocation(
        &self,
        invocation_id: InvocationId,
    ) -> Result<Option<WorkflowInvocation>> {
        let events = self.runtime.journal().load_events(invocation_id).await?;
        if events.is_empty() {
            return Ok(None);
        }
        Ok(Some(WorkflowInvocation::from_envelopes(events)?))
    }

    async fn execute(&self, invocation_id: InvocationId, ticket: &str) -> Result<bool> {
        let mut log = InvocationLog::open(self.runtime.journal().clone(), invocation_id).await?;

        let bound_ticket = log.invocation().ticket().map(str::to_string);
        match bound_ticket {
            Some(expected) if expected != ticket => {
                return Err(CheckoutError::InvocationMismatch {
                    invocation_id,
                    expected,
                    actual: ticket.to_string(),
                });
            }
            Some(_) => {
                if let Some(outcome) = log.invocation().replay_outcome() {
                    tracing::info!("invocation already finished, replaying its result");
                    metrics::counter!("checkout_replays_total").increment(1);
                    return outcome;
                }
                tracing::info!(phase = %log.invocation().phase(), "resuming invocation");
            }
            None => {
                log.record(InvocationEvent::invocation_started(
                    invocation_id,
                    ticket,
                    WORKFLOW_TYPE,
                ))
                .await?;
            }
        }

        let ctx = self.runtime.context(invocation_id);
        let mut compensations = CompensationStack::new();

        match self
            .run_saga(&ctx, &mut log, &mut compensations, ticket)
            .await
        {
            Ok(result) => {
                log.record(InvocationEvent::invocation_completed(result))
                    .await?;
                Ok(result)
            }
            Err(CheckoutError::Runtime(err)) if err.is_terminal() => {
                let failure = self.fail(&mut log, &mut compensations, err).await?;
                Err(failure)
            }
            Err(CheckoutError::Runtime(RuntimeError::StepRetryable { step, reason })) => {
                // Nothing is compensated: the retry rebuilds the stack from the journal.
                Err(CheckoutError::Retry { step, reason })
            }
            Err(other) => Err(other),
        }
    }

    async fn run_saga(
        &self,
        ctx: &InvocationContext<J>,
        log: &mut InvocationLog<J>,
        compensations: &mut CompensationStack,
        ticket: &str,
    ) -> Result<bool> {
        // 1. Reserve the ticket, with its undo registered first
        self.push_unreserve(compensations, ticket);
        log.enter_phase(CheckoutPhase::Reserving).await?;
        tracing::info!(step = STEP_RESERVE, ticket, "saga step started");

        let reserved: bool = ctx
            .run(STEP_RESERVE, || async move {
                self.tickets
                    .reserve(ticket)
                    .await
                    .map_err(ActionError::from)
            })
            .await?;

        if !reserved {
            // Someone else holds the ticket; undoing would release their reservation.
            compensations.clear();
            log.enter_phase(CheckoutPhase::RolledBack).await?;
            return Ok(false);
        }
        log.enter_phase(CheckoutPhase::Reserved).await?;

        // 2. Trigger the payment
        let payment_id = ctx.random_uuid(STEP_PAYMENT_ID).await?.to_string();
        let awakeable = ctx.awakeable(AWAKEABLE_PAYMENT).await?;

        let payments = Arc::clone(&self.payments);
        let abort_id = payment_id.clone();
        compensations.push(COMPENSATE_ABORT_PAYMENT, move || async move {
            payments.abort(&abort_id).await
        });

        tracing::info!(step = STEP_PAYMENT, %payment_id, token = %awakeable.id, "saga step started");
        let amount = self.config.payment_amount;
        let (pid, token) = (&payment_id, &awakeable.id);
        let outcome: ChargeOutcome = ctx
            .run(STEP_PAYMENT, || async move {
                self.payments
                    .charge(pid, amount, token)
                    .await
                    .map_err(ActionError::from)
            })
            .await?;

        if let ChargeOutcome::Settled(paid) = outcome {
            ctx.broker().resolve_with(&awakeable.id, &paid).await?;
        }

        // 3. Wait for the outcome
        log.enter_phase(CheckoutPhase::PaymentPending).await?;
        let paid: bool = ctx
            .await_awakeable(&awakeable, self.config.payment_timeout)
            .await?;

        if paid {
            log.enter_phase(CheckoutPhase::Confirming).await?;
            // Holds until the stack is cleared below.
            self.push_unreserve(compensations, ticket);
            self.tickets.send_mark_sold(ticket);
            compensations.clear();
            log.enter_phase(CheckoutPhase::Sold).await?;
            Ok(true)
        } else {
            tracing::info!(%payment_id, "payment refused, rolling back");
            log.enter_phase(CheckoutPhase::RollingBack).await?;
            let report = compensations.drain_reverse().await;
            Self::record_compensations(log, &report).await?;
            log.enter_phase(CheckoutPhase::RolledBack).await?;
            Ok(false)
        }
    }

    fn push_unreserve(&self, compensations: &mut CompensationStack, ticket: &str) {
        let tickets = self.tickets.clone();
        let ticket = ticket.to_string();
        compensations.push(COMPENSATE_UNRESERVE, move || async move {
            tickets.unreserve(&ticket).await
        });
    }

    /// Unwinds the compensations after a terminal failure and archives it.
    #[tracing::instrument(skip_all)]
    async fn fail(
        &self,
        log: &mut InvocationLog<J>,
        compensations: &mut CompensationStack,
        err: RuntimeError,
    ) -> Result<CheckoutError> {
        let kind = match err {
            RuntimeError::AwaitTimeout(_) => FailureKind::AwaitTimeout,
            _ => FailureKind::StepTerminalFailure,
        };
        let reason = err.to_string();
        tracing::warn!(%kind, %reason, pending = compensations.len(), "compensating");

        log.enter_phase(CheckoutPhase::RollingBack).await?;
        let report = compensations.drain_reverse().await;
        Self::record_compensations(log, &report).await?;
        log.enter_phase(CheckoutPhase::RolledBack).await?;
        log.record(InvocationEvent::invocation_failed(kind, reason.clone()))
            .await?;

        metrics::counter!("checkout_failed", "kind" => kind.as_str()).increment(1);
        Ok(CheckoutError::Terminal {
            kind,
            reason,
            compensation_failures: report.failures,
        })
    }

    async fn record_compensations(
        log: &mut InvocationLog<J>,
        report: &CompensationReport,
    ) -> Result<()> {
        let events = report
            .executed
            .iter()
            .map(|label| InvocationEvent::compensation_step_completed(label.as_str()))
            .chain(report.failures.iter().map(|failure| {
                InvocationEvent::compensation_step_failed(&failure.label, &failure.reason)
            }))
            .collect();
        log.record_all(events).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment::{InMemoryPaymentProvider, PaymentBehavior};
    use crate::ticket::TicketStatus;
    use journal::InMemoryJournal;

    fn workflow() -> CheckoutWorkflow<InMemoryJournal, InMemoryPaymentProvider> {
        let runtime = Runtime::new(InMemoryJournal::new());
        let payments = InMemoryPaymentProvider::with_broker(runtime.broker().clone());
        CheckoutWorkflow::new(runtime, payments, CheckoutConfig::default())
    }

    async fn wait_for_status(
        workflow: &CheckoutWorkflow<InMemoryJournal, InMemoryPaymentProvider>,
        ticket: &str,
        status: TicketStatus,
    ) {
        for _ in 0..100 {
            if workflow.tickets().status(ticket).await.unwrap() == status {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("ticket {ticket} never reached {status}");
    }

    #[tokio::test]
    async fn test_checkout_records_phases() {
        let workflow = workflow();
        let id = InvocationId::new();

        assert!(workflow.checkout(id, "T1").await.unwrap());
        wait_for_status(&workflow, "T1", TicketStatus::Sold).await;

        let invocation = workflow.get_invocation(id).await.unwrap().unwrap();
        assert_eq!(invocation.ticket(), Some("T1"));
        assert_eq!(invocation.workflow_type(), WORKFLOW_TYPE);
        assert_eq!(invocation.phase(), CheckoutPhase::Sold);
        assert_eq!(invocation.version().as_i64(), 7);
        assert!(invocation.compensated().is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_ticket_returns_false() {
        let workflow = workflow();
        workflow.tickets().reserve("T1").await.unwrap();

        let id = InvocationId::new();
        assert!(!workflow.checkout(id, "T1").await.unwrap());

        let invocation = workflow.get_invocation(id).await.unwrap().unwrap();
        assert_eq!(invocation.phase(), CheckoutPhase::RolledBack);
        assert!(invocation.compensated().is_empty());
        assert_eq!(workflow.payments().charge_requests(), 0);
        assert_eq!(
            workflow.tickets().status("T1").await.unwrap(),
            TicketStatus::Reserved
        );
    }

    #[tokio::test]
    async fn test_refused_payment_compensates_in_reverse() {
        let workflow = workflow();
        workflow.payments().set_behavior(PaymentBehavior::Settle(false));

        let id = InvocationId::new();
        assert!(!workflow.checkout(id, "T1").await.unwrap());

        let invocation = workflow.get_invocation(id).await.unwrap().unwrap();
        assert_eq!(
            invocation.compensated(),
            &[COMPENSATE_ABORT_PAYMENT, COMPENSATE_UNRESERVE]
        );
        assert_eq!(invocation.phase(), CheckoutPhase::RolledBack);
    }

    #[tokio::test]
    async fn test_invocation_bound_to_its_ticket() {
        let workflow = workflow();
        let id = InvocationId::new();
        workflow.checkout(id, "T1").await.unwrap();

        let err = workflow.checkout(id, "T2").await.unwrap_err();
        assert!(matches!(err, CheckoutError::InvocationMismatch { .. }));
        assert!(err.is_terminal());
    }

    #[tokio::test]
    async fn test_unknown_invocation() {
        let workflow = workflow();
        assert!(workflow.get_invocation(InvocationId::new()).await.unwrap().is_none());
    }
}
