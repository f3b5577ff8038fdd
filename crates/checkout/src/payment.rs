//! Payment provider contract and an in-memory provider for tests and demos.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use common::Money;
use runtime::{ActionError, AwakeableId, CorrelationBroker, Resolution};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reported by a payment provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaymentError {
    /// The provider refused the request for good.
    #[error("Payment declined: {0}")]
    Declined(String),

    /// The provider could not be reached; the request may be repeated.
    #[error("Payment provider unavailable: {0}")]
    Unavailable(String),
}

impl From<PaymentError> for ActionError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::Declined(_) => ActionError::Terminal(err.to_string()),
            PaymentError::Unavailable(_) => ActionError::Retryable(err.to_string()),
        }
    }
}

/// What the provider answered to a charge request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargeOutcome {
    /// The charge settled during the call.
    Settled(bool),
    /// The charge was accepted; its outcome is reported later through the callback token.
    Pending,
}

/// Trait for payment processing operations.
///
/// `payment_id` identifies one payment across retries: a provider must treat
/// a repeated charge with the same id as the same payment.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Starts charging `amount`. Asynchronous outcomes resolve `callback` with a `bool`.
    async fn charge(
        &self,
        payment_id: &str,
        amount: Money,
        callback: &AwakeableId,
    ) -> Result<ChargeOutcome, PaymentError>;

    /// Cancels a payment, settled or not.
    async fn abort(&self, payment_id: &str) -> Result<(), PaymentError>;
}

/// How the in-memory provider answers charges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentBehavior {
    /// Settle during the call.
    Settle(bool),
    /// Answer `Pending` and resolve the callback token after `delay`.
    Callback { outcome: bool, delay: Duration },
    /// Answer `Pending` and reject the callback token after `delay`.
    RejectCallback { reason: String, delay: Duration },
    /// Answer `Pending` and never report back.
    NoCallback,
    /// Decline the charge.
    Reject(String),
}

impl Default for PaymentBehavior {
    fn default() -> Self {
        PaymentBehavior::Settle(true)
    }
}

/// A charge accepted by the in-memory provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeRecord {
    pub payment_id: String,
    pub amount: Money,
    pub callback: AwakeableId,
    pub outcome: ChargeOutcome,
}

#[derive(Debug, Default)]
struct InMemoryPaymentState {
    behavior: PaymentBehavior,
    charges: HashMap<String, ChargeRecord>,
    charge_requests: usize,
    aborted: Vec<String>,
    unavailable_charges: u32,
    fail_abort: bool,
}

/// In-memory payment provider.
///
/// Asynchronous outcomes are delivered through the broker given to
/// [`with_broker`](Self::with_broker), the way a webhook handler would.
#[derive(Clone, Default)]
pub struct InMemoryPaymentProvider {
    state: Arc<Mutex<InMemoryPaymentState>>,
    broker: Option<CorrelationBroker>,
}

impl InMemoryPaymentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a provider that reports asynchronous outcomes to `broker`.
    pub fn with_broker(broker: CorrelationBroker) -> Self {
        Self {
            state: Arc::default(),
            broker: Some(broker),
        }
    }

    pub fn set_behavior(&self, behavior: PaymentBehavior) {
        self.state().behavior = behavior;
    }

    /// Makes the next `count` charge calls fail with `Unavailable`.
    pub fn fail_next_charges(&self, count: u32) {
        self.state().unavailable_charges = count;
    }

    /// Makes every abort call fail with `Unavailable`.
    pub fn set_fail_abort(&self, fail: bool) {
        self.state().fail_abort = fail;
    }

    /// Number of distinct payments charged.
    pub fn charge_count(&self) -> usize {
        self.state().charges.len()
    }

    /// Number of charge calls, including repeats and failures.
    pub fn charge_requests(&self) -> usize {
        self.state().charge_requests
    }

    /// The accepted charge of `payment_id`, if any.
    pub fn charge_record(&self, payment_id: &str) -> Option<ChargeRecord> {
        self.state().charges.get(payment_id).cloned()
    }

    pub fn charges(&self) -> Vec<ChargeRecord> {
        self.state().charges.values().cloned().collect()
    }

    /// Payment ids aborted so far, in call order.
    pub fn aborted(&self) -> Vec<String> {
        self.state().aborted.clone()
    }

    pub fn was_aborted(&self, payment_id: &str) -> bool {
        self.state().aborted.iter().any(|id| id == payment_id)
    }

    fn state(&self) -> MutexGuard<'_, InMemoryPaymentState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reports `signal` on `callback` after `delay`: `Ok(paid)` resolves the
    /// token, `Err(reason)` rejects it.
    fn schedule_callback(&self, callback: AwakeableId, signal: Result<bool, String>, delay: Duration) {
        let Some(broker) = self.broker.clone() else {
            tracing::warn!(token = %callback, "no broker attached, payment outcome dropped");
            return;
        };
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let reported = match signal {
                Ok(paid) => broker.resolve_with(&callback, &paid).await,
                Err(reason) => broker.reject(&callback, reason).await,
            };
            match reported {
                Ok(Resolution::Delivered) => {}
                Ok(resolution) => {
                    tracing::info!(token = %callback, ?resolution, "payment callback ignored")
                }
                Err(e) => tracing::error!(token = %callback, error = %e, "payment callback not delivered"),
            }
        });
    }
}

#[async_trait]
impl PaymentProvider for InMemoryPaymentProvider {
    async fn charge(
        &self,
        payment_id: &str,
        amount: Money,
        callback: &AwakeableId,
    ) -> Result<ChargeOutcome, PaymentError> {
        let (outcome, schedule) = {
            let mut state = self.state();
            state.charge_requests += 1;

            if state.unavailable_charges > 0 {
                state.unavailable_charges -= 1;
                return Err(PaymentError::Unavailable("503 Service Unavailable".to_string()));
            }

            if let Some(existing) = state.charges.get(payment_id) {
                tracing::debug!(payment_id, "repeated charge, returning original outcome");
                return Ok(existing.outcome);
            }

            let (outcome, schedule) = match &state.behavior {
                PaymentBehavior::Settle(paid) => (ChargeOutcome::Settled(*paid), None),
                PaymentBehavior::Callback { outcome, delay } => {
                    (ChargeOutcome::Pending, Some((Ok(*outcome), *delay)))
                }
                PaymentBehavior::RejectCallback { reason, delay } => {
                    (ChargeOutcome::Pending, Some((Err(reason.clone()), *delay)))
                }
                PaymentBehavior::NoCallback => (ChargeOutcome::Pending, None),
                PaymentBehavior::Reject(reason) => {
                    return Err(PaymentError::Declined(reason.clone()));
                }
            };

            state.charges.insert(
                payment_id.to_string(),
                ChargeRecord {
                    payment_id: payment_id.to_string(),
                    amount,
                    callback: callback.clone(),
                    outcome,
                },
            );
            (outcome, schedule)
        };

        tracing::info!(payment_id, %amount, ?outcome, "payment charge accepted");
        if let Some((signal, delay)) = schedule {
            self.schedule_callback(callback.clone(), signal, delay);
        }
        Ok(outcome)
    }

    async fn abort(&self, payment_id: &str) -> Result<(), PaymentError> {
        let mut state = self.state();
        if state.fail_abort {
            return Err(PaymentError::Unavailable(format!(
                "cannot abort payment {payment_id}"
            )));
        }
        state.aborted.push(payment_id.to_string());
        tracing::info!(payment_id, "payment aborted");
        Ok(())
    }
}
