//! Awakeables: correlation tokens resolved by external reporters.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use common::InvocationId;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::{Result, RuntimeError};

/// Opaque identifier handed to an external reporter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AwakeableId(String);

impl AwakeableId {
    /// Generates a fresh, unguessable id.
    pub fn new() -> Self {
        Self(format!("awk_{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for AwakeableId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AwakeableId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AwakeableId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for AwakeableId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A token bound to one pending wait of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Awakeable {
    pub id: AwakeableId,
    pub invocation_id: InvocationId,
    pub name: String,
}

/// Observable status of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    Pending,
    Resolved,
    Rejected,
    TimedOut,
}

/// Outcome of a `resolve` or `reject` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The signal was delivered to the (possibly future) waiter.
    Delivered,
    /// The token had already been settled; the new signal was dropped.
    AlreadyResolved,
    /// The wait had already timed out; the signal was dropped.
    Late,
}

/// How a token was settled.
///
/// Journaled once the waiter has observed it, so a rebuilt runtime settles
/// the token the same way without waiting again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Settlement {
    Resolved(serde_json::Value),
    Rejected(String),
    TimedOut,
}

impl Settlement {
    pub fn status(&self) -> TokenStatus {
        match self {
            Settlement::Resolved(_) => TokenStatus::Resolved,
            Settlement::Rejected(_) => TokenStatus::Rejected,
            Settlement::TimedOut => TokenStatus::TimedOut,
        }
    }

    /// Turns the settlement into what the waiter of token `id` receives.
    pub fn into_result(self, id: &AwakeableId) -> Result<serde_json::Value> {
        match self {
            Settlement::Resolved(payload) => Ok(payload),
            Settlement::Rejected(reason) => Err(RuntimeError::AwakeableRejected {
                id: id.clone(),
                reason,
            }),
            Settlement::TimedOut => Err(RuntimeError::AwaitTimeout(id.clone())),
        }
    }
}

/// Settled tokens kept after their waiter is gone, oldest evicted first.
pub const DEFAULT_RETIRED_CAPACITY: usize = 4096;

/// Upper bound on a wait, far beyond any real deadline.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

struct Slot {
    invocation_id: InvocationId,
    name: String,
    settlement: Option<Settlement>,
    deadline: Option<Instant>,
    notify: Arc<Notify>,
}

#[derive(Default)]
struct BrokerState {
    /// Tokens still awaited, or settled but not yet consumed.
    slots: HashMap<AwakeableId, Slot>,
    /// Settled tokens whose waiter already returned.
    retired: HashMap<AwakeableId, Settlement>,
    retired_order: VecDeque<AwakeableId>,
}

impl BrokerState {
    fn retire(&mut self, id: AwakeableId, settlement: Settlement, capacity: usize) {
        self.slots.remove(&id);
        if self.retired.insert(id.clone(), settlement).is_none() {
            self.retired_order.push_back(id);
        }
        while self.retired_order.len() > capacity {
            if let Some(oldest) = self.retired_order.pop_front() {
                self.retired.remove(&oldest);
            }
        }
    }
}

/// Issues awakeables and routes external resolutions to their waiters.
///
/// Waiting suspends only the calling task. A signal that arrives before
/// anyone waits is kept and handed to the first `await_token`. The deadline
/// of a token is fixed by its first wait; waiting again after a retry keeps
/// the original deadline.
///
/// Once its waiter has observed the outcome, a token moves to a bounded set
/// of retired tokens, so late or duplicate signals are still answered
/// without the broker growing with every invocation.
#[derive(Clone)]
pub struct CorrelationBroker {
    state: Arc<Mutex<BrokerState>>,
    retired_capacity: usize,
}

impl Default for CorrelationBroker {
    fn default() -> Self {
        Self::with_retired_capacity(DEFAULT_RETIRED_CAPACITY)
    }
}

impl CorrelationBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a broker remembering at most `capacity` retired tokens.
    pub fn with_retired_capacity(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            retired_capacity: capacity,
        }
    }

    /// Allocates a new token for step `name` of `invocation_id`.
    pub async fn create(&self, invocation_id: InvocationId, name: impl Into<String>) -> Awakeable {
        let awakeable = Awakeable {
            id: AwakeableId::new(),
            invocation_id,
            name: name.into(),
        };
        self.register(&awakeable).await;
        awakeable
    }

    /// Makes a token known to the broker. Registering a known token is a no-op.
    pub async fn register(&self, awakeable: &Awakeable) {
        let mut state = self.state.lock().await;
        if state.retired.contains_key(&awakeable.id) {
            return;
        }
        state.slots.entry(awakeable.id.clone()).or_insert_with(|| {
            tracing::debug!(
                token = %awakeable.id,
                invocation_id = %awakeable.invocation_id,
                name = %awakeable.name,
                "awakeable registered"
            );
            Slot {
                invocation_id: awakeable.invocation_id,
                name: awakeable.name.clone(),
                settlement: None,
                deadline: None,
                notify: Arc::new(Notify::new()),
            }
        });
    }

    /// Marks a token as already settled, typically from a journaled outcome.
    pub async fn restore(&self, awakeable: &Awakeable, settlement: Settlement) {
        tracing::debug!(
            token = %awakeable.id,
            invocation_id = %awakeable.invocation_id,
            status = ?settlement.status(),
            "awakeable restored from journal"
        );
        let mut state = self.state.lock().await;
        state.retire(awakeable.id.clone(), settlement, self.retired_capacity);
    }

    /// Delivers `payload` to the waiter of token `id`.
    ///
    /// Only the first signal for a pending token is delivered; later ones
    /// are reported as `AlreadyResolved` or `Late` and change nothing.
    pub async fn resolve(&self, id: &AwakeableId, payload: serde_json::Value) -> Result<Resolution> {
        self.settle(id, Settlement::Resolved(payload)).await
    }

    /// Serializes `value` and resolves token `id` with it.
    pub async fn resolve_with<T: Serialize>(&self, id: &AwakeableId, value: &T) -> Result<Resolution> {
        self.resolve(id, serde_json::to_value(value)?).await
    }

    /// Fails the wait on token `id`; the waiter receives `AwakeableRejected`.
    pub async fn reject(&self, id: &AwakeableId, reason: impl Into<String>) -> Result<Resolution> {
        self.settle(id, Settlement::Rejected(reason.into())).await
    }

    async fn settle(&self, id: &AwakeableId, settlement: Settlement) -> Result<Resolution> {
        let status = settlement.status();
        let mut state = self.state.lock().await;

        let resolution = if let Some(slot) = state.slots.get_mut(id) {
            if slot.settlement.is_some() {
                Resolution::AlreadyResolved
            } else {
                slot.settlement = Some(settlement);
                slot.notify.notify_one();
                metrics::counter!("awakeables_resolved_total").increment(1);
                tracing::info!(
                    token = %id,
                    invocation_id = %slot.invocation_id,
                    name = %slot.name,
                    ?status,
                    "awakeable settled"
                );
                Resolution::Delivered
            }
        } else {
            match state.retired.get(id) {
                Some(Settlement::TimedOut) => {
                    metrics::counter!("awakeables_late_total").increment(1);
                    Resolution::Late
                }
                Some(_) => Resolution::AlreadyResolved,
                None => return Err(RuntimeError::UnknownToken(id.clone())),
            }
        };

        if resolution != Resolution::Delivered {
            tracing::info!(token = %id, ?status, ?resolution, "awakeable signal dropped");
        }
        Ok(resolution)
    }

    /// Waits until token `id` is settled and returns its payload.
    ///
    /// Fails with `AwaitTimeout` once the deadline passes without a signal,
    /// and with `AwakeableRejected` if the reporter rejected the token.
    /// Either way the outcome is final for the token.
    pub async fn await_token(&self, id: &AwakeableId, timeout: Duration) -> Result<serde_json::Value> {
        loop {
            let (notify, deadline) = {
                let mut state = self.state.lock().await;
                if let Some(settlement) = state.retired.get(id) {
                    return settlement.clone().into_result(id);
                }
                let slot = state
                    .slots
                    .get_mut(id)
                    .ok_or_else(|| RuntimeError::UnknownToken(id.clone()))?;
                if let Some(settlement) = slot.settlement.clone() {
                    state.retire(id.clone(), settlement.clone(), self.retired_capacity);
                    return settlement.into_result(id);
                }
                let deadline = *slot.deadline.get_or_insert_with(|| deadline_after(timeout));
                (Arc::clone(&slot.notify), deadline)
            };

            if tokio::time::timeout_at(deadline, notify.notified()).await.is_err() {
                let mut state = self.state.lock().await;
                if let Some(slot) = state.slots.get(id)
                    && slot.settlement.is_none()
                {
                    metrics::counter!("awakeable_timeouts_total").increment(1);
                    tracing::warn!(token = %id, invocation_id = %slot.invocation_id, "awakeable timed out");
                    state.retire(id.clone(), Settlement::TimedOut, self.retired_capacity);
                    return Err(RuntimeError::AwaitTimeout(id.clone()));
                }
                // Settled right at the deadline: the next pass returns it.
            }
        }
    }

    /// Waits for token `id` and deserializes its payload.
    pub async fn await_as<T: DeserializeOwned>(&self, id: &AwakeableId, timeout: Duration) -> Result<T> {
        let payload = self.await_token(id, timeout).await?;
        Ok(serde_json::from_value(payload)?)
    }

    /// Returns the status of a token, or `None` if it is unknown.
    pub async fn status(&self, id: &AwakeableId) -> Option<TokenStatus> {
        let state = self.state.lock().await;
        if let Some(slot) = state.slots.get(id) {
            return Some(
                slot.settlement
                    .as_ref()
                    .map_or(TokenStatus::Pending, Settlement::status),
            );
        }
        state.retired.get(id).map(Settlement::status)
    }

    /// Returns the ids of all unsettled tokens of an invocation.
    pub async fn pending_for(&self, invocation_id: InvocationId) -> Vec<AwakeableId> {
        let state = self.state.lock().await;
        state
            .slots
            .iter()
            .filter(|(_, slot)| slot.invocation_id == invocation_id && slot.settlement.is_none())
            .map(|(id, _)| id.clone())
            .collect()
    }
}

fn deadline_after(timeout: Duration) -> Instant {
    Instant::now() + timeout.min(FAR_FUTURE)
}
