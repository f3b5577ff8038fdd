//! Per-invocation view of the durable runtime.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use common::InvocationId;
use journal::{Journal, StepStatus};
use serde::{Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::awakeable::{Awakeable, AwakeableId, CorrelationBroker, Settlement};
use crate::entity::{EntityKey, EntityStore};
use crate::error::{ActionError, Result, RuntimeError};
use crate::locks::KeyedLocks;
use crate::step::StepExecutor;

/// Shared runtime services: one journal, one step executor, one broker and
/// the key locks of every entity store.
///
/// Cloning is cheap and every clone shares the same state.
pub struct Runtime<J> {
    journal: J,
    steps: StepExecutor<J>,
    broker: CorrelationBroker,
    entity_locks: KeyedLocks<EntityKey>,
}

impl<J: Clone> Clone for Runtime<J> {
    fn clone(&self) -> Self {
        Self {
            journal: self.journal.clone(),
            steps: self.steps.clone(),
            broker: self.broker.clone(),
            entity_locks: self.entity_locks.clone(),
        }
    }
}

impl<J: Journal + Clone> Runtime<J> {
    pub fn new(journal: J) -> Self {
        Self {
            steps: StepExecutor::new(journal.clone()),
            journal,
            broker: CorrelationBroker::new(),
            entity_locks: KeyedLocks::default(),
        }
    }

    pub fn journal(&self) -> &J {
        &self.journal
    }

    pub fn steps(&self) -> &StepExecutor<J> {
        &self.steps
    }

    /// The broker external reporters resolve awakeables through.
    pub fn broker(&self) -> &CorrelationBroker {
        &self.broker
    }

    /// Opens the entity store for `namespace`.
    ///
    /// Stores opened from the same runtime serialize access to a key even
    /// when they are separate instances.
    pub fn entity_store<S>(&self, namespace: impl Into<Arc<str>>) -> EntityStore<J, S>
    where
        S: Serialize + DeserializeOwned + Default + PartialEq,
    {
        EntityStore::new(self.journal.clone(), namespace, self.entity_locks.clone())
    }

    /// Opens the context of one invocation.
    pub fn context(&self, invocation_id: InvocationId) -> InvocationContext<J> {
        InvocationContext {
            invocation_id,
            steps: self.steps.clone(),
            broker: self.broker.clone(),
        }
    }
}

/// Runtime operations scoped to a single invocation id.
pub struct InvocationContext<J> {
    invocation_id: InvocationId,
    steps: StepExecutor<J>,
    broker: CorrelationBroker,
}

impl<J: Journal> InvocationContext<J> {
    pub fn invocation_id(&self) -> InvocationId {
        self.invocation_id
    }

    /// Runs `action` as a journaled step of this invocation.
    pub async fn run<T, F, Fut>(&self, step: &str, action: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, ActionError>>,
    {
        self.steps.run(self.invocation_id, step, action).await
    }

    /// Returns a random UUID that stays the same across retries of this invocation.
    pub async fn random_uuid(&self, step: &str) -> Result<Uuid> {
        self.run(step, || async { Ok(Uuid::new_v4()) }).await
    }

    /// Creates the awakeable `name` of this invocation.
    ///
    /// The token id is journaled, so a retried invocation gets back the id it
    /// handed out on its first attempt and keeps waiting on the same token.
    /// If the wait already finished on an earlier attempt, the broker learns
    /// the journaled outcome instead of a fresh pending token.
    pub async fn awakeable(&self, name: &str) -> Result<Awakeable> {
        let id: AwakeableId = self
            .run(&format!("awakeable:{name}"), || async { Ok(AwakeableId::new()) })
            .await?;
        let awakeable = Awakeable {
            id,
            invocation_id: self.invocation_id,
            name: name.to_string(),
        };

        match self.journaled_settlement(name).await? {
            Some(settlement) => self.broker.restore(&awakeable, settlement).await,
            None => self.broker.register(&awakeable).await,
        }
        Ok(awakeable)
    }

    /// Suspends until `awakeable` is settled or `timeout` elapses.
    ///
    /// The deadline is journaled on the first wait and the outcome once the
    /// wait ends, so a retry, even on a rebuilt runtime, neither waits again
    /// for a delivered signal nor restarts the clock.
    pub async fn await_awakeable<T: DeserializeOwned>(
        &self,
        awakeable: &Awakeable,
        timeout: Duration,
    ) -> Result<T> {
        let deadline: DateTime<Utc> = self
            .run(&deadline_step(&awakeable.name), || async move {
                let timeout = TimeDelta::from_std(timeout).unwrap_or(TimeDelta::MAX);
                Ok(Utc::now()
                    .checked_add_signed(timeout)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC))
            })
            .await?;
        let remaining = deadline
            .signed_duration_since(Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);

        let broker = self.broker.clone();
        let id = awakeable.id.clone();
        let settlement: Settlement = self
            .run(&settlement_step(&awakeable.name), || async move {
                match broker.await_token(&id, remaining).await {
                    Ok(payload) => Ok(Settlement::Resolved(payload)),
                    Err(RuntimeError::AwaitTimeout(_)) => Ok(Settlement::TimedOut),
                    Err(RuntimeError::AwakeableRejected { reason, .. }) => {
                        Ok(Settlement::Rejected(reason))
                    }
                    Err(err) => Err(ActionError::from(err)),
                }
            })
            .await?;

        let payload = settlement.into_result(&awakeable.id)?;
        Ok(serde_json::from_value(payload)?)
    }

    pub fn broker(&self) -> &CorrelationBroker {
        &self.broker
    }

    async fn journaled_settlement(&self, name: &str) -> Result<Option<Settlement>> {
        match self.steps.record(self.invocation_id, &settlement_step(name)).await? {
            Some(record) if record.status == StepStatus::Completed => {
                let payload = record.payload.unwrap_or(serde_json::Value::Null);
                Ok(Some(serde_json::from_value(payload)?))
            }
            _ => Ok(None),
        }
    }
}

fn deadline_step(name: &str) -> String {
    format!("awakeable-deadline:{name}")
}

fn settlement_step(name: &str) -> String {
    format!("awakeable-result:{name}")
}
