use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    EventEnvelope, InvocationId, JournalError, Result, StepKey, StepRecord, Version,
    store::{Journal, validate_events_for_append},
};

/// In-memory journal implementation.
///
/// Clones share the same storage, so a clone handed to another component
/// observes every write.
#[derive(Clone, Default)]
pub struct InMemoryJournal {
    steps: Arc<RwLock<HashMap<StepKey, StepRecord>>>,
    state: Arc<RwLock<HashMap<(String, String), serde_json::Value>>>,
    events: Arc<RwLock<HashMap<InvocationId, Vec<EventEnvelope>>>>,
}

impl InMemoryJournal {
    /// Creates a new empty in-memory journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of step records stored.
    pub async fn step_count(&self) -> usize {
        self.steps.read().await.len()
    }

    /// Returns the step records of one invocation, sorted by step name.
    pub async fn steps_for(&self, invocation_id: InvocationId) -> Vec<(String, StepRecord)> {
        let steps = self.steps.read().await;
        let mut records: Vec<_> = steps
            .iter()
            .filter(|(key, _)| key.invocation_id == invocation_id)
            .map(|(key, record)| (key.step.clone(), record.clone()))
            .collect();
        records.sort_by(|a, b| a.0.cmp(&b.0));
        records
    }

    /// Returns the total number of invocation events stored.
    pub async fn event_count(&self) -> usize {
        self.events.read().await.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl Journal for InMemoryJournal {
    async fn load_step(&self, key: &StepKey) -> Result<Option<StepRecord>> {
        Ok(self.steps.read().await.get(key).cloned())
    }

    async fn save_step(&self, key: &StepKey, record: StepRecord) -> Result<()> {
        let mut steps = self.steps.write().await;
        if let Some(existing) = steps.get(key)
            && existing.status.is_final()
        {
            return Err(JournalError::StepAlreadyRecorded(key.clone()));
        }
        tracing::trace!(step = %key, status = ?record.status, "step record saved");
        steps.insert(key.clone(), record);
        Ok(())
    }

    async fn load_state(&self, namespace: &str, key: &str) -> Result<Option<serde_json::Value>> {
        let state = self.state.read().await;
        Ok(state
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }

    async fn save_state(
        &self,
        namespace: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<()> {
        self.state
            .write()
            .await
            .insert((namespace.to_string(), key.to_string()), value);
        Ok(())
    }

    async fn append_events(
        &self,
        invocation_id: InvocationId,
        expected_version: Version,
        events: Vec<EventEnvelope>,
    ) -> Result<Version> {
        validate_events_for_append(invocation_id, expected_version, &events)
            .map_err(JournalError::InvalidAppend)?;

        let mut store = self.events.write().await;
        let log = store.entry(invocation_id).or_default();

        let current_version = log.last().map(|e| e.version).unwrap_or(Version::initial());
        if current_version != expected_version {
            metrics::counter!("journal_append_conflicts_total").increment(1);
            return Err(JournalError::ConcurrencyConflict {
                invocation_id,
                expected: expected_version,
                actual: current_version,
            });
        }

        let last_version = events
            .last()
            .map(|e| e.version)
            .unwrap_or(current_version);
        log.extend(events);

        Ok(last_version)
    }

    async fn load_events(&self, invocation_id: InvocationId) -> Result<Vec<EventEnvelope>> {
        let store = self.events.read().await;
        Ok(store.get(&invocation_id).cloned().unwrap_or_default())
    }
}
