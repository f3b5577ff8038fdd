//! Keyed entity state with single-writer access per key.

use std::marker::PhantomData;
use std::sync::Arc;

use journal::Journal;
use serde::{Serialize, de::DeserializeOwned};

use crate::error::Result;
use crate::locks::KeyedLocks;

/// Durable state addressed by key, one value per key.
///
/// Every read and conditional write for a given key runs under that key's
/// lock, so two callers can never observe-then-mutate the same key
/// concurrently. Keys are independent: there is no lock across keys.
/// Absent keys read as `S::default()`.
///
/// Stores are opened through [`Runtime::entity_store`](crate::Runtime::entity_store);
/// every store of one runtime shares its key locks, whichever component
/// opened it.
pub struct EntityStore<J, S> {
    namespace: Arc<str>,
    journal: J,
    locks: KeyedLocks<EntityKey>,
    _state: PhantomData<fn() -> S>,
}

/// Lock key of an entity: namespace and key.
pub(crate) type EntityKey = (Arc<str>, String);

impl<J: Clone, S> Clone for EntityStore<J, S> {
    fn clone(&self) -> Self {
        Self {
            namespace: Arc::clone(&self.namespace),
            journal: self.journal.clone(),
            locks: self.locks.clone(),
            _state: PhantomData,
        }
    }
}

impl<J, S> EntityStore<J, S>
where
    J: Journal,
    S: Serialize + DeserializeOwned + Default + PartialEq,
{
    pub(crate) fn new(journal: J, namespace: impl Into<Arc<str>>, locks: KeyedLocks<EntityKey>) -> Self {
        Self {
            namespace: namespace.into(),
            journal,
            locks,
            _state: PhantomData,
        }
    }

    /// Returns the namespace of this store.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Reads the current state of `key`.
    pub async fn get(&self, key: &str) -> Result<S> {
        let _guard = self.locks.lock(self.lock_key(key)).await;
        self.load(key).await
    }

    /// Atomically replaces the state of `key` with `new` if it currently equals `expected`.
    ///
    /// Returns false, without writing, when the current state differs.
    pub async fn try_set(&self, key: &str, expected: &S, new: S) -> Result<bool> {
        let _guard = self.locks.lock(self.lock_key(key)).await;

        let current = self.load(key).await?;
        if current != *expected {
            tracing::debug!(namespace = %self.namespace, key, "conditional write rejected");
            metrics::counter!("entity_cas_rejected_total").increment(1);
            return Ok(false);
        }

        self.journal
            .save_state(&self.namespace, key, serde_json::to_value(&new)?)
            .await?;
        Ok(true)
    }

    fn lock_key(&self, key: &str) -> EntityKey {
        (Arc::clone(&self.namespace), key.to_string())
    }

    async fn load(&self, key: &str) -> Result<S> {
        match self.journal.load_state(&self.namespace, key).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(S::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Runtime;
    use async_trait::async_trait;
    use journal::{EventEnvelope, InMemoryJournal, InvocationId, StepKey, StepRecord, Version};
    use serde::Deserialize;
    use std::time::Duration;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    enum Light {
        #[default]
        Off,
        On,
    }

    fn store() -> EntityStore<InMemoryJournal, Light> {
        Runtime::new(InMemoryJournal::new()).entity_store("light")
    }

    /// Widens the window between reading and writing a key.
    #[derive(Clone, Default)]
    struct SlowJournal {
        inner: InMemoryJournal,
    }

    #[async_trait]
    impl Journal for SlowJournal {
        async fn load_step(&self, key: &StepKey) -> journal::Result<Option<StepRecord>> {
            self.inner.load_step(key).await
        }

        async fn save_step(&self, key: &StepKey, record: StepRecord) -> journal::Result<()> {
            self.inner.save_step(key, record).await
        }

        async fn load_state(&self, namespace: &str, key: &str) -> journal::Result<Option<serde_json::Value>> {
            tokio::time::sleep(Duration::from_millis(2)).await;
            self.inner.load_state(namespace, key).await
        }

        async fn save_state(&self, namespace: &str, key: &str, value: serde_json::Value) -> journal::Result<()> {
            self.inner.save_state(namespace, key, value).await
        }

        async fn append_events(
            &self,
            invocation_id: InvocationId,
            expected_version: Version,
            events: Vec<EventEnvelope>,
        ) -> journal::Result<Version> {
            self.inner.append_events(invocation_id, expected_version, events).await
        }

        async fn load_events(&self, invocation_id: InvocationId) -> journal::Result<Vec<EventEnvelope>> {
            self.inner.load_events(invocation_id).await
        }
    }

    #[tokio::test]
    async fn test_absent_key_reads_default() {
        let store = store();
        assert_eq!(store.get("hall").await.unwrap(), Light::Off);
    }

    #[tokio::test]
    async fn test_try_set_matches_expected() {
        let store = store();

        assert!(store.try_set("hall", &Light::Off, Light::On).await.unwrap());
        assert_eq!(store.get("hall").await.unwrap(), Light::On);

        assert!(!store.try_set("hall", &Light::Off, Light::On).await.unwrap());
        assert_eq!(store.get("hall").await.unwrap(), Light::On);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let store = store();
        store.try_set("hall", &Light::Off, Light::On).await.unwrap();
        assert_eq!(store.get("kitchen").await.unwrap(), Light::Off);
    }

    #[tokio::test]
    async fn test_state_is_persisted_in_journal() {
        let journal = InMemoryJournal::new();
        let store: EntityStore<_, Light> = Runtime::new(journal.clone()).entity_store("light");
        store.try_set("hall", &Light::Off, Light::On).await.unwrap();

        let reopened: EntityStore<_, Light> = Runtime::new(journal).entity_store("light");
        assert_eq!(reopened.get("hall").await.unwrap(), Light::On);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_try_set_has_single_winner() {
        let store = store();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.try_set("hall", &Light::Off, Light::On).await.unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_stores_opened_separately_share_key_locks() {
        let runtime = Runtime::new(SlowJournal::default());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store: EntityStore<_, Light> = runtime.clone().entity_store("light");
            handles.push(tokio::spawn(async move {
                store.try_set("hall", &Light::Off, Light::On).await.unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_namespaces_do_not_share_state() {
        let runtime = Runtime::new(InMemoryJournal::new());
        let hall: EntityStore<_, Light> = runtime.entity_store("light");
        let fan: EntityStore<_, Light> = runtime.entity_store("fan");

        hall.try_set("hall", &Light::Off, Light::On).await.unwrap();
        assert_eq!(fan.get("hall").await.unwrap(), Light::Off);
    }
}
