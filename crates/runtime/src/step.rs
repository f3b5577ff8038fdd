//! Journaled step execution.

use std::future::Future;

use common::InvocationId;
use journal::{Journal, StepKey, StepRecord, StepStatus};
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{ActionError, Result, RuntimeError};
use crate::locks::KeyedLocks;

/// Runs side-effecting actions at most once per `(invocation, step)`.
///
/// The first run of a step executes the action and journals its outcome
/// before returning it. Any later run of the same step, typically from a
/// retry of the whole invocation, replays the journaled outcome without
/// calling the action. Two concurrent runs of the same step are serialized:
/// one executes, the other replays.
pub struct StepExecutor<J> {
    journal: J,
    locks: KeyedLocks<StepKey>,
}

impl<J: Clone> Clone for StepExecutor<J> {
    fn clone(&self) -> Self {
        Self {
            journal: self.journal.clone(),
            locks: self.locks.clone(),
        }
    }
}

impl<J: Journal> StepExecutor<J> {
    /// Creates an executor journaling into `journal`.
    pub fn new(journal: J) -> Self {
        Self {
            journal,
            locks: KeyedLocks::default(),
        }
    }

    /// Runs `action` as step `step` of `invocation_id`, or replays its journaled outcome.
    ///
    /// - `Completed` records return the stored payload.
    /// - `Failed` records return `StepTerminalFailure` again.
    /// - Otherwise the action runs. `ActionError::Retryable` leaves the step
    ///   pending and returns `StepRetryable`; `ActionError::Terminal` records
    ///   the failure and returns `StepTerminalFailure`.
    #[tracing::instrument(skip(self, invocation_id, action), fields(%invocation_id))]
    pub async fn run<T, F, Fut>(&self, invocation_id: InvocationId, step: &str, action: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, ActionError>>,
    {
        let key = StepKey::new(invocation_id, step);
        let _guard = self.locks.lock(key.clone()).await;

        let record = match self.journal.load_step(&key).await? {
            Some(record) if record.status == StepStatus::Completed => {
                tracing::debug!(step, "replaying journaled step result");
                metrics::counter!("step_replays_total").increment(1);
                let payload = record.payload.unwrap_or(serde_json::Value::Null);
                return Ok(serde_json::from_value(payload)?);
            }
            Some(record) if record.status == StepStatus::Failed => {
                metrics::counter!("step_replays_total").increment(1);
                return Err(RuntimeError::StepTerminalFailure {
                    step: step.to_string(),
                    reason: record.error.unwrap_or_default(),
                });
            }
            Some(pending) => pending,
            None => StepRecord::pending(),
        };

        let attempt = record.begin_attempt();
        self.journal.save_step(&key, attempt.clone()).await?;
        metrics::counter!("step_executions_total").increment(1);
        tracing::debug!(step, attempt = attempt.attempts, "executing step");

        match action().await {
            Ok(value) => {
                let payload = serde_json::to_value(&value)?;
                self.journal.save_step(&key, attempt.completed(payload)).await?;
                Ok(value)
            }
            Err(ActionError::Retryable(reason)) => {
                tracing::warn!(step, %reason, "step failed, will be retried");
                self.journal
                    .save_step(&key, attempt.retryable_failure(reason.clone()))
                    .await?;
                Err(RuntimeError::StepRetryable {
                    step: step.to_string(),
                    reason,
                })
            }
            Err(ActionError::Terminal(reason)) => {
                tracing::warn!(step, %reason, "step failed terminally");
                metrics::counter!("step_failures_total").increment(1);
                self.journal
                    .save_step(&key, attempt.failed(reason.clone()))
                    .await?;
                Err(RuntimeError::StepTerminalFailure {
                    step: step.to_string(),
                    reason,
                })
            }
        }
    }

    /// Returns the journaled record of a step, if any.
    pub async fn record(&self, invocation_id: InvocationId, step: &str) -> Result<Option<StepRecord>> {
        Ok(self.journal.load_step(&StepKey::new(invocation_id, step)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use journal::InMemoryJournal;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn counting_action(
        calls: Arc<AtomicU32>,
    ) -> impl FnOnce() -> std::future::Ready<std::result::Result<u32, ActionError>> {
        move || std::future::ready(Ok(calls.fetch_add(1, Ordering::SeqCst) + 1))
    }

    #[tokio::test]
    async fn test_first_run_executes_and_records() {
        let executor = StepExecutor::new(InMemoryJournal::new());
        let id = InvocationId::new();
        let calls = Arc::new(AtomicU32::new(0));

        let value: u32 = executor.run(id, "charge", counting_action(calls.clone())).await.unwrap();
        assert_eq!(value, 1);

        let record = executor.record(id, "charge").await.unwrap().unwrap();
        assert_eq!(record.status, StepStatus::Completed);
        assert_eq!(record.payload, Some(serde_json::json!(1)));
        assert_eq!(record.attempts, 1);
    }

    #[tokio::test]
    async fn test_rerun_replays_without_executing() {
        let executor = StepExecutor::new(InMemoryJournal::new());
        let id = InvocationId::new();
        let calls = Arc::new(AtomicU32::new(0));

        let first: u32 = executor.run(id, "charge", counting_action(calls.clone())).await.unwrap();
        let second: u32 = executor.run(id, "charge", counting_action(calls.clone())).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_steps_are_scoped_by_invocation_and_name() {
        let executor = StepExecutor::new(InMemoryJournal::new());
        let id = InvocationId::new();
        let calls = Arc::new(AtomicU32::new(0));

        let a: u32 = executor.run(id, "a", counting_action(calls.clone())).await.unwrap();
        let b: u32 = executor.run(id, "b", counting_action(calls.clone())).await.unwrap();
        let other: u32 = executor
            .run(InvocationId::new(), "a", counting_action(calls.clone()))
            .await
            .unwrap();

        assert_eq!((a, b, other), (1, 2, 3));
    }

    #[tokio::test]
    async fn test_finished_steps_release_their_locks() {
        let executor = StepExecutor::new(InMemoryJournal::new());
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..1000 {
            let _: u32 = executor
                .run(InvocationId::new(), "charge", counting_action(calls.clone()))
                .await
                .unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1000);
        assert_eq!(executor.locks.len(), 0);
    }

    #[tokio::test]
    async fn test_retryable_failure_stays_pending_and_reruns() {
        let executor = StepExecutor::new(InMemoryJournal::new());
        let id = InvocationId::new();

        let result: Result<bool> = executor
            .run(id, "charge", || async { Err(ActionError::retryable("provider busy")) })
            .await;
        assert!(matches!(result, Err(RuntimeError::StepRetryable { .. })));

        let record = executor.record(id, "charge").await.unwrap().unwrap();
        assert_eq!(record.status, StepStatus::Pending);
        assert_eq!(record.error.as_deref(), Some("provider busy"));

        let value: bool = executor.run(id, "charge", || async { Ok(true) }).await.unwrap();
        assert!(value);

        let record = executor.record(id, "charge").await.unwrap().unwrap();
        assert_eq!(record.status, StepStatus::Completed);
        assert_eq!(record.attempts, 2);
    }

    #[tokio::test]
    async fn test_terminal_failure_is_recorded_and_replayed() {
        let executor = StepExecutor::new(InMemoryJournal::new());
        let id = InvocationId::new();
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<u32> = executor
            .run(id, "charge", || async { Err(ActionError::terminal("card declined")) })
            .await;
        assert!(matches!(
            result,
            Err(RuntimeError::StepTerminalFailure { ref reason, .. }) if reason == "card declined"
        ));

        let replay: Result<u32> = executor.run(id, "charge", counting_action(calls.clone())).await;
        assert!(matches!(replay, Err(RuntimeError::StepTerminalFailure { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_runs_execute_once() {
        let executor = Arc::new(StepExecutor::new(InMemoryJournal::new()));
        let id = InvocationId::new();
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let executor = Arc::clone(&executor);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                executor
                    .run(id, "charge", || async move {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Ok::<_, ActionError>(calls.fetch_add(1, Ordering::SeqCst) + 1)
                    })
                    .await
                    .unwrap()
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 1);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
