//! Compensation stack for saga rollbacks.

use std::fmt::Display;
use std::future::Future;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

type UndoAction = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), String>> + Send>;

struct CompensationEntry {
    label: String,
    action: UndoAction,
}

/// An undo action that failed during an unwind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationFailure {
    pub label: String,
    pub reason: String,
}

impl std::fmt::Display for CompensationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "compensation '{}' failed: {}", self.label, self.reason)
    }
}

/// What happened during `drain_reverse`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompensationReport {
    /// Labels of the actions that succeeded, in execution order.
    pub executed: Vec<String>,
    pub failures: Vec<CompensationFailure>,
}

impl CompensationReport {
    /// Returns true if every undo action succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Ordered record of undo actions for one invocation.
///
/// Actions are pushed as the workflow makes progress. On failure the whole
/// stack is drained from the most recent entry to the oldest; a failing
/// action is recorded and the unwind carries on. On success the stack is
/// cleared without running anything.
#[derive(Default)]
pub struct CompensationStack {
    entries: Vec<CompensationEntry>,
}

impl CompensationStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an undo action on top of the stack.
    pub fn push<F, Fut, E>(&mut self, label: impl Into<String>, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display,
    {
        let action: UndoAction =
            Box::new(move || Box::pin(async move { action().await.map_err(|e| e.to_string()) }));
        self.entries.push(CompensationEntry {
            label: label.into(),
            action,
        });
    }

    /// Runs every registered action, most recent first, and empties the stack.
    pub async fn drain_reverse(&mut self) -> CompensationReport {
        let mut report = CompensationReport::default();

        while let Some(entry) = self.entries.pop() {
            match (entry.action)().await {
                Ok(()) => {
                    tracing::info!(compensation = %entry.label, "compensation executed");
                    metrics::counter!("compensations_executed_total").increment(1);
                    report.executed.push(entry.label);
                }
                Err(reason) => {
                    tracing::error!(compensation = %entry.label, %reason, "compensation failed");
                    metrics::counter!("compensation_failures_total").increment(1);
                    report.failures.push(CompensationFailure {
                        label: entry.label,
                        reason,
                    });
                }
            }
        }

        report
    }

    /// Discards every registered action without running it.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Labels from bottom (oldest) to top (most recent).
    pub fn labels(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.label.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for CompensationStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompensationStack")
            .field("labels", &self.labels())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder(
        log: Arc<Mutex<Vec<String>>>,
        label: &'static str,
        fail: bool,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<(), String>> + Send + 'static {
        move || {
            Box::pin(async move {
                log.lock().unwrap().push(label.to_string());
                if fail {
                    Err(format!("{label} unavailable"))
                } else {
                    Ok(())
                }
            })
        }
    }

    #[tokio::test]
    async fn test_drain_runs_in_reverse_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut stack = CompensationStack::new();
        stack.push("first", recorder(log.clone(), "first", false));
        stack.push("second", recorder(log.clone(), "second", false));
        stack.push("third", recorder(log.clone(), "third", false));

        let report = stack.drain_reverse().await;

        assert_eq!(*log.lock().unwrap(), vec!["third", "second", "first"]);
        assert_eq!(report.executed, vec!["third", "second", "first"]);
        assert!(report.is_clean());
        assert!(stack.is_empty());
    }

    #[tokio::test]
    async fn test_drain_continues_past_failures() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut stack = CompensationStack::new();
        stack.push("unreserve", recorder(log.clone(), "unreserve", false));
        stack.push("abort-payment", recorder(log.clone(), "abort-payment", true));
        stack.push("notify", recorder(log.clone(), "notify", false));

        let report = stack.drain_reverse().await;

        assert_eq!(*log.lock().unwrap(), vec!["notify", "abort-payment", "unreserve"]);
        assert_eq!(report.executed, vec!["notify", "unreserve"]);
        assert_eq!(
            report.failures,
            vec![CompensationFailure {
                label: "abort-payment".into(),
                reason: "abort-payment unavailable".into(),
            }]
        );
        assert!(stack.is_empty());
    }

    #[tokio::test]
    async fn test_clear_discards_without_running() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut stack = CompensationStack::new();
        stack.push("unreserve", recorder(log.clone(), "unreserve", false));
        assert_eq!(stack.len(), 1);

        stack.clear();
        let report = stack.drain_reverse().await;

        assert!(log.lock().unwrap().is_empty());
        assert!(report.executed.is_empty());
    }

    #[test]
    fn test_labels_bottom_to_top() {
        let mut stack = CompensationStack::new();
        stack.push("a", || async { Ok::<_, String>(()) });
        stack.push("b", || async { Ok::<_, String>(()) });
        assert_eq!(stack.labels(), vec!["a", "b"]);
        assert_eq!(format!("{stack:?}"), r#"CompensationStack { labels: ["a", "b"] }"#);
    }
}
