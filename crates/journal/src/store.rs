use async_trait::async_trait;

use crate::{EventEnvelope, InvocationId, Result, StepKey, StepRecord, Version};

/// Core trait for journal implementations.
///
/// A journal is the durable memory of the runtime. All implementations must
/// be thread-safe (Send + Sync); callers provide any per-key serialization
/// they need on top of it.
#[async_trait]
pub trait Journal: Send + Sync {
    /// Loads the record of a step, if the step has ever been started.
    async fn load_step(&self, key: &StepKey) -> Result<Option<StepRecord>>;

    /// Stores the record of a step.
    ///
    /// A `Pending` record may be replaced; once a record is `Completed` or
    /// `Failed` any further write fails with `StepAlreadyRecorded`.
    async fn save_step(&self, key: &StepKey, record: StepRecord) -> Result<()>;

    /// Loads the state stored under `key` in `namespace`.
    async fn load_state(&self, namespace: &str, key: &str) -> Result<Option<serde_json::Value>>;

    /// Replaces the state stored under `key` in `namespace`.
    async fn save_state(&self, namespace: &str, key: &str, value: serde_json::Value)
    -> Result<()>;

    /// Appends events to an invocation log.
    ///
    /// Events are appended atomically. The operation fails with
    /// `ConcurrencyConflict` if the log is not at `expected_version`.
    ///
    /// Returns the new version of the log after appending.
    async fn append_events(
        &self,
        invocation_id: InvocationId,
        expected_version: Version,
        events: Vec<EventEnvelope>,
    ) -> Result<Version>;

    /// Retrieves the invocation log in version order (oldest first).
    async fn load_events(&self, invocation_id: InvocationId) -> Result<Vec<EventEnvelope>>;
}

/// Validates events before appending.
pub fn validate_events_for_append(
    invocation_id: InvocationId,
    expected_version: Version,
    events: &[EventEnvelope],
) -> std::result::Result<(), String> {
    if events.is_empty() {
        return Err("Cannot append empty event list".to_string());
    }

    let mut next = expected_version;
    for event in events {
        if event.invocation_id != invocation_id {
            return Err("All events must belong to the same invocation".to_string());
        }
        next = next.next();
        if event.version != next {
            return Err(format!(
                "Event versions must be sequential. Expected {}, got {}",
                next, event.version
            ));
        }
    }

    Ok(())
}
