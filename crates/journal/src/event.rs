//! Invocation log entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::InvocationId;

/// Position in an invocation log.
///
/// An empty log is at version 0; the n-th event carries version n.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Version of a log with no events.
    pub fn initial() -> Self {
        Self::default()
    }

    /// Version of the first event.
    pub fn first() -> Self {
        Self::initial().next()
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    pub fn as_i64(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A logged event, serialized to JSON, with its position and metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    /// Variant name of the event, e.g. "PhaseEntered".
    pub event_type: String,
    pub invocation_id: InvocationId,
    pub version: Version,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    /// Serializes `event` into an envelope at `version`.
    pub fn new<T: Serialize>(
        invocation_id: InvocationId,
        version: Version,
        event_type: impl Into<String>,
        event: &T,
    ) -> Result<Self, serde_json::Error> {
        let payload = serde_json::to_value(event)?;
        Ok(Self::from_raw(invocation_id, version, event_type, payload))
    }

    pub fn from_raw(
        invocation_id: InvocationId,
        version: Version,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            invocation_id,
            version,
            timestamp: Utc::now(),
            payload,
        }
    }
}
