use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a workflow invocation.
///
/// Every durable record (journaled steps, correlation tokens, the invocation
/// log itself) is scoped by this id. Re-invoking a workflow with the same id
/// resumes it instead of starting over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvocationId(Uuid);

impl InvocationId {
    /// Creates a new random invocation ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an invocation ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for InvocationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for InvocationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Money amount represented in cents to avoid floating point issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Creates a new Money amount from cents.
    pub fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Returns the amount in cents.
    pub fn cents(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let cents = self.0.unsigned_abs();
        write!(f, "{sign}${}.{:02}", cents / 100, cents % 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invocation_id_new_creates_unique_ids() {
        let id1 = InvocationId::new();
        let id2 = InvocationId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn invocation_id_from_uuid_preserves_value() {
        let uuid = Uuid::new_v4();
        let id = InvocationId::from_uuid(uuid);
        assert_eq!(id.as_uuid(), uuid);
        assert_eq!(id.to_string(), uuid.to_string());
    }

    #[test]
    fn invocation_id_serializes_as_bare_uuid() {
        let id = InvocationId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
    }

    #[test]
    fn money_display() {
        assert_eq!(Money::from_cents(4000).to_string(), "$40.00");
        assert_eq!(Money::from_cents(1205).to_string(), "$12.05");
        assert_eq!(Money::from_cents(-250).to_string(), "-$2.50");
        assert_eq!(Money::from_cents(7).to_string(), "$0.07");
    }

    #[test]
    fn money_display_handles_extremes() {
        assert_eq!(Money::from_cents(i64::MIN).to_string(), "-$92233720368547758.08");
        assert_eq!(Money::from_cents(i64::MAX).to_string(), "$92233720368547758.07");
    }
}
