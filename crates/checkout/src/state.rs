//! Checkout state machine.

use serde::{Deserialize, Serialize};

/// The phase of a checkout invocation.
///
/// State transitions:
/// ```text
/// Start ──► Reserving ──┬──► Reserved ──► PaymentPending ──┬──► Confirming ──► Sold
///                       │        │                         │
///                       │        └─────────────────────────┴──► RollingBack ──► RolledBack
///                       └──► RolledBack (ticket not available)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CheckoutPhase {
    /// Invocation created, nothing done yet.
    #[default]
    Start,

    /// Reserving the ticket.
    Reserving,

    /// The ticket is held for this invocation; the payment is being triggered.
    Reserved,

    /// Waiting for the payment outcome.
    PaymentPending,

    /// Payment succeeded; the sale is being confirmed.
    Confirming,

    /// The ticket was sold (terminal state).
    Sold,

    /// Compensations are being unwound.
    RollingBack,

    /// Nothing is held any more (terminal state).
    RolledBack,
}

impl CheckoutPhase {
    /// Returns true if `next` directly follows this phase.
    pub fn can_transition_to(&self, next: CheckoutPhase) -> bool {
        use CheckoutPhase::*;
        matches!(
            (self, next),
            (Start, Reserving)
                | (Reserving, Reserved)
                | (Reserving, RolledBack)
                | (Reserved, PaymentPending)
                | (Reserved, RollingBack)
                | (PaymentPending, Confirming)
                | (PaymentPending, RollingBack)
                | (Confirming, Sold)
                | (RollingBack, RolledBack)
        )
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CheckoutPhase::Sold | CheckoutPhase::RolledBack)
    }

    /// Returns the phase name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutPhase::Start => "Start",
            CheckoutPhase::Reserving => "Reserving",
            CheckoutPhase::Reserved => "Reserved",
            CheckoutPhase::PaymentPending => "PaymentPending",
            CheckoutPhase::Confirming => "Confirming",
            CheckoutPhase::Sold => "Sold",
            CheckoutPhase::RollingBack => "RollingBack",
            CheckoutPhase::RolledBack => "RolledBack",
        }
    }
}

impl std::fmt::Display for CheckoutPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use CheckoutPhase::*;

    const ALL: [CheckoutPhase; 8] = [
        Start,
        Reserving,
        Reserved,
        PaymentPending,
        Confirming,
        Sold,
        RollingBack,
        RolledBack,
    ];

    #[test]
    fn test_default_phase_is_start() {
        assert_eq!(CheckoutPhase::default(), Start);
    }

    #[test]
    fn test_happy_path_transitions() {
        let path = [Start, Reserving, Reserved, PaymentPending, Confirming, Sold];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_rollback_transitions() {
        assert!(Reserving.can_transition_to(RolledBack));
        assert!(Reserved.can_transition_to(RollingBack));
        assert!(PaymentPending.can_transition_to(RollingBack));
        assert!(RollingBack.can_transition_to(RolledBack));
        assert!(!Confirming.can_transition_to(RollingBack));
    }

    #[test]
    fn test_terminal_states_have_no_successor() {
        for terminal in [Sold, RolledBack] {
            assert!(terminal.is_terminal());
            assert!(ALL.iter().all(|next| !terminal.can_transition_to(*next)));
        }
        assert!(!PaymentPending.is_terminal());
    }

    #[test]
    fn test_no_backward_transitions() {
        assert!(!Reserved.can_transition_to(Reserving));
        assert!(!PaymentPending.can_transition_to(Reserved));
        assert!(!Reserved.can_transition_to(Reserved));
    }

    #[test]
    fn test_serialization() {
        let phase = PaymentPending;
        let json = serde_json::to_string(&phase).unwrap();
        let deserialized: CheckoutPhase = serde_json::from_str(&json).unwrap();
        assert_eq!(phase, deserialized);
        assert_eq!(phase.to_string(), "PaymentPending");
    }
}
