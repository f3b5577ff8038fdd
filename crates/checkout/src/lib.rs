//! Durable ticket checkout saga.
//!
//! A checkout invocation follows these steps:
//! 1. Reserve the ticket
//! 2. Charge the payment, settled synchronously or reported later through an awakeable
//! 3. Mark the ticket sold, or roll back
//!
//! Every side effect runs as a journaled step, so re-invoking the same
//! invocation id resumes the saga instead of repeating it. On a terminal
//! failure or a payment timeout, registered compensations are unwound in
//! reverse order before the failure is reported.

pub mod checkout_saga;
pub mod config;
pub mod error;
pub mod events;
pub mod invocation;
pub mod payment;
pub mod state;
pub mod ticket;
pub mod workflow;

pub use config::CheckoutConfig;
pub use error::{CheckoutError, FailureKind};
pub use events::InvocationEvent;
pub use invocation::{InvocationOutcome, WorkflowInvocation};
pub use payment::{
    ChargeOutcome, ChargeRecord, InMemoryPaymentProvider, PaymentBehavior, PaymentError,
    PaymentProvider,
};
pub use state::CheckoutPhase;
pub use ticket::{TicketService, TicketStatus};
pub use workflow::CheckoutWorkflow;
