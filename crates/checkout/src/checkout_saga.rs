//! Checkout saga constants.

/// The workflow type identifier recorded in every invocation log.
pub const WORKFLOW_TYPE: &str = "TicketCheckout";

/// Step name: reserve the ticket.
pub const STEP_RESERVE: &str = "reserve";

/// Step name: generate the payment id.
pub const STEP_PAYMENT_ID: &str = "payment-id";

/// Step name: trigger the payment with the provider.
pub const STEP_PAYMENT: &str = "payment";

/// Awakeable the payment provider reports the charge outcome to.
pub const AWAKEABLE_PAYMENT: &str = "payment";

/// Compensation: put the ticket back on sale.
pub const COMPENSATE_UNRESERVE: &str = "unreserve";

/// Compensation: ask the provider to abort the payment.
pub const COMPENSATE_ABORT_PAYMENT: &str = "abort-payment";
