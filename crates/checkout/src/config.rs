//! Checkout configuration loaded from environment variables.

use std::time::Duration;

use common::Money;

/// Default bound on how long a checkout waits for the payment outcome.
pub const DEFAULT_PAYMENT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Longest payment wait accepted from the environment.
pub const MAX_PAYMENT_TIMEOUT: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Default amount charged per ticket, in cents.
pub const DEFAULT_PAYMENT_AMOUNT_CENTS: i64 = 4000;

/// Checkout settings with sensible defaults.
///
/// Reads from environment variables:
/// - `CHECKOUT_PAYMENT_TIMEOUT_SECS`: payment wait bound (default: `600`,
///   capped at [`MAX_PAYMENT_TIMEOUT`])
/// - `CHECKOUT_PAYMENT_AMOUNT_CENTS`: ticket price (default: `4000`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutConfig {
    pub payment_amount: Money,
    pub payment_timeout: Duration,
}

impl CheckoutConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            payment_amount: lookup("CHECKOUT_PAYMENT_AMOUNT_CENTS")
                .and_then(|v| v.parse().ok())
                .map(Money::from_cents)
                .unwrap_or(defaults.payment_amount),
            payment_timeout: lookup("CHECKOUT_PAYMENT_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .map(|secs| Duration::from_secs(secs).min(MAX_PAYMENT_TIMEOUT))
                .unwrap_or(defaults.payment_timeout),
        }
    }

    /// Returns a copy with a different payment timeout.
    pub fn with_payment_timeout(mut self, timeout: Duration) -> Self {
        self.payment_timeout = timeout;
        self
    }
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            payment_amount: Money::from_cents(DEFAULT_PAYMENT_AMOUNT_CENTS),
            payment_timeout: DEFAULT_PAYMENT_TIMEOUT,
        }
    }
}
