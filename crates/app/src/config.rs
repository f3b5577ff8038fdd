//! Application configuration loaded from environment variables.

use std::time::Duration;

use checkout::CheckoutConfig;

/// Demo configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `CHECKOUT_TICKETS`: comma-separated tickets on sale (default: `"A1,A2,A3"`)
/// - `CHECKOUT_WEBHOOK_DELAY_MS`: delay before the payment callback (default: `250`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - plus the `CHECKOUT_PAYMENT_*` settings of [`CheckoutConfig`]
#[derive(Debug, Clone)]
pub struct Config {
    pub tickets: Vec<String>,
    pub webhook_delay: Duration,
    pub log_level: String,
    pub checkout: CheckoutConfig,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            tickets: std::env::var("CHECKOUT_TICKETS")
                .ok()
                .map(|v| parse_tickets(&v))
                .filter(|tickets| !tickets.is_empty())
                .unwrap_or(defaults.tickets),
            webhook_delay: std::env::var("CHECKOUT_WEBHOOK_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.webhook_delay),
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            checkout: CheckoutConfig::from_env(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tickets: vec!["A1".to_string(), "A2".to_string(), "A3".to_string()],
            webhook_delay: Duration::from_millis(250),
            log_level: "info".to_string(),
            checkout: CheckoutConfig::default(),
        }
    }
}

fn parse_tickets(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.tickets, vec!["A1", "A2", "A3"]);
        assert_eq!(config.webhook_delay, Duration::from_millis(250));
        assert_eq!(config.log_level, "info");
        assert_eq!(config.checkout, CheckoutConfig::default());
    }

    #[test]
    fn test_parse_tickets() {
        assert_eq!(parse_tickets(" B1, B2 ,,B3 "), vec!["B1", "B2", "B3"]);
        assert!(parse_tickets(" , ").is_empty());
    }
}
