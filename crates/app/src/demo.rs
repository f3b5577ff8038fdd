//! Demo scenarios run against in-memory services.

use checkout::error::Result;
use checkout::{CheckoutError, CheckoutWorkflow, InMemoryPaymentProvider, PaymentBehavior};
use common::InvocationId;
use futures_util::future::join_all;
use journal::InMemoryJournal;
use runtime::Runtime;

use crate::config::Config;

/// Ticket whose payment is refused.
pub const REFUSED_TICKET: &str = "B1";

/// Ticket whose first payment attempt hits an unavailable provider.
pub const RESUMED_TICKET: &str = "C1";

/// What happened during a demo run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DemoSummary {
    pub sold: Vec<String>,
    pub lost_races: usize,
    pub refused: Vec<String>,
    pub resumed: Vec<String>,
}

/// Runs every scenario in turn.
///
/// 1. Two buyers race for each configured ticket; payments settle via a delayed callback.
/// 2. A payment is refused and the ticket goes back on sale.
/// 3. A checkout is suspended by a provider outage and resumed under the same invocation id.
pub async fn run(config: &Config) -> Result<DemoSummary> {
    let runtime = Runtime::new(InMemoryJournal::new());
    let payments = InMemoryPaymentProvider::with_broker(runtime.broker().clone());
    let workflow = CheckoutWorkflow::new(runtime, payments.clone(), config.checkout.clone());
    let mut summary = DemoSummary::default();

    payments.set_behavior(PaymentBehavior::Callback {
        outcome: true,
        delay: config.webhook_delay,
    });
    let races = config
        .tickets
        .iter()
        .flat_map(|ticket| [ticket, ticket])
        .map(|ticket| {
            let workflow = workflow.clone();
            async move { (ticket, workflow.checkout_new(ticket).await) }
        });
    for (ticket, result) in join_all(races).await {
        if result? {
            summary.sold.push(ticket.clone());
        } else {
            summary.lost_races += 1;
        }
    }
    tracing::info!(sold = summary.sold.len(), lost = summary.lost_races, "races finished");

    payments.set_behavior(PaymentBehavior::Callback {
        outcome: false,
        delay: config.webhook_delay,
    });
    if !workflow.checkout_new(REFUSED_TICKET).await? {
        let status = workflow.tickets().status(REFUSED_TICKET).await?;
        tracing::info!(ticket = REFUSED_TICKET, %status, "payment refused");
        summary.refused.push(REFUSED_TICKET.to_string());
    }

    payments.set_behavior(PaymentBehavior::Settle(true));
    payments.fail_next_charges(1);
    let invocation_id = InvocationId::new();
    match workflow.checkout(invocation_id, RESUMED_TICKET).await {
        Err(CheckoutError::Retry { step, .. }) => {
            tracing::info!(%invocation_id, %step, "provider unavailable, resuming invocation");
            if workflow.checkout(invocation_id, RESUMED_TICKET).await? {
                summary.resumed.push(RESUMED_TICKET.to_string());
            }
        }
        other => {
            other?;
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_demo_run() {
        let config = Config {
            tickets: vec!["A1".to_string(), "A2".to_string()],
            webhook_delay: Duration::from_millis(5),
            ..Config::default()
        };

        let mut summary = run(&config).await.unwrap();
        summary.sold.sort();

        assert_eq!(summary.sold, vec!["A1", "A2"]);
        assert_eq!(summary.lost_races, 2);
        assert_eq!(summary.refused, vec![REFUSED_TICKET]);
        assert_eq!(summary.resumed, vec![RESUMED_TICKET]);
    }
}
