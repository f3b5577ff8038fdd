//! Checkout demo entry point.

use app::config::Config;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, stopping demo");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, stopping demo");
        }
    }
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    tracing::info!(
        tickets = ?config.tickets,
        payment_timeout_secs = config.checkout.payment_timeout.as_secs(),
        amount = %config.checkout.payment_amount,
        "starting checkout demo"
    );

    // 3. Run the scenarios until done or interrupted
    tokio::select! {
        result = app::demo::run(&config) => match result {
            Ok(summary) => tracing::info!(
                sold = ?summary.sold,
                lost_races = summary.lost_races,
                refused = ?summary.refused,
                resumed = ?summary.resumed,
                "demo finished"
            ),
            Err(e) => tracing::error!(error = %e, "demo failed"),
        },
        () = shutdown_signal() => {}
    }

    // 4. Dump the collected metrics
    println!("{}", metrics_handle.render());
}
