//! Drives the order workflow end to end: one order confirmed in time, one
//! order cancelled by the payment-timeout saga.

use anyhow::Result;
use eventum_runtime::config::ProcessorConfig;
use order_workflow::{OrderCommand, OrderSystem, PaymentTimeoutSaga};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .compact()
        .init();
    eventum_runtime::metrics::register_metrics();

    // A short payment window so the demo finishes quickly.
    let saga = PaymentTimeoutSaga {
        payment_timeout: Duration::from_secs(3),
    };
    let config = ProcessorConfig::default().with_poll_interval(Duration::from_millis(25));
    let system = OrderSystem::start(saga, config).await?;

    // o1 pays in time.
    system
        .commands
        .send_command(&OrderCommand::CreateOrder {
            order_id: "o1".to_string(),
            product: "widget".to_string(),
        })
        .await?;
    system
        .commands
        .send_command(&OrderCommand::ConfirmOrder {
            order_id: "o1".to_string(),
        })
        .await?;
    tracing::info!(order = ?system.order("o1").await?, "o1 settled");

    // o2 never pays; the saga cancels it when the deadline fires.
    system
        .commands
        .send_command(&OrderCommand::CreateOrder {
            order_id: "o2".to_string(),
            product: "gadget".to_string(),
        })
        .await?;
    tracing::info!("o2 created, waiting out the payment window");
    tokio::time::sleep(Duration::from_secs(5)).await;
    tracing::info!(order = ?system.order("o2").await?, "o2 settled");

    system.shutdown().await;
    Ok(())
}
