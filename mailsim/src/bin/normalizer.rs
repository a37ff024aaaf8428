//! mailsim normalizer - turns queued provider payloads into simulator jobs.
//!
//! Consumes inbound_webhooks, publishes to email_simulator, and only then
//! acknowledges the raw message.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use mailsim::shutdown::shutdown_signal;
use mailsim::telemetry::init_logging;
use mailsim::{AmqpBroker, Broker, Config, NormalizeHandler, Publisher, Stage, INBOUND_QUEUE};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    info!("normalizer_starting");

    let config = Config::from_env();
    info!(
        cloudamqp_url_set = !config.cloudamqp_url.is_empty(),
        concurrency = config.normalizer_concurrency,
        "config_loaded"
    );

    let broker: Arc<dyn Broker> = Arc::new(AmqpBroker::new(config.cloudamqp_url.clone()));
    let handler = Arc::new(NormalizeHandler::new(Publisher::new(Arc::clone(&broker))));

    let result = Stage::new("normalizer", INBOUND_QUEUE, config.normalizer_concurrency)
        .run(Arc::clone(&broker), handler, shutdown_signal())
        .await;

    broker.close().await;
    result.context("Normalizer stage failed")?;

    info!("normalizer_shutdown_complete");
    Ok(())
}
