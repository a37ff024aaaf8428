//! mailsim worker - consumes simulator jobs and simulates opens and clicks.
//!
//! Jobs come from the email_simulator queue. Each one may fetch a tracking
//! pixel (open) and follow some of its links (clicks), with configurable
//! probabilities and delays.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use mailsim::shutdown::shutdown_signal;
use mailsim::telemetry::init_logging;
use mailsim::{
    AmqpBroker, Broker, Config, Publisher, SimulationHandler, Simulator, Stage, SIMULATOR_QUEUE,
};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    info!("worker_starting");

    let config = Config::from_env();
    let settings = &config.simulation;
    info!(
        cloudamqp_url_set = !config.cloudamqp_url.is_empty(),
        open_probability = settings.open_probability,
        click_probability = settings.click_probability,
        max_clicks = settings.max_clicks,
        max_redirects = settings.max_redirects,
        fetch_max_attempts = settings.fetch_max_attempts,
        concurrency = config.worker_concurrency,
        "config_loaded"
    );

    let simulator = Simulator::new(config.simulation.clone()).context("Failed to create HTTP client")?;

    let broker: Arc<dyn Broker> = Arc::new(AmqpBroker::new(config.cloudamqp_url.clone()));
    let handler = Arc::new(SimulationHandler::new(
        Arc::new(simulator),
        Publisher::new(Arc::clone(&broker)),
    ));

    let result = Stage::new("simulator", SIMULATOR_QUEUE, config.worker_concurrency)
        .run(Arc::clone(&broker), handler, shutdown_signal())
        .await;

    broker.close().await;
    result.context("Simulator stage failed")?;

    info!("worker_shutdown_complete");
    Ok(())
}
