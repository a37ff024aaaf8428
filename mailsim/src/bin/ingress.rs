//! mailsim ingress - high-performance webhook receiver.
//!
//! This binary provides a thin, fast web server that:
//! - Receives webhooks from Mailgun and Cloudflare
//! - Verifies authentication
//! - Immediately enqueues raw payloads to the broker
//!
//! All parsing happens in the normalizer.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;

use mailsim::shutdown::shutdown_signal;
use mailsim::telemetry::init_logging;
use mailsim::{router, AmqpBroker, AppState, Broker, Config, Publisher};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    info!("web_server_starting");

    let config = Config::from_env();
    info!(
        port = config.port,
        cloudflare_auth_configured = config.cloudflare_auth_token.is_some(),
        mailgun_signing_configured = config.mailgun_signing_key.is_some(),
        mailgun_domain = ?config.mailgun_domain,
        "config_loaded"
    );

    let broker: Arc<dyn Broker> = Arc::new(AmqpBroker::new(config.cloudamqp_url.clone()));
    let publisher = Publisher::new(Arc::clone(&broker));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let app = router(AppState::new(config, publisher));

    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "web_server_listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_signal().await;
            info!("web_server_shutting_down");
        })
        .await
        .context("Server error")?;

    broker.close().await;

    info!("web_server_shutdown_complete");
    Ok(())
}
