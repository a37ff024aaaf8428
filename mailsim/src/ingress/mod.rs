//! Ingress: a thin web server that authenticates provider webhooks and
//! enqueues the raw payload without looking inside it.

pub mod handlers;
pub mod signature;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use handlers::{
    cloudflare_webhook, health, mailgun_webhook, AppState, CloudflarePayload, HealthResponse,
    MailgunForm, WebhookResponse, CLOUDFLARE_AUTH_HEADER,
};
pub use signature::{verify_mailgun_signature, verify_recipient_domain, verify_shared_token};

/// All ingress routes, traced.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/mailgun", post(mailgun_webhook))
        .route("/webhooks/cloudflare", post(cloudflare_webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
