//! Webhook endpoint handlers.
//!
//! These handlers are designed to be extremely fast - they only:
//! 1. Verify authentication
//! 2. Enqueue the raw payload to the broker
//! 3. Return immediately
//!
//! All parsing happens in the normalizer.

use std::sync::Arc;

use axum::{
    extract::{Form, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::signature::{verify_mailgun_signature, verify_recipient_domain, verify_shared_token};
use crate::queue::{CloudflareRawPayload, InboundEnvelope, MailgunRawPayload, Publisher};
use crate::Config;

/// Header carrying the Cloudflare worker's shared secret.
pub const CLOUDFLARE_AUTH_HEADER: &str = "X-Custom-Auth";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub publisher: Publisher,
}

impl AppState {
    pub fn new(config: Config, publisher: Publisher) -> Self {
        Self {
            config: Arc::new(config),
            publisher,
        }
    }
}

// =============================================================================
// Health Check
// =============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// Responses
// =============================================================================

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
}

type WebhookReply = (StatusCode, Json<WebhookResponse>);

fn reply(code: StatusCode, status: &'static str, job_id: Option<Uuid>) -> WebhookReply {
    (code, Json(WebhookResponse { status, job_id }))
}

// =============================================================================
// Mailgun Webhook
// =============================================================================

/// Mailgun form payload.
///
/// Mailgun sends form-encoded data, not JSON.
/// Field names use hyphens, which are aliased here.
#[derive(Debug, Deserialize)]
pub struct MailgunForm {
    pub recipient: String,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default, rename = "body-html")]
    pub body_html: Option<String>,
    #[serde(default, rename = "body-plain")]
    pub body_plain: Option<String>,
    #[serde(default, rename = "stripped-html")]
    pub stripped_html: Option<String>,
    #[serde(default, rename = "stripped-text")]
    pub stripped_text: Option<String>,
    #[serde(default, rename = "message-headers")]
    pub message_headers: Option<String>,
    #[serde(default, rename = "from")]
    pub from_field: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub signature: String,
}

/// Mailgun webhook endpoint.
///
/// Rejections use 406, which Mailgun treats as final. A broker outage answers
/// 503 so Mailgun retries later.
pub async fn mailgun_webhook(
    State(state): State<AppState>,
    Form(form): Form<MailgunForm>,
) -> WebhookReply {
    info!(
        recipient = %form.recipient,
        has_body_html = form.body_html.is_some(),
        body_html_length = form.body_html.as_ref().map(|s| s.len()).unwrap_or(0),
        has_signature = !form.signature.is_empty(),
        "mailgun_webhook_received"
    );

    match state.config.mailgun_signing_key.as_deref() {
        Some(signing_key) => {
            if let Err(e) = verify_mailgun_signature(
                signing_key,
                &form.timestamp,
                &form.token,
                &form.signature,
                state.config.mailgun_signature_max_age,
            ) {
                warn!(recipient = %form.recipient, error = %e, "mailgun_signature_invalid");
                return reply(StatusCode::NOT_ACCEPTABLE, "rejected", None);
            }
        }
        None => warn!("mailgun_signature_not_configured"),
    }

    if let Some(domain) = state.config.mailgun_domain.as_deref() {
        if let Err(e) = verify_recipient_domain(&form.recipient, domain) {
            warn!(
                recipient = %form.recipient,
                expected_domain = %domain,
                error = %e,
                "mailgun_invalid_recipient_domain"
            );
            return reply(StatusCode::NOT_ACCEPTABLE, "rejected", None);
        }
    }

    let envelope_id = Uuid::new_v4();
    let envelope = InboundEnvelope::Mailgun(MailgunRawPayload {
        envelope_id,
        recipient: form.recipient.clone(),
        sender: form.sender,
        from_field: form.from_field,
        subject: form.subject,
        body_html: form.body_html,
        body_plain: form.body_plain,
        stripped_html: form.stripped_html,
        message_headers: form.message_headers,
        timestamp: form.timestamp,
        token: form.token,
    });

    if let Err(e) = state.publisher.publish_inbound(&envelope).await {
        error!(envelope_id = %envelope_id, error = %e, "mailgun_publish_failed");
        return reply(StatusCode::SERVICE_UNAVAILABLE, "unavailable", None);
    }

    info!(recipient = %form.recipient, envelope_id = %envelope_id, "mailgun_enqueued");
    reply(StatusCode::OK, "enqueued", None)
}

// =============================================================================
// Cloudflare Webhook
// =============================================================================

/// Cloudflare Email Worker JSON payload.
#[derive(Debug, Deserialize)]
pub struct CloudflarePayload {
    #[serde(rename = "from")]
    pub from_field: String,
    pub to: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub timestamp: String,
    pub raw_content: String,
}

/// Cloudflare webhook endpoint.
///
/// Answers 202 with the envelope id as `job_id` once the raw message is queued.
pub async fn cloudflare_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CloudflarePayload>,
) -> WebhookReply {
    info!(
        from = %payload.from_field,
        to = %payload.to,
        subject = %payload.subject,
        raw_content_length = payload.raw_content.len(),
        "cloudflare_webhook_received"
    );

    match state.config.cloudflare_auth_token.as_deref() {
        Some(expected) => {
            let provided = headers
                .get(CLOUDFLARE_AUTH_HEADER)
                .and_then(|v| v.to_str().ok());
            if let Err(e) = verify_shared_token(provided, expected) {
                warn!(to = %payload.to, error = %e, "cloudflare_auth_invalid");
                return reply(StatusCode::UNAUTHORIZED, "unauthorized", None);
            }
        }
        None => warn!("cloudflare_auth_not_configured"),
    }

    let envelope_id = Uuid::new_v4();
    let envelope = InboundEnvelope::Cloudflare(CloudflareRawPayload {
        envelope_id,
        from_field: payload.from_field,
        to: payload.to.clone(),
        subject: payload.subject,
        timestamp: payload.timestamp,
        raw_content: payload.raw_content,
    });

    if let Err(e) = state.publisher.publish_inbound(&envelope).await {
        error!(envelope_id = %envelope_id, error = %e, "cloudflare_publish_failed");
        return reply(StatusCode::SERVICE_UNAVAILABLE, "unavailable", None);
    }

    info!(to = %payload.to, envelope_id = %envelope_id, "cloudflare_enqueued");
    reply(StatusCode::ACCEPTED, "enqueued", Some(envelope_id))
}
