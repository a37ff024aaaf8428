//! Queue message types for the two-queue architecture.
//!
//! - `inbound_webhooks`: [`InboundEnvelope`] written by ingress
//! - `email_simulator`: [`SimulatorJob`] written by the normalizer
//! - `email_simulator_dead_letter`: [`DeadLetter`] written by the simulator

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Queue name for raw inbound webhooks.
pub const INBOUND_QUEUE: &str = "inbound_webhooks";

/// Queue name for normalized email simulation jobs.
pub const SIMULATOR_QUEUE: &str = "email_simulator";

/// Queue name for work acknowledged without completing.
pub const DEAD_LETTER_QUEUE: &str = "email_simulator_dead_letter";

/// Provider that delivered a webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Cloudflare,
    Mailgun,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Cloudflare => "cloudflare",
            Source::Mailgun => "mailgun",
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Raw envelopes (inbound_webhooks queue)
// =============================================================================

/// Unparsed webhook payload, tagged by `source`.
///
/// Ingress enqueues these without looking inside the message body so it can
/// answer the provider straight away.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum InboundEnvelope {
    Cloudflare(CloudflareRawPayload),
    Mailgun(MailgunRawPayload),
}

impl InboundEnvelope {
    pub fn source(&self) -> Source {
        match self {
            InboundEnvelope::Cloudflare(_) => Source::Cloudflare,
            InboundEnvelope::Mailgun(_) => Source::Mailgun,
        }
    }

    pub fn envelope_id(&self) -> Uuid {
        match self {
            InboundEnvelope::Cloudflare(p) => p.envelope_id,
            InboundEnvelope::Mailgun(p) => p.envelope_id,
        }
    }

    pub fn recipient(&self) -> &str {
        match self {
            InboundEnvelope::Cloudflare(p) => &p.to,
            InboundEnvelope::Mailgun(p) => &p.recipient,
        }
    }
}

/// Cloudflare Email Worker payload: a raw RFC 5322 message plus envelope fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudflareRawPayload {
    pub envelope_id: Uuid,
    #[serde(rename = "from")]
    pub from_field: String,
    pub to: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub timestamp: String,
    pub raw_content: String,
}

/// Mailgun route payload. The body is already split into parts by Mailgun.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailgunRawPayload {
    pub envelope_id: Uuid,
    pub recipient: String,
    #[serde(default)]
    pub sender: String,
    #[serde(default, rename = "from")]
    pub from_field: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body_html: Option<String>,
    #[serde(default)]
    pub body_plain: Option<String>,
    #[serde(default)]
    pub stripped_html: Option<String>,
    /// JSON array of `[name, value]` header pairs.
    #[serde(default)]
    pub message_headers: Option<String>,
    /// Already verified by ingress; kept for fallback ids.
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub token: String,
}

// =============================================================================
// Simulator jobs (email_simulator queue)
// =============================================================================

/// Normalized job consumed by the simulation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatorJob {
    pub message_id: String,
    pub recipient: String,
    #[serde(default)]
    pub html: Option<String>,
    pub source: Source,
}

impl SimulatorJob {
    pub fn new(message_id: String, recipient: String, html: Option<String>, source: Source) -> Self {
        Self {
            message_id,
            recipient,
            html,
            source,
        }
    }
}

// =============================================================================
// Dead letters
// =============================================================================

/// Record of work that was acknowledged without being carried out in full.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub message_id: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_urls: Vec<String>,
    /// Original body when it could not be decoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}
