//! Error taxonomy shared by the three pipeline stages.
//!
//! Each stage reacts to exactly one family:
//! - Ingress rejects on [`AuthError`]
//! - Normalizer drops on [`MalformedPayloadError`]
//! - Simulator records [`FetchError`] and carries on
//! - every stage stops on [`BrokerError`]

use thiserror::Error;

/// Webhook authentication failures. Never retried locally.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing signature fields")]
    MissingFields,

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("timestamp is {age_seconds}s old (max {max_age_seconds}s)")]
    Stale { age_seconds: u64, max_age_seconds: u64 },

    #[error("signature mismatch")]
    SignatureMismatch,

    #[error("missing auth header")]
    MissingToken,

    #[error("auth token mismatch")]
    TokenMismatch,

    #[error("recipient {recipient} is outside domain {domain}")]
    ForeignRecipient { recipient: String, domain: String },
}

/// Raw content that can never become a job, no matter how often it is retried.
#[derive(Debug, Error)]
pub enum MalformedPayloadError {
    /// The queue message is not a valid envelope / job document.
    #[error("undecodable message: {0}")]
    Undecodable(#[from] serde_json::Error),

    #[error("recipient is empty")]
    MissingRecipient,

    #[error("raw message content is empty")]
    EmptyContent,

    #[error("unparseable MIME message: {0}")]
    Mime(#[from] mailparse::MailParseError),
}

/// A single outbound fetch failed.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connect/timeout/transport failure. Eligible for retry.
    #[error("transient fetch failure for {url}: {source}")]
    Transient {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} exceeded the redirect limit")]
    TooManyRedirects { url: String },

    /// The target answered, but not with a 2xx/3xx status.
    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient { .. })
    }
}

/// The broker cannot be reached or refused an operation.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("amqp error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("consumer for queue {0} closed")]
    ConsumerClosed(String),
}
