//! Raw envelope normalization.
//!
//! Turns the provider payloads queued by ingress into [`SimulatorJob`]s.
//!
//! ## Processing Flow
//!
//! ```text
//! InboundEnvelope → normalize() → SimulatorJob
//! ```

pub mod cloudflare;
pub mod handler;
pub mod mailgun;
pub mod mime;

use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::MalformedPayloadError;
use crate::queue::{InboundEnvelope, SimulatorJob};

pub use handler::NormalizeHandler;
pub use mime::{parse_raw_message, ParsedMessage};

/// One provider payload's way of becoming a job.
pub trait Normalize {
    fn normalize(self) -> Result<SimulatorJob, MalformedPayloadError>;
}

/// Route an envelope to its provider's normalization.
pub fn normalize(envelope: InboundEnvelope) -> Result<SimulatorJob, MalformedPayloadError> {
    info!(
        envelope_id = %envelope.envelope_id(),
        source = %envelope.source(),
        "envelope_normalize_start"
    );

    match envelope {
        InboundEnvelope::Cloudflare(payload) => payload.normalize(),
        InboundEnvelope::Mailgun(payload) => payload.normalize(),
    }
}

/// Deterministic id for messages that carry no `Message-Id`.
///
/// Each field is length-prefixed before hashing, so distinct
/// `(sender, recipient, timestamp)` triples never share an encoding.
pub fn fallback_message_id(sender: &str, recipient: &str, timestamp: &str) -> String {
    let mut hasher = Sha256::new();
    for field in [sender, recipient, timestamp] {
        hasher.update((field.len() as u64).to_be_bytes());
        hasher.update(field.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Strip whitespace and angle brackets; `None` if nothing is left.
pub(crate) fn clean_message_id(raw: &str) -> Option<String> {
    let id = raw.trim().trim_matches(|c| c == '<' || c == '>').trim();
    (!id.is_empty()).then(|| id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{CloudflareRawPayload, MailgunRawPayload, Source};
    use std::collections::HashSet;
    use uuid::Uuid;

    #[test]
    fn test_normalize_routes_by_source() {
        let mailgun = InboundEnvelope::Mailgun(MailgunRawPayload {
            envelope_id: Uuid::new_v4(),
            recipient: "test@example.com".to_string(),
            sender: String::new(),
            from_field: String::new(),
            subject: "Test".to_string(),
            body_html: Some("<html>Test</html>".to_string()),
            body_plain: None,
            stripped_html: None,
            message_headers: Some(r#"[["Message-Id", "<msg@example.com>"]]"#.to_string()),
            timestamp: String::new(),
            token: String::new(),
        });
        let job = normalize(mailgun).unwrap();
        assert_eq!(job.message_id, "msg@example.com");
        assert_eq!(job.source, Source::Mailgun);

        let cloudflare = InboundEnvelope::Cloudflare(CloudflareRawPayload {
            envelope_id: Uuid::new_v4(),
            from_field: "sender@example.com".to_string(),
            to: "recipient@example.com".to_string(),
            subject: "Test".to_string(),
            timestamp: String::new(),
            raw_content: "Message-Id: <cf@example.com>\r\nContent-Type: text/html\r\n\r\n<html>Test</html>"
                .to_string(),
        });
        let job = normalize(cloudflare).unwrap();
        assert_eq!(job.message_id, "cf@example.com");
        assert_eq!(job.source, Source::Cloudflare);
    }

    #[test]
    fn test_fallback_ids_do_not_collide_on_shifted_fields() {
        let triples = [
            ("a", "bc", "d"),
            ("ab", "c", "d"),
            ("a", "b", "cd"),
            ("a-b", "c", "d"),
            ("a", "b-c", "d"),
            ("", "abcd", ""),
            ("abcd", "", ""),
            ("sender@example.com", "user@example.com", "1700000000"),
            ("sender@example.com", "user@example.com", "1700000001"),
        ];

        let ids: HashSet<String> = triples
            .iter()
            .map(|(s, r, t)| fallback_message_id(s, r, t))
            .collect();
        assert_eq!(ids.len(), triples.len());
    }

    #[test]
    fn test_fallback_id_is_stable_hex() {
        let id = fallback_message_id("s", "r", "t");
        assert_eq!(id, fallback_message_id("s", "r", "t"));
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_clean_message_id() {
        assert_eq!(clean_message_id(" <abc@x> "), Some("abc@x".to_string()));
        assert_eq!(clean_message_id("abc@x"), Some("abc@x".to_string()));
        assert_eq!(clean_message_id("<>"), None);
        assert_eq!(clean_message_id("   "), None);
    }
}
