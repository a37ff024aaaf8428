//! Mailgun envelopes arrive with the body already split into parts.

use tracing::{info, warn};

use super::{clean_message_id, fallback_message_id, Normalize};
use crate::error::MalformedPayloadError;
use crate::queue::{MailgunRawPayload, SimulatorJob, Source};

impl Normalize for MailgunRawPayload {
    fn normalize(self) -> Result<SimulatorJob, MalformedPayloadError> {
        let recipient = self.recipient.trim();
        if recipient.is_empty() {
            return Err(MalformedPayloadError::MissingRecipient);
        }

        let message_id = self
            .message_headers
            .as_deref()
            .and_then(message_id_from_headers)
            .unwrap_or_else(|| {
                let sender = if self.sender.is_empty() {
                    &self.from_field
                } else {
                    &self.sender
                };
                let id = fallback_message_id(sender, recipient, &self.timestamp);
                info!(recipient = %recipient, generated_id = %id, "mailgun_message_id_fallback");
                id
            });

        let (html_source, html) = match (self.body_html, self.stripped_html) {
            (Some(body), _) if !body.is_empty() => ("body_html", Some(body)),
            (_, Some(stripped)) if !stripped.is_empty() => ("stripped_html", Some(stripped)),
            _ => ("none", None),
        };

        info!(
            envelope_id = %self.envelope_id,
            message_id = %message_id,
            html_source = html_source,
            html_length = html.as_ref().map(|s| s.len()).unwrap_or(0),
            "mailgun_normalized"
        );

        Ok(SimulatorJob::new(
            message_id,
            recipient.to_string(),
            html,
            Source::Mailgun,
        ))
    }
}

/// Extract Message-Id from Mailgun's message-headers JSON string.
///
/// Mailgun provides headers as a JSON array of [name, value] pairs, e.g.:
/// `[["Message-Id", "<abc123@example.com>"], ["Subject", "Hello"], ...]`
fn message_id_from_headers(headers: &str) -> Option<String> {
    if headers.trim().is_empty() {
        return None;
    }

    let pairs: Vec<Vec<String>> = match serde_json::from_str(headers) {
        Ok(pairs) => pairs,
        Err(e) => {
            warn!(
                error = %e,
                headers_preview = %headers.chars().take(200).collect::<String>(),
                "mailgun_headers_parse_failed"
            );
            return None;
        }
    };

    let id = pairs
        .iter()
        .filter_map(|pair| match pair.as_slice() {
            [name, value, ..] if name.eq_ignore_ascii_case("message-id") => Some(value),
            _ => None,
        })
        .find_map(|value| clean_message_id(value));

    if id.is_none() {
        warn!("mailgun_no_message_id_in_headers");
    }
    id
}
