//! Cloudflare envelopes carry the raw RFC 5322 message, which is parsed here.

use tracing::info;

use super::mime::parse_raw_message;
use super::{fallback_message_id, Normalize};
use crate::error::MalformedPayloadError;
use crate::queue::{CloudflareRawPayload, SimulatorJob, Source};

impl Normalize for CloudflareRawPayload {
    fn normalize(self) -> Result<SimulatorJob, MalformedPayloadError> {
        let recipient = self.to.trim();
        if recipient.is_empty() {
            return Err(MalformedPayloadError::MissingRecipient);
        }

        let parsed = parse_raw_message(&self.raw_content)?;
        let message_id = parsed.message_id.unwrap_or_else(|| {
            let id = fallback_message_id(&self.from_field, recipient, &self.timestamp);
            info!(to = %recipient, generated_id = %id, "cloudflare_message_id_fallback");
            id
        });

        info!(
            envelope_id = %self.envelope_id,
            message_id = %message_id,
            has_html = parsed.html.is_some(),
            "cloudflare_normalized"
        );

        Ok(SimulatorJob::new(
            message_id,
            recipient.to_string(),
            parsed.html,
            Source::Cloudflare,
        ))
    }
}
