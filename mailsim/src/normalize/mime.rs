//! RFC 5322 message parsing using mailparse.
//!
//! Locates the HTML body and the `Message-Id` of a raw message as forwarded by
//! the Cloudflare email worker.

use mailparse::{parse_mail, MailHeaderMap, ParsedMail};
use tracing::{debug, info, warn};

use super::clean_message_id;
use crate::error::MalformedPayloadError;

#[derive(Debug, Default, PartialEq)]
pub struct ParsedMessage {
    /// Message-Id header value (without angle brackets)
    pub message_id: Option<String>,
    pub subject: Option<String>,
    pub html: Option<String>,
}

/// Parse a raw message. Empty input is malformed.
pub fn parse_raw_message(raw_content: &str) -> Result<ParsedMessage, MalformedPayloadError> {
    if raw_content.trim().is_empty() {
        return Err(MalformedPayloadError::EmptyContent);
    }

    let mail = parse_mail(raw_content.as_bytes())?;

    let parsed = ParsedMessage {
        message_id: mail
            .headers
            .get_first_value("Message-Id")
            .as_deref()
            .and_then(clean_message_id),
        subject: mail.headers.get_first_value("Subject"),
        html: extract_html_body(&mail),
    };

    info!(
        message_id = ?parsed.message_id,
        subject = ?parsed.subject,
        content_type = %mail.ctype.mimetype,
        has_html = parsed.html.is_some(),
        html_length = parsed.html.as_ref().map(|h| h.len()).unwrap_or(0),
        "email_parse_complete"
    );

    Ok(parsed)
}

/// Extract HTML body from a parsed message.
///
/// Handles various message structures:
/// - text/html (direct HTML content)
/// - multipart/* (every HTML part, nested trees included, joined by newlines)
/// - text/plain whose body is visibly HTML
fn extract_html_body(mail: &ParsedMail) -> Option<String> {
    let content_type = mail.ctype.mimetype.to_lowercase();

    if content_type == "text/html" {
        return body_text(mail);
    }

    if content_type.starts_with("multipart/") {
        let mut parts = Vec::new();
        collect_html_parts(&mail.subparts, &mut parts);
        return match parts.len() {
            0 => None,
            1 => parts.pop(),
            n => {
                debug!(html_parts_count = n, "email_multiple_html_parts");
                Some(parts.join("\n"))
            }
        };
    }

    if content_type == "text/plain" {
        let body = body_text(mail)?;
        let lower = body.to_lowercase();
        if lower.contains("<html") || lower.contains("<body") {
            warn!("email_plain_contains_html");
            return Some(body);
        }
    }

    debug!(content_type = %content_type, "email_no_html_found");
    None
}

fn collect_html_parts(parts: &[ParsedMail], out: &mut Vec<String>) {
    for part in parts {
        let part_type = part.ctype.mimetype.to_lowercase();
        if part_type == "text/html" {
            out.extend(body_text(part));
        } else if part_type.starts_with("multipart/") {
            collect_html_parts(&part.subparts, out);
        }
    }
}

/// Decoded body, `None` when blank or undecodable.
fn body_text(mail: &ParsedMail) -> Option<String> {
    match mail.get_body() {
        Ok(body) if !body.trim().is_empty() => Some(body),
        Ok(_) => None,
        Err(e) => {
            warn!(error = %e, "email_body_extraction_failed");
            None
        }
    }
}
