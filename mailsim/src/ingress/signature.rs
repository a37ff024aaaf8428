//! Webhook authenticity checks.
//!
//! Mailgun signs webhook requests using HMAC-SHA256.
//! Reference: https://documentation.mailgun.com/docs/mailgun/user-manual/events/webhooks/#securing-webhooks
//!
//! Cloudflare Email Workers forward a shared secret in `X-Custom-Auth`.

use std::time::{SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

use crate::error::AuthError;

type HmacSha256 = Hmac<Sha256>;

/// Verify a Mailgun webhook signature against the current time.
///
/// Mailgun webhooks include three fields for signature verification:
/// - timestamp: Unix epoch seconds when the webhook was generated
/// - token: A randomly generated string
/// - signature: HMAC-SHA256 hex digest of timestamp + token
///
/// The timestamp must be within `max_age_seconds` of now in either direction.
pub fn verify_mailgun_signature(
    signing_key: &str,
    timestamp: &str,
    token: &str,
    signature: &str,
    max_age_seconds: u64,
) -> Result<(), AuthError> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    verify_mailgun_signature_at(signing_key, timestamp, token, signature, max_age_seconds, now)
}

/// [`verify_mailgun_signature`] with an explicit clock.
pub fn verify_mailgun_signature_at(
    signing_key: &str,
    timestamp: &str,
    token: &str,
    signature: &str,
    max_age_seconds: u64,
    now: u64,
) -> Result<(), AuthError> {
    if signing_key.is_empty() || timestamp.is_empty() || token.is_empty() || signature.is_empty() {
        warn!(
            has_timestamp = !timestamp.is_empty(),
            has_token = !token.is_empty(),
            has_signature = !signature.is_empty(),
            "mailgun_signature_missing_fields"
        );
        return Err(AuthError::MissingFields);
    }

    let webhook_time: u64 = timestamp.trim().parse().map_err(|_| {
        warn!(timestamp = %timestamp, "mailgun_signature_invalid_timestamp");
        AuthError::InvalidTimestamp(timestamp.to_string())
    })?;

    let age = now.abs_diff(webhook_time);
    if age > max_age_seconds {
        warn!(
            webhook_time = webhook_time,
            current_time = now,
            age_seconds = age,
            max_age_seconds = max_age_seconds,
            "mailgun_signature_stale"
        );
        return Err(AuthError::Stale {
            age_seconds: age,
            max_age_seconds,
        });
    }

    let provided = hex::decode(signature.trim()).map_err(|_| {
        warn!(actual_length = signature.len(), "mailgun_signature_not_hex");
        AuthError::SignatureMismatch
    })?;

    let mut mac =
        HmacSha256::new_from_slice(signing_key.as_bytes()).map_err(|_| AuthError::SignatureMismatch)?;
    mac.update(timestamp.as_bytes());
    mac.update(token.as_bytes());

    // `verify_slice` compares in constant time.
    mac.verify_slice(&provided).map_err(|_| {
        warn!(actual_length = signature.len(), "mailgun_signature_mismatch");
        AuthError::SignatureMismatch
    })
}

/// Compare the `X-Custom-Auth` header against the configured token.
pub fn verify_shared_token(provided: Option<&str>, expected: &str) -> Result<(), AuthError> {
    let provided = provided.ok_or(AuthError::MissingToken)?;
    if constant_time_eq(provided.as_bytes(), expected.as_bytes()) {
        Ok(())
    } else {
        Err(AuthError::TokenMismatch)
    }
}

/// Whether `recipient` is an address at `domain` (case-insensitive).
pub fn verify_recipient_domain(recipient: &str, domain: &str) -> Result<(), AuthError> {
    let in_domain = recipient
        .trim()
        .rsplit_once('@')
        .is_some_and(|(_, host)| host.eq_ignore_ascii_case(domain.trim()));

    if in_domain {
        Ok(())
    } else {
        Err(AuthError::ForeignRecipient {
            recipient: recipient.to_string(),
            domain: domain.to_string(),
        })
    }
}

/// Constant-time comparison; only the length leaks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
pub(crate) fn sign(signing_key: &str, timestamp: &str, token: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(signing_key.as_bytes()).unwrap();
    mac.update(format!("{}{}", timestamp, token).as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: u64 = 1_700_000_000;

    #[test]
    fn test_verify_signature_missing_fields() {
        for (key, ts, token, sig) in [
            ("", "123", "token", "sig"),
            ("key", "", "token", "sig"),
            ("key", "123", "", "sig"),
            ("key", "123", "token", ""),
        ] {
            assert_eq!(
                verify_mailgun_signature_at(key, ts, token, sig, 300, NOW),
                Err(AuthError::MissingFields)
            );
        }
    }

    #[test]
    fn test_verify_signature_invalid_timestamp() {
        assert!(matches!(
            verify_mailgun_signature_at("key", "not-a-number", "token", "sig", 300, NOW),
            Err(AuthError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn test_verify_signature_stale_in_both_directions() {
        let key = "test-signing-key";
        for ts in [NOW - 301, NOW + 301] {
            let ts = ts.to_string();
            let sig = sign(key, &ts, "token");
            assert_eq!(
                verify_mailgun_signature_at(key, &ts, "token", &sig, 300, NOW),
                Err(AuthError::Stale {
                    age_seconds: 301,
                    max_age_seconds: 300
                })
            );
        }
    }

    #[test]
    fn test_verify_signature_valid() {
        let key = "test-signing-key";
        let ts = (NOW - 10).to_string();
        let sig = sign(key, &ts, "random-token");

        assert_eq!(
            verify_mailgun_signature_at(key, &ts, "random-token", &sig, 300, NOW),
            Ok(())
        );
    }

    #[test]
    fn test_verify_signature_valid_against_clock() {
        let key = "test-signing-key";
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
            .to_string();
        let sig = sign(key, &ts, "random-token");

        assert!(verify_mailgun_signature(key, &ts, "random-token", &sig, 300).is_ok());
    }

    #[test]
    fn test_verify_signature_mismatch() {
        let ts = NOW.to_string();
        let sig = sign("other-key", &ts, "token");

        assert_eq!(
            verify_mailgun_signature_at("key", &ts, "token", &sig, 300, NOW),
            Err(AuthError::SignatureMismatch)
        );
        assert_eq!(
            verify_mailgun_signature_at("key", &ts, "token", "zz-not-hex", 300, NOW),
            Err(AuthError::SignatureMismatch)
        );
    }

    #[test]
    fn test_shared_token() {
        assert_eq!(verify_shared_token(Some("secret"), "secret"), Ok(()));
        assert_eq!(
            verify_shared_token(Some("secreT"), "secret"),
            Err(AuthError::TokenMismatch)
        );
        assert_eq!(
            verify_shared_token(Some("secret-longer"), "secret"),
            Err(AuthError::TokenMismatch)
        );
        assert_eq!(verify_shared_token(None, "secret"), Err(AuthError::MissingToken));
    }

    #[test]
    fn test_recipient_domain() {
        assert!(verify_recipient_domain("user@mg.example.com", "mg.example.com").is_ok());
        assert!(verify_recipient_domain("User@MG.Example.com", "mg.example.com").is_ok());
        assert!(verify_recipient_domain("user@evil-mg.example.com", "mg.example.com").is_err());
        assert!(verify_recipient_domain("user@example.com", "mg.example.com").is_err());
        assert!(verify_recipient_domain("no-at-sign", "mg.example.com").is_err());
    }
}
