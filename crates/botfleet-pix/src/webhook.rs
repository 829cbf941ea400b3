// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway webhook signature verification.
//!
//! The gateway signs the raw request body with HMAC-SHA256 over the
//! account token and sends `sha256=<hex>` in the signature header.

use botfleet_core::FleetError;
use ring::hmac;

/// Verifies a webhook signature against the raw body.
pub fn verify_webhook_signature(
    payload: &[u8],
    signature_header: &str,
    secret: &str,
) -> Result<(), FleetError> {
    let digest_hex = signature_header
        .strip_prefix("sha256=")
        .ok_or_else(|| FleetError::Auth("webhook signature must use sha256=<hex> format".into()))?;
    let provided = hex::decode(digest_hex)
        .map_err(|_| FleetError::Auth("webhook signature is not valid hex".into()))?;

    let key = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());
    let expected = hmac::sign(&key, payload);

    ring::constant_time::verify_slices_are_equal(&provided, expected.as_ref())
        .map_err(|_| FleetError::Auth("webhook signature mismatch".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(payload: &[u8], secret: &str) -> String {
        let key = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());
        format!("sha256={}", hex::encode(hmac::sign(&key, payload).as_ref()))
    }

    #[test]
    fn valid_signature_passes() {
        let body = br#"{"id":"9C29870E","status":"paid"}"#;
        let header = sign(body, "gw-token");
        assert!(verify_webhook_signature(body, &header, "gw-token").is_ok());
    }

    #[test]
    fn tampered_body_fails() {
        let body = br#"{"id":"9C29870E","status":"paid"}"#;
        let header = sign(body, "gw-token");
        let tampered = br#"{"id":"9C29870E","status":"created"}"#;
        assert!(verify_webhook_signature(tampered, &header, "gw-token").is_err());
    }

    #[test]
    fn wrong_secret_fails() {
        let body = b"payload";
        let header = sign(body, "right");
        assert!(verify_webhook_signature(body, &header, "wrong").is_err());
    }

    #[test]
    fn malformed_headers_fail() {
        assert!(verify_webhook_signature(b"x", "md5=abc", "s").is_err());
        assert!(verify_webhook_signature(b"x", "sha256=zz", "s").is_err());
        assert!(verify_webhook_signature(b"x", "", "s").is_err());
    }
}
