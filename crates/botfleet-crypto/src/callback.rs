// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HMAC-signed callback tokens for manager-bot inline buttons.
//!
//! Wire format: `base64url(payload_json || mac[0..8])` where
//! `mac = HMAC_SHA256(key, payload_json)`. The payload always carries
//! `action`, `ts` (unix seconds) and `uid` (issuing admin). Verification
//! is constant-time and enforces the per-action TTL plus a uid match.

use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL;
use base64::Engine;
use botfleet_core::FleetError;
use chrono::Utc;
use ring::hmac;
use serde::{Deserialize, Serialize};

use crate::cipher::TokenCipher;

/// Truncated MAC length appended to the payload.
const MAC_LEN: usize = 8;

/// Default token lifetime; destructive confirmations get the long TTL.
pub const DEFAULT_TTL_SECS: i64 = 300;
pub const LONG_TTL_SECS: i64 = 900;

/// Signed payload carried inside a callback token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackPayload {
    /// Action discriminator (e.g. "offer:delete", "topup:confirm").
    pub action: String,
    /// Issuing admin's Telegram id; must match the invoking user.
    pub uid: i64,
    /// Issue time, unix seconds.
    pub ts: i64,
    /// Target entity ids, action-specific.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<i64>,
    /// Random nonce to keep equal payloads distinct.
    pub nonce: u32,
}

/// Signs and verifies callback tokens.
pub struct CallbackSigner {
    key: hmac::Key,
}

impl CallbackSigner {
    pub fn new(cipher: &TokenCipher) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, cipher.key_bytes()),
        }
    }

    /// Issues a token for `action` on behalf of `uid`.
    pub fn sign(&self, action: &str, uid: i64, targets: Vec<i64>) -> Result<String, FleetError> {
        let payload = CallbackPayload {
            action: action.to_string(),
            uid,
            ts: Utc::now().timestamp(),
            targets,
            nonce: rand_nonce()?,
        };
        self.sign_payload(&payload)
    }

    fn sign_payload(&self, payload: &CallbackPayload) -> Result<String, FleetError> {
        let raw = serde_json::to_vec(payload)
            .map_err(|e| FleetError::Internal(format!("callback payload serialization: {e}")))?;
        let mac = hmac::sign(&self.key, &raw);
        let mut blob = raw;
        blob.extend_from_slice(&mac.as_ref()[..MAC_LEN]);
        Ok(BASE64URL.encode(blob))
    }

    /// Verifies a token: MAC (constant time), TTL, and uid match.
    ///
    /// `ttl_secs` is chosen by the caller per action class
    /// ([`DEFAULT_TTL_SECS`] or [`LONG_TTL_SECS`]).
    pub fn verify(
        &self,
        token: &str,
        invoking_uid: i64,
        ttl_secs: i64,
    ) -> Result<CallbackPayload, FleetError> {
        let blob = BASE64URL
            .decode(token)
            .map_err(|_| FleetError::Auth("malformed callback token".into()))?;
        if blob.len() <= MAC_LEN {
            return Err(FleetError::Auth("callback token too short".into()));
        }
        let (raw, mac) = blob.split_at(blob.len() - MAC_LEN);

        let expected = hmac::sign(&self.key, raw);
        if ring::constant_time::verify_slices_are_equal(mac, &expected.as_ref()[..MAC_LEN]).is_err()
        {
            return Err(FleetError::Auth("callback token MAC mismatch".into()));
        }

        let payload: CallbackPayload = serde_json::from_slice(raw)
            .map_err(|_| FleetError::Auth("callback token payload invalid".into()))?;

        let age = Utc::now().timestamp() - payload.ts;
        if age > ttl_secs || age < -30 {
            return Err(FleetError::Auth("callback token expired".into()));
        }
        if payload.uid != invoking_uid {
            return Err(FleetError::Auth("callback token issued for another user".into()));
        }
        Ok(payload)
    }
}

fn rand_nonce() -> Result<u32, FleetError> {
    use ring::rand::{SecureRandom, SystemRandom};
    let mut bytes = [0u8; 4];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| FleetError::Crypto("failed to generate callback nonce".into()))?;
    Ok(u32::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> CallbackSigner {
        let key = [7u8; 32];
        CallbackSigner::new(&TokenCipher::new(key))
    }

    #[test]
    fn sign_verify_roundtrip() {
        let s = signer();
        let token = s.sign("offer:delete", 42, vec![7, 9]).unwrap();
        let payload = s.verify(&token, 42, DEFAULT_TTL_SECS).unwrap();
        assert_eq!(payload.action, "offer:delete");
        assert_eq!(payload.uid, 42);
        assert_eq!(payload.targets, vec![7, 9]);
    }

    #[test]
    fn rejects_single_byte_tamper() {
        let s = signer();
        let token = s.sign("offer:delete", 42, vec![]).unwrap();
        let mut blob = BASE64URL.decode(&token).unwrap();
        // Flip one bit anywhere in the payload.
        blob[3] ^= 0x01;
        let tampered = BASE64URL.encode(blob);
        assert!(s.verify(&tampered, 42, DEFAULT_TTL_SECS).is_err());
    }

    #[test]
    fn rejects_wrong_uid() {
        let s = signer();
        let token = s.sign("topup:confirm", 42, vec![]).unwrap();
        assert!(s.verify(&token, 43, DEFAULT_TTL_SECS).is_err());
    }

    #[test]
    fn rejects_expired_token() {
        let s = signer();
        let payload = CallbackPayload {
            action: "offer:delete".into(),
            uid: 42,
            ts: Utc::now().timestamp() - DEFAULT_TTL_SECS - 10,
            targets: vec![],
            nonce: 1,
        };
        let token = s.sign_payload(&payload).unwrap();
        assert!(s.verify(&token, 42, DEFAULT_TTL_SECS).is_err());
        // Still valid under the long TTL used by confirmation actions.
        assert!(s.verify(&token, 42, LONG_TTL_SECS).is_ok());
    }

    #[test]
    fn rejects_tokens_from_another_key() {
        let s1 = signer();
        let s2 = CallbackSigner::new(&TokenCipher::new([9u8; 32]));
        let token = s1.sign("offer:delete", 42, vec![]).unwrap();
        assert!(s2.verify(&token, 42, DEFAULT_TTL_SECS).is_err());
    }

    #[test]
    fn rejects_garbage_tokens() {
        let s = signer();
        assert!(s.verify("not-base64!!!", 42, DEFAULT_TTL_SECS).is_err());
        assert!(s.verify("", 42, DEFAULT_TTL_SECS).is_err());
        assert!(s.verify("AAAA", 42, DEFAULT_TTL_SECS).is_err());
    }
}
