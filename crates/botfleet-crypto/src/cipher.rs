// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! AES-256-GCM seal/open for tokens at rest.
//!
//! Every call to [`seal`] generates a fresh random 96-bit nonce via the
//! system CSPRNG. Nonce reuse would be catastrophic for GCM security.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use botfleet_core::FleetError;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};

/// Decodes the configured encryption key.
///
/// Accepts plain base64 or a `base64:`-prefixed value as exported by
/// the legacy deployment scripts. The decoded key must be 32 bytes.
pub fn decode_key(configured: &str) -> Result<[u8; 32], FleetError> {
    let trimmed = configured.trim();
    if trimmed.is_empty() {
        return Err(FleetError::Config("security.encryption_key is required".into()));
    }
    let b64 = trimmed.strip_prefix("base64:").unwrap_or(trimmed);
    let bytes = BASE64
        .decode(b64)
        .map_err(|e| FleetError::Config(format!("encryption_key is not valid base64: {e}")))?;
    let key: [u8; 32] = bytes
        .try_into()
        .map_err(|_| FleetError::Config("encryption_key must decode to 32 bytes".into()))?;
    Ok(key)
}

/// Encrypt plaintext with AES-256-GCM using a random 96-bit nonce.
///
/// Returns `(ciphertext_with_tag, nonce_bytes)`; both must be stored to
/// decrypt later.
pub fn seal(key: &[u8; 32], plaintext: &[u8]) -> Result<(Vec<u8>, [u8; 12]), FleetError> {
    let unbound = UnboundKey::new(&AES_256_GCM, key)
        .map_err(|_| FleetError::Crypto("failed to create AES-256-GCM key".to_string()))?;
    let less_safe = LessSafeKey::new(unbound);

    let rng = SystemRandom::new();
    let mut nonce_bytes = [0u8; 12];
    rng.fill(&mut nonce_bytes)
        .map_err(|_| FleetError::Crypto("failed to generate random nonce".to_string()))?;

    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    let mut in_out = plaintext.to_vec();
    less_safe
        .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| FleetError::Crypto("AES-256-GCM encryption failed".to_string()))?;

    Ok((in_out, nonce_bytes))
}

/// Decrypt ciphertext produced by [`seal`].
///
/// `ciphertext` must include the 16-byte authentication tag. Fails on a
/// wrong key or any tampering.
pub fn open(key: &[u8; 32], nonce_bytes: &[u8; 12], ciphertext: &[u8]) -> Result<Vec<u8>, FleetError> {
    let unbound = UnboundKey::new(&AES_256_GCM, key)
        .map_err(|_| FleetError::Crypto("failed to create AES-256-GCM key".to_string()))?;
    let less_safe = LessSafeKey::new(unbound);

    let nonce = Nonce::assume_unique_for_key(*nonce_bytes);

    let mut in_out = ciphertext.to_vec();
    let plaintext = less_safe
        .open_in_place(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| {
            FleetError::Crypto("AES-256-GCM decryption failed -- wrong key or corrupted data".to_string())
        })?;

    Ok(plaintext.to_vec())
}

/// Generate a random 32-byte key suitable for AES-256-GCM.
///
/// Used for ephemeral dev keys; production keys come from config.
pub fn generate_random_key() -> Result<[u8; 32], FleetError> {
    let rng = SystemRandom::new();
    let mut key = [0u8; 32];
    rng.fill(&mut key)
        .map_err(|_| FleetError::Crypto("failed to generate random key".to_string()))?;
    Ok(key)
}

/// Key holder used by workers to decrypt bot tokens on demand.
#[derive(Clone)]
pub struct TokenCipher {
    key: [u8; 32],
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCipher").finish_non_exhaustive()
    }
}

impl TokenCipher {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    pub fn from_config(configured: &str) -> Result<Self, FleetError> {
        Ok(Self::new(decode_key(configured)?))
    }

    /// Encrypts a UTF-8 token for storage.
    pub fn seal_token(&self, token: &str) -> Result<(Vec<u8>, [u8; 12]), FleetError> {
        seal(&self.key, token.as_bytes())
    }

    /// Decrypts a stored token back to UTF-8.
    pub fn open_token(&self, ciphertext: &[u8], nonce: &[u8; 12]) -> Result<String, FleetError> {
        let bytes = open(&self.key, nonce, ciphertext)?;
        String::from_utf8(bytes)
            .map_err(|_| FleetError::Crypto("decrypted token is not UTF-8".to_string()))
    }

    /// HMAC base shared with the callback signer.
    pub(crate) fn key_bytes(&self) -> &[u8; 32] {
        &self.key
    }
}
