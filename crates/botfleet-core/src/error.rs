// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the botfleet platform.
//!
//! Adapters classify failures at their edge into one of these variants;
//! the task runtime then decides retry vs dead-letter from
//! [`FleetError::kind`] without inspecting messages.

use thiserror::Error;

/// The primary error type used across all botfleet crates.
#[derive(Debug, Error)]
pub enum FleetError {
    /// Malformed admin input (bad schedule expression, bad price, name
    /// too long). Surfaced to the admin, never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// Missing or invalid secret, unauthorized admin action.
    #[error("auth error: {0}")]
    Auth(String),

    /// Rate limit, cooldown or open circuit. Retriable after `retry_after`.
    #[error("rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// 5xx, timeout or connection reset from an external system.
    /// Retried with backoff up to the task's retry budget.
    #[error("transient external error from {service}: {message}")]
    TransientExternal {
        service: &'static str,
        message: String,
    },

    /// 4xx (other than 429), invalid token, media reference that stayed
    /// broken after re-resolution. Dead-lettered.
    #[error("permanent external error from {service}: {message}")]
    PermanentExternal {
        service: &'static str,
        message: String,
    },

    /// Stale inactivity/campaign version or CAS failure. The carrying
    /// workflow exits silently without side effects.
    #[error("consistency: {0}")]
    Consistency(String),

    /// Credit pre-check failed for a non-unlimited admin.
    #[error("insufficient credits: balance {balance_cents} < estimate {estimate_cents}")]
    InsufficientCredits {
        balance_cents: i64,
        estimate_cents: i64,
    },

    /// Unique-constraint race already resolved by another worker.
    /// Treated as "already handled" -- a success exit.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Storage backend failure (connection, query, migration).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// KV/broker failure (connection, command).
    #[error("kv error: {0}")]
    Kv(String),

    /// Configuration errors (invalid TOML, missing required fields).
    #[error("configuration error: {0}")]
    Config(String),

    /// Crypto failures (bad key material, decryption of tampered data).
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Operation exceeded its deadline.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse classification consumed by the task runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Retry with backoff up to max_retries, then dead-letter.
    Retry,
    /// Dead-letter immediately; retrying cannot help.
    Fatal,
    /// Exit without side effects and without retrying the same path.
    Silent,
    /// Another worker already completed the work; report success.
    AlreadyDone,
}

impl FleetError {
    /// Maps every variant onto the retry policy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FleetError::Validation(_) | FleetError::Auth(_) => ErrorKind::Fatal,
            FleetError::RateLimited { .. } => ErrorKind::Retry,
            FleetError::TransientExternal { .. } => ErrorKind::Retry,
            FleetError::PermanentExternal { .. } => ErrorKind::Fatal,
            FleetError::Consistency(_) => ErrorKind::Silent,
            FleetError::InsufficientCredits { .. } => ErrorKind::Silent,
            FleetError::Conflict(_) => ErrorKind::AlreadyDone,
            FleetError::Storage { .. } | FleetError::Kv(_) => ErrorKind::Retry,
            FleetError::Timeout { .. } => ErrorKind::Retry,
            FleetError::Config(_) | FleetError::Crypto(_) | FleetError::Internal(_) => {
                ErrorKind::Fatal
            }
        }
    }

    /// Convenience constructor for storage failures.
    pub fn storage<E: std::error::Error + Send + Sync + 'static>(source: E) -> Self {
        FleetError::Storage {
            source: Box::new(source),
        }
    }
}
