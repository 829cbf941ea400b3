// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the botfleet orchestration platform.
//!
//! This crate provides the error taxonomy, the shared domain types used
//! across crate boundaries (ids, media kinds, the block model, task
//! envelopes), and the circuit breaker that wraps external clients.

pub mod breaker;
pub mod error;
pub mod types;
pub mod update;

pub use breaker::{BreakerState, CircuitBreaker, CircuitBreakerConfig};
pub use error::{ErrorKind, FleetError};
pub use types::{
    Block, BotId, ContainerKind, ContainerRef, MediaKind, TelegramUserId, TokenUsage,
};
pub use update::UpdateEnvelope;
