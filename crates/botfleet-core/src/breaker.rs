// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Circuit breaker wrapping the external clients (LLM, gateway, Whisper).
//!
//! Consecutive-failure counting: after `fail_max` failures in a row the
//! circuit opens for `open_secs`, then a single half-open probe decides
//! whether it closes again. Callers seeing an open circuit receive a
//! typed [`FleetError::RateLimited`] so the task runtime can reschedule.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::FleetError;

/// Breaker tuning, sourced from `circuit_breaker.*` config.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub fail_max: u32,
    /// How long the circuit stays open before a half-open probe.
    pub open_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            fail_max: 5,
            open_secs: 60,
        }
    }
}

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    consecutive_failures: u32,
    open_until: Option<Instant>,
    probe_in_flight: bool,
}

/// Process-scoped circuit breaker for one external service.
#[derive(Debug)]
pub struct CircuitBreaker {
    service: &'static str,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(service: &'static str, config: CircuitBreakerConfig) -> Self {
        Self {
            service,
            config,
            inner: Mutex::new(BreakerInner {
                consecutive_failures: 0,
                open_until: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Gate to call before issuing a request.
    ///
    /// While open, returns `RateLimited` with the remaining open window.
    /// In the half-open window exactly one caller is admitted as probe.
    pub fn acquire(&self) -> Result<(), FleetError> {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(open_until) = inner.open_until {
            let now = Instant::now();
            if now < open_until {
                let retry_after_secs = (open_until - now).as_secs().max(1);
                return Err(FleetError::RateLimited { retry_after_secs });
            }
            // Half-open: admit one probe, hold everyone else back.
            if inner.probe_in_flight {
                return Err(FleetError::RateLimited {
                    retry_after_secs: 1,
                });
            }
            inner.probe_in_flight = true;
        }
        Ok(())
    }

    /// Records a successful call; closes the circuit.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if inner.open_until.is_some() {
            tracing::info!(service = self.service, "circuit closed after probe success");
        }
        inner.consecutive_failures = 0;
        inner.open_until = None;
        inner.probe_in_flight = false;
    }

    /// Records a failed call; opens the circuit at the threshold.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.probe_in_flight = false;
        inner.consecutive_failures += 1;
        if inner.consecutive_failures >= self.config.fail_max {
            let open_for = Duration::from_secs(self.config.open_secs);
            inner.open_until = Some(Instant::now() + open_for);
            tracing::warn!(
                service = self.service,
                failures = inner.consecutive_failures,
                open_secs = self.config.open_secs,
                "circuit opened"
            );
        }
    }

    pub fn state(&self) -> BreakerState {
        let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        match inner.open_until {
            Some(until) if Instant::now() < until => BreakerState::Open,
            Some(_) => BreakerState::HalfOpen,
            None => BreakerState::Closed,
        }
    }
}
