// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sliding-window rate limiter and button-tap cooldowns.
//!
//! The window is bucketed: the counter key embeds `now / window`, so a
//! bucket expires on its own and rollover frees the budget without any
//! cleanup pass.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use botfleet_config::model::RateLimitRule;
use botfleet_core::FleetError;

use crate::{keys, KvStore};

/// Per-(bot, user, action) sliding-window limiter.
pub struct RateLimiter {
    kv: Arc<dyn KvStore>,
    rules: HashMap<String, RateLimitRule>,
}

impl RateLimiter {
    pub fn new(kv: Arc<dyn KvStore>, rules: HashMap<String, RateLimitRule>) -> Self {
        Self { kv, rules }
    }

    fn rule_for(&self, action: &str) -> RateLimitRule {
        self.rules
            .get(action)
            .or_else(|| self.rules.get("default"))
            .copied()
            .unwrap_or_default()
    }

    /// Checks and consumes one slot; `Err(RateLimited)` when over budget.
    pub async fn check(
        &self,
        bot_id: i64,
        user_id: i64,
        action: &str,
    ) -> Result<(), FleetError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| FleetError::Internal(format!("clock before epoch: {e}")))?
            .as_secs();
        self.check_at(bot_id, user_id, action, now).await
    }

    /// Clock-injected variant; `check` delegates here.
    pub async fn check_at(
        &self,
        bot_id: i64,
        user_id: i64,
        action: &str,
        now_secs: u64,
    ) -> Result<(), FleetError> {
        let rule = self.rule_for(action);
        let window = rule.window.max(1);
        let bucket = now_secs / window;
        let key = keys::rate_limit(bot_id, user_id, action, bucket);

        // TTL slightly beyond the window so a bucket straddling its edge
        // still expires.
        let count = self.kv.incr_with_ttl(&key, window + 5).await?;
        if count as u64 > rule.limit as u64 {
            let retry_after_secs = (bucket + 1) * window - now_secs;
            return Err(FleetError::RateLimited {
                retry_after_secs: retry_after_secs.max(1),
            });
        }
        Ok(())
    }
}

/// SETNX-based cooldown to absorb rapid duplicate button taps.
pub struct CooldownGate {
    kv: Arc<dyn KvStore>,
}

impl CooldownGate {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Returns true when the caller may proceed (no active cooldown).
    pub async fn pass(
        &self,
        bot_id: i64,
        user_id: i64,
        action: &str,
        seconds: u64,
    ) -> Result<bool, FleetError> {
        let key = keys::cooldown(bot_id, user_id, action);
        self.kv.set_nx(&key, "1", seconds).await
    }
}
