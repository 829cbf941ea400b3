// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-(bot, user) activity state: webhook de-dup, inactivity versions,
//! last-activity timestamps, recovery episode claims and worker
//! heartbeats.
//!
//! The inactivity version is the cancellation primitive for recovery:
//! every user message bumps it, and any scheduled workflow carrying a
//! stale version aborts without side effects.

use std::sync::Arc;

use botfleet_core::FleetError;

use crate::{keys, KvStore};

/// TTL for the webhook de-dup window (spec: 5 minutes).
const UPDATE_SEEN_TTL_SECS: u64 = 300;

/// TTL backstop for a recovery episode claim (one week covers the
/// longest supported step chain).
const EPISODE_TTL_SECS: u64 = 7 * 86_400;

/// Heartbeat freshness window used by the typed health check.
pub const HEARTBEAT_TTL_SECS: u64 = 30;

/// Facade over the KV keyspaces tied to user activity.
pub struct ActivityTracker {
    kv: Arc<dyn KvStore>,
}

impl ActivityTracker {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Records an update id; returns true when it was already seen
    /// within the de-dup window (the caller must drop the update).
    pub async fn seen_update(&self, bot_id: i64, update_id: i64) -> Result<bool, FleetError> {
        let fresh = self
            .kv
            .set_nx(&keys::update_seen(bot_id, update_id), "1", UPDATE_SEEN_TTL_SECS)
            .await?;
        Ok(!fresh)
    }

    /// Bumps the inactivity version and stamps last activity.
    /// Returns the new version carried by the scheduled check.
    pub async fn bump_activity(
        &self,
        bot_id: i64,
        user_id: i64,
        now_unix: i64,
    ) -> Result<i64, FleetError> {
        let version = self.kv.incr(&keys::inactivity_version(bot_id, user_id)).await?;
        self.kv
            .set(&keys::last_activity(bot_id, user_id), &now_unix.to_string())
            .await?;
        Ok(version)
    }

    /// Current inactivity version (0 when the user never interacted).
    pub async fn inactivity_version(&self, bot_id: i64, user_id: i64) -> Result<i64, FleetError> {
        Ok(self
            .kv
            .get(&keys::inactivity_version(bot_id, user_id))
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }

    /// Unix seconds of the last recorded activity.
    pub async fn last_activity(&self, bot_id: i64, user_id: i64) -> Result<Option<i64>, FleetError> {
        Ok(self
            .kv
            .get(&keys::last_activity(bot_id, user_id))
            .await?
            .and_then(|v| v.parse().ok()))
    }

    /// Claims a recovery episode; false when one is already running.
    pub async fn claim_episode(
        &self,
        bot_id: i64,
        user_id: i64,
        episode_id: &str,
    ) -> Result<bool, FleetError> {
        self.kv
            .set_nx(&keys::recovery_episode(bot_id, user_id), episode_id, EPISODE_TTL_SECS)
            .await
    }

    /// Refreshes the claim while a multi-step episode progresses.
    pub async fn refresh_episode(
        &self,
        bot_id: i64,
        user_id: i64,
        episode_id: &str,
    ) -> Result<(), FleetError> {
        self.kv
            .set_with_ttl(&keys::recovery_episode(bot_id, user_id), episode_id, EPISODE_TTL_SECS)
            .await
    }

    /// Currently claimed episode id, if any.
    pub async fn current_episode(
        &self,
        bot_id: i64,
        user_id: i64,
    ) -> Result<Option<String>, FleetError> {
        self.kv.get(&keys::recovery_episode(bot_id, user_id)).await
    }

    /// Drops the episode claim (episode finished or canceled).
    pub async fn clear_episode(&self, bot_id: i64, user_id: i64) -> Result<(), FleetError> {
        self.kv.delete(&keys::recovery_episode(bot_id, user_id)).await
    }

    /// Claims the one-shot start-template dispatch for a user.
    pub async fn claim_start_dispatch(
        &self,
        bot_id: i64,
        user_id: i64,
    ) -> Result<bool, FleetError> {
        self.kv
            .set_nx(&keys::start_pending(bot_id, user_id), "1", 600)
            .await
    }

    /// Releases the start-dispatch claim after a failed enqueue.
    pub async fn release_start_dispatch(
        &self,
        bot_id: i64,
        user_id: i64,
    ) -> Result<(), FleetError> {
        self.kv.delete(&keys::start_pending(bot_id, user_id)).await
    }

    /// Worker-pool heartbeat for the typed health check.
    pub async fn beat(&self, queue: &str, now_unix: i64) -> Result<(), FleetError> {
        self.kv
            .set_with_ttl(
                &keys::worker_heartbeat(queue),
                &now_unix.to_string(),
                HEARTBEAT_TTL_SECS,
            )
            .await
    }

    /// Last heartbeat of a queue's pool, if fresh.
    pub async fn last_beat(&self, queue: &str) -> Result<Option<i64>, FleetError> {
        Ok(self
            .kv
            .get(&keys::worker_heartbeat(queue))
            .await?
            .and_then(|v| v.parse().ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryKv;

    fn tracker() -> ActivityTracker {
        ActivityTracker::new(Arc::new(MemoryKv::new()))
    }

    #[tokio::test]
    async fn duplicate_update_is_flagged() {
        let t = tracker();
        assert!(!t.seen_update(42, 1001).await.unwrap());
        assert!(t.seen_update(42, 1001).await.unwrap());
        // Different bot, same update id: independent.
        assert!(!t.seen_update(43, 1001).await.unwrap());
    }

    #[tokio::test]
    async fn activity_bump_is_monotonic() {
        let t = tracker();
        assert_eq!(t.inactivity_version(42, 111).await.unwrap(), 0);
        let v1 = t.bump_activity(42, 111, 1_700_000_000).await.unwrap();
        let v2 = t.bump_activity(42, 111, 1_700_000_100).await.unwrap();
        assert!(v2 > v1);
        assert_eq!(t.inactivity_version(42, 111).await.unwrap(), v2);
        assert_eq!(t.last_activity(42, 111).await.unwrap(), Some(1_700_000_100));
    }

    #[tokio::test]
    async fn episode_claim_is_exclusive() {
        let t = tracker();
        assert!(t.claim_episode(42, 111, "ep-1").await.unwrap());
        assert!(!t.claim_episode(42, 111, "ep-2").await.unwrap());
        assert_eq!(t.current_episode(42, 111).await.unwrap().as_deref(), Some("ep-1"));
        t.clear_episode(42, 111).await.unwrap();
        assert!(t.claim_episode(42, 111, "ep-2").await.unwrap());
    }

    #[tokio::test]
    async fn start_dispatch_claim_is_one_shot() {
        let t = tracker();
        assert!(t.claim_start_dispatch(42, 111).await.unwrap());
        assert!(!t.claim_start_dispatch(42, 111).await.unwrap());
        t.release_start_dispatch(42, 111).await.unwrap();
        assert!(t.claim_start_dispatch(42, 111).await.unwrap());
    }
}
