// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Canonical KV keyspace builders.
//!
//! Key shapes are part of the operational contract (dashboards, redis-cli
//! debugging); build them here only.

/// `rl:{bot}:{user}:{action}:{bucket}` -- sliding-window counter bucket.
pub fn rate_limit(bot_id: i64, user_id: i64, action: &str, bucket: u64) -> String {
    format!("rl:{bot_id}:{user_id}:{action}:{bucket}")
}

/// `cd:{bot}:{user}:{action}` -- short cooldown marker.
pub fn cooldown(bot_id: i64, user_id: i64, action: &str) -> String {
    format!("cd:{bot_id}:{user_id}:{action}")
}

/// `lock:{name}` -- named distributed lock.
pub fn lock(name: &str) -> String {
    format!("lock:{name}")
}

/// `update:seen:{bot}:{update_id}` -- webhook de-duplication.
pub fn update_seen(bot_id: i64, update_id: i64) -> String {
    format!("update:seen:{bot_id}:{update_id}")
}

/// `session:active:{bot}:{user}:ver` -- monotonic inactivity version.
pub fn inactivity_version(bot_id: i64, user_id: i64) -> String {
    format!("session:active:{bot_id}:{user_id}:ver")
}

/// `session:active:{bot}:{user}:last` -- unix seconds of last activity.
pub fn last_activity(bot_id: i64, user_id: i64) -> String {
    format!("session:active:{bot_id}:{user_id}:last")
}

/// `recovery:episode:{bot}:{user}` -- current recovery episode claim.
pub fn recovery_episode(bot_id: i64, user_id: i64) -> String {
    format!("recovery:episode:{bot_id}:{user_id}")
}

/// `start_template:pending:{bot}:{user}` -- start dispatch claim.
pub fn start_pending(bot_id: i64, user_id: i64) -> String {
    format!("start_template:pending:{bot_id}:{user_id}")
}

/// `trk:code:{bot}:{code}` -- tracker code cache.
pub fn tracker_code(bot_id: i64, code: &str) -> String {
    format!("trk:code:{bot_id}:{code}")
}

/// `trk:attr:{bot}:{user}` -- attribution mirror.
pub fn tracker_attribution(bot_id: i64, user_id: i64) -> String {
    format!("trk:attr:{bot_id}:{user_id}")
}

/// `trk:cfg:{bot}` -- tracking-config snapshot version.
pub fn tracking_config(bot_id: i64) -> String {
    format!("trk:cfg:{bot_id}")
}

/// `notif:seen:{tx}` -- sale-notification enqueue guard.
pub fn notification_seen(transaction_id: i64) -> String {
    format!("notif:seen:{transaction_id}")
}

/// `hb:{queue}` -- worker-pool heartbeat for typed health checks.
pub fn worker_heartbeat(queue: &str) -> String {
    format!("hb:{queue}")
}
