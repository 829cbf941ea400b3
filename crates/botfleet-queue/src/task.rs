// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Queue names, enqueue helpers and the retry backoff curve.

use botfleet_core::FleetError;
use botfleet_storage::queries::queue as queue_db;
use botfleet_storage::{now_iso, Database};
use chrono::{DateTime, Utc};
use rand::Rng;
use strum::{Display, EnumString};

/// The named queues and their hard deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum QueueName {
    Default,
    Ai,
    Audio,
    Media,
    Recovery,
    Notifications,
    Scheduler,
}

impl QueueName {
    pub const ALL: [QueueName; 7] = [
        QueueName::Default,
        QueueName::Ai,
        QueueName::Audio,
        QueueName::Media,
        QueueName::Recovery,
        QueueName::Notifications,
        QueueName::Scheduler,
    ];

    /// Hard per-task deadline; exceeding it cancels the task.
    pub fn deadline_secs(self) -> u64 {
        match self {
            QueueName::Ai => 180,
            QueueName::Media => 300,
            _ => 120,
        }
    }
}

/// Exponential backoff, base 2 seconds, capped at 5 minutes, with
/// +/-20 % jitter so retry storms decorrelate.
pub fn backoff_delay_secs(attempts: i64) -> u64 {
    let exponent = attempts.clamp(0, 16) as u32;
    let base = 2u64.saturating_pow(exponent).min(300);
    let jitter = rand::thread_rng().gen_range(0.8..=1.2);
    ((base as f64) * jitter).round().max(1.0) as u64
}

/// Options for one enqueue.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub idempotency_key: Option<String>,
    pub max_attempts: Option<i64>,
}

/// Enqueue facade shared by ingress, engine and the flows.
#[derive(Clone)]
pub struct TaskQueue {
    db: Database,
}

impl TaskQueue {
    pub const DEFAULT_MAX_ATTEMPTS: i64 = 3;

    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Enqueues for immediate execution. Returns the task id, or `None`
    /// when an idempotency key absorbed the enqueue.
    pub async fn enqueue(
        &self,
        queue: QueueName,
        task_name: &str,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<Option<i64>, FleetError> {
        self.enqueue_with_schedule(queue, task_name, payload, options, None)
            .await
    }

    /// Enqueues to run after `delay_secs` (`.schedule(delay)`).
    pub async fn enqueue_in(
        &self,
        queue: QueueName,
        task_name: &str,
        payload: serde_json::Value,
        delay_secs: u64,
        options: EnqueueOptions,
    ) -> Result<Option<i64>, FleetError> {
        let at = Utc::now() + chrono::Duration::seconds(delay_secs as i64);
        self.enqueue_at(queue, task_name, payload, at, options).await
    }

    /// Enqueues to run at an absolute wall-clock time (`.at(when)`).
    pub async fn enqueue_at(
        &self,
        queue: QueueName,
        task_name: &str,
        payload: serde_json::Value,
        at: DateTime<Utc>,
        options: EnqueueOptions,
    ) -> Result<Option<i64>, FleetError> {
        let scheduled_for = at.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string();
        self.enqueue_with_schedule(queue, task_name, payload, options, Some(scheduled_for))
            .await
    }

    async fn enqueue_with_schedule(
        &self,
        queue: QueueName,
        task_name: &str,
        payload: serde_json::Value,
        options: EnqueueOptions,
        scheduled_for: Option<String>,
    ) -> Result<Option<i64>, FleetError> {
        let id = queue_db::enqueue(
            &self.db,
            &queue.to_string(),
            task_name,
            payload.to_string(),
            options.idempotency_key,
            options.max_attempts.unwrap_or(Self::DEFAULT_MAX_ATTEMPTS),
            scheduled_for,
        )
        .await?;
        if id.is_none() {
            tracing::debug!(task_name, queue = %queue, "enqueue absorbed by idempotency key");
        }
        Ok(id)
    }

    /// Pending depth of one queue.
    pub async fn depth(&self, queue: QueueName) -> Result<i64, FleetError> {
        queue_db::depth(&self.db, &queue.to_string()).await
    }

    /// Returns expired claims to pending (crashed workers).
    pub async fn reclaim_expired(&self) -> Result<usize, FleetError> {
        queue_db::reclaim_expired(&self.db, now_iso()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn queue_names_are_snake_case() {
        assert_eq!(QueueName::Default.to_string(), "default");
        assert_eq!(QueueName::Notifications.to_string(), "notifications");
        assert_eq!(QueueName::from_str("ai").unwrap(), QueueName::Ai);
    }

    #[test]
    fn deadlines_match_queue_class() {
        assert_eq!(QueueName::Default.deadline_secs(), 120);
        assert_eq!(QueueName::Ai.deadline_secs(), 180);
        assert_eq!(QueueName::Media.deadline_secs(), 300);
        assert_eq!(QueueName::Recovery.deadline_secs(), 120);
    }

    #[test]
    fn backoff_grows_and_caps_with_jitter_bounds() {
        for attempts in 0..20 {
            let delay = backoff_delay_secs(attempts);
            let base = 2u64.saturating_pow(attempts.min(16) as u32).min(300);
            let lo = ((base as f64) * 0.8).round() as u64;
            let hi = ((base as f64) * 1.2).round() as u64;
            assert!(
                (lo.max(1)..=hi).contains(&delay),
                "attempt {attempts}: {delay} outside [{lo}, {hi}]"
            );
        }
    }

    #[tokio::test]
    async fn enqueue_at_serializes_sortable_timestamp() {
        let db = Database::open_in_memory().await.unwrap();
        let queue = TaskQueue::new(db);
        let at = Utc::now() + chrono::Duration::hours(1);
        queue
            .enqueue_at(
                QueueName::Scheduler,
                "send_recovery_step",
                serde_json::json!({"step_id": 1}),
                at,
                EnqueueOptions::default(),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(queue.depth(QueueName::Scheduler).await.unwrap(), 1);
    }
}
