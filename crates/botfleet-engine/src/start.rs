// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Start-template flow.
//!
//! Each bot has at most one start template with a monotonically
//! increasing version. A user's status row records the version they
//! received; the same version is never re-sent. Dispatch is claimed in
//! KV so a double /start enqueues a single send.

use std::sync::Arc;

use botfleet_core::{ContainerKind, ContainerRef, FleetError};
use botfleet_kv::ActivityTracker;
use botfleet_queue::{EnqueueOptions, QueueName, TaskQueue};
use botfleet_storage::queries::{blocks, start};
use botfleet_storage::Database;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Task name of the template delivery.
pub const SEND_START_TEMPLATE_TASK: &str = "send_start_template";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendStartPayload {
    pub bot_id: i64,
    pub user_telegram_id: i64,
    pub chat_id: i64,
    pub template_id: i64,
    pub template_version: i64,
}

/// Outcome of the /start routing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartDecision {
    /// Template delivery enqueued.
    Scheduled,
    /// Same version already delivered (or another dispatch pending).
    Skipped,
    /// No active template with blocks; normal flow continues.
    NoTemplate,
}

/// Start-template orchestration.
pub struct StartFlow {
    db: Database,
    activity: Arc<ActivityTracker>,
    tasks: TaskQueue,
}

impl StartFlow {
    pub fn new(db: Database, activity: Arc<ActivityTracker>, tasks: TaskQueue) -> Self {
        Self { db, activity, tasks }
    }

    /// Routes a /start: enqueue the template send when the user has not
    /// received the current version yet.
    pub async fn handle_start(
        &self,
        bot_id: i64,
        user_telegram_id: i64,
        chat_id: i64,
    ) -> Result<StartDecision, FleetError> {
        let Some(template) = start::get_template(&self.db, bot_id).await? else {
            return Ok(StartDecision::NoTemplate);
        };
        if !template.is_active {
            return Ok(StartDecision::NoTemplate);
        }
        let container = ContainerRef::new(ContainerKind::StartTemplate, template.id);
        if !blocks::has_blocks(&self.db, container).await? {
            return Ok(StartDecision::NoTemplate);
        }

        if start::received_version(&self.db, bot_id, user_telegram_id).await?
            == Some(template.version)
        {
            debug!(bot_id, user_telegram_id, "start template version already delivered");
            return Ok(StartDecision::Skipped);
        }

        if !self
            .activity
            .claim_start_dispatch(bot_id, user_telegram_id)
            .await?
        {
            debug!(bot_id, user_telegram_id, "start dispatch already pending");
            return Ok(StartDecision::Skipped);
        }

        let payload = SendStartPayload {
            bot_id,
            user_telegram_id,
            chat_id,
            template_id: template.id,
            template_version: template.version,
        };
        let enqueue = self
            .tasks
            .enqueue(
                QueueName::Default,
                SEND_START_TEMPLATE_TASK,
                serde_json::to_value(&payload).map_err(|e| FleetError::Internal(e.to_string()))?,
                EnqueueOptions {
                    idempotency_key: Some(format!(
                        "start:{bot_id}:{user_telegram_id}:{}",
                        template.version
                    )),
                    ..Default::default()
                },
            )
            .await;
        if enqueue.is_err() {
            self.activity
                .release_start_dispatch(bot_id, user_telegram_id)
                .await?;
        }
        enqueue?;

        info!(
            bot_id,
            user_telegram_id,
            template_version = template.version,
            "start template scheduled"
        );
        Ok(StartDecision::Scheduled)
    }

    /// Validation step of the send task: re-check the version before
    /// sending, then record the status row after.
    pub async fn prepare_send(
        &self,
        payload: &SendStartPayload,
    ) -> Result<Option<Vec<botfleet_core::Block>>, FleetError> {
        let Some(template) = start::get_template(&self.db, payload.bot_id).await? else {
            return Ok(None);
        };
        if !template.is_active || template.version != payload.template_version {
            return Err(FleetError::Consistency("start template moved on".into()));
        }
        if start::received_version(&self.db, payload.bot_id, payload.user_telegram_id).await?
            == Some(template.version)
        {
            return Ok(None);
        }
        let container = ContainerRef::new(ContainerKind::StartTemplate, template.id);
        let template_blocks = blocks::list(&self.db, container).await?;
        if template_blocks.is_empty() {
            return Ok(None);
        }
        Ok(Some(template_blocks))
    }

    /// Records a completed delivery and releases the dispatch claim.
    pub async fn complete_send(&self, payload: &SendStartPayload) -> Result<(), FleetError> {
        start::record_sent(
            &self.db,
            payload.bot_id,
            payload.user_telegram_id,
            payload.template_version,
        )
        .await?;
        self.activity
            .release_start_dispatch(payload.bot_id, payload.user_telegram_id)
            .await?;
        Ok(())
    }

    /// Releases the claim when the send failed terminally.
    pub async fn abandon_send(&self, payload: &SendStartPayload) -> Result<(), FleetError> {
        self.activity
            .release_start_dispatch(payload.bot_id, payload.user_telegram_id)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use botfleet_core::Block;
    use botfleet_kv::MemoryKv;
    use botfleet_storage::queries::{bots, queue as queue_db, start as start_db};

    async fn flow_with_template() -> (StartFlow, i64, i64) {
        let db = Database::open_in_memory().await.unwrap();
        let activity = Arc::new(ActivityTracker::new(Arc::new(MemoryKv::new())));
        let tasks = TaskQueue::new(db.clone());
        let flow = StartFlow::new(db.clone(), activity, tasks);

        let bot_id = bots::insert_test_bot(&db, 1).await;
        let template = start_db::upsert_template(&db, bot_id).await.unwrap();
        blocks::append(
            &db,
            Block {
                id: 0,
                container: ContainerRef::new(ContainerKind::StartTemplate, template.id),
                position: 0,
                text: Some("bem-vinda!".into()),
                media_file_id: None,
                media_kind: None,
                delay_seconds: 0,
                auto_delete_seconds: 0,
            },
        )
        .await
        .unwrap();
        (flow, bot_id, template.id)
    }

    #[tokio::test]
    async fn scenario_s1_first_start_schedules_template() {
        let (flow, bot_id, _) = flow_with_template().await;
        let decision = flow.handle_start(bot_id, 111, 111).await.unwrap();
        assert_eq!(decision, StartDecision::Scheduled);
        assert_eq!(queue_db::depth(&flow.db, "default").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn scenario_s2_same_version_skips() {
        let (flow, bot_id, _) = flow_with_template().await;
        // User already holds version 1.
        start_db::record_sent(&flow.db, bot_id, 111, 1).await.unwrap();
        let decision = flow.handle_start(bot_id, 111, 111).await.unwrap();
        assert_eq!(decision, StartDecision::Skipped);
        assert_eq!(queue_db::depth(&flow.db, "default").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn version_bump_resends() {
        let (flow, bot_id, _) = flow_with_template().await;
        start_db::record_sent(&flow.db, bot_id, 111, 1).await.unwrap();
        start_db::upsert_template(&flow.db, bot_id).await.unwrap(); // v2
        let decision = flow.handle_start(bot_id, 111, 111).await.unwrap();
        assert_eq!(decision, StartDecision::Scheduled);
    }

    #[tokio::test]
    async fn double_start_enqueues_once() {
        let (flow, bot_id, _) = flow_with_template().await;
        assert_eq!(
            flow.handle_start(bot_id, 111, 111).await.unwrap(),
            StartDecision::Scheduled
        );
        assert_eq!(
            flow.handle_start(bot_id, 111, 111).await.unwrap(),
            StartDecision::Skipped
        );
        assert_eq!(queue_db::depth(&flow.db, "default").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn send_roundtrip_records_single_status_row() {
        let (flow, bot_id, template_id) = flow_with_template().await;
        flow.handle_start(bot_id, 111, 111).await.unwrap();

        let payload = SendStartPayload {
            bot_id,
            user_telegram_id: 111,
            chat_id: 111,
            template_id,
            template_version: 1,
        };
        let plan = flow.prepare_send(&payload).await.unwrap();
        assert!(plan.is_some());
        flow.complete_send(&payload).await.unwrap();

        // Second pass: nothing to send, status row count stays 1.
        assert!(flow.prepare_send(&payload).await.unwrap().is_none());
        assert_eq!(
            start_db::received_version(&flow.db, bot_id, 111).await.unwrap(),
            Some(1)
        );
    }

    #[tokio::test]
    async fn stale_template_version_aborts() {
        let (flow, bot_id, template_id) = flow_with_template().await;
        let payload = SendStartPayload {
            bot_id,
            user_telegram_id: 111,
            chat_id: 111,
            template_id,
            template_version: 1,
        };
        start_db::upsert_template(&flow.db, bot_id).await.unwrap(); // v2
        let err = flow.prepare_send(&payload).await.unwrap_err();
        assert!(matches!(err, FleetError::Consistency(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn bot_without_template_continues_normal_flow() {
        let db = Database::open_in_memory().await.unwrap();
        let activity = Arc::new(ActivityTracker::new(Arc::new(MemoryKv::new())));
        let tasks = TaskQueue::new(db.clone());
        let flow = StartFlow::new(db.clone(), activity, tasks);
        let bot_id = bots::insert_test_bot(&db, 1).await;

        let decision = flow.handle_start(bot_id, 111, 111).await.unwrap();
        assert_eq!(decision, StartDecision::NoTemplate);
    }
}
