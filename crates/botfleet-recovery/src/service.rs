// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Watchdog and step-chain orchestration.
//!
//! The block delivery itself belongs to the conversation engine (it
//! owns bot tokens and the sender); this service owns every guard and
//! every scheduling decision, so the task handlers stay thin.

use std::sync::Arc;

use botfleet_core::{ContainerKind, ContainerRef, FleetError};
use botfleet_kv::ActivityTracker;
use botfleet_queue::{EnqueueOptions, QueueName, TaskQueue};
use botfleet_storage::queries::{blocks, recovery, transactions, users};
use botfleet_storage::{Database, RecoveryCampaign, RecoveryStep};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::schedule::{next_occurrence, ScheduleExpr};

/// Task name of the inactivity check.
pub const CHECK_INACTIVE_TASK: &str = "check_inactive";
/// Task name of one step delivery.
pub const SEND_RECOVERY_STEP_TASK: &str = "send_recovery_step";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckInactivePayload {
    pub bot_id: i64,
    pub user_telegram_id: i64,
    pub inactivity_version: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendStepPayload {
    pub bot_id: i64,
    pub user_telegram_id: i64,
    pub user_db_id: i64,
    pub campaign_id: i64,
    pub step_id: i64,
    pub episode_id: String,
    pub campaign_version: i64,
    pub inactivity_version: i64,
}

/// Everything the engine needs to deliver one validated step.
#[derive(Debug)]
pub struct StepPlan {
    pub campaign: RecoveryCampaign,
    pub step: RecoveryStep,
    pub blocks: Vec<botfleet_core::Block>,
}

/// Recovery orchestration over storage, KV and the task queue.
pub struct RecoveryService {
    db: Database,
    activity: Arc<ActivityTracker>,
    tasks: TaskQueue,
}

impl RecoveryService {
    pub fn new(db: Database, activity: Arc<ActivityTracker>, tasks: TaskQueue) -> Self {
        Self { db, activity, tasks }
    }

    /// Arms the watchdog after user activity.
    ///
    /// A no-op when the bot has no active campaign, no populated steps,
    /// or the user already paid and the campaign skips payers.
    pub async fn schedule_inactivity_check(
        &self,
        bot_id: i64,
        user_telegram_id: i64,
        inactivity_version: i64,
    ) -> Result<(), FleetError> {
        let Some(campaign) = recovery::campaign_by_bot(&self.db, bot_id).await? else {
            return Ok(());
        };
        if !campaign.is_active {
            return Ok(());
        }
        if !self.any_step_with_blocks(&campaign).await? {
            return Ok(());
        }
        if campaign.skip_paid_users
            && transactions::user_has_paid(&self.db, bot_id, user_telegram_id, true).await?
        {
            debug!(bot_id, user_telegram_id, "recovery skipped for paying user");
            return Ok(());
        }

        let delay = campaign.inactivity_threshold_seconds.max(1) as u64;
        let payload = CheckInactivePayload {
            bot_id,
            user_telegram_id,
            inactivity_version,
        };
        self.tasks
            .enqueue_in(
                QueueName::Recovery,
                CHECK_INACTIVE_TASK,
                serde_json::to_value(&payload)
                    .map_err(|e| FleetError::Internal(e.to_string()))?,
                delay,
                EnqueueOptions::default(),
            )
            .await?;
        Ok(())
    }

    /// Runs the inactivity check: confirms the version is still
    /// current, mints an episode and schedules step 1.
    pub async fn handle_check_inactive(
        &self,
        payload: CheckInactivePayload,
    ) -> Result<(), FleetError> {
        let CheckInactivePayload {
            bot_id,
            user_telegram_id,
            inactivity_version,
        } = payload;

        let current = self
            .activity
            .inactivity_version(bot_id, user_telegram_id)
            .await?;
        if current != inactivity_version {
            return Err(FleetError::Consistency(
                "inactivity version moved, user is active".into(),
            ));
        }

        let Some(campaign) = recovery::campaign_by_bot(&self.db, bot_id).await? else {
            return Ok(());
        };
        if !campaign.is_active {
            return Ok(());
        }
        if campaign.skip_paid_users
            && transactions::user_has_paid(&self.db, bot_id, user_telegram_id, true).await?
        {
            return Ok(());
        }

        // The user may have been active on a path that did not re-arm
        // the watchdog; re-check remaining inactivity and re-arm.
        let now = Utc::now().timestamp();
        if let Some(last) = self.activity.last_activity(bot_id, user_telegram_id).await? {
            let inactive_since = last + campaign.inactivity_threshold_seconds;
            if now + 1 < inactive_since {
                let payload = CheckInactivePayload {
                    bot_id,
                    user_telegram_id,
                    inactivity_version,
                };
                self.tasks
                    .enqueue_in(
                        QueueName::Recovery,
                        CHECK_INACTIVE_TASK,
                        serde_json::to_value(&payload)
                            .map_err(|e| FleetError::Internal(e.to_string()))?,
                        (inactive_since - now).max(1) as u64,
                        EnqueueOptions::default(),
                    )
                    .await?;
                return Ok(());
            }
        }

        let steps = recovery::active_steps(&self.db, campaign.id).await?;
        let mut first_step = None;
        for step in steps {
            if blocks::has_blocks(&self.db, step_container(step.id)).await? {
                first_step = Some(step);
                break;
            }
        }
        let Some(first_step) = first_step else {
            debug!(bot_id, user_telegram_id, "recovery skipped, steps have no blocks");
            return Ok(());
        };

        let episode_id = Uuid::new_v4().to_string();
        if !self
            .activity
            .claim_episode(bot_id, user_telegram_id, &episode_id)
            .await?
        {
            debug!(bot_id, user_telegram_id, "recovery episode already running");
            return Ok(());
        }

        let user = users::get_or_create(&self.db, bot_id, user_telegram_id).await?;
        self.schedule_step(
            &campaign,
            &first_step,
            bot_id,
            user_telegram_id,
            user.id,
            &episode_id,
            Utc::now(),
            inactivity_version,
        )
        .await?;

        info!(
            bot_id,
            user_telegram_id,
            episode_id = episode_id.as_str(),
            step_id = first_step.id,
            "recovery episode started"
        );
        Ok(())
    }

    /// Validates a step send. `Err(Consistency)` aborts silently;
    /// `Ok(None)` means "nothing to send" (inactive step, empty).
    pub async fn prepare_step(
        &self,
        payload: &SendStepPayload,
    ) -> Result<Option<StepPlan>, FleetError> {
        let current = self
            .activity
            .inactivity_version(payload.bot_id, payload.user_telegram_id)
            .await?;
        if current != payload.inactivity_version {
            return Err(FleetError::Consistency(
                "recovery step carries a stale inactivity version".into(),
            ));
        }

        if let Some(current_episode) = self
            .activity
            .current_episode(payload.bot_id, payload.user_telegram_id)
            .await?
        {
            if current_episode != payload.episode_id {
                return Err(FleetError::Consistency("recovery episode superseded".into()));
            }
        }

        let Some(campaign) = recovery::campaign_by_id(&self.db, payload.campaign_id).await? else {
            self.clear_episode(payload).await?;
            return Ok(None);
        };
        if !campaign.is_active {
            self.clear_episode(payload).await?;
            return Ok(None);
        }
        if campaign.version != payload.campaign_version {
            self.clear_episode(payload).await?;
            return Err(FleetError::Consistency(
                "recovery step carries a stale campaign version".into(),
            ));
        }
        if campaign.skip_paid_users
            && transactions::user_has_paid(&self.db, payload.bot_id, payload.user_telegram_id, true)
                .await?
        {
            recovery::skip_episode(
                &self.db,
                payload.bot_id,
                payload.user_db_id,
                payload.episode_id.clone(),
            )
            .await?;
            self.clear_episode(payload).await?;
            return Ok(None);
        }

        let Some(step) = recovery::get_step(&self.db, payload.step_id).await? else {
            return Ok(None);
        };
        if !step.is_active {
            return Ok(None);
        }
        let step_blocks = blocks::list(&self.db, step_container(step.id)).await?;
        if step_blocks.is_empty() {
            return Ok(None);
        }

        Ok(Some(StepPlan {
            campaign,
            step,
            blocks: step_blocks,
        }))
    }

    /// After a successful send: stamp the delivery and chain the next
    /// step (or close the episode).
    pub async fn complete_step(
        &self,
        payload: &SendStepPayload,
        plan: &StepPlan,
    ) -> Result<(), FleetError> {
        let stamped = recovery::mark_sent(
            &self.db,
            payload.campaign_id,
            payload.step_id,
            payload.bot_id,
            payload.user_db_id,
            payload.episode_id.clone(),
            payload.campaign_version,
        )
        .await?;
        if !stamped {
            // The unique delivery row says another worker already sent
            // this step for this episode.
            return Err(FleetError::Conflict("recovery step already sent".into()));
        }

        let steps = recovery::active_steps(&self.db, payload.campaign_id).await?;
        let mut next_step = None;
        for step in steps {
            if step.ordinal > plan.step.ordinal
                && blocks::has_blocks(&self.db, step_container(step.id)).await?
            {
                next_step = Some(step);
                break;
            }
        }

        match next_step {
            Some(step) => {
                self.activity
                    .refresh_episode(payload.bot_id, payload.user_telegram_id, &payload.episode_id)
                    .await?;
                self.schedule_step(
                    &plan.campaign,
                    &step,
                    payload.bot_id,
                    payload.user_telegram_id,
                    payload.user_db_id,
                    &payload.episode_id,
                    Utc::now(),
                    payload.inactivity_version,
                )
                .await?;
            }
            None => {
                self.activity
                    .clear_episode(payload.bot_id, payload.user_telegram_id)
                    .await?;
                info!(
                    bot_id = payload.bot_id,
                    user_telegram_id = payload.user_telegram_id,
                    episode_id = payload.episode_id.as_str(),
                    "recovery episode finished"
                );
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn schedule_step(
        &self,
        campaign: &RecoveryCampaign,
        step: &RecoveryStep,
        bot_id: i64,
        user_telegram_id: i64,
        user_db_id: i64,
        episode_id: &str,
        base: DateTime<Utc>,
        inactivity_version: i64,
    ) -> Result<(), FleetError> {
        let expr = ScheduleExpr::decode(&step.schedule_kind, &step.schedule_value)?;
        let at = next_occurrence(&expr, base, &campaign.timezone)?;

        recovery::ensure_scheduled(
            &self.db,
            campaign.id,
            step.id,
            bot_id,
            user_db_id,
            episode_id.to_string(),
            at.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
            campaign.version,
        )
        .await?;

        let payload = SendStepPayload {
            bot_id,
            user_telegram_id,
            user_db_id,
            campaign_id: campaign.id,
            step_id: step.id,
            episode_id: episode_id.to_string(),
            campaign_version: campaign.version,
            inactivity_version,
        };
        self.tasks
            .enqueue_at(
                QueueName::Recovery,
                SEND_RECOVERY_STEP_TASK,
                serde_json::to_value(&payload).map_err(|e| FleetError::Internal(e.to_string()))?,
                at,
                EnqueueOptions {
                    idempotency_key: Some(format!(
                        "recovery:{bot_id}:{user_db_id}:{}:{episode_id}",
                        step.id
                    )),
                    ..Default::default()
                },
            )
            .await?;

        debug!(
            bot_id,
            user_telegram_id,
            step_id = step.id,
            at = %at,
            "recovery step scheduled"
        );
        Ok(())
    }

    async fn any_step_with_blocks(&self, campaign: &RecoveryCampaign) -> Result<bool, FleetError> {
        for step in recovery::active_steps(&self.db, campaign.id).await? {
            if blocks::has_blocks(&self.db, step_container(step.id)).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn clear_episode(&self, payload: &SendStepPayload) -> Result<(), FleetError> {
        self.activity
            .clear_episode(payload.bot_id, payload.user_telegram_id)
            .await
    }
}

fn step_container(step_id: i64) -> ContainerRef {
    ContainerRef::new(ContainerKind::RecoveryStep, step_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use botfleet_core::Block;
    use botfleet_kv::MemoryKv;
    use botfleet_storage::queries::{bots, queue as queue_db, recovery as recovery_db};

    struct Fixture {
        db: Database,
        service: RecoveryService,
        activity: Arc<ActivityTracker>,
        bot_id: i64,
        campaign_id: i64,
        step1: i64,
        step2: i64,
    }

    async fn fixture() -> Fixture {
        let db = Database::open_in_memory().await.unwrap();
        let activity = Arc::new(ActivityTracker::new(Arc::new(MemoryKv::new())));
        let tasks = TaskQueue::new(db.clone());
        let service = RecoveryService::new(db.clone(), activity.clone(), tasks);

        let bot_id = bots::insert_test_bot(&db, 1).await;
        let campaign_id = recovery_db::upsert_campaign(&db, bot_id, "UTC".into(), 600, true)
            .await
            .unwrap();
        let step1 = recovery_db::add_step(&db, campaign_id, 1, "relative".into(), "600".into())
            .await
            .unwrap();
        let step2 =
            recovery_db::add_step(&db, campaign_id, 2, "next_day_at".into(), "09:00".into())
                .await
                .unwrap();
        for step in [step1, step2] {
            blocks::append(
                &db,
                Block {
                    id: 0,
                    container: step_container(step),
                    position: 0,
                    text: Some("volte!".into()),
                    media_file_id: None,
                    media_kind: None,
                    delay_seconds: 0,
                    auto_delete_seconds: 0,
                },
            )
            .await
            .unwrap();
        }

        Fixture {
            db,
            service,
            activity,
            bot_id,
            campaign_id,
            step1,
            step2,
        }
    }

    #[tokio::test]
    async fn watchdog_arms_at_threshold() {
        let f = fixture().await;
        let version = f.activity.bump_activity(f.bot_id, 111, 1_700_000_000).await.unwrap();
        f.service
            .schedule_inactivity_check(f.bot_id, 111, version)
            .await
            .unwrap();

        // One scheduled check, not due before the threshold.
        assert_eq!(
            queue_db::depth(&f.db, "recovery").await.unwrap(),
            1
        );
        assert!(queue_db::claim(&f.db, "recovery", botfleet_storage::now_iso())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn check_aborts_on_stale_version() {
        let f = fixture().await;
        let version = f.activity.bump_activity(f.bot_id, 111, 1_700_000_000).await.unwrap();
        // The user spoke again after the check was scheduled.
        f.activity.bump_activity(f.bot_id, 111, 1_700_000_100).await.unwrap();

        let err = f
            .service
            .handle_check_inactive(CheckInactivePayload {
                bot_id: f.bot_id,
                user_telegram_id: 111,
                inactivity_version: version,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::Consistency(_)), "got {err:?}");
        assert!(f.activity.current_episode(f.bot_id, 111).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn confirmed_inactivity_schedules_step_one() {
        let f = fixture().await;
        // Last activity long ago so the check confirms inactivity.
        let version = f.activity.bump_activity(f.bot_id, 111, 1_000_000).await.unwrap();

        f.service
            .handle_check_inactive(CheckInactivePayload {
                bot_id: f.bot_id,
                user_telegram_id: 111,
                inactivity_version: version,
            })
            .await
            .unwrap();

        let episode = f.activity.current_episode(f.bot_id, 111).await.unwrap();
        assert!(episode.is_some(), "episode must be claimed");
        // The step-send task is scheduled on the recovery queue.
        assert_eq!(queue_db::depth(&f.db, "recovery").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn prepare_step_guards_stale_campaign_version() {
        let f = fixture().await;
        let version = f.activity.bump_activity(f.bot_id, 111, 1_000_000).await.unwrap();
        let user = users::get_or_create(&f.db, f.bot_id, 111).await.unwrap();

        let payload = SendStepPayload {
            bot_id: f.bot_id,
            user_telegram_id: 111,
            user_db_id: user.id,
            campaign_id: f.campaign_id,
            step_id: f.step1,
            episode_id: "ep-1".into(),
            campaign_version: 1,
            inactivity_version: version,
        };

        // Campaign edited after scheduling: version bumped.
        recovery_db::upsert_campaign(&f.db, f.bot_id, "UTC".into(), 600, true)
            .await
            .unwrap();

        let err = f.service.prepare_step(&payload).await.unwrap_err();
        assert!(matches!(err, FleetError::Consistency(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn scenario_s5_user_activity_cancels_step_two() {
        let f = fixture().await;
        let version = f.activity.bump_activity(f.bot_id, 111, 1_000_000).await.unwrap();
        let user = users::get_or_create(&f.db, f.bot_id, 111).await.unwrap();
        f.activity.claim_episode(f.bot_id, 111, "ep-1").await.unwrap();

        let step1_payload = SendStepPayload {
            bot_id: f.bot_id,
            user_telegram_id: 111,
            user_db_id: user.id,
            campaign_id: f.campaign_id,
            step_id: f.step1,
            episode_id: "ep-1".into(),
            campaign_version: 1,
            inactivity_version: version,
        };

        // Step 1 passes guards and completes, chaining step 2.
        let plan = f.service.prepare_step(&step1_payload).await.unwrap().unwrap();
        assert_eq!(plan.step.id, f.step1);
        f.service.complete_step(&step1_payload, &plan).await.unwrap();

        let step2_payload = SendStepPayload {
            step_id: f.step2,
            ..step1_payload.clone()
        };

        // The user sends a message before step 2 fires.
        f.activity.bump_activity(f.bot_id, 111, 1_000_700).await.unwrap();

        let err = f.service.prepare_step(&step2_payload).await.unwrap_err();
        assert!(matches!(err, FleetError::Consistency(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn complete_step_is_single_shot_per_episode() {
        let f = fixture().await;
        let version = f.activity.bump_activity(f.bot_id, 111, 1_000_000).await.unwrap();
        let user = users::get_or_create(&f.db, f.bot_id, 111).await.unwrap();
        f.activity.claim_episode(f.bot_id, 111, "ep-1").await.unwrap();

        let payload = SendStepPayload {
            bot_id: f.bot_id,
            user_telegram_id: 111,
            user_db_id: user.id,
            campaign_id: f.campaign_id,
            step_id: f.step1,
            episode_id: "ep-1".into(),
            campaign_version: 1,
            inactivity_version: version,
        };
        let plan = f.service.prepare_step(&payload).await.unwrap().unwrap();
        f.service.complete_step(&payload, &plan).await.unwrap();

        let err = f.service.complete_step(&payload, &plan).await.unwrap_err();
        assert!(matches!(err, FleetError::Conflict(_)), "got {err:?}");
    }
}
