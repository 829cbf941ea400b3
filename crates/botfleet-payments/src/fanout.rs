// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The sale-approved fan-out.
//!
//! Exactly-once semantics rest on two layers: the `lock:sale:{tx}`
//! KV lock serializes concurrent observers, and the UNIQUE
//! `sale_notifications.transaction_id` row decides the single fan-out
//! owner even across lock expiry. Losers exit as success.

use botfleet_config::model::PaymentsConfig;
use botfleet_core::{ContainerKind, ContainerRef, FleetError};
use botfleet_credits::CreditService;
use botfleet_crypto::TokenCipher;
use botfleet_queue::{EnqueueOptions, QueueName, TaskQueue};
use botfleet_sender::{BlockSender, SendContext};
use botfleet_storage::queries::{blocks, bots, notifications, trackers, transactions, upsells};
use botfleet_storage::{Database, PixCategory, PixTransaction};
use botfleet_telegram::BotApi;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// TTL of the per-transaction sale lock.
pub const SALE_LOCK_TTL_SECS: u64 = 30;

/// Task name of the channel notification send.
pub const SEND_SALE_NOTIFICATION_TASK: &str = "send_sale_notification";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleNotificationPayload {
    pub transaction_id: i64,
}

/// Collaborators the fan-out needs beyond the payments service itself.
pub struct FanoutDeps {
    pub sender: Arc<BlockSender>,
    pub credits: Arc<CreditService>,
    /// Origin bot for media streaming (the manager bot).
    pub manager_api: BotApi,
    pub notifications_enabled: bool,
    /// Per-admin notification channel (None disables channel posts).
    pub notification_channel: Option<i64>,
}

/// Runs every paid-transaction side effect exactly once.
///
/// Running this N times has the observable effect of running it once:
/// the notification row insert picks the single owner, delivery is
/// guarded by `mark_delivered`, and the notification task carries an
/// idempotency key.
pub async fn handle_sale_approved(
    db: &Database,
    tasks: &TaskQueue,
    cipher: &TokenCipher,
    config: &PaymentsConfig,
    deps: &FanoutDeps,
    tx: &PixTransaction,
) -> Result<(), FleetError> {
    let bot = bots::get(db, tx.bot_id)
        .await?
        .ok_or_else(|| FleetError::Consistency(format!("bot {} missing", tx.bot_id)))?;

    // Single-owner election.
    let owner = notifications::try_insert_pending(
        db,
        tx.id,
        bot.admin_id,
        deps.notification_channel,
    )
    .await?;
    if !owner {
        debug!(transaction_id = tx.id, "sale already handled by another worker");
        return Ok(());
    }

    info!(
        transaction_id = tx.id,
        bot_id = tx.bot_id,
        category = %tx.category,
        amount_cents = tx.amount_cents,
        "sale approved"
    );

    // 1. Deliverable dispatch (or wallet credit for top-ups).
    match tx.category {
        PixCategory::Topup => {
            deps.credits
                .apply_topup(bot.admin_id, tx.amount_cents, tx.external_id.clone())
                .await?;
            transactions::mark_delivered(db, tx.id).await?;
        }
        PixCategory::Offer | PixCategory::Upsell => {
            dispatch_deliverable(db, cipher, deps, tx, &bot).await?;
        }
    }

    // 2. Upsell flow activation on the first sale of an offer.
    //
    // "First paid" means no prior transaction besides this one with
    // status = delivered; `payments.upsell_on_any_paid` widens the
    // prior-set to any paid transaction. Delivery rows are idempotent,
    // so a re-run of the fan-out never duplicates the flow.
    if tx.category == PixCategory::Offer {
        let prior = transactions::prior_paid_count(
            db,
            tx.bot_id,
            tx.user_telegram_id,
            tx.id,
            config.upsell_on_any_paid,
        )
        .await?;
        if prior == 0 {
            activate_upsell_flow(db, tx).await?;
        } else {
            debug!(
                transaction_id = tx.id,
                prior, "upsell flow not activated, user already purchased"
            );
        }
    }

    // 3. Upsell delivery bookkeeping.
    if tx.category == PixCategory::Upsell {
        if let Some(upsell_id) = tx.upsell_id {
            upsells::mark_paid(db, tx.bot_id, tx.user_telegram_id, upsell_id, tx.id).await?;
        }
    }

    // 4. Tracker attribution stats.
    if let Some(tracker_id) = tx.tracker_id {
        let day = Utc::now().format("%Y-%m-%d").to_string();
        trackers::record_sale(db, tx.bot_id, tracker_id, day, tx.amount_cents).await?;
    }

    // 5. Channel notification, as its own retried task.
    if deps.notifications_enabled {
        tasks
            .enqueue(
                QueueName::Notifications,
                SEND_SALE_NOTIFICATION_TASK,
                serde_json::to_value(SaleNotificationPayload { transaction_id: tx.id })
                    .map_err(|e| FleetError::Internal(e.to_string()))?,
                EnqueueOptions {
                    idempotency_key: Some(format!("notif:{}", tx.id)),
                    ..Default::default()
                },
            )
            .await?;
    } else {
        notifications::set_status(db, tx.id, "skipped").await?;
    }

    Ok(())
}

async fn dispatch_deliverable(
    db: &Database,
    cipher: &TokenCipher,
    deps: &FanoutDeps,
    tx: &PixTransaction,
    bot: &botfleet_storage::Bot,
) -> Result<(), FleetError> {
    let container = match tx.category {
        PixCategory::Offer => tx
            .offer_id
            .map(|id| ContainerRef::new(ContainerKind::OfferDeliverable, id)),
        PixCategory::Upsell => tx
            .upsell_id
            .map(|id| ContainerRef::new(ContainerKind::UpsellDeliverable, id)),
        PixCategory::Topup => None,
    };
    let Some(container) = container else {
        warn!(transaction_id = tx.id, "paid transaction has no deliverable container");
        transactions::mark_delivered(db, tx.id).await?;
        return Ok(());
    };

    let deliverable = blocks::list(db, container).await?;
    if deliverable.is_empty() {
        warn!(transaction_id = tx.id, "no deliverable blocks configured");
        transactions::mark_delivered(db, tx.id).await?;
        return Ok(());
    }

    let token = cipher.open_token(&bot.token_cipher, &bot.token_nonce)?;
    let api = BotApi::new(&token)?;
    let ctx = SendContext {
        api: &api,
        origin_api: &deps.manager_api,
        bot_id: tx.bot_id,
        chat_id: tx.chat_id,
        pix_code: None,
        preview: false,
    };
    deps.sender.send_blocks(&ctx, &deliverable).await?;

    if !transactions::mark_delivered(db, tx.id).await? {
        // Another worker delivered between our insert and send; the
        // unique notification row should have prevented this, so log it.
        warn!(transaction_id = tx.id, "delivery raced after fan-out election");
    }
    Ok(())
}

/// Creates the per-user upsell delivery rows.
///
/// Preset upsell #1 arms on its trigger (NULL schedule); later ordinals
/// get wall-clock times from their relative schedules. Idempotent via
/// the unique (bot, user, upsell) key.
pub async fn activate_upsell_flow(db: &Database, tx: &PixTransaction) -> Result<(), FleetError> {
    let all = upsells::list_active(db, tx.bot_id).await?;
    if all.is_empty() {
        return Ok(());
    }

    for upsell in &all {
        let scheduled_for = if upsell.is_immediate || (upsell.is_preset && upsell.trigger_term.is_some())
        {
            None
        } else {
            let due = Utc::now()
                + Duration::days(upsell.days_after)
                + Duration::hours(upsell.hours_after)
                + Duration::minutes(upsell.minutes_after);
            Some(due.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
        };
        upsells::ensure_delivery(db, tx.bot_id, tx.user_telegram_id, upsell.id, scheduled_for)
            .await?;
    }

    info!(
        bot_id = tx.bot_id,
        user_telegram_id = tx.user_telegram_id,
        upsells = all.len(),
        "upsell flow activated"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use botfleet_config::model::{PricingConfig, SenderConfig};
    use botfleet_credits::Estimator;
    use botfleet_kv::{LockManager, MemoryKv};
    use botfleet_storage::queries::queue as queue_db;
    use botfleet_storage::{NewTransaction, PixStatus};

    async fn fixture() -> (Database, TaskQueue, TokenCipher, PaymentsConfig, FanoutDeps, i64) {
        let db = Database::open_in_memory().await.unwrap();
        let tasks = TaskQueue::new(db.clone());
        let cipher = TokenCipher::new([3u8; 32]);
        let config = PaymentsConfig::default();

        let sender = Arc::new(BlockSender::new(
            db.clone(),
            tasks.clone(),
            SenderConfig::default(),
        ));
        let credits = Arc::new(CreditService::new(
            db.clone(),
            Estimator::new(PricingConfig::default()),
            vec![],
        ));
        let deps = FanoutDeps {
            sender,
            credits,
            manager_api: BotApi::new("1:manager").unwrap(),
            notifications_enabled: true,
            notification_channel: Some(-100),
        };

        let (token_cipher, token_nonce) = cipher.seal_token("42:bot-token").unwrap();
        let bot_id = bots::create(&db, 777, token_cipher, token_nonce, None, "sec".into())
            .await
            .unwrap();
        (db, tasks, cipher, config, deps, bot_id)
    }

    async fn paid_tx(db: &Database, bot_id: i64, category: PixCategory, external: &str) -> PixTransaction {
        let id = transactions::create(
            db,
            NewTransaction {
                bot_id,
                user_telegram_id: 111,
                chat_id: 111,
                offer_id: None,
                upsell_id: None,
                tracker_id: None,
                category,
                external_id: external.into(),
                qr_code: "qr".into(),
                amount_cents: 790,
            },
        )
        .await
        .unwrap();
        transactions::set_status(db, id, PixStatus::Pending).await.unwrap();
        transactions::set_status(db, id, PixStatus::Paid).await.unwrap();
        transactions::get(db, id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn scenario_s4_concurrent_fanout_is_exactly_once() {
        let (db, tasks, cipher, config, deps, bot_id) = fixture().await;
        // No offer deliverable configured: the fan-out marks delivered
        // without touching Telegram, which is the concurrency-relevant path.
        let tx = paid_tx(&db, bot_id, PixCategory::Offer, "ext-789").await;

        // Two workers observe the same paid transition (lock elided, as
        // after a lock TTL expiry): the unique row still elects one.
        handle_sale_approved(&db, &tasks, &cipher, &config, &deps, &tx)
            .await
            .unwrap();
        handle_sale_approved(&db, &tasks, &cipher, &config, &deps, &tx)
            .await
            .unwrap();

        let row = notifications::get(&db, tx.id).await.unwrap().unwrap();
        assert_eq!(row.status, "pending");
        // Exactly one notification task despite two invocations.
        assert_eq!(queue_db::depth(&db, "notifications").await.unwrap(), 1);
        // Exactly one delivery stamp.
        let after = transactions::get(&db, tx.id).await.unwrap().unwrap();
        assert_eq!(after.status, PixStatus::Delivered);
    }

    #[tokio::test]
    async fn topup_credits_wallet_exactly_once() {
        let (db, tasks, cipher, config, deps, bot_id) = fixture().await;
        let tx = paid_tx(&db, bot_id, PixCategory::Topup, "ext-topup").await;

        handle_sale_approved(&db, &tasks, &cipher, &config, &deps, &tx)
            .await
            .unwrap();
        handle_sale_approved(&db, &tasks, &cipher, &config, &deps, &tx)
            .await
            .unwrap();

        assert_eq!(deps.credits.balance(777).await.unwrap(), 790);
        assert!(deps.credits.verify_wallet(777).await.unwrap());
    }

    #[tokio::test]
    async fn notifications_disabled_marks_skipped() {
        let (db, tasks, cipher, config, mut deps, bot_id) = fixture().await;
        deps.notifications_enabled = false;
        let tx = paid_tx(&db, bot_id, PixCategory::Offer, "ext-nonotif").await;

        handle_sale_approved(&db, &tasks, &cipher, &config, &deps, &tx)
            .await
            .unwrap();

        let row = notifications::get(&db, tx.id).await.unwrap().unwrap();
        assert_eq!(row.status, "skipped");
        assert_eq!(queue_db::depth(&db, "notifications").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn upsell_activation_creates_armed_and_scheduled_rows() {
        let (db, tasks, cipher, config, deps, bot_id) = fixture().await;

        let preset = upsells::create(
            &db,
            bot_id,
            "VIP".into(),
            1,
            Some("vip".into()),
            Some("sell vip".into()),
            1990,
            true,
            0,
            0,
            0,
        )
        .await
        .unwrap();
        let later = upsells::create(
            &db,
            bot_id,
            "Mentoria".into(),
            2,
            None,
            None,
            9900,
            false,
            1,
            2,
            30,
        )
        .await
        .unwrap();

        let tx = paid_tx(&db, bot_id, PixCategory::Offer, "ext-up").await;
        handle_sale_approved(&db, &tasks, &cipher, &config, &deps, &tx)
            .await
            .unwrap();

        let armed = upsells::armed_delivery(&db, bot_id, 111, preset)
            .await
            .unwrap()
            .unwrap();
        assert!(armed.scheduled_for.is_none(), "preset #1 arms on trigger");

        let scheduled = upsells::armed_delivery(&db, bot_id, 111, later)
            .await
            .unwrap()
            .unwrap();
        assert!(scheduled.scheduled_for.is_some(), "ordinal 2 is time-scheduled");

        // Re-running activation never duplicates rows.
        activate_upsell_flow(&db, &tx).await.unwrap();
        assert!(upsells::flow_activated(&db, bot_id, 111).await.unwrap());
    }

    #[tokio::test]
    async fn sale_lock_serializes_observers() {
        let kv = Arc::new(MemoryKv::new());
        let locks = LockManager::new(kv);
        let token = locks.try_acquire("sale:1", SALE_LOCK_TTL_SECS).await.unwrap();
        assert!(token.is_some());
        assert!(locks.try_acquire("sale:1", SALE_LOCK_TTL_SECS).await.unwrap().is_none());
        locks.release(token.unwrap()).await.unwrap();
    }

    #[tokio::test]
    async fn tracked_sales_update_daily_stats() {
        let (db, tasks, cipher, config, deps, bot_id) = fixture().await;
        let tracker_id = trackers::create(&db, bot_id, "abc12345".into(), "insta".into())
            .await
            .unwrap();

        let id = transactions::create(
            &db,
            NewTransaction {
                bot_id,
                user_telegram_id: 111,
                chat_id: 111,
                offer_id: None,
                upsell_id: None,
                tracker_id: Some(tracker_id),
                category: PixCategory::Offer,
                external_id: "ext-trk".into(),
                qr_code: "qr".into(),
                amount_cents: 790,
            },
        )
        .await
        .unwrap();
        transactions::set_status(&db, id, PixStatus::Paid).await.unwrap();
        let tx = transactions::get(&db, id).await.unwrap().unwrap();

        handle_sale_approved(&db, &tasks, &cipher, &config, &deps, &tx)
            .await
            .unwrap();

        let day = Utc::now().format("%Y-%m-%d").to_string();
        let (starts, sales, revenue) = trackers::daily_stat(&db, bot_id, tracker_id, day)
            .await
            .unwrap();
        assert_eq!((starts, sales, revenue), (0, 1, 790));
    }
}
