// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end pipeline tests over in-memory backends.
//!
//! External surfaces (Telegram, LLM, gateway) are configured with
//! unreachable endpoints; every asserted path must complete without
//! touching them -- silent drops, attribution, scheduling and the
//! exactly-once bookkeeping are all observable in storage and KV.

use std::sync::Arc;

use botfleet_config::model::{LlmConfig, PaymentsConfig, SenderConfig};
use botfleet_config::FleetConfig;
use botfleet_core::{CircuitBreaker, CircuitBreakerConfig, UpdateEnvelope};
use botfleet_credits::{CreditService, Estimator};
use botfleet_crypto::{CallbackSigner, TokenCipher};
use botfleet_engine::{ConversationEngine, EngineDeps, StartFlow, TrackingService};
use botfleet_kv::{ActivityTracker, KvStore, MemoryKv, RateLimiter};
use botfleet_llm::{ChatClient, WhisperClient};
use botfleet_payments::{fanout::FanoutDeps, PaymentsService};
use botfleet_pix::PixGateway;
use botfleet_queue::{QueueName, TaskQueue};
use botfleet_recovery::RecoveryService;
use botfleet_sender::BlockSender;
use botfleet_storage::queries::{bots, credits, queue as queue_db, trackers};
use botfleet_storage::Database;
use botfleet_telegram::BotApi;

struct Harness {
    db: Database,
    kv: Arc<dyn KvStore>,
    activity: Arc<ActivityTracker>,
    engine: ConversationEngine,
    bot_id: i64,
    admin_id: i64,
}

async fn harness() -> Harness {
    let config = FleetConfig::default();
    let db = Database::open_in_memory().await.unwrap();
    let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
    let activity = Arc::new(ActivityTracker::new(kv.clone()));
    let tasks = TaskQueue::new(db.clone());
    let cipher = TokenCipher::new([5u8; 32]);

    let admin_id = 777;
    let (token_cipher, nonce) = cipher.seal_token("42:secondary-token").unwrap();
    let bot_id = bots::create(&db, admin_id, token_cipher, nonce, None, "whsec".into())
        .await
        .unwrap();

    let breaker_config = CircuitBreakerConfig::default();
    let credits_svc = Arc::new(CreditService::new(
        db.clone(),
        Estimator::new(config.pricing.clone()),
        vec![],
    ));
    let sender = Arc::new(BlockSender::new(
        db.clone(),
        tasks.clone(),
        SenderConfig::default(),
    ));
    let recovery = Arc::new(RecoveryService::new(
        db.clone(),
        activity.clone(),
        tasks.clone(),
    ));
    let manager_api = BotApi::new("1:manager-token").unwrap();
    let payments = Arc::new(PaymentsService::new(
        db.clone(),
        kv.clone(),
        tasks.clone(),
        PixGateway::new("http://127.0.0.1:1", 1).unwrap(),
        Arc::new(CircuitBreaker::new("gateway", breaker_config)),
        cipher.clone(),
        PaymentsConfig::default(),
        FanoutDeps {
            sender: sender.clone(),
            credits: credits_svc.clone(),
            manager_api: manager_api.clone(),
            notifications_enabled: true,
            notification_channel: None,
        },
    ));

    let engine = ConversationEngine::new(EngineDeps {
        db: db.clone(),
        activity: activity.clone(),
        limiter: RateLimiter::new(kv.clone(), config.security.rate_limits()),
        credits: credits_svc,
        chat: ChatClient::new("http://127.0.0.1:1", "k", "model", 1).unwrap(),
        llm_breaker: Arc::new(CircuitBreaker::new("llm", breaker_config)),
        whisper: WhisperClient::new("http://127.0.0.1:1", "k", "whisper-1", 1, 300, 20).unwrap(),
        whisper_breaker: Arc::new(CircuitBreaker::new("whisper", breaker_config)),
        sender,
        tasks,
        recovery,
        payments,
        tracking: TrackingService::new(db.clone(), kv.clone()),
        start_flow: StartFlow::new(db.clone(), activity.clone(), TaskQueue::new(db.clone())),
        cipher: cipher.clone(),
        signer: CallbackSigner::new(&cipher),
        manager_api,
        llm_config: LlmConfig::default(),
        antispam: Arc::new(botfleet_engine::NoopAntiSpam),
    });

    Harness {
        db,
        kv,
        activity,
        engine,
        bot_id,
        admin_id,
    }
}

fn text_update(update_id: i64, user_id: i64, text: &str) -> UpdateEnvelope {
    serde_json::from_value(serde_json::json!({
        "update_id": update_id,
        "message": {
            "message_id": 1,
            "date": 2_000_000_000u64,
            "from": {"id": user_id},
            "chat": {"id": user_id},
            "text": text
        }
    }))
    .unwrap()
}

#[tokio::test]
async fn start_with_tracker_code_attributes_and_counts() {
    let h = harness().await;
    let (tracker_id, code) = h
        .engine
        .tracking_service()
        .create_tracker(h.bot_id, "insta".into())
        .await
        .unwrap();

    h.engine
        .process_update(h.bot_id, text_update(1, 111, &format!("/start {code}")))
        .await
        .unwrap();

    // Attribution recorded (S1), activity version bumped.
    assert_eq!(
        trackers::attribution_of(&h.db, h.bot_id, 111).await.unwrap(),
        Some(tracker_id)
    );
    assert!(h.activity.inactivity_version(h.bot_id, 111).await.unwrap() >= 1);

    let day = chrono::Utc::now().format("%Y-%m-%d").to_string();
    let (starts, sales, _) = trackers::daily_stat(&h.db, h.bot_id, tracker_id, day)
        .await
        .unwrap();
    assert_eq!((starts, sales), (1, 0));
}

#[tokio::test]
async fn require_tracked_start_drops_silently() {
    let h = harness().await;
    trackers::set_require_tracked_start(&h.db, h.bot_id, true)
        .await
        .unwrap();

    h.engine
        .process_update(h.bot_id, text_update(2, 222, "/start"))
        .await
        .unwrap();

    // Dropped before any side effect: no activity, no session.
    assert_eq!(h.activity.inactivity_version(h.bot_id, 222).await.unwrap(), 0);
}

#[tokio::test]
async fn scenario_s6_empty_wallet_drops_message_without_llm_call() {
    let h = harness().await;

    // The LLM endpoint is unreachable; an attempted call would error.
    // An empty wallet must silently drop before the call happens.
    h.engine
        .process_update(h.bot_id, text_update(3, 111, "Quero saber mais"))
        .await
        .unwrap();

    assert_eq!(credits::balance(&h.db, h.admin_id).await.unwrap(), 0);
    // The activity ping still happened (the user was seen).
    assert!(h.activity.inactivity_version(h.bot_id, 111).await.unwrap() >= 1);
}

#[tokio::test]
async fn inactive_bot_absorbs_updates() {
    let h = harness().await;
    bots::set_active(&h.db, h.bot_id, false).await.unwrap();

    h.engine
        .process_update(h.bot_id, text_update(4, 111, "oi"))
        .await
        .unwrap();
    assert_eq!(h.activity.inactivity_version(h.bot_id, 111).await.unwrap(), 0);
}

#[tokio::test]
async fn voice_notes_detour_to_the_audio_queue() {
    let h = harness().await;
    let update: UpdateEnvelope = serde_json::from_value(serde_json::json!({
        "update_id": 5,
        "message": {
            "date": 2_000_000_000u64,
            "from": {"id": 111},
            "chat": {"id": 111},
            "voice": {"file_id": "v-1", "duration": 12}
        }
    }))
    .unwrap();

    h.engine.process_update(h.bot_id, update).await.unwrap();
    assert_eq!(queue_db::depth(&h.db, "audio").await.unwrap(), 1);
}

#[tokio::test]
async fn rate_limit_gate_drops_flood() {
    let h = harness().await;
    // Default rule is 30/minute; the 31st message is absorbed silently.
    for i in 0..31 {
        h.engine
            .process_update(h.bot_id, text_update(100 + i, 333, "oi"))
            .await
            .unwrap();
    }
    // Activity bumps stop at the limit: 30 pings, not 31.
    assert_eq!(h.activity.inactivity_version(h.bot_id, 333).await.unwrap(), 30);
}
