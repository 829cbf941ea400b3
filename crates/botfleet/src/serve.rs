// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `botfleet serve`: wires storage, KV, clients, services, worker pools,
//! the scheduler sweeps and the HTTP ingress into one process-scoped
//! context, then runs until a shutdown signal.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use botfleet_config::FleetConfig;
use botfleet_core::{CircuitBreaker, CircuitBreakerConfig, FleetError};
use botfleet_credits::{CreditService, Estimator};
use botfleet_crypto::{CallbackSigner, TokenCipher};
use botfleet_engine::{ConversationEngine, EngineDeps, StartFlow, TrackingService};
use botfleet_ingress::{IngressState, ServerConfig};
use botfleet_kv::{ActivityTracker, KvStore, MemoryKv, RateLimiter, RedisKv};
use botfleet_llm::{ChatClient, WhisperClient};
use botfleet_payments::{fanout::FanoutDeps, PaymentsService};
use botfleet_pix::PixGateway;
use botfleet_queue::{QueueName, TaskQueue, TaskRegistry, WorkerPools};
use botfleet_recovery::RecoveryService;
use botfleet_sender::BlockSender;
use botfleet_storage::queries::bots;
use botfleet_storage::Database;
use botfleet_telegram::BotApi;
use tracing::{error, info, warn};

use crate::shutdown;

/// Runs the `serve` command.
pub async fn run_serve(config: FleetConfig) -> Result<(), FleetError> {
    let redaction_values = init_tracing(&config);

    info!(env = config.app.env.as_str(), "starting botfleet serve");
    if let Some(dsn) = &config.app.sentry_dsn {
        info!(dsn_configured = !dsn.is_empty(), "sentry dsn recorded");
    }

    // Storage.
    let db = Database::open(&config.storage.database_path).await?;
    info!(path = config.storage.database_path.as_str(), "storage ready");

    // KV: Redis when configured, in-process otherwise.
    let kv: Arc<dyn KvStore> = if config.redis.url.is_empty() {
        warn!("redis.url not set, using the in-process KV (single node only)");
        Arc::new(MemoryKv::new())
    } else {
        Arc::new(RedisKv::connect(&config.redis.url, config.redis.timeout_secs).await?)
    };
    info!(kv = kv.name(), "kv ready");

    // Crypto.
    let cipher = match TokenCipher::from_config(&config.security.encryption_key) {
        Ok(cipher) => cipher,
        Err(e) if !config.app.is_prod() => {
            warn!(error = %e, "encryption key missing, generating an ephemeral dev key");
            TokenCipher::new(botfleet_crypto::generate_random_key()?)
        }
        Err(e) => {
            error!(error = %e, "encryption key is required in prod");
            return Err(e);
        }
    };
    let signer = CallbackSigner::new(&cipher);

    // Manager bot: media origin, notifications, webhook registration.
    if config.manager.bot_token.is_empty() {
        return Err(FleetError::Config(
            "manager.bot_token (MANAGER_BOT_TOKEN) is required".into(),
        ));
    }
    register_redaction(&redaction_values, config.manager.bot_token.clone());
    let manager_api = BotApi::new(&config.manager.bot_token)?;

    // Metrics.
    let exporter = match botfleet_metrics::MetricsExporter::install() {
        Ok(exporter) => Some(Arc::new(exporter)),
        Err(e) => {
            warn!(error = %e, "metrics disabled");
            None
        }
    };
    let prometheus_render = exporter.as_ref().map(|exporter| {
        let exporter = exporter.clone();
        Arc::new(move || exporter.render()) as Arc<dyn Fn() -> String + Send + Sync>
    });

    // External clients and their breakers.
    let breaker_config = CircuitBreakerConfig {
        fail_max: config.circuit_breaker.fail_max,
        open_secs: config.circuit_breaker.timeout_secs,
    };
    let llm_breaker = Arc::new(CircuitBreaker::new("llm", breaker_config));
    let whisper_breaker = Arc::new(CircuitBreaker::new("whisper", breaker_config));
    let gateway_breaker = Arc::new(CircuitBreaker::new("gateway", breaker_config));

    let chat = ChatClient::new(
        &config.llm.api_base,
        &config.llm.api_key,
        &config.llm.model,
        config.llm.timeout_secs,
    )?;
    let whisper = WhisperClient::new(
        &config.whisper.api_base,
        &config.whisper.api_key,
        &config.whisper.model,
        config.whisper.timeout_secs,
        config.whisper.max_duration_secs,
        config.whisper.max_size_mb,
    )?;
    let gateway = PixGateway::new(&config.payments.gateway_base_url, config.payments.timeout_secs)?;

    // Services.
    let tasks = TaskQueue::new(db.clone());
    let activity = Arc::new(ActivityTracker::new(kv.clone()));
    let limiter = RateLimiter::new(kv.clone(), config.security.rate_limits());
    let estimator = Estimator::new(config.pricing.clone());
    let credits = Arc::new(CreditService::new(
        db.clone(),
        estimator,
        config.security.allowed_admin_ids(),
    ));
    let sender = Arc::new(BlockSender::new(
        db.clone(),
        tasks.clone(),
        config.sender.clone(),
    ));
    let recovery = Arc::new(RecoveryService::new(
        db.clone(),
        activity.clone(),
        tasks.clone(),
    ));
    let fanout = FanoutDeps {
        sender: sender.clone(),
        credits: credits.clone(),
        manager_api: manager_api.clone(),
        notifications_enabled: config.notifications.enable_sale_notifications,
        notification_channel: None,
    };
    let payments = Arc::new(PaymentsService::new(
        db.clone(),
        kv.clone(),
        tasks.clone(),
        gateway,
        gateway_breaker,
        cipher.clone(),
        config.payments.clone(),
        fanout,
    ));
    let tracking = TrackingService::new(db.clone(), kv.clone());
    let start_flow = StartFlow::new(db.clone(), activity.clone(), tasks.clone());

    let engine = Arc::new(ConversationEngine::new(EngineDeps {
        db: db.clone(),
        activity: activity.clone(),
        limiter,
        credits,
        chat,
        llm_breaker,
        whisper,
        whisper_breaker,
        sender,
        tasks: tasks.clone(),
        recovery,
        payments: payments.clone(),
        tracking,
        start_flow,
        cipher: cipher.clone(),
        signer,
        manager_api: manager_api.clone(),
        llm_config: config.llm.clone(),
        antispam: Arc::new(botfleet_engine::NoopAntiSpam),
    }));

    // Task handlers and worker pools.
    let mut registry = TaskRegistry::new();
    botfleet_engine::register_all(&mut registry, engine.clone());
    info!(handlers = registry.len(), "task handlers registered");

    let cancel = shutdown::install_signal_handler();

    let pools = WorkerPools::new(
        db.clone(),
        registry,
        activity.clone(),
        config.queue.concurrency.clone(),
        config.queue.poll_interval_ms,
    );
    let pool_handles = pools.spawn(cancel.clone());

    // Webhook (re-)registration for every active bot.
    register_webhooks(&db, &cipher, &config).await;

    // Periodic sweeps: due upsells, pending payments, expired claims,
    // queue depth gauges.
    {
        let engine = engine.clone();
        let payments = payments.clone();
        let tasks = tasks.clone();
        let sweep_cancel = cancel.clone();
        let interval_secs = config.queue.sweep_interval_secs.max(5);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
            interval.tick().await; // skip the immediate tick
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match engine.sweep_due_upsells().await {
                            Ok(0) => {}
                            Ok(count) => info!(count, "due upsells dispatched"),
                            Err(e) => warn!(error = %e, "upsell sweep failed"),
                        }
                        if let Err(e) = payments.sweep_pending().await {
                            warn!(error = %e, "payment sweep failed");
                        }
                        match tasks.reclaim_expired().await {
                            Ok(0) => {}
                            Ok(count) => warn!(count, "reclaimed expired task claims"),
                            Err(e) => warn!(error = %e, "task reclaim failed"),
                        }
                        for queue in QueueName::ALL {
                            if let Ok(depth) = tasks.depth(queue).await {
                                botfleet_metrics::set_queue_depth(&queue.to_string(), depth as f64);
                            }
                        }
                    }
                    _ = sweep_cancel.cancelled() => {
                        info!("sweep loop shutting down");
                        break;
                    }
                }
            }
        });
    }

    // HTTP ingress.
    let ingress_state = IngressState {
        db: db.clone(),
        kv: kv.clone(),
        activity: activity.clone(),
        tasks: tasks.clone(),
        cipher,
        manager_secret: config.manager.webhook_secret.clone(),
        app_start_unix: chrono::Utc::now().timestamp(),
        prometheus_render,
    };
    let server_config = ServerConfig {
        host: config.ingress.host.clone(),
        port: config.ingress.port,
    };
    let ingress_cancel = cancel.clone();
    let ingress = tokio::spawn(async move {
        tokio::select! {
            result = botfleet_ingress::start_server(&server_config, ingress_state) => {
                if let Err(e) = result {
                    error!(error = %e, "ingress server stopped");
                }
            }
            _ = ingress_cancel.cancelled() => {
                info!("ingress shutting down");
            }
        }
    });

    cancel.cancelled().await;
    info!("shutdown requested, waiting for workers");
    for handle in pool_handles {
        let _ = handle.await;
    }
    let _ = ingress.await;
    info!("botfleet serve shutdown complete");
    Ok(())
}

/// Best-effort webhook registration at startup.
async fn register_webhooks(db: &Database, cipher: &TokenCipher, config: &FleetConfig) {
    let base = config.manager.webhook_base_url.trim_end_matches('/');
    let active = match bots::list_active(db).await {
        Ok(active) => active,
        Err(e) => {
            warn!(error = %e, "bot listing failed, skipping webhook registration");
            return;
        }
    };
    botfleet_metrics::set_active_bots(active.len() as f64);
    for bot in active {
        let token = match cipher.open_token(&bot.token_cipher, &bot.token_nonce) {
            Ok(token) => token,
            Err(e) => {
                warn!(bot_id = bot.id, error = %e, "bot token unsealing failed");
                continue;
            }
        };
        let api = match BotApi::new(&token) {
            Ok(api) => api,
            Err(e) => {
                warn!(bot_id = bot.id, error = %e, "bot client construction failed");
                continue;
            }
        };
        let url = format!("{base}/webhook/{}", bot.id);
        match api.set_webhook(&url, &bot.webhook_secret).await {
            Ok(()) => info!(bot_id = bot.id, "webhook registered"),
            Err(e) => warn!(bot_id = bot.id, error = %e, "webhook registration failed"),
        }
    }
}

/// Registers a runtime secret with the redaction filter.
fn register_redaction(values: &Arc<RwLock<Vec<String>>>, secret: String) {
    botfleet_security::RedactingWriter::<std::io::Stdout>::add_exact_value(values, secret);
}

/// Initializes tracing with the secret-redacting writer.
///
/// Returns the exact-match value list so startup can register runtime
/// secrets (decrypted tokens, webhook secrets).
fn init_tracing(config: &FleetConfig) -> Arc<RwLock<Vec<String>>> {
    use tracing_subscriber::EnvFilter;

    let values: Arc<RwLock<Vec<String>>> = Arc::new(RwLock::new(Vec::new()));
    let writer_values = values.clone();

    let default_level = if config.app.is_prod() {
        config.app.log_level.clone()
    } else {
        // Dev keeps the platform chatty regardless of LOG_LEVEL.
        "debug".to_string()
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("botfleet={default_level},warn")));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(move || {
            botfleet_security::RedactingWriter::new(std::io::stdout(), writer_values.clone())
        });

    if config.app.is_prod() {
        // Machine-readable logs in prod; the redacting writer still
        // sits underneath.
        builder.json().init();
    } else {
        builder.init();
    }

    values
}
