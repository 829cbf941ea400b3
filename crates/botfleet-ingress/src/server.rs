// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Axum server: routing, secret validation, de-dup and enqueue.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use botfleet_core::{FleetError, UpdateEnvelope};
use botfleet_crypto::TokenCipher;
use botfleet_kv::ActivityTracker;
use botfleet_payments::VERIFY_TRANSACTION_TASK;
use botfleet_queue::{EnqueueOptions, QueueName, TaskQueue};
use botfleet_storage::queries::{bots, gateways, transactions};
use botfleet_storage::Database;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

/// Header carrying the webhook secret (Telegram's own convention).
const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

/// Shared state of every ingress handler.
#[derive(Clone)]
pub struct IngressState {
    pub db: Database,
    pub kv: Arc<dyn botfleet_kv::KvStore>,
    pub activity: Arc<ActivityTracker>,
    pub tasks: TaskQueue,
    pub cipher: TokenCipher,
    /// Global secret of /webhook/manager.
    pub manager_secret: String,
    /// Unix seconds the process started; older messages are dropped.
    pub app_start_unix: i64,
    /// Prometheus text renderer for /metrics.
    pub prometheus_render: Option<Arc<dyn Fn() -> String + Send + Sync>>,
}

/// Bind address of the ingress server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Starts the ingress HTTP server. Runs until the listener fails.
pub async fn start_server(config: &ServerConfig, state: IngressState) -> Result<(), FleetError> {
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| FleetError::Config(format!("failed to bind ingress to {addr}: {e}")))?;

    info!("ingress listening on {addr}");

    axum::serve(listener, app)
        .await
        .map_err(|e| FleetError::Internal(format!("ingress server error: {e}")))?;
    Ok(())
}

fn router(state: IngressState) -> Router {
    Router::new()
        .route("/webhook/manager", post(manager_webhook))
        .route("/webhook/gateway/:admin_id", post(gateway_webhook))
        .route("/webhook/:bot_id", post(bot_webhook))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn secret_of(headers: &HeaderMap) -> Option<&str> {
    headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok())
}

fn ok_body() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true}))
}

/// Secondary bot webhook: per-bot secret, minimal parse, de-dup, enqueue.
async fn bot_webhook(
    State(state): State<IngressState>,
    Path(bot_id): Path<i64>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    // Secret check before the body is even looked at.
    let bot = match bots::get(&state.db, bot_id).await {
        Ok(Some(bot)) => bot,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            warn!(bot_id, error = %e, "bot lookup failed at ingress");
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    };
    if secret_of(&headers) != Some(bot.webhook_secret.as_str()) {
        warn!(bot_id, "webhook with wrong secret rejected");
        return StatusCode::FORBIDDEN.into_response();
    }
    if !bot.is_active {
        // Inactive bots absorb updates so Telegram stops retrying.
        return (StatusCode::OK, ok_body()).into_response();
    }

    let Ok(update) = serde_json::from_str::<UpdateEnvelope>(&body) else {
        debug!(bot_id, "unparseable update absorbed");
        return (StatusCode::OK, ok_body()).into_response();
    };

    if let Some(date) = update.message_date() {
        if date < state.app_start_unix {
            return (StatusCode::OK, ok_body()).into_response();
        }
    }

    if let Some(update_id) = update.update_id {
        match state.activity.seen_update(bot_id, update_id).await {
            Ok(true) => {
                debug!(bot_id, update_id, "duplicate update dropped");
                return (StatusCode::OK, ok_body()).into_response();
            }
            Ok(false) => {}
            Err(e) => warn!(bot_id, error = %e, "de-dup check failed, accepting update"),
        }
    }

    // The full body rides along; workers re-parse what they need.
    let raw: serde_json::Value =
        serde_json::from_str(&body).unwrap_or(serde_json::Value::Null);
    let enqueued = state
        .tasks
        .enqueue(
            QueueName::Default,
            botfleet_engine_task_name(),
            serde_json::json!({"bot_id": bot_id, "update": raw}),
            EnqueueOptions::default(),
        )
        .await;
    if let Err(e) = enqueued {
        warn!(bot_id, error = %e, "enqueue failed, returning ok to avoid retry storm");
    } else {
        botfleet_metrics::record_message("webhook");
    }
    (StatusCode::OK, ok_body()).into_response()
}

/// The ingress crate stays decoupled from the engine crate; the task
/// name is the only shared contract.
fn botfleet_engine_task_name() -> &'static str {
    "process_update"
}

/// Manager bot webhook: global secret.
async fn manager_webhook(
    State(state): State<IngressState>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    if state.manager_secret.is_empty() || secret_of(&headers) != Some(state.manager_secret.as_str())
    {
        warn!("manager webhook with wrong secret rejected");
        return StatusCode::FORBIDDEN.into_response();
    }

    let Ok(update) = serde_json::from_str::<UpdateEnvelope>(&body) else {
        return (StatusCode::OK, ok_body()).into_response();
    };
    if let Some(date) = update.message_date() {
        if date < state.app_start_unix {
            return (StatusCode::OK, ok_body()).into_response();
        }
    }
    if let Some(update_id) = update.update_id {
        // Manager updates share the de-dup keyspace under bot id 0.
        if state.activity.seen_update(0, update_id).await.unwrap_or(false) {
            return (StatusCode::OK, ok_body()).into_response();
        }
    }

    let raw: serde_json::Value =
        serde_json::from_str(&body).unwrap_or(serde_json::Value::Null);
    if let Err(e) = state
        .tasks
        .enqueue(
            QueueName::Default,
            "process_manager_update",
            serde_json::json!({"update": raw}),
            EnqueueOptions::default(),
        )
        .await
    {
        warn!(error = %e, "manager enqueue failed");
    }
    (StatusCode::OK, ok_body()).into_response()
}

/// PIX gateway callback: HMAC signature over the raw body, then a
/// verification task (never a synchronous gateway call).
async fn gateway_webhook(
    State(state): State<IngressState>,
    Path(admin_id): Path<i64>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    let Some(signature) = headers
        .get("x-webhook-signature")
        .and_then(|v| v.to_str().ok())
    else {
        return StatusCode::FORBIDDEN.into_response();
    };

    let token = match gateways::get(&state.db, admin_id).await {
        Ok(Some((cipher, nonce))) => match state.cipher.open_token(&cipher, &nonce) {
            Ok(token) => token,
            Err(e) => {
                warn!(admin_id, error = %e, "gateway token unsealing failed");
                return StatusCode::FORBIDDEN.into_response();
            }
        },
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(_) => return StatusCode::SERVICE_UNAVAILABLE.into_response(),
    };

    if botfleet_pix::verify_webhook_signature(body.as_bytes(), signature, &token).is_err() {
        warn!(admin_id, "gateway webhook signature rejected");
        return StatusCode::FORBIDDEN.into_response();
    }

    let Ok(payload) = serde_json::from_str::<serde_json::Value>(&body) else {
        return (StatusCode::OK, ok_body()).into_response();
    };
    let Some(external_id) = payload.get("id").and_then(|v| v.as_str()) else {
        return (StatusCode::OK, ok_body()).into_response();
    };

    match transactions::get_by_external(&state.db, external_id).await {
        Ok(Some(tx)) => {
            let _ = state
                .tasks
                .enqueue(
                    QueueName::Scheduler,
                    VERIFY_TRANSACTION_TASK,
                    serde_json::json!({"transaction_id": tx.id}),
                    EnqueueOptions {
                        idempotency_key: Some(format!("webhook:{}", tx.id)),
                        ..Default::default()
                    },
                )
                .await;
        }
        Ok(None) => debug!(external_id, "gateway webhook for unknown transaction"),
        Err(e) => warn!(error = %e, "transaction lookup failed for webhook"),
    }
    (StatusCode::OK, ok_body()).into_response()
}

/// Liveness: store and KV both reachable.
async fn health(State(state): State<IngressState>) -> impl IntoResponse {
    let db_ok = state.db.ping().await.is_ok();
    let kv_ok = state.kv.ping().await.is_ok();
    if db_ok && kv_ok {
        (StatusCode::OK, Json(serde_json::json!({"ok": true}))).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"ok": false, "db": db_ok, "kv": kv_ok})),
        )
            .into_response()
    }
}

/// Prometheus text exposition.
async fn metrics(State(state): State<IngressState>) -> impl IntoResponse {
    match &state.prometheus_render {
        Some(render) => (StatusCode::OK, render()).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled".to_string()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use botfleet_kv::MemoryKv;
    use botfleet_storage::queries::queue as queue_db;

    async fn test_state() -> (IngressState, i64) {
        let db = Database::open_in_memory().await.unwrap();
        let (cipher_bytes, nonce) = TokenCipher::new([1u8; 32]).seal_token("42:tok").unwrap();
        let bot_id = bots::create(&db, 777, cipher_bytes, nonce, None, "whsec".into())
            .await
            .unwrap();
        let kv: Arc<dyn botfleet_kv::KvStore> = Arc::new(MemoryKv::new());
        let state = IngressState {
            db: db.clone(),
            kv: kv.clone(),
            activity: Arc::new(ActivityTracker::new(kv)),
            tasks: TaskQueue::new(db),
            cipher: TokenCipher::new([1u8; 32]),
            manager_secret: "mgr-secret".into(),
            app_start_unix: 1_000,
            prometheus_render: None,
        };
        (state, bot_id)
    }

    async fn call(
        state: IngressState,
        uri: &str,
        secret: Option<&str>,
        body: serde_json::Value,
    ) -> StatusCode {
        use tower::ServiceExt;
        let app = router(state);
        let mut request = Request::builder().method("POST").uri(uri);
        if let Some(secret) = secret {
            request = request.header(SECRET_HEADER, secret);
        }
        let response = app
            .oneshot(
                request
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        response.status()
    }

    fn update(update_id: i64) -> serde_json::Value {
        serde_json::json!({
            "update_id": update_id,
            "message": {
                "message_id": 1,
                "date": 2_000,
                "from": {"id": 111},
                "chat": {"id": 111},
                "text": "oi"
            }
        })
    }

    #[tokio::test]
    async fn wrong_secret_is_forbidden() {
        let (state, bot_id) = test_state().await;
        let status = call(state, &format!("/webhook/{bot_id}"), Some("nope"), update(1)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn missing_secret_is_forbidden() {
        let (state, bot_id) = test_state().await;
        let status = call(state, &format!("/webhook/{bot_id}"), None, update(1)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn unknown_bot_is_not_found() {
        let (state, _) = test_state().await;
        let status = call(state, "/webhook/999", Some("whsec"), update(1)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn valid_update_is_enqueued_once() {
        let (state, bot_id) = test_state().await;
        let db = state.db.clone();
        let uri = format!("/webhook/{bot_id}");

        // Invariant 1: the same update id delivered twice within the
        // window enqueues exactly one task.
        let status = call(state.clone(), &uri, Some("whsec"), update(1001)).await;
        assert_eq!(status, StatusCode::OK);
        let status = call(state, &uri, Some("whsec"), update(1001)).await;
        assert_eq!(status, StatusCode::OK);

        assert_eq!(queue_db::depth(&db, "default").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn stale_messages_are_absorbed() {
        let (state, bot_id) = test_state().await;
        let db = state.db.clone();
        let old = serde_json::json!({
            "update_id": 7,
            "message": {"date": 500, "from": {"id": 111}, "chat": {"id": 111}, "text": "oi"}
        });
        let status = call(state, &format!("/webhook/{bot_id}"), Some("whsec"), old).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(queue_db::depth(&db, "default").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn manager_webhook_uses_global_secret() {
        let (state, _) = test_state().await;
        let db = state.db.clone();
        assert_eq!(
            call(state.clone(), "/webhook/manager", Some("wrong"), update(1)).await,
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            call(state, "/webhook/manager", Some("mgr-secret"), update(2)).await,
            StatusCode::OK
        );
        assert_eq!(queue_db::depth(&db, "default").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn malformed_body_still_returns_ok() {
        use tower::ServiceExt;
        let (state, bot_id) = test_state().await;
        let app = router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/webhook/{bot_id}"))
                    .header(SECRET_HEADER, "whsec")
                    .body(Body::from("not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn health_reports_ok_with_live_backends() {
        use tower::ServiceExt;
        let (state, _) = test_state().await;
        let app = router(state);
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn gateway_webhook_requires_signature() {
        let (state, _) = test_state().await;
        gateways::upsert(&state.db, 777, vec![1], [0u8; 12]).await.ok();
        let status = call(
            state,
            "/webhook/gateway/777",
            None,
            serde_json::json!({"id": "x", "status": "paid"}),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }
}
