// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transaction creation and verification.

use std::sync::Arc;

use botfleet_config::model::PaymentsConfig;
use botfleet_core::{CircuitBreaker, FleetError};
use botfleet_crypto::TokenCipher;
use botfleet_kv::{keys, KvStore, LockManager};
use botfleet_pix::{GatewayStatus, PixGateway};
use botfleet_queue::{EnqueueOptions, QueueName, TaskQueue};
use botfleet_storage::queries::{gateways, transactions};
use botfleet_storage::{Database, NewTransaction, PixCategory, PixStatus, PixTransaction};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::fanout::FanoutDeps;

/// Task name of one verification poll.
pub const VERIFY_TRANSACTION_TASK: &str = "verify_transaction";

/// Payment window before a charge expires, minutes.
const PAYMENT_WINDOW_MINUTES: i64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyTransactionPayload {
    pub transaction_id: i64,
}

/// Payments orchestration: charge creation, polling and the paid
/// transition into the fan-out.
pub struct PaymentsService {
    db: Database,
    kv: Arc<dyn KvStore>,
    locks: LockManager,
    tasks: TaskQueue,
    gateway: PixGateway,
    gateway_breaker: Arc<CircuitBreaker>,
    cipher: TokenCipher,
    config: PaymentsConfig,
    fanout: FanoutDeps,
}

impl PaymentsService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Database,
        kv: Arc<dyn KvStore>,
        tasks: TaskQueue,
        gateway: PixGateway,
        gateway_breaker: Arc<CircuitBreaker>,
        cipher: TokenCipher,
        config: PaymentsConfig,
        fanout: FanoutDeps,
    ) -> Self {
        Self {
            locks: LockManager::new(kv.clone()),
            db,
            kv,
            tasks,
            gateway,
            gateway_breaker,
            cipher,
            config,
            fanout,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// The admin's gateway token, decrypted on demand.
    async fn gateway_token(&self, admin_id: i64) -> Result<String, FleetError> {
        let (cipher, nonce) = gateways::get(&self.db, admin_id)
            .await?
            .ok_or_else(|| FleetError::Validation("admin has no gateway configured".into()))?;
        self.cipher.open_token(&cipher, &nonce)
    }

    async fn gateway_call<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, FleetError>>,
    ) -> Result<T, FleetError> {
        self.gateway_breaker.acquire()?;
        match fut.await {
            Ok(value) => {
                self.gateway_breaker.record_success();
                Ok(value)
            }
            Err(e) => {
                if matches!(
                    e,
                    FleetError::TransientExternal { .. } | FleetError::Timeout { .. }
                ) {
                    self.gateway_breaker.record_failure();
                    botfleet_metrics::record_external_error("gateway");
                }
                Err(e)
            }
        }
    }

    /// Creates a charge for an offer (or a discounted amount) and
    /// schedules its verification chain.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_charge(
        &self,
        admin_id: i64,
        bot_id: i64,
        user_telegram_id: i64,
        chat_id: i64,
        offer_id: Option<i64>,
        upsell_id: Option<i64>,
        tracker_id: Option<i64>,
        category: PixCategory,
        amount_cents: i64,
    ) -> Result<PixTransaction, FleetError> {
        let token = match category {
            PixCategory::Topup => {
                if self.config.topup_token.is_empty() {
                    return Err(FleetError::Config("payments.topup_token is not set".into()));
                }
                self.config.topup_token.clone()
            }
            _ => self.gateway_token(admin_id).await?,
        };

        let charge = self
            .gateway_call(self.gateway.create_charge(&token, amount_cents, None))
            .await?;

        let id = transactions::create(
            &self.db,
            NewTransaction {
                bot_id,
                user_telegram_id,
                chat_id,
                offer_id,
                upsell_id,
                tracker_id,
                category,
                external_id: charge.external_id,
                qr_code: charge.qr_code,
                amount_cents,
            },
        )
        .await?;
        transactions::set_status(&self.db, id, PixStatus::Pending).await?;

        self.schedule_verification(id).await?;

        let tx = transactions::get(&self.db, id)
            .await?
            .ok_or_else(|| FleetError::Internal(format!("transaction {id} vanished")))?;
        info!(
            transaction_id = id,
            bot_id, amount_cents, category = %tx.category, "pix charge recorded"
        );
        Ok(tx)
    }

    /// Arms the polling chain for a fresh transaction.
    pub async fn schedule_verification(&self, transaction_id: i64) -> Result<(), FleetError> {
        let payload = serde_json::to_value(VerifyTransactionPayload { transaction_id })
            .map_err(|e| FleetError::Internal(e.to_string()))?;
        self.tasks
            .enqueue_in(
                QueueName::Scheduler,
                VERIFY_TRANSACTION_TASK,
                payload,
                self.config.poll_interval_secs.clamp(30, 60),
                EnqueueOptions {
                    idempotency_key: Some(format!("verify:{transaction_id}:first")),
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    /// One verification pass over a transaction; re-arms itself while
    /// the payment window is open.
    pub async fn verify_transaction(&self, transaction_id: i64) -> Result<(), FleetError> {
        let Some(tx) = transactions::get(&self.db, transaction_id).await? else {
            return Ok(());
        };
        if tx.status.is_terminal() {
            return Ok(());
        }
        if tx.status == PixStatus::Paid {
            // Paid but not delivered: re-drive the fan-out.
            return self.handle_paid(&tx).await;
        }

        let age_minutes = transaction_age_minutes(&tx);
        if age_minutes > PAYMENT_WINDOW_MINUTES {
            transactions::set_status(&self.db, tx.id, PixStatus::Expired).await?;
            info!(transaction_id = tx.id, "pix charge expired");
            return Ok(());
        }

        // One gateway poll per admin per minute.
        let bot = botfleet_storage::queries::bots::get(&self.db, tx.bot_id)
            .await?
            .ok_or_else(|| FleetError::Consistency(format!("bot {} missing", tx.bot_id)))?;
        let poll_gate = self
            .kv
            .set_nx(&keys::lock(&format!("gwpoll:{}", bot.admin_id)), "1", 60)
            .await?;
        if !poll_gate {
            debug!(transaction_id = tx.id, "gateway poll gated, retrying later");
            self.requeue_verification(tx.id).await?;
            return Ok(());
        }

        let token = match tx.category {
            PixCategory::Topup => self.config.topup_token.clone(),
            _ => self.gateway_token(bot.admin_id).await?,
        };
        let status = self
            .gateway_call(self.gateway.charge_status(&token, &tx.external_id))
            .await?;

        match status {
            GatewayStatus::Paid => {
                transactions::set_status(&self.db, tx.id, PixStatus::Paid).await?;
                let tx = transactions::get(&self.db, tx.id)
                    .await?
                    .ok_or_else(|| FleetError::Internal("transaction vanished".into()))?;
                self.handle_paid(&tx).await?;
            }
            GatewayStatus::Expired => {
                transactions::set_status(&self.db, tx.id, PixStatus::Expired).await?;
            }
            GatewayStatus::Created | GatewayStatus::Unknown => {
                self.requeue_verification(tx.id).await?;
            }
        }
        Ok(())
    }

    async fn requeue_verification(&self, transaction_id: i64) -> Result<(), FleetError> {
        let payload = serde_json::to_value(VerifyTransactionPayload { transaction_id })
            .map_err(|e| FleetError::Internal(e.to_string()))?;
        self.tasks
            .enqueue_in(
                QueueName::Scheduler,
                VERIFY_TRANSACTION_TASK,
                payload,
                self.config.poll_interval_secs.clamp(30, 60),
                EnqueueOptions::default(),
            )
            .await?;
        Ok(())
    }

    /// Entry point for gateway webhook callbacks (signature already
    /// verified at ingress).
    pub async fn handle_webhook_paid(&self, external_id: &str) -> Result<(), FleetError> {
        let Some(tx) = transactions::get_by_external(&self.db, external_id).await? else {
            warn!(external_id, "webhook for unknown transaction");
            return Ok(());
        };
        if tx.status.is_terminal() {
            return Ok(());
        }
        if tx.status != PixStatus::Paid {
            transactions::set_status(&self.db, tx.id, PixStatus::Paid).await?;
        }
        let tx = transactions::get(&self.db, tx.id)
            .await?
            .ok_or_else(|| FleetError::Internal("transaction vanished".into()))?;
        self.handle_paid(&tx).await
    }

    /// Manual verification path: polls the gateway now; when paid,
    /// funnels into the same fan-out. Returns whether payment was found.
    pub async fn verify_now(&self, transaction_id: i64) -> Result<bool, FleetError> {
        let Some(tx) = transactions::get(&self.db, transaction_id).await? else {
            return Ok(false);
        };
        match tx.status {
            PixStatus::Paid | PixStatus::Delivered => {
                if tx.status == PixStatus::Paid {
                    self.handle_paid(&tx).await?;
                }
                return Ok(true);
            }
            s if s.is_terminal() => return Ok(false),
            _ => {}
        }

        let bot = botfleet_storage::queries::bots::get(&self.db, tx.bot_id)
            .await?
            .ok_or_else(|| FleetError::Consistency(format!("bot {} missing", tx.bot_id)))?;
        let token = self.gateway_token(bot.admin_id).await?;
        let status = self
            .gateway_call(self.gateway.charge_status(&token, &tx.external_id))
            .await?;
        if status == GatewayStatus::Paid {
            transactions::set_status(&self.db, tx.id, PixStatus::Paid).await?;
            let tx = transactions::get(&self.db, tx.id)
                .await?
                .ok_or_else(|| FleetError::Internal("transaction vanished".into()))?;
            self.handle_paid(&tx).await?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Paid transition: serialize per transaction and run the fan-out.
    pub async fn handle_paid(&self, tx: &PixTransaction) -> Result<(), FleetError> {
        let lock_name = format!("sale:{}", tx.id);
        let Some(lock) = self
            .locks
            .try_acquire(&lock_name, crate::fanout::SALE_LOCK_TTL_SECS)
            .await?
        else {
            debug!(transaction_id = tx.id, "sale fan-out already in progress");
            return Ok(());
        };

        let result = crate::fanout::handle_sale_approved(
            &self.db,
            &self.tasks,
            &self.cipher,
            &self.config,
            &self.fanout,
            tx,
        )
        .await;

        self.locks.release(lock).await?;
        result
    }

    /// Periodic sweep: re-verifies every pending transaction and
    /// expires the stale ones.
    pub async fn sweep_pending(&self) -> Result<(), FleetError> {
        let expired = transactions::expire_older_than(&self.db, PAYMENT_WINDOW_MINUTES).await?;
        if expired > 0 {
            info!(expired, "expired stale pix charges");
        }
        for tx in transactions::pending_for_verification(&self.db, PAYMENT_WINDOW_MINUTES).await? {
            self.requeue_verification(tx.id).await?;
        }
        Ok(())
    }
}

fn transaction_age_minutes(tx: &PixTransaction) -> i64 {
    chrono::DateTime::parse_from_rfc3339(&tx.created_at)
        .map(|created| (chrono::Utc::now() - created.with_timezone(&chrono::Utc)).num_minutes())
        .unwrap_or(i64::MAX)
}
