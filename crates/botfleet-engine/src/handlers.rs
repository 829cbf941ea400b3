// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Task handlers binding the queues to the engine, recovery, payments
//! and notification flows. The binary registers them all at startup.

use std::sync::Arc;

use async_trait::async_trait;
use botfleet_core::{FleetError, UpdateEnvelope};
use botfleet_crypto::callback::DEFAULT_TTL_SECS;
use botfleet_queue::{TaskHandler, TaskRegistry};
use botfleet_recovery::{
    CheckInactivePayload, SendStepPayload, CHECK_INACTIVE_TASK, SEND_RECOVERY_STEP_TASK,
};
use botfleet_sender::{SendContext, DELETE_MESSAGE_TASK};
use botfleet_storage::queries::{bots, notifications, transactions};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::pipeline::{ConversationEngine, ProcessAudioPayload, PROCESS_AUDIO_TASK};
use crate::start::{SendStartPayload, SEND_START_TEMPLATE_TASK};

/// Task name of the secondary-bot update pipeline.
pub const PROCESS_UPDATE_TASK: &str = "process_update";
/// Task name of the manager-bot update pipeline.
pub const PROCESS_MANAGER_UPDATE_TASK: &str = "process_manager_update";

fn parse<T: for<'de> Deserialize<'de>>(payload: Value) -> Result<T, FleetError> {
    serde_json::from_value(payload)
        .map_err(|e| FleetError::Validation(format!("malformed task payload: {e}")))
}

/// Registers every platform task handler.
pub fn register_all(registry: &mut TaskRegistry, engine: Arc<ConversationEngine>) {
    registry.register(Arc::new(ProcessUpdateHandler { engine: engine.clone() }));
    registry.register(Arc::new(ProcessManagerUpdateHandler { engine: engine.clone() }));
    registry.register(Arc::new(ProcessAudioHandler { engine: engine.clone() }));
    registry.register(Arc::new(SendStartTemplateHandler { engine: engine.clone() }));
    registry.register(Arc::new(DeleteMessageHandler { engine: engine.clone() }));
    registry.register(Arc::new(CheckInactiveHandler { engine: engine.clone() }));
    registry.register(Arc::new(SendRecoveryStepHandler { engine: engine.clone() }));
    registry.register(Arc::new(VerifyTransactionHandler { engine: engine.clone() }));
    registry.register(Arc::new(SendSaleNotificationHandler { engine }));
}

#[derive(Deserialize)]
struct ProcessUpdatePayload {
    bot_id: i64,
    update: UpdateEnvelope,
}

struct ProcessUpdateHandler {
    engine: Arc<ConversationEngine>,
}

#[async_trait]
impl TaskHandler for ProcessUpdateHandler {
    fn name(&self) -> &'static str {
        PROCESS_UPDATE_TASK
    }

    async fn run(&self, payload: Value) -> Result<(), FleetError> {
        let payload: ProcessUpdatePayload = parse(payload)?;
        self.engine.process_update(payload.bot_id, payload.update).await
    }
}

#[derive(Deserialize)]
struct ManagerUpdatePayload {
    update: UpdateEnvelope,
}

/// Manager updates: the menu UI lives outside the core; what the core
/// owns is callback-token verification, so expired or forged buttons
/// answer with the standard warning instead of acting.
struct ProcessManagerUpdateHandler {
    engine: Arc<ConversationEngine>,
}

#[async_trait]
impl TaskHandler for ProcessManagerUpdateHandler {
    fn name(&self) -> &'static str {
        PROCESS_MANAGER_UPDATE_TASK
    }

    async fn run(&self, payload: Value) -> Result<(), FleetError> {
        let payload: ManagerUpdatePayload = parse(payload)?;
        let Some(callback) = payload.update.callback_query else {
            debug!("manager update without callback ignored by the core");
            return Ok(());
        };
        let (Some(data), Some(uid)) = (callback.data, callback.from.and_then(|f| f.id)) else {
            return Ok(());
        };

        match self.engine.signer.verify(&data, uid, DEFAULT_TTL_SECS) {
            Ok(token) => {
                info!(action = token.action.as_str(), uid, "manager callback verified");
                Ok(())
            }
            Err(e) => {
                warn!(uid, error = %e, "manager callback rejected");
                if let Some(chat_id) = callback.message.and_then(|m| m.chat.and_then(|c| c.id)) {
                    self.engine
                        .manager_api
                        .send_text(chat_id, "⚠️ Essa ação não é válida mais.")
                        .await
                        .ok();
                }
                Ok(())
            }
        }
    }
}

struct ProcessAudioHandler {
    engine: Arc<ConversationEngine>,
}

#[async_trait]
impl TaskHandler for ProcessAudioHandler {
    fn name(&self) -> &'static str {
        PROCESS_AUDIO_TASK
    }

    async fn run(&self, payload: Value) -> Result<(), FleetError> {
        let payload: ProcessAudioPayload = parse(payload)?;
        self.engine.process_audio(payload).await
    }
}

struct SendStartTemplateHandler {
    engine: Arc<ConversationEngine>,
}

#[async_trait]
impl TaskHandler for SendStartTemplateHandler {
    fn name(&self) -> &'static str {
        SEND_START_TEMPLATE_TASK
    }

    async fn run(&self, payload: Value) -> Result<(), FleetError> {
        let payload: SendStartPayload = parse(payload)?;
        let engine = &self.engine;

        let plan = match engine.start_flow.prepare_send(&payload).await {
            Ok(Some(plan)) => plan,
            Ok(None) => {
                engine.start_flow.abandon_send(&payload).await?;
                return Ok(());
            }
            Err(e) => {
                engine.start_flow.abandon_send(&payload).await?;
                return Err(e);
            }
        };

        let Some(bot) = bots::get_active(&engine.db, payload.bot_id).await? else {
            engine.start_flow.abandon_send(&payload).await?;
            return Ok(());
        };
        let api = engine.bot_api(&bot)?;
        let ctx = SendContext {
            api: &api,
            origin_api: &engine.manager_api,
            bot_id: payload.bot_id,
            chat_id: payload.chat_id,
            pix_code: None,
            preview: false,
        };
        engine.sender.send_blocks(&ctx, &plan).await?;
        engine.start_flow.complete_send(&payload).await?;
        info!(
            bot_id = payload.bot_id,
            user_id = payload.user_telegram_id,
            version = payload.template_version,
            "start template delivered"
        );
        Ok(())
    }
}

#[derive(Deserialize)]
struct DeleteMessagePayload {
    bot_id: i64,
    chat_id: i64,
    message_id: i64,
}

struct DeleteMessageHandler {
    engine: Arc<ConversationEngine>,
}

#[async_trait]
impl TaskHandler for DeleteMessageHandler {
    fn name(&self) -> &'static str {
        DELETE_MESSAGE_TASK
    }

    async fn run(&self, payload: Value) -> Result<(), FleetError> {
        let payload: DeleteMessagePayload = parse(payload)?;
        let Some(bot) = bots::get_active(&self.engine.db, payload.bot_id).await? else {
            return Ok(());
        };
        let api = self.engine.bot_api(&bot)?;
        match api
            .delete_message(payload.chat_id, payload.message_id as i32)
            .await
        {
            Ok(()) => Ok(()),
            // Already gone (user deleted it, or a retried task).
            Err(e) if e.to_string().contains("message to delete not found") => Ok(()),
            Err(e) => Err(e),
        }
    }
}

struct CheckInactiveHandler {
    engine: Arc<ConversationEngine>,
}

#[async_trait]
impl TaskHandler for CheckInactiveHandler {
    fn name(&self) -> &'static str {
        CHECK_INACTIVE_TASK
    }

    async fn run(&self, payload: Value) -> Result<(), FleetError> {
        let payload: CheckInactivePayload = parse(payload)?;
        self.engine.recovery.handle_check_inactive(payload).await
    }
}

struct SendRecoveryStepHandler {
    engine: Arc<ConversationEngine>,
}

#[async_trait]
impl TaskHandler for SendRecoveryStepHandler {
    fn name(&self) -> &'static str {
        SEND_RECOVERY_STEP_TASK
    }

    async fn run(&self, payload: Value) -> Result<(), FleetError> {
        let payload: SendStepPayload = parse(payload)?;
        let engine = &self.engine;

        let Some(plan) = engine.recovery.prepare_step(&payload).await? else {
            return Ok(());
        };
        let Some(bot) = bots::get_active(&engine.db, payload.bot_id).await? else {
            return Ok(());
        };
        let api = engine.bot_api(&bot)?;
        let ctx = SendContext {
            api: &api,
            origin_api: &engine.manager_api,
            bot_id: payload.bot_id,
            chat_id: payload.user_telegram_id,
            pix_code: None,
            preview: false,
        };
        engine.sender.send_blocks(&ctx, &plan.blocks).await?;
        engine.recovery.complete_step(&payload, &plan).await?;
        Ok(())
    }
}

struct VerifyTransactionHandler {
    engine: Arc<ConversationEngine>,
}

#[async_trait]
impl TaskHandler for VerifyTransactionHandler {
    fn name(&self) -> &'static str {
        botfleet_payments::VERIFY_TRANSACTION_TASK
    }

    async fn run(&self, payload: Value) -> Result<(), FleetError> {
        #[derive(Deserialize)]
        struct Payload {
            transaction_id: i64,
        }
        let payload: Payload = parse(payload)?;
        self.engine
            .payments
            .verify_transaction(payload.transaction_id)
            .await
    }
}

struct SendSaleNotificationHandler {
    engine: Arc<ConversationEngine>,
}

#[async_trait]
impl TaskHandler for SendSaleNotificationHandler {
    fn name(&self) -> &'static str {
        botfleet_payments::SEND_SALE_NOTIFICATION_TASK
    }

    async fn run(&self, payload: Value) -> Result<(), FleetError> {
        #[derive(Deserialize)]
        struct Payload {
            transaction_id: i64,
        }
        let payload: Payload = parse(payload)?;
        let engine = &self.engine;

        let Some(row) = notifications::get(&engine.db, payload.transaction_id).await? else {
            return Ok(());
        };
        if row.status != "pending" {
            return Ok(());
        }
        let Some(channel_id) = row.channel_id else {
            notifications::set_status(&engine.db, payload.transaction_id, "skipped").await?;
            return Ok(());
        };
        let Some(tx) = transactions::get(&engine.db, payload.transaction_id).await? else {
            return Ok(());
        };

        let text = render_sale_notification(tx.amount_cents, &tx.category.to_string(), tx.bot_id);
        match engine.manager_api.send_text(channel_id, &text).await {
            Ok(_) => {
                notifications::set_status(&engine.db, payload.transaction_id, "sent").await?;
                Ok(())
            }
            Err(e) => {
                notifications::set_status(&engine.db, payload.transaction_id, "failed").await?;
                Err(e)
            }
        }
    }
}

/// Channel notification body for an approved sale.
fn render_sale_notification(amount_cents: i64, category: &str, bot_id: i64) -> String {
    let reais = amount_cents / 100;
    let centavos = amount_cents % 100;
    format!(
        "💰 Venda aprovada!\nValor: R$ {reais},{centavos:02}\nOrigem: {category}\nBot: #{bot_id}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_rendering_formats_cents() {
        let text = render_sale_notification(790, "offer", 42);
        assert!(text.contains("R$ 7,90"), "got: {text}");
        assert!(text.contains("#42"));

        let text = render_sale_notification(10_000, "upsell", 7);
        assert!(text.contains("R$ 100,00"), "got: {text}");
    }
}
