// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Debug commands inside secondary bots.
//!
//! Available to the bot owner (and allowlisted admins) only:
//! `/venda_aprovada` simulates a paid transaction, `/debug_help` lists
//! the commands, and `/<offer-or-action-name>` previews its block
//! sequence without touching caches, charges or ledgers.

use botfleet_core::{ContainerKind, ContainerRef, FleetError};
use botfleet_sender::SendContext;
use botfleet_storage::queries::{actions, blocks, offers, transactions};
use botfleet_storage::{Bot, PixStatus};
use tracing::info;

use crate::pipeline::ConversationEngine;

/// Routes a debug command. Returns true when the message was handled
/// and the AI path must not run.
pub async fn handle_debug_command(
    engine: &ConversationEngine,
    bot: &Bot,
    user_id: i64,
    chat_id: i64,
    text: &str,
) -> Result<bool, FleetError> {
    let command = text.trim_start_matches('/').trim();
    if command.is_empty() || command.starts_with("start") {
        return Ok(false);
    }

    // Debug surface is owner-only.
    let authorized = user_id == bot.admin_id || engine.credits.is_unlimited(user_id);
    if !authorized {
        return Ok(false);
    }

    let api = engine.bot_api(bot)?;

    match command {
        "venda_aprovada" => {
            let reply = match transactions::latest_pending_for_user(&engine.db, bot.id, user_id)
                .await?
            {
                Some(tx) => {
                    transactions::set_status(&engine.db, tx.id, PixStatus::Paid).await?;
                    let paid = transactions::get(&engine.db, tx.id)
                        .await?
                        .ok_or_else(|| FleetError::Internal("transaction vanished".into()))?;
                    engine.payments.handle_paid(&paid).await?;
                    info!(bot_id = bot.id, transaction_id = tx.id, "sale approval simulated");
                    format!("✅ Venda aprovada simulada para a transação {}.", tx.id)
                }
                None => "⚠️ Nenhuma transação pendente para simular.".to_string(),
            };
            api.send_text(chat_id, &reply).await?;
            Ok(true)
        }
        "debug_help" => {
            api.send_text(
                chat_id,
                "Comandos de debug:\n\
                 /venda_aprovada — simula o pagamento da última transação pendente\n\
                 /<nome da oferta> — prévia do pitch\n\
                 /<nome da ação> — prévia dos blocos da ação",
            )
            .await?;
            Ok(true)
        }
        name => {
            if let Some(offer) = offers::get_by_name(&engine.db, bot.id, name).await? {
                preview(engine, bot, chat_id, ContainerRef::new(ContainerKind::OfferPitch, offer.id))
                    .await?;
                return Ok(true);
            }
            if let Some(action) = actions::get_by_name(&engine.db, bot.id, name).await? {
                preview(engine, bot, chat_id, ContainerRef::new(ContainerKind::Action, action.id))
                    .await?;
                return Ok(true);
            }
            Ok(false)
        }
    }
}

/// Sends a container's blocks in preview mode (no cache writes, no
/// ledger effects, `{pix}` renders the preview code).
async fn preview(
    engine: &ConversationEngine,
    bot: &Bot,
    chat_id: i64,
    container: ContainerRef,
) -> Result<(), FleetError> {
    let preview_blocks = blocks::list(&engine.db, container).await?;
    let api = engine.bot_api(bot)?;
    if preview_blocks.is_empty() {
        api.send_text(chat_id, "⚠️ Nenhum bloco configurado.").await?;
        return Ok(());
    }
    let ctx = SendContext {
        api: &api,
        origin_api: &engine.manager_api,
        bot_id: bot.id,
        chat_id,
        pix_code: None,
        preview: true,
    };
    engine.sender.send_blocks(&ctx, &preview_blocks).await?;
    Ok(())
}
