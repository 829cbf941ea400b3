// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Block sender: ordered delivery of content blocks to one chat.
//!
//! Blocks are sent strictly in position order, never in parallel. Media
//! is resolved through the per-bot cache, streamed from the origin bot
//! on a miss or an expired identifier, and the new id is cached for the
//! next send. Auto-delete is owned by the scheduler queue, never by a
//! detached in-process timer.

pub mod render;

use std::time::Duration;

use botfleet_config::model::SenderConfig;
use botfleet_core::{Block, FleetError, MediaKind};
use botfleet_queue::{task::EnqueueOptions, QueueName, TaskQueue};
use botfleet_storage::queries::media_cache;
use botfleet_storage::Database;
use botfleet_telegram::{is_expired_file_id_error, media, BotApi, MediaPayload, SentMessage};
use tracing::{debug, info, warn};

pub use render::{render_pix, split_reply, typing_delay_secs, PREVIEW_PIX_CODE};

/// Task name consumed by the scheduler queue for deferred deletes.
pub const DELETE_MESSAGE_TASK: &str = "delete_message";

/// Destination and mode of one block sequence send.
pub struct SendContext<'a> {
    /// Bot delivering the blocks.
    pub api: &'a BotApi,
    /// Origin bot holding the original media (manager bot).
    pub origin_api: &'a BotApi,
    pub bot_id: i64,
    pub chat_id: i64,
    /// PIX code substituted into `{pix}` placeholders.
    pub pix_code: Option<&'a str>,
    /// Admin dry-run: no cache writes, no auto-delete scheduling.
    pub preview: bool,
}

/// Sequenced block delivery over one bot connection.
pub struct BlockSender {
    db: Database,
    tasks: TaskQueue,
    config: SenderConfig,
}

impl BlockSender {
    pub fn new(db: Database, tasks: TaskQueue, config: SenderConfig) -> Self {
        Self { db, tasks, config }
    }

    /// Sends blocks in order; returns the delivered message ids.
    pub async fn send_blocks(
        &self,
        ctx: &SendContext<'_>,
        blocks: &[Block],
    ) -> Result<Vec<i32>, FleetError> {
        let mut message_ids = Vec::with_capacity(blocks.len());
        for block in blocks {
            let sent = self.send_block(ctx, block).await?;
            if block.auto_delete_seconds > 0 && !ctx.preview {
                self.schedule_delete(ctx, sent.message_id, block.auto_delete_seconds)
                    .await?;
            }
            message_ids.push(sent.message_id);
        }
        debug!(
            bot_id = ctx.bot_id,
            chat_id = ctx.chat_id,
            count = message_ids.len(),
            preview = ctx.preview,
            "block sequence delivered"
        );
        Ok(message_ids)
    }

    /// Sends a bare text reply (LLM output) with the typing heuristic,
    /// splitting on `|` into sequential messages.
    pub async fn send_reply(
        &self,
        ctx: &SendContext<'_>,
        text: &str,
    ) -> Result<Vec<i32>, FleetError> {
        let mut message_ids = Vec::new();
        for part in split_reply(text) {
            ctx.api.send_chat_action(ctx.chat_id, None).await.ok();
            let delay = typing_delay_secs(&part, &self.config);
            tokio::time::sleep(Duration::from_secs_f64(delay)).await;
            let sent = ctx.api.send_text(ctx.chat_id, &part).await?;
            message_ids.push(sent.message_id);
        }
        Ok(message_ids)
    }

    async fn send_block(
        &self,
        ctx: &SendContext<'_>,
        block: &Block,
    ) -> Result<SentMessage, FleetError> {
        if block.delay_seconds > 0 {
            tokio::time::sleep(Duration::from_secs(block.delay_seconds.into())).await;
        }

        // Typing/upload indicator matching what is about to arrive.
        ctx.api
            .send_chat_action(ctx.chat_id, block.media_kind)
            .await
            .ok();

        let text = block
            .text
            .as_deref()
            .map(|t| render_pix(t, ctx.pix_code, ctx.preview));

        match (&block.media_file_id, block.media_kind) {
            (Some(original_id), Some(kind)) => {
                self.send_media_resolving(ctx, kind, original_id, text.as_deref())
                    .await
            }
            _ => {
                let text = text.unwrap_or_default();
                if block.delay_seconds == 0 {
                    let delay = typing_delay_secs(&text, &self.config);
                    tokio::time::sleep(Duration::from_secs_f64(delay)).await;
                }
                ctx.api.send_text(ctx.chat_id, &text).await
            }
        }
    }

    /// Sends media through the cache with one re-resolution attempt.
    ///
    /// Cache hit -> send by cached id; an "expired identifier" error
    /// invalidates the entry and falls through to the streaming path.
    /// Cache miss (or preview) -> download from the origin bot, upload,
    /// and store the returned id.
    async fn send_media_resolving(
        &self,
        ctx: &SendContext<'_>,
        kind: MediaKind,
        original_id: &str,
        caption: Option<&str>,
    ) -> Result<SentMessage, FleetError> {
        if !ctx.preview {
            if let Some(cached_id) = media_cache::lookup(&self.db, ctx.bot_id, original_id).await? {
                match ctx
                    .api
                    .send_media(
                        ctx.chat_id,
                        kind,
                        MediaPayload::FileId(cached_id.clone()),
                        caption,
                    )
                    .await
                {
                    Ok(sent) => return Ok(sent),
                    Err(e) if is_expired_file_id_error(&e) => {
                        warn!(
                            bot_id = ctx.bot_id,
                            original_id, "cached file id expired, re-resolving"
                        );
                        media_cache::invalidate(&self.db, ctx.bot_id, original_id).await?;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        // Stream: fetch the bytes from the origin bot and re-upload.
        let bytes = ctx.origin_api.download_file(original_id).await?;
        let sent = ctx
            .api
            .send_media(
                ctx.chat_id,
                kind,
                MediaPayload::Upload {
                    bytes,
                    file_name: media::upload_file_name(kind).to_string(),
                },
                caption,
            )
            .await?;

        if !ctx.preview {
            if let Some(new_id) = &sent.file_id {
                media_cache::store(&self.db, ctx.bot_id, original_id, new_id, &kind.to_string())
                    .await?;
                info!(bot_id = ctx.bot_id, original_id, "media cache repopulated");
            }
        }
        Ok(sent)
    }

    async fn schedule_delete(
        &self,
        ctx: &SendContext<'_>,
        message_id: i32,
        after_secs: u32,
    ) -> Result<(), FleetError> {
        self.tasks
            .enqueue_in(
                QueueName::Scheduler,
                DELETE_MESSAGE_TASK,
                serde_json::json!({
                    "bot_id": ctx.bot_id,
                    "chat_id": ctx.chat_id,
                    "message_id": message_id,
                }),
                after_secs.into(),
                EnqueueOptions::default(),
            )
            .await?;
        Ok(())
    }
}
