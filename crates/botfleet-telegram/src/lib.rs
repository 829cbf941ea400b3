// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Telegram Bot API wrapper for the botfleet platform.
//!
//! One [`BotApi`] per bot token. Sends escape MarkdownV2 and fall back
//! to plain text on parse errors; media sends accept either a file id
//! hint or raw bytes for re-upload, and report the server-side file id
//! back so the media cache can be populated.

pub mod markdown;
pub mod media;

use botfleet_core::{FleetError, MediaKind};
use teloxide::prelude::*;
use teloxide::types::{ChatAction, ChatId, InputFile, MessageId, ParseMode, Recipient};
use tracing::{debug, warn};

/// A message delivered to Telegram.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub message_id: i32,
    /// Server-side file id of the sent media, when any.
    pub file_id: Option<String>,
}

/// Media payload for a send: a cached/original id, or bytes to upload.
pub enum MediaPayload {
    FileId(String),
    Upload { bytes: Vec<u8>, file_name: String },
}

/// Per-bot Telegram API client.
#[derive(Clone)]
pub struct BotApi {
    bot: Bot,
}

impl BotApi {
    pub fn new(token: &str) -> Result<Self, FleetError> {
        if token.is_empty() {
            return Err(FleetError::Config("telegram bot token cannot be empty".into()));
        }
        Ok(Self {
            bot: Bot::new(token),
        })
    }

    /// Underlying teloxide Bot (file downloads).
    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    /// getMe round-trip; validates the token and reachability.
    pub async fn check(&self) -> Result<String, FleetError> {
        let me = self.bot.get_me().await.map_err(classify)?;
        Ok(me.username().to_string())
    }

    /// Registers the webhook with the per-bot secret token.
    pub async fn set_webhook(&self, url: &str, secret_token: &str) -> Result<(), FleetError> {
        let url = url::Url::parse(url)
            .map_err(|e| FleetError::Validation(format!("invalid webhook url: {e}")))?;
        self.bot
            .set_webhook(url)
            .secret_token(secret_token.to_string())
            .await
            .map_err(classify)?;
        Ok(())
    }

    /// Sends text with MarkdownV2, falling back to plain text when the
    /// escaped form still fails to parse.
    pub async fn send_text(&self, chat_id: i64, text: &str) -> Result<SentMessage, FleetError> {
        let escaped = markdown::format_for_telegram(text);
        match self
            .bot
            .send_message(Recipient::Id(ChatId(chat_id)), &escaped)
            .parse_mode(ParseMode::MarkdownV2)
            .await
        {
            Ok(sent) => Ok(SentMessage {
                message_id: sent.id.0,
                file_id: None,
            }),
            Err(e) if is_parse_error(&e) => {
                warn!(error = %e, "MarkdownV2 failed, sending as plain text");
                let sent = self
                    .bot
                    .send_message(Recipient::Id(ChatId(chat_id)), text)
                    .await
                    .map_err(classify)?;
                Ok(SentMessage {
                    message_id: sent.id.0,
                    file_id: None,
                })
            }
            Err(e) => Err(classify(e)),
        }
    }

    /// Sends one media block. The caption gets the same MarkdownV2
    /// fallback as text messages.
    pub async fn send_media(
        &self,
        chat_id: i64,
        kind: MediaKind,
        payload: MediaPayload,
        caption: Option<&str>,
    ) -> Result<SentMessage, FleetError> {
        let input = match payload {
            MediaPayload::FileId(id) => InputFile::file_id(id),
            MediaPayload::Upload { bytes, file_name } => {
                InputFile::memory(bytes).file_name(file_name)
            }
        };

        let escaped = caption.map(markdown::format_for_telegram);
        match self
            .send_media_once(chat_id, kind, input.clone(), escaped.as_deref(), true)
            .await
        {
            Ok(sent) => Ok(sent),
            Err(e) if caption.is_some() && is_parse_error_fleet(&e) => {
                warn!(error = %e, "caption MarkdownV2 failed, retrying plain");
                self.send_media_once(chat_id, kind, input, caption, false)
                    .await
            }
            Err(e) => Err(e),
        }
    }

    async fn send_media_once(
        &self,
        chat_id: i64,
        kind: MediaKind,
        input: InputFile,
        caption: Option<&str>,
        markdown: bool,
    ) -> Result<SentMessage, FleetError> {
        let recipient = Recipient::Id(ChatId(chat_id));
        let message = match kind {
            MediaKind::Photo => {
                let mut req = self.bot.send_photo(recipient, input);
                if let Some(caption) = caption {
                    req = req.caption(caption.to_string());
                    if markdown {
                        req = req.parse_mode(ParseMode::MarkdownV2);
                    }
                }
                req.await.map_err(classify)?
            }
            MediaKind::Video => {
                let mut req = self.bot.send_video(recipient, input);
                if let Some(caption) = caption {
                    req = req.caption(caption.to_string());
                    if markdown {
                        req = req.parse_mode(ParseMode::MarkdownV2);
                    }
                }
                req.await.map_err(classify)?
            }
            MediaKind::Voice => {
                let mut req = self.bot.send_voice(recipient, input);
                if let Some(caption) = caption {
                    req = req.caption(caption.to_string());
                    if markdown {
                        req = req.parse_mode(ParseMode::MarkdownV2);
                    }
                }
                req.await.map_err(classify)?
            }
            MediaKind::Document => {
                let mut req = self.bot.send_document(recipient, input);
                if let Some(caption) = caption {
                    req = req.caption(caption.to_string());
                    if markdown {
                        req = req.parse_mode(ParseMode::MarkdownV2);
                    }
                }
                req.await.map_err(classify)?
            }
            MediaKind::Animation => {
                let mut req = self.bot.send_animation(recipient, input);
                if let Some(caption) = caption {
                    req = req.caption(caption.to_string());
                    if markdown {
                        req = req.parse_mode(ParseMode::MarkdownV2);
                    }
                }
                req.await.map_err(classify)?
            }
        };

        let file_id = media::extract_file_id(&message, kind);
        debug!(chat_id, kind = %kind, message_id = message.id.0, "media sent");
        Ok(SentMessage {
            message_id: message.id.0,
            file_id,
        })
    }

    /// Deletes a previously sent message (auto-delete blocks).
    pub async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<(), FleetError> {
        self.bot
            .delete_message(Recipient::Id(ChatId(chat_id)), MessageId(message_id))
            .await
            .map_err(classify)?;
        Ok(())
    }

    /// Emits the chat action matching the media kind about to be sent.
    pub async fn send_chat_action(
        &self,
        chat_id: i64,
        kind: Option<MediaKind>,
    ) -> Result<(), FleetError> {
        let action = match kind {
            None => ChatAction::Typing,
            Some(MediaKind::Photo) => ChatAction::UploadPhoto,
            Some(MediaKind::Video) => ChatAction::UploadVideo,
            Some(MediaKind::Voice) => ChatAction::UploadVoice,
            // GIFs travel as documents.
            Some(MediaKind::Document) | Some(MediaKind::Animation) => ChatAction::UploadDocument,
        };
        self.bot
            .send_chat_action(Recipient::Id(ChatId(chat_id)), action)
            .await
            .map_err(classify)?;
        Ok(())
    }

    /// Downloads a file's bytes via getFile + file download.
    pub async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, FleetError> {
        media::download_file(&self.bot, file_id).await
    }
}

/// Maps a teloxide error onto the platform taxonomy.
pub fn classify(e: teloxide::RequestError) -> FleetError {
    match e {
        teloxide::RequestError::RetryAfter(secs) => FleetError::RateLimited {
            retry_after_secs: secs.seconds() as u64,
        },
        teloxide::RequestError::Api(api) => FleetError::PermanentExternal {
            service: "telegram",
            message: api.to_string(),
        },
        other => FleetError::TransientExternal {
            service: "telegram",
            message: other.to_string(),
        },
    }
}

fn is_parse_error(e: &teloxide::RequestError) -> bool {
    e.to_string().contains("can't parse entities")
}

fn is_parse_error_fleet(e: &FleetError) -> bool {
    e.to_string().contains("can't parse entities")
}

/// Whether an error indicates the cached file id went stale.
pub fn is_expired_file_id_error(e: &FleetError) -> bool {
    media::is_expired_file_id_message(&e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_empty_token() {
        assert!(BotApi::new("").is_err());
        assert!(BotApi::new("123456:ABC-DEF1234ghIkl-zyx57W2v1u123ew11").is_ok());
    }

    #[test]
    fn expired_file_id_detection() {
        let err = FleetError::PermanentExternal {
            service: "telegram",
            message: "Bad Request: wrong file identifier/HTTP URL specified".into(),
        };
        assert!(is_expired_file_id_error(&err));

        let other = FleetError::PermanentExternal {
            service: "telegram",
            message: "Bad Request: chat not found".into(),
        };
        assert!(!is_expired_file_id_error(&other));
    }
}
