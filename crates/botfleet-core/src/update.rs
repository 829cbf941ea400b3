// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Minimal view of a Telegram update.
//!
//! Ingress parses only what routing needs (update id, chat/user id,
//! message kind) and forwards the full JSON body to the queue; workers
//! re-parse with this same envelope. Unknown fields are ignored on
//! purpose.

use serde::{Deserialize, Serialize};

/// The fields of an update the platform actually routes on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateEnvelope {
    #[serde(default)]
    pub update_id: Option<i64>,
    #[serde(default)]
    pub message: Option<MessageEnvelope>,
    #[serde(default)]
    pub callback_query: Option<CallbackEnvelope>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageEnvelope {
    #[serde(default)]
    pub message_id: Option<i64>,
    /// Unix seconds; updates predating process start are dropped.
    #[serde(default)]
    pub date: Option<i64>,
    #[serde(default)]
    pub from: Option<PeerEnvelope>,
    #[serde(default)]
    pub chat: Option<PeerEnvelope>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub photo: Vec<PhotoEnvelope>,
    #[serde(default)]
    pub voice: Option<VoiceEnvelope>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeerEnvelope {
    #[serde(default)]
    pub id: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhotoEnvelope {
    pub file_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoiceEnvelope {
    pub file_id: String,
    #[serde(default)]
    pub duration: u32,
    #[serde(default)]
    pub file_size: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallbackEnvelope {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub from: Option<PeerEnvelope>,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub message: Option<MessageEnvelope>,
}

impl UpdateEnvelope {
    /// Sender id of the message or callback, when any.
    pub fn user_id(&self) -> Option<i64> {
        self.message
            .as_ref()
            .and_then(|m| m.from.as_ref())
            .and_then(|f| f.id)
            .or_else(|| {
                self.callback_query
                    .as_ref()
                    .and_then(|c| c.from.as_ref())
                    .and_then(|f| f.id)
            })
    }

    /// Chat the reply should target; falls back to the sender id (DMs).
    pub fn chat_id(&self) -> Option<i64> {
        self.message
            .as_ref()
            .and_then(|m| m.chat.as_ref())
            .and_then(|c| c.id)
            .or_else(|| self.user_id())
    }

    /// Message date, unix seconds.
    pub fn message_date(&self) -> Option<i64> {
        self.message.as_ref().and_then(|m| m.date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_real_update_shape() {
        let raw = serde_json::json!({
            "update_id": 1001,
            "message": {
                "message_id": 5,
                "date": 1_700_000_000,
                "from": {"id": 111, "is_bot": false, "first_name": "Ana"},
                "chat": {"id": 111, "type": "private"},
                "text": "/start abc12345",
                "entities": [{"type": "bot_command", "offset": 0, "length": 6}]
            }
        });
        let update: UpdateEnvelope = serde_json::from_value(raw).unwrap();
        assert_eq!(update.update_id, Some(1001));
        assert_eq!(update.user_id(), Some(111));
        assert_eq!(update.chat_id(), Some(111));
        assert_eq!(update.message_date(), Some(1_700_000_000));
        assert_eq!(
            update.message.unwrap().text.as_deref(),
            Some("/start abc12345")
        );
    }

    #[test]
    fn voice_and_photo_fields_survive() {
        let raw = serde_json::json!({
            "update_id": 7,
            "message": {
                "date": 1_700_000_000,
                "from": {"id": 111},
                "chat": {"id": 111},
                "photo": [
                    {"file_id": "small", "width": 90, "height": 90},
                    {"file_id": "large", "width": 800, "height": 800}
                ],
                "voice": {"file_id": "v1", "duration": 12, "mime_type": "audio/ogg"}
            }
        });
        let update: UpdateEnvelope = serde_json::from_value(raw).unwrap();
        let message = update.message.unwrap();
        assert_eq!(message.photo.len(), 2);
        assert_eq!(message.photo[1].file_id, "large");
        assert_eq!(message.voice.unwrap().duration, 12);
    }

    #[test]
    fn callback_sender_is_routable() {
        let raw = serde_json::json!({
            "update_id": 8,
            "callback_query": {
                "id": "cbq",
                "from": {"id": 777},
                "data": "signed-token"
            }
        });
        let update: UpdateEnvelope = serde_json::from_value(raw).unwrap();
        assert_eq!(update.user_id(), Some(777));
    }

    #[test]
    fn garbage_still_parses_to_empty_envelope() {
        let update: UpdateEnvelope = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(update.update_id.is_none());
        assert!(update.user_id().is_none());
    }
}
