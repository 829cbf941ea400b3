// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared domain types used across crate boundaries.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Database id of a registered secondary bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BotId(pub i64);

impl std::fmt::Display for BotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Telegram user id (also used as the DM chat id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TelegramUserId(pub i64);

impl std::fmt::Display for TelegramUserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Media kind carried by a content block.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Video,
    Voice,
    Document,
    Animation,
}

/// Container owning an ordered block sequence.
///
/// Blocks from heterogeneous owners live in one table behind this
/// discriminator instead of a table per owner.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ContainerKind {
    StartTemplate,
    OfferPitch,
    OfferDeliverable,
    OfferManualVerification,
    OfferDiscount,
    Action,
    UpsellAnnouncement,
    UpsellDeliverable,
    RecoveryStep,
}

/// Fully-qualified reference to a block container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerRef {
    pub kind: ContainerKind,
    pub id: i64,
}

impl ContainerRef {
    pub fn new(kind: ContainerKind, id: i64) -> Self {
        Self { kind, id }
    }
}

/// One ordered content fragment of a container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub id: i64,
    pub container: ContainerRef,
    /// 1-based position within the container; contiguous after deletes.
    pub position: i32,
    /// Text body or media caption.
    pub text: Option<String>,
    /// Telegram file id, treated as a hint (re-resolved on failure).
    pub media_file_id: Option<String>,
    pub media_kind: Option<MediaKind>,
    /// Pre-send delay, clamped to 0..=300.
    pub delay_seconds: u32,
    /// 0 disables auto-delete; otherwise clamped to 0..=86400.
    pub auto_delete_seconds: u32,
}

impl Block {
    /// Upper bound accepted for `delay_seconds`.
    pub const MAX_DELAY_SECONDS: u32 = 300;
    /// Upper bound accepted for `auto_delete_seconds`.
    pub const MAX_AUTO_DELETE_SECONDS: u32 = 86_400;

    /// Validates the per-block ranges and the text/media presence rule.
    pub fn validate(&self) -> Result<(), crate::FleetError> {
        if self.delay_seconds > Self::MAX_DELAY_SECONDS {
            return Err(crate::FleetError::Validation(format!(
                "delay_seconds {} above maximum {}",
                self.delay_seconds,
                Self::MAX_DELAY_SECONDS
            )));
        }
        if self.auto_delete_seconds > Self::MAX_AUTO_DELETE_SECONDS {
            return Err(crate::FleetError::Validation(format!(
                "auto_delete_seconds {} above maximum {}",
                self.auto_delete_seconds,
                Self::MAX_AUTO_DELETE_SECONDS
            )));
        }
        if self.text.is_none() && self.media_file_id.is_none() {
            return Err(crate::FleetError::Validation(
                "block needs text or media".into(),
            ));
        }
        if self.media_file_id.is_some() && self.media_kind.is_none() {
            return Err(crate::FleetError::Validation(
                "media block needs a media kind".into(),
            ));
        }
        Ok(())
    }
}

/// Token usage reported by the LLM provider for one call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub cached_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn text_block(delay: u32, auto_delete: u32) -> Block {
        Block {
            id: 1,
            container: ContainerRef::new(ContainerKind::OfferPitch, 7),
            position: 1,
            text: Some("hello".into()),
            media_file_id: None,
            media_kind: None,
            delay_seconds: delay,
            auto_delete_seconds: auto_delete,
        }
    }

    #[test]
    fn container_kind_round_trips_through_strings() {
        for kind in [
            ContainerKind::StartTemplate,
            ContainerKind::OfferPitch,
            ContainerKind::OfferDeliverable,
            ContainerKind::OfferManualVerification,
            ContainerKind::OfferDiscount,
            ContainerKind::Action,
            ContainerKind::UpsellAnnouncement,
            ContainerKind::UpsellDeliverable,
            ContainerKind::RecoveryStep,
        ] {
            let s = kind.to_string();
            assert_eq!(ContainerKind::from_str(&s).unwrap(), kind);
        }
    }

    #[test]
    fn media_kind_is_snake_case() {
        assert_eq!(MediaKind::Photo.to_string(), "photo");
        assert_eq!(MediaKind::from_str("animation").unwrap(), MediaKind::Animation);
    }

    #[test]
    fn block_validation_enforces_ranges() {
        assert!(text_block(0, 0).validate().is_ok());
        assert!(text_block(300, 86_400).validate().is_ok());
        assert!(text_block(301, 0).validate().is_err());
        assert!(text_block(0, 86_401).validate().is_err());
    }

    #[test]
    fn block_validation_requires_content() {
        let mut block = text_block(0, 0);
        block.text = None;
        assert!(block.validate().is_err());

        block.media_file_id = Some("AgACAgEAAx".into());
        // Media without a declared kind is rejected.
        assert!(block.validate().is_err());
        block.media_kind = Some(MediaKind::Photo);
        assert!(block.validate().is_ok());
    }
}
