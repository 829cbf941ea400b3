// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain model types mirroring the SQLite rows.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// A registered secondary bot. The token is encrypted at rest and only
/// decrypted inside workers.
#[derive(Debug, Clone)]
pub struct Bot {
    pub id: i64,
    pub admin_id: i64,
    pub token_cipher: Vec<u8>,
    pub token_nonce: [u8; 12],
    pub username: Option<String>,
    pub webhook_secret: String,
    pub associated_offer_id: Option<i64>,
    pub is_active: bool,
}

/// An end user of one secondary bot.
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub bot_id: i64,
    pub telegram_id: i64,
    pub first_interaction: String,
    pub last_interaction: Option<String>,
}

/// Per-bot LLM behavior settings.
#[derive(Debug, Clone)]
pub struct AiConfig {
    pub bot_id: i64,
    pub general_prompt: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub is_enabled: bool,
}

/// A named prompt phase; `trigger_term` is NULL for the general phase.
#[derive(Debug, Clone)]
pub struct Phase {
    pub id: i64,
    pub bot_id: i64,
    pub name: String,
    pub prompt: String,
    pub trigger_term: Option<String>,
    pub ordering: i64,
}

/// Conversation session for one (bot, user).
#[derive(Debug, Clone)]
pub struct Session {
    pub id: i64,
    pub bot_id: i64,
    pub user_telegram_id: i64,
    pub current_phase_id: Option<i64>,
    pub history_version: i64,
    pub message_count: i64,
    pub last_active_at: String,
}

/// One stored conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: String,
    pub content: String,
    pub prompt_tokens: u32,
    pub cached_tokens: u32,
    pub completion_tokens: u32,
}

/// A sellable offer.
#[derive(Debug, Clone)]
pub struct Offer {
    pub id: i64,
    pub bot_id: i64,
    pub name: String,
    pub price_cents: i64,
    pub currency: String,
    pub manual_verification_trigger: Option<String>,
    pub discount_trigger: Option<String>,
    pub is_active: bool,
}

/// A named trigger action.
#[derive(Debug, Clone)]
pub struct Action {
    pub id: i64,
    pub bot_id: i64,
    pub name: String,
    pub track_usage: bool,
    pub is_active: bool,
}

/// An upsell definition with its schedule.
#[derive(Debug, Clone)]
pub struct Upsell {
    pub id: i64,
    pub bot_id: i64,
    pub name: String,
    pub ordinal: i64,
    pub is_preset: bool,
    pub trigger_term: Option<String>,
    pub phase_prompt: Option<String>,
    pub price_cents: i64,
    pub is_immediate: bool,
    pub days_after: i64,
    pub hours_after: i64,
    pub minutes_after: i64,
    pub is_active: bool,
}

/// Per-user upsell delivery state.
#[derive(Debug, Clone)]
pub struct UpsellDelivery {
    pub id: i64,
    pub bot_id: i64,
    pub user_telegram_id: i64,
    pub upsell_id: i64,
    pub scheduled_for: Option<String>,
    pub sent_at: Option<String>,
    pub paid_at: Option<String>,
    pub transaction_id: Option<i64>,
}

/// Inactivity recovery campaign (one per bot).
#[derive(Debug, Clone)]
pub struct RecoveryCampaign {
    pub id: i64,
    pub bot_id: i64,
    pub timezone: String,
    pub inactivity_threshold_seconds: i64,
    pub skip_paid_users: bool,
    pub is_active: bool,
    pub version: i64,
}

/// One step of a recovery campaign.
#[derive(Debug, Clone)]
pub struct RecoveryStep {
    pub id: i64,
    pub campaign_id: i64,
    pub ordinal: i64,
    pub schedule_kind: String,
    pub schedule_value: String,
    pub is_active: bool,
}

/// Scheduled/sent record of one recovery step for one user episode.
#[derive(Debug, Clone)]
pub struct RecoveryDelivery {
    pub id: i64,
    pub campaign_id: i64,
    pub step_id: i64,
    pub bot_id: i64,
    pub user_id: i64,
    pub episode_id: String,
    pub status: String,
    pub scheduled_for: Option<String>,
    pub sent_at: Option<String>,
    pub version_snapshot: Option<i64>,
}

/// PIX transaction lifecycle.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PixStatus {
    Created,
    Pending,
    Paid,
    Delivered,
    Expired,
    Failed,
}

impl PixStatus {
    /// Terminal states never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, PixStatus::Delivered | PixStatus::Expired | PixStatus::Failed)
    }
}

/// What a transaction pays for.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PixCategory {
    Offer,
    Upsell,
    Topup,
}

/// One PIX charge.
#[derive(Debug, Clone)]
pub struct PixTransaction {
    pub id: i64,
    pub bot_id: i64,
    pub user_telegram_id: i64,
    pub chat_id: i64,
    pub offer_id: Option<i64>,
    pub upsell_id: Option<i64>,
    pub tracker_id: Option<i64>,
    pub category: PixCategory,
    pub external_id: String,
    pub qr_code: String,
    pub amount_cents: i64,
    pub status: PixStatus,
    pub created_at: String,
    pub paid_at: Option<String>,
    pub delivered_at: Option<String>,
}

/// Exactly-once guard row for the sale-approved fan-out.
#[derive(Debug, Clone)]
pub struct SaleNotification {
    pub id: i64,
    pub transaction_id: i64,
    pub admin_id: i64,
    pub channel_id: Option<i64>,
    pub status: String,
    pub sent_at: Option<String>,
}

/// Campaign attribution tracker.
#[derive(Debug, Clone)]
pub struct Tracker {
    pub id: i64,
    pub bot_id: i64,
    pub code: String,
    pub name: String,
    pub is_active: bool,
}

/// Per-bot tracking toggle.
#[derive(Debug, Clone)]
pub struct BotTrackingConfig {
    pub bot_id: i64,
    pub require_tracked_start: bool,
    pub last_forced_at: Option<String>,
}

/// Start template metadata (blocks live in the blocks table).
#[derive(Debug, Clone)]
pub struct StartTemplate {
    pub id: i64,
    pub bot_id: i64,
    pub version: i64,
    pub is_active: bool,
}

/// Cached media id translation for one bot.
#[derive(Debug, Clone)]
pub struct MediaCacheEntry {
    pub bot_id: i64,
    pub original_file_id: String,
    pub cached_file_id: String,
    pub media_kind: String,
}

/// Append-only credit ledger entry.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub id: i64,
    pub admin_id: i64,
    pub delta_cents: i64,
    pub category: String,
    pub ref_id: Option<String>,
    pub created_at: String,
}

/// A claimed or pending task row.
#[derive(Debug, Clone)]
pub struct TaskRow {
    pub id: i64,
    pub queue_name: String,
    pub task_name: String,
    pub payload: String,
    pub status: String,
    pub attempts: i64,
    pub max_attempts: i64,
    pub scheduled_for: String,
    pub locked_until: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn pix_status_round_trips() {
        for status in [
            PixStatus::Created,
            PixStatus::Pending,
            PixStatus::Paid,
            PixStatus::Delivered,
            PixStatus::Expired,
            PixStatus::Failed,
        ] {
            let s = status.to_string();
            assert_eq!(PixStatus::from_str(&s).unwrap(), status);
        }
    }

    #[test]
    fn pix_terminal_states() {
        assert!(!PixStatus::Created.is_terminal());
        assert!(!PixStatus::Pending.is_terminal());
        assert!(!PixStatus::Paid.is_terminal());
        assert!(PixStatus::Delivered.is_terminal());
        assert!(PixStatus::Expired.is_terminal());
        assert!(PixStatus::Failed.is_terminal());
    }

    #[test]
    fn pix_category_snake_case() {
        assert_eq!(PixCategory::Topup.to_string(), "topup");
        assert_eq!(PixCategory::from_str("upsell").unwrap(), PixCategory::Upsell);
    }
}
