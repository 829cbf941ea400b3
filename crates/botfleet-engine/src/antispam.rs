// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Anti-spam integration point.
//!
//! The spam service itself is an external collaborator; the engine only
//! consults this hook after the rate-limit gate and bans on a verdict.
//! Deployments plug their detector in; the default accepts everything.

use async_trait::async_trait;
use botfleet_core::FleetError;

/// Verdict of a spam check: `Some(reason)` bans the user.
pub type SpamVerdict = Option<String>;

/// Pluggable spam detector consulted per inbound message.
#[async_trait]
pub trait AntiSpamHook: Send + Sync + 'static {
    async fn check(
        &self,
        bot_id: i64,
        user_telegram_id: i64,
        text: &str,
    ) -> Result<SpamVerdict, FleetError>;
}

/// Default hook: accepts everything.
pub struct NoopAntiSpam;

#[async_trait]
impl AntiSpamHook for NoopAntiSpam {
    async fn check(
        &self,
        _bot_id: i64,
        _user_telegram_id: i64,
        _text: &str,
    ) -> Result<SpamVerdict, FleetError> {
        Ok(None)
    }
}
