// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tracker attribution: `/start <code>` deep links, base62 codes,
//! daily stat buckets and the tracked-start enforcement toggle.

use std::sync::Arc;

use botfleet_core::FleetError;
use botfleet_kv::{keys, KvStore};
use botfleet_storage::queries::trackers;
use botfleet_storage::Database;
use rand::Rng;
use tracing::{debug, info};

/// Tracker code alphabet (base62) and length.
const CODE_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
pub const CODE_LEN: usize = 8;

/// What happened to an inbound /start regarding attribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartAttribution {
    /// Valid code: user attributed to this tracker.
    Attributed { tracker_id: i64 },
    /// No (or unknown) code on a bot that does not require one.
    Untracked,
    /// No valid code and the bot requires one: drop silently.
    Rejected,
}

/// Attribution service over storage with KV mirrors.
pub struct TrackingService {
    db: Database,
    kv: Arc<dyn KvStore>,
}

impl TrackingService {
    pub fn new(db: Database, kv: Arc<dyn KvStore>) -> Self {
        Self { db, kv }
    }

    /// Generates a fresh 8-char base62 code, retrying on collision.
    pub async fn create_tracker(
        &self,
        bot_id: i64,
        name: String,
    ) -> Result<(i64, String), FleetError> {
        for _ in 0..5 {
            let code = generate_code();
            if trackers::get_by_code(&self.db, bot_id, &code).await?.is_none() {
                let id = trackers::create(&self.db, bot_id, code.clone(), name.clone()).await?;
                self.kv
                    .set(&keys::tracker_code(bot_id, &code), &id.to_string())
                    .await?;
                info!(bot_id, tracker_id = id, code = code.as_str(), "tracker created");
                return Ok((id, code));
            }
        }
        Err(FleetError::Internal("tracker code space exhausted".into()))
    }

    /// Handles the `/start [code]` attribution step of the pipeline.
    ///
    /// Records the attribution (first code wins), bumps the daily start
    /// bucket, and enforces `require_tracked_start`.
    pub async fn handle_start(
        &self,
        bot_id: i64,
        user_telegram_id: i64,
        code: Option<&str>,
    ) -> Result<StartAttribution, FleetError> {
        let tracker = match code {
            Some(code) if is_plausible_code(code) => {
                trackers::get_by_code(&self.db, bot_id, code).await?
            }
            _ => None,
        };

        if let Some(tracker) = tracker {
            let attributed =
                trackers::attribute(&self.db, bot_id, user_telegram_id, tracker.id).await?;
            self.kv
                .set(
                    &keys::tracker_attribution(bot_id, user_telegram_id),
                    &attributed.to_string(),
                )
                .await?;
            let day = chrono::Utc::now().format("%Y-%m-%d").to_string();
            trackers::record_start(&self.db, bot_id, tracker.id, day).await?;
            debug!(bot_id, user_telegram_id, tracker_id = tracker.id, "start attributed");
            return Ok(StartAttribution::Attributed { tracker_id: attributed });
        }

        let config = trackers::tracking_config(&self.db, bot_id).await?;
        if config.require_tracked_start {
            // Already-attributed users keep access after the toggle.
            if trackers::attribution_of(&self.db, bot_id, user_telegram_id)
                .await?
                .is_some()
            {
                return Ok(StartAttribution::Untracked);
            }
            debug!(bot_id, user_telegram_id, "untracked /start silently dropped");
            return Ok(StartAttribution::Rejected);
        }
        Ok(StartAttribution::Untracked)
    }

    /// Attribution of a user, for sale stamping.
    pub async fn attribution_of(
        &self,
        bot_id: i64,
        user_telegram_id: i64,
    ) -> Result<Option<i64>, FleetError> {
        if let Some(cached) = self
            .kv
            .get(&keys::tracker_attribution(bot_id, user_telegram_id))
            .await?
        {
            if let Ok(id) = cached.parse() {
                return Ok(Some(id));
            }
        }
        trackers::attribution_of(&self.db, bot_id, user_telegram_id).await
    }
}

fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

fn is_plausible_code(code: &str) -> bool {
    code.len() == CODE_LEN && code.bytes().all(|b| CODE_ALPHABET.contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use botfleet_kv::MemoryKv;
    use botfleet_storage::queries::bots;

    async fn service() -> (TrackingService, i64) {
        let db = Database::open_in_memory().await.unwrap();
        let bot_id = bots::insert_test_bot(&db, 1).await;
        (TrackingService::new(db, Arc::new(MemoryKv::new())), bot_id)
    }

    #[test]
    fn generated_codes_are_base62_of_length_8() {
        for _ in 0..50 {
            let code = generate_code();
            assert!(is_plausible_code(&code), "bad code {code}");
        }
    }

    #[tokio::test]
    async fn scenario_s1_valid_code_attributes_and_counts_start() {
        let (svc, bot_id) = service().await;
        let (tracker_id, code) = svc.create_tracker(bot_id, "insta".into()).await.unwrap();

        let outcome = svc.handle_start(bot_id, 111, Some(&code)).await.unwrap();
        assert_eq!(outcome, StartAttribution::Attributed { tracker_id });
        assert_eq!(svc.attribution_of(bot_id, 111).await.unwrap(), Some(tracker_id));

        let day = chrono::Utc::now().format("%Y-%m-%d").to_string();
        let (starts, _, _) = trackers::daily_stat(&svc.db, bot_id, tracker_id, day)
            .await
            .unwrap();
        assert_eq!(starts, 1);
    }

    #[tokio::test]
    async fn unknown_code_without_enforcement_is_untracked() {
        let (svc, bot_id) = service().await;
        let outcome = svc.handle_start(bot_id, 111, Some("zzzzzzzz")).await.unwrap();
        assert_eq!(outcome, StartAttribution::Untracked);
        let outcome = svc.handle_start(bot_id, 111, None).await.unwrap();
        assert_eq!(outcome, StartAttribution::Untracked);
    }

    #[tokio::test]
    async fn require_tracked_start_drops_untracked_users() {
        let (svc, bot_id) = service().await;
        trackers::set_require_tracked_start(&svc.db, bot_id, true)
            .await
            .unwrap();

        let outcome = svc.handle_start(bot_id, 111, None).await.unwrap();
        assert_eq!(outcome, StartAttribution::Rejected);

        // Attributed users keep access even without a code.
        let (tracker_id, code) = svc.create_tracker(bot_id, "insta".into()).await.unwrap();
        let outcome = svc.handle_start(bot_id, 222, Some(&code)).await.unwrap();
        assert_eq!(outcome, StartAttribution::Attributed { tracker_id });
        let outcome = svc.handle_start(bot_id, 222, None).await.unwrap();
        assert_eq!(outcome, StartAttribution::Untracked);
    }

    #[tokio::test]
    async fn first_code_wins_on_repeat_starts() {
        let (svc, bot_id) = service().await;
        let (first_id, first_code) = svc.create_tracker(bot_id, "a".into()).await.unwrap();
        let (_, second_code) = svc.create_tracker(bot_id, "b".into()).await.unwrap();

        svc.handle_start(bot_id, 111, Some(&first_code)).await.unwrap();
        let outcome = svc.handle_start(bot_id, 111, Some(&second_code)).await.unwrap();
        assert_eq!(outcome, StartAttribution::Attributed { tracker_id: first_id });
    }
}
