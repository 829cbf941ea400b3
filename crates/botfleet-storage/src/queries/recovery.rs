// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Recovery campaigns, steps and delivery records.
//!
//! `ensure_scheduled` is `INSERT ... ON CONFLICT DO NOTHING` over the
//! `(bot_id, user_id, step_id, episode_id)` unique key, so concurrent
//! schedulers cannot double-create a delivery. `mark_sent` writes
//! `sent_at` once; the stamp is immutable afterwards.

use botfleet_core::FleetError;
use rusqlite::params;

use crate::database::{map_tr_err, Database};
use crate::models::{RecoveryCampaign, RecoveryDelivery, RecoveryStep};

fn row_to_campaign(row: &rusqlite::Row<'_>) -> Result<RecoveryCampaign, rusqlite::Error> {
    Ok(RecoveryCampaign {
        id: row.get(0)?,
        bot_id: row.get(1)?,
        timezone: row.get(2)?,
        inactivity_threshold_seconds: row.get(3)?,
        skip_paid_users: row.get(4)?,
        is_active: row.get(5)?,
        version: row.get(6)?,
    })
}

const CAMPAIGN_COLUMNS: &str =
    "id, bot_id, timezone, inactivity_threshold_seconds, skip_paid_users, is_active, version";

fn row_to_step(row: &rusqlite::Row<'_>) -> Result<RecoveryStep, rusqlite::Error> {
    Ok(RecoveryStep {
        id: row.get(0)?,
        campaign_id: row.get(1)?,
        ordinal: row.get(2)?,
        schedule_kind: row.get(3)?,
        schedule_value: row.get(4)?,
        is_active: row.get(5)?,
    })
}

const STEP_COLUMNS: &str = "id, campaign_id, ordinal, schedule_kind, schedule_value, is_active";

pub async fn upsert_campaign(
    db: &Database,
    bot_id: i64,
    timezone: String,
    inactivity_threshold_seconds: i64,
    skip_paid_users: bool,
) -> Result<i64, FleetError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO recovery_campaigns
                     (bot_id, timezone, inactivity_threshold_seconds, skip_paid_users)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (bot_id) DO UPDATE SET
                     timezone = excluded.timezone,
                     inactivity_threshold_seconds = excluded.inactivity_threshold_seconds,
                     skip_paid_users = excluded.skip_paid_users,
                     version = version + 1",
                params![bot_id, timezone, inactivity_threshold_seconds, skip_paid_users],
            )?;
            Ok(conn.query_row(
                "SELECT id FROM recovery_campaigns WHERE bot_id = ?1",
                params![bot_id],
                |row| row.get(0),
            )?)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn campaign_by_bot(
    db: &Database,
    bot_id: i64,
) -> Result<Option<RecoveryCampaign>, FleetError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CAMPAIGN_COLUMNS} FROM recovery_campaigns WHERE bot_id = ?1"
            ))?;
            let mut rows = stmt.query_map(params![bot_id], row_to_campaign)?;
            Ok(rows.next().transpose()?)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn campaign_by_id(
    db: &Database,
    campaign_id: i64,
) -> Result<Option<RecoveryCampaign>, FleetError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CAMPAIGN_COLUMNS} FROM recovery_campaigns WHERE id = ?1"
            ))?;
            let mut rows = stmt.query_map(params![campaign_id], row_to_campaign)?;
            Ok(rows.next().transpose()?)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn add_step(
    db: &Database,
    campaign_id: i64,
    ordinal: i64,
    schedule_kind: String,
    schedule_value: String,
) -> Result<i64, FleetError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO recovery_steps (campaign_id, ordinal, schedule_kind, schedule_value)
                 VALUES (?1, ?2, ?3, ?4)",
                params![campaign_id, ordinal, schedule_kind, schedule_value],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .map_err(map_tr_err)
}

/// Active steps in ordinal order.
pub async fn active_steps(db: &Database, campaign_id: i64) -> Result<Vec<RecoveryStep>, FleetError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {STEP_COLUMNS} FROM recovery_steps
                 WHERE campaign_id = ?1 AND is_active = 1 ORDER BY ordinal"
            ))?;
            let rows = stmt.query_map(params![campaign_id], row_to_step)?;
            Ok(rows.collect::<Result<Vec<_>, rusqlite::Error>>()?)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_step(db: &Database, step_id: i64) -> Result<Option<RecoveryStep>, FleetError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {STEP_COLUMNS} FROM recovery_steps WHERE id = ?1"
            ))?;
            let mut rows = stmt.query_map(params![step_id], row_to_step)?;
            Ok(rows.next().transpose()?)
        })
        .await
        .map_err(map_tr_err)
}

/// Idempotently records a scheduled delivery.
#[allow(clippy::too_many_arguments)]
pub async fn ensure_scheduled(
    db: &Database,
    campaign_id: i64,
    step_id: i64,
    bot_id: i64,
    user_id: i64,
    episode_id: String,
    scheduled_for: String,
    version_snapshot: i64,
) -> Result<(), FleetError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO recovery_deliveries
                     (campaign_id, step_id, bot_id, user_id, episode_id,
                      status, scheduled_for, version_snapshot)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'scheduled', ?6, ?7)
                 ON CONFLICT (bot_id, user_id, step_id, episode_id) DO NOTHING",
                params![
                    campaign_id,
                    step_id,
                    bot_id,
                    user_id,
                    episode_id,
                    scheduled_for,
                    version_snapshot,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Stamps `sent_at` once, creating the delivery row when the scheduler
/// never got to write it. Returns false when the row was already sent.
#[allow(clippy::too_many_arguments)]
pub async fn mark_sent(
    db: &Database,
    campaign_id: i64,
    step_id: i64,
    bot_id: i64,
    user_id: i64,
    episode_id: String,
    version_snapshot: i64,
) -> Result<bool, FleetError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO recovery_deliveries
                     (campaign_id, step_id, bot_id, user_id, episode_id,
                      status, sent_at, version_snapshot)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'sent',
                         strftime('%Y-%m-%dT%H:%M:%fZ', 'now'), ?6)
                 ON CONFLICT (bot_id, user_id, step_id, episode_id) DO UPDATE SET
                     status = 'sent',
                     sent_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE recovery_deliveries.sent_at IS NULL",
                params![campaign_id, step_id, bot_id, user_id, episode_id, version_snapshot],
            )?;
            let changed = conn.changes();
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Marks every still-scheduled delivery of an episode as skipped.
pub async fn skip_episode(
    db: &Database,
    bot_id: i64,
    user_id: i64,
    episode_id: String,
) -> Result<(), FleetError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE recovery_deliveries SET status = 'skipped'
                 WHERE bot_id = ?1 AND user_id = ?2 AND episode_id = ?3 AND sent_at IS NULL",
                params![bot_id, user_id, episode_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_delivery(
    db: &Database,
    bot_id: i64,
    user_id: i64,
    step_id: i64,
    episode_id: String,
) -> Result<Option<RecoveryDelivery>, FleetError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, campaign_id, step_id, bot_id, user_id, episode_id,
                        status, scheduled_for, sent_at, version_snapshot
                 FROM recovery_deliveries
                 WHERE bot_id = ?1 AND user_id = ?2 AND step_id = ?3 AND episode_id = ?4",
            )?;
            let mut rows = stmt.query_map(
                params![bot_id, user_id, step_id, episode_id],
                |row| {
                    Ok(RecoveryDelivery {
                        id: row.get(0)?,
                        campaign_id: row.get(1)?,
                        step_id: row.get(2)?,
                        bot_id: row.get(3)?,
                        user_id: row.get(4)?,
                        episode_id: row.get(5)?,
                        status: row.get(6)?,
                        scheduled_for: row.get(7)?,
                        sent_at: row.get(8)?,
                        version_snapshot: row.get(9)?,
                    })
                },
            )?;
            Ok(rows.next().transpose()?)
        })
        .await
        .map_err(map_tr_err)
}
