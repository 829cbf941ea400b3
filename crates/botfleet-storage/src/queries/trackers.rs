// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tracker links, attributions and daily stat buckets.

use botfleet_core::FleetError;
use rusqlite::params;

use crate::database::{map_tr_err, Database};
use crate::models::{BotTrackingConfig, Tracker};

fn row_to_tracker(row: &rusqlite::Row<'_>) -> Result<Tracker, rusqlite::Error> {
    Ok(Tracker {
        id: row.get(0)?,
        bot_id: row.get(1)?,
        code: row.get(2)?,
        name: row.get(3)?,
        is_active: row.get(4)?,
    })
}

const TRACKER_COLUMNS: &str = "id, bot_id, code, name, is_active";

pub async fn create(
    db: &Database,
    bot_id: i64,
    code: String,
    name: String,
) -> Result<i64, FleetError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO trackers (bot_id, code, name) VALUES (?1, ?2, ?3)",
                params![bot_id, code, name],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_by_code(
    db: &Database,
    bot_id: i64,
    code: &str,
) -> Result<Option<Tracker>, FleetError> {
    let code = code.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TRACKER_COLUMNS} FROM trackers
                 WHERE bot_id = ?1 AND code = ?2 AND is_active = 1"
            ))?;
            let mut rows = stmt.query_map(params![bot_id, code], row_to_tracker)?;
            Ok(rows.next().transpose()?)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get(db: &Database, tracker_id: i64) -> Result<Option<Tracker>, FleetError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TRACKER_COLUMNS} FROM trackers WHERE id = ?1"
            ))?;
            let mut rows = stmt.query_map(params![tracker_id], row_to_tracker)?;
            Ok(rows.next().transpose()?)
        })
        .await
        .map_err(map_tr_err)
}

/// Records the first attribution of a user; later codes never overwrite
/// the first one. Returns the attributed tracker id.
pub async fn attribute(
    db: &Database,
    bot_id: i64,
    user_telegram_id: i64,
    tracker_id: i64,
) -> Result<i64, FleetError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO tracker_attributions (bot_id, user_telegram_id, tracker_id)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT (bot_id, user_telegram_id) DO NOTHING",
                params![bot_id, user_telegram_id, tracker_id],
            )?;
            conn.query_row(
                "SELECT tracker_id FROM tracker_attributions
                 WHERE bot_id = ?1 AND user_telegram_id = ?2",
                params![bot_id, user_telegram_id],
                |row| row.get(0),
            )
        })
        .await
        .map_err(map_tr_err)
}

pub async fn attribution_of(
    db: &Database,
    bot_id: i64,
    user_telegram_id: i64,
) -> Result<Option<i64>, FleetError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT tracker_id FROM tracker_attributions
                 WHERE bot_id = ?1 AND user_telegram_id = ?2",
            )?;
            let mut rows =
                stmt.query_map(params![bot_id, user_telegram_id], |row| row.get::<_, i64>(0))?;
            Ok(rows.next().transpose()?)
        })
        .await
        .map_err(map_tr_err)
}

/// Adds one /start to the tracker's daily bucket.
pub async fn record_start(
    db: &Database,
    bot_id: i64,
    tracker_id: i64,
    day: String,
) -> Result<(), FleetError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO tracker_daily_stats (bot_id, tracker_id, day, starts)
                 VALUES (?1, ?2, ?3, 1)
                 ON CONFLICT (bot_id, tracker_id, day)
                 DO UPDATE SET starts = starts + 1",
                params![bot_id, tracker_id, day],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Adds one sale and its revenue to the tracker's daily bucket.
pub async fn record_sale(
    db: &Database,
    bot_id: i64,
    tracker_id: i64,
    day: String,
    revenue_cents: i64,
) -> Result<(), FleetError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO tracker_daily_stats (bot_id, tracker_id, day, sales, revenue_cents)
                 VALUES (?1, ?2, ?3, 1, ?4)
                 ON CONFLICT (bot_id, tracker_id, day)
                 DO UPDATE SET sales = sales + 1, revenue_cents = revenue_cents + ?4",
                params![bot_id, tracker_id, day, revenue_cents],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// (starts, sales, revenue_cents) for one bucket.
pub async fn daily_stat(
    db: &Database,
    bot_id: i64,
    tracker_id: i64,
    day: String,
) -> Result<(i64, i64, i64), FleetError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT starts, sales, revenue_cents FROM tracker_daily_stats
                 WHERE bot_id = ?1 AND tracker_id = ?2 AND day = ?3",
            )?;
            let mut rows = stmt.query_map(params![bot_id, tracker_id, day], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;
            Ok(rows.next().transpose()?.unwrap_or((0, 0, 0)))
        })
        .await
        .map_err(map_tr_err)
}

pub async fn tracking_config(db: &Database, bot_id: i64) -> Result<BotTrackingConfig, FleetError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT bot_id, require_tracked_start, last_forced_at
                 FROM bot_tracking_configs WHERE bot_id = ?1",
            )?;
            let mut rows = stmt.query_map(params![bot_id], |row| {
                Ok(BotTrackingConfig {
                    bot_id: row.get(0)?,
                    require_tracked_start: row.get(1)?,
                    last_forced_at: row.get(2)?,
                })
            })?;
            Ok(rows.next().transpose()?.unwrap_or(BotTrackingConfig {
                bot_id,
                require_tracked_start: false,
                last_forced_at: None,
            }))
        })
        .await
        .map_err(map_tr_err)
}

pub async fn set_require_tracked_start(
    db: &Database,
    bot_id: i64,
    required: bool,
) -> Result<(), FleetError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO bot_tracking_configs (bot_id, require_tracked_start, last_forced_at)
                 VALUES (?1, ?2, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
                 ON CONFLICT (bot_id) DO UPDATE SET
                     require_tracked_start = excluded.require_tracked_start,
                     last_forced_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
                params![bot_id, required],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}
