// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Trigger actions and per-user action status.

use botfleet_core::FleetError;
use rusqlite::params;

use crate::database::{map_tr_err, Database};
use crate::models::Action;

fn row_to_action(row: &rusqlite::Row<'_>) -> Result<Action, rusqlite::Error> {
    Ok(Action {
        id: row.get(0)?,
        bot_id: row.get(1)?,
        name: row.get(2)?,
        track_usage: row.get(3)?,
        is_active: row.get(4)?,
    })
}

const ACTION_COLUMNS: &str = "id, bot_id, name, track_usage, is_active";

pub async fn create(
    db: &Database,
    bot_id: i64,
    name: String,
    track_usage: bool,
) -> Result<i64, FleetError> {
    if name.trim().is_empty() || name.len() > 128 {
        return Err(FleetError::Validation(
            "action name must be 1..=128 characters".into(),
        ));
    }
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO actions (bot_id, name, track_usage) VALUES (?1, ?2, ?3)",
                params![bot_id, name, track_usage],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn list_active(db: &Database, bot_id: i64) -> Result<Vec<Action>, FleetError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ACTION_COLUMNS} FROM actions
                 WHERE bot_id = ?1 AND is_active = 1 ORDER BY id"
            ))?;
            let rows = stmt.query_map(params![bot_id], row_to_action)?;
            Ok(rows.collect::<Result<Vec<_>, rusqlite::Error>>()?)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_by_name(
    db: &Database,
    bot_id: i64,
    name: &str,
) -> Result<Option<Action>, FleetError> {
    let name = name.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ACTION_COLUMNS} FROM actions
                 WHERE bot_id = ?1 AND lower(name) = lower(?2)"
            ))?;
            let mut rows = stmt.query_map(params![bot_id, name], row_to_action)?;
            Ok(rows.next().transpose()?)
        })
        .await
        .map_err(map_tr_err)
}

/// Per-user status of a tracked action ("INACTIVE" when unseen).
pub async fn user_status(
    db: &Database,
    bot_id: i64,
    user_telegram_id: i64,
    action_id: i64,
) -> Result<String, FleetError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT status FROM user_action_status
                 WHERE bot_id = ?1 AND user_telegram_id = ?2 AND action_id = ?3",
            )?;
            let mut rows = stmt.query_map(params![bot_id, user_telegram_id, action_id], |row| {
                row.get::<_, String>(0)
            })?;
            Ok(rows.next().transpose()?.unwrap_or_else(|| "INACTIVE".to_string()))
        })
        .await
        .map_err(map_tr_err)
}

/// Marks a tracked action ACTIVATED for a user and stamps the trigger time.
pub async fn mark_activated(
    db: &Database,
    bot_id: i64,
    user_telegram_id: i64,
    action_id: i64,
) -> Result<(), FleetError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO user_action_status
                     (bot_id, user_telegram_id, action_id, status, last_triggered_at)
                 VALUES (?1, ?2, ?3, 'ACTIVATED', strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
                 ON CONFLICT (bot_id, user_telegram_id, action_id) DO UPDATE SET
                     status = 'ACTIVATED',
                     last_triggered_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
                params![bot_id, user_telegram_id, action_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}
