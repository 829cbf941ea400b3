// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Start templates and per-user delivery status.
//!
//! The status row records which template version a user received; a
//! later /start with the same version is skipped, a bumped version
//! sends again.

use botfleet_core::FleetError;
use rusqlite::params;

use crate::database::{map_tr_err, Database};
use crate::models::StartTemplate;

pub async fn get_template(db: &Database, bot_id: i64) -> Result<Option<StartTemplate>, FleetError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, bot_id, version, is_active FROM start_templates WHERE bot_id = ?1",
            )?;
            let mut rows = stmt.query_map(params![bot_id], |row| {
                Ok(StartTemplate {
                    id: row.get(0)?,
                    bot_id: row.get(1)?,
                    version: row.get(2)?,
                    is_active: row.get(3)?,
                })
            })?;
            Ok(rows.next().transpose()?)
        })
        .await
        .map_err(map_tr_err)
}

/// Creates the template or bumps its version (edits invalidate the
/// per-user sent markers implicitly).
pub async fn upsert_template(db: &Database, bot_id: i64) -> Result<StartTemplate, FleetError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO start_templates (bot_id) VALUES (?1)
                 ON CONFLICT (bot_id) DO UPDATE SET version = version + 1",
                params![bot_id],
            )?;
            Ok(conn.query_row(
                "SELECT id, bot_id, version, is_active FROM start_templates WHERE bot_id = ?1",
                params![bot_id],
                |row| {
                    Ok(StartTemplate {
                        id: row.get(0)?,
                        bot_id: row.get(1)?,
                        version: row.get(2)?,
                        is_active: row.get(3)?,
                    })
                },
            )?)
        })
        .await
        .map_err(map_tr_err)
}

/// Version a user last received, if any.
pub async fn received_version(
    db: &Database,
    bot_id: i64,
    user_telegram_id: i64,
) -> Result<Option<i64>, FleetError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT template_version FROM start_message_status
                 WHERE bot_id = ?1 AND user_telegram_id = ?2",
            )?;
            let mut rows =
                stmt.query_map(params![bot_id, user_telegram_id], |row| row.get::<_, i64>(0))?;
            Ok(rows.next().transpose()?)
        })
        .await
        .map_err(map_tr_err)
}

/// Records a delivered template version (single row per user).
pub async fn record_sent(
    db: &Database,
    bot_id: i64,
    user_telegram_id: i64,
    version: i64,
) -> Result<(), FleetError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO start_message_status (bot_id, user_telegram_id, template_version)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT (bot_id, user_telegram_id) DO UPDATE SET
                     template_version = excluded.template_version,
                     sent_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
                params![bot_id, user_telegram_id, version],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::bots;

    #[tokio::test]
    async fn version_bump_and_status_tracking() {
        let db = Database::open_in_memory().await.unwrap();
        let bot_id = bots::insert_test_bot(&db, 1).await;

        let v1 = upsert_template(&db, bot_id).await.unwrap();
        assert_eq!(v1.version, 1);
        let v2 = upsert_template(&db, bot_id).await.unwrap();
        assert_eq!(v2.version, 2);

        assert_eq!(received_version(&db, bot_id, 111).await.unwrap(), None);
        record_sent(&db, bot_id, 111, 2).await.unwrap();
        assert_eq!(received_version(&db, bot_id, 111).await.unwrap(), Some(2));

        // Only one status row per user.
        record_sent(&db, bot_id, 111, 3).await.unwrap();
        let count: i64 = db
            .connection()
            .call(move |conn| -> Result<i64, tokio_rusqlite::Error> {
                conn.query_row(
                    "SELECT COUNT(*) FROM start_message_status WHERE bot_id = ?1",
                    params![bot_id],
                    |row| row.get(0),
                )
            })
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
