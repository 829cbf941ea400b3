// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! User rows, unique per (bot, telegram id).

use botfleet_core::FleetError;
use rusqlite::params;

use crate::database::{map_tr_err, Database};
use crate::models::User;

fn row_to_user(row: &rusqlite::Row<'_>) -> Result<User, rusqlite::Error> {
    Ok(User {
        id: row.get(0)?,
        bot_id: row.get(1)?,
        telegram_id: row.get(2)?,
        first_interaction: row.get(3)?,
        last_interaction: row.get(4)?,
    })
}

/// Fetches or creates the user row, stamping last_interaction.
pub async fn get_or_create(
    db: &Database,
    bot_id: i64,
    telegram_id: i64,
) -> Result<User, FleetError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO users (bot_id, telegram_id)
                 VALUES (?1, ?2)
                 ON CONFLICT (bot_id, telegram_id)
                 DO UPDATE SET last_interaction = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
                params![bot_id, telegram_id],
            )?;
            conn.query_row(
                "SELECT id, bot_id, telegram_id, first_interaction, last_interaction
                 FROM users WHERE bot_id = ?1 AND telegram_id = ?2",
                params![bot_id, telegram_id],
                row_to_user,
            )
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get(db: &Database, bot_id: i64, telegram_id: i64) -> Result<Option<User>, FleetError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, bot_id, telegram_id, first_interaction, last_interaction
                 FROM users WHERE bot_id = ?1 AND telegram_id = ?2",
            )?;
            let mut rows = stmt.query_map(params![bot_id, telegram_id], row_to_user)?;
            Ok(rows.next().transpose()?)
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::bots;

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let db = Database::open_in_memory().await.unwrap();
        let bot_id = bots::insert_test_bot(&db, 1).await;

        let first = get_or_create(&db, bot_id, 111).await.unwrap();
        let second = get_or_create(&db, bot_id, 111).await.unwrap();
        assert_eq!(first.id, second.id);
        assert!(second.last_interaction.is_some());
    }

    #[tokio::test]
    async fn users_are_scoped_per_bot() {
        let db = Database::open_in_memory().await.unwrap();
        let bot_a = bots::insert_test_bot(&db, 1).await;
        let bot_b = bots::insert_test_bot(&db, 1).await;

        let a = get_or_create(&db, bot_a, 111).await.unwrap();
        let b = get_or_create(&db, bot_b, 111).await.unwrap();
        assert_ne!(a.id, b.id);
    }
}
