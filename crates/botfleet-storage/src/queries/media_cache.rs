// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-bot media file-id cache.
//!
//! Identifiers are hints: the first "expired identifier" error
//! invalidates the row, the next successful upload repopulates it.

use botfleet_core::FleetError;
use rusqlite::params;

use crate::database::{map_tr_err, Database};

pub async fn lookup(
    db: &Database,
    bot_id: i64,
    original_file_id: &str,
) -> Result<Option<String>, FleetError> {
    let original = original_file_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT cached_file_id FROM media_cache
                 WHERE bot_id = ?1 AND original_file_id = ?2",
            )?;
            let mut rows =
                stmt.query_map(params![bot_id, original], |row| row.get::<_, String>(0))?;
            Ok(rows.next().transpose()?)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn store(
    db: &Database,
    bot_id: i64,
    original_file_id: &str,
    cached_file_id: &str,
    media_kind: &str,
) -> Result<(), FleetError> {
    let original = original_file_id.to_string();
    let cached = cached_file_id.to_string();
    let kind = media_kind.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO media_cache (bot_id, original_file_id, cached_file_id, media_kind)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (bot_id, original_file_id)
                 DO UPDATE SET cached_file_id = excluded.cached_file_id,
                               media_kind = excluded.media_kind",
                params![bot_id, original, cached, kind],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn invalidate(
    db: &Database,
    bot_id: i64,
    original_file_id: &str,
) -> Result<(), FleetError> {
    let original = original_file_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "DELETE FROM media_cache WHERE bot_id = ?1 AND original_file_id = ?2",
                params![bot_id, original],
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
    async fn store_lookup_invalidate_cycle() {
        let db = Database::open_in_memory().await.unwrap();
        let bot_id = bots::insert_test_bot(&db, 1).await;

        assert!(lookup(&db, bot_id, "orig-1").await.unwrap().is_none());

        store(&db, bot_id, "orig-1", "cached-1", "photo").await.unwrap();
        assert_eq!(
            lookup(&db, bot_id, "orig-1").await.unwrap().as_deref(),
            Some("cached-1")
        );

        // Re-store overwrites (re-resolution after an expired id).
        store(&db, bot_id, "orig-1", "cached-2", "photo").await.unwrap();
        assert_eq!(
            lookup(&db, bot_id, "orig-1").await.unwrap().as_deref(),
            Some("cached-2")
        );

        invalidate(&db, bot_id, "orig-1").await.unwrap();
        assert!(lookup(&db, bot_id, "orig-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cache_is_scoped_per_bot() {
        let db = Database::open_in_memory().await.unwrap();
        let bot_a = bots::insert_test_bot(&db, 1).await;
        let bot_b = bots::insert_test_bot(&db, 1).await;

        store(&db, bot_a, "orig", "cached-a", "video").await.unwrap();
        assert!(lookup(&db, bot_b, "orig").await.unwrap().is_none());
    }
}
