// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation sessions and history.
//!
//! History mutations are guarded by a CAS on `sessions.history_version`:
//! interleaved writers detect the bump and re-merge with append
//! semantics instead of clobbering each other.

use botfleet_core::FleetError;
use rusqlite::params;

use crate::database::{map_tr_err, Database};
use crate::models::{HistoryEntry, Session};

fn row_to_session(row: &rusqlite::Row<'_>) -> Result<Session, rusqlite::Error> {
    Ok(Session {
        id: row.get(0)?,
        bot_id: row.get(1)?,
        user_telegram_id: row.get(2)?,
        current_phase_id: row.get(3)?,
        history_version: row.get(4)?,
        message_count: row.get(5)?,
        last_active_at: row.get(6)?,
    })
}

const SESSION_COLUMNS: &str =
    "id, bot_id, user_telegram_id, current_phase_id, history_version, message_count, last_active_at";

pub async fn get_or_create(
    db: &Database,
    bot_id: i64,
    user_telegram_id: i64,
) -> Result<Session, FleetError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO sessions (bot_id, user_telegram_id)
                 VALUES (?1, ?2)
                 ON CONFLICT (bot_id, user_telegram_id) DO NOTHING",
                params![bot_id, user_telegram_id],
            )?;
            Ok(conn.query_row(
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM sessions
                     WHERE bot_id = ?1 AND user_telegram_id = ?2"
                ),
                params![bot_id, user_telegram_id],
                row_to_session,
            )?)
        })
        .await
        .map_err(map_tr_err)
}

/// Sets the current phase (LLM trigger detected or upsell activation).
pub async fn set_phase(
    db: &Database,
    bot_id: i64,
    user_telegram_id: i64,
    phase_id: Option<i64>,
) -> Result<(), FleetError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE sessions SET current_phase_id = ?1
                 WHERE bot_id = ?2 AND user_telegram_id = ?3",
                params![phase_id, bot_id, user_telegram_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Appends a user/assistant turn pair under CAS.
///
/// Retries the append when another worker bumped `history_version`
/// between our read and write; append semantics make the merge safe.
/// Also bumps `message_count`, stamps `last_active_at` and truncates
/// the history to `keep_entries`.
pub async fn append_turns(
    db: &Database,
    bot_id: i64,
    user_telegram_id: i64,
    expected_version: i64,
    entries: Vec<HistoryEntry>,
    keep_entries: usize,
) -> Result<i64, FleetError> {
    let mut version = expected_version;
    for attempt in 0..3 {
        match try_append(db, bot_id, user_telegram_id, version, entries.clone(), keep_entries)
            .await?
        {
            AppendOutcome::Done(new_version) => return Ok(new_version),
            AppendOutcome::VersionMismatch(current) => {
                tracing::debug!(
                    bot_id,
                    user_telegram_id,
                    attempt,
                    expected = version,
                    current,
                    "history version raced, re-merging append"
                );
                version = current;
            }
        }
    }
    Err(FleetError::Consistency(format!(
        "history CAS kept failing for bot {bot_id} user {user_telegram_id}"
    )))
}

enum AppendOutcome {
    Done(i64),
    VersionMismatch(i64),
}

async fn try_append(
    db: &Database,
    bot_id: i64,
    user_telegram_id: i64,
    expected_version: i64,
    entries: Vec<HistoryEntry>,
    keep_entries: usize,
) -> Result<AppendOutcome, FleetError> {
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;

            let updated = tx.execute(
                "UPDATE sessions SET history_version = history_version + 1,
                     message_count = message_count + 1,
                     last_active_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE bot_id = ?1 AND user_telegram_id = ?2 AND history_version = ?3",
                params![bot_id, user_telegram_id, expected_version],
            )?;
            if updated == 0 {
                let current: i64 = tx.query_row(
                    "SELECT history_version FROM sessions
                     WHERE bot_id = ?1 AND user_telegram_id = ?2",
                    params![bot_id, user_telegram_id],
                    |row| row.get(0),
                )?;
                tx.commit()?;
                return Ok(AppendOutcome::VersionMismatch(current));
            }

            for entry in &entries {
                tx.execute(
                    "INSERT INTO conversation_history
                         (bot_id, user_telegram_id, role, content,
                          prompt_tokens, cached_tokens, completion_tokens)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        bot_id,
                        user_telegram_id,
                        entry.role,
                        entry.content,
                        entry.prompt_tokens,
                        entry.cached_tokens,
                        entry.completion_tokens,
                    ],
                )?;
            }

            // Drop everything older than the newest keep_entries rows.
            tx.execute(
                "DELETE FROM conversation_history
                 WHERE bot_id = ?1 AND user_telegram_id = ?2 AND id NOT IN (
                     SELECT id FROM conversation_history
                     WHERE bot_id = ?1 AND user_telegram_id = ?2
                     ORDER BY id DESC LIMIT ?3
                 )",
                params![bot_id, user_telegram_id, keep_entries as i64],
            )?;

            tx.commit()?;
            Ok(AppendOutcome::Done(expected_version + 1))
        })
        .await
        .map_err(map_tr_err)
}

/// Newest `limit` history entries in chronological order.
pub async fn recent_history(
    db: &Database,
    bot_id: i64,
    user_telegram_id: i64,
    limit: usize,
) -> Result<Vec<HistoryEntry>, FleetError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT role, content, prompt_tokens, cached_tokens, completion_tokens
                 FROM (
                     SELECT * FROM conversation_history
                     WHERE bot_id = ?1 AND user_telegram_id = ?2
                     ORDER BY id DESC LIMIT ?3
                 ) ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![bot_id, user_telegram_id, limit as i64], |row| {
                Ok(HistoryEntry {
                    role: row.get(0)?,
                    content: row.get(1)?,
                    prompt_tokens: row.get::<_, i64>(2)? as u32,
                    cached_tokens: row.get::<_, i64>(3)? as u32,
                    completion_tokens: row.get::<_, i64>(4)? as u32,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, rusqlite::Error>>()?)
        })
        .await
        .map_err(map_tr_err)
}

/// Moving average of recent assistant completion tokens, for the
/// credit pre-check estimate.
pub async fn avg_completion_tokens(
    db: &Database,
    bot_id: i64,
    user_telegram_id: i64,
    window: usize,
) -> Result<Option<u32>, FleetError> {
    db.connection()
        .call(move |conn| {
            let avg: Option<f64> = conn.query_row(
                "SELECT AVG(completion_tokens) FROM (
                     SELECT completion_tokens FROM conversation_history
                     WHERE bot_id = ?1 AND user_telegram_id = ?2
                       AND role = 'assistant' AND completion_tokens > 0
                     ORDER BY id DESC LIMIT ?3
                 )",
                params![bot_id, user_telegram_id, window as i64],
                |row| row.get(0),
            )?;
            Ok(avg.map(|a| a.round() as u32))
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::bots;

    fn turn(role: &str, content: &str, completion: u32) -> HistoryEntry {
        HistoryEntry {
            role: role.into(),
            content: content.into(),
            prompt_tokens: 0,
            cached_tokens: 0,
            completion_tokens: completion,
        }
    }

    #[tokio::test]
    async fn append_and_read_back_in_order() {
        let db = Database::open_in_memory().await.unwrap();
        let bot_id = bots::insert_test_bot(&db, 1).await;
        let session = get_or_create(&db, bot_id, 111).await.unwrap();

        let v1 = append_turns(
            &db,
            bot_id,
            111,
            session.history_version,
            vec![turn("user", "oi", 0), turn("assistant", "olá!", 12)],
            14,
        )
        .await
        .unwrap();
        assert_eq!(v1, session.history_version + 1);

        let history = recent_history(&db, bot_id, 111, 14).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, "user");
        assert_eq!(history[1].content, "olá!");
    }

    #[tokio::test]
    async fn history_is_truncated_to_budget() {
        let db = Database::open_in_memory().await.unwrap();
        let bot_id = bots::insert_test_bot(&db, 1).await;
        let mut version = get_or_create(&db, bot_id, 111).await.unwrap().history_version;

        for i in 0..5 {
            version = append_turns(
                &db,
                bot_id,
                111,
                version,
                vec![
                    turn("user", &format!("u{i}"), 0),
                    turn("assistant", &format!("a{i}"), 10),
                ],
                4,
            )
            .await
            .unwrap();
        }

        let history = recent_history(&db, bot_id, 111, 100).await.unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].content, "u3");
        assert_eq!(history[3].content, "a4");
    }

    #[tokio::test]
    async fn stale_version_remerges_with_append_semantics() {
        let db = Database::open_in_memory().await.unwrap();
        let bot_id = bots::insert_test_bot(&db, 1).await;
        let session = get_or_create(&db, bot_id, 111).await.unwrap();

        // Writer A lands first.
        append_turns(
            &db,
            bot_id,
            111,
            session.history_version,
            vec![turn("user", "first", 0)],
            14,
        )
        .await
        .unwrap();

        // Writer B still holds the old version; its append must land
        // after a silent re-merge rather than fail or overwrite.
        let v = append_turns(
            &db,
            bot_id,
            111,
            session.history_version,
            vec![turn("user", "second", 0)],
            14,
        )
        .await
        .unwrap();
        assert_eq!(v, session.history_version + 2);

        let history = recent_history(&db, bot_id, 111, 14).await.unwrap();
        let contents: Vec<_> = history.iter().map(|h| h.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn avg_completion_tokens_ignores_user_turns() {
        let db = Database::open_in_memory().await.unwrap();
        let bot_id = bots::insert_test_bot(&db, 1).await;
        let mut version = get_or_create(&db, bot_id, 111).await.unwrap().history_version;

        assert!(avg_completion_tokens(&db, bot_id, 111, 10).await.unwrap().is_none());

        for tokens in [100u32, 200, 300] {
            version = append_turns(
                &db,
                bot_id,
                111,
                version,
                vec![turn("user", "q", 0), turn("assistant", "a", tokens)],
                20,
            )
            .await
            .unwrap();
        }

        assert_eq!(avg_completion_tokens(&db, bot_id, 111, 10).await.unwrap(), Some(200));
    }
}
