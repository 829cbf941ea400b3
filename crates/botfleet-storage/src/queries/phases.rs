// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! AI phase prompts and trigger terms.

use botfleet_core::FleetError;
use rusqlite::params;

use crate::database::{map_tr_err, Database};
use crate::models::{AiConfig, Phase};

fn row_to_phase(row: &rusqlite::Row<'_>) -> Result<Phase, rusqlite::Error> {
    Ok(Phase {
        id: row.get(0)?,
        bot_id: row.get(1)?,
        name: row.get(2)?,
        prompt: row.get(3)?,
        trigger_term: row.get(4)?,
        ordering: row.get(5)?,
    })
}

const PHASE_COLUMNS: &str = "id, bot_id, name, prompt, trigger_term, ordering";

pub async fn create(
    db: &Database,
    bot_id: i64,
    name: String,
    prompt: String,
    trigger_term: Option<String>,
    ordering: i64,
) -> Result<i64, FleetError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO phases (bot_id, name, prompt, trigger_term, ordering)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![bot_id, name, prompt, trigger_term, ordering],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get(db: &Database, phase_id: i64) -> Result<Option<Phase>, FleetError> {
    db.connection()
        .call(move |conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {PHASE_COLUMNS} FROM phases WHERE id = ?1"))?;
            let mut rows = stmt.query_map(params![phase_id], row_to_phase)?;
            Ok(rows.next().transpose()?)
        })
        .await
        .map_err(map_tr_err)
}

/// All phases of a bot in config order (trigger scan order).
pub async fn list_by_bot(db: &Database, bot_id: i64) -> Result<Vec<Phase>, FleetError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PHASE_COLUMNS} FROM phases WHERE bot_id = ?1 ORDER BY ordering, id"
            ))?;
            let rows = stmt.query_map(params![bot_id], row_to_phase)?;
            Ok(rows.collect::<Result<Vec<_>, rusqlite::Error>>()?)
        })
        .await
        .map_err(map_tr_err)
}

/// Per-bot LLM settings; defaults apply when the row is missing.
pub async fn ai_config(db: &Database, bot_id: i64) -> Result<AiConfig, FleetError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT bot_id, general_prompt, temperature, max_tokens, is_enabled
                 FROM ai_configs WHERE bot_id = ?1",
            )?;
            let mut rows = stmt.query_map(params![bot_id], |row| {
                Ok(AiConfig {
                    bot_id: row.get(0)?,
                    general_prompt: row.get(1)?,
                    temperature: row.get(2)?,
                    max_tokens: row.get::<_, i64>(3)? as u32,
                    is_enabled: row.get(4)?,
                })
            })?;
            Ok(rows.next().transpose()?.unwrap_or(AiConfig {
                bot_id,
                general_prompt: None,
                temperature: 0.7,
                max_tokens: 2000,
                is_enabled: true,
            }))
        })
        .await
        .map_err(map_tr_err)
}

pub async fn upsert_ai_config(
    db: &Database,
    bot_id: i64,
    general_prompt: Option<String>,
    temperature: f64,
    max_tokens: u32,
    is_enabled: bool,
) -> Result<(), FleetError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO ai_configs (bot_id, general_prompt, temperature, max_tokens, is_enabled)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (bot_id) DO UPDATE SET
                     general_prompt = excluded.general_prompt,
                     temperature = excluded.temperature,
                     max_tokens = excluded.max_tokens,
                     is_enabled = excluded.is_enabled",
                params![bot_id, general_prompt, temperature, max_tokens, is_enabled],
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
    async fn phases_listed_in_config_order() {
        let db = Database::open_in_memory().await.unwrap();
        let bot_id = bots::insert_test_bot(&db, 1).await;

        create(&db, bot_id, "geral".into(), "prompt".into(), None, 0)
            .await
            .unwrap();
        create(&db, bot_id, "oferta".into(), "pitch".into(), Some("fcf4".into()), 2)
            .await
            .unwrap();
        create(&db, bot_id, "meio".into(), "mid".into(), Some("eko3".into()), 1)
            .await
            .unwrap();

        let phases = list_by_bot(&db, bot_id).await.unwrap();
        let names: Vec<_> = phases.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["geral", "meio", "oferta"]);
    }

    #[tokio::test]
    async fn duplicate_trigger_per_bot_rejected() {
        let db = Database::open_in_memory().await.unwrap();
        let bot_id = bots::insert_test_bot(&db, 1).await;
        create(&db, bot_id, "a".into(), "p".into(), Some("fcf4".into()), 0)
            .await
            .unwrap();
        assert!(
            create(&db, bot_id, "b".into(), "p".into(), Some("fcf4".into()), 1)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn ai_config_defaults_when_missing() {
        let db = Database::open_in_memory().await.unwrap();
        let config = ai_config(&db, 42).await.unwrap();
        assert!(config.is_enabled);
        assert_eq!(config.max_tokens, 2000);

        upsert_ai_config(&db, 42, Some("be nice".into()), 0.3, 512, false)
            .await
            .unwrap();
        let config = ai_config(&db, 42).await.unwrap();
        assert_eq!(config.general_prompt.as_deref(), Some("be nice"));
        assert!(!config.is_enabled);
        assert_eq!(config.max_tokens, 512);
    }
}
