// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Crash-safe task queue operations.
//!
//! Claims are transactional: the oldest due pending row flips to
//! `processing` with a lock timeout. Acks are late -- a worker crash
//! leaves the row locked until `reclaim_expired` returns it to pending.

use botfleet_core::FleetError;
use rusqlite::params;

use crate::database::{map_tr_err, Database};
use crate::models::TaskRow;

fn row_to_task(row: &rusqlite::Row<'_>) -> Result<TaskRow, rusqlite::Error> {
    Ok(TaskRow {
        id: row.get(0)?,
        queue_name: row.get(1)?,
        task_name: row.get(2)?,
        payload: row.get(3)?,
        status: row.get(4)?,
        attempts: row.get(5)?,
        max_attempts: row.get(6)?,
        scheduled_for: row.get(7)?,
        locked_until: row.get(8)?,
    })
}

const TASK_COLUMNS: &str =
    "id, queue_name, task_name, payload, status, attempts, max_attempts, scheduled_for, locked_until";

/// Enqueues a task. Returns `None` when an idempotency key collided
/// (the task is already queued or ran).
pub async fn enqueue(
    db: &Database,
    queue_name: &str,
    task_name: &str,
    payload: String,
    idempotency_key: Option<String>,
    max_attempts: i64,
    scheduled_for: Option<String>,
) -> Result<Option<i64>, FleetError> {
    let queue_name = queue_name.to_string();
    let task_name = task_name.to_string();
    db.connection()
        .call(move |conn| {
            let inserted = conn.execute(
                "INSERT INTO task_queue
                     (queue_name, task_name, payload, idempotency_key, max_attempts, scheduled_for)
                 VALUES (?1, ?2, ?3, ?4, ?5,
                         COALESCE(?6, strftime('%Y-%m-%dT%H:%M:%fZ', 'now')))
                 ON CONFLICT (idempotency_key) DO NOTHING",
                params![
                    queue_name,
                    task_name,
                    payload,
                    idempotency_key,
                    max_attempts,
                    scheduled_for,
                ],
            )?;
            if inserted == 1 {
                Ok(Some(conn.last_insert_rowid()))
            } else {
                Ok(None)
            }
        })
        .await
        .map_err(map_tr_err)
}

/// Claims the next due task of a queue, if any.
pub async fn claim(
    db: &Database,
    queue_name: &str,
    now_iso: String,
) -> Result<Option<TaskRow>, FleetError> {
    let queue_name = queue_name.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let due: Option<TaskRow> = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {TASK_COLUMNS} FROM task_queue
                     WHERE queue_name = ?1 AND status = 'pending' AND scheduled_for <= ?2
                     ORDER BY scheduled_for ASC, id ASC
                     LIMIT 1"
                ))?;
                let mut rows = stmt.query_map(params![queue_name, now_iso], row_to_task)?;
                rows.next().transpose()?
            };

            match due {
                Some(task) => {
                    tx.execute(
                        "UPDATE task_queue SET status = 'processing',
                             locked_until = strftime('%Y-%m-%dT%H:%M:%fZ', 'now', '+5 minutes'),
                             updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                         WHERE id = ?1",
                        params![task.id],
                    )?;
                    tx.commit()?;
                    Ok(Some(TaskRow {
                        status: "processing".to_string(),
                        ..task
                    }))
                }
                None => {
                    tx.commit()?;
                    Ok(None)
                }
            }
        })
        .await
        .map_err(map_tr_err)
}

/// Late ack after successful processing.
pub async fn ack(db: &Database, task_id: i64) -> Result<(), FleetError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE task_queue SET status = 'completed', locked_until = NULL,
                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?1",
                params![task_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// What happened to a failed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Re-queued with the given delay applied.
    Retried,
    /// Retry budget exhausted; copied to the dead-letter table.
    DeadLettered,
}

/// Records a failure: retries with `retry_delay_secs` backoff, or moves
/// the task to the dead-letter sink when attempts are exhausted.
/// `fatal` dead-letters immediately regardless of remaining attempts.
pub async fn fail(
    db: &Database,
    task_id: i64,
    error: String,
    retry_delay_secs: u64,
    fatal: bool,
) -> Result<FailOutcome, FleetError> {
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let task: TaskRow = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {TASK_COLUMNS} FROM task_queue WHERE id = ?1"
                ))?;
                stmt.query_row(params![task_id], row_to_task)?
            };

            let attempts = task.attempts + 1;
            let exhausted = fatal || attempts >= task.max_attempts;
            if exhausted {
                tx.execute(
                    "INSERT INTO task_dead_letters
                         (task_id, queue_name, task_name, payload, error, attempts)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        task.id,
                        task.queue_name,
                        task.task_name,
                        task.payload,
                        error,
                        attempts,
                    ],
                )?;
                tx.execute(
                    "UPDATE task_queue SET status = 'dead', attempts = ?1, locked_until = NULL,
                     updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                     WHERE id = ?2",
                    params![attempts, task.id],
                )?;
                tx.commit()?;
                Ok(FailOutcome::DeadLettered)
            } else {
                let modifier = format!("+{retry_delay_secs} seconds");
                tx.execute(
                    "UPDATE task_queue SET status = 'pending', attempts = ?1,
                         locked_until = NULL,
                         scheduled_for = strftime('%Y-%m-%dT%H:%M:%fZ', 'now', ?2),
                         updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                     WHERE id = ?3",
                    params![attempts, modifier, task.id],
                )?;
                tx.commit()?;
                Ok(FailOutcome::Retried)
            }
        })
        .await
        .map_err(map_tr_err)
}

/// Returns expired `processing` rows to pending (crashed workers).
pub async fn reclaim_expired(db: &Database, now_iso: String) -> Result<usize, FleetError> {
    db.connection()
        .call(move |conn| {
            let reclaimed = conn.execute(
                "UPDATE task_queue SET status = 'pending', locked_until = NULL,
                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE status = 'processing' AND locked_until IS NOT NULL AND locked_until < ?1",
                params![now_iso],
            )?;
            Ok(reclaimed)
        })
        .await
        .map_err(map_tr_err)
}

/// Pending backlog of one queue (health/metrics).
pub async fn depth(db: &Database, queue_name: &str) -> Result<i64, FleetError> {
    let queue_name = queue_name.to_string();
    db.connection()
        .call(move |conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM task_queue WHERE queue_name = ?1 AND status = 'pending'",
                params![queue_name],
                |row| row.get(0),
            )?)
        })
        .await
        .map_err(map_tr_err)
}

/// Total dead letters (health/metrics).
pub async fn dead_letter_count(db: &Database) -> Result<i64, FleetError> {
    db.connection()
        .call(move |conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM task_dead_letters", [], |row| row.get(0))?)
        })
        .await
        .map_err(map_tr_err)
}
