// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management with PRAGMA setup, WAL mode, and lifecycle.
//!
//! All writes are serialized through tokio-rusqlite's single background
//! thread. Do NOT create additional Connection instances for writes.

use botfleet_core::FleetError;
use tokio_rusqlite::Connection;

use crate::migrations::run_migrations;

/// Current UTC timestamp in the canonical storage format.
///
/// Millisecond precision, `Z` suffix -- lexicographic order equals
/// chronological order, which the due-row scans rely on.
pub fn now_iso() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Convert a tokio-rusqlite error into FleetError::Storage.
pub(crate) fn map_tr_err(e: tokio_rusqlite::Error) -> FleetError {
    FleetError::Storage {
        source: Box::new(e),
    }
}

/// Handle to the WAL-mode SQLite database.
#[derive(Clone)]
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens (creating if needed) the database at `path`, applies
    /// PRAGMAs and runs pending migrations.
    pub async fn open(path: &str) -> Result<Self, FleetError> {
        let conn = Connection::open(path).await.map_err(map_tr_err)?;
        Self::initialize(conn).await
    }

    /// In-memory database for tests.
    pub async fn open_in_memory() -> Result<Self, FleetError> {
        let conn = Connection::open_in_memory().await.map_err(map_tr_err)?;
        Self::initialize(conn).await
    }

    async fn initialize(conn: Connection) -> Result<Self, FleetError> {
        conn.call(|conn| -> Result<(), tokio_rusqlite::Error> {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA busy_timeout = 5000;",
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)?;

        conn.call(|conn| -> Result<(), tokio_rusqlite::Error> {
            run_migrations(conn).map_err(|e| {
                rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::other(
                    e.to_string(),
                )))
            })?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)?;

        Ok(Self { conn })
    }

    /// The underlying tokio-rusqlite connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Cheap reachability check used by /health and `doctor`.
    pub async fn ping(&self) -> Result<(), FleetError> {
        self.conn
            .call(|conn| -> Result<i64, tokio_rusqlite::Error> {
                Ok(conn.query_row("SELECT 1", [], |row| row.get(0))?)
            })
            .await
            .map_err(map_tr_err)?;
        Ok(())
    }

    /// Flushes and closes the background connection.
    pub async fn close(self) -> Result<(), FleetError> {
        self.conn
            .close()
            .await
            .map_err(|e| FleetError::Storage {
                source: Box::new(e),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn open_runs_migrations() {
        let db = Database::open_in_memory().await.unwrap();
        let tables: Vec<String> = db
            .connection()
            .call(|conn| -> Result<Vec<String>, tokio_rusqlite::Error> {
                let mut stmt =
                    conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table'")?;
                let rows = stmt.query_map([], |row| row.get(0))?;
                Ok(rows.collect::<Result<Vec<_>, rusqlite::Error>>()?)
            })
            .await
            .unwrap();
        for table in [
            "bots",
            "users",
            "sessions",
            "conversation_history",
            "phases",
            "blocks",
            "offers",
            "actions",
            "upsells",
            "upsell_deliveries",
            "recovery_campaigns",
            "recovery_steps",
            "recovery_deliveries",
            "media_cache",
            "pix_transactions",
            "sale_notifications",
            "credit_wallets",
            "credit_ledger",
            "trackers",
            "tracker_attributions",
            "tracker_daily_stats",
            "bot_tracking_configs",
            "start_templates",
            "start_message_status",
            "task_queue",
            "task_dead_letters",
        ] {
            assert!(tables.iter().any(|t| t == table), "missing table {table}");
        }
    }

    #[tokio::test]
    async fn open_on_disk_is_wal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let db = Database::open(path.to_str().unwrap()).await.unwrap();
        let mode: String = db
            .connection()
            .call(|conn| -> Result<String, tokio_rusqlite::Error> {
                conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))
            })
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
        db.close().await.unwrap();
    }

    #[test]
    fn now_iso_is_sortable_utc() {
        let a = now_iso();
        let b = now_iso();
        assert!(a <= b);
        assert!(a.ends_with('Z'));
    }
}
