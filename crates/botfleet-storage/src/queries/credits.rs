// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Credit wallets and the append-only ledger.
//!
//! The wallet balance is a cache of the ledger sum; `recompute` rebuilds
//! it for the self-healing check. Debits insert the ledger row and
//! decrement the balance in one transaction and refuse to drive the
//! balance negative.

use botfleet_core::FleetError;
use rusqlite::params;

use crate::database::{map_tr_err, Database};
use crate::models::LedgerEntry;

pub async fn balance(db: &Database, admin_id: i64) -> Result<i64, FleetError> {
    db.connection()
        .call(move |conn| {
            let mut stmt =
                conn.prepare("SELECT balance_cents FROM credit_wallets WHERE admin_id = ?1")?;
            let mut rows = stmt.query_map(params![admin_id], |row| row.get::<_, i64>(0))?;
            Ok(rows.next().transpose()?.unwrap_or(0))
        })
        .await
        .map_err(map_tr_err)
}

/// Credits the wallet (top-up or refund) and appends the ledger row.
pub async fn credit(
    db: &Database,
    admin_id: i64,
    amount_cents: i64,
    category: &str,
    ref_id: Option<String>,
) -> Result<(), FleetError> {
    if amount_cents <= 0 {
        return Err(FleetError::Validation("credit amount must be positive".into()));
    }
    let category = category.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO credit_wallets (admin_id, balance_cents) VALUES (?1, ?2)
                 ON CONFLICT (admin_id) DO UPDATE SET balance_cents = balance_cents + ?2",
                params![admin_id, amount_cents],
            )?;
            tx.execute(
                "INSERT INTO credit_ledger (admin_id, delta_cents, category, ref)
                 VALUES (?1, ?2, ?3, ?4)",
                params![admin_id, amount_cents, category, ref_id],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Debits usage cost. The post-hoc reconciliation is always applied, so
/// a balance smaller than the cost is clamped to zero rather than
/// refused (the pre-check exists to make that rare).
pub async fn debit(
    db: &Database,
    admin_id: i64,
    amount_cents: i64,
    category: &str,
    ref_id: Option<String>,
) -> Result<(), FleetError> {
    if amount_cents < 0 {
        return Err(FleetError::Validation("debit amount must be non-negative".into()));
    }
    if amount_cents == 0 {
        return Ok(());
    }
    let category = category.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let current: i64 = {
                let mut stmt =
                    tx.prepare("SELECT balance_cents FROM credit_wallets WHERE admin_id = ?1")?;
                let mut rows = stmt.query_map(params![admin_id], |row| row.get(0))?;
                rows.next().transpose()?.unwrap_or(0)
            };
            let applied = amount_cents.min(current);
            tx.execute(
                "INSERT INTO credit_wallets (admin_id, balance_cents) VALUES (?1, 0)
                 ON CONFLICT (admin_id) DO UPDATE SET balance_cents = balance_cents - ?2",
                params![admin_id, applied],
            )?;
            tx.execute(
                "INSERT INTO credit_ledger (admin_id, delta_cents, category, ref)
                 VALUES (?1, ?2, ?3, ?4)",
                params![admin_id, -applied, category, ref_id],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Ledger entries for an admin, oldest first.
pub async fn ledger(db: &Database, admin_id: i64) -> Result<Vec<LedgerEntry>, FleetError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, admin_id, delta_cents, category, ref, created_at
                 FROM credit_ledger WHERE admin_id = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![admin_id], |row| {
                Ok(LedgerEntry {
                    id: row.get(0)?,
                    admin_id: row.get(1)?,
                    delta_cents: row.get(2)?,
                    category: row.get(3)?,
                    ref_id: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, rusqlite::Error>>()?)
        })
        .await
        .map_err(map_tr_err)
}

/// Recomputes the balance from the ledger (self-healing check).
/// Returns (stored, recomputed).
pub async fn recompute(db: &Database, admin_id: i64) -> Result<(i64, i64), FleetError> {
    db.connection()
        .call(move |conn| {
            let stored: i64 = {
                let mut stmt =
                    conn.prepare("SELECT balance_cents FROM credit_wallets WHERE admin_id = ?1")?;
                let mut rows = stmt.query_map(params![admin_id], |row| row.get(0))?;
                rows.next().transpose()?.unwrap_or(0)
            };
            let summed: i64 = conn.query_row(
                "SELECT COALESCE(SUM(delta_cents), 0) FROM credit_ledger WHERE admin_id = ?1",
                params![admin_id],
                |row| row.get(0),
            )?;
            Ok((stored, summed))
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn credit_and_debit_keep_ledger_in_sync() {
        let db = Database::open_in_memory().await.unwrap();

        credit(&db, 777, 10_00, "topup", Some("tx-1".into())).await.unwrap();
        debit(&db, 777, 3_50, "text", Some("msg-1".into())).await.unwrap();
        debit(&db, 777, 1_25, "whisper", Some("audio-1".into())).await.unwrap();

        assert_eq!(balance(&db, 777).await.unwrap(), 5_25);
        let (stored, summed) = recompute(&db, 777).await.unwrap();
        assert_eq!(stored, summed);

        let entries = ledger(&db, 777).await.unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].category, "topup");
        assert_eq!(entries[1].delta_cents, -3_50);
    }

    #[tokio::test]
    async fn balance_never_goes_negative() {
        let db = Database::open_in_memory().await.unwrap();
        credit(&db, 777, 100, "topup", None).await.unwrap();
        // Real cost exceeded the estimate; the debit clamps.
        debit(&db, 777, 150, "text", None).await.unwrap();
        assert_eq!(balance(&db, 777).await.unwrap(), 0);
        let (stored, summed) = recompute(&db, 777).await.unwrap();
        assert_eq!(stored, summed);
    }

    #[tokio::test]
    async fn zero_debit_is_a_noop() {
        let db = Database::open_in_memory().await.unwrap();
        debit(&db, 777, 0, "text", None).await.unwrap();
        assert!(ledger(&db, 777).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_amounts_are_rejected() {
        let db = Database::open_in_memory().await.unwrap();
        assert!(credit(&db, 777, 0, "topup", None).await.is_err());
        assert!(credit(&db, 777, -5, "topup", None).await.is_err());
        assert!(debit(&db, 777, -5, "text", None).await.is_err());
    }

    #[tokio::test]
    async fn unknown_wallet_has_zero_balance() {
        let db = Database::open_in_memory().await.unwrap();
        assert_eq!(balance(&db, 999).await.unwrap(), 0);
    }
}
