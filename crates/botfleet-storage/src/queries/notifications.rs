// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sale notification rows.
//!
//! The UNIQUE constraint on `transaction_id` is the exactly-once
//! mechanism for the sale-approved fan-out: concurrent inserters race
//! on it and only the first writer proceeds.

use botfleet_core::FleetError;
use rusqlite::params;

use crate::database::{map_tr_err, Database};
use crate::models::SaleNotification;

/// Inserts the pending row for a transaction.
///
/// Returns true when this caller created the row (fan-out owner),
/// false when it already existed (another worker is handling it).
pub async fn try_insert_pending(
    db: &Database,
    transaction_id: i64,
    admin_id: i64,
    channel_id: Option<i64>,
) -> Result<bool, FleetError> {
    db.connection()
        .call(move |conn| {
            let inserted = conn.execute(
                "INSERT INTO sale_notifications (transaction_id, admin_id, channel_id, status)
                 VALUES (?1, ?2, ?3, 'pending')
                 ON CONFLICT (transaction_id) DO NOTHING",
                params![transaction_id, admin_id, channel_id],
            )?;
            Ok(inserted == 1)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get(
    db: &Database,
    transaction_id: i64,
) -> Result<Option<SaleNotification>, FleetError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, transaction_id, admin_id, channel_id, status, sent_at
                 FROM sale_notifications WHERE transaction_id = ?1",
            )?;
            let mut rows = stmt.query_map(params![transaction_id], |row| {
                Ok(SaleNotification {
                    id: row.get(0)?,
                    transaction_id: row.get(1)?,
                    admin_id: row.get(2)?,
                    channel_id: row.get(3)?,
                    status: row.get(4)?,
                    sent_at: row.get(5)?,
                })
            })?;
            Ok(rows.next().transpose()?)
        })
        .await
        .map_err(map_tr_err)
}

/// Moves a pending row to sent/skipped/failed.
pub async fn set_status(
    db: &Database,
    transaction_id: i64,
    status: &str,
) -> Result<(), FleetError> {
    let status = status.to_string();
    let stamp = status == "sent";
    db.connection()
        .call(move |conn| {
            if stamp {
                conn.execute(
                    "UPDATE sale_notifications
                     SET status = ?1, sent_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                     WHERE transaction_id = ?2",
                    params![status, transaction_id],
                )?;
            } else {
                conn.execute(
                    "UPDATE sale_notifications SET status = ?1 WHERE transaction_id = ?2",
                    params![status, transaction_id],
                )?;
            }
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}
