// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! PIX transaction repository.
//!
//! Status machine: created -> pending -> paid -> delivered, with side
//! branches to expired and failed. Transitions out of a terminal state
//! are refused here rather than left to callers.

use std::str::FromStr;

use botfleet_core::FleetError;
use rusqlite::params;

use crate::database::{map_tr_err, Database};
use crate::models::{PixCategory, PixStatus, PixTransaction};

fn row_to_tx(row: &rusqlite::Row<'_>) -> Result<PixTransaction, rusqlite::Error> {
    let category: String = row.get(7)?;
    let status: String = row.get(11)?;
    Ok(PixTransaction {
        id: row.get(0)?,
        bot_id: row.get(1)?,
        user_telegram_id: row.get(2)?,
        chat_id: row.get(3)?,
        offer_id: row.get(4)?,
        upsell_id: row.get(5)?,
        tracker_id: row.get(6)?,
        category: PixCategory::from_str(&category).map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(
                7,
                rusqlite::types::Type::Text,
                format!("unknown pix category {category}").into(),
            )
        })?,
        external_id: row.get(8)?,
        qr_code: row.get(9)?,
        amount_cents: row.get(10)?,
        status: PixStatus::from_str(&status).map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(
                11,
                rusqlite::types::Type::Text,
                format!("unknown pix status {status}").into(),
            )
        })?,
        created_at: row.get(12)?,
        paid_at: row.get(13)?,
        delivered_at: row.get(14)?,
    })
}

const TX_COLUMNS: &str = "id, bot_id, user_telegram_id, chat_id, offer_id, upsell_id, \
                          tracker_id, category, external_id, qr_code, amount_cents, status, \
                          created_at, paid_at, delivered_at";

/// Parameters for a new transaction row.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub bot_id: i64,
    pub user_telegram_id: i64,
    pub chat_id: i64,
    pub offer_id: Option<i64>,
    pub upsell_id: Option<i64>,
    pub tracker_id: Option<i64>,
    pub category: PixCategory,
    pub external_id: String,
    pub qr_code: String,
    pub amount_cents: i64,
}

pub async fn create(db: &Database, tx: NewTransaction) -> Result<i64, FleetError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO pix_transactions
                     (bot_id, user_telegram_id, chat_id, offer_id, upsell_id, tracker_id,
                      category, external_id, qr_code, amount_cents, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'created')",
                params![
                    tx.bot_id,
                    tx.user_telegram_id,
                    tx.chat_id,
                    tx.offer_id,
                    tx.upsell_id,
                    tx.tracker_id,
                    tx.category.to_string(),
                    tx.external_id,
                    tx.qr_code,
                    tx.amount_cents,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get(db: &Database, id: i64) -> Result<Option<PixTransaction>, FleetError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TX_COLUMNS} FROM pix_transactions WHERE id = ?1"
            ))?;
            let mut rows = stmt.query_map(params![id], row_to_tx)?;
            Ok(rows.next().transpose()?)
        })
        .await
        .map_err(map_tr_err)
}

/// Most recent non-terminal transaction of a user (debug tooling).
pub async fn latest_pending_for_user(
    db: &Database,
    bot_id: i64,
    user_telegram_id: i64,
) -> Result<Option<PixTransaction>, FleetError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TX_COLUMNS} FROM pix_transactions
                 WHERE bot_id = ?1 AND user_telegram_id = ?2
                   AND status IN ('created', 'pending')
                 ORDER BY id DESC LIMIT 1"
            ))?;
            let mut rows = stmt.query_map(params![bot_id, user_telegram_id], row_to_tx)?;
            Ok(rows.next().transpose()?)
        })
        .await
        .map_err(map_tr_err)
}

/// Lookup by the gateway-side id (webhook callbacks).
pub async fn get_by_external(
    db: &Database,
    external_id: &str,
) -> Result<Option<PixTransaction>, FleetError> {
    let external_id = external_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TX_COLUMNS} FROM pix_transactions WHERE external_id = ?1"
            ))?;
            let mut rows = stmt.query_map(params![external_id], row_to_tx)?;
            Ok(rows.next().transpose()?)
        })
        .await
        .map_err(map_tr_err)
}

/// Transition to a new status; terminal states are immutable and
/// `paid` stamps `paid_at` once.
pub async fn set_status(db: &Database, id: i64, status: PixStatus) -> Result<(), FleetError> {
    let current = get(db, id)
        .await?
        .ok_or_else(|| FleetError::Consistency(format!("transaction {id} not found")))?;
    if current.status.is_terminal() {
        return Err(FleetError::Consistency(format!(
            "transaction {id} is terminal ({})",
            current.status
        )));
    }
    let status_text = status.to_string();
    let stamp_paid = status == PixStatus::Paid && current.paid_at.is_none();
    db.connection()
        .call(move |conn| {
            if stamp_paid {
                conn.execute(
                    "UPDATE pix_transactions
                     SET status = ?1, paid_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                     WHERE id = ?2",
                    params![status_text, id],
                )?;
            } else {
                conn.execute(
                    "UPDATE pix_transactions SET status = ?1 WHERE id = ?2",
                    params![status_text, id],
                )?;
            }
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Marks a paid transaction delivered. Returns false when another
/// worker delivered it first.
pub async fn mark_delivered(db: &Database, id: i64) -> Result<bool, FleetError> {
    db.connection()
        .call(move |conn| {
            let updated = conn.execute(
                "UPDATE pix_transactions
                 SET status = 'delivered', delivered_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?1 AND status = 'paid' AND delivered_at IS NULL",
                params![id],
            )?;
            Ok(updated == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Non-terminal transactions younger than `max_age_minutes`, for the
/// polling sweep.
pub async fn pending_for_verification(
    db: &Database,
    max_age_minutes: i64,
) -> Result<Vec<PixTransaction>, FleetError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TX_COLUMNS} FROM pix_transactions
                 WHERE status IN ('created', 'pending')
                   AND created_at >= strftime('%Y-%m-%dT%H:%M:%fZ', 'now', ?1)
                 ORDER BY created_at"
            ))?;
            let modifier = format!("-{max_age_minutes} minutes");
            let rows = stmt.query_map(params![modifier], row_to_tx)?;
            Ok(rows.collect::<Result<Vec<_>, rusqlite::Error>>()?)
        })
        .await
        .map_err(map_tr_err)
}

/// Stale non-terminal transactions past the payment window.
pub async fn expire_older_than(db: &Database, max_age_minutes: i64) -> Result<usize, FleetError> {
    db.connection()
        .call(move |conn| {
            let modifier = format!("-{max_age_minutes} minutes");
            let updated = conn.execute(
                "UPDATE pix_transactions SET status = 'expired'
                 WHERE status IN ('created', 'pending')
                   AND created_at < strftime('%Y-%m-%dT%H:%M:%fZ', 'now', ?1)",
                params![modifier],
            )?;
            Ok(updated)
        })
        .await
        .map_err(map_tr_err)
}

/// Pending transactions of a user for an offer within the last
/// `minutes` (manual-verification lookup).
pub async fn pending_by_user_offer(
    db: &Database,
    bot_id: i64,
    user_telegram_id: i64,
    offer_id: i64,
    minutes: i64,
) -> Result<Vec<PixTransaction>, FleetError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TX_COLUMNS} FROM pix_transactions
                 WHERE bot_id = ?1 AND user_telegram_id = ?2 AND offer_id = ?3
                   AND status IN ('created', 'pending')
                   AND created_at >= strftime('%Y-%m-%dT%H:%M:%fZ', 'now', ?4)
                 ORDER BY created_at DESC"
            ))?;
            let modifier = format!("-{minutes} minutes");
            let rows = stmt.query_map(
                params![bot_id, user_telegram_id, offer_id, modifier],
                row_to_tx,
            )?;
            Ok(rows.collect::<Result<Vec<_>, rusqlite::Error>>()?)
        })
        .await
        .map_err(map_tr_err)
}

/// Prior purchases of a user, excluding one transaction (the one being
/// fanned out). Default counts delivered only; the widened gate counts
/// any paid.
pub async fn prior_paid_count(
    db: &Database,
    bot_id: i64,
    user_telegram_id: i64,
    exclude_tx_id: i64,
    include_undelivered: bool,
) -> Result<i64, FleetError> {
    db.connection()
        .call(move |conn| {
            let sql = if include_undelivered {
                "SELECT COUNT(*) FROM pix_transactions
                 WHERE bot_id = ?1 AND user_telegram_id = ?2 AND id != ?3
                   AND status IN ('paid', 'delivered')"
            } else {
                "SELECT COUNT(*) FROM pix_transactions
                 WHERE bot_id = ?1 AND user_telegram_id = ?2 AND id != ?3
                   AND status = 'delivered'"
            };
            conn.query_row(sql, params![bot_id, user_telegram_id, exclude_tx_id], |row| {
                row.get(0)
            })
        })
        .await
        .map_err(map_tr_err)
}

/// Whether the user has a delivered transaction (default upsell
/// activation gate) or any paid one (widened gate / paying-user skip).
pub async fn user_has_paid(
    db: &Database,
    bot_id: i64,
    user_telegram_id: i64,
    include_undelivered: bool,
) -> Result<bool, FleetError> {
    db.connection()
        .call(move |conn| {
            let sql = if include_undelivered {
                "SELECT COUNT(*) FROM pix_transactions
                 WHERE bot_id = ?1 AND user_telegram_id = ?2 AND status IN ('paid', 'delivered')"
            } else {
                "SELECT COUNT(*) FROM pix_transactions
                 WHERE bot_id = ?1 AND user_telegram_id = ?2 AND status = 'delivered'"
            };
            let count: i64 =
                conn.query_row(sql, params![bot_id, user_telegram_id], |row| row.get(0))?;
            Ok(count > 0)
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::bots;

    fn new_tx(bot_id: i64, external: &str) -> NewTransaction {
        NewTransaction {
            bot_id,
            user_telegram_id: 111,
            chat_id: 111,
            offer_id: None,
            upsell_id: None,
            tracker_id: None,
            category: PixCategory::Offer,
            external_id: external.into(),
            qr_code: "00020126...".into(),
            amount_cents: 790,
        }
    }

    #[tokio::test]
    async fn lifecycle_created_to_delivered() {
        let db = Database::open_in_memory().await.unwrap();
        let bot_id = bots::insert_test_bot(&db, 1).await;
        let id = create(&db, new_tx(bot_id, "ext-1")).await.unwrap();

        set_status(&db, id, PixStatus::Pending).await.unwrap();
        set_status(&db, id, PixStatus::Paid).await.unwrap();
        let tx = get(&db, id).await.unwrap().unwrap();
        assert_eq!(tx.status, PixStatus::Paid);
        assert!(tx.paid_at.is_some());

        assert!(mark_delivered(&db, id).await.unwrap());
        assert!(!mark_delivered(&db, id).await.unwrap(), "delivery is one-shot");

        let tx = get(&db, id).await.unwrap().unwrap();
        assert_eq!(tx.status, PixStatus::Delivered);
    }

    #[tokio::test]
    async fn terminal_states_are_immutable() {
        let db = Database::open_in_memory().await.unwrap();
        let bot_id = bots::insert_test_bot(&db, 1).await;
        let id = create(&db, new_tx(bot_id, "ext-2")).await.unwrap();
        set_status(&db, id, PixStatus::Expired).await.unwrap();
        let err = set_status(&db, id, PixStatus::Paid).await.unwrap_err();
        assert!(matches!(err, FleetError::Consistency(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn external_id_is_unique() {
        let db = Database::open_in_memory().await.unwrap();
        let bot_id = bots::insert_test_bot(&db, 1).await;
        create(&db, new_tx(bot_id, "ext-3")).await.unwrap();
        assert!(create(&db, new_tx(bot_id, "ext-3")).await.is_err());
    }

    #[tokio::test]
    async fn user_has_paid_distinguishes_delivered() {
        let db = Database::open_in_memory().await.unwrap();
        let bot_id = bots::insert_test_bot(&db, 1).await;
        let id = create(&db, new_tx(bot_id, "ext-4")).await.unwrap();

        assert!(!user_has_paid(&db, bot_id, 111, true).await.unwrap());
        set_status(&db, id, PixStatus::Paid).await.unwrap();
        assert!(user_has_paid(&db, bot_id, 111, true).await.unwrap());
        assert!(!user_has_paid(&db, bot_id, 111, false).await.unwrap());
        mark_delivered(&db, id).await.unwrap();
        assert!(user_has_paid(&db, bot_id, 111, false).await.unwrap());
    }

    #[tokio::test]
    async fn pending_sweep_and_expiry() {
        let db = Database::open_in_memory().await.unwrap();
        let bot_id = bots::insert_test_bot(&db, 1).await;
        let id = create(&db, new_tx(bot_id, "ext-5")).await.unwrap();

        let pending = pending_for_verification(&db, 10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id);

        // Fresh rows are not expired by the 10-minute cutoff.
        assert_eq!(expire_older_than(&db, 10).await.unwrap(), 0);
        // A zero-minute cutoff catches everything.
        assert_eq!(expire_older_than(&db, 0).await.unwrap(), 1);
        assert_eq!(
            get(&db, id).await.unwrap().unwrap().status,
            PixStatus::Expired
        );
    }
}
