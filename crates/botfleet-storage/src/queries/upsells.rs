// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Upsell definitions and per-user delivery rows.
//!
//! Delivery rows are created once per (bot, user, upsell) when the
//! first sale activates the flow; `sent_at IS NULL` means "armed or
//! scheduled", and once set it never changes.

use botfleet_core::FleetError;
use rusqlite::params;

use crate::database::{map_tr_err, Database};
use crate::models::{Upsell, UpsellDelivery};

fn row_to_upsell(row: &rusqlite::Row<'_>) -> Result<Upsell, rusqlite::Error> {
    Ok(Upsell {
        id: row.get(0)?,
        bot_id: row.get(1)?,
        name: row.get(2)?,
        ordinal: row.get(3)?,
        is_preset: row.get(4)?,
        trigger_term: row.get(5)?,
        phase_prompt: row.get(6)?,
        price_cents: row.get(7)?,
        is_immediate: row.get(8)?,
        days_after: row.get(9)?,
        hours_after: row.get(10)?,
        minutes_after: row.get(11)?,
        is_active: row.get(12)?,
    })
}

const UPSELL_COLUMNS: &str = "id, bot_id, name, ordinal, is_preset, trigger_term, phase_prompt, \
                              price_cents, is_immediate, days_after, hours_after, minutes_after, \
                              is_active";

fn row_to_delivery(row: &rusqlite::Row<'_>) -> Result<UpsellDelivery, rusqlite::Error> {
    Ok(UpsellDelivery {
        id: row.get(0)?,
        bot_id: row.get(1)?,
        user_telegram_id: row.get(2)?,
        upsell_id: row.get(3)?,
        scheduled_for: row.get(4)?,
        sent_at: row.get(5)?,
        paid_at: row.get(6)?,
        transaction_id: row.get(7)?,
    })
}

const DELIVERY_COLUMNS: &str =
    "id, bot_id, user_telegram_id, upsell_id, scheduled_for, sent_at, paid_at, transaction_id";

#[allow(clippy::too_many_arguments)]
pub async fn create(
    db: &Database,
    bot_id: i64,
    name: String,
    ordinal: i64,
    trigger_term: Option<String>,
    phase_prompt: Option<String>,
    price_cents: i64,
    is_immediate: bool,
    days_after: i64,
    hours_after: i64,
    minutes_after: i64,
) -> Result<i64, FleetError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO upsells
                     (bot_id, name, ordinal, is_preset, trigger_term, phase_prompt,
                      price_cents, is_immediate, days_after, hours_after, minutes_after)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    bot_id,
                    name,
                    ordinal,
                    ordinal == 1,
                    trigger_term,
                    phase_prompt,
                    price_cents,
                    is_immediate,
                    days_after,
                    hours_after,
                    minutes_after,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get(db: &Database, upsell_id: i64) -> Result<Option<Upsell>, FleetError> {
    db.connection()
        .call(move |conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {UPSELL_COLUMNS} FROM upsells WHERE id = ?1"))?;
            let mut rows = stmt.query_map(params![upsell_id], row_to_upsell)?;
            Ok(rows.next().transpose()?)
        })
        .await
        .map_err(map_tr_err)
}

/// Active upsells in ordinal order.
pub async fn list_active(db: &Database, bot_id: i64) -> Result<Vec<Upsell>, FleetError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {UPSELL_COLUMNS} FROM upsells
                 WHERE bot_id = ?1 AND is_active = 1 ORDER BY ordinal"
            ))?;
            let rows = stmt.query_map(params![bot_id], row_to_upsell)?;
            Ok(rows.collect::<Result<Vec<_>, rusqlite::Error>>()?)
        })
        .await
        .map_err(map_tr_err)
}

/// Creates the delivery row for one upsell, idempotently.
///
/// `scheduled_for` is NULL for trigger-armed upsells.
pub async fn ensure_delivery(
    db: &Database,
    bot_id: i64,
    user_telegram_id: i64,
    upsell_id: i64,
    scheduled_for: Option<String>,
) -> Result<(), FleetError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO upsell_deliveries (bot_id, user_telegram_id, upsell_id, scheduled_for)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (bot_id, user_telegram_id, upsell_id) DO NOTHING",
                params![bot_id, user_telegram_id, upsell_id, scheduled_for],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Whether any delivery rows exist (flow already activated).
pub async fn flow_activated(
    db: &Database,
    bot_id: i64,
    user_telegram_id: i64,
) -> Result<bool, FleetError> {
    db.connection()
        .call(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM upsell_deliveries
                 WHERE bot_id = ?1 AND user_telegram_id = ?2",
                params![bot_id, user_telegram_id],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
        .await
        .map_err(map_tr_err)
}

/// The armed, unsent delivery for a trigger-based upsell, if any.
pub async fn armed_delivery(
    db: &Database,
    bot_id: i64,
    user_telegram_id: i64,
    upsell_id: i64,
) -> Result<Option<UpsellDelivery>, FleetError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {DELIVERY_COLUMNS} FROM upsell_deliveries
                 WHERE bot_id = ?1 AND user_telegram_id = ?2 AND upsell_id = ?3
                   AND sent_at IS NULL"
            ))?;
            let mut rows =
                stmt.query_map(params![bot_id, user_telegram_id, upsell_id], row_to_delivery)?;
            Ok(rows.next().transpose()?)
        })
        .await
        .map_err(map_tr_err)
}

/// Claims one due scheduled delivery for dispatch.
///
/// The claim is the `sent_at` stamp itself, applied only when still
/// NULL, so two sweep workers can never both dispatch the same row.
pub async fn claim_due_delivery(
    db: &Database,
    now_iso: String,
) -> Result<Option<UpsellDelivery>, FleetError> {
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let due: Option<UpsellDelivery> = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {DELIVERY_COLUMNS} FROM upsell_deliveries
                     WHERE scheduled_for IS NOT NULL AND scheduled_for <= ?1
                       AND sent_at IS NULL
                     ORDER BY scheduled_for ASC LIMIT 1"
                ))?;
                let mut rows = stmt.query_map(params![now_iso], row_to_delivery)?;
                rows.next().transpose()?
            };

            let claimed = match due {
                Some(delivery) => {
                    let updated = tx.execute(
                        "UPDATE upsell_deliveries
                         SET sent_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                         WHERE id = ?1 AND sent_at IS NULL",
                        params![delivery.id],
                    )?;
                    if updated == 1 {
                        Some(delivery)
                    } else {
                        None
                    }
                }
                None => None,
            };
            tx.commit()?;
            Ok(claimed)
        })
        .await
        .map_err(map_tr_err)
}

/// Stamps `sent_at` on a trigger-armed delivery. Returns false when the
/// row was already sent (another worker won).
pub async fn mark_sent(db: &Database, delivery_id: i64) -> Result<bool, FleetError> {
    db.connection()
        .call(move |conn| {
            let updated = conn.execute(
                "UPDATE upsell_deliveries
                 SET sent_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?1 AND sent_at IS NULL",
                params![delivery_id],
            )?;
            Ok(updated == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Records payment of an upsell delivery.
pub async fn mark_paid(
    db: &Database,
    bot_id: i64,
    user_telegram_id: i64,
    upsell_id: i64,
    transaction_id: i64,
) -> Result<(), FleetError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE upsell_deliveries
                 SET paid_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now'), transaction_id = ?1
                 WHERE bot_id = ?2 AND user_telegram_id = ?3 AND upsell_id = ?4",
                params![transaction_id, bot_id, user_telegram_id, upsell_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}
