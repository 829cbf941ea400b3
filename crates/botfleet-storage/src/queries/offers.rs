// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Offer repository. Names are the case-insensitive detection targets.

use botfleet_core::FleetError;
use rusqlite::params;

use crate::database::{map_tr_err, Database};
use crate::models::Offer;

fn row_to_offer(row: &rusqlite::Row<'_>) -> Result<Offer, rusqlite::Error> {
    Ok(Offer {
        id: row.get(0)?,
        bot_id: row.get(1)?,
        name: row.get(2)?,
        price_cents: row.get(3)?,
        currency: row.get(4)?,
        manual_verification_trigger: row.get(5)?,
        discount_trigger: row.get(6)?,
        is_active: row.get(7)?,
    })
}

const OFFER_COLUMNS: &str = "id, bot_id, name, price_cents, currency, \
                             manual_verification_trigger, discount_trigger, is_active";

pub async fn create(
    db: &Database,
    bot_id: i64,
    name: String,
    price_cents: i64,
) -> Result<i64, FleetError> {
    if name.trim().is_empty() || name.len() > 128 {
        return Err(FleetError::Validation(
            "offer name must be 1..=128 characters".into(),
        ));
    }
    if price_cents < 50 {
        return Err(FleetError::Validation("offer price minimum is 50 cents".into()));
    }
    let inserted = db
        .connection()
        .call(move |conn| {
            let exists: i64 = conn.query_row(
                "SELECT COUNT(*) FROM offers WHERE bot_id = ?1 AND lower(name) = lower(?2)",
                params![bot_id, name],
                |row| row.get(0),
            )?;
            if exists > 0 {
                return Ok(None);
            }
            conn.execute(
                "INSERT INTO offers (bot_id, name, price_cents) VALUES (?1, ?2, ?3)",
                params![bot_id, name, price_cents],
            )?;
            Ok(Some(conn.last_insert_rowid()))
        })
        .await
        .map_err(map_tr_err)?;
    inserted.ok_or_else(|| FleetError::Validation("an offer with this name already exists".into()))
}

pub async fn get(db: &Database, offer_id: i64) -> Result<Option<Offer>, FleetError> {
    db.connection()
        .call(move |conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {OFFER_COLUMNS} FROM offers WHERE id = ?1"))?;
            let mut rows = stmt.query_map(params![offer_id], row_to_offer)?;
            Ok(rows.next().transpose()?)
        })
        .await
        .map_err(map_tr_err)
}

/// Active offers in config order, the trigger-scan order.
pub async fn list_active(db: &Database, bot_id: i64) -> Result<Vec<Offer>, FleetError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {OFFER_COLUMNS} FROM offers
                 WHERE bot_id = ?1 AND is_active = 1 ORDER BY id"
            ))?;
            let rows = stmt.query_map(params![bot_id], row_to_offer)?;
            Ok(rows.collect::<Result<Vec<_>, rusqlite::Error>>()?)
        })
        .await
        .map_err(map_tr_err)
}

/// Case-insensitive exact-name lookup (debug commands).
pub async fn get_by_name(
    db: &Database,
    bot_id: i64,
    name: &str,
) -> Result<Option<Offer>, FleetError> {
    let name = name.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {OFFER_COLUMNS} FROM offers
                 WHERE bot_id = ?1 AND lower(name) = lower(?2)"
            ))?;
            let mut rows = stmt.query_map(params![bot_id, name], row_to_offer)?;
            Ok(rows.next().transpose()?)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn set_manual_verification_trigger(
    db: &Database,
    offer_id: i64,
    trigger: Option<String>,
) -> Result<(), FleetError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE offers SET manual_verification_trigger = ?1 WHERE id = ?2",
                params![trigger, offer_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn set_discount_trigger(
    db: &Database,
    offer_id: i64,
    trigger: Option<String>,
) -> Result<(), FleetError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE offers SET discount_trigger = ?1 WHERE id = ?2",
                params![trigger, offer_id],
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
    async fn name_uniqueness_is_case_insensitive() {
        let db = Database::open_in_memory().await.unwrap();
        let bot_id = bots::insert_test_bot(&db, 1).await;

        create(&db, bot_id, "Curso Premium".into(), 790).await.unwrap();
        let err = create(&db, bot_id, "curso premium".into(), 790)
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::Validation(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn get_by_name_ignores_case() {
        let db = Database::open_in_memory().await.unwrap();
        let bot_id = bots::insert_test_bot(&db, 1).await;
        let id = create(&db, bot_id, "Curso Premium".into(), 790).await.unwrap();

        let found = get_by_name(&db, bot_id, "CURSO PREMIUM").await.unwrap();
        assert_eq!(found.map(|o| o.id), Some(id));
    }

    #[tokio::test]
    async fn price_and_name_validation() {
        let db = Database::open_in_memory().await.unwrap();
        let bot_id = bots::insert_test_bot(&db, 1).await;
        assert!(create(&db, bot_id, "".into(), 790).await.is_err());
        assert!(create(&db, bot_id, "ok".into(), 49).await.is_err());
    }

    #[tokio::test]
    async fn triggers_update() {
        let db = Database::open_in_memory().await.unwrap();
        let bot_id = bots::insert_test_bot(&db, 1).await;
        let id = create(&db, bot_id, "Curso".into(), 790).await.unwrap();

        set_manual_verification_trigger(&db, id, Some("ja paguei".into()))
            .await
            .unwrap();
        set_discount_trigger(&db, id, Some("desconto".into())).await.unwrap();

        let offer = get(&db, id).await.unwrap().unwrap();
        assert_eq!(offer.manual_verification_trigger.as_deref(), Some("ja paguei"));
        assert_eq!(offer.discount_trigger.as_deref(), Some("desconto"));
    }
}
