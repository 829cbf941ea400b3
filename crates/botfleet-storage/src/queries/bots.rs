// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bot registry operations. Tokens are stored sealed; decryption happens
//! in workers via botfleet-crypto.

use botfleet_core::FleetError;
use rusqlite::params;

use crate::database::{map_tr_err, Database};
use crate::models::Bot;

fn row_to_bot(row: &rusqlite::Row<'_>) -> Result<Bot, rusqlite::Error> {
    let nonce_vec: Vec<u8> = row.get(3)?;
    let token_nonce: [u8; 12] = nonce_vec.try_into().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Blob,
            "token nonce must be 12 bytes".into(),
        )
    })?;
    Ok(Bot {
        id: row.get(0)?,
        admin_id: row.get(1)?,
        token_cipher: row.get(2)?,
        token_nonce,
        username: row.get(4)?,
        webhook_secret: row.get(5)?,
        associated_offer_id: row.get(6)?,
        is_active: row.get(7)?,
    })
}

const BOT_COLUMNS: &str = "id, admin_id, token_cipher, token_nonce, username, \
                           webhook_secret, associated_offer_id, is_active";

/// Registers a bot with an already-sealed token. Returns the new id.
pub async fn create(
    db: &Database,
    admin_id: i64,
    token_cipher: Vec<u8>,
    token_nonce: [u8; 12],
    username: Option<String>,
    webhook_secret: String,
) -> Result<i64, FleetError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO bots (admin_id, token_cipher, token_nonce, username, webhook_secret)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![admin_id, token_cipher, token_nonce.to_vec(), username, webhook_secret],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get(db: &Database, bot_id: i64) -> Result<Option<Bot>, FleetError> {
    db.connection()
        .call(move |conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {BOT_COLUMNS} FROM bots WHERE id = ?1"))?;
            let mut rows = stmt.query_map(params![bot_id], row_to_bot)?;
            Ok(rows.next().transpose()?)
        })
        .await
        .map_err(map_tr_err)
}

/// Active bots only; inactive bots drop updates at ingress.
pub async fn get_active(db: &Database, bot_id: i64) -> Result<Option<Bot>, FleetError> {
    Ok(get(db, bot_id).await?.filter(|b| b.is_active))
}

pub async fn list_active(db: &Database) -> Result<Vec<Bot>, FleetError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {BOT_COLUMNS} FROM bots WHERE is_active = 1 ORDER BY id"
            ))?;
            let rows = stmt.query_map([], row_to_bot)?;
            Ok(rows.collect::<Result<Vec<_>, rusqlite::Error>>()?)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn set_active(db: &Database, bot_id: i64, active: bool) -> Result<(), FleetError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE bots SET is_active = ?1,
                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?2",
                params![active, bot_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
pub(crate) async fn insert_test_bot(db: &Database, admin_id: i64) -> i64 {
    create(
        db,
        admin_id,
        vec![0u8; 32],
        [0u8; 12],
        None,
        "whsec".to_string(),
    )
    .await
    .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_and_fetch_bot() {
        let db = Database::open_in_memory().await.unwrap();
        let id = create(
            &db,
            777,
            vec![1, 2, 3],
            [9u8; 12],
            Some("my_bot".into()),
            "s3cr3t".into(),
        )
        .await
        .unwrap();

        let bot = get(&db, id).await.unwrap().unwrap();
        assert_eq!(bot.admin_id, 777);
        assert_eq!(bot.token_cipher, vec![1, 2, 3]);
        assert_eq!(bot.token_nonce, [9u8; 12]);
        assert_eq!(bot.webhook_secret, "s3cr3t");
        assert!(bot.is_active);
    }

    #[tokio::test]
    async fn get_active_filters_deactivated() {
        let db = Database::open_in_memory().await.unwrap();
        let id = insert_test_bot(&db, 1).await;
        assert!(get_active(&db, id).await.unwrap().is_some());
        set_active(&db, id, false).await.unwrap();
        assert!(get_active(&db, id).await.unwrap().is_none());
        assert!(get(&db, id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unknown_bot_is_none() {
        let db = Database::open_in_memory().await.unwrap();
        assert!(get(&db, 404).await.unwrap().is_none());
    }
}
