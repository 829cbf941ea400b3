// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-admin payment gateway credentials, sealed at rest like bot
//! tokens.

use botfleet_core::FleetError;
use rusqlite::params;

use crate::database::{map_tr_err, Database};

/// Stores (or replaces) an admin's sealed gateway token.
pub async fn upsert(
    db: &Database,
    admin_id: i64,
    token_cipher: Vec<u8>,
    token_nonce: [u8; 12],
) -> Result<(), FleetError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO gateway_configs (admin_id, token_cipher, token_nonce)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT (admin_id) DO UPDATE SET
                     token_cipher = excluded.token_cipher,
                     token_nonce = excluded.token_nonce,
                     is_active = 1",
                params![admin_id, token_cipher, token_nonce.to_vec()],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Sealed token of an active gateway config.
pub async fn get(
    db: &Database,
    admin_id: i64,
) -> Result<Option<(Vec<u8>, [u8; 12])>, FleetError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT token_cipher, token_nonce FROM gateway_configs
                 WHERE admin_id = ?1 AND is_active = 1",
            )?;
            let mut rows = stmt.query_map(params![admin_id], |row| {
                let cipher: Vec<u8> = row.get(0)?;
                let nonce_vec: Vec<u8> = row.get(1)?;
                let nonce: [u8; 12] = nonce_vec.try_into().map_err(|_| {
                    rusqlite::Error::FromSqlConversionFailure(
                        1,
                        rusqlite::types::Type::Blob,
                        "gateway token nonce must be 12 bytes".into(),
                    )
                })?;
                Ok((cipher, nonce))
            })?;
            Ok(rows.next().transpose()?)
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_and_get_round_trip() {
        let db = Database::open_in_memory().await.unwrap();
        assert!(get(&db, 777).await.unwrap().is_none());

        upsert(&db, 777, vec![1, 2, 3], [7u8; 12]).await.unwrap();
        let (cipher, nonce) = get(&db, 777).await.unwrap().unwrap();
        assert_eq!(cipher, vec![1, 2, 3]);
        assert_eq!(nonce, [7u8; 12]);

        upsert(&db, 777, vec![9], [8u8; 12]).await.unwrap();
        let (cipher, _) = get(&db, 777).await.unwrap().unwrap();
        assert_eq!(cipher, vec![9]);
    }
}
