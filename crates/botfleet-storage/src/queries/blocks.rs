// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Block storage for every container kind.
//!
//! Positions within a container stay contiguous: deleting a block
//! re-compacts the remaining positions in the same transaction.

use std::str::FromStr;

use botfleet_core::{Block, ContainerKind, ContainerRef, FleetError, MediaKind};
use rusqlite::params;

use crate::database::{map_tr_err, Database};

fn row_to_block(row: &rusqlite::Row<'_>) -> Result<Block, rusqlite::Error> {
    let kind_text: String = row.get(1)?;
    let kind = ContainerKind::from_str(&kind_text).map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown container kind {kind_text}").into(),
        )
    })?;
    let media_kind: Option<String> = row.get(6)?;
    let media_kind = media_kind
        .map(|m| {
            MediaKind::from_str(&m).map_err(|_| {
                rusqlite::Error::FromSqlConversionFailure(
                    6,
                    rusqlite::types::Type::Text,
                    format!("unknown media kind {m}").into(),
                )
            })
        })
        .transpose()?;
    Ok(Block {
        id: row.get(0)?,
        container: ContainerRef::new(kind, row.get(2)?),
        position: row.get(3)?,
        text: row.get(4)?,
        media_file_id: row.get(5)?,
        media_kind,
        delay_seconds: row.get::<_, i64>(7)? as u32,
        auto_delete_seconds: row.get::<_, i64>(8)? as u32,
    })
}

const BLOCK_COLUMNS: &str = "id, container_kind, container_id, position, text, \
                             media_file_id, media_kind, delay_seconds, auto_delete_seconds";

/// Appends a block at the end of its container. Returns the new id.
pub async fn append(db: &Database, block: Block) -> Result<i64, FleetError> {
    block.validate()?;
    let kind = block.container.kind.to_string();
    let media_kind = block.media_kind.map(|m| m.to_string());
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let next_position: i64 = tx.query_row(
                "SELECT COALESCE(MAX(position), 0) + 1 FROM blocks
                 WHERE container_kind = ?1 AND container_id = ?2",
                params![kind, block.container.id],
                |row| row.get(0),
            )?;
            tx.execute(
                "INSERT INTO blocks (container_kind, container_id, position, text,
                                     media_file_id, media_kind, delay_seconds, auto_delete_seconds)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    kind,
                    block.container.id,
                    next_position,
                    block.text,
                    block.media_file_id,
                    media_kind,
                    block.delay_seconds,
                    block.auto_delete_seconds,
                ],
            )?;
            let id = tx.last_insert_rowid();
            tx.commit()?;
            Ok(id)
        })
        .await
        .map_err(map_tr_err)
}

/// All blocks of a container, in send order.
pub async fn list(db: &Database, container: ContainerRef) -> Result<Vec<Block>, FleetError> {
    let kind = container.kind.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {BLOCK_COLUMNS} FROM blocks
                 WHERE container_kind = ?1 AND container_id = ?2
                 ORDER BY position ASC"
            ))?;
            let rows = stmt.query_map(params![kind, container.id], row_to_block)?;
            Ok(rows.collect::<Result<Vec<_>, rusqlite::Error>>()?)
        })
        .await
        .map_err(map_tr_err)
}

/// True when the container holds at least one block.
pub async fn has_blocks(db: &Database, container: ContainerRef) -> Result<bool, FleetError> {
    let kind = container.kind.to_string();
    db.connection()
        .call(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM blocks WHERE container_kind = ?1 AND container_id = ?2",
                params![kind, container.id],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
        .await
        .map_err(map_tr_err)
}

/// Deletes a block and closes the position gap it leaves behind.
pub async fn delete(db: &Database, block_id: i64) -> Result<(), FleetError> {
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let target: Option<(String, i64, i64)> = {
                let mut stmt = tx.prepare(
                    "SELECT container_kind, container_id, position FROM blocks WHERE id = ?1",
                )?;
                let mut rows = stmt
                    .query_map(params![block_id], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                    })?;
                rows.next().transpose()?
            };

            if let Some((kind, container_id, position)) = target {
                tx.execute("DELETE FROM blocks WHERE id = ?1", params![block_id])?;
                tx.execute(
                    "UPDATE blocks SET position = position - 1
                     WHERE container_kind = ?1 AND container_id = ?2 AND position > ?3",
                    params![kind, container_id, position],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_block(container: ContainerRef, text: &str) -> Block {
        Block {
            id: 0,
            container,
            position: 0,
            text: Some(text.into()),
            media_file_id: None,
            media_kind: None,
            delay_seconds: 0,
            auto_delete_seconds: 0,
        }
    }

    #[tokio::test]
    async fn append_assigns_contiguous_positions() {
        let db = Database::open_in_memory().await.unwrap();
        let container = ContainerRef::new(ContainerKind::OfferPitch, 7);

        append(&db, text_block(container, "a")).await.unwrap();
        append(&db, text_block(container, "b")).await.unwrap();
        append(&db, text_block(container, "c")).await.unwrap();

        let blocks = list(&db, container).await.unwrap();
        let positions: Vec<_> = blocks.iter().map(|b| b.position).collect();
        assert_eq!(positions, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn delete_recompacts_positions() {
        let db = Database::open_in_memory().await.unwrap();
        let container = ContainerRef::new(ContainerKind::RecoveryStep, 3);

        append(&db, text_block(container, "a")).await.unwrap();
        let b_id = append(&db, text_block(container, "b")).await.unwrap();
        append(&db, text_block(container, "c")).await.unwrap();

        delete(&db, b_id).await.unwrap();

        let blocks = list(&db, container).await.unwrap();
        let got: Vec<_> = blocks
            .iter()
            .map(|b| (b.position, b.text.clone().unwrap()))
            .collect();
        assert_eq!(got, vec![(1, "a".to_string()), (2, "c".to_string())]);
    }

    #[tokio::test]
    async fn containers_do_not_interfere() {
        let db = Database::open_in_memory().await.unwrap();
        let pitch = ContainerRef::new(ContainerKind::OfferPitch, 7);
        let deliverable = ContainerRef::new(ContainerKind::OfferDeliverable, 7);

        append(&db, text_block(pitch, "pitch-1")).await.unwrap();
        append(&db, text_block(deliverable, "del-1")).await.unwrap();

        assert_eq!(list(&db, pitch).await.unwrap().len(), 1);
        assert_eq!(list(&db, deliverable).await.unwrap().len(), 1);
        assert!(has_blocks(&db, pitch).await.unwrap());
        assert!(!has_blocks(&db, ContainerRef::new(ContainerKind::Action, 1))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn media_kind_round_trips() {
        let db = Database::open_in_memory().await.unwrap();
        let container = ContainerRef::new(ContainerKind::UpsellAnnouncement, 1);
        let mut block = text_block(container, "caption");
        block.media_file_id = Some("AgACAgEAAx".into());
        block.media_kind = Some(MediaKind::Video);
        block.delay_seconds = 5;
        block.auto_delete_seconds = 120;

        append(&db, block).await.unwrap();
        let stored = &list(&db, container).await.unwrap()[0];
        assert_eq!(stored.media_kind, Some(MediaKind::Video));
        assert_eq!(stored.delay_seconds, 5);
        assert_eq!(stored.auto_delete_seconds, 120);
    }

    #[tokio::test]
    async fn invalid_block_is_rejected_before_insert() {
        let db = Database::open_in_memory().await.unwrap();
        let container = ContainerRef::new(ContainerKind::OfferPitch, 9);
        let mut block = text_block(container, "x");
        block.delay_seconds = 9999;
        assert!(append(&db, block).await.is_err());
        assert!(!has_blocks(&db, container).await.unwrap());
    }
}
