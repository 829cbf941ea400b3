// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Media helpers: file downloads, sent-file-id extraction and the
//! "expired identifier" error class that drives cache re-resolution.

use botfleet_core::{FleetError, MediaKind};
use teloxide::net::Download;
use teloxide::prelude::*;

use crate::classify;

/// Downloads a file's bytes by file id (getFile + content fetch).
pub async fn download_file(bot: &Bot, file_id: &str) -> Result<Vec<u8>, FleetError> {
    let file = bot
        .get_file(file_id.to_string())
        .await
        .map_err(classify)?;

    let mut buf = Vec::new();
    bot.download_file(&file.path, &mut buf)
        .await
        .map_err(|e| FleetError::TransientExternal {
            service: "telegram",
            message: format!("file download failed: {e}"),
        })?;

    tracing::debug!(file_id, size = buf.len(), "downloaded file from Telegram");
    Ok(buf)
}

/// Extracts the server-side file id from a sent message, per kind.
///
/// For photos Telegram returns multiple sizes; the last is the largest
/// and the one worth caching.
pub fn extract_file_id(message: &Message, kind: MediaKind) -> Option<String> {
    match kind {
        MediaKind::Photo => message.photo().and_then(|sizes| sizes.last()).map(|p| p.file.id.clone()),
        MediaKind::Video => message.video().map(|v| v.file.id.clone()),
        MediaKind::Voice => message.voice().map(|v| v.file.id.clone()),
        MediaKind::Document => message.document().map(|d| d.file.id.clone()),
        MediaKind::Animation => message.animation().map(|a| a.file.id.clone()),
    }
}

/// Default upload file name per media kind (re-upload path).
pub fn upload_file_name(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Photo => "photo.jpg",
        MediaKind::Video => "video.mp4",
        MediaKind::Voice => "voice.ogg",
        MediaKind::Document => "document.pdf",
        MediaKind::Animation => "animation.gif",
    }
}

/// Telegram phrases that mean "this file id is no longer valid here".
pub fn is_expired_file_id_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("wrong file identifier")
        || lower.contains("wrong remote file identifier")
        || lower.contains("file reference expired")
        || lower.contains("failed to get http url content")
}
