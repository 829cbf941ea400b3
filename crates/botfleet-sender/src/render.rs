// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Text rendering for outbound blocks: `{pix}` substitution, reply
//! splitting and the human-typing delay heuristic.

use botfleet_config::model::SenderConfig;

/// Placeholder substituted with the PIX copy-and-paste code.
pub const PIX_PLACEHOLDER: &str = "{pix}";

/// Code shown during admin previews instead of a real charge.
pub const PREVIEW_PIX_CODE: &str = "PREVIEW_PIX_CODE";

/// Substitutes the `{pix}` placeholder.
///
/// Preview mode always renders [`PREVIEW_PIX_CODE`]; outside preview a
/// missing code leaves the placeholder visible rather than inventing a
/// charge.
pub fn render_pix(text: &str, pix_code: Option<&str>, preview: bool) -> String {
    if !text.contains(PIX_PLACEHOLDER) {
        return text.to_string();
    }
    let code = if preview {
        PREVIEW_PIX_CODE
    } else {
        match pix_code {
            Some(code) => code,
            None => return text.to_string(),
        }
    };
    text.replace(PIX_PLACEHOLDER, code)
}

/// Splits an LLM reply on `|` into sequential messages.
pub fn split_reply(text: &str) -> Vec<String> {
    if !text.contains('|') {
        return if text.trim().is_empty() {
            Vec::new()
        } else {
            vec![text.to_string()]
        };
    }
    text.split('|')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

/// Natural typing delay from text length, clamped to the configured
/// bounds.
pub fn typing_delay_secs(text: &str, config: &SenderConfig) -> f64 {
    if text.is_empty() {
        return config.min_typing_delay_secs;
    }
    let chars_per_second = (config.typing_chars_per_minute / 60.0).max(1.0);
    let natural = text.chars().count() as f64 / chars_per_second;
    natural.clamp(config.min_typing_delay_secs, config.max_typing_delay_secs)
}
