// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! MarkdownV2 escaping for the Telegram Bot API.
//!
//! MarkdownV2 requires escaping 18 special characters outside code
//! spans. Content inside inline code or fenced blocks must stay
//! untouched, so the input is walked as alternating text/code segments.

/// Characters that must be escaped outside code spans.
const SPECIAL_CHARS: &[char] = &[
    '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
];

#[derive(Debug, PartialEq)]
enum Segment<'a> {
    Text(&'a str),
    /// Verbatim code span including its backtick delimiters.
    Code(&'a str),
}

/// Splits input into text and code segments.
///
/// An unclosed span runs to the end of input and is treated as code,
/// matching how Telegram renders a dangling backtick.
fn segments(input: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut rest = input;
    while let Some(open) = rest.find('`') {
        let (before, from_tick) = rest.split_at(open);
        if !before.is_empty() {
            out.push(Segment::Text(before));
        }

        let fence = if from_tick.starts_with("```") { "```" } else { "`" };
        let body_start = fence.len();
        match from_tick[body_start..].find(fence) {
            Some(close) => {
                let end = body_start + close + fence.len();
                out.push(Segment::Code(&from_tick[..end]));
                rest = &from_tick[end..];
            }
            None => {
                out.push(Segment::Code(from_tick));
                rest = "";
            }
        }
    }
    if !rest.is_empty() {
        out.push(Segment::Text(rest));
    }
    out
}

fn escape_text(text: &str, out: &mut String) {
    for ch in text.chars() {
        if SPECIAL_CHARS.contains(&ch) {
            out.push('\\');
        }
        out.push(ch);
    }
}

/// Escapes text for the MarkdownV2 parse mode.
pub fn escape_markdown_v2(text: &str) -> String {
    let mut out = String::with_capacity(text.len() * 2);
    for segment in segments(text) {
        match segment {
            Segment::Text(t) => escape_text(t, &mut out),
            Segment::Code(c) => out.push_str(c),
        }
    }
    out
}

/// High-level formatting entry point for outbound text.
pub fn format_for_telegram(text: &str) -> String {
    escape_markdown_v2(text)
}
