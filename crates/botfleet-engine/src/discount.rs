// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Negotiated-discount detection.
//!
//! When an offer has a discount trigger configured, the LLM signals a
//! negotiated price by emitting `{term}{amount}` -- e.g. trigger
//! `descontox` and output `...descontox49,90...`. The amount is parsed
//! in Brazilian format (comma decimals) or plain digits, converted to
//! cents, and the discount blocks are sent with a PIX for that amount.

/// A detected discount directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscountHit {
    pub amount_cents: i64,
}

/// Scans LLM output for `{term}{amount}` (case-insensitive, embedded
/// allowed). Returns the first hit.
pub fn detect_discount(message: &str, trigger: &str) -> Option<DiscountHit> {
    if trigger.is_empty() {
        return None;
    }
    let lower_message = message.to_lowercase();
    let lower_trigger = trigger.to_lowercase();
    let start = lower_message.find(&lower_trigger)? + lower_trigger.len();

    // The amount begins right after the trigger, optionally prefixed
    // with "r$" and spaces. Lowercasing can shift byte offsets for a
    // handful of Unicode characters, so scan the lowercased text.
    let rest = lower_message.get(start..)?;
    let rest = rest.trim_start();
    let rest = rest.strip_prefix("r$").unwrap_or(rest).trim_start();

    let amount: String = rest
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .collect();
    parse_brl_cents(&amount).map(|amount_cents| DiscountHit { amount_cents })
}

/// Parses "49,90", "49.90", "49" (and "1.234,56") into cents.
pub fn parse_brl_cents(raw: &str) -> Option<i64> {
    let trimmed = raw.trim().trim_end_matches(['.', ',']);
    if trimmed.is_empty() {
        return None;
    }

    // Normalize: the last separator is the decimal point, any earlier
    // ones are thousands separators.
    let normalized = match trimmed.rfind([',', '.']) {
        Some(pos) => {
            let (int_part, dec_part) = trimmed.split_at(pos);
            let int_part: String = int_part.chars().filter(char::is_ascii_digit).collect();
            let dec_part = &dec_part[1..];
            if dec_part.len() > 2 || dec_part.chars().any(|c| !c.is_ascii_digit()) {
                return None;
            }
            format!("{int_part}.{dec_part:0<2}")
        }
        None => format!("{trimmed}.00"),
    };

    let (int_part, dec_part) = normalized.split_once('.')?;
    let int_value: i64 = if int_part.is_empty() {
        0
    } else {
        int_part.parse().ok()?
    };
    let dec_value: i64 = dec_part.parse().ok()?;
    let cents = int_value.checked_mul(100)?.checked_add(dec_value)?;
    if cents <= 0 {
        return None;
    }
    Some(cents)
}
