// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Trigger detection over LLM output.
//!
//! Names and terms match by case-insensitive containment; when several
//! entities match, the first in config order wins. The substitution
//! policy decides whether the triggering message is replaced by the
//! block sequence or kept with the sequence appended.

/// Case-insensitive containment, embedded matches allowed.
pub fn contains_term(haystack: &str, term: &str) -> bool {
    if term.is_empty() {
        return false;
    }
    haystack.to_lowercase().contains(&term.to_lowercase())
}

/// First matching entity in config order.
pub fn first_match<'a, T>(
    message: &str,
    entities: &'a [T],
    term_of: impl Fn(&T) -> Option<&str>,
) -> Option<&'a T> {
    entities
        .iter()
        .find(|entity| term_of(entity).is_some_and(|term| contains_term(message, term)))
}

/// Substitution policy: replace the LLM message when the mention is
/// >= 70 % of the total length and the total is under 50 characters;
/// otherwise append the block sequence after it.
pub fn should_replace_message(message: &str, term: &str) -> bool {
    let message_len = message.trim().chars().count();
    if message_len == 0 {
        return true;
    }
    if message_len >= 50 {
        return false;
    }
    let term_len = term.chars().count();
    (term_len as f64) >= 0.7 * (message_len as f64)
}
