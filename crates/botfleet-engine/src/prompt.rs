// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Prompt assembly for the conversation engine.
//!
//! System prompt = general prompt + current phase prompt + action-status
//! lines (for tracked actions) + the phase prompt of an armed upsell.
//! Messages = bounded history + the current user turn.

use botfleet_llm::ChatMessage;
use botfleet_storage::{Action, AiConfig, HistoryEntry, Phase};

/// Per-user action status line feeding the prompt.
pub struct ActionStatusLine<'a> {
    pub action: &'a Action,
    pub status: &'a str,
}

/// Builds the system prompt.
pub fn system_prompt(
    config: &AiConfig,
    current_phase: Option<&Phase>,
    action_statuses: &[ActionStatusLine<'_>],
    armed_upsell_prompt: Option<&str>,
) -> String {
    let mut prompt = config
        .general_prompt
        .clone()
        .unwrap_or_else(|| "Você é um assistente útil.".to_string());

    if let Some(phase) = current_phase {
        prompt.push_str("\n\n");
        prompt.push_str(&phase.prompt);
    }

    if !action_statuses.is_empty() {
        prompt.push_str("\n\nStatus das ações:");
        for line in action_statuses {
            prompt.push_str(&format!("\n- {}: {}", line.action.name, line.status));
        }
    }

    if let Some(upsell_prompt) = armed_upsell_prompt {
        prompt.push_str("\n\n");
        prompt.push_str(upsell_prompt);
    }

    prompt
}

/// Builds the full message list for one completion call.
pub fn build_messages(
    system: String,
    history: &[HistoryEntry],
    user_text: &str,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(system));
    for entry in history {
        match entry.role.as_str() {
            "assistant" => messages.push(ChatMessage::assistant(entry.content.clone())),
            _ => messages.push(ChatMessage::user(entry.content.clone())),
        }
    }
    messages.push(ChatMessage::user(user_text.to_string()));
    messages
}
