// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! External AI clients: the chat-completion endpoint driving bot
//! conversations and the Whisper transcription endpoint for voice
//! notes. Both retry transient failures and classify errors for the
//! task runtime; circuit breaking is applied by the callers that own
//! the process-scoped breakers.

pub mod chat;
pub mod whisper;

pub use chat::{ChatClient, ChatMessage, ChatOutcome, Usage};
pub use whisper::WhisperClient;
