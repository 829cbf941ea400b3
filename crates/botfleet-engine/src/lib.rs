// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation engine for the botfleet platform.
//!
//! Owns the per-message pipeline, the trigger post-scan over
//! LLM output (offers, actions, upsells, discounts, manual
//! verification), the start-template flow, tracker attribution, debug
//! commands and the task handlers binding all of it to the queues.

pub mod antispam;
pub mod debug;
pub mod detection;
pub mod discount;
pub mod handlers;
pub mod pipeline;
pub mod prompt;
pub mod start;
pub mod tracking;

pub use antispam::{AntiSpamHook, NoopAntiSpam};
pub use handlers::{register_all, PROCESS_MANAGER_UPDATE_TASK, PROCESS_UPDATE_TASK};
pub use pipeline::{ConversationEngine, EngineDeps, ProcessAudioPayload, PROCESS_AUDIO_TASK};
pub use start::{StartDecision, StartFlow, SEND_START_TEMPLATE_TASK};
pub use tracking::{StartAttribution, TrackingService};
