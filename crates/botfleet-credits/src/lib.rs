// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Credit ledger and admission control.
//!
//! Prices are configured in USD per MTok (text) and USD per minute
//! (audio); everything external is BRL integer cents. The pre-check
//! over-estimates on purpose (25 % pad) so it rejects before the
//! provider is ever called; the post-debit records the true cost.

pub mod estimate;
pub mod service;

pub use estimate::{estimate_prompt_tokens, estimate_completion_tokens, Estimator};
pub use service::CreditService;
