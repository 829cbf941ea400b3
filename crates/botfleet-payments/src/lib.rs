// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Payment lifecycle and the sale-approved fan-out.
//!
//! A transaction created against the gateway is polled (and optionally
//! webhook-confirmed) until `paid`; the transition then drives, exactly
//! once: deliverable dispatch, upsell activation, tracker stats, and
//! the sale-notification task. The uniqueness of the
//! `sale_notifications` row is the arbiter between concurrent workers.

pub mod fanout;
pub mod service;

pub use fanout::{SALE_LOCK_TTL_SECS, SEND_SALE_NOTIFICATION_TASK};
pub use service::{PaymentsService, VERIFY_TRANSACTION_TASK};
