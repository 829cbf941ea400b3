// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! PIX payment gateway client.
//!
//! Charges are created synchronously (`POST /api/pix/cashIn`), polled
//! via `GET /api/transactions/{id}`, and optionally confirmed through
//! an inbound webhook whose body is authenticated with an HMAC
//! signature (`sha256=<hex>` over the raw payload).

pub mod client;
pub mod webhook;

pub use client::{CreatedCharge, GatewayStatus, PixGateway};
pub use webhook::verify_webhook_signature;
