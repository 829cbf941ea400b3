// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP ingress for the botfleet platform.
//!
//! One endpoint family: `POST /webhook/{bot_id}` for secondary bots,
//! `POST /webhook/manager` for the manager bot, `POST
//! /webhook/gateway/{admin_id}` for signed PIX callbacks, plus
//! `GET /health` and `GET /metrics`. Secrets are checked before the
//! body is parsed; valid updates are de-duplicated and enqueued -- no
//! external system is ever called synchronously here.

pub mod server;

pub use server::{start_server, IngressState, ServerConfig};
