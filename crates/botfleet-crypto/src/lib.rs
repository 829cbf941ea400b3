// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Crypto and signing for the botfleet platform.
//!
//! Two concerns live here: symmetric encryption of bot and gateway
//! tokens at rest ([`seal`]/[`open`]), and short-lived HMAC-signed
//! callback tokens carried inside Telegram inline buttons
//! ([`CallbackSigner`]).

pub mod callback;
pub mod cipher;

pub use callback::{CallbackPayload, CallbackSigner};
pub use cipher::{decode_key, generate_random_key, open, seal, TokenCipher};
