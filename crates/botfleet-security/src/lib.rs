// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Security helpers for the botfleet platform.
//!
//! Currently hosts the log redaction pipeline; webhook secret checks
//! live in the ingress crate and token encryption in botfleet-crypto.

pub mod redact;

pub use redact::{redact, RedactingWriter};
