// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence layer for the botfleet platform.
//!
//! WAL-mode SQLite with embedded migrations, a single-writer concurrency
//! model via `tokio-rusqlite`, and typed repositories for every entity
//! plus the crash-safe task queue.

pub mod database;
pub mod migrations;
pub mod models;
pub mod queries;

pub use database::{now_iso, Database};
pub use models::*;
pub use queries::transactions::NewTransaction;
