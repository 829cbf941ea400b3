// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loading for the botfleet platform.
//!
//! TOML files merged over compiled defaults, overridden by `BOTFLEET_*`
//! environment variables plus the historical bare variable names
//! (`MANAGER_BOT_TOKEN`, `ENCRYPTION_KEY`, ...) the deployment scripts
//! already export.

pub mod loader;
pub mod model;

pub use loader::{load_config, load_config_from_path, load_config_from_str};
pub use model::FleetConfig;
