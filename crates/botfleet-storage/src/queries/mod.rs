// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed repository modules, one per entity family.

pub mod actions;
pub mod blocks;
pub mod bots;
pub mod credits;
pub mod gateways;
pub mod media_cache;
pub mod notifications;
pub mod offers;
pub mod phases;
pub mod queue;
pub mod recovery;
pub mod sessions;
pub mod start;
pub mod trackers;
pub mod transactions;
pub mod upsells;
pub mod users;
