// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Task runtime for the botfleet platform.
//!
//! Named queues with independent concurrency, late acks, exponential
//! backoff with jitter, idempotency keys and a dead-letter sink. Tasks
//! are plain JSON payloads dispatched to registered handlers; the
//! storage crate provides the crash-safe queue table underneath.

pub mod runtime;
pub mod task;

pub use runtime::{TaskHandler, TaskRegistry, WorkerPools};
pub use task::{backoff_delay_secs, EnqueueOptions, QueueName, TaskQueue};
