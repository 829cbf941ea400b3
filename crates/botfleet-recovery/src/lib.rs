// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Inactivity recovery subsystem.
//!
//! The watchdog schedules a `check_inactive` task whenever a user is
//! active; the task re-validates the inactivity version, mints an
//! episode and chains `send_recovery_step` tasks at wall-clock times
//! computed from each step's schedule expression in the campaign
//! timezone. Any user activity bumps the version and every in-flight
//! task aborts at its first guard without side effects.

pub mod schedule;
pub mod service;

pub use schedule::{next_occurrence, parse_schedule, ScheduleExpr};
pub use service::{
    CheckInactivePayload, RecoveryService, SendStepPayload, StepPlan, CHECK_INACTIVE_TASK,
    SEND_RECOVERY_STEP_TASK,
};
