// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Prometheus metrics for the botfleet platform.
//!
//! Uses the metrics-rs facade with the Prometheus exporter. The
//! rendered text exposition is served by the ingress /metrics endpoint.

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Prometheus recorder holder.
///
/// Only one recorder can be installed per process; construct this once
/// at startup and hand the render closure to the ingress.
pub struct MetricsExporter {
    handle: PrometheusHandle,
}

impl MetricsExporter {
    pub fn install() -> Result<Self, String> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| format!("failed to install Prometheus recorder: {e}"))?;
        register_metrics();
        tracing::info!("prometheus metrics recorder installed");
        Ok(Self { handle })
    }

    /// Renders all collected metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.render()
    }

    pub fn handle(&self) -> &PrometheusHandle {
        &self.handle
    }
}

/// Register all metric descriptions. Called once after install.
pub fn register_metrics() {
    describe_counter!("botfleet_messages_total", "Inbound messages processed");
    describe_counter!("botfleet_tasks_total", "Tasks processed by outcome");
    describe_counter!("botfleet_dead_letters_total", "Tasks moved to the dead-letter sink");
    describe_counter!("botfleet_external_errors_total", "Errors from external services");
    describe_counter!("botfleet_credit_debits_cents_total", "Credits debited, in cents");
    describe_gauge!("botfleet_queue_depth", "Pending tasks per queue");
    describe_gauge!("botfleet_active_bots", "Registered active bots");
    describe_histogram!("botfleet_task_duration_seconds", "Task handler wall time");
}

/// One inbound message accepted for processing.
pub fn record_message(kind: &str) {
    metrics::counter!("botfleet_messages_total", "kind" => kind.to_string()).increment(1);
}

/// One finished task run.
pub fn record_task(task: &str, queue: &str, seconds: f64, outcome: &str) {
    metrics::counter!(
        "botfleet_tasks_total",
        "task" => task.to_string(),
        "queue" => queue.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
    metrics::histogram!(
        "botfleet_task_duration_seconds",
        "queue" => queue.to_string()
    )
    .record(seconds);
}

pub fn record_dead_letter(task: &str) {
    metrics::counter!("botfleet_dead_letters_total", "task" => task.to_string()).increment(1);
}

pub fn record_external_error(service: &str) {
    metrics::counter!("botfleet_external_errors_total", "service" => service.to_string())
        .increment(1);
}

pub fn record_credit_debit(category: &str, cents: i64) {
    metrics::counter!(
        "botfleet_credit_debits_cents_total",
        "category" => category.to_string()
    )
    .increment(cents.max(0) as u64);
}

pub fn set_queue_depth(queue: &str, depth: f64) {
    metrics::gauge!("botfleet_queue_depth", "queue" => queue.to_string()).set(depth);
}

pub fn set_active_bots(count: f64) {
    metrics::gauge!("botfleet_active_bots").set(count);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_a_noop() {
        // The facade silently drops metrics with no recorder installed;
        // none of these may panic in tests.
        record_message("text");
        record_task("process_update", "default", 0.05, "ok");
        record_dead_letter("llm_call");
        record_external_error("gateway");
        record_credit_debit("text", 12);
        set_queue_depth("ai", 3.0);
        set_active_bots(7.0);
    }
}
