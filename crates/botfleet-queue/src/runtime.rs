// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Worker pools consuming the named queues.
//!
//! One pool per queue with its configured concurrency. Workers claim a
//! task, run its handler under the queue deadline, then ack late or
//! fail with backoff; the error kind decides retry vs dead-letter.
//! Pools heartbeat into the KV store for the typed health check.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use botfleet_core::{ErrorKind, FleetError};
use botfleet_kv::ActivityTracker;
use botfleet_storage::queries::queue as queue_db;
use botfleet_storage::{now_iso, Database, TaskRow};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::task::{backoff_delay_secs, QueueName};

/// One task implementation, keyed by its task name.
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    /// Task name as stored in the queue rows.
    fn name(&self) -> &'static str;

    async fn run(&self, payload: serde_json::Value) -> Result<(), FleetError>;
}

/// Immutable name -> handler map built at startup.
#[derive(Default, Clone)]
pub struct TaskRegistry {
    handlers: HashMap<&'static str, Arc<dyn TaskHandler>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) {
        let name = handler.name();
        if self.handlers.insert(name, handler).is_some() {
            warn!(task = name, "task handler re-registered, previous dropped");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Spawns and supervises the per-queue worker pools.
pub struct WorkerPools {
    db: Database,
    registry: Arc<TaskRegistry>,
    activity: Arc<ActivityTracker>,
    concurrency: HashMap<String, u32>,
    poll_interval: Duration,
}

impl WorkerPools {
    pub fn new(
        db: Database,
        registry: TaskRegistry,
        activity: Arc<ActivityTracker>,
        concurrency: HashMap<String, u32>,
        poll_interval_ms: u64,
    ) -> Self {
        Self {
            db,
            registry: Arc::new(registry),
            activity,
            concurrency,
            poll_interval: Duration::from_millis(poll_interval_ms.max(10)),
        }
    }

    fn workers_for(&self, queue: QueueName) -> u32 {
        let name = queue.to_string();
        self.concurrency
            .get(&name)
            .or_else(|| self.concurrency.get("default"))
            .copied()
            .unwrap_or(2)
            .max(1)
    }

    /// Spawns every pool; returns the join handles.
    pub fn spawn(&self, cancel: CancellationToken) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();
        for queue in QueueName::ALL {
            let workers = self.workers_for(queue);
            info!(queue = %queue, workers, "spawning worker pool");
            for worker_index in 0..workers {
                let worker = Worker {
                    db: self.db.clone(),
                    registry: self.registry.clone(),
                    activity: self.activity.clone(),
                    queue,
                    poll_interval: self.poll_interval,
                    emit_heartbeat: worker_index == 0,
                };
                let cancel = cancel.clone();
                handles.push(tokio::spawn(async move { worker.run(cancel).await }));
            }
        }
        handles
    }
}

struct Worker {
    db: Database,
    registry: Arc<TaskRegistry>,
    activity: Arc<ActivityTracker>,
    queue: QueueName,
    poll_interval: Duration,
    emit_heartbeat: bool,
}

impl Worker {
    async fn run(&self, cancel: CancellationToken) {
        let queue_name = self.queue.to_string();
        loop {
            if self.emit_heartbeat {
                let _ = self
                    .activity
                    .beat(&queue_name, chrono::Utc::now().timestamp())
                    .await;
            }

            let claimed = tokio::select! {
                claimed = queue_db::claim(&self.db, &queue_name, now_iso()) => claimed,
                _ = cancel.cancelled() => break,
            };

            match claimed {
                Ok(Some(task)) => self.process(task).await,
                Ok(None) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.poll_interval) => {}
                        _ = cancel.cancelled() => break,
                    }
                }
                Err(e) => {
                    error!(queue = %self.queue, error = %e, "claim failed");
                    tokio::select! {
                        _ = tokio::time::sleep(self.poll_interval) => {}
                        _ = cancel.cancelled() => break,
                    }
                }
            }
        }
        debug!(queue = %self.queue, "worker stopped");
    }

    async fn process(&self, task: TaskRow) {
        let started = std::time::Instant::now();
        let deadline = Duration::from_secs(self.queue.deadline_secs());

        let result = match self.registry.get(&task.task_name) {
            Some(handler) => {
                let payload: serde_json::Value =
                    serde_json::from_str(&task.payload).unwrap_or(serde_json::Value::Null);
                match tokio::time::timeout(deadline, handler.run(payload)).await {
                    Ok(result) => result,
                    Err(_) => Err(FleetError::Timeout { duration: deadline }),
                }
            }
            None => Err(FleetError::Internal(format!(
                "no handler registered for task {}",
                task.task_name
            ))),
        };

        let elapsed = started.elapsed().as_secs_f64();
        match result {
            Ok(()) => {
                botfleet_metrics::record_task(&task.task_name, &self.queue.to_string(), elapsed, "ok");
                if let Err(e) = queue_db::ack(&self.db, task.id).await {
                    error!(task_id = task.id, error = %e, "ack failed");
                }
            }
            Err(err) => {
                let kind = err.kind();
                match kind {
                    ErrorKind::Silent | ErrorKind::AlreadyDone => {
                        // No side effects to undo; the task is done.
                        debug!(
                            task = %task.task_name,
                            task_id = task.id,
                            error = %err,
                            "task exited without effect"
                        );
                        botfleet_metrics::record_task(
                            &task.task_name,
                            &self.queue.to_string(),
                            elapsed,
                            "skipped",
                        );
                        if let Err(e) = queue_db::ack(&self.db, task.id).await {
                            error!(task_id = task.id, error = %e, "ack failed");
                        }
                    }
                    ErrorKind::Retry | ErrorKind::Fatal => {
                        let fatal = kind == ErrorKind::Fatal;
                        let delay = match &err {
                            FleetError::RateLimited { retry_after_secs } => *retry_after_secs,
                            _ => backoff_delay_secs(task.attempts),
                        };
                        warn!(
                            task = %task.task_name,
                            task_id = task.id,
                            attempts = task.attempts,
                            fatal,
                            error = %err,
                            "task failed"
                        );
                        match queue_db::fail(&self.db, task.id, err.to_string(), delay, fatal).await
                        {
                            Ok(queue_db::FailOutcome::DeadLettered) => {
                                error!(
                                    task = %task.task_name,
                                    task_id = task.id,
                                    error = %err,
                                    "task dead-lettered"
                                );
                                botfleet_metrics::record_dead_letter(&task.task_name);
                                botfleet_metrics::record_task(
                                    &task.task_name,
                                    &self.queue.to_string(),
                                    elapsed,
                                    "dead",
                                );
                            }
                            Ok(queue_db::FailOutcome::Retried) => {
                                botfleet_metrics::record_task(
                                    &task.task_name,
                                    &self.queue.to_string(),
                                    elapsed,
                                    "retry",
                                );
                            }
                            Err(e) => error!(task_id = task.id, error = %e, "fail update failed"),
                        }
                    }
                }
            }
        }
    }
}
