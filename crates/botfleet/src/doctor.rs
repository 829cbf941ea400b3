// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `botfleet doctor`: typed health check.
//!
//! Checks the store and KV directly, then reads queue depths, worker
//! heartbeats and the dead-letter count. No process-output parsing,
//! ever. Exit code 0 = healthy, non-zero = failure.

use std::sync::Arc;

use botfleet_config::FleetConfig;
use botfleet_core::FleetError;
use botfleet_kv::{ActivityTracker, KvStore, MemoryKv, RedisKv};
use botfleet_queue::QueueName;
use botfleet_storage::queries::queue as queue_db;
use botfleet_storage::Database;

/// How stale a heartbeat may be before a pool counts as missing.
const HEARTBEAT_STALE_SECS: i64 = 60;

/// Runs the health check and prints a summary. Returns overall health.
pub async fn run_doctor(config: &FleetConfig) -> Result<bool, FleetError> {
    let mut healthy = true;

    // Store.
    match Database::open(&config.storage.database_path).await {
        Ok(db) => {
            println!("store: ok ({})", config.storage.database_path);

            for queue in QueueName::ALL {
                let depth = queue_db::depth(&db, &queue.to_string()).await?;
                println!("queue {queue}: {depth} pending");
            }
            let dead = queue_db::dead_letter_count(&db).await?;
            println!("dead letters: {dead}");

            // KV + heartbeats.
            let kv: Arc<dyn KvStore> = if config.redis.url.is_empty() {
                println!("kv: in-process (redis.url not set)");
                Arc::new(MemoryKv::new())
            } else {
                match RedisKv::connect(&config.redis.url, config.redis.timeout_secs).await {
                    Ok(kv) => {
                        println!("kv: ok ({})", config.redis.url);
                        Arc::new(kv)
                    }
                    Err(e) => {
                        println!("kv: FAILED ({e})");
                        return Ok(false);
                    }
                }
            };

            let activity = ActivityTracker::new(kv);
            let now = chrono::Utc::now().timestamp();
            for queue in QueueName::ALL {
                match activity.last_beat(&queue.to_string()).await? {
                    Some(beat) if now - beat <= HEARTBEAT_STALE_SECS => {
                        println!("workers {queue}: alive ({}s ago)", now - beat);
                    }
                    Some(beat) => {
                        println!("workers {queue}: STALE ({}s ago)", now - beat);
                        healthy = false;
                    }
                    None => {
                        // Not running is informational when doctor runs
                        // outside the serve process.
                        println!("workers {queue}: no heartbeat");
                    }
                }
            }
        }
        Err(e) => {
            println!("store: FAILED ({e})");
            healthy = false;
        }
    }

    println!("overall: {}", if healthy { "ok" } else { "FAILED" });
    Ok(healthy)
}
