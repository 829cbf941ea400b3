// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `KvStore` trait and its Redis / in-memory implementations.
//!
//! Every call carries the configured KV timeout; a slow broker surfaces
//! as [`FleetError::Timeout`] instead of stalling a worker.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use botfleet_core::FleetError;
use redis::AsyncCommands;

/// Minimal atomic KV operations the platform builds on.
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    /// Implementation name for health reporting.
    fn name(&self) -> &str;

    /// Cheap reachability check used by /health and `doctor`.
    async fn ping(&self) -> Result<(), FleetError>;

    /// Atomic increment, setting the TTL alongside. Returns the new value.
    async fn incr_with_ttl(&self, key: &str, ttl_secs: u64) -> Result<i64, FleetError>;

    /// Atomic increment without TTL (monotonic counters).
    async fn incr(&self, key: &str) -> Result<i64, FleetError>;

    /// SETNX + TTL. Returns true when this caller created the key.
    async fn set_nx(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool, FleetError>;

    async fn get(&self, key: &str) -> Result<Option<String>, FleetError>;

    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64)
        -> Result<(), FleetError>;

    /// Set without expiry (version counters, attribution mirrors).
    async fn set(&self, key: &str, value: &str) -> Result<(), FleetError>;

    async fn delete(&self, key: &str) -> Result<(), FleetError>;
}

// ---------------------------------------------------------------------------
// Redis
// ---------------------------------------------------------------------------

/// Redis-backed KV store over a multiplexed connection.
pub struct RedisKv {
    conn: redis::aio::MultiplexedConnection,
    timeout: Duration,
}

impl RedisKv {
    /// Connects and verifies the broker with a PING.
    pub async fn connect(url: &str, timeout_secs: u64) -> Result<Self, FleetError> {
        let client = redis::Client::open(url)
            .map_err(|e| FleetError::Config(format!("invalid redis url: {e}")))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| FleetError::Kv(format!("redis connect failed: {e}")))?;
        let kv = Self {
            conn,
            timeout: Duration::from_secs(timeout_secs),
        };
        kv.ping().await?;
        Ok(kv)
    }

    async fn bounded<T>(
        &self,
        fut: impl std::future::Future<Output = redis::RedisResult<T>>,
    ) -> Result<T, FleetError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(FleetError::Kv(e.to_string())),
            Err(_) => Err(FleetError::Timeout {
                duration: self.timeout,
            }),
        }
    }
}

#[async_trait]
impl KvStore for RedisKv {
    fn name(&self) -> &str {
        "redis"
    }

    async fn ping(&self) -> Result<(), FleetError> {
        let mut conn = self.conn.clone();
        let pong: String = self
            .bounded(async move { redis::cmd("PING").query_async(&mut conn).await })
            .await?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(FleetError::Kv(format!("unexpected PING reply: {pong}")))
        }
    }

    async fn incr_with_ttl(&self, key: &str, ttl_secs: u64) -> Result<i64, FleetError> {
        let mut conn = self.conn.clone();
        let key = key.to_string();
        let (count,): (i64,) = self
            .bounded(async move {
                redis::pipe()
                    .atomic()
                    .incr(&key, 1)
                    .expire(&key, ttl_secs as i64)
                    .ignore()
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        Ok(count)
    }

    async fn incr(&self, key: &str) -> Result<i64, FleetError> {
        let mut conn = self.conn.clone();
        let key = key.to_string();
        self.bounded(async move { conn.incr(&key, 1).await }).await
    }

    async fn set_nx(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool, FleetError> {
        let mut conn = self.conn.clone();
        let key = key.to_string();
        let value = value.to_string();
        let reply: Option<String> = self
            .bounded(async move {
                redis::cmd("SET")
                    .arg(&key)
                    .arg(&value)
                    .arg("NX")
                    .arg("EX")
                    .arg(ttl_secs)
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        Ok(reply.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, FleetError> {
        let mut conn = self.conn.clone();
        let key = key.to_string();
        self.bounded(async move { conn.get(&key).await }).await
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl_secs: u64,
    ) -> Result<(), FleetError> {
        let mut conn = self.conn.clone();
        let key = key.to_string();
        let value = value.to_string();
        self.bounded(async move { conn.set_ex(&key, &value, ttl_secs).await })
            .await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), FleetError> {
        let mut conn = self.conn.clone();
        let key = key.to_string();
        let value = value.to_string();
        self.bounded(async move { conn.set(&key, &value).await }).await
    }

    async fn delete(&self, key: &str) -> Result<(), FleetError> {
        let mut conn = self.conn.clone();
        let key = key.to_string();
        self.bounded(async move { conn.del(&key).await }).await
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

/// In-process KV used by tests and single-node deployments.
#[derive(Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn live_value(entries: &mut HashMap<String, MemoryEntry>, key: &str) -> Option<String> {
        match entries.get(key) {
            Some(entry) => {
                if entry.expires_at.is_some_and(|at| Instant::now() >= at) {
                    entries.remove(key);
                    None
                } else {
                    Some(entry.value.clone())
                }
            }
            None => None,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, MemoryEntry>> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    fn name(&self) -> &str {
        "memory"
    }

    async fn ping(&self) -> Result<(), FleetError> {
        Ok(())
    }

    async fn incr_with_ttl(&self, key: &str, ttl_secs: u64) -> Result<i64, FleetError> {
        let mut entries = self.lock();
        let current: i64 = Self::live_value(&mut entries, key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let next = current + 1;
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: next.to_string(),
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_secs)),
            },
        );
        Ok(next)
    }

    async fn incr(&self, key: &str) -> Result<i64, FleetError> {
        let mut entries = self.lock();
        let current: i64 = Self::live_value(&mut entries, key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let next = current + 1;
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: next.to_string(),
                expires_at: None,
            },
        );
        Ok(next)
    }

    async fn set_nx(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool, FleetError> {
        let mut entries = self.lock();
        if Self::live_value(&mut entries, key).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_secs)),
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, FleetError> {
        let mut entries = self.lock();
        Ok(Self::live_value(&mut entries, key))
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl_secs: u64,
    ) -> Result<(), FleetError> {
        self.lock().insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_secs)),
            },
        );
        Ok(())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), FleetError> {
        self.lock().insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), FleetError> {
        self.lock().remove(key);
        Ok(())
    }
}
