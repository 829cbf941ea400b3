// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Named distributed locks on SETNX + TTL.
//!
//! Holders must release on every exit path; the TTL is the backstop for
//! a crashed holder, not the release mechanism.

use std::sync::Arc;

use botfleet_core::FleetError;

use crate::{keys, KvStore};

/// Proof of lock ownership, consumed by [`LockManager::release`].
#[derive(Debug)]
pub struct LockToken {
    key: String,
}

/// Acquires and releases `lock:{name}` keys.
pub struct LockManager {
    kv: Arc<dyn KvStore>,
}

impl LockManager {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Attempts to take the named lock. `None` means another holder owns it.
    pub async fn try_acquire(
        &self,
        name: &str,
        ttl_secs: u64,
    ) -> Result<Option<LockToken>, FleetError> {
        let key = keys::lock(name);
        if self.kv.set_nx(&key, "1", ttl_secs).await? {
            Ok(Some(LockToken { key }))
        } else {
            Ok(None)
        }
    }

    /// Releases a held lock. Consumes the token so a lock cannot be
    /// released twice or by a non-holder.
    pub async fn release(&self, token: LockToken) -> Result<(), FleetError> {
        self.kv.delete(&token.key).await
    }
}
