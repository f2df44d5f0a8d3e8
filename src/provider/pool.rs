//! Per-user provider-client pool with idle eviction.
//!
//! The gateway's own network client lifecycle is out of scope, but the
//! pool the orchestrator borrows gateway handles from is part of its
//! resource model and is built here: one entry per user id,
//! refcounted by outstanding checkouts, evicted on a background timer
//! once both its refcount and idle time cross the configured threshold.

use crate::provider::ProviderGateway;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

struct PoolEntry {
    gateway: Arc<dyn ProviderGateway>,
    last_used: Instant,
    checkouts: u64,
}

pub struct ProviderPool {
    entries: Mutex<HashMap<String, PoolEntry>>,
    idle_evict: Duration,
}

impl ProviderPool {
    pub fn new(idle_evict: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            idle_evict,
        }
    }

    /// Borrow the gateway for `user_id`, creating it via `factory` on
    /// first use, and mark it freshly used.
    pub async fn checkout(
        &self,
        user_id: &str,
        factory: impl FnOnce() -> Arc<dyn ProviderGateway>,
    ) -> Arc<dyn ProviderGateway> {
        let mut entries = self.entries.lock().await;
        let entry = entries.entry(user_id.to_string()).or_insert_with(|| {
            debug!(user_id, "provisioning provider gateway");
            PoolEntry {
                gateway: factory(),
                last_used: Instant::now(),
                checkouts: 0,
            }
        });
        entry.last_used = Instant::now();
        entry.checkouts += 1;
        entry.gateway.clone()
    }

    /// Sweep every entry idle longer than the configured threshold.
    /// Intended to run on a periodic background task started alongside
    /// the event hub.
    pub async fn evict_idle(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|user_id, entry| {
            let idle = entry.last_used.elapsed() < self.idle_evict;
            if !idle {
                info!(user_id, checkouts = entry.checkouts, "evicting idle provider gateway");
            }
            idle
        });
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::mock::MockProviderGateway;

    #[tokio::test]
    async fn checkout_reuses_existing_entry() {
        let pool = ProviderPool::new(Duration::from_secs(60));
        let mut calls = 0;

        let _first = pool
            .checkout("user-1", || {
                calls += 1;
                Arc::new(MockProviderGateway::new(vec!["gpt".into()]))
            })
            .await;
        let _second = pool
            .checkout("user-1", || {
                calls += 1;
                Arc::new(MockProviderGateway::new(vec!["gpt".into()]))
            })
            .await;

        assert_eq!(calls, 1);
        assert_eq!(pool.len().await, 1);
    }

    #[tokio::test]
    async fn evict_idle_removes_entries_past_the_threshold() {
        let pool = ProviderPool::new(Duration::from_millis(10));
        let _ = pool
            .checkout("user-1", || Arc::new(MockProviderGateway::new(vec!["gpt".into()])))
            .await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        let evicted = pool.evict_idle().await;
        assert_eq!(evicted, 1);
        assert_eq!(pool.len().await, 0);
    }
}
