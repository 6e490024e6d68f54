use std::{sync::Arc, time::Duration};

use moka::future::Cache;
use serde_json::Value;
use tokio::sync::Mutex;

/// Short-lived cache for aggregate read responses, with a per-key lock so
/// that concurrent misses fill the entry once.
#[derive(Clone)]
pub struct ResponseCache {
    entries: Cache<String, Value>,
    fill_locks: Cache<String, Arc<Mutex<()>>>,
}

impl ResponseCache {
    pub fn new(ttl_seconds: u64, max_entries: u64) -> Self {
        let ttl = Duration::from_secs(ttl_seconds.max(1));
        Self {
            entries: Cache::builder()
                .max_capacity(max_entries.max(1))
                .time_to_live(ttl)
                .build(),
            fill_locks: Cache::builder()
                .max_capacity(max_entries.max(1))
                .time_to_idle(ttl * 4)
                .build(),
        }
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).await
    }

    pub async fn put(&self, key: String, value: Value) {
        self.entries.insert(key, value).await;
    }

    pub async fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        self.fill_locks
            .get_with(key.to_string(), async { Arc::new(Mutex::new(())) })
            .await
    }

    pub fn clear(&self) {
        self.entries.invalidate_all();
    }
}
