//! §4.J layer 2 — HTTP response idempotency. A terminal response (status +
//! body) is stored under a caller-supplied key (default `snapshot_id`, or an
//! explicit `x-idempotency-key` the non-core HTTP layer would pass through)
//! and replayed byte-for-byte within a TTL window, default 60s per spec.md
//! §4.J.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use triad_store::{StateStore, StoreError};
use triad_types::IdempotencyRecord;

pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

pub struct IdempotencyCache {
    store: Arc<dyn StateStore>,
    ttl: Duration,
}

impl IdempotencyCache {
    pub fn new(store: Arc<dyn StateStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Returns the cached response for `key` if one exists and is still
    /// within the TTL window; `None` otherwise (expired rows are not
    /// evicted here, only ignored — the store is free to reap them).
    pub async fn get(&self, key: &str, cancel: &CancellationToken) -> Result<Option<IdempotencyRecord>, StoreError> {
        let record = self.store.get_idempotency_record(key, cancel).await?;
        Ok(record.filter(|r| self.is_fresh(r)))
    }

    pub async fn put(&self, key: impl Into<String>, status: u16, body: serde_json::Value, cancel: &CancellationToken) -> Result<(), StoreError> {
        let record = IdempotencyRecord { key: key.into(), status, body, created_at: Utc::now() };
        self.store.put_idempotency_record(&record, cancel).await
    }

    fn is_fresh(&self, record: &IdempotencyRecord) -> bool {
        let age = Utc::now().signed_duration_since(record.created_at);
        chrono::Duration::from_std(self.ttl).map(|ttl| age < ttl).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use triad_store::MemoryStore;

    #[tokio::test]
    async fn a_fresh_record_replays_and_an_expired_one_does_not() {
        let store = Arc::new(MemoryStore::new());
        let cancel = CancellationToken::new();

        let cache = IdempotencyCache::new(store.clone(), Duration::from_secs(60));
        cache.put("snap-1", 200, serde_json::json!({"ok": true}), &cancel).await.unwrap();
        assert!(cache.get("snap-1", &cancel).await.unwrap().is_some());

        let expired = IdempotencyCache::new(store, Duration::from_millis(0));
        assert!(expired.get("snap-1", &cancel).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn a_missing_key_returns_none() {
        let store = Arc::new(MemoryStore::new());
        let cache = IdempotencyCache::new(store, DEFAULT_TTL);
        assert!(cache.get("nope", &CancellationToken::new()).await.unwrap().is_none());
    }
}
