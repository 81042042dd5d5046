//! Client-cache coordination.
//!
//! The backend has no change-notification mechanism, so after a mutation the
//! coordinator invalidates affected query keys in waves: an immediate
//! invalidation, a short delay, a forced refetch of the user-visible keys,
//! another short delay, and a final defensive invalidation to absorb
//! eventual-consistency lag. Delays are small fixed constants from config.
//!
//! The invalidator is injected rather than being a module-level singleton so
//! tests can substitute a recording fake and assert exactly which keys were
//! touched and in what order.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::config::CacheConfig;

/// Well-known query keys touched by document mutations.
pub fn key_all_documents() -> String {
    "documents".to_string()
}

pub fn key_document(id: i64) -> String {
    format!("documents/{}", id)
}

pub fn key_related(id: i64) -> String {
    format!("documents/{}/related", id)
}

pub fn key_document_stats() -> String {
    "documents/stats".to_string()
}

/// Invalidation target injected into the orchestrator.
///
/// Implementations must be infallible from the caller's point of view:
/// cache problems are logged and retried by the wave mechanism, never
/// surfaced to the user.
#[async_trait]
pub trait CacheInvalidator: Send + Sync {
    /// Mark the named query results stale.
    async fn invalidate(&self, keys: &[String]);

    /// Drop the named entries entirely so the next read reloads from the
    /// backing store.
    async fn refetch(&self, keys: &[String]);
}

/// An in-memory named query cache.
#[derive(Default)]
pub struct QueryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

struct CacheEntry {
    value: serde_json::Value,
    stale: bool,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, key: &str, value: serde_json::Value) {
        self.entries.write().await.insert(
            key.to_string(),
            CacheEntry {
                value,
                stale: false,
            },
        );
    }

    /// Fresh value for the key, or `None` if absent or stale.
    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|e| !e.stale)
            .map(|e| e.value.clone())
    }

    /// Value regardless of staleness, for callers that tolerate stale reads.
    pub async fn get_stale(&self, key: &str) -> Option<serde_json::Value> {
        self.entries.read().await.get(key).map(|e| e.value.clone())
    }
}

#[async_trait]
impl CacheInvalidator for QueryCache {
    async fn invalidate(&self, keys: &[String]) {
        let mut entries = self.entries.write().await;
        for key in keys {
            if let Some(entry) = entries.get_mut(key) {
                entry.stale = true;
            }
        }
    }

    async fn refetch(&self, keys: &[String]) {
        let mut entries = self.entries.write().await;
        for key in keys {
            entries.remove(key);
        }
    }
}

/// Runs the multi-wave invalidation sequence after a mutation.
pub struct CacheCoordinator {
    invalidator: Arc<dyn CacheInvalidator>,
    config: CacheConfig,
}

impl CacheCoordinator {
    pub fn new(invalidator: Arc<dyn CacheInvalidator>, config: CacheConfig) -> Self {
        Self {
            invalidator,
            config,
        }
    }

    /// Invalidate → delay → forced refetch → delay → final invalidation.
    ///
    /// Never fails: cache convergence is best-effort and invisible to the
    /// user.
    pub async fn after_mutation(&self, keys: &[String]) {
        tracing::debug!("cache wave 1: invalidate {:?}", keys);
        self.invalidator.invalidate(keys).await;

        tokio::time::sleep(Duration::from_millis(self.config.invalidate_delay_ms)).await;

        tracing::debug!("cache wave 2: refetch {:?}", keys);
        self.invalidator.refetch(keys).await;

        tokio::time::sleep(Duration::from_millis(self.config.refetch_delay_ms)).await;

        tracing::debug!("cache wave 3: invalidate {:?}", keys);
        self.invalidator.invalidate(keys).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn fresh_then_stale_then_gone() {
        let cache = QueryCache::new();
        cache.put("documents", json!([1, 2, 3])).await;
        assert_eq!(cache.get("documents").await, Some(json!([1, 2, 3])));

        cache.invalidate(&["documents".to_string()]).await;
        assert_eq!(cache.get("documents").await, None);
        assert_eq!(cache.get_stale("documents").await, Some(json!([1, 2, 3])));

        cache.refetch(&["documents".to_string()]).await;
        assert_eq!(cache.get_stale("documents").await, None);
    }

    #[tokio::test]
    async fn waves_converge_on_reload() {
        let cache = Arc::new(QueryCache::new());
        cache.put("documents", json!(["old"])).await;

        let coordinator = CacheCoordinator::new(
            cache.clone(),
            CacheConfig {
                invalidate_delay_ms: 1,
                refetch_delay_ms: 1,
            },
        );
        coordinator.after_mutation(&[key_all_documents()]).await;

        // The entry is gone; the next reader reloads and repopulates.
        assert_eq!(cache.get("documents").await, None);
        cache.put("documents", json!(["old", "new"])).await;
        assert_eq!(cache.get("documents").await, Some(json!(["old", "new"])));
    }
}
