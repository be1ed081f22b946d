use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use super::manager::{CredentialManager, RetryPolicy};

pub const DEFAULT_CACHE_CAPACITY: usize = 100;

struct CacheInner {
    managers: HashMap<String, Arc<CredentialManager>>,
    /// Keys ordered least- to most-recently-used.
    order: Vec<String>,
}

/// Bounded LRU of per-tenant credential managers, keyed by refresh token.
///
/// `get_or_create` is atomic under one lock so two concurrent misses on the
/// same refresh token never construct two managers.
pub struct CredentialCache {
    capacity: usize,
    refresh_threshold: Option<i64>,
    retry_policy: RetryPolicy,
    inner: Mutex<CacheInner>,
}

impl CredentialCache {
    pub fn new(capacity: usize, refresh_threshold: Option<i64>, retry_policy: RetryPolicy) -> Self {
        Self {
            capacity: capacity.max(1),
            refresh_threshold,
            retry_policy,
            inner: Mutex::new(CacheInner {
                managers: HashMap::new(),
                order: Vec::new(),
            }),
        }
    }

    pub async fn get_or_create(
        &self,
        refresh_token: &str,
        region: Option<String>,
        profile_arn: Option<String>,
    ) -> Arc<CredentialManager> {
        let mut inner = self.inner.lock().await;

        if let Some(manager) = inner.managers.get(refresh_token).cloned() {
            // Hit: move to most-recently-used.
            inner.order.retain(|k| k != refresh_token);
            inner.order.push(refresh_token.to_string());
            return manager;
        }

        debug!(
            "Creating credential manager for tenant token {}...",
            token_preview(refresh_token)
        );
        let manager = Arc::new(CredentialManager::new(
            Some(refresh_token.to_string()),
            profile_arn,
            region,
            None,
            self.refresh_threshold,
            self.retry_policy,
        ));
        inner
            .managers
            .insert(refresh_token.to_string(), manager.clone());
        inner.order.push(refresh_token.to_string());

        if inner.order.len() > self.capacity {
            let evicted = inner.order.remove(0);
            inner.managers.remove(&evicted);
            info!(
                "Credential cache full, evicted LRU tenant {}",
                token_preview(&evicted)
            );
        }

        manager
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.managers.len()
    }

    pub async fn contains(&self, refresh_token: &str) -> bool {
        self.inner.lock().await.managers.contains_key(refresh_token)
    }
}

/// Refresh tokens are opaque secrets; only a short prefix ever reaches logs.
fn token_preview(token: &str) -> String {
    let prefix: String = token.chars().take(8).collect();
    format!("{}…", prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cache(capacity: usize) -> CredentialCache {
        CredentialCache::new(capacity, None, RetryPolicy::default())
    }

    #[tokio::test]
    async fn test_get_or_create_returns_same_manager() {
        let cache = test_cache(10);
        let a = cache.get_or_create("rt_1", None, None).await;
        let b = cache.get_or_create("rt_1", None, None).await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_distinct_tokens_distinct_managers() {
        let cache = test_cache(10);
        let a = cache.get_or_create("rt_1", None, None).await;
        let b = cache.get_or_create("rt_2", None, None).await;
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let cache = test_cache(3);
        for i in 0..5 {
            cache.get_or_create(&format!("rt_{}", i), None, None).await;
        }
        assert_eq!(cache.len().await, 3);
        // rt_0 and rt_1 are the least-recently-used and must be gone.
        assert!(!cache.contains("rt_0").await);
        assert!(!cache.contains("rt_1").await);
        assert!(cache.contains("rt_2").await);
        assert!(cache.contains("rt_3").await);
        assert!(cache.contains("rt_4").await);
    }

    #[tokio::test]
    async fn test_hit_refreshes_recency() {
        let cache = test_cache(2);
        cache.get_or_create("rt_a", None, None).await;
        cache.get_or_create("rt_b", None, None).await;
        // Touch rt_a so rt_b becomes the LRU entry.
        cache.get_or_create("rt_a", None, None).await;
        cache.get_or_create("rt_c", None, None).await;
        assert!(cache.contains("rt_a").await);
        assert!(!cache.contains("rt_b").await);
        assert!(cache.contains("rt_c").await);
    }

    #[tokio::test]
    async fn test_concurrent_misses_create_one_manager() {
        let cache = Arc::new(test_cache(10));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.get_or_create("rt_shared", None, None).await
            }));
        }
        let mut managers = Vec::new();
        for h in handles {
            managers.push(h.await.unwrap());
        }
        assert_eq!(cache.len().await, 1);
        for m in &managers[1..] {
            assert!(Arc::ptr_eq(&managers[0], m));
        }
    }

    #[tokio::test]
    async fn test_manager_inherits_region() {
        let cache = test_cache(4);
        let m = cache
            .get_or_create("rt_eu", Some("eu-west-1".into()), Some("arn:x".into()))
            .await;
        assert_eq!(m.region().await, "eu-west-1");
        assert_eq!(m.profile_arn().await.as_deref(), Some("arn:x"));
    }

    #[test]
    fn test_token_preview_truncates() {
        let preview = token_preview("super-secret-refresh-token");
        assert!(preview.len() < 15);
        assert!(!preview.contains("refresh"));
    }
}
