//! In-memory cache of resolved secrets
//!
//! Each reference gets a slot that is initialized at most once, so callers
//! resolving the same reference at the same time wait on one fetch+decrypt
//! instead of starting their own. Failed resolutions are not cached.
//! Plaintext is zeroed when an evicted entry's last holder drops it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::debug;

use crate::error::ResolveError;
use crate::reference::ReferenceKey;
use crate::types::ResolvedSecret;

type Slot = Arc<OnceCell<Arc<ResolvedSecret>>>;

/// Statistics about cache usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Resolved entries currently held
    pub entries: usize,
}

impl CacheStats {
    /// Hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Process-lifetime secret cache
///
/// Engines get their own cache unless one is shared with them explicitly.
#[derive(Default)]
pub struct SecretCache {
    slots: RwLock<HashMap<ReferenceKey, Slot>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl SecretCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached secret, if resolved
    pub async fn get(&self, key: &ReferenceKey) -> Option<Arc<ResolvedSecret>> {
        let found = self
            .slots
            .read()
            .await
            .get(key)
            .and_then(|slot| slot.get().cloned());
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    pub async fn put(&self, secret: ResolvedSecret) -> Arc<ResolvedSecret> {
        let key = secret.key().clone();
        let secret = Arc::new(secret);
        let slot = Arc::new(OnceCell::new_with(Some(Arc::clone(&secret))));
        self.slots.write().await.insert(key, slot);
        secret
    }

    /// Return the cached secret or run `init` to produce it
    ///
    /// Concurrent callers for the same key share one `init`. With
    /// `force_refresh` the current entry is discarded first.
    pub async fn get_or_resolve<F, Fut>(
        &self,
        key: &ReferenceKey,
        force_refresh: bool,
        init: F,
    ) -> Result<Arc<ResolvedSecret>, ResolveError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ResolvedSecret, ResolveError>>,
    {
        let slot = self.slot(key, force_refresh).await;

        let mut initialized_here = false;
        let result = slot
            .get_or_try_init(|| {
                initialized_here = true;
                async move { init().await.map(Arc::new) }
            })
            .await
            .cloned();

        if initialized_here {
            self.misses.fetch_add(1, Ordering::Relaxed);
        } else {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }

        if result.is_err() {
            // Leave no empty slot behind; the next pass starts afresh
            let mut slots = self.slots.write().await;
            if let Some(current) = slots.get(key) {
                if Arc::ptr_eq(current, &slot) && !current.initialized() {
                    slots.remove(key);
                }
            }
        }

        result
    }

    async fn slot(&self, key: &ReferenceKey, force_refresh: bool) -> Slot {
        if !force_refresh {
            if let Some(slot) = self.slots.read().await.get(key) {
                return Arc::clone(slot);
            }
        }

        let mut slots = self.slots.write().await;
        if force_refresh {
            debug!(reference = %key, "discarding cached entry");
            let slot: Slot = Arc::new(OnceCell::new());
            slots.insert(key.clone(), Arc::clone(&slot));
            slot
        } else {
            Arc::clone(slots.entry(key.clone()).or_default())
        }
    }

    /// Drop one entry; returns true if it was cached
    pub async fn invalidate(&self, key: &ReferenceKey) -> bool {
        self.slots
            .write()
            .await
            .remove(key)
            .is_some_and(|slot| slot.initialized())
    }

    pub async fn clear(&self) {
        let mut slots = self.slots.write().await;
        let count = slots.len();
        slots.clear();
        debug!(count, "cleared secret cache");
    }

    pub async fn len(&self) -> usize {
        self.slots
            .read()
            .await
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len().await,
        }
    }
}

impl std::fmt::Debug for SecretCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCache")
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .field("misses", &self.misses.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use zeroize::Zeroizing;

    fn secret(key: &ReferenceKey, value: &str) -> ResolvedSecret {
        ResolvedSecret::new(key.clone(), Zeroizing::new(value.as_bytes().to_vec()), None)
    }

    #[tokio::test]
    async fn test_get_put() {
        let cache = SecretCache::new();
        let key = ReferenceKey::new("proj", "api-key");
        assert!(cache.get(&key).await.is_none());

        cache.put(secret(&key, "abc123")).await;
        assert_eq!(cache.get(&key).await.unwrap().as_str(), Some("abc123"));

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hit_rate(), 50.0);
    }

    #[tokio::test]
    async fn test_second_call_is_a_hit() {
        let cache = SecretCache::new();
        let key = ReferenceKey::new("proj", "api-key");
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = cache
                .get_or_resolve(&key, false, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(secret(&key, "abc123"))
                })
                .await
                .unwrap();
            assert_eq!(value.as_str(), Some("abc123"));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats().await;
        assert_eq!((stats.hits, stats.misses), (2, 1));
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_init() {
        let cache = Arc::new(SecretCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let key = ReferenceKey::new("proj", "db");

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_resolve(&key, false, || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(secret(&key, "pw"))
                    })
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().as_str(), Some("pw"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let cache = SecretCache::new();
        let key = ReferenceKey::new("proj", "flaky");

        let err = cache
            .get_or_resolve(&key, false, || async {
                Err(ResolveError::transient("503"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Transient(_)));
        assert!(cache.is_empty().await);

        let ok = cache
            .get_or_resolve(&key, false, || async { Ok(secret(&key, "v")) })
            .await
            .unwrap();
        assert_eq!(ok.as_str(), Some("v"));
    }

    #[tokio::test]
    async fn test_force_refresh_refetches() {
        let cache = SecretCache::new();
        let key = ReferenceKey::new("proj", "rotating");

        cache
            .get_or_resolve(&key, false, || async { Ok(secret(&key, "old")) })
            .await
            .unwrap();
        let fresh = cache
            .get_or_resolve(&key, true, || async { Ok(secret(&key, "new")) })
            .await
            .unwrap();
        assert_eq!(fresh.as_str(), Some("new"));
        assert_eq!(cache.get(&key).await.unwrap().as_str(), Some("new"));
    }

    #[tokio::test]
    async fn test_invalidate_and_clear() {
        let cache = SecretCache::new();
        let a = ReferenceKey::new("proj", "a");
        let b = ReferenceKey::new("proj", "b");
        cache.put(secret(&a, "1")).await;
        cache.put(secret(&b, "2")).await;

        assert!(cache.invalidate(&a).await);
        assert!(!cache.invalidate(&a).await);
        assert_eq!(cache.len().await, 1);

        cache.clear().await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_generations_are_separate_entries() {
        let cache = SecretCache::new();
        let latest = ReferenceKey::new("proj", "db");
        let pinned = ReferenceKey::new("proj", "db").with_generation("1");
        cache.put(secret(&latest, "new")).await;
        assert!(cache.get(&pinned).await.is_none());
    }
}
