//! Resolution scheduler
//!
//! Resolves a set of references concurrently:
//!
//! - identical references are resolved once (deduplicated here, and
//!   collapsed across concurrent passes by the cache)
//! - at most `max_concurrency` fetch+decrypt attempts are in flight
//! - transient failures are retried with jittered backoff, others surface
//!   immediately
//! - cancelling the token drops every outstanding task and the pass reports
//!   `Cancelled`

use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use unseal_core::retry::{Retrier, RetryError, TracingObserver};
use unseal_core::{EngineConfig, RetryPolicy};

use crate::cache::SecretCache;
use crate::envelope::EnvelopeDecryptor;
use crate::error::ResolveError;
use crate::fetch::Fetcher;
use crate::reference::ReferenceKey;
use crate::types::ResolvedSecret;

/// Result of resolving one distinct reference
pub type ResolutionOutcome = Result<Arc<ResolvedSecret>, ResolveError>;

pub struct Scheduler {
    fetcher: Fetcher,
    decryptor: EnvelopeDecryptor,
    cache: Arc<SecretCache>,
    permits: Arc<Semaphore>,
    retry: RetryPolicy,
    force_refresh: bool,
}

impl Scheduler {
    pub fn new(
        fetcher: Fetcher,
        decryptor: EnvelopeDecryptor,
        cache: Arc<SecretCache>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            fetcher,
            decryptor,
            cache,
            permits: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
            retry: config.retry.clone(),
            force_refresh: config.force_refresh,
        }
    }

    pub fn cache(&self) -> &Arc<SecretCache> {
        &self.cache
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    /// Resolve every distinct key; outcomes are keyed by reference
    ///
    /// Returns `Err(Cancelled)` if the token fires before all outcomes are in.
    pub async fn resolve_all(
        &self,
        keys: impl IntoIterator<Item = ReferenceKey>,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<ReferenceKey, ResolutionOutcome>, ResolveError> {
        let distinct: BTreeSet<ReferenceKey> = keys.into_iter().collect();
        debug!(references = distinct.len(), "resolving references");

        let mut pending: FuturesUnordered<_> = distinct
            .into_iter()
            .map(|key| async move {
                let outcome = self.resolve_one(&key).await;
                (key, outcome)
            })
            .collect();

        let mut outcomes = BTreeMap::new();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(outstanding = pending.len(), "resolution cancelled");
                    return Err(ResolveError::Cancelled);
                }
                next = pending.next() => match next {
                    Some((key, outcome)) => {
                        outcomes.insert(key, outcome);
                    }
                    None => break,
                },
            }
        }

        Ok(outcomes)
    }

    /// Resolve one reference through the cache
    pub async fn resolve_one(&self, key: &ReferenceKey) -> ResolutionOutcome {
        self.cache
            .get_or_resolve(key, self.force_refresh, || self.fetch_and_decrypt(key))
            .await
    }

    async fn fetch_and_decrypt(&self, key: &ReferenceKey) -> Result<ResolvedSecret, ResolveError> {
        key.validate()?;

        let retrier = Retrier::new(&self.retry)
            .observed_by(TracingObserver::new(format!("resolve {}", key)));

        retrier
            .run(|| async {
                // One permit per attempt; backoff sleeps do not hold a slot
                let _permit = self
                    .permits
                    .acquire()
                    .await
                    .map_err(|_| ResolveError::Cancelled)?;

                let object = self.fetcher.fetch(key).await?;
                let plaintext = self.decryptor.decrypt(&object).await?;
                debug!(reference = %key, bytes = plaintext.len(), "resolved reference");
                Ok::<_, ResolveError>(ResolvedSecret::new(
                    key.clone(),
                    plaintext,
                    object.generation.clone(),
                ))
            })
            .await
            .map_err(RetryError::into_inner)
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("fetcher", &self.fetcher)
            .field("available_permits", &self.permits.available_permits())
            .field("retry", &self.retry)
            .field("force_refresh", &self.force_refresh)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::seal;
    use crate::kms::{AgeKeyManager, KeyManager};
    use crate::store::{EncryptedObject, ObjectStore};
    use async_trait::async_trait;
    use mockall::mock;
    use std::time::Duration;

    mock! {
        Store {}

        #[async_trait]
        impl ObjectStore for Store {
            async fn get(&self, key: &ReferenceKey) -> Result<EncryptedObject, ResolveError>;
            async fn list(&self, location: &str, prefix: &str) -> Result<Vec<String>, ResolveError>;
            fn name(&self) -> &'static str;
        }
    }

    async fn sealed(kms: &AgeKeyManager, name: &str, plaintext: &[u8]) -> EncryptedObject {
        let key_id = kms.key_ids()[0].clone();
        seal(kms, &key_id, name, plaintext)
            .await
            .unwrap()
            .into_object(name, Some("1".to_string()))
            .unwrap()
    }

    fn scheduler(store: MockStore, kms: Arc<AgeKeyManager>, config: &EngineConfig) -> Scheduler {
        let fetcher = Fetcher::new(Arc::new(store), config.timeout());
        let decryptor = EnvelopeDecryptor::new(kms as Arc<dyn KeyManager>, config.timeout());
        Scheduler::new(fetcher, decryptor, Arc::new(SecretCache::new()), config)
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let kms = Arc::new(AgeKeyManager::generate());
        let object = sealed(&kms, "api-key", b"abc123").await;

        let mut store = MockStore::new();
        store.expect_name().return_const("mock");
        let mut calls = 0;
        store.expect_get().times(3).returning(move |_| {
            calls += 1;
            if calls < 3 {
                Err(ResolveError::transient("503 Slow Down"))
            } else {
                Ok(object.clone())
            }
        });

        let sched = scheduler(store, kms, &EngineConfig::default());
        let secret = sched
            .resolve_one(&ReferenceKey::new("proj", "api-key"))
            .await
            .unwrap();
        assert_eq!(secret.as_str(), Some("abc123"));
        assert_eq!(secret.generation(), Some("1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_escalates_after_attempt_limit() {
        let mut store = MockStore::new();
        store.expect_name().return_const("mock");
        store
            .expect_get()
            .times(4)
            .returning(|_| Err(ResolveError::transient("connection reset")));

        let sched = scheduler(store, Arc::new(AgeKeyManager::generate()), &EngineConfig::default());
        let err = sched
            .resolve_one(&ReferenceKey::new("proj", "api-key"))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Transient(_)));
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let mut store = MockStore::new();
        store.expect_name().return_const("mock");
        store
            .expect_get()
            .times(1)
            .returning(|key| {
                Err(ResolveError::not_found(format!(
                    "object {} does not exist",
                    key
                )))
            });

        let sched = scheduler(store, Arc::new(AgeKeyManager::generate()), &EngineConfig::default());
        let err = sched
            .resolve_one(&ReferenceKey::new("proj", "missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_duplicate_keys_resolve_once() {
        let kms = Arc::new(AgeKeyManager::generate());
        let object = sealed(&kms, "db", b"pw").await;

        let mut store = MockStore::new();
        store.expect_name().return_const("mock");
        store
            .expect_get()
            .times(1)
            .returning(move |_| Ok(object.clone()));

        let sched = scheduler(store, kms, &EngineConfig::default());
        let key = ReferenceKey::new("proj", "db");
        let outcomes = sched
            .resolve_all(vec![key.clone(), key.clone(), key.clone()], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[&key].as_ref().unwrap().as_str(), Some("pw"));
    }

    #[tokio::test]
    async fn test_outcomes_reported_per_reference() {
        let kms = Arc::new(AgeKeyManager::generate());
        let object = sealed(&kms, "present", b"v").await;

        let mut store = MockStore::new();
        store.expect_name().return_const("mock");
        store.expect_get().returning(move |key| {
            if key.object == "present" {
                Ok(object.clone())
            } else {
                Err(ResolveError::access_denied("bucket policy"))
            }
        });

        let sched = scheduler(store, kms, &EngineConfig::default());
        let present = ReferenceKey::new("proj", "present");
        let denied = ReferenceKey::new("proj", "denied");
        let outcomes = sched
            .resolve_all(vec![present.clone(), denied.clone()], &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcomes[&present].is_ok());
        assert!(matches!(outcomes[&denied], Err(ResolveError::AccessDenied(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_reports_cancelled() {
        let mut store = MockStore::new();
        store.expect_name().return_const("mock");
        store
            .expect_get()
            .returning(|_| Err(ResolveError::transient("throttled")));

        let mut config = EngineConfig::default();
        config.retry.max_attempts = 100;
        config.retry.initial_delay_ms = 1000;
        let sched = scheduler(store, Arc::new(AgeKeyManager::generate()), &config);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            trigger.cancel();
        });

        let err = sched
            .resolve_all(vec![ReferenceKey::new("proj", "slow")], &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, ResolveError::Cancelled);
    }
}
