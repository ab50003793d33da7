//! Object fetcher: bounded, validated access to the object store

use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::ResolveError;
use crate::reference::{validate_location, validate_object, ReferenceKey};
use crate::store::{EncryptedObject, ObjectStore};

#[derive(Clone)]
pub struct Fetcher {
    store: Arc<dyn ObjectStore>,
    timeout: Duration,
    concurrency: usize,
}

impl Fetcher {
    pub fn new(store: Arc<dyn ObjectStore>, timeout: Duration) -> Self {
        Self {
            store,
            timeout,
            concurrency: 8,
        }
    }

    /// Parallelism used by [`Fetcher::fetch_prefix`]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn store_name(&self) -> &'static str {
        self.store.name()
    }

    /// Fetch one object; a store call that outlives the timeout is transient
    pub async fn fetch(&self, key: &ReferenceKey) -> Result<EncryptedObject, ResolveError> {
        key.validate()?;
        debug!(store = self.store.name(), reference = %key, "fetching object");

        tokio::time::timeout(self.timeout, self.store.get(key))
            .await
            .map_err(|_| {
                ResolveError::transient(format!(
                    "{} fetch of {} timed out after {}ms",
                    self.store.name(),
                    key,
                    self.timeout.as_millis()
                ))
            })?
    }

    /// Object names under a prefix
    ///
    /// Names the store returns that would not survive validation (for
    /// example `a/../b` in a bucket) are skipped rather than fetched.
    pub async fn list(&self, location: &str, prefix: &str) -> Result<Vec<String>, ResolveError> {
        validate_location(location)?;

        let names = tokio::time::timeout(self.timeout, self.store.list(location, prefix))
            .await
            .map_err(|_| {
                ResolveError::transient(format!(
                    "{} listing of {} timed out after {}ms",
                    self.store.name(),
                    location,
                    self.timeout.as_millis()
                ))
            })??;

        Ok(names
            .into_iter()
            .filter(|name| match validate_object(name) {
                Ok(()) => true,
                Err(e) => {
                    warn!(location = %location, "skipping unusable object name: {}", e.detail());
                    false
                }
            })
            .collect())
    }

    /// Every object under a prefix, in name order; the first failure wins
    ///
    /// For embedders that want the sealed documents themselves, e.g. to
    /// mirror a location. `Engine::materialize_prefix` lists and then goes
    /// through the scheduler instead so it gets caching and retries.
    pub async fn fetch_prefix(
        &self,
        location: &str,
        prefix: &str,
    ) -> Result<Vec<(ReferenceKey, EncryptedObject)>, ResolveError> {
        let names = self.list(location, prefix).await?;
        debug!(location = %location, prefix = %prefix, count = names.len(), "fetching prefix");

        stream::iter(names)
            .map(|name| async move {
                let key = ReferenceKey::new(location, name);
                let object = self.fetch(&key).await?;
                Ok::<_, ResolveError>((key, object))
            })
            .buffered(self.concurrency)
            .try_collect()
            .await
    }
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher")
            .field("store", &self.store.name())
            .field("timeout", &self.timeout)
            .field("concurrency", &self.concurrency)
            .finish()
    }
}
