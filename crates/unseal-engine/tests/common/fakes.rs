//! Fake collaborators that count calls and inject failures

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use unseal_engine::store::{EncryptedObject, MemoryObjectStore, ObjectStore};
use unseal_engine::{AgeKeyManager, KeyManager, ReferenceKey, ResolveError};
use zeroize::Zeroizing;

/// In-memory store that counts `get` calls
///
/// The first `transient_failures` gets fail with a transient error, and each
/// get can be slowed down to widen race windows.
#[derive(Default)]
pub struct CountingStore {
    pub inner: MemoryObjectStore,
    gets: AtomicUsize,
    transient_failures: AtomicUsize,
    delay_ms: AtomicUsize,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn fail_next(&self, count: usize) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as usize, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for CountingStore {
    async fn get(&self, key: &ReferenceKey) -> Result<EncryptedObject, ResolveError> {
        self.gets.fetch_add(1, Ordering::SeqCst);

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }

        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ResolveError::transient("503 Service Unavailable"));
        }

        self.inner.get(key).await
    }

    async fn list(&self, location: &str, prefix: &str) -> Result<Vec<String>, ResolveError> {
        self.inner.list(location, prefix).await
    }

    fn name(&self) -> &'static str {
        "counting"
    }
}

/// Key manager that counts unwraps and can be switched to deny everything
pub struct CountingKms {
    pub inner: AgeKeyManager,
    unwraps: AtomicUsize,
    deny: AtomicBool,
}

impl CountingKms {
    pub fn new() -> Self {
        Self {
            inner: AgeKeyManager::generate(),
            unwraps: AtomicUsize::new(0),
            deny: AtomicBool::new(false),
        }
    }

    pub fn key_id(&self) -> String {
        self.inner.key_ids()[0].clone()
    }

    pub fn unwraps(&self) -> usize {
        self.unwraps.load(Ordering::SeqCst)
    }

    pub fn deny_all(&self) {
        self.deny.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl KeyManager for CountingKms {
    async fn unwrap_key(
        &self,
        key_id: &str,
        wrapped: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, ResolveError> {
        self.unwraps.fetch_add(1, Ordering::SeqCst);
        if self.deny.load(Ordering::SeqCst) {
            return Err(ResolveError::access_denied(format!(
                "caller may not use key {}",
                key_id
            )));
        }
        self.inner.unwrap_key(key_id, wrapped).await
    }

    async fn wrap_key(&self, key_id: &str, data_key: &[u8]) -> Result<Vec<u8>, ResolveError> {
        self.inner.wrap_key(key_id, data_key).await
    }

    fn name(&self) -> &'static str {
        "counting"
    }
}
