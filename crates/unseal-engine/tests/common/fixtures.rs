//! Store fixture that seals plaintext and builds engines

use std::sync::Arc;
use unseal_core::EngineConfig;
use unseal_engine::{seal, Engine, SecretCache};

use super::fakes::{CountingKms, CountingStore};

pub struct Fixture {
    pub store: Arc<CountingStore>,
    pub kms: Arc<CountingKms>,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            store: Arc::new(CountingStore::new()),
            kms: Arc::new(CountingKms::new()),
        }
    }

    /// Seal `plaintext` as a new generation of `location/object`
    pub async fn add(&self, location: &str, object: &str, plaintext: &[u8]) -> String {
        let doc = seal(self.kms.as_ref(), &self.kms.key_id(), object, plaintext)
            .await
            .unwrap();
        self.store.inner.insert(location, object, doc).await.unwrap()
    }

    pub fn engine(&self) -> Engine {
        self.engine_with(EngineConfig::default())
    }

    pub fn engine_with(&self, config: EngineConfig) -> Engine {
        Engine::builder(config)
            .store(self.store.clone())
            .key_manager(self.kms.clone())
            .build()
            .unwrap()
    }

    pub fn engine_sharing(&self, cache: Arc<SecretCache>) -> Engine {
        Engine::builder(EngineConfig::default())
            .store(self.store.clone())
            .key_manager(self.kms.clone())
            .shared_cache(cache)
            .build()
            .unwrap()
    }
}
