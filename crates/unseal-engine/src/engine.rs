//! Resolution engine
//!
//! Ties the pipeline together: bindings are classified, their distinct
//! references resolved by the [`Scheduler`], and the results applied by the
//! [`Injector`]. A pass is all-or-nothing up to injection: if any reference
//! fails, nothing is injected and every affected binding is reported.
//!
//! An engine is built from explicit configuration and does nothing until it
//! is called. Each engine owns its cache unless one is shared through
//! [`EngineBuilder::shared_cache`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use unseal_core::{EngineConfig, StoreConfig};

use crate::binding::{BindingSet, BindingValue};
use crate::cache::{CacheStats, SecretCache};
use crate::envelope::EnvelopeDecryptor;
use crate::error::{BindingFailure, Error, InjectionFailure, ResolveError, Result};
use crate::fetch::Fetcher;
use crate::inject::Injector;
use crate::kms::{AgeKeyManager, KeyManager};
use crate::reference::{Destination, ReferenceKey, SecretReference};
use crate::scheduler::Scheduler;
use crate::security::AuditLog;
use crate::store::{FileObjectStore, ObjectStore, S3ObjectStore};
use crate::types::ResolvedSecret;

/// Outcome of resolving a single reference string
#[derive(Debug, Clone)]
pub enum ResolvedValue {
    /// Plaintext held in memory
    Plaintext(Arc<ResolvedSecret>),
    /// Plaintext written to this file
    File(PathBuf),
}

/// Builder for an [`Engine`]
pub struct EngineBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn ObjectStore>>,
    key_manager: Option<Arc<dyn KeyManager>>,
    cache: Option<Arc<SecretCache>>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            store: None,
            key_manager: None,
            cache: None,
        }
    }

    pub fn store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn key_manager(mut self, key_manager: Arc<dyn KeyManager>) -> Self {
        self.key_manager = Some(key_manager);
        self
    }

    /// Share a cache with other engines instead of creating a private one
    pub fn shared_cache(mut self, cache: Arc<SecretCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn build(self) -> Result<Engine> {
        self.config.validate()?;
        let store = self
            .store
            .ok_or_else(|| Error::backend("no object store configured"))?;
        let key_manager = self
            .key_manager
            .ok_or_else(|| Error::backend("no key manager configured"))?;
        let cache = self.cache.unwrap_or_default();

        let timeout = self.config.timeout();
        let fetcher = Fetcher::new(store, timeout).with_concurrency(self.config.max_concurrency);
        let decryptor = EnvelopeDecryptor::new(key_manager, timeout);
        let scheduler = Scheduler::new(fetcher, decryptor, cache, &self.config);

        Ok(Engine {
            injector: Injector::new(self.config.file_mode),
            scheduler,
            cancel: CancellationToken::new(),
            config: self.config,
        })
    }
}

pub struct Engine {
    config: EngineConfig,
    scheduler: Scheduler,
    injector: Injector,
    cancel: CancellationToken,
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Build an engine with the store and key source named in `config`
    pub async fn from_config(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let store: Arc<dyn ObjectStore> = match &config.store {
            StoreConfig::File { root } => Arc::new(FileObjectStore::new(root.clone())),
            StoreConfig::S3 { region, endpoint } => {
                Arc::new(S3ObjectStore::new(region, endpoint.as_deref()).await?)
            }
        };
        let key_manager = Arc::new(AgeKeyManager::from_config(&config.keys)?);
        debug!(store = store.name(), keys = ?key_manager.key_ids(), "engine backends ready");

        Self::builder(config)
            .store(store)
            .key_manager(key_manager)
            .build()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<SecretCache> {
        self.scheduler.cache()
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache().stats().await
    }

    /// Token that cancels every pass running on this engine
    ///
    /// Once cancelled the engine stays cancelled; build a new one to retry.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Resolve every reference in `bindings` and return the resolved set
    ///
    /// The input is left untouched. On error no binding has been replaced,
    /// except for files reported as succeeded by a partial injection.
    pub async fn resolve(&self, bindings: &BindingSet) -> Result<BindingSet> {
        let mut resolved_set = bindings.clone();
        if !bindings.has_references() {
            return Ok(resolved_set);
        }

        let resolved = self.resolve_references(bindings).await?;
        self.ensure_not_cancelled()?;
        self.injector.inject(&mut resolved_set, &resolved).await?;

        info!(
            bindings = bindings.len(),
            references = resolved.len(),
            "resolved bindings"
        );
        Ok(resolved_set)
    }

    /// Resolve `bindings`, replacing it only if the whole pass succeeds
    pub async fn resolve_in_place(&self, bindings: &mut BindingSet) -> Result<()> {
        *bindings = self.resolve(bindings).await?;
        Ok(())
    }

    /// Resolve plain key/value pairs, returning them in the same order
    pub async fn resolve_pairs<I, K, V>(&self, pairs: I) -> Result<Vec<(String, String)>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let bindings = BindingSet::parse(pairs)?;
        Ok(self.resolve(&bindings).await?.into_pairs())
    }

    /// Resolve one reference string
    ///
    /// With a destination the plaintext is written there and the path is
    /// returned instead.
    pub async fn resolve_reference(&self, raw: &str) -> Result<ResolvedValue> {
        let reference =
            SecretReference::parse(raw).map_err(|e| Error::single(raw, raw, &e))?;
        let key = reference.key().clone();

        let mut outcomes = self
            .scheduler
            .resolve_all([key.clone()], &self.cancel)
            .await
            .map_err(|_| Error::Cancelled)?;
        let outcome = outcomes
            .remove(&key)
            .unwrap_or(Err(ResolveError::Cancelled));
        audit("access", raw, None, &outcome);
        let secret = outcome.map_err(|e| Error::single(raw, raw, &e))?;
        self.ensure_not_cancelled()?;

        let written = match reference.destination() {
            None => return Ok(ResolvedValue::Plaintext(secret)),
            Some(Destination::Path(path)) => self
                .injector
                .write_file(path, secret.plaintext())
                .await
                .map(|_| path.clone()),
            Some(Destination::TempFile) => {
                self.injector
                    .write_temp_file(reference.object(), secret.plaintext())
                    .await
            }
        };

        written.map(ResolvedValue::File).map_err(|e| Error::PartialInjection {
            succeeded: Vec::new(),
            failed: vec![InjectionFailure {
                binding: raw.to_string(),
                destination: match reference.destination() {
                    Some(Destination::Path(path)) => Some(path.clone()),
                    _ => None,
                },
                detail: e.to_string(),
            }],
        })
    }

    /// Object names under `prefix` in a store location
    pub async fn list(&self, location: &str, prefix: &str) -> Result<Vec<String>> {
        self.scheduler
            .fetcher()
            .list(location, prefix)
            .await
            .map_err(|e| Error::single(location, &format!("secret://{}/{}", location, prefix), &e))
    }

    /// Resolve every object under a prefix into files below `dir`
    ///
    /// Each object is written to `dir/<object name>`. `dir` must exist;
    /// subdirectories for nested object names are created, owner-only, once
    /// every object has resolved. Returns the written paths in name order.
    pub async fn materialize_prefix(
        &self,
        location: &str,
        prefix: &str,
        dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        let dir = tokio::fs::canonicalize(dir).await.map_err(|e| {
            Error::backend(format!("target directory {}: {}", dir.display(), e))
        })?;
        let names = self.list(location, prefix).await?;

        let mut bindings = BindingSet::new();
        let mut paths = Vec::with_capacity(names.len());
        for name in names {
            let path = dir.join(&name);
            let reference = SecretReference::new(
                ReferenceKey::new(location, name.as_str()),
                Some(Destination::Path(path.clone())),
            );
            bindings.push(
                name,
                BindingValue::Reference {
                    raw: reference.to_string(),
                    reference,
                },
            );
            paths.push(path);
        }

        let resolved = self.resolve_references(&bindings).await?;
        self.ensure_not_cancelled()?;

        for path in &paths {
            if let Some(parent) = path.parent().filter(|p| *p != dir.as_path()) {
                create_private_dir(parent).await.map_err(|e| {
                    Error::backend(format!("cannot create {}: {}", parent.display(), e))
                })?;
            }
        }

        let mut injected = bindings;
        self.injector.inject(&mut injected, &resolved).await?;
        info!(location = %location, prefix = %prefix, files = paths.len(), "materialized prefix");
        Ok(paths)
    }

    /// Resolve the distinct references of `bindings`, failing closed
    async fn resolve_references(
        &self,
        bindings: &BindingSet,
    ) -> Result<BTreeMap<ReferenceKey, Arc<ResolvedSecret>>> {
        let outcomes = self
            .scheduler
            .resolve_all(
                bindings.references().map(|(_, r)| r.key().clone()),
                &self.cancel,
            )
            .await
            .map_err(|_| Error::Cancelled)?;

        let mut failures = Vec::new();
        for (binding, reference) in bindings.references() {
            let raw = bindings.raw_reference(binding).unwrap_or_default();
            let outcome = outcomes
                .get(reference.key())
                .cloned()
                .unwrap_or(Err(ResolveError::Cancelled));
            audit("resolve", raw, Some(binding), &outcome);

            match outcome {
                Ok(_) => {}
                Err(ResolveError::Cancelled) => return Err(Error::Cancelled),
                Err(err) => failures.push(BindingFailure {
                    binding: binding.to_string(),
                    reference: raw.to_string(),
                    kind: err.kind(),
                    detail: err.detail().to_string(),
                }),
            }
        }

        if !failures.is_empty() {
            return Err(Error::Resolution { failures });
        }

        Ok(outcomes
            .into_iter()
            .filter_map(|(key, outcome)| outcome.ok().map(|secret| (key, secret)))
            .collect())
    }

    fn ensure_not_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("scheduler", &self.scheduler)
            .field("injector", &self.injector)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

fn audit(
    operation: &'static str,
    reference: &str,
    binding: Option<&str>,
    outcome: &std::result::Result<Arc<ResolvedSecret>, ResolveError>,
) {
    let mut record = AuditLog::new(operation, reference);
    if let Some(binding) = binding {
        record = record.with_binding(binding);
    }
    if let Err(err) = outcome {
        record = record.with_error(format!("{}: {}", err.kind(), err.detail()));
    }
    record.log();
}

async fn create_private_dir(path: &Path) -> std::io::Result<()> {
    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o700);
    builder.create(path).await
}
