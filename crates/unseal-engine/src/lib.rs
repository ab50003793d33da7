//! # unseal-engine
//!
//! Resolves secret references in a set of bindings and injects the
//! plaintext back, in place or into files.
//!
//! ```text
//! API_KEY=secret://proj/api-key          ->  API_KEY=abc123
//! TLS_KEY=secret://proj/tls/key#/etc/secrets/tls.key
//!                                         ->  TLS_KEY=/etc/secrets/tls.key
//! PORT=8080                               ->  PORT=8080
//! ```
//!
//! Objects are envelope encrypted: each carries its own data key, wrapped
//! by a key-management service. The object store and the key manager are
//! traits ([`ObjectStore`], [`KeyManager`]) so backends and test fakes
//! plug in without touching the scheduler or injector.
//!
//! ```rust,no_run
//! use unseal_engine::{BindingSet, Engine};
//! use unseal_core::ConfigLoader;
//!
//! # async fn run() -> unseal_engine::Result<()> {
//! let config = ConfigLoader::new().load()?;
//! let engine = Engine::from_config(config).await?;
//! let resolved = engine.resolve(&BindingSet::from_env()?).await?;
//! for (key, value) in resolved.into_pairs() {
//!     println!("{key} has {} bytes", value.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod binding;
pub mod cache;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod fetch;
pub mod inject;
pub mod kms;
pub mod reference;
pub mod scheduler;
pub mod security;
pub mod store;
pub mod types;

pub use binding::{BindingSet, BindingValue};
pub use cache::{CacheStats, SecretCache};
pub use engine::{Engine, EngineBuilder, ResolvedValue};
pub use envelope::{seal, EnvelopeDecryptor, SealedDocument};
pub use error::{BindingFailure, Error, ErrorKind, InjectionFailure, ResolveError, Result};
pub use fetch::Fetcher;
pub use inject::Injector;
pub use kms::{AgeKeyManager, KeyManager};
pub use reference::{Destination, ReferenceKey, SecretReference, SCHEME};
pub use scheduler::{ResolutionOutcome, Scheduler};
pub use security::{sanitize_error, AuditLog, SecureString};
pub use store::{EncryptedObject, FileObjectStore, MemoryObjectStore, ObjectStore, S3ObjectStore};
pub use types::ResolvedSecret;
