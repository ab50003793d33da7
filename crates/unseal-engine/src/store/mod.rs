//! Object store collaborators
//!
//! A store maps `(location, object)` to a sealed document. Implementations
//! classify their failures into [`ResolveError`] kinds: missing objects are
//! `NotFound`, permission problems `AccessDenied`, and anything that may
//! succeed later (network errors, throttling, 5xx) `Transient`.

mod file;
mod memory;
mod s3;

pub use file::FileObjectStore;
pub use memory::MemoryObjectStore;
pub use s3::S3ObjectStore;

use async_trait::async_trait;
use std::fmt;

use crate::error::ResolveError;
use crate::reference::ReferenceKey;

/// Ciphertext and envelope metadata for one object, as fetched
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptedObject {
    /// Object name; bound into the ciphertext as associated data
    pub name: String,
    /// `nonce || ciphertext || tag`
    pub ciphertext: Vec<u8>,
    /// Data key wrapped by the key-management service
    pub wrapped_key: Vec<u8>,
    /// Key-management key that wrapped the data key
    pub key_id: String,
    /// Generation the store served
    pub generation: Option<String>,
}

impl fmt::Debug for EncryptedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedObject")
            .field("name", &self.name)
            .field("ciphertext_len", &self.ciphertext.len())
            .field("wrapped_key_len", &self.wrapped_key.len())
            .field("key_id", &self.key_id)
            .field("generation", &self.generation)
            .finish()
    }
}

/// Read access to an encrypted object store
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch one object; a pinned generation must be honoured exactly
    async fn get(&self, key: &ReferenceKey) -> Result<EncryptedObject, ResolveError>;

    /// Names of objects in `location` that start with `prefix`, sorted
    async fn list(&self, location: &str, prefix: &str) -> Result<Vec<String>, ResolveError>;

    /// Backend name for logs
    fn name(&self) -> &'static str;
}
