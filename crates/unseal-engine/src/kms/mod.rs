//! Key-management collaborators
//!
//! The key manager is the only component that ever sees key-encryption keys.
//! Implementations map failures to [`ResolveError`]: unknown or unusable
//! keys are `AccessDenied`, malformed wrapped keys `DecryptFailure`, and
//! service outages `Transient`.

mod age_identity;

pub use age_identity::AgeKeyManager;

use async_trait::async_trait;
use zeroize::Zeroizing;

use crate::error::ResolveError;

#[async_trait]
pub trait KeyManager: Send + Sync {
    /// Recover the raw data key that `key_id` wrapped
    async fn unwrap_key(
        &self,
        key_id: &str,
        wrapped: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, ResolveError>;

    /// Wrap a data key under `key_id` (write path)
    async fn wrap_key(&self, key_id: &str, data_key: &[u8]) -> Result<Vec<u8>, ResolveError>;

    fn name(&self) -> &'static str;
}
