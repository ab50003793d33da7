//! Key manager backed by age X25519 identities
//!
//! The key id of a wrapped data key is the public recipient string
//! (`age1...`) of the identity that can open it.

use age::secrecy::ExposeSecret;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;
use unseal_core::KeyConfig;
use zeroize::Zeroizing;

use super::KeyManager;
use crate::error::{Error, ResolveError, Result};

pub struct AgeKeyManager {
    /// Identities keyed by their recipient string
    identities: HashMap<String, age::x25519::Identity>,
}

impl AgeKeyManager {
    pub fn new(identities: impl IntoIterator<Item = age::x25519::Identity>) -> Self {
        let identities = identities
            .into_iter()
            .map(|identity| (identity.to_public().to_string(), identity))
            .collect();
        Self { identities }
    }

    /// A manager holding one freshly generated identity
    pub fn generate() -> Self {
        Self::new([age::x25519::Identity::generate()])
    }

    /// Parse identities, one per line; blank lines and `#` comments are skipped
    pub fn parse(content: &str) -> Result<Self> {
        let mut identities = Vec::new();
        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            // The parse error is echoed without the offending line
            let identity = line.parse::<age::x25519::Identity>().map_err(|e| {
                Error::backend(format!("invalid age identity on line {}: {}", index + 1, e))
            })?;
            identities.push(identity);
        }

        if identities.is_empty() {
            return Err(Error::backend("no age identities found"));
        }
        Ok(Self::new(identities))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let expanded = shellexpand::tilde(&path.to_string_lossy()).to_string();
        let content = Zeroizing::new(std::fs::read_to_string(&expanded).map_err(|e| {
            Error::backend(format!("failed to read key file {}: {}", expanded, e))
        })?);
        Self::parse(&content)
    }

    pub fn from_env(var: &str) -> Result<Self> {
        let content = Zeroizing::new(
            std::env::var(var)
                .map_err(|_| Error::backend(format!("environment variable {} is not set", var)))?,
        );
        Self::parse(&content)
    }

    /// Load identities as configured; a set key variable wins over the key file
    pub fn from_config(config: &KeyConfig) -> Result<Self> {
        if let Some(var) = &config.key_env {
            if std::env::var_os(var).is_some() {
                return Self::from_env(var);
            }
            tracing::debug!(var = %var, "key variable not set, falling back to key file");
        }
        match &config.key_file {
            Some(path) => Self::from_file(path),
            None => Err(Error::backend(
                "no key source configured (set keys.key-file or keys.key-env)",
            )),
        }
    }

    /// Key ids this manager can unwrap, sorted
    pub fn key_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.identities.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Serialized secret key for `key_id`, for writing identity files
    pub fn export_identity(&self, key_id: &str) -> Option<Zeroizing<String>> {
        self.identities
            .get(key_id)
            .map(|identity| Zeroizing::new(identity.to_string().expose_secret().to_string()))
    }
}

fn classify_decrypt_error(err: age::DecryptError) -> ResolveError {
    match err {
        age::DecryptError::NoMatchingKeys => {
            ResolveError::access_denied("data key was not wrapped for this identity")
        }
        _ => ResolveError::decrypt_failure("wrapped data key is malformed"),
    }
}

#[async_trait]
impl KeyManager for AgeKeyManager {
    async fn unwrap_key(
        &self,
        key_id: &str,
        wrapped: &[u8],
    ) -> std::result::Result<Zeroizing<Vec<u8>>, ResolveError> {
        let identity = self.identities.get(key_id).ok_or_else(|| {
            ResolveError::access_denied(format!("no identity available for key {}", key_id))
        })?;

        let decryptor = age::Decryptor::new(wrapped).map_err(classify_decrypt_error)?;
        let mut reader = decryptor
            .decrypt(std::iter::once(identity as &dyn age::Identity))
            .map_err(classify_decrypt_error)?;

        let mut data_key = Zeroizing::new(Vec::new());
        reader
            .read_to_end(&mut data_key)
            .map_err(|_| ResolveError::decrypt_failure("wrapped data key is corrupt"))?;

        Ok(data_key)
    }

    async fn wrap_key(
        &self,
        key_id: &str,
        data_key: &[u8],
    ) -> std::result::Result<Vec<u8>, ResolveError> {
        let recipient = key_id.parse::<age::x25519::Recipient>().map_err(|_| {
            ResolveError::access_denied(format!("key id {} is not an age recipient", key_id))
        })?;

        let encryptor =
            age::Encryptor::with_recipients(std::iter::once(&recipient as &dyn age::Recipient))
                .map_err(|e| {
                    ResolveError::access_denied(format!("cannot wrap for {}: {}", key_id, e))
                })?;

        let mut wrapped = Vec::new();
        let mut writer = encryptor
            .wrap_output(&mut wrapped)
            .map_err(|e| ResolveError::transient(format!("key wrapping failed: {}", e)))?;
        writer
            .write_all(data_key)
            .map_err(|e| ResolveError::transient(format!("key wrapping failed: {}", e)))?;
        writer
            .finish()
            .map_err(|e| ResolveError::transient(format!("key wrapping failed: {}", e)))?;

        Ok(wrapped)
    }

    fn name(&self) -> &'static str {
        "age"
    }
}

impl std::fmt::Debug for AgeKeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgeKeyManager")
            .field("key_ids", &self.key_ids())
            .finish()
    }
}
