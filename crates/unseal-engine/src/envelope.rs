//! Envelope encryption
//!
//! Every object is encrypted with its own random 256-bit data key using
//! ChaCha20-Poly1305, with the object name as associated data so a document
//! copied to another name no longer opens. The data key itself is wrapped by
//! the key-management service. Opening an object:
//!
//! 1. unwrap the data key through the [`KeyManager`]
//! 2. decrypt and verify the payload with it
//! 3. drop (and zero) the data key, whatever the outcome
//!
//! Stored documents are JSON:
//!
//! ```json
//! {
//!   "version": "1",
//!   "algorithm": "chacha20poly1305",
//!   "key_id": "age1...",
//!   "wrapped_key": "<base64>",
//!   "ciphertext": "<base64 of nonce || ciphertext || tag>"
//! }
//! ```

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use zeroize::Zeroizing;

use crate::error::ResolveError;
use crate::kms::KeyManager;
use crate::store::EncryptedObject;

/// Current sealed document version
pub const DOCUMENT_VERSION: &str = "1";

/// The only payload algorithm
pub const ALGORITHM: &str = "chacha20poly1305";

/// Size of the data encryption key in bytes (256 bits)
pub const DEK_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits for ChaCha20-Poly1305)
const NONCE_SIZE: usize = 12;

const TAG_SIZE: usize = 16;

/// Serialized form of an encrypted object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedDocument {
    pub version: String,
    pub algorithm: String,
    pub key_id: String,
    pub wrapped_key: String,
    pub ciphertext: String,
}

impl SealedDocument {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ResolveError> {
        serde_json::from_slice(bytes).map_err(|e| {
            ResolveError::decrypt_failure(format!("stored object is not a sealed document: {}", e))
        })
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, ResolveError> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| ResolveError::decrypt_failure(format!("cannot serialize document: {}", e)))
    }

    /// Decode into the binary form the decryptor works on
    pub fn into_object(
        self,
        name: &str,
        generation: Option<String>,
    ) -> Result<EncryptedObject, ResolveError> {
        if self.version != DOCUMENT_VERSION {
            return Err(ResolveError::decrypt_failure(format!(
                "unsupported document version '{}'",
                self.version
            )));
        }
        if self.algorithm != ALGORITHM {
            return Err(ResolveError::decrypt_failure(format!(
                "unsupported algorithm '{}'",
                self.algorithm
            )));
        }

        let wrapped_key = BASE64
            .decode(&self.wrapped_key)
            .map_err(|_| ResolveError::decrypt_failure("wrapped key is not valid base64"))?;
        let ciphertext = BASE64
            .decode(&self.ciphertext)
            .map_err(|_| ResolveError::decrypt_failure("ciphertext is not valid base64"))?;

        Ok(EncryptedObject {
            name: name.to_string(),
            ciphertext,
            wrapped_key,
            key_id: self.key_id,
            generation,
        })
    }
}

/// Decrypts fetched objects through a key manager
#[derive(Clone)]
pub struct EnvelopeDecryptor {
    key_manager: Arc<dyn KeyManager>,
    timeout: Duration,
}

impl EnvelopeDecryptor {
    pub fn new(key_manager: Arc<dyn KeyManager>, timeout: Duration) -> Self {
        Self {
            key_manager,
            timeout,
        }
    }

    pub async fn decrypt(
        &self,
        object: &EncryptedObject,
    ) -> Result<Zeroizing<Vec<u8>>, ResolveError> {
        let dek = tokio::time::timeout(
            self.timeout,
            self.key_manager
                .unwrap_key(&object.key_id, &object.wrapped_key),
        )
        .await
        .map_err(|_| {
            ResolveError::transient(format!(
                "{} unwrap timed out after {}ms",
                self.key_manager.name(),
                self.timeout.as_millis()
            ))
        })??;

        open(&dek, object)
    }
}

/// Decrypt `object` with an already unwrapped data key
pub fn open(dek: &[u8], object: &EncryptedObject) -> Result<Zeroizing<Vec<u8>>, ResolveError> {
    if dek.len() != DEK_SIZE {
        return Err(ResolveError::decrypt_failure(format!(
            "data key has wrong size: expected {}, got {}",
            DEK_SIZE,
            dek.len()
        )));
    }
    if object.ciphertext.len() < NONCE_SIZE + TAG_SIZE {
        return Err(ResolveError::decrypt_failure("ciphertext is truncated"));
    }

    let (nonce_bytes, sealed) = object.ciphertext.split_at(NONCE_SIZE);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(dek));
    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(nonce_bytes),
            Payload {
                msg: sealed,
                aad: object.name.as_bytes(),
            },
        )
        .map_err(|_| {
            ResolveError::decrypt_failure(format!(
                "integrity check failed for object '{}'",
                object.name
            ))
        })?;

    Ok(Zeroizing::new(plaintext))
}

/// Encrypt `plaintext` for `object_name` under a fresh data key wrapped by `key_id`
pub async fn seal(
    key_manager: &dyn KeyManager,
    key_id: &str,
    object_name: &str,
    plaintext: &[u8],
) -> Result<SealedDocument, ResolveError> {
    let mut dek = Zeroizing::new([0u8; DEK_SIZE]);
    rand::thread_rng().fill_bytes(dek.as_mut());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);

    let cipher = ChaCha20Poly1305::new(Key::from_slice(dek.as_ref()));
    let sealed = cipher
        .encrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: plaintext,
                aad: object_name.as_bytes(),
            },
        )
        .map_err(|_| ResolveError::decrypt_failure("payload encryption failed"))?;

    let wrapped_key = key_manager.wrap_key(key_id, dek.as_ref()).await?;

    let mut ciphertext = Vec::with_capacity(NONCE_SIZE + sealed.len());
    ciphertext.extend_from_slice(&nonce_bytes);
    ciphertext.extend_from_slice(&sealed);

    Ok(SealedDocument {
        version: DOCUMENT_VERSION.to_string(),
        algorithm: ALGORITHM.to_string(),
        key_id: key_id.to_string(),
        wrapped_key: BASE64.encode(&wrapped_key),
        ciphertext: BASE64.encode(&ciphertext),
    })
}
