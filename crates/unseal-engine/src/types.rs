//! Resolved secret material

use chrono::{DateTime, Utc};
use std::fmt;
use zeroize::Zeroizing;

use crate::reference::ReferenceKey;

/// Plaintext for one reference, held only in memory
///
/// The buffer is zeroed when the last holder drops it. `Debug` shows the
/// reference and size only.
pub struct ResolvedSecret {
    key: ReferenceKey,
    plaintext: Zeroizing<Vec<u8>>,
    /// Generation the store actually served
    generation: Option<String>,
    resolved_at: DateTime<Utc>,
}

impl ResolvedSecret {
    pub fn new(
        key: ReferenceKey,
        plaintext: Zeroizing<Vec<u8>>,
        generation: Option<String>,
    ) -> Self {
        Self {
            key,
            plaintext,
            generation,
            resolved_at: Utc::now(),
        }
    }

    pub fn key(&self) -> &ReferenceKey {
        &self.key
    }

    pub fn plaintext(&self) -> &[u8] {
        &self.plaintext
    }

    /// Plaintext as UTF-8, if it is valid UTF-8
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.plaintext).ok()
    }

    pub fn generation(&self) -> Option<&str> {
        self.generation.as_deref()
    }

    pub fn resolved_at(&self) -> DateTime<Utc> {
        self.resolved_at
    }

    pub fn len(&self) -> usize {
        self.plaintext.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plaintext.is_empty()
    }
}

impl fmt::Debug for ResolvedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedSecret")
            .field("key", &self.key.to_string())
            .field("plaintext", &format_args!("[REDACTED {} bytes]", self.len()))
            .field("generation", &self.generation)
            .field("resolved_at", &self.resolved_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_never_shows_plaintext() {
        let secret = ResolvedSecret::new(
            ReferenceKey::new("proj", "api-key"),
            Zeroizing::new(b"abc123".to_vec()),
            Some("3".to_string()),
        );
        let debug = format!("{:?}", secret);
        assert!(debug.contains("REDACTED 6 bytes"));
        assert!(debug.contains("secret://proj/api-key"));
        assert!(!debug.contains("abc123"));
        assert_eq!(secret.as_str(), Some("abc123"));
    }

    #[test]
    fn test_non_utf8_plaintext() {
        let secret = ResolvedSecret::new(
            ReferenceKey::new("proj", "blob"),
            Zeroizing::new(vec![0xff, 0xfe, 0x00]),
            None,
        );
        assert_eq!(secret.as_str(), None);
        assert_eq!(secret.len(), 3);
    }
}
