//! Error types for secret resolution
//!
//! Two layers: [`ResolveError`] describes why a single reference could not be
//! resolved, [`Error`] describes why a whole resolution pass failed. Neither
//! ever carries plaintext or key material; text that originates from a
//! collaborator is passed through [`sanitize_error`](crate::security::sanitize_error)
//! before it lands here.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use unseal_core::retry::Retryable;

/// Result type alias for pass-level operations
pub type Result<T> = std::result::Result<T, Error>;

/// Classification of a per-reference failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MalformedReference,
    NotFound,
    AccessDenied,
    DecryptFailure,
    Transient,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MalformedReference => "malformed-reference",
            ErrorKind::NotFound => "not-found",
            ErrorKind::AccessDenied => "access-denied",
            ErrorKind::DecryptFailure => "decrypt-failure",
            ErrorKind::Transient => "transient",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a single reference could not be resolved
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("malformed reference: {0}")]
    MalformedReference(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("decrypt failure: {0}")]
    DecryptFailure(String),

    /// Network failure, throttling, 5xx or timeout; the only retryable kind
    #[error("transient error: {0}")]
    Transient(String),

    #[error("resolution cancelled")]
    Cancelled,
}

impl ResolveError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedReference(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::AccessDenied(message.into())
    }

    pub fn decrypt_failure(message: impl Into<String>) -> Self {
        Self::DecryptFailure(message.into())
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ResolveError::MalformedReference(_) => ErrorKind::MalformedReference,
            ResolveError::NotFound(_) => ErrorKind::NotFound,
            ResolveError::AccessDenied(_) => ErrorKind::AccessDenied,
            ResolveError::DecryptFailure(_) => ErrorKind::DecryptFailure,
            ResolveError::Transient(_) => ErrorKind::Transient,
            ResolveError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Message without the kind prefix
    pub fn detail(&self) -> &str {
        match self {
            ResolveError::MalformedReference(m)
            | ResolveError::NotFound(m)
            | ResolveError::AccessDenied(m)
            | ResolveError::DecryptFailure(m)
            | ResolveError::Transient(m) => m,
            ResolveError::Cancelled => "resolution cancelled",
        }
    }
}

impl Retryable for ResolveError {
    fn is_retryable(&self) -> bool {
        matches!(self, ResolveError::Transient(_))
    }
}

/// One binding that could not be resolved, attributed back from its reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingFailure {
    /// Binding key, e.g. the environment variable name
    pub binding: String,
    /// Reference string as written (contains no secret material)
    pub reference: String,
    pub kind: ErrorKind,
    pub detail: String,
}

impl fmt::Display for BindingFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}): {}: {}",
            self.binding, self.reference, self.kind, self.detail
        )
    }
}

/// A file injection that failed, or was never attempted after an earlier failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectionFailure {
    pub binding: String,
    /// Destination file, when one had been chosen
    pub destination: Option<PathBuf>,
    pub detail: String,
}

impl fmt::Display for InjectionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.destination {
            Some(path) => write!(f, "{} -> {}: {}", self.binding, path.display(), self.detail),
            None => write!(f, "{}: {}", self.binding, self.detail),
        }
    }
}

/// Why a resolution pass failed as a whole
#[derive(Error, Debug)]
pub enum Error {
    /// One or more references could not be resolved; nothing was injected
    #[error("secret resolution failed:\n  - {}", join_lines(failures))]
    Resolution { failures: Vec<BindingFailure> },

    /// Resolution succeeded but writing results stopped partway.
    /// Files listed as succeeded remain on disk.
    #[error(
        "secret injection incomplete: {} succeeded, {} failed:\n  - {}",
        succeeded.len(),
        failed.len(),
        join_lines(failed)
    )]
    PartialInjection {
        succeeded: Vec<String>,
        failed: Vec<InjectionFailure>,
    },

    #[error("resolution pass cancelled")]
    Cancelled,

    #[error(transparent)]
    Config(#[from] unseal_core::Error),

    /// A backend could not be constructed
    #[error("backend error: {0}")]
    Backend(String),
}

impl Error {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    /// Build a pass failure from a single reference error
    pub fn single(binding: &str, reference: &str, err: &ResolveError) -> Self {
        if matches!(err, ResolveError::Cancelled) {
            return Error::Cancelled;
        }
        Error::Resolution {
            failures: vec![BindingFailure {
                binding: binding.to_string(),
                reference: reference.to_string(),
                kind: err.kind(),
                detail: err.detail().to_string(),
            }],
        }
    }

    /// Failures enumerated by a resolution error, empty otherwise
    pub fn failures(&self) -> &[BindingFailure] {
        match self {
            Error::Resolution { failures } => failures,
            _ => &[],
        }
    }

    /// True when every failure is a malformed reference, i.e. caller misuse
    pub fn is_malformed(&self) -> bool {
        let failures = self.failures();
        !failures.is_empty()
            && failures
                .iter()
                .all(|f| f.kind == ErrorKind::MalformedReference)
    }
}

fn join_lines<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join("\n  - ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(ResolveError::transient("503").is_retryable());
        assert!(!ResolveError::not_found("proj/x").is_retryable());
        assert!(!ResolveError::access_denied("proj/x").is_retryable());
        assert!(!ResolveError::decrypt_failure("tag").is_retryable());
        assert!(!ResolveError::malformed("secret://").is_retryable());
        assert!(!ResolveError::Cancelled.is_retryable());
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            ResolveError::not_found("x").kind(),
            ErrorKind::NotFound
        );
        assert_eq!(ErrorKind::AccessDenied.to_string(), "access-denied");
    }

    #[test]
    fn test_resolution_error_lists_every_binding() {
        let err = Error::Resolution {
            failures: vec![
                BindingFailure {
                    binding: "API_KEY".into(),
                    reference: "secret://proj/missing".into(),
                    kind: ErrorKind::NotFound,
                    detail: "object proj/missing does not exist".into(),
                },
                BindingFailure {
                    binding: "DB_PASS".into(),
                    reference: "secret://proj/db".into(),
                    kind: ErrorKind::AccessDenied,
                    detail: "no identity for key".into(),
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("API_KEY (secret://proj/missing): not-found"));
        assert!(msg.contains("DB_PASS (secret://proj/db): access-denied"));
        assert!(!err.is_malformed());
    }

    #[test]
    fn test_single_cancelled_is_pass_cancelled() {
        let err = Error::single("X", "secret://a/b", &ResolveError::Cancelled);
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn test_is_malformed() {
        let err = Error::single("X", "secret://a", &ResolveError::malformed("missing object"));
        assert!(err.is_malformed());
    }

    #[test]
    fn test_partial_injection_display() {
        let err = Error::PartialInjection {
            succeeded: vec!["TLS_CERT".into()],
            failed: vec![InjectionFailure {
                binding: "TLS_KEY".into(),
                destination: Some(PathBuf::from("/etc/secrets/tls.key")),
                detail: "No space left on device".into(),
            }],
        };
        let msg = err.to_string();
        assert!(msg.contains("1 succeeded, 1 failed"));
        assert!(msg.contains("TLS_KEY -> /etc/secrets/tls.key"));
    }
}
