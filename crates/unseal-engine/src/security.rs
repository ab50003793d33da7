//! Keeping plaintext and key material out of memory dumps, logs and errors

use chrono::{DateTime, Utc};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;
use zeroize::Zeroizing;

/// Resolved plaintext held as a string
///
/// The buffer is wiped when dropped. `Debug` and `Display` print only the
/// length, so a stray `{:?}` on a binding set cannot leak a value.
#[derive(Clone, PartialEq, Eq)]
pub struct SecureString(Zeroizing<String>);

impl SecureString {
    pub fn new(value: String) -> Self {
        Self(Zeroizing::new(value))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Hand the value to a consumer that needs an owned `String` (e.g. a
    /// child environment). The copy left behind is wiped.
    pub fn into_string(self) -> String {
        self.0.as_str().to_owned()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for SecureString {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for SecureString {
    fn from(value: &str) -> Self {
        Self::new(value.to_owned())
    }
}

impl fmt::Debug for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecureString(<{} bytes>)", self.len())
    }
}

impl fmt::Display for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

/// One audited reference operation
///
/// Carries the reference and binding names only. Failure detail is the
/// error's category and sanitized message.
#[derive(Debug, Clone)]
pub struct AuditLog {
    pub operation: &'static str,
    pub reference: String,
    pub binding: Option<String>,
    pub failure: Option<String>,
    pub at: DateTime<Utc>,
}

impl AuditLog {
    pub fn new(operation: &'static str, reference: impl Into<String>) -> Self {
        Self {
            operation,
            reference: reference.into(),
            binding: None,
            failure: None,
            at: Utc::now(),
        }
    }

    pub fn with_binding(mut self, binding: impl Into<String>) -> Self {
        self.binding = Some(binding.into());
        self
    }

    pub fn with_error(mut self, failure: impl Into<String>) -> Self {
        self.failure = Some(failure.into());
        self
    }

    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }

    pub fn log(&self) {
        let binding = self.binding.as_deref().unwrap_or("-");
        let at = self.at.to_rfc3339();
        match &self.failure {
            None => tracing::info!(
                target: "unseal::audit",
                op = self.operation,
                reference = %self.reference,
                binding,
                at = %at,
                "ok"
            ),
            Some(failure) => tracing::warn!(
                target: "unseal::audit",
                op = self.operation,
                reference = %self.reference,
                binding,
                at = %at,
                "failed: {}",
                failure
            ),
        }
    }
}

static SENSITIVE: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    let rules: [(&str, &'static str); 6] = [
        (r"AGE-SECRET-KEY-1[0-9A-Z]+", "<identity>"),
        (r"(?i)(access|session|bearer)?[_-]?token[=:]\s*[^\s,;&]+", "token=<redacted>"),
        (r"(?i)(secret|private)[_-]?key[=:]\s*[^\s,;&]+", "key=<redacted>"),
        (r"(?i)password[=:]\s*[^\s,;&]+", "password=<redacted>"),
        (r"(?i)(x-amz-)?signature[=:]\s*[^\s,;&]+", "signature=<redacted>"),
        // Wrapped keys and ciphertext tend to surface as long base64 runs
        (r"[A-Za-z0-9+/]{48,}={0,2}", "<base64>"),
    ];
    rules
        .into_iter()
        .filter_map(|(pattern, with)| Regex::new(pattern).ok().map(|re| (re, with)))
        .collect()
});

/// Scrub credentials and key material from text produced by a backend
/// before it is wrapped into one of our errors.
pub fn sanitize_error(message: &str) -> String {
    let mut out = message.to_owned();
    for (re, with) in SENSITIVE.iter() {
        if re.is_match(&out) {
            out = re.replace_all(&out, *with).into_owned();
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formatting_never_shows_value() {
        let value = SecureString::from("abc123");
        assert_eq!(format!("{:?}", value), "SecureString(<6 bytes>)");
        assert_eq!(value.to_string(), "<redacted>");
        assert_eq!(value.as_str(), "abc123");
        assert_eq!(value.into_string(), "abc123");
    }

    #[test]
    fn test_audit_failure_record() {
        let record = AuditLog::new("resolve", "secret://proj/db")
            .with_binding("DB_PASSWORD")
            .with_error("not-found: object proj/db does not exist");
        assert!(!record.succeeded());
        assert_eq!(record.binding.as_deref(), Some("DB_PASSWORD"));
        record.log();

        assert!(AuditLog::new("access", "secret://proj/db").succeeded());
    }

    #[test]
    fn test_sanitize_credentials() {
        let scrubbed =
            sanitize_error("request failed: session_token=abc.def.ghi password: hunter2 (403)");
        assert!(!scrubbed.contains("abc.def.ghi"));
        assert!(!scrubbed.contains("hunter2"));
        assert!(scrubbed.ends_with("(403)"));
    }

    #[test]
    fn test_sanitize_key_material() {
        let blob = "QUJDREVGR0hJSktMTU5PUFFSU1RVVldYWVphYmNkZWZnaGlqa2xtbm9wcXJzdHV2d3h5eg==";
        let scrubbed = sanitize_error(&format!("bad stanza {} for AGE-SECRET-KEY-1QQQQQQQQ", blob));
        assert!(!scrubbed.contains(blob));
        assert!(!scrubbed.contains("AGE-SECRET-KEY-1QQQQQQQQ"));
        assert!(scrubbed.contains("<identity>"));
    }

    #[test]
    fn test_sanitize_leaves_plain_messages() {
        let msg = "object proj/api-key does not exist";
        assert_eq!(sanitize_error(msg), msg);
    }
}
