//! Binding sets: ordered key/value pairs whose values may be references

use std::ffi::OsString;
use std::path::PathBuf;

use crate::error::{BindingFailure, Error, Result};
use crate::reference::SecretReference;
use crate::security::SecureString;

/// Value of one binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingValue {
    /// Plain value, passed through untouched
    Literal(String),
    /// Unresolved reference
    Reference {
        raw: String,
        reference: SecretReference,
    },
    /// Plaintext injected in place
    Resolved(SecureString),
    /// Plaintext written to this file; the path is the binding value
    File(PathBuf),
}

impl BindingValue {
    /// Final string value; `None` while still a reference
    pub fn as_str(&self) -> Option<&str> {
        match self {
            BindingValue::Literal(s) => Some(s),
            BindingValue::Resolved(s) => Some(s.as_str()),
            BindingValue::File(path) => path.to_str(),
            BindingValue::Reference { .. } => None,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, BindingValue::Reference { .. })
    }
}

/// Ordered mapping from binding key to value
///
/// Order is the order bindings were supplied in; injection and failure
/// reports follow it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingSet {
    entries: Vec<(String, BindingValue)>,
}

impl BindingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify every value; malformed references are all reported together
    pub fn parse<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut set = Self::new();
        let mut failures = Vec::new();

        for (key, value) in pairs {
            let key = key.into();
            let value = value.into();
            match SecretReference::classify(&value) {
                Ok(Some(reference)) => set.push(
                    key,
                    BindingValue::Reference {
                        raw: value,
                        reference,
                    },
                ),
                Ok(None) => set.push(key, BindingValue::Literal(value)),
                Err(err) => failures.push(BindingFailure {
                    binding: key,
                    kind: err.kind(),
                    detail: err.detail().to_string(),
                    reference: value,
                }),
            }
        }

        if failures.is_empty() {
            Ok(set)
        } else {
            Err(Error::Resolution { failures })
        }
    }

    /// Snapshot of the process environment
    ///
    /// Variables whose name or value is not UTF-8 cannot hold a reference and
    /// are left out; callers that re-export the environment inherit them.
    pub fn from_env() -> Result<Self> {
        Self::from_os_pairs(std::env::vars_os())
    }

    fn from_os_pairs(vars: impl Iterator<Item = (OsString, OsString)>) -> Result<Self> {
        let mut skipped = 0usize;
        let pairs: Vec<(String, String)> = vars
            .filter_map(|(k, v)| match (k.into_string(), v.into_string()) {
                (Ok(k), Ok(v)) => Some((k, v)),
                _ => {
                    skipped += 1;
                    None
                }
            })
            .collect();
        if skipped > 0 {
            tracing::debug!(skipped, "ignoring non UTF-8 environment variables");
        }
        Self::parse(pairs)
    }

    /// Append a binding, replacing an existing one with the same key in place
    pub fn push(&mut self, key: impl Into<String>, value: BindingValue) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&BindingValue> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Final string value of a binding
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(BindingValue::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BindingValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut BindingValue)> {
        self.entries.iter_mut().map(|(k, v)| (k.as_str(), v))
    }

    /// Bindings that still hold a reference, in order
    pub fn references(&self) -> impl Iterator<Item = (&str, &SecretReference)> {
        self.entries.iter().filter_map(|(k, v)| match v {
            BindingValue::Reference { reference, .. } => Some((k.as_str(), reference)),
            _ => None,
        })
    }

    /// Raw reference string a binding was parsed from
    pub fn raw_reference(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(BindingValue::Reference { raw, .. }) => Some(raw),
            _ => None,
        }
    }

    pub fn has_references(&self) -> bool {
        self.entries.iter().any(|(_, v)| v.is_reference())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Consume into plain pairs, exposing plaintext to the caller
    ///
    /// Unresolved references are returned as their raw strings.
    pub fn into_pairs(self) -> Vec<(String, String)> {
        self.entries
            .into_iter()
            .map(|(k, v)| {
                let value = match v {
                    BindingValue::Literal(s) => s,
                    BindingValue::Resolved(s) => s.into_string(),
                    BindingValue::File(path) => path.to_string_lossy().into_owned(),
                    BindingValue::Reference { raw, .. } => raw,
                };
                (k, value)
            })
            .collect()
    }
}
