//! Secret reference parsing
//!
//! A reference names a secret without containing it:
//!
//! ```text
//! secret://<location>/<object>[?generation=<token>][#<destination>]
//! ```
//!
//! `<location>` is the first path segment, `<object>` everything after it.
//! `<destination>` is an absolute file path, or `tempfile` (alias `tmpfile`)
//! for a fresh file in the system temp directory. Values that do not start
//! with the scheme are literals. Values that do start with it but fail to
//! parse are errors, never literals.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::ResolveError;

/// Scheme prefix that marks a value as a reference
pub const SCHEME: &str = "secret://";

/// Identity of a stored secret: what the cache and deduplication key on.
/// The destination is not part of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReferenceKey {
    pub location: String,
    pub object: String,
    /// Pinned object generation; `None` means latest
    pub generation: Option<String>,
}

impl ReferenceKey {
    pub fn new(location: impl Into<String>, object: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            object: object.into(),
            generation: None,
        }
    }

    pub fn with_generation(mut self, generation: impl Into<String>) -> Self {
        self.generation = Some(generation.into());
        self
    }

    /// Check that location and object cannot escape their store location
    pub fn validate(&self) -> Result<(), ResolveError> {
        validate_location(&self.location)?;
        validate_object(&self.object)?;
        if let Some(generation) = &self.generation {
            validate_generation(generation)?;
        }
        Ok(())
    }
}

impl fmt::Display for ReferenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}/{}", SCHEME, self.location, self.object)?;
        if let Some(generation) = &self.generation {
            write!(f, "?generation={}", generation)?;
        }
        Ok(())
    }
}

/// Where resolved plaintext goes instead of the binding value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    Path(PathBuf),
    TempFile,
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Path(path) => write!(f, "{}", path.display()),
            Destination::TempFile => f.write_str("tempfile"),
        }
    }
}

/// A parsed reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecretReference {
    key: ReferenceKey,
    destination: Option<Destination>,
}

impl SecretReference {
    pub fn new(key: ReferenceKey, destination: Option<Destination>) -> Self {
        Self { key, destination }
    }

    /// Returns true if `value` uses the reference scheme (it may still be malformed)
    pub fn is_reference(value: &str) -> bool {
        value.starts_with(SCHEME)
    }

    /// Classify a binding value: `Ok(None)` for a literal
    pub fn classify(value: &str) -> Result<Option<Self>, ResolveError> {
        if Self::is_reference(value) {
            Self::parse(value).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn parse(value: &str) -> Result<Self, ResolveError> {
        let rest = value.strip_prefix(SCHEME).ok_or_else(|| {
            ResolveError::malformed(format!("'{}' does not start with {}", value, SCHEME))
        })?;

        let (rest, fragment) = match rest.split_once('#') {
            Some((rest, fragment)) => (rest, Some(fragment)),
            None => (rest, None),
        };
        let (path, query) = match rest.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (rest, None),
        };

        let (location, object) = path.split_once('/').ok_or_else(|| {
            ResolveError::malformed(format!("'{}' is missing an object name", value))
        })?;

        let mut key = ReferenceKey::new(location, object);
        if let Some(query) = query {
            key.generation = parse_query(value, query)?;
        }
        key.validate()
            .map_err(|e| ResolveError::malformed(format!("'{}': {}", value, e.detail())))?;

        let destination = fragment
            .map(|f| parse_destination(value, f))
            .transpose()?;

        Ok(Self { key, destination })
    }

    pub fn key(&self) -> &ReferenceKey {
        &self.key
    }

    pub fn location(&self) -> &str {
        &self.key.location
    }

    pub fn object(&self) -> &str {
        &self.key.object
    }

    pub fn generation(&self) -> Option<&str> {
        self.key.generation.as_deref()
    }

    pub fn destination(&self) -> Option<&Destination> {
        self.destination.as_ref()
    }
}

impl FromStr for SecretReference {
    type Err = ResolveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for SecretReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)?;
        if let Some(destination) = &self.destination {
            write!(f, "#{}", destination)?;
        }
        Ok(())
    }
}

fn parse_query(value: &str, query: &str) -> Result<Option<String>, ResolveError> {
    let mut generation = None;
    for (name, val) in url::form_urlencoded::parse(query.as_bytes()) {
        match name.as_ref() {
            "generation" if generation.is_none() => generation = Some(val.into_owned()),
            "generation" => {
                return Err(ResolveError::malformed(format!(
                    "'{}' sets generation more than once",
                    value
                )))
            }
            other => {
                return Err(ResolveError::malformed(format!(
                    "'{}' has unknown parameter '{}'",
                    value, other
                )))
            }
        }
    }
    Ok(generation)
}

fn parse_destination(value: &str, fragment: &str) -> Result<Destination, ResolveError> {
    match fragment {
        "tempfile" | "tmpfile" => Ok(Destination::TempFile),
        "" => Err(ResolveError::malformed(format!(
            "'{}' has an empty destination",
            value
        ))),
        raw => {
            let path = Path::new(raw);
            if !path.is_absolute() {
                return Err(ResolveError::malformed(format!(
                    "'{}': destination must be an absolute path",
                    value
                )));
            }
            if raw.ends_with('/') || path.file_name().is_none() {
                return Err(ResolveError::malformed(format!(
                    "'{}': destination does not name a file",
                    value
                )));
            }
            Ok(Destination::Path(path.to_path_buf()))
        }
    }
}

pub(crate) fn validate_location(location: &str) -> Result<(), ResolveError> {
    if location.is_empty() {
        return Err(ResolveError::malformed("store location is empty"));
    }
    if location == "." || location == ".." || location.contains(['\\', '\0']) {
        return Err(ResolveError::malformed(format!(
            "invalid store location '{}'",
            location
        )));
    }
    Ok(())
}

/// Object names are slash-separated; no segment may be empty, `.` or `..`
pub(crate) fn validate_object(object: &str) -> Result<(), ResolveError> {
    if object.is_empty() {
        return Err(ResolveError::malformed("object name is empty"));
    }
    if object.contains(['\\', '\0']) {
        return Err(ResolveError::malformed(format!(
            "object name '{}' contains forbidden characters",
            object
        )));
    }
    for segment in object.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(ResolveError::malformed(format!(
                "object name '{}' would escape its store location",
                object
            )));
        }
    }
    Ok(())
}

fn validate_generation(generation: &str) -> Result<(), ResolveError> {
    let valid = !generation.is_empty()
        && generation
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(ResolveError::malformed(format!(
            "invalid generation '{}'",
            generation
        )))
    }
}
