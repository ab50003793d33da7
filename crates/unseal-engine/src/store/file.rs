//! Directory-backed object store
//!
//! Layout under the root:
//!
//! ```text
//! <root>/<location>/<object>                          latest sealed document
//! <root>/<location>/.generations/<object>/<gen>       every generation written
//! ```
//!
//! Paths are canonicalized before reading and must stay inside
//! `<root>/<location>`; a symlink pointing elsewhere is refused.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{EncryptedObject, ObjectStore};
use crate::envelope::SealedDocument;
use crate::error::ResolveError;
use crate::reference::{validate_location, ReferenceKey};
use crate::security::sanitize_error;

const GENERATIONS_DIR: &str = ".generations";

#[derive(Debug, Clone)]
pub struct FileObjectStore {
    root: PathBuf,
}

impl FileObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let expanded = shellexpand::tilde(&root.to_string_lossy()).to_string();
        Self {
            root: PathBuf::from(expanded),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &ReferenceKey) -> PathBuf {
        let base = self.root.join(&key.location);
        match &key.generation {
            None => base.join(&key.object),
            Some(generation) => base.join(GENERATIONS_DIR).join(&key.object).join(generation),
        }
    }

    /// Resolve `path` and make sure it is still inside the location directory
    async fn contained(&self, key: &ReferenceKey, path: &Path) -> Result<PathBuf, ResolveError> {
        let location_dir = tokio::fs::canonicalize(self.root.join(&key.location))
            .await
            .map_err(|e| classify_io(&e, &format!("store location {}", key.location)))?;
        let canonical = tokio::fs::canonicalize(path)
            .await
            .map_err(|e| classify_io(&e, &format!("object {}", key)))?;

        if !canonical.starts_with(&location_dir) {
            return Err(ResolveError::malformed(format!(
                "object {} resolves outside its store location",
                key
            )));
        }
        Ok(canonical)
    }

    /// Write a new generation and make it the latest; returns the generation
    pub async fn insert(
        &self,
        location: &str,
        object: &str,
        document: &SealedDocument,
    ) -> Result<String, ResolveError> {
        let key = ReferenceKey::new(location, object);
        key.validate()?;
        let bytes = document.to_vec()?;

        let history = self
            .root
            .join(location)
            .join(GENERATIONS_DIR)
            .join(object);
        tokio::fs::create_dir_all(&history)
            .await
            .map_err(|e| classify_io(&e, &format!("object {}", key)))?;

        let mut generation = 1u64;
        let mut entries = tokio::fs::read_dir(&history)
            .await
            .map_err(|e| classify_io(&e, &format!("object {}", key)))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| classify_io(&e, &format!("object {}", key)))?
        {
            if let Some(existing) = entry.file_name().to_str().and_then(|n| n.parse::<u64>().ok()) {
                generation = generation.max(existing + 1);
            }
        }

        let latest = self.object_path(&key);
        if let Some(parent) = latest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| classify_io(&e, &format!("object {}", key)))?;
        }
        tokio::fs::write(history.join(generation.to_string()), &bytes)
            .await
            .map_err(|e| classify_io(&e, &format!("object {}", key)))?;
        tokio::fs::write(&latest, &bytes)
            .await
            .map_err(|e| classify_io(&e, &format!("object {}", key)))?;

        Ok(generation.to_string())
    }
}

#[async_trait]
impl ObjectStore for FileObjectStore {
    async fn get(&self, key: &ReferenceKey) -> Result<EncryptedObject, ResolveError> {
        key.validate()?;
        let path = self.contained(key, &self.object_path(key)).await?;
        debug!(path = %path.display(), "reading sealed document");

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| classify_io(&e, &format!("object {}", key)))?;

        SealedDocument::from_slice(&bytes)?.into_object(&key.object, key.generation.clone())
    }

    async fn list(&self, location: &str, prefix: &str) -> Result<Vec<String>, ResolveError> {
        validate_location(location)?;
        let location_dir = self.root.join(location);

        let mut names = Vec::new();
        let mut pending = vec![(location_dir, String::new())];
        while let Some((dir, relative)) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .map_err(|e| classify_io(&e, &format!("store location {}", location)))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| classify_io(&e, &format!("store location {}", location)))?
            {
                let Some(file_name) = entry.file_name().to_str().map(str::to_string) else {
                    continue;
                };
                if file_name == GENERATIONS_DIR {
                    continue;
                }
                let name = if relative.is_empty() {
                    file_name
                } else {
                    format!("{}/{}", relative, file_name)
                };
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| classify_io(&e, &format!("store location {}", location)))?;
                if file_type.is_dir() {
                    pending.push((entry.path(), name));
                } else if name.starts_with(prefix) {
                    names.push(name);
                }
            }
        }

        names.sort();
        Ok(names)
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

fn classify_io(err: &io::Error, what: &str) -> ResolveError {
    match err.kind() {
        io::ErrorKind::NotFound => ResolveError::not_found(format!("{} does not exist", what)),
        io::ErrorKind::PermissionDenied => {
            ResolveError::access_denied(format!("permission denied reading {}", what))
        }
        _ => ResolveError::transient(format!(
            "error reading {}: {}",
            what,
            sanitize_error(&err.to_string())
        )),
    }
}
