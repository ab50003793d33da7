//! Injector: applies resolved plaintext back into a binding set
//!
//! Bindings are processed one at a time in binding order. A reference
//! without a destination is replaced in place; one with a destination has
//! its plaintext written to a file and the binding takes the file's path.
//!
//! File writes are atomic: the plaintext goes to a temporary file in the
//! destination directory, created owner-only, which is synced and then
//! renamed over the destination. A concurrent reader sees either the old
//! file, the new file, or nothing; never a partial write.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::binding::{BindingSet, BindingValue};
use crate::error::{Error, InjectionFailure, Result};
use crate::reference::{Destination, ReferenceKey, SecretReference};
use crate::security::SecureString;
use crate::types::ResolvedSecret;

/// Prefix of every file the injector creates
const FILE_PREFIX: &str = "unseal-";

#[derive(Debug, Clone, Copy)]
pub struct Injector {
    file_mode: u32,
}

impl Default for Injector {
    fn default() -> Self {
        Self { file_mode: 0o600 }
    }
}

impl Injector {
    /// `file_mode` applies to every file written; it must be owner-only
    pub fn new(file_mode: u32) -> Self {
        Self { file_mode }
    }

    pub fn file_mode(&self) -> u32 {
        self.file_mode
    }

    /// Replace every reference in `bindings` with its resolved secret
    ///
    /// Stops at the first failure and reports which bindings were injected
    /// and which were not. Files already written are left in place.
    pub async fn inject(
        &self,
        bindings: &mut BindingSet,
        resolved: &BTreeMap<ReferenceKey, Arc<ResolvedSecret>>,
    ) -> Result<()> {
        let mut succeeded = Vec::new();
        let mut failed: Vec<InjectionFailure> = Vec::new();

        for (binding, value) in bindings.iter_mut() {
            let BindingValue::Reference { reference, .. } = &*value else {
                continue;
            };

            if !failed.is_empty() {
                failed.push(InjectionFailure {
                    binding: binding.to_string(),
                    destination: destination_path(reference),
                    detail: "not attempted".to_string(),
                });
                continue;
            }

            match self.apply(reference, resolved).await {
                Ok(injected) => {
                    debug!(binding = %binding, "injected secret");
                    *value = injected;
                    succeeded.push(binding.to_string());
                }
                Err(detail) => {
                    warn!(binding = %binding, "secret injection failed: {}", detail);
                    failed.push(InjectionFailure {
                        binding: binding.to_string(),
                        destination: destination_path(reference),
                        detail,
                    });
                }
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(Error::PartialInjection { succeeded, failed })
        }
    }

    /// Inject one resolved reference; the error is a printable detail
    async fn apply(
        &self,
        reference: &SecretReference,
        resolved: &BTreeMap<ReferenceKey, Arc<ResolvedSecret>>,
    ) -> std::result::Result<BindingValue, String> {
        let secret = resolved
            .get(reference.key())
            .ok_or_else(|| format!("{} was not resolved", reference.key()))?;

        match reference.destination() {
            None => secret
                .as_str()
                .map(|s| BindingValue::Resolved(SecureString::from(s)))
                .ok_or_else(|| {
                    "plaintext is not valid UTF-8; use a file destination".to_string()
                }),
            Some(Destination::Path(path)) => {
                self.write_file(path, secret.plaintext())
                    .await
                    .map_err(|e| format!("failed to write {}: {}", path.display(), e))?;
                Ok(BindingValue::File(path.clone()))
            }
            Some(Destination::TempFile) => self
                .write_temp_file(reference.object(), secret.plaintext())
                .await
                .map(BindingValue::File)
                .map_err(|e| format!("failed to create temporary file: {}", e)),
        }
    }

    /// Atomically replace `path` with `contents`
    ///
    /// The parent directory must already exist.
    pub async fn write_file(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let path = path.to_path_buf();
        let contents = Zeroizing::new(contents.to_vec());
        let mode = self.file_mode;
        tokio::task::spawn_blocking(move || write_atomic(&path, &contents, mode))
            .await
            .map_err(io::Error::other)?
    }

    /// Write `contents` to a new file in the system temp directory
    ///
    /// The file keeps the object's extension so tools that sniff it still work.
    pub async fn write_temp_file(&self, object: &str, contents: &[u8]) -> io::Result<PathBuf> {
        let suffix = Path::new(object)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e))
            .unwrap_or_default();
        let contents = Zeroizing::new(contents.to_vec());
        let mode = self.file_mode;

        tokio::task::spawn_blocking(move || {
            let mut file = tempfile::Builder::new()
                .prefix(FILE_PREFIX)
                .suffix(&suffix)
                .tempfile()?;
            set_mode(file.as_file(), mode)?;
            file.write_all(&contents)?;
            file.as_file().sync_all()?;
            let (_, path) = file.keep().map_err(|e| e.error)?;
            Ok::<_, io::Error>(path)
        })
        .await
        .map_err(io::Error::other)?
    }
}

fn destination_path(reference: &SecretReference) -> Option<PathBuf> {
    match reference.destination() {
        Some(Destination::Path(path)) => Some(path.clone()),
        _ => None,
    }
}

fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> io::Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "destination has no parent"))?;
    if !parent.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("directory {} does not exist", parent.display()),
        ));
    }

    // Created 0600 by tempfile; never readable by others at any point
    let mut tmp = tempfile::Builder::new()
        .prefix(&format!(".{}", FILE_PREFIX))
        .tempfile_in(parent)?;
    set_mode(tmp.as_file(), mode)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(unix)]
fn set_mode(file: &std::fs::File, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_file: &std::fs::File, _mode: u32) -> io::Result<()> {
    Ok(())
}
