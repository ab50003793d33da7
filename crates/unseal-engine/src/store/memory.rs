//! In-process object store
//!
//! Keeps sealed documents in memory, every write adding a new numeric
//! generation. Used by tests and by embedders that stage secrets themselves.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::{EncryptedObject, ObjectStore};
use crate::envelope::SealedDocument;
use crate::error::ResolveError;
use crate::reference::ReferenceKey;

/// `(location, object)` -> generations, oldest first
type Objects = BTreeMap<(String, String), Vec<SealedDocument>>;

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<Objects>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new generation of an object and return its generation token
    pub async fn insert(
        &self,
        location: &str,
        object: &str,
        document: SealedDocument,
    ) -> Result<String, ResolveError> {
        ReferenceKey::new(location, object).validate()?;
        let mut objects = self.objects.write().await;
        let generations = objects
            .entry((location.to_string(), object.to_string()))
            .or_default();
        generations.push(document);
        Ok(generations.len().to_string())
    }

    /// Drop every generation of an object
    ///
    /// Lets embedders and tests simulate a deleted secret; resolving it
    /// afterwards is `NotFound`.
    pub async fn remove(&self, location: &str, object: &str) -> bool {
        self.objects
            .write()
            .await
            .remove(&(location.to_string(), object.to_string()))
            .is_some()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, key: &ReferenceKey) -> Result<EncryptedObject, ResolveError> {
        let objects = self.objects.read().await;
        let generations = objects
            .get(&(key.location.clone(), key.object.clone()))
            .filter(|g| !g.is_empty())
            .ok_or_else(|| ResolveError::not_found(format!("object {} does not exist", key)))?;

        let index = match &key.generation {
            None => generations.len() - 1,
            Some(generation) => generation
                .parse::<usize>()
                .ok()
                .filter(|g| (1..=generations.len()).contains(g))
                .map(|g| g - 1)
                .ok_or_else(|| {
                    ResolveError::not_found(format!("object {} does not exist", key))
                })?,
        };

        generations[index]
            .clone()
            .into_object(&key.object, Some((index + 1).to_string()))
    }

    async fn list(&self, location: &str, prefix: &str) -> Result<Vec<String>, ResolveError> {
        let objects = self.objects.read().await;
        Ok(objects
            .keys()
            .filter(|(loc, name)| loc == location && name.starts_with(prefix))
            .map(|(_, name)| name.clone())
            .collect())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
