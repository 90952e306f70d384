//! In-process object store
//!
//! Keeps every object in a map behind a single lock, which gives the
//! same per-object write serialization as the shared backends.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Annotations, ObjectKey, ObjectStore, StoredObject, Version};
use crate::error::Result;

/// Object store held entirely in memory
#[derive(Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<ObjectKey, StoredObject>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of objects currently stored
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, key: &ObjectKey) -> Result<StoredObject> {
        let objects = self.objects.read().await;
        objects.get(key).cloned().ok_or_else(|| key.not_found())
    }

    async fn update(
        &self,
        key: &ObjectKey,
        annotations: &Annotations,
        expected: Option<Version>,
    ) -> Result<Version> {
        let mut objects = self.objects.write().await;
        let object = objects.get_mut(key).ok_or_else(|| key.not_found())?;

        if let Some(expected) = expected {
            if object.version != expected {
                return Err(key.version_conflict(expected, object.version));
            }
        }

        object.annotations = annotations.clone();
        object.version += 1;
        tracing::trace!("memory store: {} now at version {}", key, object.version);
        Ok(object.version)
    }

    async fn create(&self, key: &ObjectKey, annotations: &Annotations) -> Result<Version> {
        let mut objects = self.objects.write().await;
        if objects.contains_key(key) {
            return Err(key.already_exists());
        }
        objects.insert(
            key.clone(),
            StoredObject {
                annotations: annotations.clone(),
                version: 1,
            },
        );
        Ok(1)
    }
}
