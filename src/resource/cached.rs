//! Cached object handle
//!
//! Implements the caching and conditional-update contract once for every
//! resource kind.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::AnnotatedResource;
use crate::error::{Error, Result};
use crate::store::{Annotations, ObjectKey, ObjectStore, Version};

/// Locally cached copy of one stored object
pub struct CachedObject {
    store: Arc<dyn ObjectStore>,
    key: ObjectKey,
    annotations: Annotations,
    version: Option<Version>,
    valid: bool,
    timeout: Duration,
}

impl CachedObject {
    /// Create a handle; nothing is read until first use
    pub fn new(store: Arc<dyn ObjectStore>, key: ObjectKey, timeout: Duration) -> Self {
        Self {
            store,
            key,
            annotations: Annotations::new(),
            version: None,
            valid: false,
            timeout,
        }
    }

    /// Version of the cached copy, if one was read
    pub fn version(&self) -> Option<Version> {
        self.version
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    async fn ensure_fresh(&mut self) -> Result<()> {
        if self.valid {
            return Ok(());
        }
        self.fetch().await
    }

    /// Run one store call under the configured timeout
    async fn bounded<T, F>(&self, op: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Transport(format!(
                "{} of {} timed out after {:?}",
                op, self.key, self.timeout
            ))),
        }
    }
}

/// Verify every expected value against the cached annotations
pub(crate) fn check_annotations(current: &Annotations, check: &Annotations) -> Result<()> {
    for (key, expected) in check {
        let found = current.get(key).map(String::as_str).unwrap_or("");
        if found != expected {
            return Err(Error::PreconditionFailed {
                key: key.clone(),
                expected: expected.clone(),
                found: found.to_string(),
            });
        }
    }
    Ok(())
}

#[async_trait]
impl AnnotatedResource for CachedObject {
    fn key(&self) -> &ObjectKey {
        &self.key
    }

    async fn fetch(&mut self) -> Result<()> {
        tracing::trace!("fetching {}", self.key);
        let fetched = self.bounded("get", self.store.get(&self.key)).await;
        match fetched {
            Ok(object) => {
                self.annotations = object.annotations;
                self.version = Some(object.version);
                self.valid = true;
                Ok(())
            }
            Err(e) => {
                self.valid = false;
                Err(e)
            }
        }
    }

    async fn annotations(&mut self) -> Result<Annotations> {
        self.ensure_fresh().await?;
        Ok(self.annotations.clone())
    }

    async fn set_annotations_if(&mut self, check: &Annotations, set: &Annotations) -> Result<()> {
        self.ensure_fresh().await?;

        if let Err(e) = check_annotations(&self.annotations, check) {
            tracing::debug!("{}: {}", self.key, e);
            return Err(e);
        }

        let mut updated = self.annotations.clone();
        for (key, value) in set {
            updated.insert(key.clone(), value.clone());
        }

        let written = self
            .bounded("update", self.store.update(&self.key, &updated, self.version))
            .await;
        match written {
            Ok(version) => {
                tracing::debug!("{}: wrote {:?} at version {}", self.key, set, version);
                self.annotations = updated;
                self.version = Some(version);
                self.valid = true;
                Ok(())
            }
            Err(e) => {
                tracing::debug!("{}: write failed: {}", self.key, e);
                self.invalidate();
                Err(e)
            }
        }
    }

    fn invalidate(&mut self) {
        self.valid = false;
    }
}
