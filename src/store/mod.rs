//! Object Store Module
//!
//! Client side of the shared store that holds all coordination state.
//! The store keeps whole objects, each carrying a string annotation map
//! and a version token that increments on every committed write.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{StoreBackend, StoreConfig};
use crate::error::{Error, Result};

/// Annotation map attached to every stored object
pub type Annotations = BTreeMap<String, String>;

/// Version token returned by the store on every committed write
pub type Version = u64;

/// Pseudo-key reported in precondition failures caused by a version mismatch
pub const VERSION_KEY: &str = "resourceVersion";

/// Kind of cluster-control object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// Per-member object (one per database instance)
    Member,
    /// Cluster-wide object holding the cluster state
    Cluster,
    /// Coordination object holding shared cluster configuration
    Coordination,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Member => "member",
            ResourceKind::Cluster => "cluster",
            ResourceKind::Coordination => "coordination",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one object in the store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(kind: ResourceKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub(crate) fn not_found(&self) -> Error {
        Error::NotFound { key: self.to_string() }
    }

    pub(crate) fn already_exists(&self) -> Error {
        Error::AlreadyExists { key: self.to_string() }
    }

    pub(crate) fn version_conflict(&self, expected: Version, found: Version) -> Error {
        Error::PreconditionFailed {
            key: VERSION_KEY.to_string(),
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// Object as returned by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    pub annotations: Annotations,
    pub version: Version,
}

/// Remote object store client
///
/// Implementations serialize writes to a single object. Nothing is
/// guaranteed across objects.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read an object. Absent objects yield [`Error::NotFound`].
    async fn get(&self, key: &ObjectKey) -> Result<StoredObject>;

    /// Replace the annotation map of an existing object.
    ///
    /// With `expected` set, the write is rejected with
    /// [`Error::PreconditionFailed`] unless the stored version still matches.
    async fn update(
        &self,
        key: &ObjectKey,
        annotations: &Annotations,
        expected: Option<Version>,
    ) -> Result<Version>;

    /// Create a new object. Existing objects yield [`Error::AlreadyExists`].
    async fn create(&self, key: &ObjectKey, annotations: &Annotations) -> Result<Version>;
}

/// Open the store backend selected in the configuration
pub fn open(config: &StoreConfig) -> Result<Arc<dyn ObjectStore>> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreBackend::Sqlite => {
            let path = config
                .path
                .clone()
                .ok_or_else(|| Error::Config("store.path is required for the sqlite backend".into()))?;
            Ok(Arc::new(SqliteStore::open(path, config.timeout())?))
        }
    }
}
