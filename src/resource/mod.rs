//! Annotated Resources
//!
//! Every cluster-control object is seen by the lock and state code only
//! through [`AnnotatedResource`]: a cached annotation map that can be
//! refreshed and conditionally updated.

mod cached;
mod kinds;

pub use cached::CachedObject;
pub use kinds::{ClusterObject, CoordinationObject, FieldGuard, MemberObject};

use async_trait::async_trait;

use crate::error::Result;
use crate::store::{Annotations, ObjectKey};

/// A remotely stored object exposing a string annotation map
#[async_trait]
pub trait AnnotatedResource: Send {
    /// Identity of the underlying object
    fn key(&self) -> &ObjectKey;

    /// Re-read the remote representation into the cache
    async fn fetch(&mut self) -> Result<()>;

    /// Current annotations, re-fetched first when the cache is stale
    async fn annotations(&mut self) -> Result<Annotations>;

    /// Apply `set` if every key in `check` currently holds the expected value.
    ///
    /// A key missing from the object only matches an expected empty string.
    /// On a failed check nothing is modified; on a failed write the cache is
    /// invalidated.
    async fn set_annotations_if(&mut self, check: &Annotations, set: &Annotations) -> Result<()>;

    /// Mark the cache stale so the next read goes to the store
    fn invalidate(&mut self);
}

/// Build an annotation map from key/value pairs
pub fn annotations<K, V, I>(pairs: I) -> Annotations
where
    K: Into<String>,
    V: Into<String>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}
