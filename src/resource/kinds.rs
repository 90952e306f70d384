//! Concrete resource kinds
//!
//! Member, cluster and coordination objects share the caching behavior of
//! [`CachedObject`] and differ in which annotations must only be written
//! while holding the object's lock.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{AnnotatedResource, CachedObject};
use crate::error::Result;
use crate::lock::{self, LockSpec};
use crate::store::{Annotations, ObjectKey, ObjectStore, ResourceKind};

/// Annotations that may only be written under a lock, and who takes it
#[derive(Debug, Clone)]
pub struct FieldGuard {
    lock: LockSpec,
    holder: String,
    protected: Vec<String>,
}

impl FieldGuard {
    pub fn new(lock: LockSpec, holder: impl Into<String>, protected: Vec<String>) -> Self {
        Self {
            lock,
            holder: holder.into(),
            protected,
        }
    }

    pub fn lock(&self) -> &LockSpec {
        &self.lock
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub fn protected(&self) -> &[String] {
        &self.protected
    }

    /// True when `set` writes any protected annotation
    pub fn requires_lock(&self, set: &Annotations) -> bool {
        set.keys().any(|key| self.protected.iter().any(|p| p == key))
    }

    /// Conditional write, locked when it touches a protected annotation
    async fn write(&self, object: &mut CachedObject, check: &Annotations, set: &Annotations) -> Result<()> {
        if !self.requires_lock(set) {
            return object.set_annotations_if(check, set).await;
        }

        // A lock the caller already holds stays with the caller
        let info = lock::inspect(&mut *object, &self.lock).await?;
        if info.is_held_by(&self.holder) {
            tracing::debug!("{}: {} already held by {}", object.key(), self.lock.name(), self.holder);
            return object.set_annotations_if(check, set).await;
        }

        tracing::debug!("{}: locking for protected write", object.key());
        lock::acquire(&mut *object, &self.lock, &self.holder).await?;

        let written = object.set_annotations_if(check, set).await;

        tracing::debug!("{}: unlocking", object.key());
        if let Err(e) = lock::release(&mut *object, &self.lock, &self.holder).await {
            tracing::warn!(
                "{}: failed to release {} after write, it expires in {:?}: {}",
                object.key(),
                self.lock.name(),
                self.lock.lease(),
                e
            );
        }

        written
    }
}

/// Object representing one database instance
pub struct MemberObject {
    object: CachedObject,
    guard: FieldGuard,
}

impl MemberObject {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        namespace: &str,
        name: &str,
        timeout: Duration,
        guard: FieldGuard,
    ) -> Self {
        let key = ObjectKey::new(ResourceKind::Member, namespace, name);
        Self {
            object: CachedObject::new(store, key, timeout),
            guard,
        }
    }

    /// Member name
    pub fn name(&self) -> &str {
        &self.object.key().name
    }

    pub fn guard(&self) -> &FieldGuard {
        &self.guard
    }
}

#[async_trait]
impl AnnotatedResource for MemberObject {
    fn key(&self) -> &ObjectKey {
        self.object.key()
    }

    async fn fetch(&mut self) -> Result<()> {
        self.object.fetch().await
    }

    async fn annotations(&mut self) -> Result<Annotations> {
        self.object.annotations().await
    }

    async fn set_annotations_if(&mut self, check: &Annotations, set: &Annotations) -> Result<()> {
        self.guard.write(&mut self.object, check, set).await
    }

    fn invalidate(&mut self) {
        self.object.invalidate()
    }
}

/// Cluster-wide object carrying the cluster state
pub struct ClusterObject {
    object: CachedObject,
    guard: FieldGuard,
}

impl ClusterObject {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        namespace: &str,
        name: &str,
        timeout: Duration,
        guard: FieldGuard,
    ) -> Self {
        let key = ObjectKey::new(ResourceKind::Cluster, namespace, name);
        Self {
            object: CachedObject::new(store, key, timeout),
            guard,
        }
    }

    pub fn guard(&self) -> &FieldGuard {
        &self.guard
    }
}

#[async_trait]
impl AnnotatedResource for ClusterObject {
    fn key(&self) -> &ObjectKey {
        self.object.key()
    }

    async fn fetch(&mut self) -> Result<()> {
        self.object.fetch().await
    }

    async fn annotations(&mut self) -> Result<Annotations> {
        self.object.annotations().await
    }

    async fn set_annotations_if(&mut self, check: &Annotations, set: &Annotations) -> Result<()> {
        self.guard.write(&mut self.object, check, set).await
    }

    fn invalidate(&mut self) {
        self.object.invalidate()
    }
}

/// Object holding shared cluster configuration
pub struct CoordinationObject {
    object: CachedObject,
    guard: FieldGuard,
}

impl CoordinationObject {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        namespace: &str,
        name: &str,
        timeout: Duration,
        guard: FieldGuard,
    ) -> Self {
        let key = ObjectKey::new(ResourceKind::Coordination, namespace, name);
        Self {
            object: CachedObject::new(store, key, timeout),
            guard,
        }
    }

    /// Cluster configuration; an absent object reads as empty
    pub async fn config(&mut self) -> Result<Annotations> {
        match self.object.annotations().await {
            Ok(config) => Ok(config),
            Err(e) if e.is_not_found() => {
                tracing::debug!("{} does not exist, using empty configuration", self.object.key());
                Ok(Annotations::new())
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl AnnotatedResource for CoordinationObject {
    fn key(&self) -> &ObjectKey {
        self.object.key()
    }

    async fn fetch(&mut self) -> Result<()> {
        self.object.fetch().await
    }

    async fn annotations(&mut self) -> Result<Annotations> {
        self.object.annotations().await
    }

    async fn set_annotations_if(&mut self, check: &Annotations, set: &Annotations) -> Result<()> {
        self.guard.write(&mut self.object, check, set).await
    }

    fn invalidate(&mut self) {
        self.object.invalidate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::resource::annotations;
    use crate::store::{MemoryStore, Version};

    const STATE_KEY: &str = "ClusterState";

    fn guard(holder: &str) -> FieldGuard {
        FieldGuard::new(LockSpec::default(), holder, vec![STATE_KEY.to_string()])
    }

    async fn cluster_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .create(&ObjectKey::new(ResourceKind::Cluster, "db", "pg"), &Annotations::new())
            .await
            .unwrap();
        store
    }

    fn cluster(store: &Arc<MemoryStore>, holder: &str) -> ClusterObject {
        ClusterObject::new(store.clone(), "db", "pg", Duration::from_secs(1), guard(holder))
    }

    async fn version(store: &Arc<MemoryStore>) -> Version {
        store
            .get(&ObjectKey::new(ResourceKind::Cluster, "db", "pg"))
            .await
            .unwrap()
            .version
    }

    #[test]
    fn test_requires_lock() {
        let g = guard("db.pg-0");
        assert!(g.requires_lock(&annotations([(STATE_KEY, "UP")])));
        assert!(!g.requires_lock(&annotations([("clusterconfig", "{}")])));
        assert!(!g.requires_lock(&annotations([(g.lock().owner_key(), "db.pg-0".to_string())])));
    }

    #[tokio::test]
    async fn test_unprotected_write_does_not_lock() {
        let store = cluster_store().await;
        let mut object = cluster(&store, "db.pg-0");
        object
            .set_annotations_if(&Annotations::new(), &annotations([("clusterconfig", "{}")]))
            .await
            .unwrap();
        // Create plus one write: no lock traffic
        assert_eq!(version(&store).await, 2);
        assert!(!object.annotations().await.unwrap().contains_key(&object.guard().lock().owner_key()));
    }

    #[tokio::test]
    async fn test_protected_write_locks_and_releases() {
        let store = cluster_store().await;
        let mut object = cluster(&store, "db.pg-0");
        object
            .set_annotations_if(&Annotations::new(), &annotations([(STATE_KEY, "DOWN")]))
            .await
            .unwrap();

        // Create, lock, write, unlock
        assert_eq!(version(&store).await, 4);
        let current = object.annotations().await.unwrap();
        assert_eq!(current.get(STATE_KEY).unwrap(), "DOWN");
        assert_eq!(current.get(&object.guard().lock().owner_key()).unwrap(), "");
    }

    #[tokio::test]
    async fn test_protected_write_keeps_callers_lock() {
        let store = cluster_store().await;
        let mut object = cluster(&store, "db.pg-0");
        let spec = object.guard().lock().clone();
        lock::acquire(&mut object, &spec, "db.pg-0").await.unwrap();

        object
            .set_annotations_if(&Annotations::new(), &annotations([(STATE_KEY, "DOWN")]))
            .await
            .unwrap();

        // Create, lock, write: no unlock
        assert_eq!(version(&store).await, 3);
        let info = lock::inspect(&mut object, &spec).await.unwrap();
        assert!(info.is_held_by("db.pg-0"));
        assert_eq!(object.annotations().await.unwrap().get(STATE_KEY).unwrap(), "DOWN");
    }

    #[tokio::test]
    async fn test_protected_write_blocked_by_live_lock() {
        let store = cluster_store().await;
        let mut holder = cluster(&store, "db.pg-1");
        let spec = holder.guard().lock().clone();
        lock::acquire(&mut holder, &spec, "db.pg-1").await.unwrap();

        let mut other = cluster(&store, "db.pg-0");
        match other
            .set_annotations_if(&Annotations::new(), &annotations([(STATE_KEY, "DOWN")]))
            .await
        {
            Err(Error::AlreadyLocked { owner }) => assert_eq!(owner, "db.pg-1"),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(!other.annotations().await.unwrap().contains_key(STATE_KEY));

        // Unprotected fields stay writable
        other
            .set_annotations_if(&Annotations::new(), &annotations([("note", "x")]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_lock_released_after_failed_check() {
        let store = cluster_store().await;
        let mut object = cluster(&store, "db.pg-0");
        let err = object
            .set_annotations_if(&annotations([(STATE_KEY, "UP")]), &annotations([(STATE_KEY, "DEGRADED")]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PreconditionFailed { .. }));

        let spec = object.guard().lock().clone();
        let info = lock::inspect(&mut object, &spec).await.unwrap();
        assert!(!info.held);
        assert_eq!(info.owner, "");
    }

    #[tokio::test]
    async fn test_member_protects_member_state() {
        let store = Arc::new(MemoryStore::new());
        store
            .create(&ObjectKey::new(ResourceKind::Member, "db", "pg-0"), &Annotations::new())
            .await
            .unwrap();
        let g = FieldGuard::new(LockSpec::default(), "db.pg-0", vec!["MemberState".to_string()]);
        let mut member = MemberObject::new(store.clone(), "db", "pg-0", Duration::from_secs(1), g);
        assert_eq!(member.name(), "pg-0");

        member
            .set_annotations_if(&Annotations::new(), &annotations([("MemberState", "STANDBY")]))
            .await
            .unwrap();
        let stored = store
            .get(&ObjectKey::new(ResourceKind::Member, "db", "pg-0"))
            .await
            .unwrap();
        assert_eq!(stored.version, 4);
        assert_eq!(stored.annotations.get("MemberState").unwrap(), "STANDBY");
    }

    #[tokio::test]
    async fn test_missing_coordination_object_reads_empty() {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
        let g = FieldGuard::new(LockSpec::default(), "db.pg-0", Vec::new());
        let mut coordination = CoordinationObject::new(store, "db", "configdata", Duration::from_secs(1), g);
        assert!(coordination.config().await.unwrap().is_empty());
        assert!(coordination.annotations().await.unwrap_err().is_not_found());
    }
}
