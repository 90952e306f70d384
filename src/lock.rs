//! Optimistic Lease Locks
//!
//! Mutual exclusion on top of an [`AnnotatedResource`]. A lock is two
//! annotations, `<name>_podname` holding the owner and `<name>_time`
//! holding the lease expiry (RFC 3339, UTC). Nothing in the store enforces
//! the lease: participants agree to treat an expired lock as free.
//!
//! Acquisition reads the owner, conditionally writes itself as owner with
//! the observed owner as precondition, then reads back to confirm.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::resource::{annotations, AnnotatedResource};
use crate::store::Annotations;

/// Default lock name, used as prefix of both lock annotations
pub const DEFAULT_LOCK_NAME: &str = "pgquaylock";

/// Default lease duration
pub const DEFAULT_LEASE: Duration = Duration::from_secs(10);

/// Names a lock and its lease length
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockSpec {
    name: String,
    lease: Duration,
}

impl LockSpec {
    pub fn new(name: impl Into<String>, lease: Duration) -> Self {
        Self {
            name: name.into(),
            lease,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lease(&self) -> Duration {
        self.lease
    }

    /// Annotation holding the current holder
    pub fn owner_key(&self) -> String {
        format!("{}_podname", self.name)
    }

    /// Annotation holding the lease expiry
    pub fn expiry_key(&self) -> String {
        format!("{}_time", self.name)
    }

    fn expiry_from(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let lease = chrono::Duration::from_std(self.lease)
            .map_err(|e| Error::Config(format!("lease {:?} out of range: {}", self.lease, e)))?;
        Ok(now + lease)
    }
}

impl Default for LockSpec {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_NAME, DEFAULT_LEASE)
    }
}

/// Lock record as read from a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockInfo {
    /// Last recorded holder, empty when free
    pub owner: String,
    /// Lease expiry, `None` when the lock never expires
    pub expires: Option<DateTime<Utc>>,
    /// Owner is set and the lease has not run out
    pub held: bool,
}

impl LockInfo {
    /// Derive the lock record from a resource's annotations
    pub fn from_annotations(annotations: &Annotations, spec: &LockSpec, now: DateTime<Utc>) -> Result<Self> {
        let owner = annotations
            .get(&spec.owner_key())
            .cloned()
            .unwrap_or_default();
        if owner.is_empty() {
            return Ok(Self {
                owner,
                expires: None,
                held: false,
            });
        }

        let expires = match annotations.get(&spec.expiry_key()) {
            Some(raw) if !raw.is_empty() => Some(parse_expiry(raw)?),
            _ => None,
        };
        let held = expires.map_or(true, |at| now < at);

        Ok(Self { owner, expires, held })
    }

    /// Lock has an owner but its lease ran out
    pub fn is_stale(&self) -> bool {
        !self.owner.is_empty() && !self.held
    }

    pub fn is_held_by(&self, holder: &str) -> bool {
        self.held && self.owner == holder
    }
}

/// Canonical text form of a lease expiry
pub fn format_expiry(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a lease expiry written by any participant
pub fn parse_expiry(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| Error::InvalidTimestamp {
            value: raw.to_string(),
            reason: e.to_string(),
        })
}

/// Re-read the resource and report its lock record
pub async fn inspect<R>(resource: &mut R, spec: &LockSpec) -> Result<LockInfo>
where
    R: AnnotatedResource + ?Sized,
{
    resource.invalidate();
    let current = resource.annotations().await?;
    LockInfo::from_annotations(&current, spec, Utc::now())
}

/// Take the lock for `holder`, or extend the lease if it already holds it
pub async fn acquire<R>(resource: &mut R, spec: &LockSpec, holder: &str) -> Result<bool>
where
    R: AnnotatedResource + ?Sized,
{
    let info = inspect(resource, spec).await?;
    if info.held && info.owner != holder {
        tracing::debug!("{}: {} is locked by {}", resource.key(), spec.name(), info.owner);
        return Err(Error::AlreadyLocked { owner: info.owner });
    }
    if info.is_stale() {
        tracing::debug!(
            "{}: taking over stale {} from {}",
            resource.key(),
            spec.name(),
            info.owner
        );
    }

    let expires = format_expiry(spec.expiry_from(Utc::now())?);
    let check = annotations([(spec.owner_key(), info.owner.clone())]);
    let set = annotations([(spec.expiry_key(), expires), (spec.owner_key(), holder.to_string())]);

    match resource.set_annotations_if(&check, &set).await {
        Ok(()) => {}
        Err(Error::PreconditionFailed { .. }) => {
            return Err(Error::LockContention {
                lock: spec.name().to_string(),
            })
        }
        Err(e) => return Err(e),
    }

    let info = inspect(resource, spec).await?;
    if !info.is_held_by(holder) {
        return Err(Error::LockLost {
            holder: holder.to_string(),
            owner: info.owner,
        });
    }

    tracing::debug!("{}: {} acquired by {}", resource.key(), spec.name(), holder);
    Ok(true)
}

/// Give up the lock held by `holder`
pub async fn release<R>(resource: &mut R, spec: &LockSpec, holder: &str) -> Result<bool>
where
    R: AnnotatedResource + ?Sized,
{
    let info = inspect(resource, spec).await?;
    if info.owner != holder {
        return Err(Error::NotHolding {
            holder: holder.to_string(),
            owner: info.owner,
        });
    }

    let check = annotations([(spec.owner_key(), holder.to_string())]);
    let set = annotations([(spec.expiry_key(), String::new()), (spec.owner_key(), String::new())]);

    match resource.set_annotations_if(&check, &set).await {
        Ok(()) => {}
        Err(Error::PreconditionFailed { .. }) => {
            return Err(Error::LockContention {
                lock: spec.name().to_string(),
            })
        }
        Err(e) => return Err(e),
    }

    let info = inspect(resource, spec).await?;
    if !info.owner.is_empty() {
        return Err(Error::UnlockFailed { owner: info.owner });
    }

    tracing::debug!("{}: {} released by {}", resource.key(), spec.name(), holder);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;

    use crate::resource::CachedObject;
    use crate::store::{MemoryStore, ObjectKey, ObjectStore, ResourceKind, StoredObject, Version};

    fn cluster_key() -> ObjectKey {
        ObjectKey::new(ResourceKind::Cluster, "db", "pg")
    }

    async fn object_on(store: Arc<dyn ObjectStore>) -> CachedObject {
        CachedObject::new(store, cluster_key(), Duration::from_secs(1))
    }

    async fn fresh_store() -> Arc<dyn ObjectStore> {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
        store.create(&cluster_key(), &Annotations::new()).await.unwrap();
        store
    }

    /// Store that acknowledges updates without keeping them
    struct DroppingStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl ObjectStore for DroppingStore {
        async fn get(&self, key: &ObjectKey) -> Result<StoredObject> {
            self.inner.get(key).await
        }

        async fn update(&self, key: &ObjectKey, _a: &Annotations, _e: Option<Version>) -> Result<Version> {
            Ok(self.inner.get(key).await?.version)
        }

        async fn create(&self, key: &ObjectKey, a: &Annotations) -> Result<Version> {
            self.inner.create(key, a).await
        }
    }

    /// Store where another writer touches the object just before our first update
    struct RacingStore {
        inner: MemoryStore,
        raced: AtomicBool,
    }

    impl RacingStore {
        fn new(inner: MemoryStore) -> Self {
            Self {
                inner,
                raced: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl ObjectStore for RacingStore {
        async fn get(&self, key: &ObjectKey) -> Result<StoredObject> {
            self.inner.get(key).await
        }

        async fn update(&self, key: &ObjectKey, a: &Annotations, e: Option<Version>) -> Result<Version> {
            if !self.raced.swap(true, Ordering::SeqCst) {
                let current = self.inner.get(key).await?;
                self.inner.update(key, &current.annotations, None).await?;
            }
            self.inner.update(key, a, e).await
        }

        async fn create(&self, key: &ObjectKey, a: &Annotations) -> Result<Version> {
            self.inner.create(key, a).await
        }
    }

    #[test]
    fn test_lock_keys() {
        let spec = LockSpec::default();
        assert_eq!(spec.owner_key(), "pgquaylock_podname");
        assert_eq!(spec.expiry_key(), "pgquaylock_time");
        assert_eq!(spec.lease(), Duration::from_secs(10));
    }

    #[test]
    fn test_lock_info_derivation() {
        let spec = LockSpec::default();
        let now = Utc::now();

        let free = LockInfo::from_annotations(&Annotations::new(), &spec, now).unwrap();
        assert!(!free.held);
        assert!(!free.is_stale());

        let forever = annotations([(spec.owner_key(), "db.pg-0".to_string())]);
        let info = LockInfo::from_annotations(&forever, &spec, now).unwrap();
        assert!(info.held);
        assert_eq!(info.expires, None);

        let expired = annotations([
            (spec.owner_key(), "db.pg-0".to_string()),
            (spec.expiry_key(), format_expiry(now - chrono::Duration::seconds(1))),
        ]);
        let info = LockInfo::from_annotations(&expired, &spec, now).unwrap();
        assert!(!info.held);
        assert!(info.is_stale());
        assert_eq!(info.owner, "db.pg-0");

        let garbage = annotations([
            (spec.owner_key(), "db.pg-0".to_string()),
            (spec.expiry_key(), "next tuesday".to_string()),
        ]);
        assert!(matches!(
            LockInfo::from_annotations(&garbage, &spec, now),
            Err(Error::InvalidTimestamp { .. })
        ));
    }

    #[test]
    fn test_expiry_format_round_trips() {
        let at = parse_expiry("2026-10-17T08:30:00.250Z").unwrap();
        assert_eq!(format_expiry(at), "2026-10-17T08:30:00.250Z");
        // Other participants may write offsets or whole seconds
        assert_eq!(parse_expiry("2026-10-17T10:30:00+02:00").unwrap(), parse_expiry("2026-10-17T08:30:00Z").unwrap());
    }

    #[tokio::test]
    async fn test_lock_round_trip() {
        let store = fresh_store().await;
        let spec = LockSpec::default();
        let mut a = object_on(store.clone()).await;
        let mut b = object_on(store.clone()).await;

        assert!(acquire(&mut a, &spec, "A").await.unwrap());

        match acquire(&mut b, &spec, "B").await {
            Err(Error::AlreadyLocked { owner }) => assert_eq!(owner, "A"),
            other => panic!("unexpected result: {:?}", other),
        }

        assert!(release(&mut a, &spec, "A").await.unwrap());
        assert!(acquire(&mut b, &spec, "B").await.unwrap());
        assert!(inspect(&mut a, &spec).await.unwrap().is_held_by("B"));
    }

    #[tokio::test]
    async fn test_reacquire_extends_lease() {
        let store = fresh_store().await;
        let spec = LockSpec::default();
        let mut a = object_on(store).await;

        acquire(&mut a, &spec, "A").await.unwrap();
        let first = inspect(&mut a, &spec).await.unwrap().expires.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        acquire(&mut a, &spec, "A").await.unwrap();
        let second = inspect(&mut a, &spec).await.unwrap().expires.unwrap();
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_stale_lock_can_be_taken_over() {
        let store = fresh_store().await;
        let short = LockSpec::new(DEFAULT_LOCK_NAME, Duration::from_millis(100));
        let mut a = object_on(store.clone()).await;
        let mut b = object_on(store.clone()).await;

        acquire(&mut a, &short, "A").await.unwrap();
        assert!(matches!(
            acquire(&mut b, &short, "B").await,
            Err(Error::AlreadyLocked { .. })
        ));

        tokio::time::sleep(Duration::from_millis(200)).await;

        let info = inspect(&mut b, &short).await.unwrap();
        assert_eq!(info.owner, "A");
        assert!(info.is_stale());

        assert!(acquire(&mut b, &short, "B").await.unwrap());
        assert!(inspect(&mut a, &short).await.unwrap().is_held_by("B"));
    }

    #[tokio::test]
    async fn test_release_by_non_holder() {
        let store = fresh_store().await;
        let spec = LockSpec::default();
        let mut a = object_on(store.clone()).await;
        let mut b = object_on(store.clone()).await;

        acquire(&mut a, &spec, "A").await.unwrap();
        match release(&mut b, &spec, "B").await {
            Err(Error::NotHolding { holder, owner }) => {
                assert_eq!(holder, "B");
                assert_eq!(owner, "A");
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(inspect(&mut b, &spec).await.unwrap().is_held_by("A"));
    }

    #[tokio::test]
    async fn test_release_of_free_lock() {
        let store = fresh_store().await;
        let spec = LockSpec::default();
        let mut a = object_on(store).await;
        assert!(matches!(
            release(&mut a, &spec, "A").await,
            Err(Error::NotHolding { .. })
        ));
    }

    #[tokio::test]
    async fn test_release_clears_owner_field() {
        let store = fresh_store().await;
        let spec = LockSpec::default();
        let mut a = object_on(store.clone()).await;

        acquire(&mut a, &spec, "A").await.unwrap();
        release(&mut a, &spec, "A").await.unwrap();

        let raw = store.get(&cluster_key()).await.unwrap().annotations;
        assert_eq!(raw.get(&spec.owner_key()).unwrap(), "");
        assert_eq!(raw.get(&spec.expiry_key()).unwrap(), "");
    }

    #[tokio::test]
    async fn test_independent_locks_coexist() {
        let store = fresh_store().await;
        let first = LockSpec::new("first", DEFAULT_LEASE);
        let second = LockSpec::new("second", DEFAULT_LEASE);
        let mut a = object_on(store.clone()).await;
        let mut b = object_on(store.clone()).await;

        acquire(&mut a, &first, "A").await.unwrap();
        acquire(&mut b, &second, "B").await.unwrap();
        assert!(inspect(&mut a, &first).await.unwrap().is_held_by("A"));
        assert!(inspect(&mut a, &second).await.unwrap().is_held_by("B"));
    }

    #[tokio::test]
    async fn test_contention_between_read_and_write() {
        let store = fresh_store().await;
        let spec = LockSpec::default();
        let mut a = object_on(store.clone()).await;

        // Someone else writes the owner field directly: the conditional
        // write of a stale handle loses
        let mut b = object_on(store.clone()).await;
        b.annotations().await.unwrap();
        store
            .update(&cluster_key(), &annotations([(spec.owner_key(), "A".to_string())]), None)
            .await
            .unwrap();
        let check = annotations([(spec.owner_key(), String::new())]);
        let set = annotations([(spec.owner_key(), "B".to_string())]);
        assert!(matches!(
            b.set_annotations_if(&check, &set).await,
            Err(Error::PreconditionFailed { .. })
        ));

        assert!(inspect(&mut a, &spec).await.unwrap().is_held_by("A"));
    }

    #[tokio::test]
    async fn test_acquire_losing_race_is_contention() {
        let racing = Arc::new(RacingStore::new(MemoryStore::new()));
        racing.create(&cluster_key(), &Annotations::new()).await.unwrap();
        let spec = LockSpec::default();
        let mut a = object_on(racing.clone()).await;

        match acquire(&mut a, &spec, "A").await {
            Err(Error::LockContention { lock }) => assert_eq!(lock, spec.name()),
            other => panic!("unexpected result: {:?}", other),
        }

        let stored = racing.get(&cluster_key()).await.unwrap();
        assert!(!stored.annotations.contains_key(&spec.owner_key()));
        assert!(!inspect(&mut a, &spec).await.unwrap().held);
    }

    #[tokio::test]
    async fn test_release_losing_race_is_contention() {
        let inner = MemoryStore::new();
        let spec = LockSpec::default();
        let expires = format_expiry(spec.expiry_from(Utc::now()).unwrap());
        inner
            .create(
                &cluster_key(),
                &annotations([(spec.owner_key(), "A".to_string()), (spec.expiry_key(), expires)]),
            )
            .await
            .unwrap();
        let racing: Arc<dyn ObjectStore> = Arc::new(RacingStore::new(inner));
        let mut a = object_on(racing).await;

        match release(&mut a, &spec, "A").await {
            Err(Error::LockContention { lock }) => assert_eq!(lock, spec.name()),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(inspect(&mut a, &spec).await.unwrap().is_held_by("A"));
    }

    #[tokio::test]
    async fn test_silently_dropped_write_is_lock_lost() {
        let dropping: Arc<dyn ObjectStore> = Arc::new(DroppingStore {
            inner: MemoryStore::new(),
        });
        dropping.create(&cluster_key(), &Annotations::new()).await.unwrap();
        let spec = LockSpec::default();
        let mut a = object_on(dropping).await;

        match acquire(&mut a, &spec, "A").await {
            Err(Error::LockLost { holder, owner }) => {
                assert_eq!(holder, "A");
                assert_eq!(owner, "");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dropped_release_is_unlock_failed() {
        let inner = MemoryStore::new();
        let spec = LockSpec::default();
        inner
            .create(&cluster_key(), &annotations([(spec.owner_key(), "A".to_string())]))
            .await
            .unwrap();
        let dropping: Arc<dyn ObjectStore> = Arc::new(DroppingStore { inner });
        let mut a = object_on(dropping).await;

        match release(&mut a, &spec, "A").await {
            Err(Error::UnlockFailed { owner }) => assert_eq!(owner, "A"),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
