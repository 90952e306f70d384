//! Coordinator Interface
//!
//! [`ClusterStore`] is what a member's coordination loop talks to: it
//! reads and moves the cluster and member states and takes or releases
//! locks, always on behalf of this process's [`Identity`]. Every call works
//! on a freshly constructed resource handle, so no state is cached between
//! calls.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{KeyConfig, QuayConfig};
use crate::error::{Error, Result};
use crate::identity::Identity;
use crate::lock::{self, LockInfo, LockSpec};
use crate::resource::{AnnotatedResource, ClusterObject, CoordinationObject, FieldGuard, MemberObject};
use crate::state::{self, ClusterState, MemberState, Transition};
use crate::store::{Annotations, ObjectKey, ObjectStore, ResourceKind};

/// Object a lock operation applies to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "name")]
pub enum LockTarget {
    Cluster,
    Coordination,
    /// A member object; `None` means this process's own member
    Member(Option<String>),
}

/// Coordination state of one cluster, as seen by one member
pub struct ClusterStore {
    store: Arc<dyn ObjectStore>,
    identity: Identity,
    cluster_name: String,
    coordination_name: String,
    keys: KeyConfig,
    lock: LockSpec,
    timeout: Duration,
}

impl ClusterStore {
    /// Create a store view for `identity`
    pub fn new(store: Arc<dyn ObjectStore>, identity: Identity, config: &QuayConfig) -> Result<Self> {
        let cluster_name = match &config.cluster.name {
            Some(name) => name.clone(),
            None => identity.group_name()?.to_string(),
        };

        Ok(Self {
            store,
            identity,
            cluster_name,
            coordination_name: config.cluster.coordination_object.clone(),
            keys: config.keys.clone(),
            lock: config.lock.spec(),
            timeout: config.store.timeout(),
        })
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Identifier this process records as lock holder
    pub fn holder_id(&self) -> String {
        self.identity.holder_id()
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    pub fn lock_spec(&self) -> &LockSpec {
        &self.lock
    }

    fn guard(&self, protected: &[String]) -> FieldGuard {
        FieldGuard::new(self.lock.clone(), self.holder_id(), protected.to_vec())
    }

    /// Handle on the cluster object
    pub fn cluster(&self) -> ClusterObject {
        ClusterObject::new(
            self.store.clone(),
            self.identity.namespace(),
            &self.cluster_name,
            self.timeout,
            self.guard(&self.keys.protected_cluster),
        )
    }

    /// Handle on a member object
    pub fn member(&self, name: &str) -> MemberObject {
        MemberObject::new(
            self.store.clone(),
            self.identity.namespace(),
            name,
            self.timeout,
            self.guard(&self.keys.protected_member),
        )
    }

    /// Handle on this process's own member object
    pub fn own_member(&self) -> MemberObject {
        self.member(self.identity.name())
    }

    /// Handle on the coordination object
    pub fn coordination(&self) -> CoordinationObject {
        CoordinationObject::new(
            self.store.clone(),
            self.identity.namespace(),
            &self.coordination_name,
            self.timeout,
            self.guard(&self.keys.protected_coordination),
        )
    }

    fn resource(&self, target: &LockTarget) -> Box<dyn AnnotatedResource> {
        match target {
            LockTarget::Cluster => Box::new(self.cluster()),
            LockTarget::Coordination => Box::new(self.coordination()),
            LockTarget::Member(Some(name)) => Box::new(self.member(name)),
            LockTarget::Member(None) => Box::new(self.own_member()),
        }
    }

    /// Take the lock on `target` for this process
    pub async fn acquire_lock(&self, target: &LockTarget) -> Result<bool> {
        let mut resource = self.resource(target);
        lock::acquire(resource.as_mut(), &self.lock, &self.holder_id()).await
    }

    /// Release this process's lock on `target`
    pub async fn release_lock(&self, target: &LockTarget) -> Result<bool> {
        let mut resource = self.resource(target);
        lock::release(resource.as_mut(), &self.lock, &self.holder_id()).await
    }

    /// Current lock record on `target`
    pub async fn lock_info(&self, target: &LockTarget) -> Result<LockInfo> {
        let mut resource = self.resource(target);
        lock::inspect(resource.as_mut(), &self.lock).await
    }

    /// Current cluster state; `EMPTY` when none was stored yet
    pub async fn cluster_state(&self) -> Result<ClusterState> {
        state::get_state(&mut self.cluster(), &self.keys.cluster_state).await
    }

    /// Move the cluster to `next`
    pub async fn set_cluster_state(&self, next: ClusterState) -> Result<Transition<ClusterState>> {
        let mut cluster = self.cluster();
        let result = state::set_state(&mut cluster, &self.keys.cluster_state, next).await;
        if let Err(e) = &result {
            tracing::debug!("ClusterStore.set_cluster_state {}: {}", next, e);
        }
        result
    }

    /// Current state of a member; `INIT` when none was stored yet
    pub async fn member_state(&self, name: &str) -> Result<MemberState> {
        state::get_state(&mut self.member(name), &self.keys.member_state).await
    }

    /// Move a member to `next`
    pub async fn set_member_state(&self, name: &str, next: MemberState) -> Result<Transition<MemberState>> {
        let mut member = self.member(name);
        let result = state::set_state(&mut member, &self.keys.member_state, next).await;
        if let Err(e) = &result {
            tracing::debug!("ClusterStore.set_member_state {} {}: {}", name, next, e);
        }
        result
    }

    /// All annotations of a member object
    pub async fn member_annotations(&self, name: &str) -> Result<Annotations> {
        self.member(name).annotations().await
    }

    /// Cluster configuration from the coordination object
    pub async fn cluster_config(&self) -> Result<Annotations> {
        self.coordination().config().await
    }

    /// Create whichever of the cluster, coordination and own member objects
    /// do not exist yet. Returns the keys that were created.
    pub async fn bootstrap(&self) -> Result<Vec<ObjectKey>> {
        let namespace = self.identity.namespace();
        let wanted = [
            ObjectKey::new(ResourceKind::Cluster, namespace, self.cluster_name.as_str()),
            ObjectKey::new(ResourceKind::Coordination, namespace, self.coordination_name.as_str()),
            ObjectKey::new(ResourceKind::Member, namespace, self.identity.name()),
        ];

        let mut created = Vec::new();
        for key in wanted {
            let attempt = tokio::time::timeout(self.timeout, self.store.create(&key, &Annotations::new())).await;
            match attempt {
                Ok(Ok(_)) => {
                    tracing::info!("Created {}", key);
                    created.push(key);
                }
                Ok(Err(Error::AlreadyExists { .. })) => {
                    tracing::debug!("{} already exists", key);
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    return Err(Error::Transport(format!(
                        "create of {} timed out after {:?}",
                        key, self.timeout
                    )))
                }
            }
        }
        Ok(created)
    }
}
