//! pgquay - Lock-guarded cluster state for replicated PostgreSQL
//!
//! Members of a replicated PostgreSQL cluster coordinate through objects in
//! a shared store: one cluster object, one object per member and one
//! coordination object holding cluster configuration. Each object carries a
//! string annotation map.
//!
//! # Architecture
//!
//! Every object is read and conditionally written through
//! [`resource::AnnotatedResource`]. On top of that sits an optimistic
//! lease lock ([`lock`]) stored in two annotations of the locked object,
//! and two state machines ([`state`]) whose values live in annotations that
//! may only be written while holding the lock.
//!
//! # Features
//!
//! - Conditional annotation updates with version-checked writes
//! - Lease locks with stale-lock takeover and read-back verification
//! - Cluster and member lifecycles with a fixed transition graph
//! - SQLite store for members sharing a volume, in-memory store for tests
//! - HTTP API and command line tools

pub mod api;
pub mod backoff;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod identity;
pub mod lock;
pub mod resource;
pub mod state;
pub mod store;

pub use config::QuayConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::QuayConfig;
    pub use crate::coordinator::{ClusterStore, LockTarget};
    pub use crate::error::{Error, Result};
    pub use crate::identity::Identity;
    pub use crate::lock::{LockInfo, LockSpec};
    pub use crate::resource::AnnotatedResource;
    pub use crate::state::{ClusterState, Lifecycle, MemberState, Transition};
    pub use crate::store::{Annotations, ObjectStore};
}
