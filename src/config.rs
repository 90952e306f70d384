//! pgquay Configuration
//!
//! This module provides configuration structures for the pgquay
//! high-availability coordinator.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::lock::{LockSpec, DEFAULT_LOCK_NAME};

/// Main pgquay configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuayConfig {
    /// This member's identity
    #[serde(default)]
    pub node: NodeConfig,

    /// Cluster object names
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Shared object store
    #[serde(default)]
    pub store: StoreConfig,

    /// Lock naming and lease
    #[serde(default)]
    pub lock: LockConfig,

    /// Annotation keys
    #[serde(default)]
    pub keys: KeyConfig,

    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Member identity; unset values come from the environment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Namespace, defaults to $POD_NAMESPACE
    #[serde(default)]
    pub namespace: Option<String>,

    /// Instance name, defaults to $HOSTNAME
    #[serde(default)]
    pub name: Option<String>,
}

/// Cluster object names
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Name of the cluster object, defaults to the instance name without ordinal
    #[serde(default)]
    pub name: Option<String>,

    /// Name of the coordination object holding cluster configuration
    #[serde(default = "default_coordination_object")]
    pub coordination_object: String,
}

/// Which store implementation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local, for testing and dry runs
    Memory,
    /// SQLite file on storage shared by all members
    Sqlite,
}

/// Object store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,

    /// Database file for the sqlite backend
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Timeout for every store call in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// Lock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Lock name, prefix of the lock annotations
    #[serde(default = "default_lock_name")]
    pub name: String,

    /// Lease in milliseconds; bounds how long a crashed holder blocks others
    #[serde(default = "default_lease_ms")]
    pub lease_ms: u64,
}

/// Annotation keys
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyConfig {
    #[serde(default = "default_cluster_state_key")]
    pub cluster_state: String,

    #[serde(default = "default_member_state_key")]
    pub member_state: String,

    /// Cluster object annotations written only under the lock
    #[serde(default = "default_protected_cluster")]
    pub protected_cluster: Vec<String>,

    /// Member object annotations written only under the lock
    #[serde(default = "default_protected_member")]
    pub protected_member: Vec<String>,

    /// Coordination object annotations written only under the lock
    #[serde(default)]
    pub protected_coordination: Vec<String>,
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Enable HTTP API
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// HTTP API bind address
    #[serde(default = "default_api_address")]
    pub bind_address: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_coordination_object() -> String {
    "configdata".to_string()
}

fn default_backend() -> StoreBackend {
    StoreBackend::Sqlite
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_lock_name() -> String {
    DEFAULT_LOCK_NAME.to_string()
}

fn default_lease_ms() -> u64 {
    10_000
}

fn default_cluster_state_key() -> String {
    "ClusterState".to_string()
}

fn default_member_state_key() -> String {
    "MemberState".to_string()
}

fn default_protected_cluster() -> Vec<String> {
    vec![default_cluster_state_key()]
}

fn default_protected_member() -> Vec<String> {
    vec![default_member_state_key()]
}

fn default_true() -> bool {
    true
}

fn default_api_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: None,
            coordination_object: default_coordination_object(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: Some(PathBuf::from("/var/lib/pgquay/store.db")),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl StoreConfig {
    /// Get the store call timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            name: default_lock_name(),
            lease_ms: default_lease_ms(),
        }
    }
}

impl LockConfig {
    /// Get the lease as Duration
    pub fn lease(&self) -> Duration {
        Duration::from_millis(self.lease_ms)
    }

    pub fn spec(&self) -> LockSpec {
        LockSpec::new(self.name.clone(), self.lease())
    }
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            cluster_state: default_cluster_state_key(),
            member_state: default_member_state_key(),
            protected_cluster: default_protected_cluster(),
            protected_member: default_protected_member(),
            protected_coordination: Vec::new(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_api_address(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl QuayConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: QuayConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.lock.name.is_empty() {
            return Err(crate::Error::Config("lock.name cannot be empty".into()));
        }

        if self.lock.lease_ms == 0 {
            return Err(crate::Error::Config("lock.lease_ms must be positive".into()));
        }

        if self.store.timeout_ms == 0 {
            return Err(crate::Error::Config("store.timeout_ms must be positive".into()));
        }

        if self.store.backend == StoreBackend::Sqlite && self.store.path.is_none() {
            return Err(crate::Error::Config("store.path is required for the sqlite backend".into()));
        }

        if self.keys.cluster_state.is_empty() || self.keys.member_state.is_empty() {
            return Err(crate::Error::Config("state keys cannot be empty".into()));
        }

        if self.cluster.coordination_object.is_empty() {
            return Err(crate::Error::Config("cluster.coordination_object cannot be empty".into()));
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(crate::Error::Config(format!(
                "logging.format must be pretty or json, got {:?}",
                self.logging.format
            )));
        }

        Ok(())
    }
}
