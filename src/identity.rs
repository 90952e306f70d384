//! Process Identity
//!
//! Every member is identified by its namespace and instance name. The
//! identity is derived once at startup and passed to whatever needs it.
//!
//! Instance names follow the `<group>-<ordinal>` convention, e.g. `pg-0`,
//! `pg-1`, where the group names the cluster object.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::NodeConfig;
use crate::error::{Error, Result};

/// Environment variable holding the instance name
pub const NAME_ENV: &str = "HOSTNAME";

/// Environment variable holding the namespace
pub const NAMESPACE_ENV: &str = "POD_NAMESPACE";

/// Namespace and instance name of this process
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    namespace: String,
    name: String,
}

impl Identity {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let namespace = namespace.into();
        let name = name.into();
        if namespace.is_empty() {
            return Err(Error::Identity("namespace cannot be empty".into()));
        }
        if name.is_empty() {
            return Err(Error::Identity("instance name cannot be empty".into()));
        }
        Ok(Self { namespace, name })
    }

    /// Derive the identity from the environment
    pub fn from_env() -> Result<Self> {
        Self::resolve(&NodeConfig::default())
    }

    /// Use configured values, falling back to the environment
    pub fn resolve(node: &NodeConfig) -> Result<Self> {
        let namespace = match &node.namespace {
            Some(ns) => ns.clone(),
            None => env_var(NAMESPACE_ENV)?,
        };
        let name = match &node.name {
            Some(name) => name.clone(),
            None => env_var(NAME_ENV)?,
        };
        Self::new(namespace, name)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identifier recorded as lock holder: `<namespace>.<name>`
    pub fn holder_id(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }

    /// Instance name without its ordinal suffix
    pub fn group_name(&self) -> Result<&str> {
        split_ordinal(&self.name)
            .map(|(group, _)| group)
            .ok_or_else(|| {
                Error::Identity(format!(
                    "instance name {:?} does not end in -<number>, is this part of a replica group?",
                    self.name
                ))
            })
    }

    /// Ordinal suffix of the instance name
    pub fn ordinal(&self) -> Result<u32> {
        split_ordinal(&self.name)
            .map(|(_, ordinal)| ordinal)
            .ok_or_else(|| Error::Identity(format!("instance name {:?} has no numeric suffix", self.name)))
    }

    /// Instance name of a sibling with the given ordinal
    pub fn sibling(&self, ordinal: u32) -> Result<String> {
        Ok(format!("{}-{}", self.group_name()?, ordinal))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

fn env_var(key: &str) -> Result<String> {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(Error::Identity(format!("missing required env variable {:?}", key))),
    }
}

/// Split `group-123` into (`group`, 123)
fn split_ordinal(name: &str) -> Option<(&str, u32)> {
    let (group, suffix) = name.rsplit_once('-')?;
    if group.is_empty() || suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok().map(|ordinal| (group, ordinal))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_holder_id() {
        let id = Identity::new("db", "pg-2").unwrap();
        assert_eq!(id.holder_id(), "db.pg-2");
        assert_eq!(id.to_string(), "db.pg-2");
    }

    #[test]
    fn test_group_and_ordinal() {
        let id = Identity::new("db", "orders-pg-12").unwrap();
        assert_eq!(id.group_name().unwrap(), "orders-pg");
        assert_eq!(id.ordinal().unwrap(), 12);
        assert_eq!(id.sibling(0).unwrap(), "orders-pg-0");
    }

    #[test]
    fn test_name_without_ordinal() {
        let id = Identity::new("db", "standalone").unwrap();
        assert!(matches!(id.group_name(), Err(Error::Identity(_))));
        assert!(id.ordinal().is_err());

        let id = Identity::new("db", "pg-x1").unwrap();
        assert!(id.group_name().is_err());

        let id = Identity::new("db", "-3").unwrap();
        assert!(id.group_name().is_err());
    }

    #[test]
    fn test_empty_parts_rejected() {
        assert!(Identity::new("", "pg-0").is_err());
        assert!(Identity::new("db", "").is_err());
    }

    #[test]
    fn test_configured_values_win() {
        let node = NodeConfig {
            namespace: Some("prod".into()),
            name: Some("pg-1".into()),
        };
        let id = Identity::resolve(&node).unwrap();
        assert_eq!(id.namespace(), "prod");
        assert_eq!(id.name(), "pg-1");
    }
}
