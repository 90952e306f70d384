//! Cluster State
//!
//! Lifecycle of the whole cluster, stored on the cluster object.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::Lifecycle;

/// State of the cluster as a whole
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ClusterState {
    /// Stored value could not be understood
    Unknown,
    /// Nothing initialized yet
    Empty,
    /// Data initialized, no instance running
    Down,
    /// Choosing the member to become master
    Election,
    /// Master running without the full set of standbys
    Degraded,
    /// Members restarting to apply configuration
    Restart,
    /// Master and all standbys running
    Up,
    /// Planned master change in progress
    SwitchOver,
    /// Master stopped responding
    MasterUnavailable,
    /// Unplanned master change in progress
    FailOver,
}

impl Lifecycle for ClusterState {
    const UNKNOWN: Self = ClusterState::Unknown;
    const ALL: &'static [Self] = &[
        ClusterState::Unknown,
        ClusterState::Empty,
        ClusterState::Down,
        ClusterState::Election,
        ClusterState::Degraded,
        ClusterState::Restart,
        ClusterState::Up,
        ClusterState::SwitchOver,
        ClusterState::MasterUnavailable,
        ClusterState::FailOver,
    ];

    fn name(&self) -> &'static str {
        match self {
            ClusterState::Unknown => "UNKNOWN",
            ClusterState::Empty => "EMPTY",
            ClusterState::Down => "DOWN",
            ClusterState::Election => "ELECTION",
            ClusterState::Degraded => "DEGRADED",
            ClusterState::Restart => "RESTART",
            ClusterState::Up => "UP",
            ClusterState::SwitchOver => "SWITCHOVER",
            ClusterState::MasterUnavailable => "MASTERUNAVAILABLE",
            ClusterState::FailOver => "FAILOVER",
        }
    }

    fn absent() -> Self {
        ClusterState::Empty
    }

    fn successors(&self) -> Option<&'static [Self]> {
        use ClusterState::*;
        match self {
            Unknown => None,
            Empty => Some(&[Down]),
            Down => Some(&[Election]),
            Election => Some(&[Degraded]),
            Degraded => Some(&[Restart, Up]),
            Restart => Some(&[SwitchOver, Degraded]),
            Up => Some(&[Degraded, SwitchOver, MasterUnavailable]),
            SwitchOver => Some(&[Election]),
            MasterUnavailable => Some(&[FailOver, Degraded]),
            FailOver => Some(&[Election]),
        }
    }
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ClusterState {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}
