//! State Machines
//!
//! Cluster-wide and per-member lifecycles. Both are closed enums with a
//! fixed transition graph; [`transition`] reads and persists them on an
//! annotated resource.

mod cluster;
mod member;
pub mod transition;

pub use cluster::ClusterState;
pub use member::MemberState;
pub use transition::{get_state, set_state, Transition};

use std::fmt;

/// A finite state machine with a designated unknown state
pub trait Lifecycle: Copy + Eq + fmt::Debug + fmt::Display + Send + Sync + 'static {
    /// Escape hatch for a state that has not been observed or understood
    const UNKNOWN: Self;

    /// Every state, `UNKNOWN` included
    const ALL: &'static [Self];

    /// Name as persisted in the store
    fn name(&self) -> &'static str;

    /// State assumed when nothing is stored yet
    fn absent() -> Self;

    /// States reachable in one step; `None` only for `UNKNOWN`
    fn successors(&self) -> Option<&'static [Self]>;

    /// Parse a stored name, case-insensitively
    fn parse(raw: &str) -> Self {
        if raw.is_empty() {
            return Self::absent();
        }
        let upper = raw.to_uppercase();
        Self::ALL
            .iter()
            .copied()
            .find(|state| state.name() == upper)
            .unwrap_or(Self::UNKNOWN)
    }

    /// Check whether `next` may follow this state
    ///
    /// # Panics
    ///
    /// Panics when a state other than `UNKNOWN` has no successor list.
    fn validate_next_state(&self, next: Self) -> bool {
        if *self == next || *self == Self::UNKNOWN {
            return true;
        }
        match self.successors() {
            Some(successors) => successors.contains(&next),
            None => panic!("state {} is missing from the transition graph", self),
        }
    }
}
