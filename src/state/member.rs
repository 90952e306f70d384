//! Member State
//!
//! Role lifecycle of a single database instance, stored on its own
//! member object.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::Lifecycle;

/// State of one cluster member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MemberState {
    Unknown,
    Init,
    Standby,
    Reinstate,
    /// Reconfiguring as standby
    ReconfigS,
    Restart,
    Master,
    /// Reconfiguring as master
    ReconfigM,
    Demote,
    Stop,
}

impl Lifecycle for MemberState {
    const UNKNOWN: Self = MemberState::Unknown;
    const ALL: &'static [Self] = &[
        MemberState::Unknown,
        MemberState::Init,
        MemberState::Standby,
        MemberState::Reinstate,
        MemberState::ReconfigS,
        MemberState::Restart,
        MemberState::Master,
        MemberState::ReconfigM,
        MemberState::Demote,
        MemberState::Stop,
    ];

    fn name(&self) -> &'static str {
        match self {
            MemberState::Unknown => "UNKNOWN",
            MemberState::Init => "INIT",
            MemberState::Standby => "STANDBY",
            MemberState::Reinstate => "REINSTATE",
            MemberState::ReconfigS => "RECONFIGS",
            MemberState::Restart => "RESTART",
            MemberState::Master => "MASTER",
            MemberState::ReconfigM => "RECONFIGM",
            MemberState::Demote => "DEMOTE",
            MemberState::Stop => "STOP",
        }
    }

    fn absent() -> Self {
        MemberState::Init
    }

    fn successors(&self) -> Option<&'static [Self]> {
        use MemberState::*;
        match self {
            Unknown => None,
            Init => Some(&[Standby]),
            Standby => Some(&[Reinstate, ReconfigS, Master]),
            Reinstate => Some(&[Stop]),
            ReconfigS => Some(&[Restart, Standby]),
            Restart => Some(&[Stop, ReconfigM]),
            Master => Some(&[ReconfigM, Demote]),
            ReconfigM => Some(&[Restart, Demote, Master]),
            Demote => Some(&[Stop]),
            // terminal
            Stop => Some(&[]),
        }
    }
}

impl fmt::Display for MemberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MemberState {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use MemberState::*;

    #[test]
    fn test_member_graph() {
        let legal = [
            (Init, Standby),
            (Standby, Reinstate),
            (Standby, ReconfigS),
            (Standby, Master),
            (Reinstate, Stop),
            (ReconfigS, Restart),
            (ReconfigS, Standby),
            (Restart, Stop),
            (Restart, ReconfigM),
            (Master, ReconfigM),
            (Master, Demote),
            (ReconfigM, Restart),
            (ReconfigM, Demote),
            (ReconfigM, Master),
            (Demote, Stop),
        ];

        for &current in MemberState::ALL {
            for &next in MemberState::ALL {
                let expected = current == next
                    || current == Unknown
                    || legal.contains(&(current, next));
                assert_eq!(
                    current.validate_next_state(next),
                    expected,
                    "{} -> {}",
                    current,
                    next
                );
            }
        }
    }

    #[test]
    fn test_stop_is_terminal() {
        for &next in MemberState::ALL {
            assert_eq!(Stop.validate_next_state(next), next == Stop);
        }
    }

    #[test]
    fn test_master_cannot_skip_demotion() {
        assert!(!Master.validate_next_state(Standby));
        assert!(!Master.validate_next_state(Stop));
        assert!(Master.validate_next_state(Demote));
    }

    #[test]
    fn test_parse() {
        assert_eq!(MemberState::parse(""), Init);
        assert_eq!(MemberState::parse("reconfigs"), ReconfigS);
        assert_eq!(MemberState::parse("RECONFIGM"), ReconfigM);
        assert_eq!(MemberState::parse("leader"), Unknown);
        for &state in MemberState::ALL {
            assert_eq!(state.name().parse::<MemberState>().unwrap(), state);
        }
    }
}
