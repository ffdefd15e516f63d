//! # Stage Names
//!
//! Every checkpoint an operation can be persisted at. The set is closed so the
//! stage graphs can be keyed by value and checked exhaustively; `Finished` is
//! the terminal sentinel that no step is ever registered for.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::ParseNameError;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    // Provisioning
    WaitingForClusterDomain,
    WaitingForClusterCreation,
    CreatingBindingsForOperators,
    ConnectRuntimeAgent,

    // Deprovisioning
    DeleteCluster,
    WaitForClusterDeletion,

    // Upgrades
    StartingUpgrade,
    WaitingForShootNewVersion,
    WaitingForShootUpgrade,

    // Hibernation
    StartingHibernation,
    WaitForHibernation,

    Finished,
}

impl Stage {
    pub const ALL: [Stage; 12] = [
        Stage::WaitingForClusterDomain,
        Stage::WaitingForClusterCreation,
        Stage::CreatingBindingsForOperators,
        Stage::ConnectRuntimeAgent,
        Stage::DeleteCluster,
        Stage::WaitForClusterDeletion,
        Stage::StartingUpgrade,
        Stage::WaitingForShootNewVersion,
        Stage::WaitingForShootUpgrade,
        Stage::StartingHibernation,
        Stage::WaitForHibernation,
        Stage::Finished,
    ];

    /// Name as persisted in the `operation.stage` column
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::WaitingForClusterDomain => "WaitingForClusterDomain",
            Stage::WaitingForClusterCreation => "WaitingForClusterCreation",
            Stage::CreatingBindingsForOperators => "CreatingBindingsForOperators",
            Stage::ConnectRuntimeAgent => "ConnectRuntimeAgent",
            Stage::DeleteCluster => "DeleteCluster",
            Stage::WaitForClusterDeletion => "WaitForClusterDeletion",
            Stage::StartingUpgrade => "StartingUpgrade",
            Stage::WaitingForShootNewVersion => "WaitingForShootNewVersion",
            Stage::WaitingForShootUpgrade => "WaitingForShootUpgrade",
            Stage::StartingHibernation => "StartingHibernation",
            Stage::WaitForHibernation => "WaitForHibernation",
            Stage::Finished => "Finished",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Finished)
    }
}

impl FromStr for Stage {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| ParseNameError::new("stage", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_matches_persisted_name() {
        for stage in Stage::ALL {
            assert_eq!(stage.to_string(), stage.as_str());
        }
    }

    #[test]
    fn test_parse_known_and_unknown_names() {
        assert_eq!(
            "WaitForClusterDeletion".parse::<Stage>().unwrap(),
            Stage::WaitForClusterDeletion
        );

        let err = "StartingInstallation".parse::<Stage>().unwrap_err();
        assert_eq!(err.kind, "stage");
        assert_eq!(err.value, "StartingInstallation");
    }

    #[test]
    fn test_only_finished_is_terminal() {
        let terminal: Vec<_> = Stage::ALL.into_iter().filter(Stage::is_terminal).collect();
        assert_eq!(terminal, vec![Stage::Finished]);
    }
}
