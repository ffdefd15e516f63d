//! # Operation
//!
//! A single long-running lifecycle action tracked to completion. The row is
//! the sole source of truth for what still needs to run after a restart.

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use super::{ParseNameError, Stage};

/// Kind of lifecycle action; selects the stage graph and the queue
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OperationType {
    Provision,
    ProvisionNoInstall,
    Deprovision,
    DeprovisionNoInstall,
    Upgrade,
    UpgradeShoot,
    Hibernate,
}

impl OperationType {
    pub const ALL: [OperationType; 7] = [
        OperationType::Provision,
        OperationType::ProvisionNoInstall,
        OperationType::Deprovision,
        OperationType::DeprovisionNoInstall,
        OperationType::Upgrade,
        OperationType::UpgradeShoot,
        OperationType::Hibernate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Provision => "PROVISION",
            OperationType::ProvisionNoInstall => "PROVISION_NO_INSTALL",
            OperationType::Deprovision => "DEPROVISION",
            OperationType::DeprovisionNoInstall => "DEPROVISION_NO_INSTALL",
            OperationType::Upgrade => "UPGRADE",
            OperationType::UpgradeShoot => "UPGRADE_SHOOT",
            OperationType::Hibernate => "HIBERNATE",
        }
    }

    pub fn is_provisioning(&self) -> bool {
        matches!(
            self,
            OperationType::Provision | OperationType::ProvisionNoInstall
        )
    }

    pub fn is_deprovisioning(&self) -> bool {
        matches!(
            self,
            OperationType::Deprovision | OperationType::DeprovisionNoInstall
        )
    }
}

impl FromStr for OperationType {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperationType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ParseNameError::new("operation type", s))
    }
}

/// Operation state; `Succeeded` and `Failed` are final
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationState {
    #[display("IN_PROGRESS")]
    InProgress,
    #[display("SUCCEEDED")]
    Succeeded,
    #[display("FAILED")]
    Failed,
}

impl OperationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationState::InProgress => "IN_PROGRESS",
            OperationState::Succeeded => "SUCCEEDED",
            OperationState::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationState::InProgress)
    }
}

impl FromStr for OperationState {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IN_PROGRESS" => Ok(OperationState::InProgress),
            "SUCCEEDED" => Ok(OperationState::Succeeded),
            "FAILED" => Ok(OperationState::Failed),
            other => Err(ParseNameError::new("operation state", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub id: String,
    pub operation_type: OperationType,
    pub cluster_id: String,
    pub state: OperationState,
    pub stage: Stage,
    pub message: String,
    pub start_timestamp: DateTime<Utc>,
    pub end_timestamp: Option<DateTime<Utc>>,
    pub last_transition_timestamp: DateTime<Utc>,
}

impl Operation {
    /// Create a new in-progress operation positioned at `entry_stage`
    pub fn new(
        operation_type: OperationType,
        cluster_id: impl Into<String>,
        entry_stage: Stage,
        message: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            operation_type,
            cluster_id: cluster_id.into(),
            state: OperationState::InProgress,
            stage: entry_stage,
            message: message.into(),
            start_timestamp: now,
            end_timestamp: None,
            last_transition_timestamp: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Time elapsed since the operation was created, zero if the clock went backwards
    pub fn elapsed_since_start(&self, now: DateTime<Utc>) -> Duration {
        (now - self.start_timestamp).to_std().unwrap_or(Duration::ZERO)
    }

    /// Time spent in the current stage
    pub fn time_in_stage(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_transition_timestamp)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}
