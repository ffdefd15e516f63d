//! # Infrastructure Provisioner
//!
//! Contract for the component that talks to Gardener. Calls are
//! request-and-return: creation and deletion are started here and observed
//! later through `get_shoot`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use super::ClientResult;
use crate::models::{Cluster, ClusterConfig};

#[async_trait]
pub trait ShootProvisioner: Send + Sync + Debug {
    /// Submit the Shoot for `cluster`; creation continues asynchronously
    async fn provision_cluster(&self, cluster: &Cluster, operation_id: &str) -> ClientResult<()>;

    /// Request deletion of the Shoot; an absent Shoot is reported as `NotFound`
    async fn deprovision_cluster(&self, cluster: &Cluster, operation_id: &str) -> ClientResult<()>;

    /// Apply `new_config` to the existing Shoot
    async fn upgrade_cluster(&self, cluster: &Cluster, new_config: &ClusterConfig) -> ClientResult<()>;

    async fn hibernate_cluster(&self, cluster: &Cluster) -> ClientResult<()>;

    async fn get_hibernation_status(&self, cluster: &Cluster) -> ClientResult<HibernationStatus>;

    /// Current Shoot, `None` when it does not exist
    async fn get_shoot(&self, cluster: &Cluster) -> ClientResult<Option<ShootStatus>>;

    /// Admin kubeconfig for the runtime, available once the Shoot is reconciled
    async fn get_kubeconfig(&self, cluster: &Cluster) -> ClientResult<String>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HibernationStatus {
    pub hibernation_possible: bool,
    pub hibernated: bool,
}

/// Observed state of a Gardener Shoot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShootStatus {
    pub name: String,
    /// DNS domain assigned by Gardener, empty until allocated
    pub domain: Option<String>,
    pub kubernetes_version: String,
    pub generation: i64,
    pub observed_generation: i64,
    pub last_operation: Option<LastOperation>,
    pub hibernated: bool,
    /// Specification as currently applied
    pub config: ClusterConfig,
}

impl ShootStatus {
    /// Gardener has seen the latest spec and finished reconciling it
    pub fn is_reconciled(&self) -> bool {
        self.observed_generation >= self.generation
            && self
                .last_operation
                .as_ref()
                .is_some_and(|op| op.state == LastOperationState::Succeeded)
    }

    pub fn last_operation_failed(&self) -> bool {
        self.last_operation
            .as_ref()
            .is_some_and(|op| op.state.is_failure())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastOperation {
    pub kind: LastOperationKind,
    pub state: LastOperationState,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LastOperationKind {
    Create,
    Reconcile,
    Restore,
    Migrate,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LastOperationState {
    Pending,
    Processing,
    Succeeded,
    Error,
    Failed,
    Aborted,
}

impl LastOperationState {
    /// Gardener gave up; `Error` is retried by Gardener itself and is not final
    pub fn is_failure(&self) -> bool {
        matches!(self, LastOperationState::Failed | LastOperationState::Aborted)
    }
}
