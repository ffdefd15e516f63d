//! # Runtime Provisioner
//!
//! Durable execution of Gardener runtime operations: provisioning,
//! deprovisioning, upgrades and hibernation, each modelled as a chain of
//! stages that survives process restarts.
//!
//! This crate re-exports the workspace members:
//!
//! - [`shared`]: models, configuration, persistence, collaborator contracts
//! - [`orchestration`]: stage graphs, executor, queues, service and bootstrap

pub use provisioner_orchestration as orchestration;
pub use provisioner_shared as shared;

pub use provisioner_orchestration::{
    ProvisionRuntimeInput, ProvisionerBootstrap, ProvisionerHandle, ProvisioningService,
    RuntimeStatus, UpgradeRuntimeInput,
};
pub use provisioner_shared::{
    Cluster, ClusterConfig, Operation, OperationState, OperationType, ProvisionerError,
    ProvisionerResult, Stage,
};
