//! # Stage Wiring
//!
//! Concrete steps for every operation family and the table that assembles
//! them into one `StageGraph` per operation type.

pub mod deprovisioning;
pub mod hibernation;
pub mod provisioning;
pub mod upgrade;

pub use deprovisioning::{DeleteClusterStep, WaitForClusterDeletionStep};
pub use hibernation::{StartingHibernationStep, WaitForHibernationStep};
pub use provisioning::{
    ConnectRuntimeAgentStep, CreateBindingsForOperatorsStep, WaitForClusterCreationStep,
    WaitForClusterDomainStep,
};
pub use upgrade::{StartingUpgradeStep, WaitingForShootNewVersionStep, WaitingForShootUpgradeStep};

use std::sync::Arc;

use provisioner_shared::clients::{DirectorClient, RuntimeClusterClient, ShootProvisioner};
use provisioner_shared::config::{
    DeprovisioningTimeouts, HibernationTimeouts, OperatorRolesConfig, PollIntervals,
    ProvisionerConfig, ProvisioningTimeouts,
};
use provisioner_shared::database::OperationStore;
use provisioner_shared::{OperationType, Stage};

use super::graph::{GraphError, StageGraph};

/// Everything a step may need, shared by all graphs
#[derive(Debug, Clone)]
pub struct StepDependencies {
    pub store: Arc<dyn OperationStore>,
    pub provisioner: Arc<dyn ShootProvisioner>,
    pub director: Arc<dyn DirectorClient>,
    pub runtime_client: Arc<dyn RuntimeClusterClient>,
    pub provisioning_timeouts: ProvisioningTimeouts,
    pub deprovisioning_timeouts: DeprovisioningTimeouts,
    pub hibernation_timeouts: HibernationTimeouts,
    pub poll: PollIntervals,
    pub operator_roles: OperatorRolesConfig,
}

impl StepDependencies {
    pub fn new(
        store: Arc<dyn OperationStore>,
        provisioner: Arc<dyn ShootProvisioner>,
        director: Arc<dyn DirectorClient>,
        runtime_client: Arc<dyn RuntimeClusterClient>,
        config: &ProvisionerConfig,
    ) -> Self {
        Self {
            store,
            provisioner,
            director,
            runtime_client,
            provisioning_timeouts: config.provisioning_timeouts(),
            deprovisioning_timeouts: config.deprovisioning_timeouts(),
            hibernation_timeouts: config.hibernation_timeouts(),
            poll: config.poll_intervals(),
            operator_roles: config.operator_roles.clone(),
        }
    }
}

/// Build and validate the stage graph for `operation_type`
pub fn build_graph(
    operation_type: OperationType,
    deps: &StepDependencies,
) -> Result<StageGraph, GraphError> {
    let provisioning = &deps.provisioning_timeouts;
    let poll = deps.poll;

    let builder = StageGraph::builder(operation_type);
    let builder = match operation_type {
        OperationType::Provision | OperationType::ProvisionNoInstall => builder
            .step(WaitForClusterDomainStep::new(
                deps.provisioner.clone(),
                deps.director.clone(),
                Stage::WaitingForClusterCreation,
                provisioning.cluster_domain,
                poll.default,
            ))
            .step(WaitForClusterCreationStep::new(
                deps.provisioner.clone(),
                Stage::CreatingBindingsForOperators,
                provisioning.cluster_creation,
                poll.shoot,
            ))
            .step(CreateBindingsForOperatorsStep::new(
                deps.provisioner.clone(),
                deps.runtime_client.clone(),
                deps.operator_roles.clone(),
                Stage::ConnectRuntimeAgent,
                provisioning.bindings_creation,
                poll.default,
            ))
            .step(ConnectRuntimeAgentStep::new(
                deps.provisioner.clone(),
                deps.director.clone(),
                deps.runtime_client.clone(),
                Stage::Finished,
                provisioning.agent_configuration,
                poll.default,
            )),
        OperationType::Deprovision | OperationType::DeprovisionNoInstall => builder
            .step(DeleteClusterStep::new(
                deps.provisioner.clone(),
                Stage::WaitForClusterDeletion,
                deps.deprovisioning_timeouts.cluster_deletion,
                poll.default,
            ))
            .step(WaitForClusterDeletionStep::new(
                deps.provisioner.clone(),
                deps.store.clone(),
                Stage::Finished,
                deps.deprovisioning_timeouts.waiting_for_cluster_deletion,
                poll.shoot,
            )),
        OperationType::Upgrade => builder
            .step(StartingUpgradeStep::new(
                deps.provisioner.clone(),
                Stage::WaitingForShootUpgrade,
                provisioning.upgrade_triggering,
                poll.default,
            ))
            .step(WaitingForShootUpgradeStep::new(
                deps.provisioner.clone(),
                deps.store.clone(),
                Stage::Finished,
                provisioning.shoot_upgrade,
                poll.shoot,
            )),
        OperationType::UpgradeShoot => builder
            .step(WaitingForShootNewVersionStep::new(
                deps.provisioner.clone(),
                Stage::WaitingForShootUpgrade,
                provisioning.shoot_refresh,
                poll.default,
            ))
            .step(WaitingForShootUpgradeStep::new(
                deps.provisioner.clone(),
                deps.store.clone(),
                Stage::CreatingBindingsForOperators,
                provisioning.shoot_upgrade,
                poll.shoot,
            ))
            .step(CreateBindingsForOperatorsStep::new(
                deps.provisioner.clone(),
                deps.runtime_client.clone(),
                deps.operator_roles.clone(),
                Stage::Finished,
                provisioning.bindings_creation,
                poll.default,
            )),
        OperationType::Hibernate => builder
            .step(StartingHibernationStep::new(
                deps.provisioner.clone(),
                Stage::WaitForHibernation,
                deps.hibernation_timeouts.hibernation_triggering,
                poll.default,
            ))
            .step(WaitForHibernationStep::new(
                deps.provisioner.clone(),
                Stage::Finished,
                deps.hibernation_timeouts.waiting_for_cluster_hibernation,
                poll.shoot,
            )),
    };

    builder.build()
}
