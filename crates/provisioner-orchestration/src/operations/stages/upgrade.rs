//! # Upgrade Steps
//!
//! Runtime upgrade: `StartingUpgrade → WaitingForShootUpgrade → Finished`.
//! Shoot upgrade: `WaitingForShootNewVersion → WaitingForShootUpgrade →
//! CreatingBindingsForOperators → Finished`.
//!
//! The desired configuration is the cluster row's `cluster_config`; the
//! service writes it before creating the operation. Once Gardener has
//! reconciled, the applied Shoot spec is written back to the row.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use provisioner_shared::clients::{ShootProvisioner, ShootStatus};
use provisioner_shared::database::OperationStore;
use provisioner_shared::{Cluster, Operation, Stage};

use crate::operations::step::{
    check_timeout, classify_client_error, classify_store_error, StageResult, Step, StepError,
    TimeoutReference,
};

async fn existing_shoot(
    provisioner: &dyn ShootProvisioner,
    cluster: &Cluster,
    stage: Stage,
    poll_interval: Duration,
) -> Result<Result<ShootStatus, StageResult>, StepError> {
    match provisioner.get_shoot(cluster).await {
        Ok(Some(shoot)) => Ok(Ok(shoot)),
        Ok(None) => Err(StepError::fatal(
            stage,
            format!("shoot {} does not exist", cluster.shoot_name()),
        )),
        Err(e) => classify_client_error(stage, e, poll_interval).map(Err),
    }
}

/// Applies the desired configuration to the Shoot
#[derive(Debug)]
pub struct StartingUpgradeStep {
    provisioner: Arc<dyn ShootProvisioner>,
    next_stage: Stage,
    timeout: Duration,
    poll_interval: Duration,
}

impl StartingUpgradeStep {
    pub fn new(
        provisioner: Arc<dyn ShootProvisioner>,
        next_stage: Stage,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            provisioner,
            next_stage,
            timeout,
            poll_interval,
        }
    }
}

#[async_trait]
impl Step for StartingUpgradeStep {
    fn name(&self) -> Stage {
        Stage::StartingUpgrade
    }

    fn next_stage(&self) -> Stage {
        self.next_stage
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn run(&self, cluster: &Cluster, operation: &Operation) -> Result<StageResult, StepError> {
        let stage = self.name();
        check_timeout(operation, stage, self.timeout, TimeoutReference::OperationStart)?;

        let shoot = match existing_shoot(self.provisioner.as_ref(), cluster, stage, self.poll_interval).await? {
            Ok(shoot) => shoot,
            Err(retry) => return Ok(retry),
        };

        if shoot.config == cluster.cluster_config {
            return Ok(StageResult::advance(self.next_stage)
                .with_message("Shoot already has the desired configuration"));
        }

        if let Err(e) = self
            .provisioner
            .upgrade_cluster(cluster, &cluster.cluster_config)
            .await
        {
            return classify_client_error(stage, e, self.poll_interval);
        }

        info!(
            operation_id = %operation.id,
            shoot = %cluster.shoot_name(),
            kubernetes_version = %cluster.cluster_config.kubernetes_version,
            "Shoot upgrade triggered"
        );
        Ok(StageResult::advance(self.next_stage).with_message("Shoot upgrade triggered"))
    }
}

/// Waits until Gardener has accepted the updated Shoot specification
#[derive(Debug)]
pub struct WaitingForShootNewVersionStep {
    provisioner: Arc<dyn ShootProvisioner>,
    next_stage: Stage,
    timeout: Duration,
    poll_interval: Duration,
}

impl WaitingForShootNewVersionStep {
    pub fn new(
        provisioner: Arc<dyn ShootProvisioner>,
        next_stage: Stage,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            provisioner,
            next_stage,
            timeout,
            poll_interval,
        }
    }
}

#[async_trait]
impl Step for WaitingForShootNewVersionStep {
    fn name(&self) -> Stage {
        Stage::WaitingForShootNewVersion
    }

    fn next_stage(&self) -> Stage {
        self.next_stage
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn run(&self, cluster: &Cluster, operation: &Operation) -> Result<StageResult, StepError> {
        let stage = self.name();
        check_timeout(operation, stage, self.timeout, TimeoutReference::StageEntry)?;

        let shoot = match existing_shoot(self.provisioner.as_ref(), cluster, stage, self.poll_interval).await? {
            Ok(shoot) => shoot,
            Err(retry) => return Ok(retry),
        };

        if shoot.config != cluster.cluster_config {
            return Ok(StageResult::retry(stage, self.poll_interval)
                .with_message("Waiting for shoot to pick up the new specification"));
        }

        Ok(StageResult::advance(self.next_stage)
            .with_message("Shoot specification updated, waiting for upgrade"))
    }
}

/// Waits for the reconcile to finish and persists the applied configuration
#[derive(Debug)]
pub struct WaitingForShootUpgradeStep {
    provisioner: Arc<dyn ShootProvisioner>,
    store: Arc<dyn OperationStore>,
    next_stage: Stage,
    timeout: Duration,
    poll_interval: Duration,
}

impl WaitingForShootUpgradeStep {
    pub fn new(
        provisioner: Arc<dyn ShootProvisioner>,
        store: Arc<dyn OperationStore>,
        next_stage: Stage,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            provisioner,
            store,
            next_stage,
            timeout,
            poll_interval,
        }
    }
}

#[async_trait]
impl Step for WaitingForShootUpgradeStep {
    fn name(&self) -> Stage {
        Stage::WaitingForShootUpgrade
    }

    fn next_stage(&self) -> Stage {
        self.next_stage
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn run(&self, cluster: &Cluster, operation: &Operation) -> Result<StageResult, StepError> {
        let stage = self.name();
        check_timeout(operation, stage, self.timeout, TimeoutReference::OperationStart)?;

        let shoot = match existing_shoot(self.provisioner.as_ref(), cluster, stage, self.poll_interval).await? {
            Ok(shoot) => shoot,
            Err(retry) => return Ok(retry),
        };

        if shoot.last_operation_failed() {
            let description = shoot
                .last_operation
                .map(|op| op.description)
                .unwrap_or_default();
            return Err(StepError::fatal(
                stage,
                format!("Gardener failed to upgrade shoot {}: {description}", shoot.name),
            ));
        }

        if !shoot.is_reconciled() {
            return Ok(StageResult::retry(stage, self.poll_interval)
                .with_message("Waiting for shoot upgrade"));
        }

        if let Err(e) = self
            .store
            .update_cluster_config(&cluster.id, &shoot.config)
            .await
        {
            return classify_store_error(stage, e, self.poll_interval);
        }

        Ok(StageResult::advance(self.next_stage).with_message("Shoot upgraded"))
    }
}
