//! # Deprovisioning Steps
//!
//! `DeleteCluster → WaitForClusterDeletion → Finished`. A Shoot that is
//! already gone counts as deleted at either stage.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use provisioner_shared::clients::{LastOperationKind, ShootProvisioner};
use provisioner_shared::database::OperationStore;
use provisioner_shared::{Cluster, Operation, Stage};

use crate::operations::step::{
    check_timeout, classify_client_error, classify_store_error, StageResult, Step, StepError,
    TimeoutReference,
};

#[derive(Debug)]
pub struct DeleteClusterStep {
    provisioner: Arc<dyn ShootProvisioner>,
    next_stage: Stage,
    timeout: Duration,
    poll_interval: Duration,
}

impl DeleteClusterStep {
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
impl Step for DeleteClusterStep {
    fn name(&self) -> Stage {
        Stage::DeleteCluster
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

        match self.provisioner.get_shoot(cluster).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                info!(operation_id = %operation.id, shoot = %cluster.shoot_name(), "Shoot already deleted");
                return Ok(StageResult::advance(self.next_stage)
                    .with_message("Shoot already deleted"));
            }
            Err(e) if e.is_not_found() => {
                return Ok(StageResult::advance(self.next_stage)
                    .with_message("Shoot already deleted"));
            }
            Err(e) => return classify_client_error(stage, e, self.poll_interval),
        }

        match self
            .provisioner
            .deprovision_cluster(cluster, &operation.id)
            .await
        {
            Ok(()) => {
                info!(operation_id = %operation.id, shoot = %cluster.shoot_name(), "Shoot deletion requested");
                Ok(StageResult::advance(self.next_stage)
                    .with_message("Shoot deletion requested, waiting for deletion"))
            }
            Err(e) if e.is_not_found() => Ok(StageResult::advance(self.next_stage)
                .with_message("Shoot already deleted")),
            Err(e) => classify_client_error(stage, e, self.poll_interval),
        }
    }
}

/// Waits for the Shoot to disappear, then marks the cluster row deleted
#[derive(Debug)]
pub struct WaitForClusterDeletionStep {
    provisioner: Arc<dyn ShootProvisioner>,
    store: Arc<dyn OperationStore>,
    next_stage: Stage,
    timeout: Duration,
    poll_interval: Duration,
}

impl WaitForClusterDeletionStep {
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
impl Step for WaitForClusterDeletionStep {
    fn name(&self) -> Stage {
        Stage::WaitForClusterDeletion
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

        let shoot = match self.provisioner.get_shoot(cluster).await {
            Ok(shoot) => shoot,
            Err(e) if e.is_not_found() => None,
            Err(e) => return classify_client_error(stage, e, self.poll_interval),
        };

        if let Some(shoot) = shoot {
            let deletion_failed = shoot.last_operation.as_ref().is_some_and(|op| {
                op.kind == LastOperationKind::Delete && op.state.is_failure()
            });
            if deletion_failed {
                return Err(StepError::fatal(
                    stage,
                    format!("Gardener failed to delete shoot {}", shoot.name),
                ));
            }
            return Ok(StageResult::retry(stage, self.poll_interval)
                .with_message("Waiting for cluster deletion"));
        }

        if let Err(e) = self.store.mark_cluster_deleted(&cluster.id).await {
            return classify_store_error(stage, e, self.poll_interval);
        }

        Ok(StageResult::advance(self.next_stage).with_message("Cluster deleted"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use provisioner_shared::clients::{ClientError, LastOperation, LastOperationState};
    use provisioner_shared::database::InMemoryOperationStore;
    use provisioner_shared::testing::{sample_cluster, FakeShootProvisioner, ProvisionerCall};
    use provisioner_shared::OperationType;

    const POLL: Duration = Duration::from_millis(50);
    const LONG: Duration = Duration::from_secs(3600);

    fn operation(stage: Stage) -> Operation {
        Operation::new(OperationType::Deprovision, "runtime-1", stage, "")
    }

    #[tokio::test]
    async fn test_delete_skips_call_when_shoot_absent() {
        let provisioner = Arc::new(FakeShootProvisioner::new());
        let step = DeleteClusterStep::new(provisioner.clone(), Stage::WaitForClusterDeletion, LONG, POLL);

        let result = step
            .run(&sample_cluster("runtime-1"), &operation(Stage::DeleteCluster))
            .await
            .unwrap();

        assert_eq!(result.next_stage, Stage::WaitForClusterDeletion);
        assert_eq!(provisioner.call_count(ProvisionerCall::Deprovision), 0);
    }

    #[tokio::test]
    async fn test_delete_treats_not_found_race_as_deleted() {
        let provisioner = Arc::new(FakeShootProvisioner::new());
        let cluster = sample_cluster("runtime-1");
        provisioner.insert_shoot(&cluster);
        provisioner.fail_next(
            ProvisionerCall::Deprovision,
            ClientError::not_found("Shoot", cluster.shoot_name()),
        );

        let step = DeleteClusterStep::new(provisioner, Stage::WaitForClusterDeletion, LONG, POLL);
        let result = step.run(&cluster, &operation(Stage::DeleteCluster)).await.unwrap();
        assert_eq!(result.next_stage, Stage::WaitForClusterDeletion);
    }

    #[tokio::test]
    async fn test_delete_fails_on_forbidden() {
        let provisioner = Arc::new(FakeShootProvisioner::new());
        let cluster = sample_cluster("runtime-1");
        provisioner.insert_shoot(&cluster);
        provisioner.fail_next(ProvisionerCall::Deprovision, ClientError::api(403, "forbidden"));

        let step = DeleteClusterStep::new(provisioner, Stage::WaitForClusterDeletion, LONG, POLL);
        let err = step.run(&cluster, &operation(Stage::DeleteCluster)).await.unwrap_err();
        assert!(matches!(err, StepError::Client { .. }));
    }

    #[tokio::test]
    async fn test_wait_for_deletion_marks_cluster_deleted() {
        let provisioner = Arc::new(FakeShootProvisioner::new());
        let store = Arc::new(InMemoryOperationStore::new());
        let cluster = sample_cluster("runtime-1");
        store.insert_cluster(&cluster).await.unwrap();
        provisioner.insert_shoot(&cluster);

        let step = WaitForClusterDeletionStep::new(
            provisioner.clone(),
            store.clone(),
            Stage::Finished,
            LONG,
            POLL,
        );
        let op = operation(Stage::WaitForClusterDeletion);

        let waiting = step.run(&cluster, &op).await.unwrap();
        assert_eq!(waiting.next_stage, Stage::WaitForClusterDeletion);
        assert!(!store.get_cluster("runtime-1").await.unwrap().deleted);

        provisioner.deprovision_cluster(&cluster, &op.id).await.unwrap();
        let done = step.run(&cluster, &op).await.unwrap();
        assert_eq!(done.next_stage, Stage::Finished);
        assert!(store.get_cluster("runtime-1").await.unwrap().deleted);
    }

    #[tokio::test]
    async fn test_wait_for_deletion_fails_when_gardener_gives_up() {
        let provisioner = Arc::new(FakeShootProvisioner::new());
        let cluster = sample_cluster("runtime-1");
        provisioner.insert_shoot(&cluster);
        provisioner.update_shoot(cluster.shoot_name(), |shoot| {
            shoot.last_operation = Some(LastOperation {
                kind: LastOperationKind::Delete,
                state: LastOperationState::Failed,
                description: "finalizer stuck".into(),
            });
        });

        let step = WaitForClusterDeletionStep::new(
            provisioner,
            Arc::new(InMemoryOperationStore::new()),
            Stage::Finished,
            LONG,
            POLL,
        );
        let err = step
            .run(&cluster, &operation(Stage::WaitForClusterDeletion))
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::Fatal { .. }));
    }
}
