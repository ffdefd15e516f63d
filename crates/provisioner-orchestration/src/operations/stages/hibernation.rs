//! # Hibernation Steps
//!
//! `StartingHibernation → WaitForHibernation → Finished`

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use provisioner_shared::clients::ShootProvisioner;
use provisioner_shared::{Cluster, Operation, Stage};

use crate::operations::step::{
    check_timeout, classify_client_error, StageResult, Step, StepError, TimeoutReference,
};

#[derive(Debug)]
pub struct StartingHibernationStep {
    provisioner: Arc<dyn ShootProvisioner>,
    next_stage: Stage,
    timeout: Duration,
    poll_interval: Duration,
}

impl StartingHibernationStep {
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
impl Step for StartingHibernationStep {
    fn name(&self) -> Stage {
        Stage::StartingHibernation
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

        let status = match self.provisioner.get_hibernation_status(cluster).await {
            Ok(status) => status,
            Err(e) => return classify_client_error(stage, e, self.poll_interval),
        };

        if status.hibernated {
            return Ok(StageResult::advance(self.next_stage).with_message("Cluster already hibernated"));
        }

        if !status.hibernation_possible {
            return Err(StepError::fatal(
                stage,
                format!("hibernation is not possible for shoot {}", cluster.shoot_name()),
            ));
        }

        if let Err(e) = self.provisioner.hibernate_cluster(cluster).await {
            return classify_client_error(stage, e, self.poll_interval);
        }

        info!(operation_id = %operation.id, shoot = %cluster.shoot_name(), "Hibernation requested");
        Ok(StageResult::advance(self.next_stage).with_message("Hibernation requested"))
    }
}

#[derive(Debug)]
pub struct WaitForHibernationStep {
    provisioner: Arc<dyn ShootProvisioner>,
    next_stage: Stage,
    timeout: Duration,
    poll_interval: Duration,
}

impl WaitForHibernationStep {
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
impl Step for WaitForHibernationStep {
    fn name(&self) -> Stage {
        Stage::WaitForHibernation
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

        match self.provisioner.get_hibernation_status(cluster).await {
            Ok(status) if status.hibernated => {
                Ok(StageResult::advance(self.next_stage).with_message("Cluster hibernated"))
            }
            Ok(_) => Ok(StageResult::retry(stage, self.poll_interval)
                .with_message("Waiting for cluster hibernation")),
            Err(e) => classify_client_error(stage, e, self.poll_interval),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use provisioner_shared::testing::{sample_cluster, FakeShootProvisioner, ProvisionerCall};
    use provisioner_shared::OperationType;

    const POLL: Duration = Duration::from_millis(50);
    const LONG: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn test_hibernation_requested_once() {
        let provisioner = Arc::new(FakeShootProvisioner::new());
        let cluster = sample_cluster("runtime-1");
        provisioner.insert_shoot(&cluster);

        let start = StartingHibernationStep::new(provisioner.clone(), Stage::WaitForHibernation, LONG, POLL);
        let op = Operation::new(OperationType::Hibernate, "runtime-1", Stage::StartingHibernation, "");

        assert_eq!(start.run(&cluster, &op).await.unwrap().next_stage, Stage::WaitForHibernation);
        assert_eq!(start.run(&cluster, &op).await.unwrap().next_stage, Stage::WaitForHibernation);
        assert_eq!(provisioner.call_count(ProvisionerCall::Hibernate), 1);

        let wait = WaitForHibernationStep::new(provisioner, Stage::Finished, LONG, POLL);
        assert_eq!(wait.run(&cluster, &op).await.unwrap().next_stage, Stage::Finished);
    }

    #[tokio::test]
    async fn test_hibernation_not_possible_is_fatal() {
        let provisioner = Arc::new(FakeShootProvisioner::new());
        let cluster = sample_cluster("runtime-1");
        provisioner.insert_shoot(&cluster);
        provisioner.set_hibernation_possible(false);

        let start = StartingHibernationStep::new(provisioner, Stage::WaitForHibernation, LONG, POLL);
        let op = Operation::new(OperationType::Hibernate, "runtime-1", Stage::StartingHibernation, "");
        assert!(matches!(
            start.run(&cluster, &op).await.unwrap_err(),
            StepError::Fatal { .. }
        ));
    }

    #[tokio::test]
    async fn test_wait_polls_until_hibernated() {
        let provisioner = Arc::new(FakeShootProvisioner::new());
        let cluster = sample_cluster("runtime-1");
        provisioner.insert_shoot(&cluster);

        let wait = WaitForHibernationStep::new(provisioner, Stage::Finished, LONG, POLL);
        let op = Operation::new(OperationType::Hibernate, "runtime-1", Stage::WaitForHibernation, "");
        let result = wait.run(&cluster, &op).await.unwrap();
        assert_eq!(result.next_stage, Stage::WaitForHibernation);
        assert_eq!(result.delay, POLL);
    }
}
