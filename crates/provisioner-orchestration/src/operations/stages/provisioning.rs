//! # Provisioning Steps
//!
//! `WaitingForClusterDomain → WaitingForClusterCreation →
//! CreatingBindingsForOperators → ConnectRuntimeAgent → Finished`

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use provisioner_shared::clients::{
    AgentConfiguration, ClusterRoleBinding, DirectorClient, RuntimeClusterClient, RuntimeUpdate,
    ShootProvisioner,
};
use provisioner_shared::config::OperatorRolesConfig;
use provisioner_shared::{Cluster, Operation, Stage};

use crate::operations::step::{
    check_timeout, classify_client_error, StageResult, Step, StepError, TimeoutReference,
};

/// Submits the Shoot if needed and waits for Gardener to assign its domain
#[derive(Debug)]
pub struct WaitForClusterDomainStep {
    provisioner: Arc<dyn ShootProvisioner>,
    director: Arc<dyn DirectorClient>,
    next_stage: Stage,
    timeout: Duration,
    poll_interval: Duration,
}

impl WaitForClusterDomainStep {
    pub fn new(
        provisioner: Arc<dyn ShootProvisioner>,
        director: Arc<dyn DirectorClient>,
        next_stage: Stage,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            provisioner,
            director,
            next_stage,
            timeout,
            poll_interval,
        }
    }
}

#[async_trait]
impl Step for WaitForClusterDomainStep {
    fn name(&self) -> Stage {
        Stage::WaitingForClusterDomain
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

        let shoot = match self.provisioner.get_shoot(cluster).await {
            Ok(shoot) => shoot,
            Err(e) => return classify_client_error(stage, e, self.poll_interval),
        };

        let Some(shoot) = shoot else {
            if let Err(e) = self.provisioner.provision_cluster(cluster, &operation.id).await {
                return classify_client_error(stage, e, self.poll_interval);
            }
            info!(operation_id = %operation.id, shoot = %cluster.shoot_name(), "Shoot submitted");
            return Ok(StageResult::retry(stage, self.poll_interval)
                .with_message("Shoot submitted, waiting for cluster domain"));
        };

        if shoot.last_operation_failed() {
            return Err(StepError::fatal(
                stage,
                format!(
                    "Gardener failed to create shoot {}: {}",
                    shoot.name,
                    shoot
                        .last_operation
                        .map(|op| op.description)
                        .unwrap_or_default()
                ),
            ));
        }

        let Some(domain) = shoot.domain.filter(|d| !d.is_empty()) else {
            return Ok(StageResult::retry(stage, self.poll_interval)
                .with_message("Waiting for cluster domain"));
        };

        let mut labels = BTreeMap::new();
        labels.insert("gardenerClusterName".to_string(), shoot.name.clone());
        labels.insert("gardenerClusterDomain".to_string(), domain.clone());
        let update = RuntimeUpdate {
            labels,
            ..Default::default()
        };
        if let Err(e) = self
            .director
            .update_runtime(&cluster.id, &cluster.tenant, &update)
            .await
        {
            return classify_client_error(stage, e, self.poll_interval);
        }

        Ok(StageResult::advance(self.next_stage)
            .with_message(format!("Cluster domain {domain} assigned, waiting for cluster creation")))
    }
}

/// Waits until Gardener reports the Shoot as reconciled
#[derive(Debug)]
pub struct WaitForClusterCreationStep {
    provisioner: Arc<dyn ShootProvisioner>,
    next_stage: Stage,
    timeout: Duration,
    poll_interval: Duration,
}

impl WaitForClusterCreationStep {
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
impl Step for WaitForClusterCreationStep {
    fn name(&self) -> Stage {
        Stage::WaitingForClusterCreation
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

        let shoot = match self.provisioner.get_shoot(cluster).await {
            Ok(Some(shoot)) => shoot,
            Ok(None) => {
                return Err(StepError::fatal(
                    stage,
                    format!("shoot {} disappeared during creation", cluster.shoot_name()),
                ))
            }
            Err(e) => return classify_client_error(stage, e, self.poll_interval),
        };

        if shoot.last_operation_failed() {
            let description = shoot
                .last_operation
                .map(|op| op.description)
                .unwrap_or_default();
            return Err(StepError::fatal(
                stage,
                format!("Gardener failed to create shoot {}: {description}", shoot.name),
            ));
        }

        if !shoot.is_reconciled() {
            let progress = shoot
                .last_operation
                .as_ref()
                .map(|op| op.description.clone())
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| "Shoot creation in progress".to_string());
            debug!(operation_id = %operation.id, shoot = %shoot.name, "Shoot not reconciled yet");
            return Ok(StageResult::retry(stage, self.poll_interval).with_message(progress));
        }

        Ok(StageResult::advance(self.next_stage).with_message("Cluster created"))
    }
}

/// Binds the operator groups to their cluster roles inside the runtime
#[derive(Debug)]
pub struct CreateBindingsForOperatorsStep {
    provisioner: Arc<dyn ShootProvisioner>,
    runtime_client: Arc<dyn RuntimeClusterClient>,
    roles: OperatorRolesConfig,
    next_stage: Stage,
    timeout: Duration,
    poll_interval: Duration,
}

impl CreateBindingsForOperatorsStep {
    pub fn new(
        provisioner: Arc<dyn ShootProvisioner>,
        runtime_client: Arc<dyn RuntimeClusterClient>,
        roles: OperatorRolesConfig,
        next_stage: Stage,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            provisioner,
            runtime_client,
            roles,
            next_stage,
            timeout,
            poll_interval,
        }
    }

    fn bindings(&self) -> [ClusterRoleBinding; 2] {
        [
            ClusterRoleBinding::for_group(&self.roles.l2_cluster_role, &self.roles.l2_group),
            ClusterRoleBinding::for_group(&self.roles.l3_cluster_role, &self.roles.l3_group),
        ]
    }
}

#[async_trait]
impl Step for CreateBindingsForOperatorsStep {
    fn name(&self) -> Stage {
        Stage::CreatingBindingsForOperators
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

        if !self.roles.enabled {
            return Ok(StageResult::advance(self.next_stage)
                .with_message("Operator role bindings disabled"));
        }

        let kubeconfig = match self.provisioner.get_kubeconfig(cluster).await {
            Ok(kubeconfig) => kubeconfig,
            Err(e) => return classify_client_error(stage, e, self.poll_interval),
        };

        for binding in self.bindings() {
            if let Err(e) = self
                .runtime_client
                .ensure_cluster_role_binding(&kubeconfig, &binding)
                .await
            {
                return classify_client_error(stage, e, self.poll_interval);
            }
        }

        Ok(StageResult::advance(self.next_stage).with_message("Operator role bindings created"))
    }
}

/// Writes the Director connection configuration for the runtime agent
#[derive(Debug)]
pub struct ConnectRuntimeAgentStep {
    provisioner: Arc<dyn ShootProvisioner>,
    director: Arc<dyn DirectorClient>,
    runtime_client: Arc<dyn RuntimeClusterClient>,
    next_stage: Stage,
    timeout: Duration,
    poll_interval: Duration,
}

impl ConnectRuntimeAgentStep {
    pub fn new(
        provisioner: Arc<dyn ShootProvisioner>,
        director: Arc<dyn DirectorClient>,
        runtime_client: Arc<dyn RuntimeClusterClient>,
        next_stage: Stage,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            provisioner,
            director,
            runtime_client,
            next_stage,
            timeout,
            poll_interval,
        }
    }
}

#[async_trait]
impl Step for ConnectRuntimeAgentStep {
    fn name(&self) -> Stage {
        Stage::ConnectRuntimeAgent
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

        let token = match self
            .director
            .get_connection_token(&cluster.id, &cluster.tenant)
            .await
        {
            Ok(token) => token,
            Err(e) => return classify_client_error(stage, e, self.poll_interval),
        };

        let kubeconfig = match self.provisioner.get_kubeconfig(cluster).await {
            Ok(kubeconfig) => kubeconfig,
            Err(e) => return classify_client_error(stage, e, self.poll_interval),
        };

        let configuration = AgentConfiguration::new(
            token.connector_url,
            token.token,
            cluster.id.clone(),
            cluster.tenant.clone(),
        );
        if let Err(e) = self
            .runtime_client
            .upsert_agent_configuration(&kubeconfig, &configuration)
            .await
        {
            return classify_client_error(stage, e, self.poll_interval);
        }

        info!(operation_id = %operation.id, runtime_id = %cluster.id, "Runtime agent configured");
        Ok(StageResult::advance(self.next_stage).with_message("Runtime agent connected"))
    }
}
