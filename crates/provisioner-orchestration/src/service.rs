//! # Provisioning Service
//!
//! Entry points an API layer calls. Each mutating call persists the Cluster
//! and Operation rows, positions the operation at the entry stage of its
//! graph and hands the ID to the `QueueSet`. Everything after that happens in
//! the executor.

use bon::Builder;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use provisioner_shared::clients::{DirectorClient, RuntimeStatusCondition, ShootProvisioner};
use provisioner_shared::database::OperationStore;
use provisioner_shared::{
    Cluster, ClusterConfig, Operation, OperationType, ProvisionerError, ProvisionerResult,
    StoreError,
};

use crate::operations::QueueSet;

#[derive(Debug, Clone, Builder)]
pub struct ProvisionRuntimeInput {
    #[builder(into)]
    pub runtime_id: String,
    #[builder(into)]
    pub tenant: String,
    #[builder(into)]
    pub sub_account_id: Option<String>,
    pub cluster_config: ClusterConfig,
    /// Skip Kyma installation; the runtime is later deprovisioned without uninstall
    #[builder(default)]
    pub no_install: bool,
}

#[derive(Debug, Clone, Default, Builder)]
pub struct UpgradeRuntimeInput {
    #[builder(into)]
    pub kubernetes_version: Option<String>,
    #[builder(into)]
    pub machine_image_version: Option<String>,
}

impl UpgradeRuntimeInput {
    fn apply_to(&self, config: &ClusterConfig) -> ClusterConfig {
        let mut desired = config.clone();
        if let Some(version) = &self.kubernetes_version {
            desired.kubernetes_version.clone_from(version);
        }
        if let Some(version) = &self.machine_image_version {
            desired.machine_image_version = Some(version.clone());
        }
        desired
    }

    fn is_empty(&self) -> bool {
        self.kubernetes_version.is_none() && self.machine_image_version.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RuntimeStatus {
    pub cluster: Cluster,
    pub last_operation: Option<Operation>,
}

#[derive(Debug, Clone)]
pub struct ProvisioningService {
    store: Arc<dyn OperationStore>,
    provisioner: Arc<dyn ShootProvisioner>,
    director: Arc<dyn DirectorClient>,
    queues: Arc<QueueSet>,
}

impl ProvisioningService {
    pub fn new(
        store: Arc<dyn OperationStore>,
        provisioner: Arc<dyn ShootProvisioner>,
        director: Arc<dyn DirectorClient>,
        queues: Arc<QueueSet>,
    ) -> Self {
        Self {
            store,
            provisioner,
            director,
            queues,
        }
    }

    /// Register a new runtime and start provisioning it. Returns the operation ID.
    #[instrument(skip(self, input), fields(runtime_id = %input.runtime_id))]
    pub async fn provision_runtime(&self, input: ProvisionRuntimeInput) -> ProvisionerResult<String> {
        if input.runtime_id.trim().is_empty() {
            return Err(ProvisionerError::invalid_input("runtime_id must not be empty"));
        }
        if input.cluster_config.name.trim().is_empty() {
            return Err(ProvisionerError::invalid_input("cluster name must not be empty"));
        }

        let cluster = Cluster::new(
            input.runtime_id,
            input.tenant,
            input.sub_account_id,
            input.cluster_config,
        );
        self.store.insert_cluster(&cluster).await?;

        let operation_type = if input.no_install {
            OperationType::ProvisionNoInstall
        } else {
            OperationType::Provision
        };
        let operation = self
            .create_operation(&cluster, operation_type, "Provisioning started")
            .await?;

        if let Err(e) = self
            .director
            .set_runtime_status_condition(&cluster.id, &cluster.tenant, RuntimeStatusCondition::Provisioning)
            .await
        {
            warn!(
                runtime_id = %cluster.id,
                error = %e,
                "Failed to mark runtime as provisioning in Director"
            );
        }

        self.enqueue(&operation);
        Ok(operation.id)
    }

    #[instrument(skip(self))]
    pub async fn deprovision_runtime(&self, runtime_id: &str) -> ProvisionerResult<String> {
        let cluster = self.active_cluster(runtime_id).await?;
        let last = self.ensure_no_operation_in_progress(&cluster).await?;

        let operation_type = match last.map(|op| op.operation_type) {
            Some(OperationType::ProvisionNoInstall) => OperationType::DeprovisionNoInstall,
            _ => OperationType::Deprovision,
        };
        let operation = self
            .create_operation(&cluster, operation_type, "Deprovisioning started")
            .await?;

        self.enqueue(&operation);
        Ok(operation.id)
    }

    /// Change Kubernetes or machine image versions; the desired configuration
    /// is recorded and applied by the upgrade graph
    #[instrument(skip(self, input))]
    pub async fn upgrade_runtime(
        &self,
        runtime_id: &str,
        input: UpgradeRuntimeInput,
    ) -> ProvisionerResult<String> {
        if input.is_empty() {
            return Err(ProvisionerError::invalid_input(
                "upgrade requires a kubernetes or machine image version",
            ));
        }
        let cluster = self.active_cluster(runtime_id).await?;
        self.ensure_no_operation_in_progress(&cluster).await?;

        let desired = input.apply_to(&cluster.cluster_config);
        self.store.update_cluster_config(&cluster.id, &desired).await?;

        let operation = self
            .create_operation(&cluster, OperationType::Upgrade, "Upgrade started")
            .await?;
        self.enqueue(&operation);
        Ok(operation.id)
    }

    /// Submit a new shoot specification immediately and track its rollout
    #[instrument(skip(self, config))]
    pub async fn upgrade_shoot(
        &self,
        runtime_id: &str,
        config: ClusterConfig,
    ) -> ProvisionerResult<String> {
        let cluster = self.active_cluster(runtime_id).await?;
        self.ensure_no_operation_in_progress(&cluster).await?;

        if config.name != cluster.shoot_name() {
            return Err(ProvisionerError::invalid_input(format!(
                "shoot name cannot change from {} to {}",
                cluster.shoot_name(),
                config.name
            )));
        }

        self.provisioner.upgrade_cluster(&cluster, &config).await?;
        self.store.update_cluster_config(&cluster.id, &config).await?;

        let operation = self
            .create_operation(&cluster, OperationType::UpgradeShoot, "Shoot upgrade started")
            .await?;
        self.enqueue(&operation);
        Ok(operation.id)
    }

    #[instrument(skip(self))]
    pub async fn hibernate_runtime(&self, runtime_id: &str) -> ProvisionerResult<String> {
        let cluster = self.active_cluster(runtime_id).await?;
        self.ensure_no_operation_in_progress(&cluster).await?;

        let operation = self
            .create_operation(&cluster, OperationType::Hibernate, "Hibernation started")
            .await?;
        self.enqueue(&operation);
        Ok(operation.id)
    }

    pub async fn runtime_status(&self, runtime_id: &str) -> ProvisionerResult<RuntimeStatus> {
        let cluster = self.cluster(runtime_id).await?;
        let last_operation = self.store.get_last_operation(&cluster.id).await?;
        Ok(RuntimeStatus {
            cluster,
            last_operation,
        })
    }

    pub async fn operation_status(&self, operation_id: &str) -> ProvisionerResult<Operation> {
        Ok(self.store.get_operation(operation_id).await?)
    }

    async fn cluster(&self, runtime_id: &str) -> ProvisionerResult<Cluster> {
        match self.store.get_cluster(runtime_id).await {
            Ok(cluster) => Ok(cluster),
            Err(e) if e.is_not_found() => Err(ProvisionerError::runtime_not_found(runtime_id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn active_cluster(&self, runtime_id: &str) -> ProvisionerResult<Cluster> {
        let cluster = self.cluster(runtime_id).await?;
        if cluster.deleted {
            return Err(ProvisionerError::runtime_not_found(runtime_id));
        }
        Ok(cluster)
    }

    async fn ensure_no_operation_in_progress(
        &self,
        cluster: &Cluster,
    ) -> ProvisionerResult<Option<Operation>> {
        let last = self.store.get_last_operation(&cluster.id).await?;
        match last {
            Some(op) if !op.is_terminal() => Err(ProvisionerError::OperationInProgress {
                runtime_id: cluster.id.clone(),
                operation_id: op.id,
            }),
            other => Ok(other),
        }
    }

    /// Insert the operation at its graph's entry stage. The store admits one
    /// in-progress operation per cluster, which settles concurrent requests
    /// that both passed `ensure_no_operation_in_progress`.
    async fn create_operation(
        &self,
        cluster: &Cluster,
        operation_type: OperationType,
        message: &str,
    ) -> ProvisionerResult<Operation> {
        let entry_stage = self.queues.entry_stage(operation_type);
        let operation = Operation::new(operation_type, &cluster.id, entry_stage, message);
        match self.store.insert_operation(&operation).await {
            Ok(()) => {}
            Err(StoreError::OperationInProgress { operation_id, .. }) => {
                return Err(ProvisionerError::OperationInProgress {
                    runtime_id: cluster.id.clone(),
                    operation_id,
                });
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            operation_id = %operation.id,
            runtime_id = %cluster.id,
            operation_type = %operation_type,
            stage = %entry_stage,
            "Operation created"
        );
        Ok(operation)
    }

    fn enqueue(&self, operation: &Operation) {
        if !self.queues.add(operation) {
            warn!(operation_id = %operation.id, "Operation was already scheduled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::Collaborators;
    use provisioner_shared::config::ProvisionerConfig;
    use provisioner_shared::database::{InMemoryOperationStore, StoreResult};
    use provisioner_shared::testing::{
        sample_config, FakeRuntimeClusterClient, FakeShootProvisioner, ProvisionerCall,
        RecordingDirectorClient,
    };
    use provisioner_shared::{OperationState, Stage};

    struct Harness {
        store: Arc<InMemoryOperationStore>,
        provisioner: Arc<FakeShootProvisioner>,
        director: Arc<RecordingDirectorClient>,
        queues: Arc<QueueSet>,
        service: ProvisioningService,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryOperationStore::new());
        let provisioner = Arc::new(FakeShootProvisioner::new());
        let director = Arc::new(RecordingDirectorClient::new());
        let collaborators = Collaborators::builder()
            .store(store.clone())
            .provisioner(provisioner.clone())
            .director(director.clone())
            .runtime_client(Arc::new(FakeRuntimeClusterClient::new()))
            .build();
        let queues = Arc::new(QueueSet::new(&collaborators, &ProvisionerConfig::default()).unwrap());
        let service = ProvisioningService::new(
            store.clone(),
            provisioner.clone(),
            director.clone(),
            queues.clone(),
        );
        Harness {
            store,
            provisioner,
            director,
            queues,
            service,
        }
    }

    fn provision_input(runtime_id: &str, no_install: bool) -> ProvisionRuntimeInput {
        ProvisionRuntimeInput::builder()
            .runtime_id(runtime_id)
            .tenant("tenant-a")
            .cluster_config(sample_config(&format!("c-{runtime_id}")))
            .no_install(no_install)
            .build()
    }

    async fn finish(store: &InMemoryOperationStore, operation_id: &str) {
        store
            .update_operation_state(operation_id, OperationState::Succeeded, "done")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_provision_creates_operation_at_entry_stage() {
        let h = harness();
        let id = h.service.provision_runtime(provision_input("runtime-1", false)).await.unwrap();

        let op = h.store.get_operation(&id).await.unwrap();
        assert_eq!(op.operation_type, OperationType::Provision);
        assert_eq!(op.stage, Stage::WaitingForClusterDomain);
        assert_eq!(op.state, OperationState::InProgress);
        assert!(h.queues.queue(OperationType::Provision).is_scheduled(&id));
        assert_eq!(
            h.director.conditions_for("runtime-1"),
            vec![RuntimeStatusCondition::Provisioning]
        );
    }

    #[tokio::test]
    async fn test_director_failure_does_not_block_provisioning() {
        let h = harness();
        h.director
            .fail_next_condition(provisioner_shared::clients::ClientError::service_unavailable("director", "down"));

        let id = h.service.provision_runtime(provision_input("runtime-1", true)).await.unwrap();
        assert!(h.queues.queue(OperationType::ProvisionNoInstall).is_scheduled(&id));
    }

    #[tokio::test]
    async fn test_refuses_new_operation_while_one_is_in_progress() {
        let h = harness();
        let id = h.service.provision_runtime(provision_input("runtime-1", false)).await.unwrap();

        let err = h.service.deprovision_runtime("runtime-1").await.unwrap_err();
        match err {
            ProvisionerError::OperationInProgress { operation_id, .. } => assert_eq!(operation_id, id),
            other => panic!("unexpected error: {other}"),
        }
    }

    /// Delegates to the in-memory store, yielding before each call so that
    /// concurrent requests interleave between their check and their insert
    #[derive(Debug)]
    struct YieldingStore(Arc<InMemoryOperationStore>);

    #[async_trait::async_trait]
    impl OperationStore for YieldingStore {
        async fn get_operation(&self, operation_id: &str) -> StoreResult<Operation> {
            tokio::task::yield_now().await;
            self.0.get_operation(operation_id).await
        }

        async fn update_operation_stage(
            &self,
            operation_id: &str,
            stage: Stage,
            message: &str,
        ) -> StoreResult<()> {
            tokio::task::yield_now().await;
            self.0.update_operation_stage(operation_id, stage, message).await
        }

        async fn update_operation_state(
            &self,
            operation_id: &str,
            state: OperationState,
            message: &str,
        ) -> StoreResult<()> {
            tokio::task::yield_now().await;
            self.0.update_operation_state(operation_id, state, message).await
        }

        async fn update_operation_message(&self, operation_id: &str, message: &str) -> StoreResult<()> {
            tokio::task::yield_now().await;
            self.0.update_operation_message(operation_id, message).await
        }

        async fn list_in_progress_operations(&self) -> StoreResult<Vec<Operation>> {
            tokio::task::yield_now().await;
            self.0.list_in_progress_operations().await
        }

        async fn get_cluster(&self, cluster_id: &str) -> StoreResult<Cluster> {
            tokio::task::yield_now().await;
            self.0.get_cluster(cluster_id).await
        }

        async fn update_cluster_config(&self, cluster_id: &str, config: &ClusterConfig) -> StoreResult<()> {
            tokio::task::yield_now().await;
            self.0.update_cluster_config(cluster_id, config).await
        }

        async fn insert_cluster(&self, cluster: &Cluster) -> StoreResult<()> {
            tokio::task::yield_now().await;
            self.0.insert_cluster(cluster).await
        }

        async fn insert_operation(&self, operation: &Operation) -> StoreResult<()> {
            tokio::task::yield_now().await;
            self.0.insert_operation(operation).await
        }

        async fn get_last_operation(&self, cluster_id: &str) -> StoreResult<Option<Operation>> {
            tokio::task::yield_now().await;
            self.0.get_last_operation(cluster_id).await
        }

        async fn mark_cluster_deleted(&self, cluster_id: &str) -> StoreResult<()> {
            tokio::task::yield_now().await;
            self.0.mark_cluster_deleted(cluster_id).await
        }
    }

    #[tokio::test]
    async fn test_concurrent_requests_start_one_operation() {
        let h = harness();
        let id = h.service.provision_runtime(provision_input("runtime-1", false)).await.unwrap();
        finish(&h.store, &id).await;

        let service = ProvisioningService::new(
            Arc::new(YieldingStore(h.store.clone())),
            h.provisioner.clone(),
            h.director.clone(),
            h.queues.clone(),
        );
        let (first, second) = tokio::join!(
            service.deprovision_runtime("runtime-1"),
            service.deprovision_runtime("runtime-1")
        );

        let (winner, loser) = match (first, second) {
            (Ok(winner), Err(loser)) | (Err(loser), Ok(winner)) => (winner, loser),
            other => panic!("expected exactly one accepted request, got {other:?}"),
        };
        match loser {
            ProvisionerError::OperationInProgress {
                runtime_id,
                operation_id,
            } => {
                assert_eq!(runtime_id, "runtime-1");
                assert_eq!(operation_id, winner);
            }
            other => panic!("unexpected error: {other}"),
        }

        let running: Vec<_> = h
            .store
            .list_in_progress_operations()
            .await
            .unwrap()
            .into_iter()
            .filter(|op| op.cluster_id == "runtime-1")
            .collect();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, winner);
    }

    #[tokio::test]
    async fn test_deprovision_type_follows_provisioning_type() {
        let h = harness();
        let id = h.service.provision_runtime(provision_input("runtime-1", true)).await.unwrap();
        finish(&h.store, &id).await;
        let deprovision = h.service.deprovision_runtime("runtime-1").await.unwrap();
        let op = h.store.get_operation(&deprovision).await.unwrap();
        assert_eq!(op.operation_type, OperationType::DeprovisionNoInstall);
        assert_eq!(op.stage, Stage::DeleteCluster);

        let id = h.service.provision_runtime(provision_input("runtime-2", false)).await.unwrap();
        finish(&h.store, &id).await;
        let deprovision = h.service.deprovision_runtime("runtime-2").await.unwrap();
        let op = h.store.get_operation(&deprovision).await.unwrap();
        assert_eq!(op.operation_type, OperationType::Deprovision);
    }

    #[tokio::test]
    async fn test_upgrade_records_desired_versions() {
        let h = harness();
        let id = h.service.provision_runtime(provision_input("runtime-1", false)).await.unwrap();
        finish(&h.store, &id).await;

        let input = UpgradeRuntimeInput::builder().kubernetes_version("1.31.2").build();
        let upgrade = h.service.upgrade_runtime("runtime-1", input).await.unwrap();

        let status = h.service.runtime_status("runtime-1").await.unwrap();
        assert_eq!(status.cluster.cluster_config.kubernetes_version, "1.31.2");
        let last = status.last_operation.unwrap();
        assert_eq!(last.id, upgrade);
        assert_eq!(last.stage, Stage::StartingUpgrade);
    }

    #[tokio::test]
    async fn test_empty_upgrade_is_rejected() {
        let h = harness();
        let err = h
            .service
            .upgrade_runtime("runtime-1", UpgradeRuntimeInput::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionerError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_upgrade_shoot_submits_config_before_tracking() {
        let h = harness();
        let id = h.service.provision_runtime(provision_input("runtime-1", false)).await.unwrap();
        finish(&h.store, &id).await;

        let cluster = h.store.get_cluster("runtime-1").await.unwrap();
        h.provisioner.insert_shoot(&cluster);

        let mut config = sample_config("c-runtime-1");
        config.auto_scaler_max = 20;
        let op_id = h.service.upgrade_shoot("runtime-1", config).await.unwrap();

        assert_eq!(h.provisioner.call_count(ProvisionerCall::Upgrade), 1);
        let op = h.service.operation_status(&op_id).await.unwrap();
        assert_eq!(op.stage, Stage::WaitingForShootNewVersion);
        let cluster = h.store.get_cluster("runtime-1").await.unwrap();
        assert_eq!(cluster.cluster_config.auto_scaler_max, 20);
    }

    #[tokio::test]
    async fn test_operations_on_unknown_or_deleted_runtime() {
        let h = harness();
        assert!(matches!(
            h.service.hibernate_runtime("missing").await.unwrap_err(),
            ProvisionerError::RuntimeNotFound { .. }
        ));

        let id = h.service.provision_runtime(provision_input("runtime-1", false)).await.unwrap();
        finish(&h.store, &id).await;
        h.store.mark_cluster_deleted("runtime-1").await.unwrap();
        assert!(matches!(
            h.service.hibernate_runtime("runtime-1").await.unwrap_err(),
            ProvisionerError::RuntimeNotFound { .. }
        ));
    }
}
