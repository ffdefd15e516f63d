//! Helpers for end-to-end tests
//!
// Not every test target uses every helper
#![allow(dead_code)]

use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use runtime_provisioner::orchestration::operations::Collaborators;
use runtime_provisioner::orchestration::{ProvisionerBootstrap, ProvisionerHandle};
use runtime_provisioner::shared::config::ProvisionerConfig;
use runtime_provisioner::shared::database::{InMemoryOperationStore, OperationStore};
use runtime_provisioner::shared::testing::{
    sample_cluster, FakeRuntimeClusterClient, FakeShootProvisioner, RecordingDirectorClient,
    ShootBehavior,
};
use runtime_provisioner::{Cluster, Operation, OperationState, OperationType, Stage};

/// Scale factor for wall-clock waits, `CI` doubles it
pub fn get_timeout_multiplier() -> u32 {
    if std::env::var("CI").is_ok() {
        2
    } else {
        1
    }
}

pub fn default_wait() -> Duration {
    Duration::from_secs(5) * get_timeout_multiplier()
}

/// Configuration with millisecond polling so scenarios finish quickly
pub fn fast_config() -> ProvisionerConfig {
    let mut config = ProvisionerConfig::default();
    config.polling.default_interval_ms = 10;
    config.polling.shoot_interval_ms = 10;
    config.queues.store_retry_delay_ms = 10;
    config.queues.shutdown_timeout_ms = 2_000;
    config.director.notification_initial_delay_ms = 1;
    config
}

pub struct TestEnvironment {
    pub store: Arc<InMemoryOperationStore>,
    pub provisioner: Arc<FakeShootProvisioner>,
    pub director: Arc<RecordingDirectorClient>,
    pub runtime_client: Arc<FakeRuntimeClusterClient>,
    pub config: ProvisionerConfig,
}

impl TestEnvironment {
    pub fn new(behavior: ShootBehavior) -> Self {
        Self {
            store: Arc::new(InMemoryOperationStore::new()),
            provisioner: Arc::new(FakeShootProvisioner::with_behavior(behavior)),
            director: Arc::new(RecordingDirectorClient::new()),
            runtime_client: Arc::new(FakeRuntimeClusterClient::new()),
            config: fast_config(),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators::builder()
            .store(self.store.clone())
            .provisioner(self.provisioner.clone())
            .director(self.director.clone())
            .runtime_client(self.runtime_client.clone())
            .build()
    }

    pub async fn start(&self) -> Result<ProvisionerHandle> {
        Ok(ProvisionerBootstrap::start(&self.config, self.collaborators()).await?)
    }

    /// Insert a cluster whose Shoot already exists, as after a finished provisioning
    pub async fn seed_provisioned_cluster(&self, runtime_id: &str) -> Result<Cluster> {
        let cluster = sample_cluster(runtime_id);
        self.store.insert_cluster(&cluster).await?;
        self.provisioner.insert_shoot(&cluster);
        let provision = Operation::new(
            OperationType::Provision,
            &cluster.id,
            Stage::Finished,
            "Provisioned",
        );
        self.store.insert_operation(&provision).await?;
        self.store
            .update_operation_state(&provision.id, OperationState::Succeeded, "Provisioned")
            .await?;
        Ok(cluster)
    }

    /// Poll the store until the operation is terminal
    pub async fn wait_for_terminal(&self, operation_id: &str) -> Result<Operation> {
        let deadline = Instant::now() + default_wait();
        loop {
            let operation = self.store.get_operation(operation_id).await?;
            if operation.is_terminal() {
                return Ok(operation);
            }
            if Instant::now() >= deadline {
                bail!(
                    "operation {operation_id} still {} at stage {} after {:?}",
                    operation.state,
                    operation.stage,
                    default_wait()
                );
            }
            sleep(Duration::from_millis(10)).await;
        }
    }
}
