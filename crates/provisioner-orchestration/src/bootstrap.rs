//! # Provisioner Bootstrap
//!
//! Wires the store, collaborators, queue set and service together, recovers
//! in-progress operations and spawns the queue workers. The returned handle
//! owns the worker task and stops it on request.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use provisioner_shared::clients::{HttpDirectorClient, RuntimeClusterClient, ShootProvisioner};
use provisioner_shared::config::ProvisionerConfig;
use provisioner_shared::database::PgOperationStore;
use provisioner_shared::{ProvisionerError, ProvisionerResult};

use crate::operations::{recover_in_progress_operations, Collaborators, QueueSet, RecoveryReport};
use crate::service::ProvisioningService;

#[derive(Debug)]
pub struct ProvisionerHandle {
    service: ProvisioningService,
    queues: Arc<QueueSet>,
    recovery: RecoveryReport,
    shutdown: CancellationToken,
    workers: Option<JoinHandle<()>>,
    shutdown_timeout: Duration,
}

impl ProvisionerHandle {
    pub fn service(&self) -> &ProvisioningService {
        &self.service
    }

    pub fn queues(&self) -> &Arc<QueueSet> {
        &self.queues
    }

    /// What startup recovery found and re-enqueued
    pub fn recovery(&self) -> &RecoveryReport {
        &self.recovery
    }

    pub fn is_running(&self) -> bool {
        self.workers.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Cancel the workers and wait for in-flight executor runs, bounded by the
    /// configured shutdown timeout
    pub async fn stop(&mut self) -> ProvisionerResult<()> {
        let Some(workers) = self.workers.take() else {
            return Ok(());
        };

        info!(
            timeout_ms = self.shutdown_timeout.as_millis() as u64,
            "Stopping operation queues..."
        );
        self.shutdown.cancel();

        match tokio::time::timeout(self.shutdown_timeout, workers).await {
            Ok(Ok(())) => {
                info!("Operation queues stopped");
                Ok(())
            }
            Ok(Err(e)) => Err(ProvisionerError::Internal(format!(
                "queue worker task failed: {e}"
            ))),
            Err(_) => {
                error!(
                    timeout_ms = self.shutdown_timeout.as_millis() as u64,
                    "Graceful shutdown timed out, in-flight operations resume on next start"
                );
                Err(ProvisionerError::Internal(
                    "queue shutdown timed out".to_string(),
                ))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProvisionerBootstrap;

impl ProvisionerBootstrap {
    /// Production wiring: PostgreSQL store and HTTP Director client, with the
    /// Gardener and runtime cluster clients supplied by the embedder
    pub async fn bootstrap(
        config: ProvisionerConfig,
        provisioner: Arc<dyn ShootProvisioner>,
        runtime_client: Arc<dyn RuntimeClusterClient>,
    ) -> ProvisionerResult<ProvisionerHandle> {
        let store = PgOperationStore::connect(&config.database).await?;
        let director = HttpDirectorClient::new(&config.director)?;

        let collaborators = Collaborators::builder()
            .store(Arc::new(store))
            .provisioner(provisioner)
            .director(Arc::new(director))
            .runtime_client(runtime_client)
            .build();

        Self::start(&config, collaborators).await
    }

    /// Build the queue set, recover in-progress operations and start the workers
    #[instrument(skip_all)]
    pub async fn start(
        config: &ProvisionerConfig,
        collaborators: Collaborators,
    ) -> ProvisionerResult<ProvisionerHandle> {
        let queues = QueueSet::new(&collaborators, config)
            .map_err(|e| ProvisionerError::Internal(format!("invalid stage graph: {e}")))?;
        let queues = Arc::new(queues);

        // Enqueued before workers start; workers pick the IDs up on their first pass
        let recovery = recover_in_progress_operations(collaborators.store.as_ref(), &queues).await?;

        let shutdown = CancellationToken::new();
        let workers = {
            let queues = Arc::clone(&queues);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { queues.run(shutdown).await })
        };

        let service = ProvisioningService::new(
            collaborators.store,
            collaborators.provisioner,
            collaborators.director,
            Arc::clone(&queues),
        );

        info!(
            recovered = recovery.enqueued,
            "Runtime provisioner started"
        );

        Ok(ProvisionerHandle {
            service,
            queues,
            recovery,
            shutdown,
            workers: Some(workers),
            shutdown_timeout: config.queues.shutdown_timeout(),
        })
    }
}
