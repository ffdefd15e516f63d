//! # Queue Set
//!
//! One `OperationQueue` per operation type, each with its own stage graph and
//! executor. Built once at startup and shared by reference; `add` routes an
//! operation to the queue for its type.

use bon::Builder;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use provisioner_shared::clients::{DirectorClient, RuntimeClusterClient, ShootProvisioner};
use provisioner_shared::config::ProvisionerConfig;
use provisioner_shared::database::OperationStore;
use provisioner_shared::{Operation, OperationType, Stage};

use super::executor::StageExecutor;
use super::failure::{FailureHandler, LoggingFailureHandler};
use super::graph::GraphError;
use super::notification::DirectorNotifier;
use super::queue::OperationQueue;
use super::stages::{build_graph, StepDependencies};
use super::statistics::QueueStatisticsSnapshot;

/// External systems the queues drive
#[derive(Debug, Clone, Builder)]
pub struct Collaborators {
    pub store: Arc<dyn OperationStore>,
    pub provisioner: Arc<dyn ShootProvisioner>,
    pub director: Arc<dyn DirectorClient>,
    pub runtime_client: Arc<dyn RuntimeClusterClient>,
    /// Defaults to `LoggingFailureHandler`
    pub failure_handler: Option<Arc<dyn FailureHandler>>,
}

#[derive(Debug)]
struct TypedQueue {
    queue: Arc<OperationQueue>,
    entry_stage: Stage,
}

#[derive(Debug)]
pub struct QueueSet {
    queues: HashMap<OperationType, TypedQueue>,
}

impl QueueSet {
    /// Build and validate every stage graph, failing fast on a wiring error
    pub fn new(collaborators: &Collaborators, config: &ProvisionerConfig) -> Result<Self, GraphError> {
        let deps = StepDependencies::new(
            collaborators.store.clone(),
            collaborators.provisioner.clone(),
            collaborators.director.clone(),
            collaborators.runtime_client.clone(),
            config,
        );
        let failure_handler = collaborators
            .failure_handler
            .clone()
            .unwrap_or_else(|| Arc::new(LoggingFailureHandler));
        let notifier = DirectorNotifier::from_config(collaborators.director.clone(), &config.director);

        let mut queues = HashMap::with_capacity(OperationType::ALL.len());
        for operation_type in OperationType::ALL {
            let graph = Arc::new(build_graph(operation_type, &deps)?);
            let entry_stage = graph.entry_stage();
            let executor = StageExecutor::new(
                collaborators.store.clone(),
                graph,
                failure_handler.clone(),
                notifier.clone(),
                config.queues.store_retry_delay(),
            );
            let queue = OperationQueue::new(
                operation_type.as_str(),
                config.queues.workers_for(operation_type),
                Arc::new(executor),
            );
            queues.insert(
                operation_type,
                TypedQueue {
                    queue: Arc::new(queue),
                    entry_stage,
                },
            );
        }

        info!(queues = queues.len(), "Stage graphs validated");
        Ok(Self { queues })
    }

    fn typed(&self, operation_type: OperationType) -> &TypedQueue {
        // Every type is inserted by `new`
        &self.queues[&operation_type]
    }

    pub fn queue(&self, operation_type: OperationType) -> &Arc<OperationQueue> {
        &self.typed(operation_type).queue
    }

    /// Stage a new operation of `operation_type` must be created at
    pub fn entry_stage(&self, operation_type: OperationType) -> Stage {
        self.typed(operation_type).entry_stage
    }

    /// Route the operation to its queue; see `OperationQueue::add`
    pub fn add(&self, operation: &Operation) -> bool {
        self.queue(operation.operation_type).add(&operation.id)
    }

    /// Run all worker pools until `shutdown` is cancelled and in-flight runs drain
    pub async fn run(&self, shutdown: CancellationToken) {
        let runs = self
            .queues
            .values()
            .map(|typed| Arc::clone(&typed.queue).run(shutdown.clone()));
        join_all(runs).await;
    }

    pub fn statistics(&self) -> HashMap<OperationType, QueueStatisticsSnapshot> {
        self.queues
            .iter()
            .map(|(operation_type, typed)| (*operation_type, typed.queue.statistics()))
            .collect()
    }
}
