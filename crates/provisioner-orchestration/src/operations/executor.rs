//! # Stage Executor
//!
//! Drives one operation as far as it can go in a single run: load the rows,
//! run the step for the persisted stage, persist the transition, repeat.
//! A run ends when a step asks for a delay, the operation reaches a terminal
//! state, or the store cannot be reached.
//!
//! Every stage transition is written before the next step starts, so a crash
//! at any point resumes at the last persisted stage.

use async_trait::async_trait;
use chrono::Utc;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use provisioner_shared::database::OperationStore;
use provisioner_shared::retry::{retry_with_backoff, RetryConfig};
use provisioner_shared::{Cluster, Operation, OperationState, Stage, StoreError};

use super::failure::FailureHandler;
use super::graph::StageGraph;
use super::notification::DirectorNotifier;
use super::step::StepError;

/// Shortest delay honoured for a same-stage result, so a step cannot spin the queue
pub const MIN_RETRY_DELAY: Duration = Duration::from_millis(10);

/// How an executor run ended, as seen by the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Succeeded,
    Failed,
    /// The operation was already `Succeeded` or `Failed`
    AlreadyTerminal,
    /// Nothing to run: the operation or its cluster does not exist
    Dropped,
    /// Run again no earlier than this delay from now
    RequeueAfter(Duration),
}

#[async_trait]
pub trait OperationExecutor: Send + Sync + Debug {
    async fn execute(&self, operation_id: &str) -> ExecutionOutcome;
}

#[derive(Debug)]
pub struct StageExecutor {
    store: Arc<dyn OperationStore>,
    graph: Arc<StageGraph>,
    failure_handler: Arc<dyn FailureHandler>,
    notifier: DirectorNotifier,
    store_retry_delay: Duration,
    finalize_retry: RetryConfig,
}

impl StageExecutor {
    pub fn new(
        store: Arc<dyn OperationStore>,
        graph: Arc<StageGraph>,
        failure_handler: Arc<dyn FailureHandler>,
        notifier: DirectorNotifier,
        store_retry_delay: Duration,
    ) -> Self {
        Self {
            store,
            graph,
            failure_handler,
            notifier,
            store_retry_delay,
            finalize_retry: RetryConfig {
                max_attempts: 3,
                initial_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(2),
                backoff_multiplier: 2.0,
            },
        }
    }

    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    async fn load(&self, operation_id: &str) -> Result<(Operation, Cluster), ExecutionOutcome> {
        let operation = match self.store.get_operation(operation_id).await {
            Ok(operation) => operation,
            Err(e) if e.is_not_found() => {
                warn!(operation_id = %operation_id, "Operation not found, dropping");
                return Err(ExecutionOutcome::Dropped);
            }
            Err(e) => {
                warn!(operation_id = %operation_id, error = %e, "Failed to load operation");
                return Err(ExecutionOutcome::RequeueAfter(self.store_retry_delay));
            }
        };

        if operation.is_terminal() {
            debug!(operation_id = %operation_id, state = %operation.state, "Operation already terminal");
            return Err(ExecutionOutcome::AlreadyTerminal);
        }

        if operation.operation_type != self.graph.operation_type() {
            error!(
                operation_id = %operation_id,
                operation_type = %operation.operation_type,
                queue = %self.graph.operation_type(),
                "Operation routed to the wrong queue, dropping"
            );
            return Err(ExecutionOutcome::Dropped);
        }

        let cluster = match self.store.get_cluster(&operation.cluster_id).await {
            Ok(cluster) => cluster,
            Err(e) if e.is_not_found() => {
                error!(
                    operation_id = %operation_id,
                    runtime_id = %operation.cluster_id,
                    "Cluster for operation not found, dropping"
                );
                return Err(ExecutionOutcome::Dropped);
            }
            Err(e) => {
                warn!(operation_id = %operation_id, error = %e, "Failed to load cluster");
                return Err(ExecutionOutcome::RequeueAfter(self.store_retry_delay));
            }
        };

        Ok((operation, cluster))
    }

    async fn succeed(&self, cluster: &Cluster, operation: &Operation, message: &str) -> ExecutionOutcome {
        if operation.stage != Stage::Finished {
            if let Err(e) = self
                .store
                .update_operation_stage(&operation.id, Stage::Finished, message)
                .await
            {
                warn!(operation_id = %operation.id, error = %e, "Failed to persist final stage");
                return ExecutionOutcome::RequeueAfter(self.store_retry_delay);
            }
        }

        match self
            .store
            .update_operation_state(&operation.id, OperationState::Succeeded, message)
            .await
        {
            Ok(()) => {}
            Err(StoreError::TerminalOperation { .. }) => return ExecutionOutcome::AlreadyTerminal,
            Err(e) => {
                // Stage is already Finished; the next run only finalizes
                warn!(operation_id = %operation.id, error = %e, "Failed to persist success");
                return ExecutionOutcome::RequeueAfter(self.store_retry_delay);
            }
        }

        info!(
            operation_id = %operation.id,
            operation_type = %operation.operation_type,
            runtime_id = %cluster.id,
            "Operation succeeded"
        );
        self.notifier
            .notify(cluster, operation.operation_type, OperationState::Succeeded)
            .await;
        ExecutionOutcome::Succeeded
    }

    async fn fail(&self, cluster: &Cluster, operation: &Operation, error: StepError) -> ExecutionOutcome {
        let stage = error.stage();
        self.failure_handler
            .handle(cluster, operation, stage, &error)
            .await;

        let message = error.to_string();
        let persisted = retry_with_backoff(&self.finalize_retry, "persist_operation_failure", || {
            self.store
                .update_operation_state(&operation.id, OperationState::Failed, &message)
        })
        .await;

        match persisted {
            Ok(()) => {}
            Err(StoreError::TerminalOperation { .. }) => return ExecutionOutcome::AlreadyTerminal,
            Err(e) => {
                error!(operation_id = %operation.id, error = %e, "Failed to persist operation failure");
                return ExecutionOutcome::RequeueAfter(self.store_retry_delay);
            }
        }

        self.notifier
            .notify(cluster, operation.operation_type, OperationState::Failed)
            .await;
        ExecutionOutcome::Failed
    }
}

#[async_trait]
impl OperationExecutor for StageExecutor {
    #[instrument(skip(self), fields(operation_type = %self.graph.operation_type()))]
    async fn execute(&self, operation_id: &str) -> ExecutionOutcome {
        let (mut operation, cluster) = match self.load(operation_id).await {
            Ok(loaded) => loaded,
            Err(outcome) => return outcome,
        };

        // Each stage runs at most once per pass through the chain
        for _ in 0..=self.graph.len() {
            if operation.stage == Stage::Finished {
                let message = operation.message.clone();
                return self.succeed(&cluster, &operation, &message).await;
            }

            let Some(step) = self.graph.step_for(operation.stage).cloned() else {
                let error = StepError::UnknownStage {
                    stage: operation.stage,
                    operation_type: operation.operation_type,
                };
                return self.fail(&cluster, &operation, error).await;
            };

            debug!(operation_id = %operation.id, stage = %operation.stage, "Running step");
            let result = match step.run(&cluster, &operation).await {
                Ok(result) => result,
                Err(error) => return self.fail(&cluster, &operation, error).await,
            };

            if result.next_stage == operation.stage {
                if let Some(message) = result.message.filter(|m| *m != operation.message) {
                    if let Err(e) = self
                        .store
                        .update_operation_message(&operation.id, &message)
                        .await
                    {
                        warn!(operation_id = %operation.id, error = %e, "Failed to persist progress message");
                    }
                }
                return ExecutionOutcome::RequeueAfter(result.delay.max(MIN_RETRY_DELAY));
            }

            if result.next_stage != step.next_stage() {
                let error = StepError::InvalidTransition {
                    stage: operation.stage,
                    returned: result.next_stage,
                    expected: step.next_stage(),
                };
                return self.fail(&cluster, &operation, error).await;
            }

            let next = result.next_stage;
            let message = result
                .message
                .unwrap_or_else(|| format!("Operation in stage {next}"));

            if next == Stage::Finished {
                return self.succeed(&cluster, &operation, &message).await;
            }

            if let Err(e) = self
                .store
                .update_operation_stage(&operation.id, next, &message)
                .await
            {
                // The completed step is idempotent and simply runs again
                warn!(operation_id = %operation.id, stage = %next, error = %e, "Failed to persist stage transition");
                return ExecutionOutcome::RequeueAfter(self.store_retry_delay);
            }

            info!(
                operation_id = %operation.id,
                from = %operation.stage,
                to = %next,
                "Stage transition"
            );
            operation.stage = next;
            operation.message = message;
            operation.last_transition_timestamp = Utc::now();
        }

        let error = StepError::fatal(
            operation.stage,
            format!("stage chain did not reach Finished within {} steps", self.graph.len()),
        );
        self.fail(&cluster, &operation, error).await
    }
}
