//! # Operation Store
//!
//! Durable record of clusters and their operations. Every stage transition
//! is written here before the next stage runs, so the store alone is enough
//! to resume work after a restart.

use async_trait::async_trait;
use std::fmt::Debug;

use crate::errors::StoreError;
use crate::models::{Cluster, ClusterConfig, Operation, OperationState, Stage};

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait OperationStore: Send + Sync + Debug {
    async fn get_operation(&self, operation_id: &str) -> StoreResult<Operation>;

    /// Move the operation to `stage`, resetting its stage-entry timestamp
    async fn update_operation_stage(
        &self,
        operation_id: &str,
        stage: Stage,
        message: &str,
    ) -> StoreResult<()>;

    /// Finalize the operation. Rejects updates to an operation that is already terminal.
    async fn update_operation_state(
        &self,
        operation_id: &str,
        state: OperationState,
        message: &str,
    ) -> StoreResult<()>;

    /// Replace the progress message without a stage transition
    async fn update_operation_message(&self, operation_id: &str, message: &str) -> StoreResult<()>;

    async fn list_in_progress_operations(&self) -> StoreResult<Vec<Operation>>;

    async fn get_cluster(&self, cluster_id: &str) -> StoreResult<Cluster>;

    async fn update_cluster_config(&self, cluster_id: &str, config: &ClusterConfig) -> StoreResult<()>;

    async fn insert_cluster(&self, cluster: &Cluster) -> StoreResult<()>;

    async fn insert_operation(&self, operation: &Operation) -> StoreResult<()>;

    /// Most recently started operation for the cluster
    async fn get_last_operation(&self, cluster_id: &str) -> StoreResult<Option<Operation>>;

    async fn mark_cluster_deleted(&self, cluster_id: &str) -> StoreResult<()>;
}
