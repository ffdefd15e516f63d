//! In-process store used by tests and single-node development setups.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::store::{OperationStore, StoreResult};
use crate::errors::StoreError;
use crate::models::{Cluster, ClusterConfig, Operation, OperationState, Stage};

#[derive(Debug, Default)]
struct Inner {
    clusters: HashMap<String, Cluster>,
    operations: HashMap<String, Operation>,
    stage_history: HashMap<String, Vec<Stage>>,
}

#[derive(Debug, Default)]
pub struct InMemoryOperationStore {
    inner: Mutex<Inner>,
}

impl InMemoryOperationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicking writer leaves the maps consistent; every mutation is a single insert
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stages written through `update_operation_stage`, in order
    pub fn stage_history(&self, operation_id: &str) -> Vec<Stage> {
        self.lock()
            .stage_history
            .get(operation_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl OperationStore for InMemoryOperationStore {
    async fn get_operation(&self, operation_id: &str) -> StoreResult<Operation> {
        self.lock()
            .operations
            .get(operation_id)
            .cloned()
            .ok_or_else(|| StoreError::operation_not_found(operation_id))
    }

    async fn update_operation_stage(
        &self,
        operation_id: &str,
        stage: Stage,
        message: &str,
    ) -> StoreResult<()> {
        let mut inner = self.lock();
        let operation = inner
            .operations
            .get_mut(operation_id)
            .ok_or_else(|| StoreError::operation_not_found(operation_id))?;

        operation.stage = stage;
        operation.message = message.to_string();
        operation.last_transition_timestamp = Utc::now();

        inner
            .stage_history
            .entry(operation_id.to_string())
            .or_default()
            .push(stage);
        Ok(())
    }

    async fn update_operation_state(
        &self,
        operation_id: &str,
        state: OperationState,
        message: &str,
    ) -> StoreResult<()> {
        let mut inner = self.lock();
        let operation = inner
            .operations
            .get_mut(operation_id)
            .ok_or_else(|| StoreError::operation_not_found(operation_id))?;

        if operation.state.is_terminal() {
            return Err(StoreError::TerminalOperation {
                operation_id: operation_id.to_string(),
                state: operation.state.to_string(),
            });
        }

        let now = Utc::now();
        operation.state = state;
        operation.message = message.to_string();
        operation.last_transition_timestamp = now;
        if state.is_terminal() {
            operation.end_timestamp = Some(now);
        }
        Ok(())
    }

    async fn update_operation_message(&self, operation_id: &str, message: &str) -> StoreResult<()> {
        let mut inner = self.lock();
        let operation = inner
            .operations
            .get_mut(operation_id)
            .ok_or_else(|| StoreError::operation_not_found(operation_id))?;
        operation.message = message.to_string();
        Ok(())
    }

    async fn list_in_progress_operations(&self) -> StoreResult<Vec<Operation>> {
        let mut operations: Vec<Operation> = self
            .lock()
            .operations
            .values()
            .filter(|op| op.state == OperationState::InProgress)
            .cloned()
            .collect();
        operations.sort_by_key(|op| op.start_timestamp);
        Ok(operations)
    }

    async fn get_cluster(&self, cluster_id: &str) -> StoreResult<Cluster> {
        self.lock()
            .clusters
            .get(cluster_id)
            .cloned()
            .ok_or_else(|| StoreError::cluster_not_found(cluster_id))
    }

    async fn update_cluster_config(&self, cluster_id: &str, config: &ClusterConfig) -> StoreResult<()> {
        let mut inner = self.lock();
        let cluster = inner
            .clusters
            .get_mut(cluster_id)
            .ok_or_else(|| StoreError::cluster_not_found(cluster_id))?;
        cluster.cluster_config = config.clone();
        Ok(())
    }

    async fn insert_cluster(&self, cluster: &Cluster) -> StoreResult<()> {
        let mut inner = self.lock();
        if inner.clusters.contains_key(&cluster.id) {
            return Err(StoreError::AlreadyExists {
                entity: "cluster",
                id: cluster.id.clone(),
            });
        }
        inner.clusters.insert(cluster.id.clone(), cluster.clone());
        Ok(())
    }

    async fn insert_operation(&self, operation: &Operation) -> StoreResult<()> {
        let mut inner = self.lock();
        if !inner.clusters.contains_key(&operation.cluster_id) {
            return Err(StoreError::cluster_not_found(&operation.cluster_id));
        }
        if inner.operations.contains_key(&operation.id) {
            return Err(StoreError::AlreadyExists {
                entity: "operation",
                id: operation.id.clone(),
            });
        }
        if operation.state == OperationState::InProgress {
            if let Some(running) = inner.operations.values().find(|op| {
                op.cluster_id == operation.cluster_id && op.state == OperationState::InProgress
            }) {
                return Err(StoreError::OperationInProgress {
                    cluster_id: operation.cluster_id.clone(),
                    operation_id: running.id.clone(),
                });
            }
        }
        inner.operations.insert(operation.id.clone(), operation.clone());
        Ok(())
    }

    async fn get_last_operation(&self, cluster_id: &str) -> StoreResult<Option<Operation>> {
        Ok(self
            .lock()
            .operations
            .values()
            .filter(|op| op.cluster_id == cluster_id)
            .max_by_key(|op| op.start_timestamp)
            .cloned())
    }

    async fn mark_cluster_deleted(&self, cluster_id: &str) -> StoreResult<()> {
        let mut inner = self.lock();
        let cluster = inner
            .clusters
            .get_mut(cluster_id)
            .ok_or_else(|| StoreError::cluster_not_found(cluster_id))?;
        cluster.deleted = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OperationType;
    use crate::testing::sample_cluster;

    async fn seeded() -> (InMemoryOperationStore, Operation) {
        let store = InMemoryOperationStore::new();
        let cluster = sample_cluster("runtime-1");
        store.insert_cluster(&cluster).await.unwrap();
        let op = Operation::new(
            OperationType::Provision,
            &cluster.id,
            Stage::WaitingForClusterDomain,
            "Provisioning started",
        );
        store.insert_operation(&op).await.unwrap();
        (store, op)
    }

    #[tokio::test]
    async fn test_stage_update_records_history_and_timestamp() {
        let (store, op) = seeded().await;

        store
            .update_operation_stage(&op.id, Stage::WaitingForClusterCreation, "Waiting for creation")
            .await
            .unwrap();

        let stored = store.get_operation(&op.id).await.unwrap();
        assert_eq!(stored.stage, Stage::WaitingForClusterCreation);
        assert_eq!(stored.message, "Waiting for creation");
        assert!(stored.last_transition_timestamp >= op.last_transition_timestamp);
        assert_eq!(
            store.stage_history(&op.id),
            vec![Stage::WaitingForClusterCreation]
        );
    }

    #[tokio::test]
    async fn test_terminal_state_is_final() {
        let (store, op) = seeded().await;

        store
            .update_operation_state(&op.id, OperationState::Failed, "boom")
            .await
            .unwrap();
        let stored = store.get_operation(&op.id).await.unwrap();
        assert!(stored.end_timestamp.is_some());

        let err = store
            .update_operation_state(&op.id, OperationState::Succeeded, "late")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::TerminalOperation { .. }));
        assert!(store.list_in_progress_operations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_operation_requires_cluster() {
        let store = InMemoryOperationStore::new();
        let op = Operation::new(OperationType::Hibernate, "missing", Stage::StartingHibernation, "");
        let err = store.insert_operation(&op).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_one_in_progress_operation_per_cluster() {
        let (store, first) = seeded().await;
        let second = Operation::new(
            OperationType::Deprovision,
            &first.cluster_id,
            Stage::DeleteCluster,
            "",
        );

        match store.insert_operation(&second).await.unwrap_err() {
            StoreError::OperationInProgress {
                cluster_id,
                operation_id,
            } => {
                assert_eq!(cluster_id, "runtime-1");
                assert_eq!(operation_id, first.id);
            }
            other => panic!("unexpected error: {other}"),
        }

        // Other clusters are unaffected
        store.insert_cluster(&sample_cluster("runtime-2")).await.unwrap();
        let other = Operation::new(OperationType::Hibernate, "runtime-2", Stage::StartingHibernation, "");
        store.insert_operation(&other).await.unwrap();

        store
            .update_operation_state(&first.id, OperationState::Succeeded, "done")
            .await
            .unwrap();
        store.insert_operation(&second).await.unwrap();
        assert_eq!(store.list_in_progress_operations().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_last_operation_and_deletion() {
        let (store, first) = seeded().await;
        let mut second = Operation::new(
            OperationType::Deprovision,
            &first.cluster_id,
            Stage::DeleteCluster,
            "",
        );
        second.start_timestamp = first.start_timestamp + chrono::Duration::seconds(5);
        store
            .update_operation_state(&first.id, OperationState::Succeeded, "done")
            .await
            .unwrap();
        store.insert_operation(&second).await.unwrap();

        let last = store.get_last_operation("runtime-1").await.unwrap().unwrap();
        assert_eq!(last.id, second.id);
        assert!(store.get_last_operation("other").await.unwrap().is_none());

        store.mark_cluster_deleted("runtime-1").await.unwrap();
        assert!(store.get_cluster("runtime-1").await.unwrap().deleted);
    }
}
