//! Startup recovery: re-enqueue every operation still `InProgress`.
//!
//! Uses the same `add` path as newly created operations, so running it twice
//! or while the queues are live only coalesces.

use std::collections::HashMap;
use tracing::info;

use provisioner_shared::database::OperationStore;
use provisioner_shared::{OperationType, StoreError};

use super::queue_set::QueueSet;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// In-progress operations found in the store
    pub found: usize,
    /// Operations newly scheduled by this call
    pub enqueued: usize,
    pub by_type: HashMap<OperationType, usize>,
}

pub async fn recover_in_progress_operations(
    store: &dyn OperationStore,
    queues: &QueueSet,
) -> Result<RecoveryReport, StoreError> {
    let operations = store.list_in_progress_operations().await?;

    let mut report = RecoveryReport {
        found: operations.len(),
        ..Default::default()
    };
    for operation in &operations {
        if queues.add(operation) {
            report.enqueued += 1;
        }
        *report.by_type.entry(operation.operation_type).or_default() += 1;
    }

    info!(
        found = report.found,
        enqueued = report.enqueued,
        "Recovered in-progress operations"
    );
    Ok(report)
}
