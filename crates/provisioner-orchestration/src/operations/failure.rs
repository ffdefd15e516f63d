//! # Failure Handling
//!
//! Hook invoked once per operation right before it is persisted as `Failed`.
//! Implementations may clean up or alert; they cannot rescue the operation.

use async_trait::async_trait;
use std::fmt::Debug;
use tracing::error;

use provisioner_shared::{Cluster, Operation, Stage};

use super::step::StepError;

#[async_trait]
pub trait FailureHandler: Send + Sync + Debug {
    async fn handle(&self, cluster: &Cluster, operation: &Operation, stage: Stage, error: &StepError);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopFailureHandler;

#[async_trait]
impl FailureHandler for NoopFailureHandler {
    async fn handle(&self, _: &Cluster, _: &Operation, _: Stage, _: &StepError) {}
}

/// Default handler: one structured error event per failed operation
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingFailureHandler;

#[async_trait]
impl FailureHandler for LoggingFailureHandler {
    async fn handle(&self, cluster: &Cluster, operation: &Operation, stage: Stage, error: &StepError) {
        error!(
            operation_id = %operation.id,
            operation_type = %operation.operation_type,
            runtime_id = %cluster.id,
            tenant = %cluster.tenant,
            shoot = %cluster.shoot_name(),
            stage = %stage,
            timeout = error.is_timeout(),
            error = %error,
            "Operation failed"
        );
    }
}
