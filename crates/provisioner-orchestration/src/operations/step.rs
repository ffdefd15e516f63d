//! # Step Contract
//!
//! A step is one idempotent check-or-act cycle for a single stage. It either
//! reports where the operation goes next (possibly the same stage after a
//! delay) or returns a terminal `StepError`.

use async_trait::async_trait;
use chrono::Utc;
use std::fmt::Debug;
use std::time::Duration;
use thiserror::Error;

use provisioner_shared::clients::ClientError;
use provisioner_shared::{Cluster, Operation, OperationType, Stage, StoreError};

/// What a successful step run asks the executor to do next
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageResult {
    pub next_stage: Stage,
    /// Wait before re-running; only meaningful when `next_stage` is the current stage
    pub delay: Duration,
    pub message: Option<String>,
}

impl StageResult {
    pub fn advance(next_stage: Stage) -> Self {
        Self {
            next_stage,
            delay: Duration::ZERO,
            message: None,
        }
    }

    /// Stay in `stage` and run again after `delay`
    pub fn retry(stage: Stage, delay: Duration) -> Self {
        Self {
            next_stage: stage,
            delay,
            message: None,
        }
    }

    pub fn finished() -> Self {
        Self::advance(Stage::Finished)
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[derive(Debug, Error)]
pub enum StepError {
    #[error("{stage}: timeout after {elapsed:?} (limit {timeout:?})")]
    Timeout {
        stage: Stage,
        elapsed: Duration,
        timeout: Duration,
    },

    #[error("{stage}: {reason}")]
    Fatal { stage: Stage, reason: String },

    #[error("{stage}: {source}")]
    Client {
        stage: Stage,
        #[source]
        source: ClientError,
    },

    #[error("{stage}: {source}")]
    Store {
        stage: Stage,
        #[source]
        source: StoreError,
    },

    #[error("{stage}: step returned transition to {returned}, expected {expected}")]
    InvalidTransition {
        stage: Stage,
        returned: Stage,
        expected: Stage,
    },

    #[error("no step registered for stage {stage} of {operation_type}")]
    UnknownStage {
        stage: Stage,
        operation_type: OperationType,
    },
}

impl StepError {
    pub fn fatal(stage: Stage, reason: impl Into<String>) -> Self {
        Self::Fatal {
            stage,
            reason: reason.into(),
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            StepError::Timeout { stage, .. }
            | StepError::Fatal { stage, .. }
            | StepError::Client { stage, .. }
            | StepError::Store { stage, .. }
            | StepError::InvalidTransition { stage, .. }
            | StepError::UnknownStage { stage, .. } => *stage,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, StepError::Timeout { .. })
    }
}

/// Which timestamp a step measures its timeout from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutReference {
    OperationStart,
    StageEntry,
}

impl TimeoutReference {
    pub fn elapsed(&self, operation: &Operation) -> Duration {
        let now = Utc::now();
        match self {
            TimeoutReference::OperationStart => operation.elapsed_since_start(now),
            TimeoutReference::StageEntry => operation.time_in_stage(now),
        }
    }
}

/// Fail with `Timeout` once the budget measured from `reference` is spent
pub fn check_timeout(
    operation: &Operation,
    stage: Stage,
    timeout: Duration,
    reference: TimeoutReference,
) -> Result<(), StepError> {
    let elapsed = reference.elapsed(operation);
    if elapsed > timeout {
        return Err(StepError::Timeout {
            stage,
            elapsed,
            timeout,
        });
    }
    Ok(())
}

/// Recoverable client errors become a delayed retry of `stage`, everything else is fatal
pub fn classify_client_error(
    stage: Stage,
    error: ClientError,
    retry_delay: Duration,
) -> Result<StageResult, StepError> {
    if error.is_recoverable() {
        return Ok(StageResult::retry(stage, retry_delay)
            .with_message(format!("Retrying after transient error: {error}")));
    }
    Err(StepError::Client {
        stage,
        source: error,
    })
}

/// Database errors are retried after `retry_delay`; missing rows are fatal
pub fn classify_store_error(
    stage: Stage,
    error: StoreError,
    retry_delay: Duration,
) -> Result<StageResult, StepError> {
    match error {
        StoreError::Database(ref e) if !matches!(e, sqlx::Error::RowNotFound) => {
            Ok(StageResult::retry(stage, retry_delay)
                .with_message(format!("Retrying after store error: {error}")))
        }
        other => Err(StepError::Store {
            stage,
            source: other,
        }),
    }
}

#[async_trait]
pub trait Step: Send + Sync + Debug {
    /// Stage this step executes
    fn name(&self) -> Stage;

    /// The only stage, other than its own, this step may transition to
    fn next_stage(&self) -> Stage;

    fn timeout(&self) -> Duration;

    async fn run(&self, cluster: &Cluster, operation: &Operation) -> Result<StageResult, StepError>;
}
