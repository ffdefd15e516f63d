//! # Domain Models
//!
//! Persisted records (`Operation`, `Cluster`) and the closed set of stage and
//! operation type names that the stage graphs are keyed by.

pub mod cluster;
pub mod operation;
pub mod stage;

pub use cluster::{Cluster, ClusterConfig};
pub use operation::{Operation, OperationState, OperationType};
pub use stage::Stage;

/// Error returned when a persisted name does not map to a known variant
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseNameError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseNameError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
