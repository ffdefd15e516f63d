//! # Provisioner Shared
//!
//! Shared building blocks for the runtime provisioner: domain models, the
//! Operation Store contract and its implementations, external collaborator
//! contracts (Gardener, Director, runtime cluster), configuration loading,
//! logging and retry helpers.
//!
//! The orchestration crate builds the stage executor and operation queues on
//! top of these types; nothing in this crate knows about stage graphs.

pub mod clients;
pub mod config;
pub mod database;
pub mod errors;
pub mod logging;
pub mod models;
pub mod retry;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use errors::{ProvisionerError, ProvisionerResult, StoreError};
pub use models::{Cluster, ClusterConfig, Operation, OperationState, OperationType, Stage};
