//! # Error Types
//!
//! Layered error enums for the provisioner. Store and client failures keep
//! their own types so callers can classify them; `ProvisionerError` is what
//! the service and bootstrap surface.

use thiserror::Error;

use crate::clients::ClientError;
use crate::config::ConfigurationError;
use crate::models::ParseNameError;

pub type ProvisionerResult<T> = Result<T, ProvisionerError>;

#[derive(Debug, Error)]
pub enum ProvisionerError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    #[error("Runtime not found: {runtime_id}")]
    RuntimeNotFound { runtime_id: String },

    #[error("Operation {operation_id} is still in progress for runtime {runtime_id}")]
    OperationInProgress {
        runtime_id: String,
        operation_id: String,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProvisionerError {
    pub fn runtime_not_found(runtime_id: impl Into<String>) -> Self {
        Self::RuntimeNotFound {
            runtime_id: runtime_id.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }
}

/// Errors raised by Operation Store implementations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} already exists: {id}")]
    AlreadyExists { entity: &'static str, id: String },

    #[error("Operation {operation_id} is already {state} and cannot be modified")]
    TerminalOperation { operation_id: String, state: String },

    #[error("Cluster {cluster_id} already has operation {operation_id} in progress")]
    OperationInProgress {
        cluster_id: String,
        operation_id: String,
    },

    #[error("Invalid persisted value: {0}")]
    InvalidData(#[from] ParseNameError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn operation_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: "operation",
            id: id.into(),
        }
    }

    pub fn cluster_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: "cluster",
            id: id.into(),
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
            || matches!(self, StoreError::Database(sqlx::Error::RowNotFound))
    }
}
