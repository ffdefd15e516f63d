//! # Provisioner Orchestration
//!
//! Drives runtime provisioning operations through their stage graphs.
//!
//! ## Architecture
//!
//! - **Steps** (`operations::stages`): one unit of work per stage, returning the
//!   next stage and a delay or an error
//! - **Stage graphs** (`operations::graph`): a validated `Stage → Step` table per
//!   operation type
//! - **Executor** (`operations::executor`): loads an operation, runs its steps,
//!   persists every transition and hands errors to the failure handler
//! - **Queues** (`operations::queue`, `operations::queue_set`): deduplicating
//!   work queues with delayed resubmission and a worker pool per type
//! - **Service** (`service`): creates operations and enqueues them
//! - **Bootstrap** (`bootstrap`): wiring, crash recovery and shutdown
//!
//! ## Example
//!
//! ```rust,no_run
//! use provisioner_orchestration::bootstrap::ProvisionerBootstrap;
//! use provisioner_orchestration::operations::Collaborators;
//! use provisioner_shared::config::ProvisionerConfig;
//!
//! # async fn example(collaborators: Collaborators) -> provisioner_shared::ProvisionerResult<()> {
//! let config = ProvisionerConfig::default();
//! let mut handle = ProvisionerBootstrap::start(&config, collaborators).await?;
//! // ... handle.service().provision_runtime(...)
//! handle.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod operations;
pub mod service;

pub use bootstrap::{ProvisionerBootstrap, ProvisionerHandle};
pub use service::{ProvisionRuntimeInput, ProvisioningService, RuntimeStatus, UpgradeRuntimeInput};
