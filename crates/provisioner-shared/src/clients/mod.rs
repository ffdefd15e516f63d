//! # External Collaborators
//!
//! Traits for the systems the provisioner drives. Steps only ever see these
//! traits; concrete implementations are injected at bootstrap.

pub mod director;
pub mod error;
pub mod provisioner;
pub mod runtime;

pub use director::{DirectorClient, HttpDirectorClient, OneTimeToken, RuntimeStatusCondition, RuntimeUpdate};
pub use error::{ClientError, ClientResult};
pub use provisioner::{
    HibernationStatus, LastOperation, LastOperationKind, LastOperationState, ShootProvisioner,
    ShootStatus,
};
pub use runtime::{AgentConfiguration, ClusterRoleBinding, RuntimeClusterClient};
