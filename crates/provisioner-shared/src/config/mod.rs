//! # Provisioner Configuration
//!
//! Configuration for the stage executor, the operation queues and the
//! collaborators they talk to.
//!
//! ## Configuration Loading
//!
//! `ConfigManager::load()` reads the TOML file named by
//! `PROVISIONER_CONFIG_PATH` and layers environment overrides on top, using
//! `__` as the section separator:
//!
//! ```text
//! PROVISIONER__QUEUES__PROVISIONING_WORKERS=10
//! PROVISIONER__TIMEOUTS__PROVISIONING__CLUSTER_CREATION_SECONDS=5400
//! ```
//!
//! ## Example
//!
//! ```toml
//! [database]
//! url = "postgres://provisioner@localhost:5432/provisioner"
//!
//! [queues]
//! provisioning_workers = 5
//!
//! [timeouts.provisioning]
//! cluster_creation_seconds = 3600
//! ```

mod timeouts;

pub use timeouts::{
    DeprovisioningTimeouts, DeprovisioningTimeoutsConfig, HibernationTimeouts,
    HibernationTimeoutsConfig, ProvisioningTimeouts, ProvisioningTimeoutsConfig, TimeoutsConfig,
};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use validator::Validate;

use crate::models::OperationType;

/// Environment variable naming the TOML configuration file
pub const CONFIG_PATH_ENV: &str = "PROVISIONER_CONFIG_PATH";

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "PROVISIONER";

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("PROVISIONER_CONFIG_PATH is not set")]
    MissingConfigPath,

    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct ProvisionerConfig {
    #[validate(nested)]
    pub database: DatabaseConfig,
    #[validate(nested)]
    pub queues: QueueConfig,
    #[validate(nested)]
    pub timeouts: TimeoutsConfig,
    #[validate(nested)]
    pub polling: PollingConfig,
    pub operator_roles: OperatorRolesConfig,
    #[validate(nested)]
    pub director: DirectorConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    #[validate(range(min = 1, max = 500))]
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost:5432/provisioner".to_string(),
            max_connections: 10,
            acquire_timeout_seconds: 10,
            run_migrations: true,
        }
    }
}

/// Worker pool sizing, one pool per operation type
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct QueueConfig {
    #[validate(range(min = 1, max = 256))]
    pub provisioning_workers: usize,
    #[validate(range(min = 1, max = 256))]
    pub deprovisioning_workers: usize,
    #[validate(range(min = 1, max = 256))]
    pub upgrade_workers: usize,
    #[validate(range(min = 1, max = 256))]
    pub shoot_upgrade_workers: usize,
    #[validate(range(min = 1, max = 256))]
    pub hibernation_workers: usize,
    /// Delay before retrying an operation whose rows could not be read or written
    #[validate(range(min = 1))]
    pub store_retry_delay_ms: u64,
    pub shutdown_timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            provisioning_workers: 5,
            deprovisioning_workers: 5,
            upgrade_workers: 5,
            shoot_upgrade_workers: 5,
            hibernation_workers: 5,
            store_retry_delay_ms: 5_000,
            shutdown_timeout_ms: 30_000,
        }
    }
}

impl QueueConfig {
    pub fn workers_for(&self, operation_type: OperationType) -> usize {
        match operation_type {
            OperationType::Provision | OperationType::ProvisionNoInstall => {
                self.provisioning_workers
            }
            OperationType::Deprovision | OperationType::DeprovisionNoInstall => {
                self.deprovisioning_workers
            }
            OperationType::Upgrade => self.upgrade_workers,
            OperationType::UpgradeShoot => self.shoot_upgrade_workers,
            OperationType::Hibernate => self.hibernation_workers,
        }
    }

    pub fn store_retry_delay(&self) -> Duration {
        Duration::from_millis(self.store_retry_delay_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// How long steps wait before re-checking external state
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct PollingConfig {
    /// Delay for cheap checks and transient client errors
    #[validate(range(min = 1))]
    pub default_interval_ms: u64,
    /// Delay while waiting on Gardener to reconcile a Shoot
    #[validate(range(min = 1))]
    pub shoot_interval_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            default_interval_ms: 5_000,
            shoot_interval_ms: 20_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollIntervals {
    pub default: Duration,
    pub shoot: Duration,
}

impl From<&PollingConfig> for PollIntervals {
    fn from(config: &PollingConfig) -> Self {
        Self {
            default: Duration::from_millis(config.default_interval_ms),
            shoot: Duration::from_millis(config.shoot_interval_ms),
        }
    }
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self::from(&PollingConfig::default())
    }
}

/// Groups bound to cluster roles in every provisioned runtime
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct OperatorRolesConfig {
    pub enabled: bool,
    pub l2_group: String,
    pub l2_cluster_role: String,
    pub l3_group: String,
    pub l3_cluster_role: String,
}

impl Default for OperatorRolesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            l2_group: "runtimeOperator".to_string(),
            l2_cluster_role: "edit".to_string(),
            l3_group: "runtimeAdmin".to_string(),
            l3_cluster_role: "cluster-admin".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct DirectorConfig {
    pub url: String,
    #[validate(range(min = 1))]
    pub request_timeout_seconds: u64,
    /// Attempts for terminal status notifications before giving up
    #[validate(range(min = 1, max = 20))]
    pub notification_max_attempts: u32,
    pub notification_initial_delay_ms: u64,
}

impl Default for DirectorConfig {
    fn default() -> Self {
        Self {
            url: "http://compass-director.compass-system.svc.cluster.local:3000/graphql"
                .to_string(),
            request_timeout_seconds: 30,
            notification_max_attempts: 5,
            notification_initial_delay_ms: 500,
        }
    }
}

impl ProvisionerConfig {
    pub fn provisioning_timeouts(&self) -> ProvisioningTimeouts {
        ProvisioningTimeouts::from(&self.timeouts.provisioning)
    }

    pub fn deprovisioning_timeouts(&self) -> DeprovisioningTimeouts {
        DeprovisioningTimeouts::from(&self.timeouts.deprovisioning)
    }

    pub fn hibernation_timeouts(&self) -> HibernationTimeouts {
        HibernationTimeouts::from(&self.timeouts.hibernation)
    }

    pub fn poll_intervals(&self) -> PollIntervals {
        PollIntervals::from(&self.polling)
    }
}

/// Loads and validates `ProvisionerConfig`
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigManager;

impl ConfigManager {
    /// Load from the file named by `PROVISIONER_CONFIG_PATH`, loading `.env` first if present
    pub fn load() -> Result<ProvisionerConfig, ConfigurationError> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!(path = %path.display(), "Loaded .env file");
        }

        let path = std::env::var(CONFIG_PATH_ENV).map_err(|_| ConfigurationError::MissingConfigPath)?;
        Self::load_from_path(path)
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<ProvisionerConfig, ConfigurationError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigurationError::FileNotFound(path.to_path_buf()));
        }

        let config: ProvisionerConfig = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Toml))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;

        info!(
            path = %path.display(),
            provisioning_workers = config.queues.provisioning_workers,
            cluster_creation_timeout_seconds = config.timeouts.provisioning.cluster_creation_seconds,
            "Loaded provisioner configuration"
        );

        Ok(config)
    }

    /// Parse TOML without environment overrides
    pub fn from_toml_str(toml: &str) -> Result<ProvisionerConfig, ConfigurationError> {
        let config: ProvisionerConfig = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }
}
