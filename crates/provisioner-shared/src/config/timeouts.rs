//! # Stage Timeouts
//!
//! TOML carries whole seconds; steps consume `Duration`s. The `*Config`
//! structs are the serde shape, the plain structs are what step constructors
//! take.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct ProvisioningTimeoutsConfig {
    #[validate(range(min = 1))]
    pub cluster_domain_seconds: u64,
    #[validate(range(min = 1))]
    pub cluster_creation_seconds: u64,
    #[validate(range(min = 1))]
    pub bindings_creation_seconds: u64,
    #[validate(range(min = 1))]
    pub agent_configuration_seconds: u64,
    #[validate(range(min = 1))]
    pub upgrade_triggering_seconds: u64,
    #[validate(range(min = 1))]
    pub shoot_refresh_seconds: u64,
    #[validate(range(min = 1))]
    pub shoot_upgrade_seconds: u64,
}

impl Default for ProvisioningTimeoutsConfig {
    fn default() -> Self {
        Self {
            cluster_domain_seconds: 5 * 60,
            cluster_creation_seconds: 60 * 60,
            bindings_creation_seconds: 5 * 60,
            agent_configuration_seconds: 15 * 60,
            upgrade_triggering_seconds: 20 * 60,
            shoot_refresh_seconds: 5 * 60,
            shoot_upgrade_seconds: 30 * 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct DeprovisioningTimeoutsConfig {
    #[validate(range(min = 1))]
    pub cluster_deletion_seconds: u64,
    #[validate(range(min = 1))]
    pub waiting_for_cluster_deletion_seconds: u64,
}

impl Default for DeprovisioningTimeoutsConfig {
    fn default() -> Self {
        Self {
            cluster_deletion_seconds: 30 * 60,
            waiting_for_cluster_deletion_seconds: 60 * 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct HibernationTimeoutsConfig {
    #[validate(range(min = 1))]
    pub hibernation_triggering_seconds: u64,
    #[validate(range(min = 1))]
    pub waiting_for_cluster_hibernation_seconds: u64,
}

impl Default for HibernationTimeoutsConfig {
    fn default() -> Self {
        Self {
            hibernation_triggering_seconds: 5 * 60,
            waiting_for_cluster_hibernation_seconds: 60 * 60,
        }
    }
}

/// Container for the three timeout groups, `[timeouts.*]` in TOML
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct TimeoutsConfig {
    #[validate(nested)]
    pub provisioning: ProvisioningTimeoutsConfig,
    #[validate(nested)]
    pub deprovisioning: DeprovisioningTimeoutsConfig,
    #[validate(nested)]
    pub hibernation: HibernationTimeoutsConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProvisioningTimeouts {
    pub cluster_domain: Duration,
    pub cluster_creation: Duration,
    pub bindings_creation: Duration,
    pub agent_configuration: Duration,
    pub upgrade_triggering: Duration,
    pub shoot_refresh: Duration,
    pub shoot_upgrade: Duration,
}

impl From<&ProvisioningTimeoutsConfig> for ProvisioningTimeouts {
    fn from(config: &ProvisioningTimeoutsConfig) -> Self {
        Self {
            cluster_domain: Duration::from_secs(config.cluster_domain_seconds),
            cluster_creation: Duration::from_secs(config.cluster_creation_seconds),
            bindings_creation: Duration::from_secs(config.bindings_creation_seconds),
            agent_configuration: Duration::from_secs(config.agent_configuration_seconds),
            upgrade_triggering: Duration::from_secs(config.upgrade_triggering_seconds),
            shoot_refresh: Duration::from_secs(config.shoot_refresh_seconds),
            shoot_upgrade: Duration::from_secs(config.shoot_upgrade_seconds),
        }
    }
}

impl Default for ProvisioningTimeouts {
    fn default() -> Self {
        Self::from(&ProvisioningTimeoutsConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeprovisioningTimeouts {
    pub cluster_deletion: Duration,
    pub waiting_for_cluster_deletion: Duration,
}

impl From<&DeprovisioningTimeoutsConfig> for DeprovisioningTimeouts {
    fn from(config: &DeprovisioningTimeoutsConfig) -> Self {
        Self {
            cluster_deletion: Duration::from_secs(config.cluster_deletion_seconds),
            waiting_for_cluster_deletion: Duration::from_secs(
                config.waiting_for_cluster_deletion_seconds,
            ),
        }
    }
}

impl Default for DeprovisioningTimeouts {
    fn default() -> Self {
        Self::from(&DeprovisioningTimeoutsConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HibernationTimeouts {
    pub hibernation_triggering: Duration,
    pub waiting_for_cluster_hibernation: Duration,
}

impl From<&HibernationTimeoutsConfig> for HibernationTimeouts {
    fn from(config: &HibernationTimeoutsConfig) -> Self {
        Self {
            hibernation_triggering: Duration::from_secs(config.hibernation_triggering_seconds),
            waiting_for_cluster_hibernation: Duration::from_secs(
                config.waiting_for_cluster_hibernation_seconds,
            ),
        }
    }
}

impl Default for HibernationTimeouts {
    fn default() -> Self {
        Self::from(&HibernationTimeoutsConfig::default())
    }
}
