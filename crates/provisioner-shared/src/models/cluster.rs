//! # Cluster
//!
//! The runtime a tenant owns. Survives across operations and is only ever
//! logically removed by a successful deprovisioning.

use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// Runtime identifier, shared with the Director
    pub id: String,
    pub tenant: String,
    pub sub_account_id: Option<String>,
    pub deleted: bool,
    pub creation_timestamp: DateTime<Utc>,
    pub cluster_config: ClusterConfig,
}

impl Cluster {
    pub fn new(
        id: impl Into<String>,
        tenant: impl Into<String>,
        sub_account_id: Option<String>,
        cluster_config: ClusterConfig,
    ) -> Self {
        Self {
            id: id.into(),
            tenant: tenant.into(),
            sub_account_id,
            deleted: false,
            creation_timestamp: Utc::now(),
            cluster_config,
        }
    }

    /// Name of the Gardener Shoot backing this runtime
    pub fn shoot_name(&self) -> &str {
        &self.cluster_config.name
    }
}

/// Desired Gardener infrastructure configuration.
///
/// Passed through to the infrastructure provisioner unchanged; provider
/// specific fields stay opaque JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
pub struct ClusterConfig {
    #[builder(into)]
    pub name: String,
    #[builder(into)]
    pub project_name: String,
    #[builder(into)]
    pub kubernetes_version: String,
    #[builder(into)]
    pub provider: String,
    #[builder(into)]
    pub region: String,
    #[builder(into)]
    pub machine_type: Option<String>,
    #[builder(into)]
    pub machine_image: Option<String>,
    #[builder(into)]
    pub machine_image_version: Option<String>,
    #[builder(into)]
    pub purpose: Option<String>,
    #[builder(default = 3)]
    #[serde(default = "default_auto_scaler_min")]
    pub auto_scaler_min: u32,
    #[builder(default = 10)]
    #[serde(default = "default_auto_scaler_max")]
    pub auto_scaler_max: u32,
    #[builder(default = 1)]
    #[serde(default = "default_max_surge")]
    pub max_surge: u32,
    #[builder(default)]
    #[serde(default)]
    pub max_unavailable: u32,
    pub volume_size_gb: Option<u32>,
    #[builder(default)]
    #[serde(default)]
    pub enable_kubernetes_version_auto_update: bool,
    #[builder(default)]
    #[serde(default)]
    pub enable_machine_image_version_auto_update: bool,
    pub provider_specific_config: Option<serde_json::Value>,
}

fn default_auto_scaler_min() -> u32 {
    3
}

fn default_auto_scaler_max() -> u32 {
    10
}

fn default_max_surge() -> u32 {
    1
}
