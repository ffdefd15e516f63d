//! # Runtime Cluster Client
//!
//! Writes into a freshly provisioned runtime through its admin kubeconfig:
//! operator role bindings and the agent connection configuration.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use super::ClientResult;

pub const AGENT_NAMESPACE: &str = "compass-system";
pub const AGENT_CONFIG_SECRET: &str = "compass-agent-configuration";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterRoleBinding {
    pub name: String,
    pub cluster_role: String,
    pub group: String,
}

impl ClusterRoleBinding {
    pub fn for_group(cluster_role: impl Into<String>, group: impl Into<String>) -> Self {
        let cluster_role = cluster_role.into();
        let group = group.into();
        Self {
            name: format!("{}-{}", group.to_lowercase(), cluster_role),
            cluster_role,
            group,
        }
    }
}

/// Secret contents the runtime agent reads to connect to the Director
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfiguration {
    pub namespace: String,
    pub secret_name: String,
    pub connector_url: String,
    pub token: String,
    pub runtime_id: String,
    pub tenant: String,
}

impl AgentConfiguration {
    pub fn new(
        connector_url: impl Into<String>,
        token: impl Into<String>,
        runtime_id: impl Into<String>,
        tenant: impl Into<String>,
    ) -> Self {
        Self {
            namespace: AGENT_NAMESPACE.to_string(),
            secret_name: AGENT_CONFIG_SECRET.to_string(),
            connector_url: connector_url.into(),
            token: token.into(),
            runtime_id: runtime_id.into(),
            tenant: tenant.into(),
        }
    }
}

#[async_trait]
pub trait RuntimeClusterClient: Send + Sync + Debug {
    /// Create the binding, or leave it untouched if it already exists
    async fn ensure_cluster_role_binding(
        &self,
        kubeconfig: &str,
        binding: &ClusterRoleBinding,
    ) -> ClientResult<()>;

    /// Create or replace the agent configuration secret
    async fn upsert_agent_configuration(
        &self,
        kubeconfig: &str,
        configuration: &AgentConfiguration,
    ) -> ClientResult<()>;
}
