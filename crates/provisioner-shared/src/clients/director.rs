//! # Director Client
//!
//! The Director is the external registry of runtimes. The provisioner
//! reports lifecycle conditions to it and obtains one-time tokens that the
//! runtime agent uses to connect back.

use async_trait::async_trait;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::{ClientError, ClientResult};
use crate::config::DirectorConfig;

/// Header carrying the tenant on every Director request
pub const TENANT_HEADER: &str = "Tenant";

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuntimeStatusCondition {
    #[display("INITIAL")]
    Initial,
    #[display("PROVISIONING")]
    Provisioning,
    #[display("CONNECTED")]
    Connected,
    #[display("FAILED")]
    Failed,
    #[display("DISCONNECTED")]
    Disconnected,
}

/// Label changes applied to a runtime after provisioning
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OneTimeToken {
    pub token: String,
    pub connector_url: String,
}

#[async_trait]
pub trait DirectorClient: Send + Sync + Debug {
    async fn set_runtime_status_condition(
        &self,
        runtime_id: &str,
        tenant: &str,
        condition: RuntimeStatusCondition,
    ) -> ClientResult<()>;

    async fn update_runtime(
        &self,
        runtime_id: &str,
        tenant: &str,
        update: &RuntimeUpdate,
    ) -> ClientResult<()>;

    async fn get_connection_token(&self, runtime_id: &str, tenant: &str) -> ClientResult<OneTimeToken>;
}

/// GraphQL implementation over HTTP
#[derive(Debug, Clone)]
pub struct HttpDirectorClient {
    client: reqwest::Client,
    url: String,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenData {
    request_one_time_token_for_runtime: OneTimeToken,
}

impl HttpDirectorClient {
    pub fn new(config: &DirectorConfig) -> ClientResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }

    async fn execute<T: for<'de> Deserialize<'de>>(
        &self,
        tenant: &str,
        query: String,
    ) -> ClientResult<Option<T>> {
        let response = self
            .client
            .post(&self.url)
            .header(TENANT_HEADER, tenant)
            .json(&json!({ "query": query }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), url = %self.url, "Director returned error status");
            return Err(ClientError::api(status.as_u16(), message));
        }

        let body: GraphQlResponse<T> = response.json().await?;
        if let Some(first) = body.errors.first() {
            let joined = body
                .errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            if first.message.to_lowercase().contains("not found") {
                return Err(ClientError::not_found("Runtime", joined));
            }
            return Err(ClientError::api(200, joined));
        }

        Ok(body.data)
    }
}

fn labels_literal(labels: &BTreeMap<String, String>) -> ClientResult<String> {
    // GraphQL input objects take unquoted keys; values are JSON scalars
    let entries = labels
        .iter()
        .map(|(k, v)| Ok(format!("{}: {}", serde_json::to_string(k)?, serde_json::to_string(v)?)))
        .collect::<Result<Vec<_>, serde_json::Error>>()?;
    Ok(format!("{{{}}}", entries.join(", ")))
}

#[async_trait]
impl DirectorClient for HttpDirectorClient {
    #[instrument(skip(self), fields(condition = %condition))]
    async fn set_runtime_status_condition(
        &self,
        runtime_id: &str,
        tenant: &str,
        condition: RuntimeStatusCondition,
    ) -> ClientResult<()> {
        let query = format!(
            r#"mutation {{ result: updateRuntime(id: {id}, in: {{ statusCondition: {condition} }}) {{ id }} }}"#,
            id = serde_json::to_string(runtime_id)?,
        );
        self.execute::<serde_json::Value>(tenant, query).await?;
        debug!(runtime_id = %runtime_id, "Runtime status condition updated");
        Ok(())
    }

    #[instrument(skip(self, update))]
    async fn update_runtime(
        &self,
        runtime_id: &str,
        tenant: &str,
        update: &RuntimeUpdate,
    ) -> ClientResult<()> {
        let mut fields = vec![format!("labels: {}", labels_literal(&update.labels)?)];
        if let Some(name) = &update.name {
            fields.push(format!("name: {}", serde_json::to_string(name)?));
        }
        if let Some(description) = &update.description {
            fields.push(format!("description: {}", serde_json::to_string(description)?));
        }

        let query = format!(
            r#"mutation {{ result: updateRuntime(id: {id}, in: {{ {fields} }}) {{ id }} }}"#,
            id = serde_json::to_string(runtime_id)?,
            fields = fields.join(", "),
        );
        self.execute::<serde_json::Value>(tenant, query).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_connection_token(&self, runtime_id: &str, tenant: &str) -> ClientResult<OneTimeToken> {
        let query = format!(
            r#"mutation {{ requestOneTimeTokenForRuntime(id: {id}) {{ token connectorURL: connectorUrl }} }}"#,
            id = serde_json::to_string(runtime_id)?,
        );
        let data: Option<TokenData> = self.execute(tenant, query).await?;

        data.map(|d| d.request_one_time_token_for_runtime)
            .ok_or_else(|| ClientError::invalid_response("requestOneTimeTokenForRuntime", "missing data"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_wire_names() {
        assert_eq!(RuntimeStatusCondition::Connected.to_string(), "CONNECTED");
        assert_eq!(
            serde_json::to_value(RuntimeStatusCondition::Disconnected).unwrap(),
            json!("DISCONNECTED")
        );
    }

    #[test]
    fn test_labels_literal_escapes_values() {
        let mut labels = BTreeMap::new();
        labels.insert("gardenerClusterName".to_string(), "c-\"1\"".to_string());
        labels.insert("isManagedByProvisioner".to_string(), "true".to_string());

        let literal = labels_literal(&labels).unwrap();
        assert_eq!(
            literal,
            r#"{"gardenerClusterName": "c-\"1\"", "isManagedByProvisioner": "true"}"#
        );
    }

    #[test]
    fn test_graphql_errors_deserialize() {
        let body: GraphQlResponse<serde_json::Value> = serde_json::from_value(json!({
            "data": null,
            "errors": [{"message": "Object not found"}]
        }))
        .unwrap();
        assert!(body.data.is_none());
        assert_eq!(body.errors[0].message, "Object not found");
    }

    #[test]
    fn test_client_builds_from_config() {
        assert!(HttpDirectorClient::new(&DirectorConfig::default()).is_ok());
    }
}
