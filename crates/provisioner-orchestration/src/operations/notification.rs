//! # Director Notification
//!
//! Reports terminal operation outcomes to the Director as runtime status
//! conditions. Delivery is retried with backoff; giving up is logged and never
//! changes the already persisted operation state.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use provisioner_shared::clients::{DirectorClient, RuntimeStatusCondition};
use provisioner_shared::config::DirectorConfig;
use provisioner_shared::retry::{retry_with_backoff, RetryConfig};
use provisioner_shared::{Cluster, OperationState, OperationType};

#[derive(Debug, Clone)]
pub struct DirectorNotifier {
    director: Arc<dyn DirectorClient>,
    retry: RetryConfig,
}

/// Condition the runtime ends up in after an operation of `operation_type` reaches `state`
pub fn condition_for(operation_type: OperationType, state: OperationState) -> Option<RuntimeStatusCondition> {
    match state {
        OperationState::InProgress => None,
        OperationState::Failed => Some(RuntimeStatusCondition::Failed),
        OperationState::Succeeded => Some(match operation_type {
            OperationType::Provision
            | OperationType::ProvisionNoInstall
            | OperationType::Upgrade
            | OperationType::UpgradeShoot => RuntimeStatusCondition::Connected,
            OperationType::Deprovision
            | OperationType::DeprovisionNoInstall
            | OperationType::Hibernate => RuntimeStatusCondition::Disconnected,
        }),
    }
}

impl DirectorNotifier {
    pub fn new(director: Arc<dyn DirectorClient>, retry: RetryConfig) -> Self {
        Self { director, retry }
    }

    pub fn from_config(director: Arc<dyn DirectorClient>, config: &DirectorConfig) -> Self {
        Self::new(
            director,
            RetryConfig {
                max_attempts: config.notification_max_attempts.max(1),
                initial_delay: Duration::from_millis(config.notification_initial_delay_ms),
                ..RetryConfig::default()
            },
        )
    }

    /// Returns whether the Director accepted the condition
    pub async fn notify(
        &self,
        cluster: &Cluster,
        operation_type: OperationType,
        state: OperationState,
    ) -> bool {
        let Some(condition) = condition_for(operation_type, state) else {
            return false;
        };

        let result = retry_with_backoff(&self.retry, "set_runtime_status_condition", || {
            self.director
                .set_runtime_status_condition(&cluster.id, &cluster.tenant, condition)
        })
        .await;

        match result {
            Ok(()) => {
                debug!(runtime_id = %cluster.id, condition = %condition, "Director notified");
                true
            }
            Err(e) => {
                warn!(
                    runtime_id = %cluster.id,
                    condition = %condition,
                    error = %e,
                    "Giving up on Director notification"
                );
                false
            }
        }
    }
}
