//! # Test Doubles
//!
//! In-process fakes for the external collaborators plus fixture helpers.
//! Each fake records the calls it receives and can be told to fail the next
//! N calls of a given kind.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use crate::clients::{
    AgentConfiguration, ClientError, ClientResult, ClusterRoleBinding, DirectorClient,
    HibernationStatus, LastOperation, LastOperationKind, LastOperationState, OneTimeToken,
    RuntimeClusterClient, RuntimeStatusCondition, RuntimeUpdate, ShootProvisioner, ShootStatus,
};
use crate::models::{Cluster, ClusterConfig};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn sample_config(name: &str) -> ClusterConfig {
    ClusterConfig::builder()
        .name(name)
        .project_name("frog")
        .kubernetes_version("1.29.4")
        .provider("gcp")
        .region("europe-west3")
        .machine_type("n2-standard-8")
        .build()
}

/// A cluster whose Shoot is named `c-<id>`
pub fn sample_cluster(id: &str) -> Cluster {
    Cluster::new(id, "tenant-a", Some("sub-1".to_string()), sample_config(&format!("c-{id}")))
}

/// How a Shoot created by `FakeShootProvisioner` behaves
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ShootBehavior {
    /// Reconciled with a domain as soon as it is created
    #[default]
    Ready,
    /// Never gets a domain and never finishes reconciling
    Stuck,
    /// Gardener reports the create operation as failed
    Fails,
    /// Created like `Ready`, but an upgrade stays in `Processing` for the
    /// given number of `get_shoot` polls before it reconciles
    SlowUpgrade { polls: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProvisionerCall {
    Provision,
    Deprovision,
    Upgrade,
    Hibernate,
    HibernationStatus,
    GetShoot,
    Kubeconfig,
}

#[derive(Debug, Default)]
struct ShootState {
    shoots: HashMap<String, ShootStatus>,
    calls: Vec<ProvisionerCall>,
    failures: HashMap<ProvisionerCall, VecDeque<ClientError>>,
    behavior: ShootBehavior,
    hibernation_impossible: bool,
    /// Polls left before an upgraded Shoot reconciles, by Shoot name
    pending_reconciles: HashMap<String, u32>,
}

#[derive(Debug, Default)]
pub struct FakeShootProvisioner {
    state: Mutex<ShootState>,
}

impl FakeShootProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behavior(behavior: ShootBehavior) -> Self {
        let fake = Self::default();
        lock(&fake.state).behavior = behavior;
        fake
    }

    /// Seed an existing Shoot, as if created by an earlier provisioning
    pub fn insert_shoot(&self, cluster: &Cluster) {
        let shoot = ready_shoot(&cluster.cluster_config);
        lock(&self.state).shoots.insert(shoot.name.clone(), shoot);
    }

    pub fn update_shoot(&self, name: &str, update: impl FnOnce(&mut ShootStatus)) {
        if let Some(shoot) = lock(&self.state).shoots.get_mut(name) {
            update(shoot);
        }
    }

    /// Delete a Shoot behind the provisioner's back
    pub fn remove_shoot(&self, name: &str) -> Option<ShootStatus> {
        lock(&self.state).shoots.remove(name)
    }

    pub fn shoot(&self, name: &str) -> Option<ShootStatus> {
        lock(&self.state).shoots.get(name).cloned()
    }

    /// Make the next call of `call` fail with `error`; repeat to queue several failures
    pub fn fail_next(&self, call: ProvisionerCall, error: ClientError) {
        lock(&self.state)
            .failures
            .entry(call)
            .or_default()
            .push_back(error);
    }

    pub fn set_hibernation_possible(&self, possible: bool) {
        lock(&self.state).hibernation_impossible = !possible;
    }

    pub fn calls(&self) -> Vec<ProvisionerCall> {
        lock(&self.state).calls.clone()
    }

    pub fn call_count(&self, call: ProvisionerCall) -> usize {
        lock(&self.state).calls.iter().filter(|c| **c == call).count()
    }

    fn record(&self, call: ProvisionerCall) -> ClientResult<MutexGuard<'_, ShootState>> {
        let mut state = lock(&self.state);
        state.calls.push(call);
        if let Some(error) = state.failures.get_mut(&call).and_then(VecDeque::pop_front) {
            return Err(error);
        }
        Ok(state)
    }
}

fn ready_shoot(config: &ClusterConfig) -> ShootStatus {
    ShootStatus {
        name: config.name.clone(),
        domain: Some(format!("{}.frog.shoot.example.com", config.name)),
        kubernetes_version: config.kubernetes_version.clone(),
        generation: 1,
        observed_generation: 1,
        last_operation: Some(LastOperation {
            kind: LastOperationKind::Create,
            state: LastOperationState::Succeeded,
            description: "Shoot cluster has been successfully reconciled.".to_string(),
        }),
        hibernated: false,
        config: config.clone(),
    }
}

fn finish_reconcile(shoot: &mut ShootStatus) {
    shoot.observed_generation = shoot.generation;
    shoot.last_operation = Some(LastOperation {
        kind: LastOperationKind::Reconcile,
        state: LastOperationState::Succeeded,
        description: "Shoot cluster has been successfully reconciled.".to_string(),
    });
}

fn not_found(cluster: &Cluster) -> ClientError {
    ClientError::not_found("Shoot", cluster.shoot_name())
}

#[async_trait]
impl ShootProvisioner for FakeShootProvisioner {
    async fn provision_cluster(&self, cluster: &Cluster, _operation_id: &str) -> ClientResult<()> {
        let mut state = self.record(ProvisionerCall::Provision)?;
        let mut shoot = ready_shoot(&cluster.cluster_config);
        match state.behavior {
            ShootBehavior::Ready | ShootBehavior::SlowUpgrade { .. } => {}
            ShootBehavior::Stuck => {
                shoot.domain = None;
                shoot.observed_generation = 0;
                if let Some(op) = shoot.last_operation.as_mut() {
                    op.state = LastOperationState::Processing;
                }
            }
            ShootBehavior::Fails => {
                if let Some(op) = shoot.last_operation.as_mut() {
                    op.state = LastOperationState::Failed;
                    op.description = "Quota exceeded".to_string();
                }
            }
        }
        state.shoots.insert(shoot.name.clone(), shoot);
        Ok(())
    }

    async fn deprovision_cluster(&self, cluster: &Cluster, _operation_id: &str) -> ClientResult<()> {
        let mut state = self.record(ProvisionerCall::Deprovision)?;
        state
            .shoots
            .remove(cluster.shoot_name())
            .map(|_| ())
            .ok_or_else(|| not_found(cluster))
    }

    async fn upgrade_cluster(&self, cluster: &Cluster, new_config: &ClusterConfig) -> ClientResult<()> {
        let mut guard = self.record(ProvisionerCall::Upgrade)?;
        let state = &mut *guard;
        let shoot = state
            .shoots
            .get_mut(cluster.shoot_name())
            .ok_or_else(|| not_found(cluster))?;
        shoot.generation += 1;
        shoot.kubernetes_version = new_config.kubernetes_version.clone();
        shoot.config = new_config.clone();

        match state.behavior {
            ShootBehavior::SlowUpgrade { polls } => {
                shoot.last_operation = Some(LastOperation {
                    kind: LastOperationKind::Reconcile,
                    state: LastOperationState::Processing,
                    description: "Reconciling workers".to_string(),
                });
                state.pending_reconciles.insert(shoot.name.clone(), polls);
            }
            _ => finish_reconcile(shoot),
        }
        Ok(())
    }

    async fn hibernate_cluster(&self, cluster: &Cluster) -> ClientResult<()> {
        let mut state = self.record(ProvisionerCall::Hibernate)?;
        let shoot = state
            .shoots
            .get_mut(cluster.shoot_name())
            .ok_or_else(|| not_found(cluster))?;
        shoot.hibernated = true;
        Ok(())
    }

    async fn get_hibernation_status(&self, cluster: &Cluster) -> ClientResult<HibernationStatus> {
        let state = self.record(ProvisionerCall::HibernationStatus)?;
        let shoot = state
            .shoots
            .get(cluster.shoot_name())
            .ok_or_else(|| not_found(cluster))?;
        Ok(HibernationStatus {
            hibernation_possible: !state.hibernation_impossible,
            hibernated: shoot.hibernated,
        })
    }

    async fn get_shoot(&self, cluster: &Cluster) -> ClientResult<Option<ShootStatus>> {
        let mut guard = self.record(ProvisionerCall::GetShoot)?;
        let state = &mut *guard;
        let name = cluster.shoot_name();
        match state.pending_reconciles.get(name).copied() {
            Some(0) => {
                state.pending_reconciles.remove(name);
                if let Some(shoot) = state.shoots.get_mut(name) {
                    finish_reconcile(shoot);
                }
            }
            Some(remaining) => {
                state.pending_reconciles.insert(name.to_string(), remaining - 1);
            }
            None => {}
        }
        Ok(state.shoots.get(name).cloned())
    }

    async fn get_kubeconfig(&self, cluster: &Cluster) -> ClientResult<String> {
        let state = self.record(ProvisionerCall::Kubeconfig)?;
        state
            .shoots
            .get(cluster.shoot_name())
            .map(|shoot| format!("kubeconfig-for-{}", shoot.name))
            .ok_or_else(|| not_found(cluster))
    }
}

#[derive(Debug, Default)]
struct DirectorState {
    conditions: Vec<(String, RuntimeStatusCondition)>,
    updates: Vec<(String, RuntimeUpdate)>,
    token_requests: Vec<String>,
    condition_failures: VecDeque<ClientError>,
    token_failures: VecDeque<ClientError>,
}

/// Director double that records every successful call
#[derive(Debug, Default)]
pub struct RecordingDirectorClient {
    state: Mutex<DirectorState>,
}

impl RecordingDirectorClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_condition(&self, error: ClientError) {
        lock(&self.state).condition_failures.push_back(error);
    }

    pub fn fail_next_token(&self, error: ClientError) {
        lock(&self.state).token_failures.push_back(error);
    }

    pub fn conditions(&self) -> Vec<(String, RuntimeStatusCondition)> {
        lock(&self.state).conditions.clone()
    }

    pub fn conditions_for(&self, runtime_id: &str) -> Vec<RuntimeStatusCondition> {
        lock(&self.state)
            .conditions
            .iter()
            .filter(|(id, _)| id == runtime_id)
            .map(|(_, condition)| *condition)
            .collect()
    }

    pub fn updates(&self) -> Vec<(String, RuntimeUpdate)> {
        lock(&self.state).updates.clone()
    }

    pub fn token_requests(&self) -> Vec<String> {
        lock(&self.state).token_requests.clone()
    }
}

#[async_trait]
impl DirectorClient for RecordingDirectorClient {
    async fn set_runtime_status_condition(
        &self,
        runtime_id: &str,
        _tenant: &str,
        condition: RuntimeStatusCondition,
    ) -> ClientResult<()> {
        let mut state = lock(&self.state);
        if let Some(error) = state.condition_failures.pop_front() {
            return Err(error);
        }
        state.conditions.push((runtime_id.to_string(), condition));
        Ok(())
    }

    async fn update_runtime(
        &self,
        runtime_id: &str,
        _tenant: &str,
        update: &RuntimeUpdate,
    ) -> ClientResult<()> {
        lock(&self.state)
            .updates
            .push((runtime_id.to_string(), update.clone()));
        Ok(())
    }

    async fn get_connection_token(&self, runtime_id: &str, _tenant: &str) -> ClientResult<OneTimeToken> {
        let mut state = lock(&self.state);
        if let Some(error) = state.token_failures.pop_front() {
            return Err(error);
        }
        state.token_requests.push(runtime_id.to_string());
        Ok(OneTimeToken {
            token: format!("token-{runtime_id}"),
            connector_url: "https://connector.example.com/graphql".to_string(),
        })
    }
}

#[derive(Debug, Default)]
struct RuntimeState {
    bindings: Vec<ClusterRoleBinding>,
    agent_configurations: Vec<AgentConfiguration>,
    binding_failures: VecDeque<ClientError>,
}

#[derive(Debug, Default)]
pub struct FakeRuntimeClusterClient {
    state: Mutex<RuntimeState>,
}

impl FakeRuntimeClusterClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_binding(&self, error: ClientError) {
        lock(&self.state).binding_failures.push_back(error);
    }

    pub fn bindings(&self) -> Vec<ClusterRoleBinding> {
        lock(&self.state).bindings.clone()
    }

    pub fn agent_configurations(&self) -> Vec<AgentConfiguration> {
        lock(&self.state).agent_configurations.clone()
    }
}

#[async_trait]
impl RuntimeClusterClient for FakeRuntimeClusterClient {
    async fn ensure_cluster_role_binding(
        &self,
        _kubeconfig: &str,
        binding: &ClusterRoleBinding,
    ) -> ClientResult<()> {
        let mut state = lock(&self.state);
        if let Some(error) = state.binding_failures.pop_front() {
            return Err(error);
        }
        if !state.bindings.contains(binding) {
            state.bindings.push(binding.clone());
        }
        Ok(())
    }

    async fn upsert_agent_configuration(
        &self,
        _kubeconfig: &str,
        configuration: &AgentConfiguration,
    ) -> ClientResult<()> {
        let mut state = lock(&self.state);
        state
            .agent_configurations
            .retain(|existing| existing.runtime_id != configuration.runtime_id);
        state.agent_configurations.push(configuration.clone());
        Ok(())
    }
}
