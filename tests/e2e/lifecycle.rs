use anyhow::Result;

use runtime_provisioner::shared::clients::RuntimeStatusCondition;
use runtime_provisioner::shared::database::OperationStore;
use runtime_provisioner::shared::testing::{sample_config, ProvisionerCall, ShootBehavior};
use runtime_provisioner::{
    OperationState, OperationType, ProvisionerError, Stage, UpgradeRuntimeInput,
};

use crate::common::integration_test_utils::TestEnvironment;

#[tokio::test]
async fn test_upgrade_applies_desired_versions() -> Result<()> {
    let env = TestEnvironment::new(ShootBehavior::Ready);
    let cluster = env.seed_provisioned_cluster("runtime-1").await?;
    let mut handle = env.start().await?;

    let input = UpgradeRuntimeInput::builder()
        .kubernetes_version("1.30.1")
        .machine_image_version("1443.3.0")
        .build();
    let operation_id = handle.service().upgrade_runtime(&cluster.id, input).await?;
    let operation = env.wait_for_terminal(&operation_id).await?;

    assert_eq!(operation.state, OperationState::Succeeded);
    assert_eq!(operation.operation_type, OperationType::Upgrade);
    assert_eq!(env.provisioner.call_count(ProvisionerCall::Upgrade), 1);

    let shoot = env
        .provisioner
        .shoot(cluster.shoot_name())
        .expect("shoot exists");
    assert_eq!(shoot.kubernetes_version, "1.30.1");

    let stored = env.store.get_cluster(&cluster.id).await?;
    assert_eq!(stored.cluster_config.kubernetes_version, "1.30.1");
    assert_eq!(
        stored.cluster_config.machine_image_version.as_deref(),
        Some("1443.3.0")
    );
    assert_eq!(
        env.director.conditions_for(&cluster.id),
        vec![RuntimeStatusCondition::Connected]
    );

    handle.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_upgrade_waits_for_slow_reconcile() -> Result<()> {
    let env = TestEnvironment::new(ShootBehavior::SlowUpgrade { polls: 3 });
    let cluster = env.seed_provisioned_cluster("runtime-1").await?;
    let mut handle = env.start().await?;

    let input = UpgradeRuntimeInput::builder().kubernetes_version("1.30.1").build();
    let operation_id = handle.service().upgrade_runtime(&cluster.id, input).await?;
    let operation = env.wait_for_terminal(&operation_id).await?;

    assert_eq!(operation.state, OperationState::Succeeded);
    // One look before the upgrade, three while reconciling, one once reconciled
    assert_eq!(env.provisioner.call_count(ProvisionerCall::GetShoot), 5);
    assert_eq!(
        env.store.stage_history(&operation_id),
        vec![Stage::WaitingForShootUpgrade, Stage::Finished]
    );
    let shoot = env.provisioner.shoot(cluster.shoot_name()).expect("shoot exists");
    assert!(shoot.is_reconciled());

    handle.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_upgrade_shoot_recreates_operator_bindings() -> Result<()> {
    let env = TestEnvironment::new(ShootBehavior::Ready);
    let cluster = env.seed_provisioned_cluster("runtime-1").await?;
    let mut handle = env.start().await?;

    let mut config = sample_config(cluster.shoot_name());
    config.auto_scaler_max = 25;
    let operation_id = handle.service().upgrade_shoot(&cluster.id, config).await?;
    let operation = env.wait_for_terminal(&operation_id).await?;

    assert_eq!(operation.state, OperationState::Succeeded);
    assert_eq!(operation.operation_type, OperationType::UpgradeShoot);
    assert!(!env.runtime_client.bindings().is_empty());
    assert_eq!(
        env.store.get_cluster(&cluster.id).await?.cluster_config.auto_scaler_max,
        25
    );

    handle.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_hibernation() -> Result<()> {
    let env = TestEnvironment::new(ShootBehavior::Ready);
    let cluster = env.seed_provisioned_cluster("runtime-1").await?;
    let mut handle = env.start().await?;

    let operation_id = handle.service().hibernate_runtime(&cluster.id).await?;
    let operation = env.wait_for_terminal(&operation_id).await?;

    assert_eq!(operation.state, OperationState::Succeeded);
    assert!(env.provisioner.shoot(cluster.shoot_name()).is_some_and(|s| s.hibernated));
    assert_eq!(env.provisioner.call_count(ProvisionerCall::Hibernate), 1);
    assert_eq!(
        env.director.conditions_for(&cluster.id),
        vec![RuntimeStatusCondition::Disconnected]
    );

    handle.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_one_operation_per_runtime_at_a_time() -> Result<()> {
    let mut env = TestEnvironment::new(ShootBehavior::Stuck);
    // Keep the provisioning waiting on its domain for the whole test
    env.config.timeouts.provisioning.cluster_domain_seconds = 3600;
    let mut handle = env.start().await?;

    let input = runtime_provisioner::ProvisionRuntimeInput::builder()
        .runtime_id("runtime-1")
        .tenant("tenant-a")
        .cluster_config(sample_config("c-runtime-1"))
        .build();
    let provisioning = handle.service().provision_runtime(input).await?;

    match handle.service().hibernate_runtime("runtime-1").await {
        Err(ProvisionerError::OperationInProgress { operation_id, .. }) => {
            assert_eq!(operation_id, provisioning)
        }
        other => panic!("expected OperationInProgress, got {other:?}"),
    }

    let status = handle.service().runtime_status("runtime-1").await?;
    assert_eq!(
        status.last_operation.map(|op| op.state),
        Some(OperationState::InProgress)
    );

    handle.stop().await?;
    Ok(())
}
