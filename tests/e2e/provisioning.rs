use anyhow::Result;
use chrono::Utc;

use runtime_provisioner::shared::clients::RuntimeStatusCondition;
use runtime_provisioner::shared::database::OperationStore;
use runtime_provisioner::shared::testing::{
    sample_cluster, sample_config, ProvisionerCall, ShootBehavior,
};
use runtime_provisioner::{
    Operation, OperationState, OperationType, ProvisionRuntimeInput, Stage,
};

use crate::common::integration_test_utils::TestEnvironment;

#[tokio::test]
async fn test_provisioning_happy_path() -> Result<()> {
    let env = TestEnvironment::new(ShootBehavior::Ready);
    let mut handle = env.start().await?;

    let input = ProvisionRuntimeInput::builder()
        .runtime_id("runtime-1")
        .tenant("tenant-a")
        .cluster_config(sample_config("c-runtime-1"))
        .build();
    let operation_id = handle.service().provision_runtime(input).await?;

    let operation = env.wait_for_terminal(&operation_id).await?;
    assert_eq!(operation.state, OperationState::Succeeded);
    assert_eq!(operation.stage, Stage::Finished);

    assert_eq!(
        env.store.stage_history(&operation_id),
        vec![
            Stage::WaitingForClusterCreation,
            Stage::CreatingBindingsForOperators,
            Stage::ConnectRuntimeAgent,
            Stage::Finished,
        ]
    );

    let conditions = env.director.conditions_for("runtime-1");
    assert_eq!(
        conditions,
        vec![
            RuntimeStatusCondition::Provisioning,
            RuntimeStatusCondition::Connected
        ]
    );
    assert_eq!(env.provisioner.call_count(ProvisionerCall::Provision), 1);
    assert_eq!(env.runtime_client.agent_configurations().len(), 1);

    let stats = handle.queues().statistics();
    assert_eq!(stats[&OperationType::Provision].succeeded, 1);
    assert_eq!(stats[&OperationType::Provision].failed, 0);

    handle.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_creation_timeout_fails_operation() -> Result<()> {
    let env = TestEnvironment::new(ShootBehavior::Stuck);
    let cluster = sample_cluster("runtime-1");
    env.store.insert_cluster(&cluster).await?;
    env.provisioner.insert_shoot(&cluster);
    env.provisioner.update_shoot(cluster.shoot_name(), |shoot| {
        shoot.observed_generation = 0;
    });

    // Started long before the creation timeout
    let mut operation = Operation::new(
        OperationType::Provision,
        &cluster.id,
        Stage::WaitingForClusterCreation,
        "Waiting for cluster creation",
    );
    operation.start_timestamp = Utc::now() - chrono::Duration::hours(3);
    env.store.insert_operation(&operation).await?;

    let mut handle = env.start().await?;
    let finished = env.wait_for_terminal(&operation.id).await?;

    assert_eq!(finished.state, OperationState::Failed);
    assert_eq!(finished.stage, Stage::WaitingForClusterCreation);
    assert!(finished.message.contains("timed out") || finished.message.contains("timeout"));
    assert_eq!(
        env.director.conditions_for("runtime-1"),
        vec![RuntimeStatusCondition::Failed]
    );

    // Stays failed: a later add is a no-op for the executor
    handle.queues().add(&finished);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let again = env.store.get_operation(&operation.id).await?;
    assert_eq!(again.state, OperationState::Failed);
    assert_eq!(again.end_timestamp, finished.end_timestamp);

    let stats = handle.queues().statistics();
    assert_eq!(stats[&OperationType::Provision].failed, 1);

    handle.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_gardener_failure_is_fatal() -> Result<()> {
    let env = TestEnvironment::new(ShootBehavior::Fails);
    let mut handle = env.start().await?;

    let input = ProvisionRuntimeInput::builder()
        .runtime_id("runtime-1")
        .tenant("tenant-a")
        .cluster_config(sample_config("c-runtime-1"))
        .no_install(true)
        .build();
    let operation_id = handle.service().provision_runtime(input).await?;

    let operation = env.wait_for_terminal(&operation_id).await?;
    assert_eq!(operation.state, OperationState::Failed);
    assert_eq!(operation.operation_type, OperationType::ProvisionNoInstall);
    assert!(operation.message.contains("Quota exceeded"));

    handle.stop().await?;
    Ok(())
}
