use anyhow::Result;

use runtime_provisioner::shared::clients::RuntimeStatusCondition;
use runtime_provisioner::shared::testing::{ProvisionerCall, ShootBehavior};
use runtime_provisioner::{OperationState, OperationType, ProvisionerError, Stage};

use crate::common::integration_test_utils::TestEnvironment;

#[tokio::test]
async fn test_deprovisioning_deletes_shoot() -> Result<()> {
    let env = TestEnvironment::new(ShootBehavior::Ready);
    let cluster = env.seed_provisioned_cluster("runtime-1").await?;
    let mut handle = env.start().await?;

    let operation_id = handle.service().deprovision_runtime(&cluster.id).await?;
    let operation = env.wait_for_terminal(&operation_id).await?;

    assert_eq!(operation.state, OperationState::Succeeded);
    assert_eq!(operation.operation_type, OperationType::Deprovision);
    assert_eq!(env.provisioner.call_count(ProvisionerCall::Deprovision), 1);
    assert!(env.provisioner.shoot(cluster.shoot_name()).is_none());

    let status = handle.service().runtime_status(&cluster.id).await?;
    assert!(status.cluster.deleted);
    assert_eq!(
        env.director.conditions_for(&cluster.id),
        vec![RuntimeStatusCondition::Disconnected]
    );

    // A deleted runtime accepts no further operations
    assert!(matches!(
        handle.service().deprovision_runtime(&cluster.id).await,
        Err(ProvisionerError::RuntimeNotFound { .. })
    ));

    handle.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_deprovisioning_already_deleted_shoot() -> Result<()> {
    let env = TestEnvironment::new(ShootBehavior::Ready);
    let cluster = env.seed_provisioned_cluster("runtime-1").await?;
    // Removed out of band
    assert!(env.provisioner.remove_shoot(cluster.shoot_name()).is_some());

    let mut handle = env.start().await?;
    let operation_id = handle.service().deprovision_runtime(&cluster.id).await?;
    let operation = env.wait_for_terminal(&operation_id).await?;

    assert_eq!(operation.state, OperationState::Succeeded);
    assert_eq!(env.provisioner.call_count(ProvisionerCall::Deprovision), 0);
    assert_eq!(
        env.store.stage_history(&operation_id),
        vec![Stage::WaitForClusterDeletion, Stage::Finished]
    );
    assert!(handle.service().runtime_status(&cluster.id).await?.cluster.deleted);
    assert_eq!(
        env.director.conditions_for(&cluster.id),
        vec![RuntimeStatusCondition::Disconnected]
    );

    handle.stop().await?;
    Ok(())
}
