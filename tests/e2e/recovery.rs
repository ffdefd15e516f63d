use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use runtime_provisioner::orchestration::operations::{recover_in_progress_operations, QueueSet};
use runtime_provisioner::shared::database::OperationStore;
use runtime_provisioner::shared::testing::{sample_cluster, ProvisionerCall, ShootBehavior};
use runtime_provisioner::{Operation, OperationState, OperationType, Stage};

use crate::common::integration_test_utils::TestEnvironment;

#[tokio::test]
async fn test_in_progress_operation_resumes_at_persisted_stage() -> Result<()> {
    let env = TestEnvironment::new(ShootBehavior::Ready);
    let cluster = sample_cluster("runtime-1");
    env.store.insert_cluster(&cluster).await?;
    env.provisioner.insert_shoot(&cluster);

    // Left behind by a process that stopped mid-chain
    let operation = Operation::new(
        OperationType::Provision,
        &cluster.id,
        Stage::CreatingBindingsForOperators,
        "Cluster created",
    );
    env.store.insert_operation(&operation).await?;

    let mut handle = env.start().await?;
    assert_eq!(handle.recovery().found, 1);
    assert_eq!(handle.recovery().enqueued, 1);

    let finished = env.wait_for_terminal(&operation.id).await?;
    assert_eq!(finished.state, OperationState::Succeeded);
    assert_eq!(
        env.store.stage_history(&operation.id),
        vec![Stage::ConnectRuntimeAgent, Stage::Finished]
    );
    assert_eq!(env.provisioner.call_count(ProvisionerCall::Provision), 0);
    assert!(!env.runtime_client.bindings().is_empty());

    handle.stop().await?;
    assert!(!handle.is_running());
    Ok(())
}

#[tokio::test]
async fn test_recovery_is_idempotent() -> Result<()> {
    let env = TestEnvironment::new(ShootBehavior::Ready);
    let cluster = sample_cluster("runtime-1");
    env.store.insert_cluster(&cluster).await?;
    let operation = Operation::new(
        OperationType::Provision,
        &cluster.id,
        Stage::WaitingForClusterDomain,
        "",
    );
    env.store.insert_operation(&operation).await?;

    let queues = Arc::new(QueueSet::new(&env.collaborators(), &env.config)?);

    let first = recover_in_progress_operations(env.store.as_ref(), &queues).await?;
    let second = recover_in_progress_operations(env.store.as_ref(), &queues).await?;
    assert_eq!(first.enqueued, 1);
    assert_eq!(second.found, 1);
    assert_eq!(second.enqueued, 0);
    assert!(!queues.add(&operation));
    assert_eq!(queues.queue(OperationType::Provision).len(), 1);

    let shutdown = CancellationToken::new();
    let workers = {
        let queues = Arc::clone(&queues);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { queues.run(shutdown).await })
    };

    let finished = env.wait_for_terminal(&operation.id).await?;
    assert_eq!(finished.state, OperationState::Succeeded);
    // One shoot submission despite three adds
    assert_eq!(env.provisioner.call_count(ProvisionerCall::Provision), 1);

    shutdown.cancel();
    workers.await?;
    Ok(())
}

#[tokio::test]
async fn test_terminal_operations_are_not_recovered() -> Result<()> {
    let env = TestEnvironment::new(ShootBehavior::Ready);
    env.seed_provisioned_cluster("runtime-1").await?;

    let mut handle = env.start().await?;
    assert_eq!(handle.recovery().found, 0);
    assert!(env.provisioner.calls().is_empty());

    handle.stop().await?;
    Ok(())
}
