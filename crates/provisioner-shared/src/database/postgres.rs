//! # PostgreSQL Operation Store
//!
//! `cluster` and `operation` tables. Enum columns hold the persisted names
//! from `as_str()`; the cluster configuration is stored as JSONB.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use std::time::Duration;
use tracing::{debug, info};

use super::migrator::MIGRATOR;
use super::store::{OperationStore, StoreResult};
use crate::config::DatabaseConfig;
use crate::errors::{ProvisionerResult, StoreError};
use crate::models::{Cluster, ClusterConfig, Operation, OperationState, Stage};

/// Partial unique index allowing a single `IN_PROGRESS` operation per cluster
const ONE_IN_PROGRESS_CONSTRAINT: &str = "idx_operation_one_in_progress_per_cluster";

#[derive(Debug, Clone)]
pub struct PgOperationStore {
    pool: PgPool,
}

#[derive(Debug, FromRow)]
struct OperationRow {
    id: String,
    #[sqlx(rename = "type")]
    operation_type: String,
    cluster_id: String,
    state: String,
    stage: String,
    message: String,
    start_timestamp: DateTime<Utc>,
    end_timestamp: Option<DateTime<Utc>>,
    last_transition: DateTime<Utc>,
}

impl TryFrom<OperationRow> for Operation {
    type Error = StoreError;

    fn try_from(row: OperationRow) -> Result<Self, Self::Error> {
        Ok(Operation {
            id: row.id,
            operation_type: row.operation_type.parse()?,
            cluster_id: row.cluster_id,
            state: row.state.parse()?,
            stage: row.stage.parse()?,
            message: row.message,
            start_timestamp: row.start_timestamp,
            end_timestamp: row.end_timestamp,
            last_transition_timestamp: row.last_transition,
        })
    }
}

#[derive(Debug, FromRow)]
struct ClusterRow {
    id: String,
    tenant: String,
    sub_account_id: Option<String>,
    deleted: bool,
    creation_timestamp: DateTime<Utc>,
    cluster_config: Json<ClusterConfig>,
}

impl From<ClusterRow> for Cluster {
    fn from(row: ClusterRow) -> Self {
        Cluster {
            id: row.id,
            tenant: row.tenant,
            sub_account_id: row.sub_account_id,
            deleted: row.deleted,
            creation_timestamp: row.creation_timestamp,
            cluster_config: row.cluster_config.0,
        }
    }
}

const OPERATION_COLUMNS: &str = "id, type, cluster_id, state, stage, message, start_timestamp, end_timestamp, last_transition";

impl PgOperationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool from configuration, running migrations when enabled
    pub async fn connect(config: &DatabaseConfig) -> ProvisionerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .connect(&config.url)
            .await
            .map_err(StoreError::from)?;

        if config.run_migrations {
            MIGRATOR.run(&pool).await?;
            info!("Database migrations applied");
        }

        info!(
            max_connections = config.max_connections,
            "Connected operation store"
        );
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Build the conflict error for a rejected insert, naming the running operation
    async fn in_progress_conflict(&self, cluster_id: &str) -> StoreError {
        let running: Result<Option<(String,)>, sqlx::Error> = sqlx::query_as(
            "SELECT id FROM operation WHERE cluster_id = $1 AND state = 'IN_PROGRESS'",
        )
        .bind(cluster_id)
        .fetch_optional(&self.pool)
        .await;

        match running {
            Ok(running) => StoreError::OperationInProgress {
                cluster_id: cluster_id.to_string(),
                // Empty when the running operation finished after the insert was rejected
                operation_id: running.map(|(id,)| id).unwrap_or_default(),
            },
            Err(e) => e.into(),
        }
    }
}

fn affected_or_not_found(rows: u64, not_found: impl FnOnce() -> StoreError) -> StoreResult<()> {
    if rows == 0 {
        Err(not_found())
    } else {
        Ok(())
    }
}

#[async_trait]
impl OperationStore for PgOperationStore {
    async fn get_operation(&self, operation_id: &str) -> StoreResult<Operation> {
        let row: Option<OperationRow> =
            sqlx::query_as(&format!("SELECT {OPERATION_COLUMNS} FROM operation WHERE id = $1"))
                .bind(operation_id)
                .fetch_optional(&self.pool)
                .await?;

        row.ok_or_else(|| StoreError::operation_not_found(operation_id))?
            .try_into()
    }

    async fn update_operation_stage(
        &self,
        operation_id: &str,
        stage: Stage,
        message: &str,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE operation SET stage = $2, message = $3, last_transition = NOW() WHERE id = $1",
        )
        .bind(operation_id)
        .bind(stage.as_str())
        .bind(message)
        .execute(&self.pool)
        .await?;

        debug!(operation_id = %operation_id, stage = %stage, "Operation stage persisted");
        affected_or_not_found(result.rows_affected(), || {
            StoreError::operation_not_found(operation_id)
        })
    }

    async fn update_operation_state(
        &self,
        operation_id: &str,
        state: OperationState,
        message: &str,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE operation \
             SET state = $2, message = $3, last_transition = NOW(), \
                 end_timestamp = CASE WHEN $2 = 'IN_PROGRESS' THEN NULL ELSE NOW() END \
             WHERE id = $1 AND state = 'IN_PROGRESS'",
        )
        .bind(operation_id)
        .bind(state.as_str())
        .bind(message)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        // Distinguish a missing row from one that was already finalized
        let current = self.get_operation(operation_id).await?;
        Err(StoreError::TerminalOperation {
            operation_id: operation_id.to_string(),
            state: current.state.to_string(),
        })
    }

    async fn update_operation_message(&self, operation_id: &str, message: &str) -> StoreResult<()> {
        let result = sqlx::query("UPDATE operation SET message = $2 WHERE id = $1")
            .bind(operation_id)
            .bind(message)
            .execute(&self.pool)
            .await?;

        affected_or_not_found(result.rows_affected(), || {
            StoreError::operation_not_found(operation_id)
        })
    }

    async fn list_in_progress_operations(&self) -> StoreResult<Vec<Operation>> {
        let rows: Vec<OperationRow> = sqlx::query_as(&format!(
            "SELECT {OPERATION_COLUMNS} FROM operation WHERE state = 'IN_PROGRESS' ORDER BY start_timestamp"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Operation::try_from).collect()
    }

    async fn get_cluster(&self, cluster_id: &str) -> StoreResult<Cluster> {
        let row: Option<ClusterRow> = sqlx::query_as(
            "SELECT id, tenant, sub_account_id, deleted, creation_timestamp, cluster_config \
             FROM cluster WHERE id = $1",
        )
        .bind(cluster_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Cluster::from)
            .ok_or_else(|| StoreError::cluster_not_found(cluster_id))
    }

    async fn update_cluster_config(&self, cluster_id: &str, config: &ClusterConfig) -> StoreResult<()> {
        let result = sqlx::query("UPDATE cluster SET cluster_config = $2 WHERE id = $1")
            .bind(cluster_id)
            .bind(Json(config))
            .execute(&self.pool)
            .await?;

        affected_or_not_found(result.rows_affected(), || {
            StoreError::cluster_not_found(cluster_id)
        })
    }

    async fn insert_cluster(&self, cluster: &Cluster) -> StoreResult<()> {
        let result = sqlx::query(
            "INSERT INTO cluster (id, tenant, sub_account_id, deleted, creation_timestamp, cluster_config) \
             VALUES ($1, $2, $3, $4, $5, $6) ON CONFLICT (id) DO NOTHING",
        )
        .bind(&cluster.id)
        .bind(&cluster.tenant)
        .bind(&cluster.sub_account_id)
        .bind(cluster.deleted)
        .bind(cluster.creation_timestamp)
        .bind(Json(&cluster.cluster_config))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists {
                entity: "cluster",
                id: cluster.id.clone(),
            });
        }
        Ok(())
    }

    async fn insert_operation(&self, operation: &Operation) -> StoreResult<()> {
        let cluster_exists: Option<(String,)> = sqlx::query_as("SELECT id FROM cluster WHERE id = $1")
            .bind(&operation.cluster_id)
            .fetch_optional(&self.pool)
            .await?;
        if cluster_exists.is_none() {
            return Err(StoreError::cluster_not_found(&operation.cluster_id));
        }

        let result = sqlx::query(&format!(
            "INSERT INTO operation ({OPERATION_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) ON CONFLICT (id) DO NOTHING"
        ))
        .bind(&operation.id)
        .bind(operation.operation_type.as_str())
        .bind(&operation.cluster_id)
        .bind(operation.state.as_str())
        .bind(operation.stage.as_str())
        .bind(&operation.message)
        .bind(operation.start_timestamp)
        .bind(operation.end_timestamp)
        .bind(operation.last_transition_timestamp)
        .execute(&self.pool)
        .await;

        let result = match result {
            Ok(result) => result,
            Err(sqlx::Error::Database(db))
                if db.constraint() == Some(ONE_IN_PROGRESS_CONSTRAINT) =>
            {
                return Err(self.in_progress_conflict(&operation.cluster_id).await);
            }
            Err(e) => return Err(e.into()),
        };

        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists {
                entity: "operation",
                id: operation.id.clone(),
            });
        }
        Ok(())
    }

    async fn get_last_operation(&self, cluster_id: &str) -> StoreResult<Option<Operation>> {
        let row: Option<OperationRow> = sqlx::query_as(&format!(
            "SELECT {OPERATION_COLUMNS} FROM operation WHERE cluster_id = $1 \
             ORDER BY start_timestamp DESC LIMIT 1"
        ))
        .bind(cluster_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Operation::try_from).transpose()
    }

    async fn mark_cluster_deleted(&self, cluster_id: &str) -> StoreResult<()> {
        let result = sqlx::query("UPDATE cluster SET deleted = TRUE WHERE id = $1")
            .bind(cluster_id)
            .execute(&self.pool)
            .await?;

        affected_or_not_found(result.rows_affected(), || {
            StoreError::cluster_not_found(cluster_id)
        })
    }
}
