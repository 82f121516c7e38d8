//! PostgreSQL implementation of CheckpointStore
//!
//! One row per instance in `workflow_checkpoints`; every save is an upsert,
//! so the store is last-write-wins per instance and read-your-writes
//! consistent through the same pool.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::store::*;
use crate::engine::{CompletionState, InstanceState};

/// PostgreSQL implementation of CheckpointStore
///
/// # Example
///
/// ```ignore
/// use workflow_host::PostgresCheckpointStore;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/mydb").await?;
/// let store = PostgresCheckpointStore::new(pool);
/// store.migrate().await?;
/// ```
#[derive(Clone)]
pub struct PostgresCheckpointStore {
    pool: PgPool,
}

impl PostgresCheckpointStore {
    /// Create a new PostgreSQL store with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the bundled migrations
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to run checkpoint migrations: {}", e);
                StoreError::Database(e.to_string())
            })
    }
}

#[async_trait]
impl CheckpointStore for PostgresCheckpointStore {
    #[instrument(skip(self))]
    async fn load_checkpoint(&self, instance_id: Uuid) -> Result<Option<Checkpoint>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT definition, instance_state, engine_state, completion, checkpoint_values, saved_at
            FROM workflow_checkpoints
            WHERE instance_id = $1
            "#,
        )
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to load checkpoint: {}", e);
            StoreError::Database(e.to_string())
        })?;

        let Some(row) = row else {
            return Ok(None);
        };

        let state_str: String = row.get("instance_state");
        let completion: Option<serde_json::Value> = row.get("completion");
        let values: serde_json::Value = row.get("checkpoint_values");
        let saved_at: DateTime<Utc> = row.get("saved_at");

        let completion = completion
            .map(serde_json::from_value::<CompletionState>)
            .transpose()?;

        Ok(Some(Checkpoint {
            definition: row.get("definition"),
            instance_state: parse_instance_state(&state_str)?,
            engine_state: row.get("engine_state"),
            completion,
            values: serde_json::from_value(values)?,
            saved_at,
        }))
    }

    #[instrument(skip(self, checkpoint), fields(state = %checkpoint.instance_state))]
    async fn save_checkpoint(
        &self,
        instance_id: Uuid,
        checkpoint: &Checkpoint,
    ) -> Result<(), StoreError> {
        let completion = checkpoint
            .completion
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        let values = serde_json::to_value(&checkpoint.values)?;

        sqlx::query(
            r#"
            INSERT INTO workflow_checkpoints
                (instance_id, definition, instance_state, engine_state, completion, checkpoint_values, saved_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (instance_id) DO UPDATE
            SET definition = EXCLUDED.definition,
                instance_state = EXCLUDED.instance_state,
                engine_state = EXCLUDED.engine_state,
                completion = EXCLUDED.completion,
                checkpoint_values = EXCLUDED.checkpoint_values,
                saved_at = EXCLUDED.saved_at,
                updated_at = NOW()
            "#,
        )
        .bind(instance_id)
        .bind(&checkpoint.definition)
        .bind(checkpoint.instance_state.to_string())
        .bind(&checkpoint.engine_state)
        .bind(&completion)
        .bind(&values)
        .bind(checkpoint.saved_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to save checkpoint: {}", e);
            StoreError::Database(e.to_string())
        })?;

        debug!(%instance_id, "saved checkpoint");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_checkpoint(&self, instance_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM workflow_checkpoints WHERE instance_id = $1")
            .bind(instance_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to delete checkpoint: {}", e);
                StoreError::Database(e.to_string())
            })?;
        Ok(())
    }
}

fn parse_instance_state(state: &str) -> Result<InstanceState, StoreError> {
    match state {
        "runnable" => Ok(InstanceState::Runnable),
        "idle" => Ok(InstanceState::Idle),
        "complete" => Ok(InstanceState::Complete),
        "aborted" => Ok(InstanceState::Aborted),
        _ => Err(StoreError::Database(format!(
            "Unknown instance state: {}",
            state
        ))),
    }
}
