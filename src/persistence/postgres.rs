//! PostgreSQL implementation of StateStore
//!
//! Production persistence backed by a `sqlx::PgPool`, following the
//! teacher's connection-pool-plus-`#[instrument]` style. Two tables:
//! `workflows` (one row per workflow instance) and `workflow_steps` (one row
//! per DAG node), mirroring `StateStore`'s CRUD shape directly rather than
//! an event log — see `store.rs` for why this engine doesn't event-source.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use crate::error::CapabilityError;

use super::store::{StateStore, StepRecord, StepStatus, StoreError, WorkflowRecord, WorkflowStatus};

/// PostgreSQL-backed [`StateStore`].
///
/// Designed for many concurrent worker processes; relies on the
/// database's own row locking rather than client-side coordination.
#[derive(Clone)]
pub struct PostgresStateStore {
    pool: PgPool,
}

impl PostgresStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn workflow_status_str(status: WorkflowStatus) -> &'static str {
    match status {
        WorkflowStatus::Pending => "pending",
        WorkflowStatus::Running => "running",
        WorkflowStatus::Completed => "completed",
        WorkflowStatus::Failed => "failed",
        WorkflowStatus::Cancelled => "cancelled",
    }
}

fn parse_workflow_status(raw: &str) -> WorkflowStatus {
    match raw {
        "running" => WorkflowStatus::Running,
        "completed" => WorkflowStatus::Completed,
        "failed" => WorkflowStatus::Failed,
        "cancelled" => WorkflowStatus::Cancelled,
        _ => WorkflowStatus::Pending,
    }
}

fn step_status_str(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Pending => "pending",
        StepStatus::Running => "running",
        StepStatus::Completed => "completed",
        StepStatus::Failed => "failed",
        StepStatus::Skipped => "skipped",
    }
}

fn parse_step_status(raw: &str) -> StepStatus {
    match raw {
        "running" => StepStatus::Running,
        "completed" => StepStatus::Completed,
        "failed" => StepStatus::Failed,
        "skipped" => StepStatus::Skipped,
        _ => StepStatus::Pending,
    }
}

#[async_trait]
impl StateStore for PostgresStateStore {
    #[instrument(skip(self, data))]
    async fn create_workflow(
        &self,
        id: Uuid,
        workflow_kind: &str,
        data: Value,
        triggered_by: Option<&str>,
        incident_ref: Option<Uuid>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO workflows
                (id, workflow_kind, status, data, triggered_by, incident_ref, created_at, updated_at)
            VALUES ($1, $2, 'pending', $3, $4, $5, now(), now())
            "#,
        )
        .bind(id)
        .bind(workflow_kind)
        .bind(&data)
        .bind(triggered_by)
        .bind(incident_ref)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_workflow(&self, id: Uuid) -> Result<WorkflowRecord, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, workflow_kind, status, data, triggered_by, incident_ref, error,
                   created_at, updated_at, completed_at
            FROM workflows WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?
        .ok_or(StoreError::WorkflowNotFound(id))?;

        Ok(WorkflowRecord {
            id: row.get("id"),
            workflow_kind: row.get("workflow_kind"),
            status: parse_workflow_status(row.get::<String, _>("status").as_str()),
            data: row.get("data"),
            triggered_by: row.get("triggered_by"),
            incident_ref: row.get("incident_ref"),
            error: row.get("error"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            completed_at: row.get("completed_at"),
        })
    }

    #[instrument(skip(self))]
    async fn set_workflow_status(
        &self,
        id: Uuid,
        status: WorkflowStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE workflows
            SET status = $2,
                error = COALESCE($3, error),
                completed_at = CASE WHEN $4 THEN now() ELSE completed_at END,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(workflow_status_str(status))
        .bind(error)
        .bind(status.is_terminal())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::WorkflowNotFound(id));
        }
        Ok(())
    }

    #[instrument(skip(self, patch))]
    async fn merge_workflow_data(&self, id: Uuid, patch: Value) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"UPDATE workflows SET data = data || $2, updated_at = now() WHERE id = $1"#,
        )
        .bind(id)
        .bind(&patch)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::WorkflowNotFound(id));
        }
        Ok(())
    }

    #[instrument(skip(self, input))]
    async fn create_step(
        &self,
        workflow_id: Uuid,
        step_id: &str,
        handler: &str,
        input: Value,
        order: u32,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO workflow_steps
                (workflow_id, step_id, handler, status, input, attempt, "order", created_at, updated_at)
            VALUES ($1, $2, $3, 'pending', $4, 0, $5, now(), now())
            "#,
        )
        .bind(workflow_id)
        .bind(step_id)
        .bind(handler)
        .bind(&input)
        .bind(order as i32)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    #[instrument(skip(self, output, error))]
    async fn set_step_status(
        &self,
        workflow_id: Uuid,
        step_id: &str,
        status: StepStatus,
        output: Option<Value>,
        error: Option<CapabilityError>,
    ) -> Result<(), StoreError> {
        let error_json = error
            .map(|e| serde_json::to_value(e))
            .transpose()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let result = sqlx::query(
            r#"
            UPDATE workflow_steps
            SET status = $3,
                output = COALESCE($4, output),
                error = COALESCE($5, error),
                started_at = CASE WHEN status = 'pending' AND $3 != 'pending'
                             THEN now() ELSE started_at END,
                completed_at = CASE WHEN $6 THEN now() ELSE completed_at END,
                updated_at = now()
            WHERE workflow_id = $1 AND step_id = $2
            "#,
        )
        .bind(workflow_id)
        .bind(step_id)
        .bind(step_status_str(status))
        .bind(&output)
        .bind(&error_json)
        .bind(status.is_terminal())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::StepNotFound {
                workflow_id,
                step_id: step_id.to_string(),
            });
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn bump_step_attempt(&self, workflow_id: Uuid, step_id: &str) -> Result<u32, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE workflow_steps
            SET attempt = attempt + 1, updated_at = now()
            WHERE workflow_id = $1 AND step_id = $2
            RETURNING attempt
            "#,
        )
        .bind(workflow_id)
        .bind(step_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?
        .ok_or_else(|| StoreError::StepNotFound {
            workflow_id,
            step_id: step_id.to_string(),
        })?;

        Ok(row.get::<i32, _>("attempt") as u32)
    }

    #[instrument(skip(self))]
    async fn list_steps(&self, workflow_id: Uuid) -> Result<Vec<StepRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT workflow_id, step_id, handler, status, input, output, error, attempt,
                   "order", task_id, created_at, updated_at, started_at, completed_at
            FROM workflow_steps
            WHERE workflow_id = $1
            ORDER BY "order" ASC
            "#,
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.into_iter()
            .map(|row| {
                let error: Option<Value> = row.get("error");
                let error = error
                    .map(serde_json::from_value)
                    .transpose()
                    .map_err(|e: serde_json::Error| StoreError::Serialization(e.to_string()))?;

                Ok(StepRecord {
                    workflow_id: row.get("workflow_id"),
                    step_id: row.get("step_id"),
                    handler: row.get("handler"),
                    status: parse_step_status(row.get::<String, _>("status").as_str()),
                    input: row.get("input"),
                    output: row.get("output"),
                    error,
                    attempt: row.get::<i32, _>("attempt") as u32,
                    order: row.get::<i32, _>("order") as u32,
                    task_id: row.get("task_id"),
                    created_at: row.get("created_at"),
                    updated_at: row.get("updated_at"),
                    started_at: row.get("started_at"),
                    completed_at: row.get("completed_at"),
                })
            })
            .collect()
    }
}
