//! StateStore trait definition
//!
//! Re-keyed from the teacher's event-sourced `WorkflowEventStore` (which
//! modeled a workflow as an append-only event log replayed through a
//! `Workflow` state machine) to a directly-mutated CRUD model: a workflow is
//! a row of free-form JSON `data` plus a status, and each DAG node gets its
//! own step row. Event sourcing bought replay-from-scratch recovery the
//! teacher's long-running workflow instances needed; this engine's
//! workflows are short DAGs (minutes, not months) so the simpler model
//! trades replay for direct queryability, matching
//! `original_source`'s Postgres-row-per-workflow approach.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::CapabilityError;

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    #[error("step not found: workflow {workflow_id}, step {step_id}")]
    StepNotFound { workflow_id: Uuid, step_id: String },

    #[error("concurrency conflict on workflow {0}")]
    ConcurrencyConflict(Uuid),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Workflow-level status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
    /// Reserved terminal state, reachable only through an explicit cancel
    /// request — never assigned implicitly by step failure.
    Cancelled,
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Per-step status.
///
/// `PENDING -> RUNNING -> {COMPLETED, FAILED, SKIPPED}`. A retry is a
/// self-transition `RUNNING -> RUNNING` with `attempt` incremented, not a
/// distinct status; `SKIPPED` is reachable only through
/// [`crate::orchestrator::Orchestrator::cancel`] marking steps that never
/// got to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

/// A workflow instance row.
#[derive(Debug, Clone)]
pub struct WorkflowRecord {
    pub id: Uuid,
    pub workflow_kind: String,
    pub status: WorkflowStatus,
    pub data: Value,
    /// Free-form identity of whoever/whatever triggered composition (a user
    /// handle, a webhook source, `None` for system-initiated runs).
    pub triggered_by: Option<String>,
    /// The incident this workflow is attached to, when the kind implies one
    /// (postmortem publication, incident response); `None` for kinds like
    /// `kb_sync` that aren't incident-scoped.
    pub incident_ref: Option<Uuid>,
    /// Set once, the first time the workflow reaches `Failed`.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set the moment the workflow reaches any terminal status.
    pub completed_at: Option<DateTime<Utc>>,
}

/// A single DAG node's execution record.
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub workflow_id: Uuid,
    pub step_id: String,
    pub handler: String,
    pub status: StepStatus,
    pub input: Value,
    pub output: Option<Value>,
    pub error: Option<CapabilityError>,
    pub attempt: u32,
    /// Position within the workflow's step sequence; unique per workflow.
    pub order: u32,
    /// Identifier of the underlying queue/task record, when the deployment
    /// dispatches through a separate task queue rather than in-process.
    pub task_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set the first time the step leaves `Pending`.
    pub started_at: Option<DateTime<Utc>>,
    /// Set the moment the step reaches a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
}

/// Authoritative state store for workflows and their steps.
///
/// Implementations must be safe under concurrent access from multiple
/// worker processes.
#[async_trait]
pub trait StateStore: Send + Sync + 'static {
    /// Create a new workflow row in `Pending` status.
    async fn create_workflow(
        &self,
        id: Uuid,
        workflow_kind: &str,
        data: Value,
        triggered_by: Option<&str>,
        incident_ref: Option<Uuid>,
    ) -> Result<(), StoreError>;

    /// Fetch a workflow by id.
    async fn get_workflow(&self, id: Uuid) -> Result<WorkflowRecord, StoreError>;

    /// Overwrite a workflow's status. Setting `error` records it on the
    /// workflow row; implementations stamp `completed_at` the moment
    /// `status` is terminal.
    async fn set_workflow_status(
        &self,
        id: Uuid,
        status: WorkflowStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Shallow-merge `patch` into the workflow's `data` object.
    async fn merge_workflow_data(&self, id: Uuid, patch: Value) -> Result<(), StoreError>;

    /// Create a step row in `Pending` status at position `order` within its
    /// workflow.
    async fn create_step(
        &self,
        workflow_id: Uuid,
        step_id: &str,
        handler: &str,
        input: Value,
        order: u32,
    ) -> Result<(), StoreError>;

    /// Update a step's status and, on completion/failure, its output/error.
    /// Implementations stamp `started_at` on the first transition out of
    /// `Pending` and `completed_at` the moment `status` is terminal.
    async fn set_step_status(
        &self,
        workflow_id: Uuid,
        step_id: &str,
        status: StepStatus,
        output: Option<Value>,
        error: Option<CapabilityError>,
    ) -> Result<(), StoreError>;

    /// Increment a step's attempt counter (called before a retry dispatch).
    async fn bump_step_attempt(&self, workflow_id: Uuid, step_id: &str) -> Result<u32, StoreError>;

    /// List every step belonging to a workflow, in creation order.
    async fn list_steps(&self, workflow_id: Uuid) -> Result<Vec<StepRecord>, StoreError>;
}
