//! In-memory StateStore, for tests and local development.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use crate::error::CapabilityError;

use super::store::{StateStore, StepRecord, StepStatus, StoreError, WorkflowRecord, WorkflowStatus};

#[derive(Default)]
pub struct InMemoryStateStore {
    workflows: RwLock<HashMap<Uuid, WorkflowRecord>>,
    steps: RwLock<HashMap<(Uuid, String), StepRecord>>,
    step_order: RwLock<HashMap<Uuid, Vec<String>>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn create_workflow(
        &self,
        id: Uuid,
        workflow_kind: &str,
        data: Value,
        triggered_by: Option<&str>,
        incident_ref: Option<Uuid>,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        self.workflows.write().insert(
            id,
            WorkflowRecord {
                id,
                workflow_kind: workflow_kind.to_string(),
                status: WorkflowStatus::Pending,
                data,
                triggered_by: triggered_by.map(str::to_string),
                incident_ref,
                error: None,
                created_at: now,
                updated_at: now,
                completed_at: None,
            },
        );
        Ok(())
    }

    async fn get_workflow(&self, id: Uuid) -> Result<WorkflowRecord, StoreError> {
        self.workflows
            .read()
            .get(&id)
            .cloned()
            .ok_or(StoreError::WorkflowNotFound(id))
    }

    async fn set_workflow_status(
        &self,
        id: Uuid,
        status: WorkflowStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut workflows = self.workflows.write();
        let record = workflows
            .get_mut(&id)
            .ok_or(StoreError::WorkflowNotFound(id))?;
        record.status = status;
        if let Some(error) = error {
            record.error = Some(error.to_string());
        }
        let now = Utc::now();
        if status.is_terminal() {
            record.completed_at = Some(now);
        }
        record.updated_at = now;
        Ok(())
    }

    async fn merge_workflow_data(&self, id: Uuid, patch: Value) -> Result<(), StoreError> {
        let mut workflows = self.workflows.write();
        let record = workflows
            .get_mut(&id)
            .ok_or(StoreError::WorkflowNotFound(id))?;

        match (&mut record.data, patch) {
            (Value::Object(existing), Value::Object(incoming)) => {
                for (k, v) in incoming {
                    existing.insert(k, v);
                }
            }
            (slot, patch) => *slot = patch,
        }
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn create_step(
        &self,
        workflow_id: Uuid,
        step_id: &str,
        handler: &str,
        input: Value,
        order: u32,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        self.steps.write().insert(
            (workflow_id, step_id.to_string()),
            StepRecord {
                workflow_id,
                step_id: step_id.to_string(),
                handler: handler.to_string(),
                status: StepStatus::Pending,
                input,
                output: None,
                error: None,
                attempt: 0,
                order,
                task_id: None,
                created_at: now,
                updated_at: now,
                started_at: None,
                completed_at: None,
            },
        );
        self.step_order
            .write()
            .entry(workflow_id)
            .or_default()
            .push(step_id.to_string());
        Ok(())
    }

    async fn set_step_status(
        &self,
        workflow_id: Uuid,
        step_id: &str,
        status: StepStatus,
        output: Option<Value>,
        error: Option<CapabilityError>,
    ) -> Result<(), StoreError> {
        let mut steps = self.steps.write();
        let key = (workflow_id, step_id.to_string());
        let record = steps.get_mut(&key).ok_or_else(|| StoreError::StepNotFound {
            workflow_id,
            step_id: step_id.to_string(),
        })?;
        let now = Utc::now();
        if record.status == StepStatus::Pending && status != StepStatus::Pending {
            record.started_at = Some(now);
        }
        record.status = status;
        if output.is_some() {
            record.output = output;
        }
        if error.is_some() {
            record.error = error;
        }
        if status.is_terminal() {
            record.completed_at = Some(now);
        }
        record.updated_at = now;
        Ok(())
    }

    async fn bump_step_attempt(&self, workflow_id: Uuid, step_id: &str) -> Result<u32, StoreError> {
        let mut steps = self.steps.write();
        let key = (workflow_id, step_id.to_string());
        let record = steps.get_mut(&key).ok_or_else(|| StoreError::StepNotFound {
            workflow_id,
            step_id: step_id.to_string(),
        })?;
        record.attempt += 1;
        Ok(record.attempt)
    }

    async fn list_steps(&self, workflow_id: Uuid) -> Result<Vec<StepRecord>, StoreError> {
        let order = self.step_order.read();
        let ids = order.get(&workflow_id).cloned().unwrap_or_default();
        let steps = self.steps.read();
        Ok(ids
            .into_iter()
            .filter_map(|id| steps.get(&(workflow_id, id)).cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_and_fetch_workflow() {
        let store = InMemoryStateStore::new();
        let id = Uuid::new_v4();
        store
            .create_workflow(id, "incident_response", serde_json::json!({"a": 1}), Some("alice"), None)
            .await
            .unwrap();

        let record = store.get_workflow(id).await.unwrap();
        assert_eq!(record.workflow_kind, "incident_response");
        assert_eq!(record.status, WorkflowStatus::Pending);
        assert_eq!(record.triggered_by, Some("alice".to_string()));
    }

    #[tokio::test]
    async fn merge_workflow_data_shallow_merges() {
        let store = InMemoryStateStore::new();
        let id = Uuid::new_v4();
        store
            .create_workflow(id, "kb_sync", serde_json::json!({"a": 1}), None, None)
            .await
            .unwrap();
        store
            .merge_workflow_data(id, serde_json::json!({"b": 2}))
            .await
            .unwrap();

        let record = store.get_workflow(id).await.unwrap();
        assert_eq!(record.data, serde_json::json!({"a": 1, "b": 2}));
    }

    #[tokio::test]
    async fn step_lifecycle() {
        let store = InMemoryStateStore::new();
        let id = Uuid::new_v4();
        store
            .create_workflow(id, "postmortem_publish", Value::Null, None, None)
            .await
            .unwrap();
        store
            .create_step(id, "render", "render_template", Value::Null, 0)
            .await
            .unwrap();

        store
            .set_step_status(
                id,
                "render",
                StepStatus::Completed,
                Some(serde_json::json!({"ok": true})),
                None,
            )
            .await
            .unwrap();

        let steps = store.list_steps(id).await.unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].status, StepStatus::Completed);
        assert_eq!(steps[0].output, Some(serde_json::json!({"ok": true})));
    }

    #[tokio::test]
    async fn unknown_workflow_is_not_found() {
        let store = InMemoryStateStore::new();
        let result = store.get_workflow(Uuid::new_v4()).await;
        assert!(matches!(result, Err(StoreError::WorkflowNotFound(_))));
    }
}
