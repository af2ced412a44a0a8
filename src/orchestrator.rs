//! DAG-driven workflow orchestrator
//!
//! Replaces the teacher's event-sourced `WorkflowExecutor` (whole-workflow
//! callback replay via `Workflow::on_*`) with node-granular composition:
//! `compose` registers a workflow's DAG and dispatches its entry steps,
//! `advance` records one step's outcome and returns whatever newly became
//! ready, and `cancel` marks a workflow (and its in-flight steps) cancelled.
//! The instrumented-method style (`#[instrument(skip(...))]`, `tracing`
//! fields) carries over from the teacher's executor.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::cache::SnapshotCache;
use crate::clock::Clock;
use crate::dag::{DagError, DagNode};
use crate::error::CapabilityError;
use crate::lock::{DistributedLock, LockError, LockGuard};
use crate::persistence::{StateStore, StepStatus, StoreError, WorkflowStatus};
use crate::registry::HandlerRegistry;

/// A step ready to be dispatched to a worker.
#[derive(Debug, Clone)]
pub struct ReadyStep {
    pub step_id: String,
    pub handler: String,
    pub input: Value,
}

/// The outcome of running a single step, reported back via [`Orchestrator::advance`].
#[derive(Debug, Clone)]
pub enum StepOutcome {
    Completed(Value),
    Failed(CapabilityError),
}

/// Result of advancing a workflow by one step outcome.
#[derive(Debug, Clone)]
pub struct AdvanceResult {
    pub workflow_status: WorkflowStatus,
    pub newly_ready: Vec<ReadyStep>,
}

/// Result of cancelling a workflow.
#[derive(Debug, Clone)]
pub struct CancelResult {
    pub already_terminal: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("invalid workflow graph: {0}")]
    InvalidDag(#[from] DagError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("workflow {0} has no stored dag")]
    MissingDag(Uuid),

    #[error("failed to (de)serialize workflow dag: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("lock already held: {0}")]
    LockHeld(String),

    #[error("lock error: {0}")]
    Lock(#[from] LockError),
}

/// Composes and advances DAG-shaped workflows against a [`StateStore`].
pub struct Orchestrator<S: StateStore> {
    store: Arc<S>,
    handlers: Arc<HandlerRegistry>,
    clock: Arc<dyn Clock>,
    lock: Option<Arc<DistributedLock>>,
    cache: Option<Arc<SnapshotCache>>,
    lock_lease: Duration,
    held_locks: DashMap<Uuid, LockGuard>,
}

impl<S: StateStore> Orchestrator<S> {
    pub fn new(store: Arc<S>, handlers: Arc<HandlerRegistry>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            handlers,
            clock,
            lock: None,
            cache: None,
            lock_lease: Duration::from_secs(30),
            held_locks: DashMap::new(),
        }
    }

    pub fn with_lock(mut self, lock: Arc<DistributedLock>, lease: Duration) -> Self {
        self.lock = Some(lock);
        self.lock_lease = lease;
        self
    }

    pub fn with_cache(mut self, cache: Arc<SnapshotCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// The backing state store, for callers (e.g. [`crate::worker::WorkerPool`])
    /// that need to read a workflow's terminal status directly.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The handler registry this orchestrator dispatches against.
    pub fn handlers(&self) -> Arc<HandlerRegistry> {
        Arc::clone(&self.handlers)
    }

    /// Write the current workflow snapshot into the cache, if configured.
    /// Best-effort: cache failures never fail the orchestrator call.
    async fn refresh_cache(&self, workflow_id: Uuid) {
        let Some(cache) = &self.cache else { return };
        if let Ok(record) = self.store.get_workflow(workflow_id).await {
            let _ = cache.set(workflow_id, &record.data, None).await;
        }
    }

    /// Validate `dag`, acquire `lock_key`'s lock if the caller named one,
    /// persist the workflow alongside a fresh row, and return the steps
    /// that are immediately dispatchable (the DAG's entry points).
    ///
    /// The lock (when requested) is acquired *before* any row is written,
    /// so a losing caller never leaves behind a workflow record — matching
    /// the "second trigger gets 409, no second workflow row" requirement
    /// for `kb_sync`.
    #[instrument(skip(self, dag, input))]
    #[allow(clippy::too_many_arguments)]
    pub async fn compose(
        &self,
        workflow_kind: &str,
        dag: DagNode,
        input: Value,
        triggered_by: Option<&str>,
        incident_ref: Option<Uuid>,
        lock_key: Option<&str>,
    ) -> Result<(Uuid, Vec<ReadyStep>), OrchestratorError> {
        dag.validate()?;
        dag.validate_handlers(|name| self.handlers.contains(name))?;

        let workflow_id = self.clock.new_id();

        let guard = match (&self.lock, lock_key) {
            (Some(lock), Some(key)) => Some(lock.acquire(key, self.lock_lease).await.map_err(
                |err| match err {
                    LockError::AlreadyHeld(key) => OrchestratorError::LockHeld(key),
                    other => OrchestratorError::Lock(other),
                },
            )?),
            _ => None,
        };

        let dag_json = serde_json::to_value(&dag)?;
        let data = serde_json::json!({ "dag": dag_json, "input": input });

        self.store
            .create_workflow(workflow_id, workflow_kind, data, triggered_by, incident_ref)
            .await?;

        if let Some(guard) = guard {
            self.held_locks.insert(workflow_id, guard);
        }

        for (order, (step_id, handler, input_template)) in dag.tasks().into_iter().enumerate() {
            self.store
                .create_step(workflow_id, step_id, handler, input_template.clone(), order as u32)
                .await?;
        }

        self.store
            .set_workflow_status(workflow_id, WorkflowStatus::Running, None)
            .await?;

        let ready = self
            .dispatch_steps(&dag, dag.entry_step_ids(), &HashMap::new())
            .await?;
        self.mark_running(workflow_id, &ready).await?;

        info!(%workflow_id, workflow_kind, steps = ready.len(), "workflow composed");
        Ok((workflow_id, ready))
    }

    /// Record the outcome of `step_id` and compute what becomes ready next.
    /// A step failure only fails the whole workflow once no sibling is
    /// still `Running` — a chord/group member still in flight gets to
    /// finish before the workflow is declared `Failed`. The completion of
    /// the DAG's last step transitions it to `Completed`.
    #[instrument(skip(self, outcome))]
    pub async fn advance(
        &self,
        workflow_id: Uuid,
        step_id: &str,
        outcome: StepOutcome,
    ) -> Result<AdvanceResult, OrchestratorError> {
        let record = self.store.get_workflow(workflow_id).await?;
        if record.status.is_terminal() {
            return Ok(AdvanceResult {
                workflow_status: record.status,
                newly_ready: vec![],
            });
        }

        let dag = self.load_dag(&record.data, workflow_id)?;

        match outcome {
            StepOutcome::Completed(output) => {
                self.store
                    .set_step_status(workflow_id, step_id, StepStatus::Completed, Some(output), None)
                    .await?;
            }
            StepOutcome::Failed(err) => {
                self.store
                    .set_step_status(workflow_id, step_id, StepStatus::Failed, None, Some(err))
                    .await?;
            }
        }

        // Re-checked on every call, not just the one that just failed a step:
        // a sibling still `Running` when a step fails defers the workflow's
        // `Failed` transition until that sibling's own `advance` call finds
        // nothing left in flight.
        let steps = self.store.list_steps(workflow_id).await?;
        let any_in_flight = steps.iter().any(|s| s.status == StepStatus::Running);
        if let Some(failed) = steps.iter().find(|s| s.status == StepStatus::Failed) {
            if any_in_flight {
                return Ok(AdvanceResult {
                    workflow_status: WorkflowStatus::Running,
                    newly_ready: vec![],
                });
            }

            let message = failed
                .error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "step failed".to_string());
            self.store
                .set_workflow_status(workflow_id, WorkflowStatus::Failed, Some(&message))
                .await?;
            self.release_lock(workflow_id).await;
            self.refresh_cache(workflow_id).await;
            return Ok(AdvanceResult {
                workflow_status: WorkflowStatus::Failed,
                newly_ready: vec![],
            });
        }

        let statuses: HashMap<&str, StepStatus> = steps
            .iter()
            .map(|s| (s.step_id.as_str(), s.status))
            .collect();
        let outputs: HashMap<&str, Value> = steps
            .iter()
            .filter_map(|s| s.output.clone().map(|output| (s.step_id.as_str(), output)))
            .collect();

        let all_done = statuses.values().all(|s| *s == StepStatus::Completed);
        if all_done {
            self.store
                .set_workflow_status(workflow_id, WorkflowStatus::Completed, None)
                .await?;
            self.release_lock(workflow_id).await;
            self.refresh_cache(workflow_id).await;
            return Ok(AdvanceResult {
                workflow_status: WorkflowStatus::Completed,
                newly_ready: vec![],
            });
        }

        let ready_ids = self.successors_ready(&dag, &statuses);
        let ready = self.dispatch_steps(&dag, ready_ids, &outputs).await?;
        self.mark_running(workflow_id, &ready).await?;

        Ok(AdvanceResult {
            workflow_status: WorkflowStatus::Running,
            newly_ready: ready,
        })
    }

    /// Cancel a workflow: skip every step that hasn't reached a terminal
    /// status, mark the workflow `Cancelled` unless it's already terminal,
    /// and drop any lock held for it. Reachable only through this call —
    /// step failure never implicitly cancels.
    #[instrument(skip(self))]
    pub async fn cancel(&self, workflow_id: Uuid) -> Result<CancelResult, OrchestratorError> {
        let record = self.store.get_workflow(workflow_id).await?;
        if record.status.is_terminal() {
            return Ok(CancelResult {
                already_terminal: true,
            });
        }

        let steps = self.store.list_steps(workflow_id).await?;
        for step in steps.iter().filter(|s| !s.status.is_terminal()) {
            self.store
                .set_step_status(workflow_id, &step.step_id, StepStatus::Skipped, None, None)
                .await?;
        }

        self.store
            .set_workflow_status(workflow_id, WorkflowStatus::Cancelled, None)
            .await?;
        self.release_lock(workflow_id).await;
        self.refresh_cache(workflow_id).await;

        Ok(CancelResult {
            already_terminal: false,
        })
    }

    fn load_dag(&self, data: &Value, workflow_id: Uuid) -> Result<DagNode, OrchestratorError> {
        let raw = data
            .get("dag")
            .ok_or(OrchestratorError::MissingDag(workflow_id))?;
        Ok(serde_json::from_value(raw.clone())?)
    }

    fn successors_ready<'a>(
        &self,
        dag: &'a DagNode,
        statuses: &HashMap<&str, StepStatus>,
    ) -> Vec<&'a str> {
        let edges = dag.edges();
        let mut predecessors: HashMap<&str, Vec<&str>> = HashMap::new();
        for (from, to) in &edges {
            predecessors.entry(to.as_str()).or_default().push(from.as_str());
        }

        dag.tasks()
            .into_iter()
            .map(|(id, _, _)| id)
            .filter(|id| matches!(statuses.get(id), Some(StepStatus::Pending) | None))
            .filter(|id| {
                predecessors
                    .get(id)
                    .map(|preds| {
                        preds
                            .iter()
                            .all(|p| statuses.get(p) == Some(&StepStatus::Completed))
                    })
                    .unwrap_or(true)
            })
            .collect()
    }

    /// Resolve `step_ids` into dispatchable steps, binding each one's
    /// predecessor output(s) into its `input_template` under an
    /// `"upstream"` key: a single value for one predecessor, a JSON array
    /// for more than one (a chord join reading every fan-out member's
    /// output at once).
    async fn dispatch_steps(
        &self,
        dag: &DagNode,
        step_ids: Vec<&str>,
        outputs: &HashMap<&str, Value>,
    ) -> Result<Vec<ReadyStep>, OrchestratorError> {
        let tasks: HashMap<&str, (&str, &Value)> = dag
            .tasks()
            .into_iter()
            .map(|(id, handler, input)| (id, (handler, input)))
            .collect();

        let edges = dag.edges();
        let mut predecessors: HashMap<&str, Vec<&str>> = HashMap::new();
        for (from, to) in &edges {
            predecessors.entry(to.as_str()).or_default().push(from.as_str());
        }

        let mut ready = Vec::new();
        for step_id in step_ids {
            let Some((handler, input_template)) = tasks.get(step_id) else {
                continue;
            };
            if !self.handlers.contains(handler) {
                warn!(step_id, handler, "no handler registered for step");
            }

            let upstream = predecessors.get(step_id).map(|preds| {
                let mut values: Vec<Value> =
                    preds.iter().filter_map(|p| outputs.get(p).cloned()).collect();
                if values.len() == 1 {
                    values.pop().expect("len checked above")
                } else {
                    Value::Array(values)
                }
            });

            ready.push(ReadyStep {
                step_id: step_id.to_string(),
                handler: handler.to_string(),
                input: bind_upstream(input_template, upstream),
            });
        }
        Ok(ready)
    }

    /// Mark every just-dispatched step `Running` so a concurrent failure
    /// elsewhere in the same wave can tell it's still in flight.
    async fn mark_running(&self, workflow_id: Uuid, ready: &[ReadyStep]) -> Result<(), OrchestratorError> {
        for step in ready {
            self.store
                .set_step_status(workflow_id, &step.step_id, StepStatus::Running, None, None)
                .await?;
        }
        Ok(())
    }

    /// Release the lock held for `workflow_id`, if any. Called on every
    /// terminal transition; lease expiry is the safety net for crashes
    /// that skip this path.
    async fn release_lock(&self, workflow_id: Uuid) {
        if let Some(lock) = &self.lock {
            if let Some((_, guard)) = self.held_locks.remove(&workflow_id) {
                let _ = lock.release(guard).await;
            }
        }
    }
}

/// Merge a predecessor's output into `template` under an `"upstream"` key.
/// Every workflow this engine ships builds an object-shaped `input_template`
/// (see `workflows::*`), so the merge is a single top-level insert rather
/// than a recursive one; a non-object template is left untouched.
fn bind_upstream(template: &Value, upstream: Option<Value>) -> Value {
    let mut merged = template.clone();
    if let (Value::Object(map), Some(upstream)) = (&mut merged, upstream) {
        map.insert("upstream".to_string(), upstream);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::persistence::InMemoryStateStore;
    use crate::reliability::RetryPolicy;

    fn test_orchestrator() -> Orchestrator<InMemoryStateStore> {
        let mut handlers = HandlerRegistry::new();
        handlers.register("step_a", RetryPolicy::exponential(), |input: Value| async move {
            Ok(input)
        });
        handlers.register("step_b", RetryPolicy::exponential(), |input: Value| async move {
            Ok(input)
        });

        Orchestrator::new(
            Arc::new(InMemoryStateStore::new()),
            Arc::new(handlers),
            Arc::new(SystemClock),
        )
    }

    #[tokio::test]
    async fn compose_dispatches_entry_step() {
        let orch = test_orchestrator();
        let dag = DagNode::sequence(vec![
            DagNode::task("a", "step_a", Value::Null),
            DagNode::task("b", "step_b", Value::Null),
        ]);

        let (workflow_id, ready) = orch.compose("test_wf", dag, Value::Null, None, None, None).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].step_id, "a");

        let record = orch.store.get_workflow(workflow_id).await.unwrap();
        assert_eq!(record.status, WorkflowStatus::Running);
    }

    #[tokio::test]
    async fn advance_dispatches_next_sequence_step() {
        let orch = test_orchestrator();
        let dag = DagNode::sequence(vec![
            DagNode::task("a", "step_a", Value::Null),
            DagNode::task("b", "step_b", Value::Null),
        ]);
        let (workflow_id, _) = orch.compose("test_wf", dag, Value::Null, None, None, None).await.unwrap();

        let result = orch
            .advance(workflow_id, "a", StepOutcome::Completed(Value::Null))
            .await
            .unwrap();

        assert_eq!(result.workflow_status, WorkflowStatus::Running);
        assert_eq!(result.newly_ready.len(), 1);
        assert_eq!(result.newly_ready[0].step_id, "b");
    }

    #[tokio::test]
    async fn advance_completes_workflow_on_last_step() {
        let orch = test_orchestrator();
        let dag = DagNode::task("a", "step_a", Value::Null);
        let (workflow_id, _) = orch.compose("test_wf", dag, Value::Null, None, None, None).await.unwrap();

        let result = orch
            .advance(workflow_id, "a", StepOutcome::Completed(Value::Null))
            .await
            .unwrap();

        assert_eq!(result.workflow_status, WorkflowStatus::Completed);
    }

    #[tokio::test]
    async fn advance_fails_workflow_on_step_failure() {
        let orch = test_orchestrator();
        let dag = DagNode::sequence(vec![
            DagNode::task("a", "step_a", Value::Null),
            DagNode::task("b", "step_b", Value::Null),
        ]);
        let (workflow_id, _) = orch.compose("test_wf", dag, Value::Null, None, None, None).await.unwrap();

        let result = orch
            .advance(
                workflow_id,
                "a",
                StepOutcome::Failed(CapabilityError::permanent("boom")),
            )
            .await
            .unwrap();

        assert_eq!(result.workflow_status, WorkflowStatus::Failed);
        assert!(result.newly_ready.is_empty());
    }

    #[tokio::test]
    async fn cancel_marks_workflow_cancelled() {
        let orch = test_orchestrator();
        let dag = DagNode::task("a", "step_a", Value::Null);
        let (workflow_id, _) = orch.compose("test_wf", dag, Value::Null, None, None, None).await.unwrap();

        let result = orch.cancel(workflow_id).await.unwrap();
        assert!(!result.already_terminal);

        let record = orch.store.get_workflow(workflow_id).await.unwrap();
        assert_eq!(record.status, WorkflowStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_is_idempotent_on_terminal_workflow() {
        let orch = test_orchestrator();
        let dag = DagNode::task("a", "step_a", Value::Null);
        let (workflow_id, _) = orch.compose("test_wf", dag, Value::Null, None, None, None).await.unwrap();

        orch.cancel(workflow_id).await.unwrap();
        let result = orch.cancel(workflow_id).await.unwrap();
        assert!(result.already_terminal);
    }

    #[tokio::test]
    async fn chord_waits_for_all_fan_out_members() {
        let orch = test_orchestrator();
        let dag = DagNode::chord(
            vec![
                DagNode::task("a", "step_a", Value::Null),
                DagNode::task("b", "step_b", Value::Null),
            ],
            DagNode::task("join", "step_a", Value::Null),
        );
        let (workflow_id, ready) = orch.compose("test_wf", dag, Value::Null, None, None, None).await.unwrap();
        assert_eq!(ready.len(), 2);

        let result = orch
            .advance(workflow_id, "a", StepOutcome::Completed(Value::Null))
            .await
            .unwrap();
        assert!(result.newly_ready.is_empty());

        let result = orch
            .advance(workflow_id, "b", StepOutcome::Completed(Value::Null))
            .await
            .unwrap();
        assert_eq!(result.newly_ready.len(), 1);
        assert_eq!(result.newly_ready[0].step_id, "join");
    }

    #[tokio::test]
    async fn compose_rejects_unregistered_handler() {
        let orch = test_orchestrator();
        let dag = DagNode::task("a", "does_not_exist", Value::Null);

        let result = orch.compose("test_wf", dag, Value::Null, None, None, None).await;
        assert!(matches!(
            result,
            Err(OrchestratorError::InvalidDag(DagError::UnknownHandler(_)))
        ));
    }

    #[tokio::test]
    async fn successor_receives_predecessor_output_as_upstream() {
        let orch = test_orchestrator();
        let dag = DagNode::sequence(vec![
            DagNode::task("a", "step_a", Value::Null),
            DagNode::task("b", "step_b", serde_json::json!({ "static": true })),
        ]);
        let (workflow_id, _) = orch
            .compose("test_wf", dag, Value::Null, None, None, None)
            .await
            .unwrap();

        let result = orch
            .advance(
                workflow_id,
                "a",
                StepOutcome::Completed(serde_json::json!({ "x": 1 })),
            )
            .await
            .unwrap();

        assert_eq!(result.newly_ready.len(), 1);
        assert_eq!(
            result.newly_ready[0].input,
            serde_json::json!({ "static": true, "upstream": { "x": 1 } })
        );
    }

    #[tokio::test]
    async fn chord_join_receives_array_of_fan_out_outputs() {
        let orch = test_orchestrator();
        let dag = DagNode::chord(
            vec![
                DagNode::task("a", "step_a", Value::Null),
                DagNode::task("b", "step_b", Value::Null),
            ],
            DagNode::task("join", "step_a", Value::Null),
        );
        let (workflow_id, _) = orch
            .compose("test_wf", dag, Value::Null, None, None, None)
            .await
            .unwrap();

        orch.advance(workflow_id, "a", StepOutcome::Completed(serde_json::json!({ "n": 1 })))
            .await
            .unwrap();
        let result = orch
            .advance(workflow_id, "b", StepOutcome::Completed(serde_json::json!({ "n": 2 })))
            .await
            .unwrap();

        assert_eq!(result.newly_ready.len(), 1);
        let upstream = result.newly_ready[0].input.get("upstream").unwrap();
        assert!(upstream.is_array());
        assert_eq!(upstream.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failure_waits_for_running_sibling_before_failing_workflow() {
        let orch = test_orchestrator();
        let dag = DagNode::group(vec![
            DagNode::task("a", "step_a", Value::Null),
            DagNode::task("b", "step_b", Value::Null),
        ]);
        let (workflow_id, ready) = orch
            .compose("test_wf", dag, Value::Null, None, None, None)
            .await
            .unwrap();
        assert_eq!(ready.len(), 2);

        let result = orch
            .advance(
                workflow_id,
                "a",
                StepOutcome::Failed(CapabilityError::permanent("boom")),
            )
            .await
            .unwrap();
        assert_eq!(result.workflow_status, WorkflowStatus::Running);

        let record = orch.store.get_workflow(workflow_id).await.unwrap();
        assert_eq!(record.status, WorkflowStatus::Running);

        let result = orch
            .advance(workflow_id, "b", StepOutcome::Completed(Value::Null))
            .await
            .unwrap();
        assert_eq!(result.workflow_status, WorkflowStatus::Failed);
    }

    #[tokio::test]
    async fn cancel_skips_non_terminal_steps() {
        let orch = test_orchestrator();
        let dag = DagNode::sequence(vec![
            DagNode::task("a", "step_a", Value::Null),
            DagNode::task("b", "step_b", Value::Null),
        ]);
        let (workflow_id, _) = orch
            .compose("test_wf", dag, Value::Null, None, None, None)
            .await
            .unwrap();

        orch.cancel(workflow_id).await.unwrap();

        let steps = orch.store.list_steps(workflow_id).await.unwrap();
        assert!(steps.iter().all(|s| s.status == StepStatus::Skipped));
    }
}
