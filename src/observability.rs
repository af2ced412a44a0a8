//! Structured observability events
//!
//! Wraps `tracing` emission the way the teacher instruments its executor
//! and worker pool (`#[instrument]` plus explicit `info!`/`warn!` calls),
//! adding a `CorrelationId` newtype so every log line for a workflow's
//! lifetime can be grepped by one value regardless of which step emitted it.

use std::fmt;

use uuid::Uuid;

/// Correlates every log line belonging to one workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    pub fn new(workflow_id: Uuid) -> Self {
        Self(workflow_id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Emit a structured step-dispatched event.
pub fn step_dispatched(correlation_id: CorrelationId, step_id: &str, handler: &str) {
    tracing::info!(
        correlation_id = %correlation_id,
        step_id,
        handler,
        "step dispatched"
    );
}

/// Emit a structured step-completed event.
pub fn step_completed(correlation_id: CorrelationId, step_id: &str, attempt: u32) {
    tracing::info!(
        correlation_id = %correlation_id,
        step_id,
        attempt,
        "step completed"
    );
}

/// Emit a structured step-failed event.
pub fn step_failed(correlation_id: CorrelationId, step_id: &str, attempt: u32, retryable: bool) {
    tracing::warn!(
        correlation_id = %correlation_id,
        step_id,
        attempt,
        retryable,
        "step failed"
    );
}

/// Emit a structured workflow-terminal event.
pub fn workflow_terminal(correlation_id: CorrelationId, status: &str) {
    tracing::info!(correlation_id = %correlation_id, status, "workflow reached terminal state");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_id_displays_as_uuid() {
        let id = Uuid::new_v4();
        let correlation_id = CorrelationId::new(id);
        assert_eq!(correlation_id.to_string(), id.to_string());
    }
}
