//! Knowledge-base sync DAG
//!
//! Grounded on `original_source/backend/workflows/kb_sync.py`. The DAG
//! itself is a flat three-step sequence; `dispatch_embeddings` is a single
//! step whose *handler* (see `handlers::dispatch_embeddings`) performs the
//! change-set-dependent fan-out internally — re-embedding each
//! added/modified file, batch-updating the vector store, and invalidating
//! the cache, or just invalidating the cache on an empty change set. The
//! orchestrator's DAG is composed once up front, before the change set is
//! known, so that branch can't be expressed as static DAG nodes; pushing it
//! into the handler keeps the DAG shape stable while still matching
//! spec.md's described behavior end-to-end.

use serde_json::Value;

use crate::dag::DagNode;

pub const WORKFLOW_KIND: &str = "kb_sync";

/// Build the KB sync DAG for a trigger payload shaped like
/// `{runbooks_dir, pattern?}`.
pub fn build(trigger: &Value) -> DagNode {
    let dir = trigger
        .get("runbooks_dir")
        .and_then(Value::as_str)
        .unwrap_or("/runbooks");
    let pattern = trigger
        .get("pattern")
        .and_then(Value::as_str)
        .unwrap_or("*.md");

    DagNode::sequence(vec![
        DagNode::task(
            "scan_directory",
            "scan_directory",
            serde_json::json!({ "dir": dir, "pattern": pattern, "recursive": true }),
        ),
        DagNode::task(
            "detect_changes",
            "detect_changes",
            serde_json::json!({ "runbooks_dir": dir }),
        ),
        DagNode::task(
            "dispatch_embeddings",
            "dispatch_embeddings",
            serde_json::json!({ "runbooks_dir": dir }),
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_three_step_dag() {
        let dag = build(&serde_json::json!({ "runbooks_dir": "/runbooks" }));
        assert_eq!(dag.step_ids(), vec!["scan_directory", "detect_changes", "dispatch_embeddings"]);
        dag.validate().unwrap();
    }
}
