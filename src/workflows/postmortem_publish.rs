//! Postmortem publish DAG
//!
//! Grounded on `original_source/backend/workflows/postmortem_publish.py`'s
//! `create_postmortem_workflow`: generate sections, render the template,
//! then fan out to GitHub + vector store before notifying stakeholders.
//! Adopts the 3-member/both-present chord shape (see `DESIGN.md` for the
//! two-variant ambiguity this resolves).

use serde_json::Value;

use crate::dag::DagNode;

pub const WORKFLOW_KIND: &str = "postmortem_publish";

/// Build the postmortem publish DAG for a trigger payload shaped like
/// `{incident_id}`.
pub fn build(trigger: &Value) -> DagNode {
    let incident_id = trigger
        .get("incident_id")
        .and_then(Value::as_str)
        .unwrap_or("");

    DagNode::sequence(vec![
        DagNode::task(
            "generate_postmortem_sections",
            "generate_postmortem_sections",
            serde_json::json!({ "incident_id": incident_id }),
        ),
        DagNode::task(
            "render_template",
            "render_template",
            serde_json::json!({ "incident_id": incident_id }),
        ),
        DagNode::chord(
            vec![
                DagNode::task(
                    "create_github_issue",
                    "create_github_issue",
                    serde_json::json!({ "incident_id": incident_id }),
                ),
                DagNode::task(
                    "embed_in_vector_store",
                    "embed_in_vector_store",
                    serde_json::json!({ "incident_id": incident_id }),
                ),
            ],
            DagNode::task(
                "notify_stakeholders",
                "notify_stakeholders",
                serde_json::json!({ "incident_id": incident_id }),
            ),
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_five_step_dag() {
        let dag = build(&serde_json::json!({ "incident_id": "abc-123" }));
        assert_eq!(dag.step_ids().len(), 4);
        dag.validate().unwrap();
    }

    #[test]
    fn notify_waits_for_both_fan_out_members() {
        let dag = build(&serde_json::json!({ "incident_id": "abc-123" }));
        let edges = dag.edges();
        assert!(edges.contains(&(
            "create_github_issue".to_string(),
            "notify_stakeholders".to_string()
        )));
        assert!(edges.contains(&(
            "embed_in_vector_store".to_string(),
            "notify_stakeholders".to_string()
        )));
    }
}
