//! Incident response DAG
//!
//! Grounded on `original_source/backend/workflows/incident_response.py`'s
//! `create_incident_workflow`: a straight-line chain of up to five steps,
//! eliding `analyze_logs_async` when the trigger carries no log file path.

use serde_json::Value;

use crate::dag::DagNode;

/// The workflow-kind name used when composing this DAG.
pub const WORKFLOW_KIND: &str = "incident_response";

/// Build the incident response DAG for a trigger payload shaped like
/// `{title, description, severity, log_file_path?, triggered_by?}`.
pub fn build(trigger: &Value) -> DagNode {
    let title = trigger.get("title").and_then(Value::as_str).unwrap_or("");
    let description = trigger
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or("");
    let severity = trigger
        .get("severity")
        .and_then(Value::as_str)
        .unwrap_or("medium");
    let log_file_path = trigger.get("log_file_path").and_then(Value::as_str);

    let mut steps = vec![DagNode::task(
        "create_incident_record",
        "create_incident_record",
        serde_json::json!({ "title": title, "description": description, "severity": severity, "log_file_path": log_file_path }),
    )];

    if let Some(path) = log_file_path {
        steps.push(DagNode::task(
            "analyze_logs_async",
            "analyze_logs_async",
            serde_json::json!({ "log_file_path": path }),
        ));
    }

    steps.push(DagNode::task(
        "search_related_runbooks",
        "search_related_runbooks",
        serde_json::json!({ "query": format!("{title} {description}") }),
    ));
    steps.push(DagNode::task(
        "create_github_issue",
        "create_github_issue",
        serde_json::json!({
            "title": format!("[INCIDENT] {title}"),
            "body": format!("## Description\n{description}\n\n## Severity\n{severity}"),
        }),
    ));
    steps.push(DagNode::task(
        "send_notification",
        "send_notification",
        serde_json::json!({ "message": format!("Incident workflow completed for: {title}") }),
    ));

    DagNode::sequence(steps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elides_log_analysis_without_log_path() {
        let dag = build(&serde_json::json!({ "title": "x", "description": "y", "severity": "low" }));
        let ids = dag.step_ids();
        assert_eq!(ids.len(), 4);
        assert!(!ids.contains(&"analyze_logs_async"));
    }

    #[test]
    fn includes_log_analysis_with_log_path() {
        let dag = build(&serde_json::json!({
            "title": "API Down",
            "description": "500s on /chat",
            "severity": "critical",
            "log_file_path": "/logs/api.log",
            "triggered_by": "bob",
        }));
        let ids = dag.step_ids();
        assert_eq!(ids.len(), 5);
        assert!(ids.contains(&"analyze_logs_async"));
        dag.validate().unwrap();
    }
}
