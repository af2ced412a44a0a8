//! Workflow DAG combinators
//!
//! A workflow is built from a small set of node combinators rather than
//! hand-rolled edge lists. `Sequence`/`Group`/`Chord` compose `Task` leaves
//! into a DAG that is acyclic by construction; [`DagNode::validate`] still
//! runs a Kahn's-algorithm pass (adapted from the satwikambashta example's
//! topological sort) as defense-in-depth against misuse (e.g. a `Chord`
//! built from a cyclic sub-expression via programmatic construction).

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single node in a workflow DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DagNode {
    /// A single handler invocation.
    Task {
        step_id: String,
        handler: String,
        #[serde(default)]
        input_template: Value,
    },
    /// Run children strictly in order; each only starts after the previous
    /// reaches a terminal state.
    Sequence { children: Vec<DagNode> },
    /// Run children concurrently with no ordering between them.
    Group { children: Vec<DagNode> },
    /// Run `fan_out` concurrently, then run `join` once every member of
    /// `fan_out` has reached a terminal state.
    Chord {
        fan_out: Vec<DagNode>,
        join: Box<DagNode>,
    },
}

impl DagNode {
    pub fn task(step_id: impl Into<String>, handler: impl Into<String>, input_template: Value) -> Self {
        Self::Task {
            step_id: step_id.into(),
            handler: handler.into(),
            input_template,
        }
    }

    pub fn sequence(children: Vec<DagNode>) -> Self {
        Self::Sequence { children }
    }

    pub fn group(children: Vec<DagNode>) -> Self {
        Self::Group { children }
    }

    pub fn chord(fan_out: Vec<DagNode>, join: DagNode) -> Self {
        Self::Chord {
            fan_out,
            join: Box::new(join),
        }
    }

    /// All step ids reachable from this node, in no particular order.
    pub fn step_ids(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_step_ids(&mut out);
        out
    }

    fn collect_step_ids<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Task { step_id, .. } => out.push(step_id.as_str()),
            Self::Sequence { children } | Self::Group { children } => {
                for child in children {
                    child.collect_step_ids(out);
                }
            }
            Self::Chord { fan_out, join } => {
                for child in fan_out {
                    child.collect_step_ids(out);
                }
                join.collect_step_ids(out);
            }
        }
    }

    /// Validate structural well-formedness: at least one step, unique step
    /// ids, and (as defense-in-depth on top of construction-by-combinator)
    /// absence of cycles in the derived edge list, via Kahn's algorithm.
    pub fn validate(&self) -> Result<(), DagError> {
        let ids = self.step_ids();
        if ids.is_empty() {
            return Err(DagError::EmptyDag);
        }

        let mut seen = HashSet::new();
        for id in &ids {
            if !seen.insert(*id) {
                return Err(DagError::DuplicateStepId(id.to_string()));
            }
        }

        let edges = self.edges();
        topo_sort(&ids, &edges).map(|_| ())
    }

    /// Check that every `Task` leaf names a handler `is_registered` accepts.
    /// Run in addition to [`DagNode::validate`] before a DAG is composed, so
    /// an unregistered handler is rejected at build time rather than
    /// surfacing as a dispatch-time failure deep in a run.
    pub fn validate_handlers(&self, is_registered: impl Fn(&str) -> bool) -> Result<(), DagError> {
        for (_, handler, _) in self.tasks() {
            if !is_registered(handler) {
                return Err(DagError::UnknownHandler(handler.to_string()));
            }
        }
        Ok(())
    }

    /// Directed edges `(from, to)` implied by sequencing/chord-joining.
    /// Groups contribute no edges among their own children.
    pub fn edges(&self) -> Vec<(String, String)> {
        let mut edges = Vec::new();
        self.collect_edges(&mut edges);
        edges
    }

    /// Step ids with no predecessor in the whole DAG — the steps a fresh
    /// workflow instance dispatches immediately.
    pub fn entry_step_ids(&self) -> Vec<&str> {
        self.entry_ids()
    }

    /// Flattened `(step_id, handler, input_template)` for every `Task` leaf.
    pub fn tasks(&self) -> Vec<(&str, &str, &Value)> {
        let mut out = Vec::new();
        self.collect_tasks(&mut out);
        out
    }

    fn collect_tasks<'a>(&'a self, out: &mut Vec<(&'a str, &'a str, &'a Value)>) {
        match self {
            Self::Task {
                step_id,
                handler,
                input_template,
            } => out.push((step_id.as_str(), handler.as_str(), input_template)),
            Self::Sequence { children } | Self::Group { children } => {
                for child in children {
                    child.collect_tasks(out);
                }
            }
            Self::Chord { fan_out, join } => {
                for child in fan_out {
                    child.collect_tasks(out);
                }
                join.collect_tasks(out);
            }
        }
    }

    fn collect_edges(&self, edges: &mut Vec<(String, String)>) {
        match self {
            Self::Task { .. } => {}
            Self::Group { children } => {
                for child in children {
                    child.collect_edges(edges);
                }
            }
            Self::Sequence { children } => {
                for pair in children.windows(2) {
                    for from in pair[0].exit_ids() {
                        for to in pair[1].entry_ids() {
                            edges.push((from.to_string(), to.to_string()));
                        }
                    }
                }
                for child in children {
                    child.collect_edges(edges);
                }
            }
            Self::Chord { fan_out, join } => {
                for member in fan_out {
                    for from in member.exit_ids() {
                        for to in join.entry_ids() {
                            edges.push((from.to_string(), to.to_string()));
                        }
                    }
                    member.collect_edges(edges);
                }
                join.collect_edges(edges);
            }
        }
    }

    /// Step ids with no predecessor within this subtree (entry points).
    fn entry_ids(&self) -> Vec<&str> {
        match self {
            Self::Task { step_id, .. } => vec![step_id.as_str()],
            Self::Sequence { children } => children.first().map(|c| c.entry_ids()).unwrap_or_default(),
            Self::Group { children } => children.iter().flat_map(|c| c.entry_ids()).collect(),
            Self::Chord { fan_out, .. } => fan_out.iter().flat_map(|c| c.entry_ids()).collect(),
        }
    }

    /// Step ids with no successor within this subtree (exit points).
    fn exit_ids(&self) -> Vec<&str> {
        match self {
            Self::Task { step_id, .. } => vec![step_id.as_str()],
            Self::Sequence { children } => children.last().map(|c| c.exit_ids()).unwrap_or_default(),
            Self::Group { children } => children.iter().flat_map(|c| c.exit_ids()).collect(),
            Self::Chord { join, .. } => join.exit_ids(),
        }
    }
}

fn topo_sort(ids: &[&str], edges: &[(String, String)]) -> Result<Vec<String>, DagError> {
    let mut indegree: HashMap<&str, usize> = ids.iter().map(|id| (*id, 0)).collect();
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();

    for (from, to) in edges {
        adjacency.entry(from.as_str()).or_default().push(to.as_str());
        *indegree.entry(to.as_str()).or_insert(0) += 1;
    }

    let mut queue: VecDeque<&str> = indegree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&id, _)| id)
        .collect();
    let mut order = Vec::with_capacity(ids.len());

    while let Some(node) = queue.pop_front() {
        order.push(node.to_string());
        if let Some(neighbors) = adjacency.get(node) {
            for &next in neighbors {
                let deg = indegree.get_mut(next).unwrap();
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(next);
                }
            }
        }
    }

    if order.len() != ids.len() {
        return Err(DagError::Cycle);
    }

    Ok(order)
}

/// Errors from DAG construction/validation.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DagError {
    #[error("workflow graph has no steps")]
    EmptyDag,

    #[error("duplicate step id: {0}")]
    DuplicateStepId(String),

    #[error("workflow graph contains a cycle")]
    Cycle,

    #[error("no handler registered for: {0}")]
    UnknownHandler(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str) -> DagNode {
        DagNode::task(id, format!("{id}_handler"), Value::Null)
    }

    #[test]
    fn sequence_validates() {
        let dag = DagNode::sequence(vec![task("a"), task("b"), task("c")]);
        assert!(dag.validate().is_ok());
    }

    #[test]
    fn group_has_no_internal_ordering() {
        let dag = DagNode::group(vec![task("a"), task("b")]);
        assert!(dag.edges().is_empty());
    }

    #[test]
    fn chord_joins_after_fan_out() {
        let dag = DagNode::chord(vec![task("a"), task("b")], task("join"));
        assert!(dag.validate().is_ok());
        let edges = dag.edges();
        assert!(edges.contains(&("a".to_string(), "join".to_string())));
        assert!(edges.contains(&("b".to_string(), "join".to_string())));
    }

    #[test]
    fn duplicate_step_id_rejected() {
        let dag = DagNode::sequence(vec![task("a"), task("a")]);
        assert_eq!(dag.validate(), Err(DagError::DuplicateStepId("a".into())));
    }

    #[test]
    fn empty_dag_rejected() {
        let dag = DagNode::sequence(vec![]);
        assert_eq!(dag.validate(), Err(DagError::EmptyDag));
    }

    #[test]
    fn unregistered_handler_rejected() {
        let dag = DagNode::sequence(vec![task("a"), task("b")]);
        let registered = ["a_handler"];
        let result = dag.validate_handlers(|h| registered.contains(&h));
        assert_eq!(result, Err(DagError::UnknownHandler("b_handler".to_string())));
    }

    #[test]
    fn all_handlers_registered_passes() {
        let dag = DagNode::sequence(vec![task("a"), task("b")]);
        assert!(dag.validate_handlers(|_| true).is_ok());
    }

    #[test]
    fn nested_sequence_of_chords_validates() {
        let dag = DagNode::sequence(vec![
            task("scan"),
            DagNode::chord(vec![task("embed"), task("issue")], task("notify")),
        ]);
        assert!(dag.validate().is_ok());
        assert_eq!(dag.step_ids().len(), 4);
    }
}
