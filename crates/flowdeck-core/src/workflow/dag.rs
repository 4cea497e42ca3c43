//! Dependency validation and step ordering.
//!
//! Step dependencies form a directed graph (edge from dependency to
//! dependent) modelled with `petgraph`. Validation rejects empty step lists,
//! dangling references and cycles; cycles are found with a white/gray/black
//! depth-first search so the error can name the steps on the cycle.

use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;

use flowdeck_types::export::ExportedStep;
use flowdeck_types::workflow::WorkflowStep;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use uuid::Uuid;

use super::definition::WorkflowError;

// ---------------------------------------------------------------------------
// DependencyNode
// ---------------------------------------------------------------------------

/// Anything that has an id and depends on sibling ids.
///
/// Implemented for stored steps (`Uuid` ids) and exported steps (string keys)
/// so the same checks run on definitions and on import documents.
pub trait DependencyNode {
    type Id: Eq + Hash + Clone + Display;

    fn node_id(&self) -> Self::Id;
    fn node_name(&self) -> &str;
    fn node_dependencies(&self) -> &[Self::Id];
}

impl DependencyNode for WorkflowStep {
    type Id = Uuid;

    fn node_id(&self) -> Uuid {
        self.id
    }

    fn node_name(&self) -> &str {
        &self.name
    }

    fn node_dependencies(&self) -> &[Uuid] {
        &self.dependencies
    }
}

impl DependencyNode for ExportedStep {
    type Id = String;

    fn node_id(&self) -> String {
        self.key.clone()
    }

    fn node_name(&self) -> &str {
        &self.name
    }

    fn node_dependencies(&self) -> &[String] {
        &self.depends_on
    }
}

// ---------------------------------------------------------------------------
// Graph construction
// ---------------------------------------------------------------------------

/// Build the dependency graph, rejecting duplicate ids and dangling references.
///
/// Node weights are indices into `nodes`.
fn build_graph<N: DependencyNode>(nodes: &[N]) -> Result<DiGraph<usize, ()>, WorkflowError> {
    let mut id_to_idx: HashMap<N::Id, usize> = HashMap::with_capacity(nodes.len());
    for (idx, node) in nodes.iter().enumerate() {
        if id_to_idx.insert(node.node_id(), idx).is_some() {
            return Err(WorkflowError::ValidationError(format!(
                "duplicate step id '{}'",
                node.node_id()
            )));
        }
    }

    let mut graph = DiGraph::<usize, ()>::with_capacity(nodes.len(), nodes.len());
    let node_indices: Vec<NodeIndex> = (0..nodes.len()).map(|i| graph.add_node(i)).collect();

    for (to_idx, node) in nodes.iter().enumerate() {
        for dep in node.node_dependencies() {
            let from_idx = id_to_idx.get(dep).ok_or_else(|| {
                WorkflowError::UnknownDependency(format!(
                    "step '{}' depends on unknown step '{}'",
                    node.node_name(),
                    dep
                ))
            })?;
            graph.add_edge(node_indices[*from_idx], node_indices[to_idx], ());
        }
    }

    Ok(graph)
}

// ---------------------------------------------------------------------------
// Three-color cycle detection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    /// Not visited yet.
    White,
    /// On the current DFS path.
    Gray,
    /// Fully explored.
    Black,
}

/// Depth-first search over every node; returns the first cycle found as a
/// list of node indices in dependency order (first element repeated last).
fn find_cycle(graph: &DiGraph<usize, ()>) -> Option<Vec<NodeIndex>> {
    let mut color = vec![Color::White; graph.node_count()];

    for start in graph.node_indices() {
        if color[start.index()] != Color::White {
            continue;
        }

        color[start.index()] = Color::Gray;
        let mut stack: Vec<(NodeIndex, Vec<NodeIndex>, usize)> =
            vec![(start, graph.neighbors(start).collect(), 0)];

        while let Some(frame) = stack.last_mut() {
            if frame.2 < frame.1.len() {
                let next = frame.1[frame.2];
                frame.2 += 1;

                match color[next.index()] {
                    Color::White => {
                        color[next.index()] = Color::Gray;
                        let neighbors = graph.neighbors(next).collect();
                        stack.push((next, neighbors, 0));
                    }
                    Color::Gray => {
                        // Back edge: the path from `next` to the top of the stack is the cycle.
                        let begin = stack
                            .iter()
                            .position(|(node, _, _)| *node == next)
                            .unwrap_or(0);
                        let mut cycle: Vec<NodeIndex> =
                            stack[begin..].iter().map(|(node, _, _)| *node).collect();
                        cycle.push(next);
                        return Some(cycle);
                    }
                    Color::Black => {}
                }
            } else {
                let node = frame.0;
                color[node.index()] = Color::Black;
                stack.pop();
            }
        }
    }

    None
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Validate the dependency structure of a workflow's steps.
///
/// Fails when the step list is empty, when a dependency names an id that is
/// not a sibling step, or when the graph has a cycle. The first problem found
/// is reported; nothing is partially accepted.
pub fn validate_dependencies<N: DependencyNode>(nodes: &[N]) -> Result<(), WorkflowError> {
    if nodes.is_empty() {
        return Err(WorkflowError::ValidationError(
            "workflow must have at least one step".to_string(),
        ));
    }
    check_references(nodes)
}

/// Reference and cycle checks without the non-empty requirement.
///
/// Used while editing, where a workflow may legitimately have no steps yet.
pub fn check_references<N: DependencyNode>(nodes: &[N]) -> Result<(), WorkflowError> {
    let graph = build_graph(nodes)?;

    if let Some(cycle) = find_cycle(&graph) {
        let names: Vec<&str> = cycle
            .iter()
            .map(|idx| nodes[graph[*idx]].node_name())
            .collect();
        return Err(WorkflowError::CycleDetected(format!(
            "cycle detected involving step '{}': {}",
            names[0],
            names.join(" -> ")
        )));
    }

    Ok(())
}

/// Order nodes so every dependency precedes its dependents.
///
/// Ties keep the input order. Used by import, which must create steps before
/// the steps that reference them.
pub fn dependency_order<N: DependencyNode>(nodes: &[N]) -> Result<Vec<&N>, WorkflowError> {
    let graph = build_graph(nodes)?;
    let sorted = toposort(&graph, None).map_err(|cycle| {
        let name = nodes[graph[cycle.node_id()]].node_name();
        WorkflowError::CycleDetected(format!("cycle detected involving step '{name}'"))
    })?;
    Ok(sorted.into_iter().map(|idx| &nodes[graph[idx]]).collect())
}

/// Steps in execution order: `position` ascending, ties in input order.
pub fn execution_order(steps: &[WorkflowStep]) -> Vec<&WorkflowStep> {
    let mut ordered: Vec<&WorkflowStep> = steps.iter().collect();
    ordered.sort_by_key(|step| step.position);
    ordered
}

/// Names of the steps that directly depend on `step_id`.
pub fn dependents_of<'a>(step_id: &Uuid, steps: &'a [WorkflowStep]) -> Vec<&'a str> {
    steps
        .iter()
        .filter(|s| s.dependencies.contains(step_id))
        .map(|s| s.name.as_str())
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use flowdeck_types::workflow::{ActionKind, RetryPolicy, StepType};
    use serde_json::json;

    /// Helper: a step named `name` at `position` depending on `deps`.
    fn step(name: &str, position: i32, deps: Vec<Uuid>) -> WorkflowStep {
        WorkflowStep {
            id: Uuid::now_v7(),
            workflow_id: Uuid::nil(),
            name: name.to_string(),
            step_type: StepType::Action,
            action: Some(ActionKind::LogMessage),
            config: json!({}),
            position,
            condition: None,
            retry_policy: RetryPolicy::default(),
            timeout_ms: None,
            dependencies: deps,
            is_active: true,
        }
    }

    // -----------------------------------------------------------------------
    // validate_dependencies
    // -----------------------------------------------------------------------

    #[test]
    fn test_empty_steps_rejected() {
        let steps: Vec<WorkflowStep> = vec![];
        let err = validate_dependencies(&steps).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("at least one step"));
    }

    #[test]
    fn test_fan_out_accepted() {
        // A -> B, A -> C
        let a = step("A", 1, vec![]);
        let b = step("B", 2, vec![a.id]);
        let c = step("C", 3, vec![a.id]);
        assert!(validate_dependencies(&[a, b, c]).is_ok());
    }

    #[test]
    fn test_three_step_cycle_rejected() {
        // A -> B -> C -> A
        let mut a = step("A", 1, vec![]);
        let b = step("B", 2, vec![a.id]);
        let c = step("C", 3, vec![b.id]);
        a.dependencies = vec![c.id];

        let err = validate_dependencies(&[a, b, c]).unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, WorkflowError::CycleDetected(_)));
        assert!(msg.contains("cycle detected"), "got: {msg}");
        assert!(
            ["'A'", "'B'", "'C'"].iter().any(|n| msg.contains(n)),
            "cycle report must name a step: {msg}"
        );
    }

    #[test]
    fn test_self_dependency_rejected() {
        let mut a = step("A", 1, vec![]);
        a.dependencies = vec![a.id];
        let err = validate_dependencies(&[a]).unwrap_err();
        assert!(matches!(err, WorkflowError::CycleDetected(_)));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let a = step("A", 1, vec![Uuid::now_v7()]);
        let err = validate_dependencies(&[a]).unwrap_err();
        assert!(matches!(err, WorkflowError::UnknownDependency(_)));
        assert!(err.to_string().contains("unknown step"));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let a = step("A", 1, vec![]);
        let mut b = step("B", 2, vec![]);
        b.id = a.id;
        let err = validate_dependencies(&[a, b]).unwrap_err();
        assert!(err.to_string().contains("duplicate step id"));
    }

    #[test]
    fn test_cycle_in_later_component_detected() {
        // Independent valid chain plus a separate 2-cycle.
        let a = step("A", 1, vec![]);
        let b = step("B", 2, vec![a.id]);
        let mut x = step("X", 3, vec![]);
        let y = step("Y", 4, vec![x.id]);
        x.dependencies = vec![y.id];
        let err = validate_dependencies(&[a, b, x, y]).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("'X'") || msg.contains("'Y'"), "got: {msg}");
    }

    #[test]
    fn test_check_references_allows_empty() {
        let steps: Vec<WorkflowStep> = vec![];
        assert!(check_references(&steps).is_ok());
    }

    // -----------------------------------------------------------------------
    // Ordering helpers
    // -----------------------------------------------------------------------

    #[test]
    fn test_execution_order_by_position() {
        let steps = vec![step("C", 3, vec![]), step("A", 1, vec![]), step("B", 2, vec![])];
        let names: Vec<&str> = execution_order(&steps).iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_dependency_order_for_export_keys() {
        let steps: Vec<ExportedStep> = serde_json::from_value(json!([
            {"key": "notify", "name": "Notify", "type": "action", "action": "send_notification",
             "position": 1, "dependsOn": ["email"]},
            {"key": "email", "name": "Email", "type": "action", "action": "send_email",
             "position": 2}
        ]))
        .unwrap();
        let ordered: Vec<&str> = dependency_order(&steps)
            .unwrap()
            .iter()
            .map(|s| s.key.as_str())
            .collect();
        assert_eq!(ordered, vec!["email", "notify"]);
    }

    #[test]
    fn test_dependents_of() {
        let a = step("A", 1, vec![]);
        let b = step("B", 2, vec![a.id]);
        let c = step("C", 3, vec![b.id]);
        let steps = vec![a.clone(), b.clone(), c.clone()];

        assert_eq!(dependents_of(&a.id, &steps), vec!["B"]);
        assert_eq!(dependents_of(&b.id, &steps), vec!["C"]);
        assert!(dependents_of(&c.id, &steps).is_empty());
    }
}
