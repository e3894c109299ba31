//! DAG validation — run this before executing a workflow.
//!
//! Rules enforced:
//! 1. The graph must contain at least one node.
//! 2. At least one node must have no incoming edges.
//! 3. The directed graph must be acyclic (Kahn's algorithm must visit every
//!    node).
//!
//! On success returns both a flat topological order and the same order
//! grouped into layers; nodes within a layer have no edges between them.

use std::collections::HashMap;

use crate::builder::{build_graph, BuiltGraph};
use crate::models::WorkflowDefinition;
use crate::EngineError;

/// Result of a successful topological sort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopoOrder {
    /// Every node id exactly once; each edge's source precedes its target.
    pub order: Vec<String>,
    /// `order` split into dependency levels.
    pub layers: Vec<Vec<String>>,
}

impl TopoOrder {
    /// Index of the layer containing `id`.
    pub fn layer_of(&self, id: &str) -> Option<usize> {
        self.layers.iter().position(|layer| layer.iter().any(|n| n == id))
    }
}

/// Sort `graph` with Kahn's algorithm.
///
/// Edges whose target is not a node of the graph are ignored; the builder
/// already reports them. Roots are seeded in input order, so the result is
/// deterministic for a given definition.
///
/// # Errors
/// - [`EngineError::EmptyGraph`] if there are no nodes.
/// - [`EngineError::NoRootNode`] if every node has an incoming edge.
/// - [`EngineError::CycleDetected`] if some nodes could not be ordered; the
///   error carries those ids.
pub fn topological_sort(graph: &BuiltGraph) -> Result<TopoOrder, EngineError> {
    if graph.is_empty() {
        return Err(EngineError::EmptyGraph);
    }

    // Work on a copy; the caller's in-degree table stays intact.
    let mut in_degree: HashMap<&str, usize> = graph
        .node_ids()
        .iter()
        .map(|id| (id.as_str(), graph.in_degree.get(id).copied().unwrap_or(0)))
        .collect();

    let mut frontier: Vec<&str> = graph.roots();
    if frontier.is_empty() {
        return Err(EngineError::NoRootNode);
    }

    let mut order: Vec<String> = Vec::with_capacity(graph.len());
    let mut layers: Vec<Vec<String>> = Vec::new();

    while !frontier.is_empty() {
        let mut next_frontier: Vec<&str> = Vec::new();

        for &node_id in &frontier {
            order.push(node_id.to_owned());

            let Some(children) = graph.adjacency.get(node_id) else {
                continue;
            };
            for child in children {
                let Some(deg) = in_degree.get_mut(child.as_str()) else {
                    continue; // dangling
                };
                *deg -= 1;
                if *deg == 0 {
                    next_frontier.push(child.as_str());
                }
            }
        }

        layers.push(frontier.iter().map(|id| (*id).to_owned()).collect());
        frontier = next_frontier;
    }

    // If we didn't visit every node the graph contains a cycle.
    if order.len() != graph.len() {
        let remaining = graph
            .node_ids()
            .iter()
            .filter(|id| in_degree.get(id.as_str()).copied().unwrap_or(0) > 0)
            .cloned()
            .collect();
        return Err(EngineError::CycleDetected(remaining));
    }

    Ok(TopoOrder { order, layers })
}

/// Build and sort a workflow definition in one go.
///
/// # Errors
/// Any construction error from [`build_graph`], any error from
/// [`topological_sort`], or [`EngineError::DanglingEdge`] for the first edge
/// whose target does not exist.
pub fn validate_dag(workflow: &WorkflowDefinition) -> Result<TopoOrder, EngineError> {
    let graph = build_graph(&workflow.nodes, &workflow.connections, &workflow.aliases)?;
    if let Some(edge) = graph.dangling.first() {
        return Err(EngineError::DanglingEdge {
            source_id: edge.source.clone(),
            target: edge.target.clone(),
        });
    }
    topological_sort(&graph)
}
