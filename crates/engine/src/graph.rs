//! The executable graph: runtime nodes keyed by canonical id, plus the
//! entry point and run id.

use std::collections::HashMap;

use nodes::{Node, NodeStatus};
use tracing::debug;
use uuid::Uuid;

use crate::builder::{build_graph, BuiltGraph};
use crate::models::WorkflowDefinition;
use crate::EngineError;

/// A workflow ready to be run. Owned by exactly one run.
#[derive(Debug, Clone)]
pub struct Graph {
    pub run_id: String,
    pub start: String,
    pub nodes: HashMap<String, Node>,
}

impl Graph {
    /// Wrap an already-built node map.
    ///
    /// Only checks that every `next` entry names a node of the map; the start
    /// node is checked when the run begins.
    pub fn new(
        run_id: impl Into<String>,
        start: impl Into<String>,
        nodes: impl IntoIterator<Item = Node>,
    ) -> Result<Self, EngineError> {
        let nodes: HashMap<String, Node> = nodes.into_iter().map(|n| (n.id.clone(), n)).collect();

        for node in nodes.values() {
            if let Some(missing) = node.next.iter().find(|id| !nodes.contains_key(id.as_str())) {
                return Err(EngineError::DanglingEdge {
                    source_id: node.id.clone(),
                    target: missing.clone(),
                });
            }
        }

        Ok(Self {
            run_id: run_id.into(),
            start: start.into(),
            nodes,
        })
    }

    /// Turn builder output into runtime nodes, resolving the start node.
    ///
    /// An explicit `start` is resolved through the alias table. Without one,
    /// the single node of type `start` wins, then the single node with no
    /// incoming edges.
    pub fn assemble(built: &BuiltGraph, start: Option<&str>) -> Result<Self, EngineError> {
        if built.is_empty() {
            return Err(EngineError::EmptyGraph);
        }
        if let Some(edge) = built.dangling.first() {
            return Err(EngineError::DanglingEdge {
                source_id: edge.source.clone(),
                target: edge.target.clone(),
            });
        }

        let start = match start.map(str::trim).filter(|s| !s.is_empty()) {
            Some(reference) => built
                .resolve(reference)
                .map(str::to_owned)
                .ok_or_else(|| EngineError::StartNotFound(reference.to_owned()))?,
            None => infer_start(built)?,
        };

        let nodes = built
            .node_ids()
            .iter()
            .map(|id| {
                let def = &built.nodes[id];
                let node = Node {
                    id: id.clone(),
                    node_type: def.node_type.clone(),
                    label: def.label.clone(),
                    payload: def.payload.clone(),
                    status: NodeStatus::Pending,
                    next: built.adjacency.get(id).cloned().unwrap_or_default(),
                };
                (id.clone(), node)
            })
            .collect();

        let run_id = Uuid::new_v4().to_string();
        debug!(%run_id, %start, nodes = built.len(), "graph assembled");

        Ok(Self { run_id, start, nodes })
    }

    /// Build and assemble a saved definition.
    pub fn from_definition(def: &WorkflowDefinition) -> Result<Self, EngineError> {
        let built = build_graph(&def.nodes, &def.connections, &def.aliases)?;
        Self::assemble(&built, def.start.as_deref())
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }
}

fn infer_start(built: &BuiltGraph) -> Result<String, EngineError> {
    let typed: Vec<&String> = built
        .node_ids()
        .iter()
        .filter(|id| built.nodes[id.as_str()].node_type == nodes::builtin::START)
        .collect();

    match typed.as_slice() {
        [only] => return Ok((*only).clone()),
        [] => {}
        many => {
            return Err(EngineError::AmbiguousStart(
                many.iter().map(|id| (*id).clone()).collect(),
            ))
        }
    }

    match built.roots().as_slice() {
        [only] => Ok((*only).to_owned()),
        [] => Err(EngineError::MissingStart),
        many => Err(EngineError::AmbiguousStart(
            many.iter().map(|id| (*id).to_owned()).collect(),
        )),
    }
}
