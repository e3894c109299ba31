//! Graph construction — turns a saved node list and edge list into the
//! adjacency and in-degree tables used for validation, ordering and
//! execution.
//!
//! Construction is deliberately forgiving about stale definitions:
//! 1. Edges with an empty endpoint are skipped.
//! 2. Edges whose source cannot be resolved are logged and dropped.
//! 3. Edges whose target cannot be resolved are kept in the adjacency as
//!    written and reported through [`BuiltGraph::dangling`]; assembling an
//!    executable [`Graph`](crate::Graph) rejects them.
//!
//! Missing and duplicate node ids are hard errors.

use std::collections::HashMap;
use std::fmt::Write as _;

use tracing::{debug, warn};

use crate::models::{Connection, NodeDefinition};
use crate::EngineError;

/// An edge whose target did not resolve to any node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanglingEdge {
    pub source: String,
    pub target: String,
}

/// Output of [`build_graph`].
#[derive(Debug, Clone, Default)]
pub struct BuiltGraph {
    /// Canonical node id → successor ids, in edge order.
    pub adjacency: HashMap<String, Vec<String>>,
    /// Canonical node id → number of resolved incoming edges.
    pub in_degree: HashMap<String, usize>,
    /// Canonical node id → definition.
    pub nodes: HashMap<String, NodeDefinition>,
    /// Alternate identifier → canonical id.
    pub aliases: HashMap<String, String>,
    /// Edges dropped because their source did not resolve.
    pub dropped: Vec<Connection>,
    /// Edges kept with an unresolved target.
    pub dangling: Vec<DanglingEdge>,
    /// Canonical ids in input order, so traversals are deterministic.
    ids: Vec<String>,
}

impl BuiltGraph {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Canonical ids in input order.
    pub fn node_ids(&self) -> &[String] {
        &self.ids
    }

    /// Resolve an edge endpoint or start reference to a canonical id.
    pub fn resolve(&self, reference: &str) -> Option<&str> {
        resolve(&self.aliases, &self.nodes, reference)
    }

    /// Ids with in-degree 0, in input order.
    pub fn roots(&self) -> Vec<&str> {
        self.ids
            .iter()
            .filter(|id| self.in_degree.get(id.as_str()).copied().unwrap_or(0) == 0)
            .map(String::as_str)
            .collect()
    }

    /// Compact multi-line dump of adjacency and in-degree, for diagnostics.
    pub fn debug_string(&self) -> String {
        let mut out = String::from("Graph:\n");
        for id in &self.ids {
            let _ = writeln!(
                out,
                "- {id} (in={}) -> {:?}",
                self.in_degree.get(id).copied().unwrap_or(0),
                self.adjacency.get(id).map(Vec::as_slice).unwrap_or(&[]),
            );
        }
        out
    }
}

fn resolve<'a>(
    aliases: &'a HashMap<String, String>,
    nodes: &'a HashMap<String, NodeDefinition>,
    reference: &str,
) -> Option<&'a str> {
    let reference = reference.trim();
    if let Some(canonical) = aliases.get(reference) {
        if let Some((id, _)) = nodes.get_key_value(canonical.as_str()) {
            return Some(id.as_str());
        }
    }
    nodes.get_key_value(reference).map(|(id, _)| id.as_str())
}

/// Pick the canonical id for a node: its explicit id, else a string
/// `payload.id`.
fn canonical_id(node: &NodeDefinition) -> Result<String, EngineError> {
    let explicit = node.id.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let fallback = node
        .payload
        .get("id")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty());

    explicit
        .or(fallback)
        .map(str::to_owned)
        .ok_or_else(|| EngineError::MissingNodeId {
            label: node.label.clone(),
            node_type: node.node_type.clone(),
        })
}

/// Build adjacency and in-degree tables from `nodes` and `connections`.
///
/// `aliases` maps extra identifiers to canonical ids and takes precedence
/// over the aliases derived from `legacyId` and labels. Derived aliases never
/// shadow a canonical id, and a label shared by several nodes is not used as
/// an alias at all.
///
/// # Errors
/// - [`EngineError::MissingNodeId`] if a node has no usable id.
/// - [`EngineError::DuplicateNodeId`] if two nodes resolve to the same id.
pub fn build_graph(
    nodes: &[NodeDefinition],
    connections: &[Connection],
    aliases: &HashMap<String, String>,
) -> Result<BuiltGraph, EngineError> {
    let mut graph = BuiltGraph::default();

    // -----------------------------------------------------------------------
    // 1. Canonical ids; every node starts isolated.
    // -----------------------------------------------------------------------
    for node in nodes {
        let id = canonical_id(node)?;
        if graph.nodes.contains_key(&id) {
            return Err(EngineError::DuplicateNodeId(id));
        }
        graph.adjacency.insert(id.clone(), Vec::new());
        graph.in_degree.insert(id.clone(), 0);
        graph.nodes.insert(id.clone(), node.clone());
        graph.ids.push(id);
    }

    // -----------------------------------------------------------------------
    // 2. Alias map: explicit, then legacy ids, then unique labels.
    // -----------------------------------------------------------------------
    graph.aliases = aliases
        .iter()
        .map(|(alias, id)| (alias.trim().to_owned(), id.trim().to_owned()))
        .collect();

    let mut label_counts: HashMap<&str, usize> = HashMap::new();
    for node in graph.nodes.values() {
        let label = node.label.trim();
        if !label.is_empty() {
            *label_counts.entry(label).or_insert(0) += 1;
        }
    }

    for id in &graph.ids {
        let node = &graph.nodes[id];
        let legacy = node.legacy_id.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let label = Some(node.label.trim()).filter(|l| label_counts.get(l) == Some(&1));

        for alias in legacy.into_iter().chain(label) {
            if alias != id && !graph.nodes.contains_key(alias) {
                graph.aliases.entry(alias.to_owned()).or_insert_with(|| id.clone());
            }
        }
    }

    // -----------------------------------------------------------------------
    // 3. Edges.
    // -----------------------------------------------------------------------
    for conn in connections {
        let (src, tgt) = (conn.source.trim(), conn.target.trim());
        if src.is_empty() || tgt.is_empty() {
            debug!(source = src, target = tgt, "skipping connection with empty endpoint");
            continue;
        }

        let Some(source) = resolve(&graph.aliases, &graph.nodes, src).map(str::to_owned) else {
            warn!(source = src, target = tgt, "dropping connection: source node not found");
            graph.dropped.push(conn.clone());
            continue;
        };

        match resolve(&graph.aliases, &graph.nodes, tgt).map(str::to_owned) {
            Some(target) => {
                *graph.in_degree.entry(target.clone()).or_insert(0) += 1;
                graph.adjacency.entry(source).or_default().push(target);
            }
            None => {
                warn!(source = %source, target = tgt, "connection target not found; keeping dangling edge");
                graph.adjacency.entry(source.clone()).or_default().push(tgt.to_owned());
                graph.dangling.push(DanglingEdge {
                    source,
                    target: tgt.to_owned(),
                });
            }
        }
    }

    Ok(graph)
}
