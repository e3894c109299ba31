//! Runtime node model.
//!
//! A [`Node`] is created fresh for every run and owned by that run's graph.
//! Handlers read their inputs from, and write their results into, the
//! node's `payload`; it is the only sanctioned way to hand data downstream.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Free-form key/value state carried by a node.
pub type Payload = Map<String, Value>;

// ---------------------------------------------------------------------------
// NodeStatus
// ---------------------------------------------------------------------------

/// Lifecycle of a single node within a run.
///
/// Moves forward only (`pending → running → done | failed`), except that a
/// retried node may cycle `running → failed → running` before settling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    #[default]
    Pending,
    Running,
    Done,
    Failed,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Done    => write!(f, "done"),
            Self::Failed  => write!(f, "failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// A unit of work in a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Canonical id, unique within the graph.
    pub id: String,
    /// Tag used to look up the handler in the registry.
    #[serde(rename = "type")]
    pub node_type: String,
    /// Human-readable name; never used for dispatch.
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub payload: Payload,
    #[serde(default)]
    pub status: NodeStatus,
    /// Ordered successor ids. More than one entry only makes sense for
    /// branching node types.
    #[serde(default)]
    pub next: Vec<String>,
}

impl Node {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            label: String::new(),
            payload: Payload::new(),
            status: NodeStatus::Pending,
            next: Vec::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn with_next<I, S>(mut self, next: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.next = next.into_iter().map(Into::into).collect();
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.payload.insert(key.into(), value.into());
    }

    /// Label when present, id otherwise. Used in log lines.
    pub fn display_name(&self) -> &str {
        if self.label.is_empty() { &self.id } else { &self.label }
    }
}
