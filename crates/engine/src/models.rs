//! Workflow definition models.
//!
//! These types describe a workflow as the editor saves it: an unordered node
//! list plus an edge list, possibly carrying legacy identifiers. They are
//! turned into an executable [`Graph`](crate::Graph) by the builder and are
//! not consulted again once a run starts.

use std::collections::HashMap;

use nodes::Payload;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// NodeDefinition
// ---------------------------------------------------------------------------

/// A single step in the workflow graph, as saved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDefinition {
    /// Editor-assigned identifier. Falls back to `payload.id` when absent.
    #[serde(default, alias = "canvasId", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Identifier used by older saves; edges may still reference it.
    #[serde(default, rename = "legacyId", skip_serializing_if = "Option::is_none")]
    pub legacy_id: Option<String>,
    /// Maps to a registered handler.
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub label: String,
    /// Arbitrary configuration and state, handed to the handler.
    #[serde(default, alias = "data")]
    pub payload: Payload,
}

impl NodeDefinition {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            legacy_id: None,
            node_type: node_type.into(),
            label: String::new(),
            payload: Payload::new(),
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
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// Directed edge from one node to another. Only used during construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub source: String,
    pub target: String,
    #[serde(default, alias = "meta", skip_serializing_if = "Payload::is_empty")]
    pub metadata: Payload,
}

impl Connection {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            metadata: Payload::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowDefinition
// ---------------------------------------------------------------------------

/// A complete workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
    /// Explicit entry node. When absent the builder infers one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    pub nodes: Vec<NodeDefinition>,
    #[serde(default, alias = "edges")]
    pub connections: Vec<Connection>,
    /// Extra identifiers edges may use in place of canonical ids.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub aliases: HashMap<String, String>,
}

impl WorkflowDefinition {
    /// Convenience constructor for testing.
    pub fn new(
        name: impl Into<String>,
        nodes: Vec<NodeDefinition>,
        connections: Vec<Connection>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            start: None,
            nodes,
            connections,
            aliases: HashMap::new(),
        }
    }

    pub fn with_start(mut self, start: impl Into<String>) -> Self {
        self.start = Some(start.into());
        self
    }
}
