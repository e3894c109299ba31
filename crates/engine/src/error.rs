//! Engine-level error types.

use nodes::NodeError;
use thiserror::Error;

/// Why a run was aborted from the outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The caller's cancellation token fired.
    Requested,
    /// The run-wide deadline (`run_timeout`) expired.
    Deadline,
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Requested => write!(f, "cancellation requested"),
            Self::Deadline  => write!(f, "run deadline expired"),
        }
    }
}

/// Errors produced by the workflow engine (construction, validation, execution).
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    // ------ Construction errors ------

    /// A node has neither an explicit id nor a fallback `payload.id`.
    #[error("node missing id: label={label:?} type={node_type:?}")]
    MissingNodeId { label: String, node_type: String },

    /// Two or more nodes share the same canonical ID.
    #[error("duplicate node ID: '{0}'")]
    DuplicateNodeId(String),

    /// A successor id does not name any node in the graph.
    #[error("edge from '{source_id}' references unknown node '{target}'")]
    DanglingEdge { source_id: String, target: String },

    // ------ Validation errors ------

    #[error("graph has no nodes")]
    EmptyGraph,

    /// Kahn's algorithm found no node with in-degree 0.
    #[error("no indegree-0 node: cycle or disconnected graph")]
    NoRootNode,

    /// Topological sort could not visit every node.
    #[error("workflow graph contains a cycle among {0:?}")]
    CycleDetected(Vec<String>),

    #[error("graph has no start node")]
    MissingStart,

    #[error("start node '{0}' not found in graph")]
    StartNotFound(String),

    #[error("cannot pick a start node; candidates: {0:?}")]
    AmbiguousStart(Vec<String>),

    // ------ Dispatch errors ------

    #[error("node '{0}' not found in graph")]
    NodeNotFound(String),

    #[error("no handler registered for node type '{0}'")]
    UnregisteredType(String),

    /// A non-branching handler asked to jump.
    #[error("node '{node_id}' is not a branching node but selected successor '{target}'")]
    UnexpectedBranch { node_id: String, target: String },

    /// A non-branching node has more than one successor.
    #[error("ambiguous successor: node '{node_id}' has multiple next nodes {successors:?}")]
    AmbiguousSuccessor { node_id: String, successors: Vec<String> },

    /// The run visited more nodes than `max_steps` allows.
    #[error("run exceeded {0} steps")]
    StepLimitExceeded(usize),

    // ------ Execution errors ------

    /// A node failed on every allowed attempt.
    #[error("node '{node_id}' failed after {attempts} attempt(s): {source}")]
    NodeFailed {
        node_id: String,
        attempts: u32,
        #[source]
        source: NodeError,
    },

    /// The run was aborted from the outside.
    #[error("run cancelled at node {node_id:?}: {reason}")]
    Cancelled {
        node_id: Option<String>,
        reason: CancelReason,
    },
}

impl EngineError {
    /// `true` when the run was aborted deliberately rather than failing.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// `true` for both flavours of cyclic graph: some nodes unreachable by
    /// Kahn's algorithm, or no entry node at all.
    pub fn is_cycle(&self) -> bool {
        matches!(self, Self::CycleDetected(_) | Self::NoRootNode)
    }

    /// `true` when a suspended node gave up waiting for its external event.
    pub fn is_wait_timeout(&self) -> bool {
        matches!(
            self,
            Self::NodeFailed {
                source: NodeError::WaitTimeout { .. },
                ..
            }
        )
    }

    /// The node that caused the failure, when there is one.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::NodeNotFound(id) => Some(id),
            Self::UnexpectedBranch { node_id, .. }
            | Self::AmbiguousSuccessor { node_id, .. }
            | Self::NodeFailed { node_id, .. } => Some(node_id),
            Self::Cancelled { node_id, .. } => node_id.as_deref(),
            _ => None,
        }
    }
}
