//! The `ExecutableNode` trait — the contract every handler must fulfil.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::{Node, NodeError};

/// What the run loop should do after a handler succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeOutcome {
    /// Follow the node's own `next` list.
    Continue,
    /// Jump to the given node id, bypassing `next`. Only branching handlers
    /// may return this; the engine rejects it from anyone else.
    Branch(String),
}

/// Per-invocation context handed to a handler.
///
/// Defined here (in the nodes crate) so both the engine and individual node
/// implementations can import it without a circular dependency.
///
/// `nodes` is a read-only view of the rest of the graph. The node being
/// executed is lent to the handler separately as `&mut Node` and is not
/// visible through this view while the handler runs.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionContext<'a> {
    run_id: &'a str,
    nodes: &'a HashMap<String, Node>,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(run_id: &'a str, nodes: &'a HashMap<String, Node>) -> Self {
        Self { run_id, nodes }
    }

    /// Identifier of the current run; namespaces waiter keys.
    pub fn run_id(&self) -> &'a str {
        self.run_id
    }

    /// Look up another node of the same run.
    pub fn node(&self, id: &str) -> Option<&'a Node> {
        self.nodes.get(id)
    }
}

/// The core handler trait.
///
/// Built-in handlers and externally registered integrations (LLM calls,
/// outbound messaging, function invocation, ...) all implement this and are
/// registered under a unique type tag before any run references that tag.
#[async_trait]
pub trait ExecutableNode: Send + Sync {
    /// Execute `node`, reading inputs from and writing results into its
    /// payload.
    ///
    /// Returning `Err` fails the current attempt; the engine marks the node
    /// `failed` if the handler did not already do so.
    async fn execute(
        &self,
        node: &mut Node,
        ctx: &ExecutionContext<'_>,
    ) -> Result<NodeOutcome, NodeError>;

    /// Whether this handler selects its successor at run time.
    fn branching(&self) -> bool {
        false
    }

    /// Whether this handler may block on an external event. Suspending
    /// handlers get no default per-attempt deadline; only an explicit
    /// `timeoutMs` in the payload bounds them.
    fn suspends(&self) -> bool {
        false
    }
}
