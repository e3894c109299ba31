//! Node registry — maps type tags to handler implementations.
//!
//! Populated once at startup and read for every dispatched node. A tag is
//! dispatched only to the handler registered under exactly that string.

use std::collections::HashMap;
use std::sync::Arc;

use nodes::builtin::{
    DecisionNode, DelayNode, StartNode, TaskNode, TemplateNode, WaitEventNode, DECISION, DELAY,
    START, TASK, TEMPLATE, WAIT_EVENT,
};
use nodes::{ExecutableNode, WaiterTable};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::EngineError;

/// Thread-safe table of `node_type` → handler.
#[derive(Default)]
pub struct NodeRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn ExecutableNode>>>,
}

impl NodeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry pre-populated with every built-in handler.
    /// `wait_event` nodes park on `waiters`.
    pub fn with_builtins(waiters: Arc<WaiterTable>) -> Self {
        let registry = Self::new();
        registry.register(START, Arc::new(StartNode));
        registry.register(TASK, Arc::new(TaskNode));
        registry.register(DECISION, Arc::new(DecisionNode));
        registry.register(WAIT_EVENT, Arc::new(WaitEventNode::new(waiters)));
        registry.register(DELAY, Arc::new(DelayNode));
        registry.register(TEMPLATE, Arc::new(TemplateNode));
        registry
    }

    /// Register `handler` under `tag`, returning the handler it replaced.
    pub fn register(
        &self,
        tag: impl Into<String>,
        handler: Arc<dyn ExecutableNode>,
    ) -> Option<Arc<dyn ExecutableNode>> {
        let tag = tag.into();
        let previous = self.handlers.write().insert(tag.clone(), handler);
        if previous.is_some() {
            warn!(%tag, "node handler replaced");
        } else {
            debug!(%tag, "node handler registered");
        }
        previous
    }

    /// Find the handler for `tag`.
    ///
    /// # Errors
    /// [`EngineError::UnregisteredType`] when nothing is registered under it.
    pub fn lookup(&self, tag: &str) -> Result<Arc<dyn ExecutableNode>, EngineError> {
        self.handlers
            .read()
            .get(tag)
            .cloned()
            .ok_or_else(|| EngineError::UnregisteredType(tag.to_owned()))
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.handlers.read().contains_key(tag)
    }

    /// Registered tags, sorted.
    pub fn types(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.handlers.read().keys().cloned().collect();
        tags.sort();
        tags
    }
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("types", &self.types())
            .finish()
    }
}
