//! `MockNode` — a test double for `ExecutableNode`.
//!
//! Useful in unit and integration tests where a real node implementation is
//! either unavailable or irrelevant.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::{ExecutableNode, ExecutionContext, Node, NodeError, NodeOutcome, NodeStatus};

/// Behaviour injected into `MockNode` at construction time.
pub enum MockBehaviour {
    /// Write the value into the node's `output` and follow `next`.
    ReturnValue(Value),
    /// Fail the first `failures` calls, then succeed.
    FailFirst { failures: usize, message: String },
    /// Fail every call.
    AlwaysFail(String),
    /// Jump to the given node id.
    Branch(String),
    /// Sleep, then succeed.
    Sleep(Duration),
}

/// A mock node that records every call it receives and returns a
/// programmer-specified result.
pub struct MockNode {
    /// Label used in test assertions.
    pub name: String,
    /// What the node will do when `execute` is called.
    pub behaviour: MockBehaviour,
    /// Ids of the nodes this handler was invoked for (in call order).
    pub calls: Arc<Mutex<Vec<String>>>,
    branching: bool,
}

impl MockNode {
    fn with_behaviour(name: impl Into<String>, behaviour: MockBehaviour) -> Self {
        Self {
            name: name.into(),
            behaviour,
            calls: Arc::new(Mutex::new(Vec::new())),
            branching: false,
        }
    }

    /// Create a mock that always succeeds with the given value.
    pub fn returning(name: impl Into<String>, value: Value) -> Self {
        Self::with_behaviour(name, MockBehaviour::ReturnValue(value))
    }

    /// Create a mock that always fails.
    pub fn failing(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::AlwaysFail(msg.into()))
    }

    /// Create a mock that fails `failures` times before succeeding.
    pub fn flaky(name: impl Into<String>, failures: usize, msg: impl Into<String>) -> Self {
        Self::with_behaviour(
            name,
            MockBehaviour::FailFirst {
                failures,
                message: msg.into(),
            },
        )
    }

    /// Create a mock that sleeps before succeeding.
    pub fn sleeping(name: impl Into<String>, duration: Duration) -> Self {
        Self::with_behaviour(name, MockBehaviour::Sleep(duration))
    }

    /// Create a branching mock that always jumps to `target`.
    pub fn branching_to(name: impl Into<String>, target: impl Into<String>) -> Self {
        let mut mock = Self::with_behaviour(name, MockBehaviour::Branch(target.into()));
        mock.branching = true;
        mock
    }

    /// Create a mock that jumps to `target` without declaring itself a
    /// branching handler, to exercise the engine's contract checks.
    pub fn rogue_branch(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::Branch(target.into()))
    }

    /// Number of times this node has been executed.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Node ids seen so far, in call order.
    pub fn seen(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExecutableNode for MockNode {
    async fn execute(
        &self,
        node: &mut Node,
        _ctx: &ExecutionContext<'_>,
    ) -> Result<NodeOutcome, NodeError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(node.id.clone());
            calls.len()
        };

        match &self.behaviour {
            MockBehaviour::ReturnValue(v) => {
                node.set("output", v.clone());
                node.set("handledBy", self.name.clone());
            }
            MockBehaviour::FailFirst { failures, message } if call <= *failures => {
                return Err(NodeError::failed(format!("{message} (call {call})")));
            }
            MockBehaviour::FailFirst { .. } => node.set("handledBy", self.name.clone()),
            MockBehaviour::AlwaysFail(msg) => return Err(NodeError::failed(msg.clone())),
            MockBehaviour::Branch(target) => {
                node.status = NodeStatus::Done;
                return Ok(NodeOutcome::Branch(target.clone()));
            }
            MockBehaviour::Sleep(d) => tokio::time::sleep(*d).await,
        }

        node.status = NodeStatus::Done;
        Ok(NodeOutcome::Continue)
    }

    fn branching(&self) -> bool {
        self.branching
    }
}
