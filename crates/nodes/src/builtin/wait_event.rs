//! Suspends a node until an external event is delivered for it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::value::lenient_u64;
use crate::waiter::WaiterTable;
use crate::{ExecutableNode, ExecutionContext, Node, NodeError, NodeOutcome, NodeStatus};

/// Registers a waiter for `(run_id, node.id)` and blocks until an inbound
/// signal is delivered to it.
///
/// Payload:
/// - `timeoutSeconds` — give up after this many seconds; `0` or absent waits
///   indefinitely.
///
/// The delivered payload is written into `input`. A timeout fails the node
/// with [`NodeError::WaitTimeout`].
pub struct WaitEventNode {
    waiters: Arc<WaiterTable>,
}

impl WaitEventNode {
    pub fn new(waiters: Arc<WaiterTable>) -> Self {
        Self { waiters }
    }
}

#[async_trait]
impl ExecutableNode for WaitEventNode {
    async fn execute(
        &self,
        node: &mut Node,
        ctx: &ExecutionContext<'_>,
    ) -> Result<NodeOutcome, NodeError> {
        let timeout = node
            .get("timeoutSeconds")
            .and_then(lenient_u64)
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        let waiter = self.waiters.register(ctx.run_id(), &node.id, timeout);
        let key = waiter.key().clone();
        info!(key = %key, ?timeout, "waiting for external event: {}", node.display_name());

        let received = waiter.recv().await.map_err(|e| e.into_node_error(&key))?;

        info!(key = %key, "external event received");
        node.set("input", received);
        node.status = NodeStatus::Done;
        Ok(NodeOutcome::Continue)
    }

    fn suspends(&self) -> bool {
        true
    }
}
