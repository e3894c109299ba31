//! Generic task node: simulated work with a configurable duration.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::value::lenient_u64;
use crate::{ExecutableNode, ExecutionContext, Node, NodeError, NodeOutcome, NodeStatus};

const DEFAULT_SLEEP: Duration = Duration::from_millis(500);

/// Placeholder for real work until a dedicated handler exists for the node.
///
/// Payload:
/// - `sleepMs` — simulated duration, default 500 ms.
///
/// Writes `output` describing the simulated execution.
pub struct TaskNode;

#[async_trait]
impl ExecutableNode for TaskNode {
    async fn execute(
        &self,
        node: &mut Node,
        ctx: &ExecutionContext<'_>,
    ) -> Result<NodeOutcome, NodeError> {
        info!(run_id = ctx.run_id(), node_id = %node.id, "task: {}", node.display_name());

        let sleep = node
            .get("sleepMs")
            .and_then(lenient_u64)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_SLEEP);
        tokio::time::sleep(sleep).await;

        node.set(
            "output",
            json!({
                "note": "simulated execution",
                "nodeId": node.id,
                "nodeType": node.node_type,
            }),
        );
        node.status = NodeStatus::Done;
        info!(node_id = %node.id, "task completed: {}", node.display_name());
        Ok(NodeOutcome::Continue)
    }
}
