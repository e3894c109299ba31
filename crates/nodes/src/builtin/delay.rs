use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::value::lenient_u64;
use crate::{ExecutableNode, ExecutionContext, Node, NodeError, NodeOutcome, NodeStatus};

/// Pauses the run for `waitSeconds` (number or numeric string, default 0).
pub struct DelayNode;

#[async_trait]
impl ExecutableNode for DelayNode {
    async fn execute(
        &self,
        node: &mut Node,
        ctx: &ExecutionContext<'_>,
    ) -> Result<NodeOutcome, NodeError> {
        let secs = node.get("waitSeconds").and_then(lenient_u64).unwrap_or(0);
        info!(run_id = ctx.run_id(), node_id = %node.id, secs, "delay: {}", node.display_name());

        tokio::time::sleep(Duration::from_secs(secs)).await;
        node.status = NodeStatus::Done;
        Ok(NodeOutcome::Continue)
    }
}
