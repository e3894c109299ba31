use async_trait::async_trait;
use tracing::info;

use crate::{ExecutableNode, ExecutionContext, Node, NodeError, NodeOutcome, NodeStatus};

/// Entry point of a workflow. Does no work of its own.
pub struct StartNode;

#[async_trait]
impl ExecutableNode for StartNode {
    async fn execute(
        &self,
        node: &mut Node,
        ctx: &ExecutionContext<'_>,
    ) -> Result<NodeOutcome, NodeError> {
        info!(run_id = ctx.run_id(), node_id = %node.id, "start: {}", node.display_name());
        node.status = NodeStatus::Done;
        Ok(NodeOutcome::Continue)
    }
}
