//! Decision node: picks one of two successors at run time.

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::value::Truthiness;
use crate::{ExecutableNode, ExecutionContext, Node, NodeError, NodeOutcome, NodeStatus};

/// Branches on a condition.
///
/// The condition is the node's own `condition` value, or, when
/// `conditionFrom` names another node, that node's `decision` (falling back
/// to its `output`). It is normalised with [`Truthiness`]:
/// truthy follows `next[0]`, falsy follows `next[1]`.
///
/// Writes the evaluated result into `decision`.
pub struct DecisionNode;

impl DecisionNode {
    fn condition(node: &Node, ctx: &ExecutionContext<'_>) -> Result<Value, NodeError> {
        if let Some(from) = node.get("conditionFrom").and_then(Value::as_str) {
            let source = ctx.node(from).ok_or_else(|| {
                NodeError::invalid(format!("conditionFrom references unknown node '{from}'"))
            })?;
            return source
                .get("decision")
                .or_else(|| source.get("output"))
                .cloned()
                .ok_or_else(|| {
                    NodeError::invalid(format!("node '{from}' has no decision or output to branch on"))
                });
        }

        node.get("condition")
            .cloned()
            .ok_or_else(|| NodeError::invalid("decision node missing condition"))
    }
}

#[async_trait]
impl ExecutableNode for DecisionNode {
    async fn execute(
        &self,
        node: &mut Node,
        ctx: &ExecutionContext<'_>,
    ) -> Result<NodeOutcome, NodeError> {
        let condition = Self::condition(node, ctx)?;
        let taken = Truthiness::of(&condition).as_bool().ok_or_else(|| {
            NodeError::invalid(format!("condition {condition} cannot be read as true/false"))
        })?;

        let (index, branch) = if taken { (0, "true") } else { (1, "false") };
        let target = node.next.get(index).cloned().ok_or_else(|| {
            NodeError::invalid(format!("decision node '{}' has no {branch} branch", node.id))
        })?;

        info!(
            run_id = ctx.run_id(),
            node_id = %node.id,
            branch,
            next_id = %target,
            "decision: {}",
            node.display_name()
        );
        node.set("decision", taken);
        node.status = NodeStatus::Done;
        Ok(NodeOutcome::Branch(target))
    }

    fn branching(&self) -> bool {
        true
    }
}
