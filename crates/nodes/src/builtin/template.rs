//! Static reply builder: fills a text template from an incoming message.

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info};

use crate::value::as_text;
use crate::{ExecutableNode, ExecutionContext, Node, NodeError, NodeOutcome, NodeStatus};

/// Renders `reply_template` against an input message.
///
/// Payload:
/// - `input` — the message; when absent, the `output` (or `input`) of the
///   node named by `inputFrom` is used instead,
/// - `match_regex` — optional pattern; its capture groups fill `${1}`, `${2}`, ...
/// - `reply_template` — text with `${n}` and `${body}` placeholders.
///
/// Writes the rendered text into `output`. A pattern that does not match
/// leaves the numbered placeholders untouched.
pub struct TemplateNode;

impl TemplateNode {
    fn input(node: &Node, ctx: &ExecutionContext<'_>) -> Result<String, NodeError> {
        if let Some(input) = node.get("input") {
            return Ok(as_text(input));
        }
        match node.get("inputFrom").and_then(Value::as_str) {
            Some(from) => {
                let source = ctx.node(from).ok_or_else(|| {
                    NodeError::invalid(format!("inputFrom references unknown node '{from}'"))
                })?;
                Ok(source
                    .get("output")
                    .or_else(|| source.get("input"))
                    .map(as_text)
                    .unwrap_or_default())
            }
            None => Ok(String::new()),
        }
    }
}

/// Substitute capture groups and `${body}` into `template`.
pub fn render(pattern: &str, template: &str, message: &str) -> Result<String, NodeError> {
    let mut out = template.to_owned();
    if !pattern.is_empty() {
        let re = Regex::new(pattern)
            .map_err(|e| NodeError::invalid(format!("bad match_regex: {e}")))?;
        match re.captures(message) {
            Some(caps) => {
                for i in 1..caps.len() {
                    let group = caps.get(i).map_or("", |m| m.as_str());
                    out = out.replace(&format!("${{{i}}}"), group);
                }
            }
            None => debug!(pattern, "match_regex did not match; rendering template as-is"),
        }
    }
    Ok(out.replace("${body}", message))
}

#[async_trait]
impl ExecutableNode for TemplateNode {
    async fn execute(
        &self,
        node: &mut Node,
        ctx: &ExecutionContext<'_>,
    ) -> Result<NodeOutcome, NodeError> {
        let message = Self::input(node, ctx)?;
        let pattern = node.get("match_regex").map(as_text).unwrap_or_default();
        let template = node
            .get("reply_template")
            .map(as_text)
            .ok_or_else(|| NodeError::invalid("template node missing reply_template"))?;

        let rendered = render(&pattern, &template, &message)?;
        info!(run_id = ctx.run_id(), node_id = %node.id, "template rendered: {}", node.display_name());

        node.set("output", rendered);
        node.status = NodeStatus::Done;
        Ok(NodeOutcome::Continue)
    }
}
