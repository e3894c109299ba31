//! Workflow execution engine.
//!
//! `WorkflowExecutor` is the central orchestrator:
//! 1. Optionally validates the graph and logs its topological order.
//! 2. Walks the graph one node at a time from `start`, dispatching each node
//!    through the `ExecutableNode` registered for its type.
//! 3. Follows the handler's branch choice, or the node's single `next` entry;
//!    a node with no successors ends the run.
//! 4. Applies per-node retries with linear back-off and a per-attempt
//!    deadline, and aborts promptly on cancellation or run deadline.
//!
//! A run never fans out: exactly one node is active at any time.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use nodes::value::lenient_u64;
use nodes::{ExecutableNode, ExecutionContext, Node, NodeError, NodeOutcome, NodeStatus};

use crate::builder::build_graph;
use crate::dag::topological_sort;
use crate::error::CancelReason;
use crate::{EngineError, Graph, NodeRegistry, WorkflowDefinition};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Back-off unit; the wait after failed attempt `n` is `n × retry_base_delay`.
    pub retry_base_delay: Duration,
    /// Per-attempt deadline for nodes without `timeoutMs`. Not applied to
    /// suspending handlers.
    pub default_timeout: Duration,
    /// Deadline for the whole run. Expiry cancels the run.
    pub run_timeout: Option<Duration>,
    /// Maximum number of node executions in one run.
    pub max_steps: usize,
    /// Reject cyclic definitions before running them.
    pub preflight_sort: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            retry_base_delay: Duration::from_millis(500),
            default_timeout: Duration::from_secs(30),
            run_timeout: None,
            max_steps: 10_000,
            preflight_sort: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Output of a finished run
// ---------------------------------------------------------------------------

/// Graph-level run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    NotStarted,
    Running,
    Completed,
    Failed,
}

/// Final state of a run: terminal status, the nodes visited in order, every
/// node's final status and payload, and the error that ended the run if any.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: String,
    pub status: RunStatus,
    /// Node ids in execution order; a node appears once per visit.
    pub path: Vec<String>,
    pub nodes: BTreeMap<String, Node>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(serialize_with = "error_text", skip_serializing_if = "Option::is_none")]
    pub error: Option<EngineError>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Ids of nodes that reached `done`, in execution order.
    pub fn completed(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for id in &self.path {
            let done = self.nodes.get(id).is_some_and(|n| n.status == NodeStatus::Done);
            if done && !seen.contains(&id.as_str()) {
                seen.push(id.as_str());
            }
        }
        seen
    }

    pub fn status_of(&self, id: &str) -> Option<NodeStatus> {
        self.nodes.get(id).map(|n| n.status)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn error_text<S: Serializer>(error: &Option<EngineError>, s: S) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => s.serialize_some(&e.to_string()),
        None => s.serialize_none(),
    }
}

// ---------------------------------------------------------------------------
// WorkflowExecutor
// ---------------------------------------------------------------------------

/// Stateless orchestrator. One executor can drive any number of concurrent
/// runs; each run owns its own [`Graph`].
pub struct WorkflowExecutor {
    registry: Arc<NodeRegistry>,
    config: ExecutorConfig,
}

impl WorkflowExecutor {
    /// Create a new executor.
    pub fn new(registry: Arc<NodeRegistry>, config: ExecutorConfig) -> Self {
        Self { registry, config }
    }

    /// Build, validate and run a saved definition.
    ///
    /// # Errors
    /// Construction and validation errors are returned before anything runs.
    /// Once the run starts, failures are reported in the [`RunReport`].
    pub async fn execute(
        &self,
        definition: &WorkflowDefinition,
        cancel: CancellationToken,
    ) -> Result<RunReport, EngineError> {
        let built = build_graph(&definition.nodes, &definition.connections, &definition.aliases)?;
        let graph = Graph::assemble(&built, definition.start.as_deref())?;

        if self.config.preflight_sort {
            let sorted = topological_sort(&built)?;
            info!(
                "DAG validated — {} nodes in {} layers: {:?}",
                sorted.order.len(),
                sorted.layers.len(),
                sorted.order
            );
        }

        Ok(self.run(graph, cancel).await)
    }

    /// Run `graph` to completion, failure or cancellation.
    #[instrument(skip(self, graph, cancel), fields(run_id = %graph.run_id))]
    pub async fn run(&self, mut graph: Graph, cancel: CancellationToken) -> RunReport {
        let started_at = Utc::now();
        let deadline = self.config.run_timeout.map(|t| Instant::now() + t);
        let mut state = RunState {
            status: RunStatus::NotStarted,
            path: Vec::new(),
        };

        let error = match self.drive(&mut graph, &cancel, deadline, &mut state).await {
            Ok(()) => {
                info!(steps = state.path.len(), "run completed");
                state.status = RunStatus::Completed;
                None
            }
            Err(e) => {
                if e.is_cancelled() {
                    warn!(steps = state.path.len(), "run cancelled: {e}");
                } else {
                    error!(steps = state.path.len(), "run failed: {e}");
                }
                state.status = RunStatus::Failed;
                Some(e)
            }
        };

        RunReport {
            run_id: graph.run_id,
            status: state.status,
            path: state.path,
            nodes: graph.nodes.into_iter().collect(),
            started_at,
            finished_at: Utc::now(),
            error,
        }
    }

    // -----------------------------------------------------------------------
    // Internal: the sequential walk.
    // -----------------------------------------------------------------------

    async fn drive(
        &self,
        graph: &mut Graph,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
        state: &mut RunState,
    ) -> Result<(), EngineError> {
        if graph.start.is_empty() {
            return Err(EngineError::MissingStart);
        }
        if !graph.nodes.contains_key(&graph.start) {
            return Err(EngineError::StartNotFound(graph.start.clone()));
        }

        state.status = RunStatus::Running;
        let mut current = graph.start.clone();

        loop {
            if state.path.len() >= self.config.max_steps {
                return Err(EngineError::StepLimitExceeded(self.config.max_steps));
            }
            if let Some(reason) = cancel_reason(cancel, deadline) {
                return Err(EngineError::Cancelled {
                    node_id: Some(current),
                    reason,
                });
            }

            let node_type = graph
                .nodes
                .get(&current)
                .map(|n| n.node_type.clone())
                .ok_or_else(|| EngineError::NodeNotFound(current.clone()))?;
            let handler = match self.registry.lookup(&node_type) {
                Ok(handler) => handler,
                Err(e) => {
                    state.path.push(current.clone());
                    if let Some(node) = graph.nodes.get_mut(&current) {
                        node.status = NodeStatus::Failed;
                    }
                    return Err(e);
                }
            };

            // The node is lent to its handler; the rest of the graph stays
            // readable through the context.
            let Some(mut node) = graph.nodes.remove(&current) else {
                return Err(EngineError::NodeNotFound(current));
            };
            state.path.push(current.clone());
            info!(node_id = %current, %node_type, "executing node: {}", node.display_name());

            let result = {
                let ctx = ExecutionContext::new(&graph.run_id, &graph.nodes);
                self.execute_with_retry(handler.as_ref(), &mut node, &ctx, cancel, deadline)
                    .await
            };
            let next = result.and_then(|outcome| select_next(&node, handler.as_ref(), outcome));
            if next.is_err() {
                node.status = NodeStatus::Failed;
            }
            graph.nodes.insert(current.clone(), node);

            match next? {
                Some(next_id) => {
                    debug!(from = %current, to = %next_id, "advancing");
                    current = next_id;
                }
                None => return Ok(()),
            }
        }
    }

    // -----------------------------------------------------------------------
    // Internal: execute a single node with retry logic.
    // -----------------------------------------------------------------------

    async fn execute_with_retry(
        &self,
        handler: &dyn ExecutableNode,
        node: &mut Node,
        ctx: &ExecutionContext<'_>,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<NodeOutcome, EngineError> {
        let node_id = node.id.clone();
        let retries = node
            .get("retries")
            .and_then(lenient_u64)
            .map_or(1, |n| u32::try_from(n).unwrap_or(u32::MAX).max(1));
        let timeout = node
            .get("timeoutMs")
            .and_then(lenient_u64)
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .or_else(|| (!handler.suspends()).then_some(self.config.default_timeout));

        let mut attempt = 0u32;

        loop {
            attempt += 1;
            node.status = NodeStatus::Running;
            debug!(node_id = %node_id, attempt, retries, ?timeout, "attempt started");

            let result = tokio::select! {
                biased;
                reason = cancelled(cancel, deadline) => Err(reason),
                r = attempt_once(handler, node, ctx, timeout) => Ok(r),
            };

            let err = match result {
                Ok(Ok(outcome)) => {
                    node.status = NodeStatus::Done;
                    return Ok(outcome);
                }
                Ok(Err(err)) => err,
                Err(reason) => {
                    node.status = NodeStatus::Failed;
                    return Err(EngineError::Cancelled {
                        node_id: Some(node_id),
                        reason,
                    });
                }
            };

            node.status = NodeStatus::Failed;

            // An attempt that failed because the run was being torn down
            // reports the cancellation, not its own error.
            if let Some(reason) = cancel_reason(cancel, deadline) {
                return Err(EngineError::Cancelled {
                    node_id: Some(node_id),
                    reason,
                });
            }

            if attempt >= retries {
                return Err(EngineError::NodeFailed {
                    node_id,
                    attempts: attempt,
                    source: err,
                });
            }

            let delay = backoff_delay(self.config.retry_base_delay, attempt);
            warn!(
                "node '{}' failed (attempt {}/{}), retrying in {:?}: {}",
                node_id, attempt, retries, delay, err
            );

            tokio::select! {
                biased;
                reason = cancelled(cancel, deadline) => {
                    return Err(EngineError::Cancelled { node_id: Some(node_id), reason });
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

struct RunState {
    status: RunStatus,
    path: Vec<String>,
}

/// Decide where the walk goes after `node` succeeded.
fn select_next(
    node: &Node,
    handler: &dyn ExecutableNode,
    outcome: NodeOutcome,
) -> Result<Option<String>, EngineError> {
    if let NodeOutcome::Branch(target) = outcome {
        if !target.is_empty() {
            if !handler.branching() {
                return Err(EngineError::UnexpectedBranch {
                    node_id: node.id.clone(),
                    target,
                });
            }
            debug!(node_id = %node.id, next_id = %target, "branch selected");
            return Ok(Some(target));
        }
    }

    match node.next.as_slice() {
        [] => Ok(None),
        [only] => Ok(Some(only.clone())),
        many => Err(EngineError::AmbiguousSuccessor {
            node_id: node.id.clone(),
            successors: many.to_vec(),
        }),
    }
}

/// Linear back-off after failed attempt `attempt`, clamped at `Duration::MAX`.
pub(crate) fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(attempt)
}

async fn attempt_once(
    handler: &dyn ExecutableNode,
    node: &mut Node,
    ctx: &ExecutionContext<'_>,
    timeout: Option<Duration>,
) -> Result<NodeOutcome, NodeError> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, handler.execute(node, ctx))
            .await
            .unwrap_or_else(|_| Err(NodeError::AttemptTimeout(limit))),
        None => handler.execute(node, ctx).await,
    }
}

/// Resolves once the run must stop.
async fn cancelled(token: &CancellationToken, deadline: Option<Instant>) -> CancelReason {
    match deadline {
        Some(at) => tokio::select! {
            biased;
            _ = token.cancelled() => CancelReason::Requested,
            _ = tokio::time::sleep_until(at) => CancelReason::Deadline,
        },
        None => {
            token.cancelled().await;
            CancelReason::Requested
        }
    }
}

fn cancel_reason(token: &CancellationToken, deadline: Option<Instant>) -> Option<CancelReason> {
    if token.is_cancelled() {
        Some(CancelReason::Requested)
    } else if deadline.is_some_and(|at| Instant::now() >= at) {
        Some(CancelReason::Deadline)
    } else {
        None
    }
}
