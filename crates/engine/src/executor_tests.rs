//! Run-loop tests for the workflow execution engine.
//!
//! Handlers are `MockNode`s or the built-ins from the `nodes` crate. Tests
//! that depend on elapsed time run on a paused clock (`start_paused`), so
//! back-off and deadlines are asserted exactly without real sleeping.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;

use nodes::mock::MockNode;
use nodes::{Node, NodeError, NodeStatus, WaiterTable};

use crate::executor::backoff_delay;
use crate::{
    CancelReason, CancellationToken, Connection, EngineError, ExecutorConfig, Graph,
    NodeDefinition, NodeRegistry, RunStatus, WorkflowDefinition, WorkflowExecutor,
};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn test_config() -> ExecutorConfig {
    ExecutorConfig {
        retry_base_delay: Duration::from_millis(100),
        ..ExecutorConfig::default()
    }
}

fn executor(registry: NodeRegistry, config: ExecutorConfig) -> WorkflowExecutor {
    WorkflowExecutor::new(Arc::new(registry), config)
}

/// Registry holding a single mock under the `mock` tag.
fn mock_registry(mock: &Arc<MockNode>) -> NodeRegistry {
    let registry = NodeRegistry::new();
    registry.register("mock", mock.clone());
    registry
}

/// ids[0] → ids[1] → … → ids[n-1], every node of type `mock`.
fn linear_graph(ids: &[&str]) -> Graph {
    let nodes = ids.iter().enumerate().map(|(i, id)| {
        let node = Node::new(*id, "mock");
        match ids.get(i + 1) {
            Some(next) => node.with_next([*next]),
            None => node,
        }
    });
    Graph::new("run-test", ids[0], nodes).expect("valid graph")
}

// ============================================================
// Walk and successor selection
// ============================================================

#[tokio::test]
async fn lone_start_node_completes_without_touching_anything_else() {
    let start = Arc::new(MockNode::returning("start", json!("ok")));
    let task = Arc::new(MockNode::returning("task", json!("never")));
    let registry = NodeRegistry::new();
    registry.register("start", start.clone());
    registry.register("task", task.clone());

    let graph = Graph::new(
        "run-1",
        "s",
        vec![Node::new("s", "start"), Node::new("t", "task")],
    )
    .unwrap();
    let report = executor(registry, test_config())
        .run(graph, CancellationToken::new())
        .await;

    assert!(report.is_success());
    assert_eq!(report.path, vec!["s"]);
    assert_eq!(start.call_count(), 1);
    assert_eq!(task.call_count(), 0);
    assert_eq!(report.status_of("s"), Some(NodeStatus::Done));
    assert_eq!(report.status_of("t"), Some(NodeStatus::Pending));
}

#[tokio::test]
async fn linear_workflow_runs_in_order() {
    let mock = Arc::new(MockNode::returning("worker", json!({ "step": 1 })));
    let report = executor(mock_registry(&mock), test_config())
        .run(linear_graph(&["a", "b", "c"]), CancellationToken::new())
        .await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(mock.seen(), vec!["a", "b", "c"]);
    assert_eq!(report.completed(), vec!["a", "b", "c"]);
    assert_eq!(report.nodes["c"].payload["handledBy"], "worker");
    assert!(report.error.is_none());
}

#[tokio::test]
async fn false_decision_takes_the_second_branch() {
    let mock = Arc::new(MockNode::returning("branch", json!(null)));
    let registry = NodeRegistry::with_builtins(Arc::new(WaiterTable::new()));
    registry.register("mock", mock.clone());

    let graph = Graph::new(
        "run-d",
        "d",
        vec![
            Node::new("d", "decision").with("condition", "no").with_next(["yes", "no"]),
            Node::new("yes", "mock"),
            Node::new("no", "mock"),
        ],
    )
    .unwrap();
    let report = executor(registry, test_config())
        .run(graph, CancellationToken::new())
        .await;

    assert!(report.is_success());
    assert_eq!(report.path, vec!["d", "no"]);
    assert_eq!(mock.seen(), vec!["no"]);
    assert_eq!(report.nodes["d"].payload["decision"], false);
    assert_eq!(report.status_of("yes"), Some(NodeStatus::Pending));
}

#[tokio::test]
async fn branching_handler_bypasses_next() {
    let jumper = Arc::new(MockNode::branching_to("jumper", "c"));
    let mock = Arc::new(MockNode::returning("worker", json!(1)));
    let registry = mock_registry(&mock);
    registry.register("jump", jumper.clone());

    let graph = Graph::new(
        "run-j",
        "a",
        vec![
            Node::new("a", "jump").with_next(["b"]),
            Node::new("b", "mock"),
            Node::new("c", "mock"),
        ],
    )
    .unwrap();
    let report = executor(registry, test_config())
        .run(graph, CancellationToken::new())
        .await;

    assert_eq!(report.path, vec!["a", "c"]);
    assert_eq!(mock.seen(), vec!["c"]);
}

#[tokio::test]
async fn multiple_successors_on_a_plain_node_are_ambiguous() {
    let mock = Arc::new(MockNode::returning("fanout", json!(1)));
    let graph = Graph::new(
        "run-a",
        "a",
        vec![
            Node::new("a", "mock").with_next(["b", "c"]),
            Node::new("b", "mock"),
            Node::new("c", "mock"),
        ],
    )
    .unwrap();
    let report = executor(mock_registry(&mock), test_config())
        .run(graph, CancellationToken::new())
        .await;

    assert_eq!(report.status, RunStatus::Failed);
    assert!(matches!(
        &report.error,
        Some(EngineError::AmbiguousSuccessor { node_id, successors })
            if node_id == "a" && successors == &vec!["b".to_string(), "c".to_string()]
    ));
    assert_eq!(mock.seen(), vec!["a"]);
    assert_eq!(report.status_of("a"), Some(NodeStatus::Failed));
}

#[tokio::test]
async fn non_branching_handler_may_not_jump() {
    let rogue = Arc::new(MockNode::rogue_branch("rogue", "b"));
    let registry = NodeRegistry::new();
    registry.register("rogue", rogue.clone());

    let graph = Graph::new(
        "run-r",
        "a",
        vec![Node::new("a", "rogue"), Node::new("b", "rogue")],
    )
    .unwrap();
    let report = executor(registry, test_config())
        .run(graph, CancellationToken::new())
        .await;

    assert!(matches!(
        report.error,
        Some(EngineError::UnexpectedBranch { ref node_id, ref target }) if node_id == "a" && target == "b"
    ));
    assert_eq!(rogue.call_count(), 1);
    assert_eq!(report.status_of("a"), Some(NodeStatus::Failed));
}

#[tokio::test]
async fn unregistered_type_is_run_fatal() {
    let graph = Graph::new("run-u", "a", vec![Node::new("a", "llm")]).unwrap();
    let report = executor(NodeRegistry::new(), test_config())
        .run(graph, CancellationToken::new())
        .await;

    assert!(matches!(report.error, Some(EngineError::UnregisteredType(ref t)) if t == "llm"));
    assert_eq!(report.path, vec!["a"]);
    assert_eq!(report.status_of("a"), Some(NodeStatus::Failed));
    assert!(report.completed().is_empty());
}

#[tokio::test]
async fn unregistered_type_mid_run_keeps_earlier_progress() {
    let mock = Arc::new(MockNode::returning("m", json!(1)));
    let graph = Graph::new(
        "run-u2",
        "a",
        vec![
            Node::new("a", "mock").with_next(["b"]),
            Node::new("b", "llm").with_next(["c"]),
            Node::new("c", "mock"),
        ],
    )
    .unwrap();
    let report = executor(mock_registry(&mock), test_config())
        .run(graph, CancellationToken::new())
        .await;

    assert!(matches!(report.error, Some(EngineError::UnregisteredType(ref t)) if t == "llm"));
    assert_eq!(report.path, vec!["a", "b"]);
    assert_eq!(report.status_of("a"), Some(NodeStatus::Done));
    assert_eq!(report.status_of("b"), Some(NodeStatus::Failed));
    assert_eq!(report.status_of("c"), Some(NodeStatus::Pending));
    assert_eq!(mock.seen(), vec!["a"]);
}

#[tokio::test]
async fn empty_or_unknown_start_fails_before_running() {
    let mock = Arc::new(MockNode::returning("m", json!(1)));
    let exec = executor(mock_registry(&mock), test_config());

    let graph = Graph::new("run-s", "", vec![Node::new("a", "mock")]).unwrap();
    let report = exec.run(graph, CancellationToken::new()).await;
    assert!(matches!(report.error, Some(EngineError::MissingStart)));

    let graph = Graph::new("run-s", "ghost", vec![Node::new("a", "mock")]).unwrap();
    let report = exec.run(graph, CancellationToken::new()).await;
    assert!(matches!(report.error, Some(EngineError::StartNotFound(ref s)) if s == "ghost"));

    assert_eq!(mock.call_count(), 0);
    assert_eq!(report.status, RunStatus::Failed);
}

// ============================================================
// Retry and timeouts
// ============================================================

#[tokio::test(start_paused = true)]
async fn flaky_node_succeeds_after_linear_backoff() {
    let mock = Arc::new(MockNode::flaky("flaky", 2, "transient failure"));
    let graph = Graph::new(
        "run-retry",
        "f",
        vec![Node::new("f", "mock").with("retries", 3)],
    )
    .unwrap();

    let began = Instant::now();
    let report = executor(mock_registry(&mock), test_config())
        .run(graph, CancellationToken::new())
        .await;
    let elapsed = began.elapsed();

    assert!(report.is_success(), "error: {:?}", report.error);
    assert_eq!(mock.call_count(), 3);
    // Two waits: 1 × 100 ms, then 2 × 100 ms.
    assert!(elapsed >= Duration::from_millis(300), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(600), "elapsed {elapsed:?}");
    assert_eq!(report.status_of("f"), Some(NodeStatus::Done));
}

#[test]
fn backoff_grows_linearly_and_saturates() {
    let base = Duration::from_millis(100);
    assert_eq!(backoff_delay(base, 1), Duration::from_millis(100));
    assert_eq!(backoff_delay(base, 3), Duration::from_millis(300));
    assert_eq!(backoff_delay(Duration::from_millis(u64::MAX), u32::MAX), Duration::MAX);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_fail_the_run_with_partial_state() {
    let ok = Arc::new(MockNode::returning("ok", json!(true)));
    let boom = Arc::new(MockNode::failing("boom", "something broke"));
    let registry = NodeRegistry::new();
    registry.register("ok", ok.clone());
    registry.register("boom", boom.clone());

    let graph = Graph::new(
        "run-x",
        "a",
        vec![
            Node::new("a", "ok").with_next(["b"]),
            Node::new("b", "boom").with("retries", "2").with_next(["c"]),
            Node::new("c", "ok"),
        ],
    )
    .unwrap();
    let report = executor(registry, test_config())
        .run(graph, CancellationToken::new())
        .await;

    let err = report.error.clone().expect("run should fail");
    assert!(matches!(
        &err,
        EngineError::NodeFailed { node_id, attempts: 2, source: NodeError::Failed(_) } if node_id == "b"
    ));
    assert!(err.to_string().contains("after 2 attempt(s)"));
    assert!(!err.is_cancelled());

    assert_eq!(boom.call_count(), 2);
    assert_eq!(ok.seen(), vec!["a"]);
    assert_eq!(report.completed(), vec!["a"]);
    assert_eq!(report.status_of("b"), Some(NodeStatus::Failed));
    assert_eq!(report.status_of("c"), Some(NodeStatus::Pending));
}

#[tokio::test(start_paused = true)]
async fn slow_attempt_hits_its_deadline() {
    let slow = Arc::new(MockNode::sleeping("slow", Duration::from_secs(5)));
    let graph = Graph::new(
        "run-t",
        "s",
        vec![Node::new("s", "mock").with("timeoutMs", 1000)],
    )
    .unwrap();
    let report = executor(mock_registry(&slow), test_config())
        .run(graph, CancellationToken::new())
        .await;

    assert!(matches!(
        report.error,
        Some(EngineError::NodeFailed { attempts: 1, source: NodeError::AttemptTimeout(d), .. })
            if d == Duration::from_secs(1)
    ));
}

#[tokio::test(start_paused = true)]
async fn default_timeout_applies_without_timeout_ms() {
    let slow = Arc::new(MockNode::sleeping("slow", Duration::from_secs(5)));
    let config = ExecutorConfig {
        default_timeout: Duration::from_millis(50),
        ..test_config()
    };
    let graph = Graph::new("run-t", "s", vec![Node::new("s", "mock")]).unwrap();
    let report = executor(mock_registry(&slow), config)
        .run(graph, CancellationToken::new())
        .await;

    assert!(matches!(
        report.error,
        Some(EngineError::NodeFailed { source: NodeError::AttemptTimeout(d), .. })
            if d == Duration::from_millis(50)
    ));
}

// ============================================================
// Cancellation
// ============================================================

#[tokio::test(start_paused = true)]
async fn cancellation_aborts_the_in_flight_attempt() {
    let slow = Arc::new(MockNode::sleeping("slow", Duration::from_secs(60)));
    let graph = Graph::new(
        "run-c",
        "s",
        vec![Node::new("s", "mock").with_next(["t"]), Node::new("t", "mock")],
    )
    .unwrap();

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let began = Instant::now();
    let report = executor(mock_registry(&slow), test_config())
        .run(graph, token)
        .await;

    assert!(began.elapsed() < Duration::from_secs(1));
    let err = report.error.expect("run should be cancelled");
    assert!(err.is_cancelled());
    assert!(matches!(
        &err,
        EngineError::Cancelled { node_id: Some(id), reason: CancelReason::Requested } if id == "s"
    ));
    assert_eq!(slow.seen(), vec!["s"]);
    assert_eq!(report.nodes["t"].status, NodeStatus::Pending);
}

#[tokio::test]
async fn cancelled_token_stops_the_run_before_the_first_node() {
    let mock = Arc::new(MockNode::returning("m", json!(1)));
    let token = CancellationToken::new();
    token.cancel();

    let report = executor(mock_registry(&mock), test_config())
        .run(linear_graph(&["a", "b"]), token)
        .await;

    assert!(report.error.as_ref().is_some_and(EngineError::is_cancelled));
    assert_eq!(mock.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn run_deadline_wins_over_a_simultaneous_attempt_deadline() {
    let slow = Arc::new(MockNode::sleeping("slow", Duration::from_secs(5)));
    let config = ExecutorConfig {
        run_timeout: Some(Duration::from_secs(1)),
        ..test_config()
    };
    let graph = Graph::new(
        "run-dl",
        "s",
        vec![Node::new("s", "mock").with("timeoutMs", 1000).with("retries", 3)],
    )
    .unwrap();
    let report = executor(mock_registry(&slow), config)
        .run(graph, CancellationToken::new())
        .await;

    assert!(matches!(
        report.error,
        Some(EngineError::Cancelled { reason: CancelReason::Deadline, .. })
    ));
    assert_eq!(slow.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn run_deadline_interrupts_backoff() {
    let boom = Arc::new(MockNode::failing("boom", "nope"));
    let config = ExecutorConfig {
        retry_base_delay: Duration::from_secs(10),
        run_timeout: Some(Duration::from_secs(2)),
        ..ExecutorConfig::default()
    };
    let graph = Graph::new(
        "run-bo",
        "b",
        vec![Node::new("b", "mock").with("retries", 5)],
    )
    .unwrap();

    let began = Instant::now();
    let report = executor(mock_registry(&boom), config)
        .run(graph, CancellationToken::new())
        .await;

    assert!(report.error.as_ref().is_some_and(EngineError::is_cancelled));
    assert_eq!(boom.call_count(), 1);
    assert!(began.elapsed() < Duration::from_secs(3));
}

// ============================================================
// Suspension
// ============================================================

#[tokio::test(start_paused = true)]
async fn wait_event_resumes_on_delivery_and_feeds_downstream() {
    let waiters = Arc::new(WaiterTable::new());
    let registry = NodeRegistry::with_builtins(waiters.clone());
    // Suspending nodes are not bounded by the default deadline.
    let config = ExecutorConfig {
        default_timeout: Duration::from_millis(50),
        ..test_config()
    };

    let graph = Graph::new(
        "run-wait",
        "s",
        vec![
            Node::new("s", "start").with_next(["w"]),
            Node::new("w", "wait_event").with_next(["reply"]),
            Node::new("reply", "template")
                .with("inputFrom", "w")
                .with("match_regex", r"^order (\d+)$")
                .with("reply_template", "Order ${1} confirmed"),
        ],
    )
    .unwrap();

    let deliverer = {
        let waiters = waiters.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            loop {
                if waiters.deliver("run-wait", "w", json!("order 42")) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
    };

    let report = executor(registry, config)
        .run(graph, CancellationToken::new())
        .await;
    deliverer.await.unwrap();

    assert!(report.is_success(), "error: {:?}", report.error);
    assert_eq!(report.path, vec!["s", "w", "reply"]);
    assert_eq!(report.nodes["w"].payload["input"], "order 42");
    assert_eq!(report.nodes["reply"].payload["output"], "Order 42 confirmed");
    assert_eq!(waiters.pending(), 0);
}

#[tokio::test(start_paused = true)]
async fn wait_timeout_is_distinguishable() {
    let waiters = Arc::new(WaiterTable::new());
    let graph = Graph::new(
        "run-wt",
        "w",
        vec![Node::new("w", "wait_event").with("timeoutSeconds", 1)],
    )
    .unwrap();
    let report = executor(NodeRegistry::with_builtins(waiters.clone()), test_config())
        .run(graph, CancellationToken::new())
        .await;

    let err = report.error.expect("wait should time out");
    assert!(err.is_wait_timeout());
    assert!(!err.is_cancelled());
    assert_eq!(err.node_id(), Some("w"));
    assert_eq!(report.nodes["w"].status, NodeStatus::Failed);
    assert_eq!(waiters.pending(), 0);
}

// ============================================================
// Definitions
// ============================================================

fn fast_task(id: &str) -> NodeDefinition {
    NodeDefinition::new(id, "task").with("sleepMs", 0)
}

#[tokio::test]
async fn definition_runs_through_labels_and_legacy_ids() {
    let mut legacy = fast_task("n-2");
    legacy.legacy_id = Some("old-2".into());

    let definition = WorkflowDefinition::new(
        "aliases",
        vec![
            fast_task("n-3").with_label("Finish"),
            NodeDefinition::new("n-1", "start").with_label("Begin"),
            legacy,
        ],
        vec![
            Connection::new("Begin", "old-2"),
            Connection::new("old-2", "Finish"),
            Connection::new("", "n-3"),
        ],
    );

    let exec = executor(
        NodeRegistry::with_builtins(Arc::new(WaiterTable::new())),
        test_config(),
    );
    let report = exec
        .execute(&definition, CancellationToken::new())
        .await
        .expect("definition should be valid");

    assert!(report.is_success(), "error: {:?}", report.error);
    assert_eq!(report.path, vec!["n-1", "n-2", "n-3"]);
    assert_eq!(report.nodes["n-3"].payload["output"]["nodeId"], "n-3");

    let json = report.to_json().unwrap();
    assert!(json.contains("\"status\": \"completed\""));
    assert!(!json.contains("\"error\""));
}

fn looping_definition() -> WorkflowDefinition {
    WorkflowDefinition::new(
        "loop",
        vec![
            NodeDefinition::new("d", "decision").with("condition", true),
            fast_task("x"),
        ],
        vec![Connection::new("d", "d"), Connection::new("d", "x")],
    )
    .with_start("d")
}

#[tokio::test]
async fn preflight_rejects_cyclic_definitions() {
    let exec = executor(
        NodeRegistry::with_builtins(Arc::new(WaiterTable::new())),
        test_config(),
    );

    let err = exec
        .execute(&looping_definition(), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NoRootNode));

    let cyclic = WorkflowDefinition::new(
        "cycle",
        vec![
            NodeDefinition::new("s", "start"),
            fast_task("a"),
            fast_task("b"),
        ],
        vec![
            Connection::new("s", "a"),
            Connection::new("a", "b"),
            Connection::new("b", "a"),
        ],
    );
    let err = exec
        .execute(&cyclic, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::CycleDetected(ids) if ids == vec!["a", "b"]));
}

#[tokio::test]
async fn decision_loop_is_bounded_by_max_steps() {
    let config = ExecutorConfig {
        preflight_sort: false,
        max_steps: 5,
        ..test_config()
    };
    let exec = executor(
        NodeRegistry::with_builtins(Arc::new(WaiterTable::new())),
        config,
    );

    let report = exec
        .execute(&looping_definition(), CancellationToken::new())
        .await
        .expect("construction should succeed");

    assert!(matches!(report.error, Some(EngineError::StepLimitExceeded(5))));
    assert_eq!(report.path.len(), 5);
    assert!(report.path.iter().all(|id| id == "d"));
    assert_eq!(report.status_of("x"), Some(NodeStatus::Pending));

    let json = report.to_json().unwrap();
    assert!(json.contains("\"status\": \"failed\""));
    assert!(json.contains("run exceeded 5 steps"));
}
