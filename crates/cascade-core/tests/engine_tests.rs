//! Integration tests for the workflow execution engine, driven through a
//! scripted project executor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use cascade_core::config::EngineConfig;
use cascade_core::engine::{ExecutionRequest, WorkflowEngine};
use cascade_core::mapper;
use cascade_core::model::{
    ExecutionOptions, ExecutionStatus, NodeExecutionStatus, ProjectExecutionRequest,
    ProjectExecutionResult, ResourceUsage, Workflow, WorkflowExecution,
};
use cascade_core::process::{CancelToken, EXIT_CANCELLED};
use cascade_core::project::ProjectExecutor;
use cascade_core::store::{
    AllowAll, ExecutionStore, MemoryExecutionStore, MemoryWorkflowStore, PermissionChecker,
    WorkflowStore,
};
use cascade_core::{NodeErrorType, Result};

// ---------------------------------------------------------------------------
// Scripted project executor
// ---------------------------------------------------------------------------

/// Per-program behavior for the mock executor.
#[derive(Debug, Clone)]
enum Behavior {
    /// Succeed with a fixed stdout.
    Emit(&'static str),
    /// Parse the named parameter as an integer, add one, print it.
    Increment(&'static str),
    /// Print the named parameter's textual form.
    EchoParam(&'static str),
    /// Exit with the given non-zero code.
    Fail(i32),
    /// Fail the first `n` attempts, then succeed with the given stdout.
    FailThenEmit(u32, &'static str),
    /// Sleep, observing cancellation, then succeed.
    Sleep(u64),
}

struct MockExecutor {
    behaviors: HashMap<String, Behavior>,
    attempts: Mutex<HashMap<String, u32>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl MockExecutor {
    fn new(behaviors: Vec<(&str, Behavior)>) -> Arc<Self> {
        Arc::new(Self {
            behaviors: behaviors
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            attempts: Mutex::new(HashMap::new()),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
        })
    }

    fn max_observed_concurrency(&self) -> usize {
        self.max_running.load(Ordering::Relaxed)
    }

    fn ok(execution_id: Uuid, stdout: String) -> ProjectExecutionResult {
        ProjectExecutionResult {
            execution_id,
            success: true,
            exit_code: 0,
            output: stdout,
            error_output: String::new(),
            duration_ms: 5,
            output_files: Vec::new(),
            resource_usage: ResourceUsage::default(),
            error_type: None,
        }
    }

    fn failed(execution_id: Uuid, exit_code: i32) -> ProjectExecutionResult {
        ProjectExecutionResult {
            execution_id,
            success: false,
            exit_code,
            output: String::new(),
            error_output: format!("program exited with code {exit_code}"),
            duration_ms: 5,
            output_files: Vec::new(),
            resource_usage: ResourceUsage::default(),
            error_type: Some(NodeErrorType::ExecutionError),
        }
    }
}

#[async_trait]
impl ProjectExecutor for MockExecutor {
    async fn execute_project(
        &self,
        request: ProjectExecutionRequest,
        cancel: CancelToken,
    ) -> ProjectExecutionResult {
        let execution_id = request.execution_id.unwrap_or_else(Uuid::new_v4);
        let (params, _) = mapper::to_json(&request.parameters);

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);

        let behavior = self.behaviors.get(&request.program_id).cloned();
        let result = match behavior {
            Some(Behavior::Emit(stdout)) => Self::ok(execution_id, stdout.to_string()),
            Some(Behavior::Increment(field)) => {
                let current = match &params[field] {
                    Value::Number(n) => n.as_i64().unwrap_or(0),
                    Value::String(s) => s.parse().unwrap_or(0),
                    _ => 0,
                };
                Self::ok(execution_id, (current + 1).to_string())
            }
            Some(Behavior::EchoParam(field)) => {
                let text = match &params[field] {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                Self::ok(execution_id, text)
            }
            Some(Behavior::Fail(code)) => Self::failed(execution_id, code),
            Some(Behavior::FailThenEmit(failures, stdout)) => {
                let mut attempts = self.attempts.lock().unwrap();
                let attempt = attempts.entry(request.program_id.clone()).or_insert(0);
                *attempt += 1;
                if *attempt <= failures {
                    Self::failed(execution_id, 1)
                } else {
                    Self::ok(execution_id, stdout.to_string())
                }
            }
            Some(Behavior::Sleep(ms)) => {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(ms)) => {
                        let mut result = Self::ok(execution_id, "slept".to_string());
                        result.duration_ms = ms;
                        result
                    }
                    _ = cancel.cancelled() => ProjectExecutionResult {
                        execution_id,
                        success: false,
                        exit_code: EXIT_CANCELLED,
                        output: String::new(),
                        error_output: "process cancelled".to_string(),
                        duration_ms: 5,
                        output_files: Vec::new(),
                        resource_usage: ResourceUsage::default(),
                        error_type: Some(NodeErrorType::Cancelled),
                    },
                }
            }
            None => Self::failed(execution_id, 127),
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    engine: WorkflowEngine<MockExecutor>,
    executions: Arc<MemoryExecutionStore>,
    workflows: Arc<MemoryWorkflowStore>,
    mock: Arc<MockExecutor>,
}

fn harness(behaviors: Vec<(&str, Behavior)>) -> Harness {
    let mock = MockExecutor::new(behaviors);
    let executions = Arc::new(MemoryExecutionStore::new());
    let workflows = Arc::new(MemoryWorkflowStore::new());
    let exec_store: Arc<dyn ExecutionStore> = executions.clone();
    let wf_store: Arc<dyn WorkflowStore> = workflows.clone();
    let engine = WorkflowEngine::new(
        &EngineConfig::default(),
        Arc::clone(&mock),
        exec_store,
        wf_store,
        Arc::new(AllowAll),
    );
    Harness {
        engine,
        executions,
        workflows,
        mock,
    }
}

fn workflow(nodes: Value, edges: Value) -> Workflow {
    serde_json::from_value(json!({
        "id": "wf",
        "name": "wf",
        "status": "active",
        "permissions": {"createdBy": "owner"},
        "nodes": nodes,
        "edges": edges
    }))
    .unwrap()
}

fn edge(from: &str, to: &str) -> Value {
    json!({"id": format!("{from}-{to}"), "sourceNodeId": from, "targetNodeId": to})
}

/// Output configuration publishing stdout under the custom name `x`.
fn out_x() -> Value {
    json!({"outputMappings": [{"outputName": "x", "sourceField": "stdout"}]})
}

/// Input configuration mapping `x` from an upstream node's `x` output.
fn in_x(from: &str) -> Value {
    json!({"inputMappings": [{
        "inputName": "x", "sourceNodeId": from, "sourceOutputName": "x"
    }]})
}

async fn run_to_end(
    h: &Harness,
    wf: Workflow,
    options: Option<ExecutionOptions>,
) -> WorkflowExecution {
    h.workflows.create(wf).await.unwrap();
    let mut request = ExecutionRequest::new("wf", "owner");
    request.options = options;
    let submitted = h.engine.execute(request).await.unwrap();
    h.engine.wait_for_completion(submitted.id).await.unwrap()
}

fn node_status(execution: &WorkflowExecution, node_id: &str) -> NodeExecutionStatus {
    execution.node_execution(node_id).unwrap().status
}

// ---------------------------------------------------------------------------
// Scenario 1: linear chain, all succeed
// ---------------------------------------------------------------------------

#[tokio::test]
async fn linear_chain_propagates_data() {
    let h = harness(vec![
        ("emit", Behavior::Emit("1")),
        ("inc", Behavior::Increment("x")),
    ]);
    let wf = workflow(
        json!([
            {"id": "a", "name": "A", "programId": "emit", "outputConfiguration": out_x()},
            {"id": "b", "name": "B", "programId": "inc",
             "inputConfiguration": in_x("a"), "outputConfiguration": out_x()},
            {"id": "c", "name": "C", "programId": "inc",
             "inputConfiguration": in_x("b"), "outputConfiguration": out_x()}
        ]),
        json!([edge("a", "b"), edge("b", "c")]),
    );

    let done = run_to_end(&h, wf, None).await;

    assert_eq!(done.status, ExecutionStatus::Completed);
    for id in ["a", "b", "c"] {
        assert_eq!(node_status(&done, id), NodeExecutionStatus::Completed, "node {id}");
    }

    let results = done.results.clone().unwrap();
    assert_eq!(results.final_outputs["a"]["x"], json!("1"));
    assert_eq!(results.final_outputs["b"]["x"], json!("2"));
    assert_eq!(results.final_outputs["c"]["x"], json!("3"));

    assert_eq!(done.progress.completed_nodes, 3);
    assert_eq!(done.progress.percent_complete, 100.0);

    // Order: each node started only after its predecessor completed.
    let completed_a = done.node_execution("a").unwrap().completed_at.unwrap();
    let started_b = done.node_execution("b").unwrap().started_at.unwrap();
    assert!(started_b >= completed_a);
}

// ---------------------------------------------------------------------------
// Scenario 2: diamond under a concurrency bound
// ---------------------------------------------------------------------------

#[tokio::test]
async fn diamond_respects_concurrency_bound() {
    let h = harness(vec![
        ("emit", Behavior::Emit("go")),
        ("slow", Behavior::Sleep(150)),
    ]);
    let wf = workflow(
        json!([
            {"id": "a", "name": "A", "programId": "emit"},
            {"id": "b", "name": "B", "programId": "slow"},
            {"id": "c", "name": "C", "programId": "slow"},
            {"id": "d", "name": "D", "programId": "emit"}
        ]),
        json!([edge("a", "b"), edge("a", "c"), edge("b", "d"), edge("c", "d")]),
    );

    let options = ExecutionOptions {
        max_concurrent_nodes: 2,
        ..ExecutionOptions::default()
    };
    let done = run_to_end(&h, wf, Some(options)).await;

    assert_eq!(done.status, ExecutionStatus::Completed);
    assert!(h.mock.max_observed_concurrency() <= 2);

    // D ran only after both B and C finished.
    let started_d = done.node_execution("d").unwrap().started_at.unwrap();
    for id in ["b", "c"] {
        let completed = done.node_execution(id).unwrap().completed_at.unwrap();
        assert!(started_d >= completed, "d started before {id} completed");
    }
}

// ---------------------------------------------------------------------------
// Scenario 3: failure without continue_on_error
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failure_stops_the_run() {
    let h = harness(vec![
        ("emit", Behavior::Emit("ok")),
        ("boom", Behavior::Fail(2)),
    ]);
    let wf = workflow(
        json!([
            {"id": "a", "name": "A", "programId": "emit"},
            {"id": "b", "name": "B", "programId": "boom"},
            {"id": "c", "name": "C", "programId": "emit"},
            {"id": "d", "name": "D", "programId": "emit"}
        ]),
        json!([edge("a", "b"), edge("b", "c"), edge("c", "d")]),
    );

    let done = run_to_end(&h, wf, None).await;

    assert_eq!(done.status, ExecutionStatus::Failed);
    assert_eq!(node_status(&done, "a"), NodeExecutionStatus::Completed);
    assert_eq!(node_status(&done, "b"), NodeExecutionStatus::Failed);
    // Dependents of the failed node were never dispatched.
    assert_eq!(node_status(&done, "c"), NodeExecutionStatus::Pending);
    assert_eq!(node_status(&done, "d"), NodeExecutionStatus::Pending);

    let b = done.node_execution("b").unwrap();
    let error = b.error.as_ref().unwrap();
    assert_eq!(error.error_type, NodeErrorType::ExecutionError);
    assert_eq!(error.exit_code, Some(2));

    assert_eq!(done.progress.completed_nodes, 1);
    assert_eq!(done.progress.failed_nodes, 1);
    assert_eq!(done.progress.running_nodes, 0);

    let failure = done.error.unwrap();
    assert_eq!(failure.error_type, NodeErrorType::ExecutionError);
    assert_eq!(failure.failed_node_ids, vec!["b".to_string()]);
}

// ---------------------------------------------------------------------------
// Scenario 4: failure with continue_on_error
// ---------------------------------------------------------------------------

#[tokio::test]
async fn continue_on_error_completes_with_failures() {
    let h = harness(vec![
        ("emit", Behavior::Emit("ok")),
        ("boom", Behavior::Fail(2)),
    ]);
    let wf = workflow(
        json!([
            {"id": "a", "name": "A", "programId": "emit"},
            {"id": "b", "name": "B", "programId": "boom"},
            {"id": "c", "name": "C", "programId": "emit"},
            {"id": "d", "name": "D", "programId": "emit"}
        ]),
        json!([edge("a", "b"), edge("a", "c"), edge("b", "d"), edge("c", "d")]),
    );

    let options = ExecutionOptions {
        continue_on_error: true,
        ..ExecutionOptions::default()
    };
    let done = run_to_end(&h, wf, Some(options)).await;

    assert_eq!(done.status, ExecutionStatus::Completed);
    assert_eq!(node_status(&done, "b"), NodeExecutionStatus::Failed);
    // The independent branch completed.
    assert_eq!(node_status(&done, "c"), NodeExecutionStatus::Completed);
    // d depends on the failed b without an optional mapping.
    assert_eq!(node_status(&done, "d"), NodeExecutionStatus::Skipped);

    let results = done.results.unwrap();
    assert!(results.summary.contains("1 failed"));
    assert!(results.summary.contains("1 skipped"));

    // Completion implies full coverage: every node is terminal.
    assert!(done
        .node_executions
        .iter()
        .all(|ne| ne.status.is_terminal()));
}

// ---------------------------------------------------------------------------
// Scenario 5: optional dependency with default
// ---------------------------------------------------------------------------

#[tokio::test]
async fn optional_dependency_uses_default_when_source_fails() {
    let h = harness(vec![
        ("boom", Behavior::Fail(1)),
        ("echo-y", Behavior::EchoParam("y")),
    ]);
    let wf = workflow(
        json!([
            {"id": "b", "name": "B", "programId": "boom"},
            {"id": "d", "name": "D", "programId": "echo-y", "inputConfiguration": {
                "inputMappings": [{
                    "inputName": "y", "sourceNodeId": "b", "sourceOutputName": "x",
                    "isOptional": true, "defaultValue": 0
                }]
            }, "outputConfiguration": out_x()}
        ]),
        json!([edge("b", "d")]),
    );

    let options = ExecutionOptions {
        continue_on_error: true,
        ..ExecutionOptions::default()
    };
    let done = run_to_end(&h, wf, Some(options)).await;

    assert_eq!(done.status, ExecutionStatus::Completed);
    assert_eq!(node_status(&done, "b"), NodeExecutionStatus::Failed);
    assert_eq!(node_status(&done, "d"), NodeExecutionStatus::Completed);
    assert_eq!(
        done.node_execution("d").unwrap().output_data.as_ref().unwrap()["x"],
        json!("0")
    );
}

// ---------------------------------------------------------------------------
// Scenario 6: cancel mid-run
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_terminates_running_nodes() {
    let h = harness(vec![("slow", Behavior::Sleep(10_000))]);
    let wf = workflow(
        json!([{"id": "a", "name": "A", "programId": "slow"}]),
        json!([]),
    );

    h.workflows.create(wf).await.unwrap();
    let submitted = h
        .engine
        .execute(ExecutionRequest::new("wf", "owner"))
        .await
        .unwrap();

    // Wait until the node is actually running before cancelling.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let current = h.engine.get_execution(submitted.id).await.unwrap();
        if current.node_execution("a").unwrap().status == NodeExecutionStatus::Running {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "node never reached Running"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    h.engine.cancel(submitted.id).await.unwrap();

    let done = tokio::time::timeout(
        Duration::from_secs(5),
        h.engine.wait_for_completion(submitted.id),
    )
    .await
    .expect("cancellation should settle promptly")
    .unwrap();

    assert_eq!(done.status, ExecutionStatus::Cancelled);
    let a = done.node_execution("a").unwrap();
    assert_eq!(a.error.as_ref().unwrap().error_type, NodeErrorType::Cancelled);

    // Idempotent.
    h.engine.cancel(submitted.id).await.unwrap();
    assert_eq!(
        h.engine.get_execution(submitted.id).await.unwrap().status,
        ExecutionStatus::Cancelled
    );
}

// ---------------------------------------------------------------------------
// Scenario 7: retry succeeds after failure
// ---------------------------------------------------------------------------

#[tokio::test]
async fn retry_replaces_output_after_failure() {
    let h = harness(vec![("flaky", Behavior::FailThenEmit(1, "5"))]);
    let wf = workflow(
        json!([{"id": "a", "name": "A", "programId": "flaky",
                "executionSettings": {"retryCount": 1},
                "outputConfiguration": out_x()}]),
        json!([]),
    );

    let done = run_to_end(&h, wf, None).await;
    assert_eq!(done.status, ExecutionStatus::Failed);
    assert!(done.node_execution("a").unwrap().error.as_ref().unwrap().can_retry);

    let retried = h.engine.retry_node(done.id, "a").await.unwrap();
    assert_eq!(retried.status, NodeExecutionStatus::Completed);
    assert_eq!(retried.retry_count, 1);
    assert_eq!(retried.output_data.as_ref().unwrap()["x"], json!("5"));

    let refreshed = h.engine.get_execution(done.id).await.unwrap();
    assert_eq!(refreshed.status, ExecutionStatus::Completed);
    assert_eq!(
        refreshed.results.unwrap().final_outputs["a"]["x"],
        json!("5")
    );

    // Retries are bounded by max_retries.
    let err = h.engine.retry_node(done.id, "a").await.unwrap_err();
    assert!(err.to_string().contains("no retries remaining"));
}

// ---------------------------------------------------------------------------
// Scenario 8: missing output field falls back to mapping default
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_output_field_uses_mapping_default() {
    let h = harness(vec![
        ("emit", Behavior::Emit("1")),
        ("echo-y", Behavior::EchoParam("y")),
    ]);
    let wf = workflow(
        json!([
            {"id": "a", "name": "A", "programId": "emit"},
            {"id": "b", "name": "B", "programId": "echo-y", "inputConfiguration": {
                "inputMappings": [{
                    "inputName": "y", "sourceNodeId": "a", "sourceOutputName": "x",
                    "isOptional": true, "defaultValue": 7
                }]
            }, "outputConfiguration": out_x()}
        ]),
        json!([edge("a", "b")]),
    );

    let done = run_to_end(&h, wf, None).await;

    assert_eq!(done.status, ExecutionStatus::Completed);
    assert_eq!(
        done.node_execution("b").unwrap().output_data.as_ref().unwrap()["x"],
        json!("7")
    );
}

// ---------------------------------------------------------------------------
// Disabled nodes, pause/resume, validation, permissions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn disabled_node_is_skipped_with_reason() {
    let h = harness(vec![("emit", Behavior::Emit("1"))]);
    let wf = workflow(
        json!([
            {"id": "a", "name": "A", "programId": "emit"},
            {"id": "b", "name": "B", "programId": "emit", "isDisabled": true}
        ]),
        json!([]),
    );

    let done = run_to_end(&h, wf, None).await;

    assert_eq!(done.status, ExecutionStatus::Completed);
    let b = done.node_execution("b").unwrap();
    assert_eq!(b.status, NodeExecutionStatus::Skipped);
    assert!(b.was_skipped);
    assert_eq!(b.skip_reason.as_deref(), Some("Node is disabled"));
}

#[tokio::test]
async fn pause_preserves_state_and_resume_finishes() {
    let h = harness(vec![
        ("slow", Behavior::Sleep(300)),
        ("emit", Behavior::Emit("done")),
    ]);
    let wf = workflow(
        json!([
            {"id": "a", "name": "A", "programId": "slow"},
            {"id": "b", "name": "B", "programId": "emit"}
        ]),
        json!([edge("a", "b")]),
    );

    h.workflows.create(wf).await.unwrap();
    let submitted = h
        .engine
        .execute(ExecutionRequest::new("wf", "owner"))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    h.engine.pause(submitted.id).await.unwrap();

    let paused = h.engine.wait_for_completion(submitted.id).await.unwrap();
    assert_eq!(paused.status, ExecutionStatus::Paused);
    // Pause is idempotent.
    h.engine.pause(submitted.id).await.unwrap();

    h.engine.resume(submitted.id).await.unwrap();
    let done = tokio::time::timeout(
        Duration::from_secs(5),
        h.engine.wait_for_completion(submitted.id),
    )
    .await
    .expect("resumed run should settle")
    .unwrap();

    assert_eq!(done.status, ExecutionStatus::Completed);
    assert_eq!(node_status(&done, "a"), NodeExecutionStatus::Completed);
    assert_eq!(node_status(&done, "b"), NodeExecutionStatus::Completed);
}

#[tokio::test]
async fn cyclic_workflow_rejected_at_submission() {
    let h = harness(vec![("emit", Behavior::Emit("1"))]);
    let wf = workflow(
        json!([
            {"id": "a", "name": "A", "programId": "emit"},
            {"id": "b", "name": "B", "programId": "emit"}
        ]),
        json!([edge("a", "b"), edge("b", "a")]),
    );

    h.workflows.create(wf).await.unwrap();
    let err = h
        .engine
        .execute(ExecutionRequest::new("wf", "owner"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("cycle"));

    // Nothing was persisted.
    assert!(h.executions.get_running().await.unwrap().is_empty());
}

struct DenyAll;

#[async_trait]
impl PermissionChecker for DenyAll {
    async fn has_workflow_permission(&self, _: &str, _: &str, _: &str) -> Result<bool> {
        Ok(false)
    }
}

#[tokio::test]
async fn execute_requires_permission() {
    let mock = MockExecutor::new(vec![("emit", Behavior::Emit("1"))]);
    let executions = Arc::new(MemoryExecutionStore::new());
    let workflows = Arc::new(MemoryWorkflowStore::new());
    let exec_store: Arc<dyn ExecutionStore> = executions.clone();
    let wf_store: Arc<dyn WorkflowStore> = workflows.clone();
    let engine = WorkflowEngine::new(&EngineConfig::default(), mock, exec_store, wf_store, Arc::new(DenyAll));

    let wf = workflow(
        json!([{"id": "a", "name": "A", "programId": "emit"}]),
        json!([]),
    );
    workflows.create(wf).await.unwrap();

    let err = engine
        .execute(ExecutionRequest::new("wf", "mallory"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("permission denied"));

    // The creator still passes the static check.
    assert!(engine.execute(ExecutionRequest::new("wf", "owner")).await.is_ok());
}

#[tokio::test]
async fn skip_node_blocks_dependents() {
    let h = harness(vec![
        ("slow", Behavior::Sleep(400)),
        ("emit", Behavior::Emit("1")),
    ]);
    let wf = workflow(
        json!([
            {"id": "gate", "name": "Gate", "programId": "slow"},
            {"id": "a", "name": "A", "programId": "slow"},
            {"id": "b", "name": "B", "programId": "emit"}
        ]),
        json!([edge("gate", "a"), edge("a", "b")]),
    );

    h.workflows.create(wf).await.unwrap();
    let submitted = h
        .engine
        .execute(ExecutionRequest::new("wf", "owner"))
        .await
        .unwrap();

    // Skip a downstream node while the gate is still running.
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.engine
        .skip_node(submitted.id, "a", "operator skipped")
        .await
        .unwrap();

    let done = h.engine.wait_for_completion(submitted.id).await.unwrap();

    assert_eq!(node_status(&done, "gate"), NodeExecutionStatus::Completed);
    let a = done.node_execution("a").unwrap();
    assert_eq!(a.status, NodeExecutionStatus::Skipped);
    assert_eq!(a.skip_reason.as_deref(), Some("operator skipped"));
    // b's dependency on a is non-optional, so b cannot run.
    assert_eq!(node_status(&done, "b"), NodeExecutionStatus::Skipped);
}

#[tokio::test]
async fn statistics_and_logs_reflect_the_run() {
    let h = harness(vec![
        ("emit", Behavior::Emit("1")),
        ("slow", Behavior::Sleep(120)),
    ]);
    let wf = workflow(
        json!([
            {"id": "fast", "name": "Fast", "programId": "emit"},
            {"id": "slow", "name": "Slow", "programId": "slow"}
        ]),
        json!([]),
    );

    let done = run_to_end(&h, wf, None).await;
    assert_eq!(done.status, ExecutionStatus::Completed);

    let stats = h.engine.get_statistics(done.id).await.unwrap();
    assert_eq!(stats.total_retries, 0);
    assert_eq!(stats.slowest_node.as_deref(), Some("slow"));
    assert_eq!(stats.fastest_node.as_deref(), Some("fast"));
    assert!(stats.average_node_execution_time_ms > 0.0);

    let logs = h.engine.get_logs(done.id, 0, 100).await.unwrap();
    assert!(!logs.is_empty());
    let page = h.engine.get_logs(done.id, 1, 2).await.unwrap();
    assert!(page.len() <= 2);

    assert!(h.engine.is_complete(done.id).await.unwrap());
    assert!(h.engine.get_active_executions().await.unwrap().is_empty());
    h.engine.cleanup(done.id).await.unwrap();
}
