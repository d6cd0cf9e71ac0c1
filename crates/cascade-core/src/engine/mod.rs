//! The workflow execution engine: validates, persists, and drives a DAG of
//! program nodes through topological waves under concurrency and failure
//! policies.

mod session;

pub use session::{ExecutionSession, Interrupt};

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::{json, Map, Value};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::NodeErrorType;
use crate::mapper;
use crate::model::{
    ExecutionContext, ExecutionFailure, ExecutionLogEntry, ExecutionOptions, ExecutionResults,
    ExecutionStatus, DataContract, NodeExecution, NodeExecutionError, NodeExecutionStatus,
    ProjectExecutionRequest, ProjectExecutionResult, TriggerType, Workflow, WorkflowExecution,
    WorkflowNode,
};
use crate::process::CancelToken;
use crate::project::ProjectExecutor;
use crate::store::{ExecutionStore, PermissionChecker, WorkflowStore};
use crate::validator;
use crate::{EngineError, Result};

// ---------------------------------------------------------------------------
// Requests and statistics
// ---------------------------------------------------------------------------

/// A submission request for one workflow run.
pub struct ExecutionRequest {
    pub workflow_id: String,
    pub user_id: String,
    pub user_roles: Vec<String>,
    pub execution_name: Option<String>,
    pub user_inputs: HashMap<String, Value>,
    pub trigger_type: TriggerType,
    /// Defaults derive from the workflow settings when absent.
    pub options: Option<ExecutionOptions>,
    /// Caller-side cancellation, linked into the session.
    pub cancel: Option<CancelToken>,
}

impl ExecutionRequest {
    pub fn new(workflow_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            user_id: user_id.into(),
            user_roles: Vec::new(),
            execution_name: None,
            user_inputs: HashMap::new(),
            trigger_type: TriggerType::Manual,
            options: None,
            cancel: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionStatistics {
    pub total_execution_time_ms: u64,
    pub total_retries: u32,
    pub average_node_execution_time_ms: f64,
    pub slowest_node: Option<String>,
    pub fastest_node: Option<String>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

struct EngineShared<E: ProjectExecutor> {
    executor: Arc<E>,
    executions: Arc<dyn ExecutionStore>,
    workflows: Arc<dyn WorkflowStore>,
    permissions: Arc<dyn PermissionChecker>,
    sessions: DashMap<Uuid, Arc<ExecutionSession>>,
    workflow_semaphore: Arc<Semaphore>,
}

/// The graph scheduler. Generic over the project executor so tests can
/// script node behavior.
pub struct WorkflowEngine<E: ProjectExecutor + 'static> {
    shared: Arc<EngineShared<E>>,
}

impl<E: ProjectExecutor + 'static> WorkflowEngine<E> {
    pub fn new(
        config: &EngineConfig,
        executor: Arc<E>,
        executions: Arc<dyn ExecutionStore>,
        workflows: Arc<dyn WorkflowStore>,
        permissions: Arc<dyn PermissionChecker>,
    ) -> Self {
        Self {
            shared: Arc::new(EngineShared {
                executor,
                executions,
                workflows,
                permissions,
                sessions: DashMap::new(),
                workflow_semaphore: Arc::new(Semaphore::new(
                    config.scheduler.max_concurrent_workflows,
                )),
            }),
        }
    }

    /// Validate, persist, and start a workflow execution. Returns the
    /// persisted record immediately; a detached driver advances the run.
    pub async fn execute(&self, request: ExecutionRequest) -> Result<WorkflowExecution> {
        let shared = &self.shared;
        let workflow = shared
            .workflows
            .get(&request.workflow_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("workflow '{}'", request.workflow_id)))?;

        let warnings = validator::validate_workflow(&workflow).into_result()?;
        for warning in &warnings {
            warn!(workflow_id = %workflow.id, %warning, "workflow validation warning");
        }

        self.check_execute_permission(&workflow, &request).await?;

        let context = ExecutionContext {
            user_inputs: request.user_inputs.clone(),
        };
        validator::validate_execution(&workflow, &context).into_result()?;

        let options = request.options.clone().unwrap_or(ExecutionOptions {
            max_concurrent_nodes: workflow.settings.max_concurrent_nodes,
            ..ExecutionOptions::default()
        });

        let execution_id = Uuid::new_v4();
        let node_executions = workflow
            .nodes
            .iter()
            .map(|n| {
                NodeExecution::pending(&n.id, &n.name, &n.program_id, n.execution_settings.retry_count)
            })
            .collect();
        let mut progress = crate::model::ExecutionProgress::new(workflow.nodes.len());
        progress.current_phase = "Starting".to_string();

        let execution = WorkflowExecution {
            id: execution_id,
            workflow_id: workflow.id.clone(),
            workflow_version: workflow.version,
            execution_name: request
                .execution_name
                .unwrap_or_else(|| format!("{} run", workflow.name)),
            executed_by: request.user_id.clone(),
            started_at: Utc::now(),
            completed_at: None,
            status: ExecutionStatus::Running,
            execution_context: context.clone(),
            options: options.clone(),
            progress,
            trigger_type: request.trigger_type,
            node_executions,
            results: None,
            error: None,
            logs: Vec::new(),
        };

        shared.executions.create(execution.clone()).await?;
        shared
            .executions
            .append_log(
                execution_id,
                ExecutionLogEntry::info(
                    format!("execution submitted by '{}'", request.user_id),
                    None,
                ),
            )
            .await?;

        info!(%execution_id, workflow_id = %workflow.id, nodes = workflow.nodes.len(), "execution submitted");

        let session = ExecutionSession::from_execution(workflow, &execution);
        if let Some(cancel) = request.cancel {
            session.link_caller_cancel(cancel);
        }
        shared.sessions.insert(execution_id, Arc::clone(&session));

        let shared = Arc::clone(shared);
        tokio::spawn(async move {
            drive(shared, session).await;
        });

        Ok(execution)
    }

    async fn check_execute_permission(
        &self,
        workflow: &Workflow,
        request: &ExecutionRequest,
    ) -> Result<()> {
        match validator::validate_permissions(workflow, &request.user_id, &request.user_roles) {
            Ok(()) => Ok(()),
            Err(static_denial) => {
                let granted = self
                    .shared
                    .permissions
                    .has_workflow_permission(&workflow.id, &request.user_id, "execute")
                    .await?;
                if granted {
                    Ok(())
                } else {
                    Err(static_denial)
                }
            }
        }
    }

    /// Re-run a failed node. Bounded by the node's `max_retries`; output
    /// replaces any prior output.
    pub async fn retry_node(&self, execution_id: Uuid, node_id: &str) -> Result<NodeExecution> {
        let shared = &self.shared;
        let mut execution = self.get_execution(execution_id).await?;
        let ne = execution
            .node_execution_mut(node_id)
            .ok_or_else(|| EngineError::NotFound(format!("node execution '{node_id}'")))?;
        if !ne.can_retry() {
            return Err(EngineError::Validation(format!(
                "node '{node_id}' has no retries remaining ({}/{})",
                ne.retry_count, ne.max_retries
            )));
        }

        ne.retry_count += 1;
        ne.status = NodeExecutionStatus::Retrying;
        let snapshot = ne.clone();
        shared
            .executions
            .update_node_execution(execution_id, snapshot.clone())
            .await?;
        shared
            .executions
            .append_log(
                execution_id,
                ExecutionLogEntry::info(
                    format!("retry {} of {}", snapshot.retry_count, snapshot.max_retries),
                    Some(node_id),
                ),
            )
            .await?;

        let live = shared.sessions.get(&execution_id).map(|s| Arc::clone(s.value()));
        let session = match live {
            Some(session) => session,
            None => {
                let workflow = shared
                    .workflows
                    .get(&execution.workflow_id)
                    .await?
                    .ok_or_else(|| {
                        EngineError::NotFound(format!("workflow '{}'", execution.workflow_id))
                    })?;
                ExecutionSession::from_execution(workflow, &execution)
            }
        };

        session.failed_nodes.remove(node_id);
        let node = session
            .workflow
            .node(node_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("node '{node_id}' in workflow snapshot")))?;

        run_node(Arc::clone(shared), Arc::clone(&session), node).await;

        if !shared.sessions.contains_key(&execution_id) {
            refresh_results(shared, &session).await?;
        }

        self.get_execution(execution_id)
            .await?
            .node_execution(node_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("node execution '{node_id}'")))
    }

    /// Force a node into Skipped. Dependents treating the edge as
    /// non-optional will not be dispatched.
    pub async fn skip_node(&self, execution_id: Uuid, node_id: &str, reason: &str) -> Result<()> {
        let shared = &self.shared;
        let mut execution = self.get_execution(execution_id).await?;
        let ne = execution
            .node_execution_mut(node_id)
            .ok_or_else(|| EngineError::NotFound(format!("node execution '{node_id}'")))?;

        ne.status = NodeExecutionStatus::Skipped;
        ne.was_skipped = true;
        ne.skip_reason = Some(reason.to_string());
        ne.completed_at = Some(Utc::now());
        let snapshot = ne.clone();
        shared
            .executions
            .update_node_execution(execution_id, snapshot)
            .await?;
        shared
            .executions
            .append_log(
                execution_id,
                ExecutionLogEntry::warning(format!("node skipped: {reason}"), Some(node_id)),
            )
            .await?;

        if let Some(session) = shared.sessions.get(&execution_id) {
            session.skipped_nodes.insert(node_id.to_string());
        }
        Ok(())
    }

    /// Pause a running execution, preserving node outputs for resume.
    pub async fn pause(&self, execution_id: Uuid) -> Result<()> {
        let shared = &self.shared;
        if let Some(session) = shared.sessions.get(&execution_id).map(|s| Arc::clone(s.value())) {
            session.interrupt(Interrupt::Pause);
            return Ok(());
        }

        let execution = self.get_execution(execution_id).await?;
        match execution.status {
            ExecutionStatus::Running | ExecutionStatus::Pending => {
                shared
                    .executions
                    .update_status(execution_id, ExecutionStatus::Paused)
                    .await
            }
            // Idempotent on repeated calls and settled executions.
            _ => Ok(()),
        }
    }

    /// Resume a paused execution by re-creating its session from persisted
    /// state and re-driving the non-terminal nodes.
    pub async fn resume(&self, execution_id: Uuid) -> Result<()> {
        let shared = &self.shared;
        if shared.sessions.contains_key(&execution_id) {
            return Ok(());
        }

        let mut execution = self.get_execution(execution_id).await?;
        match execution.status {
            ExecutionStatus::Paused => {}
            ExecutionStatus::Running => return Ok(()),
            other => {
                return Err(EngineError::Validation(format!(
                    "execution '{execution_id}' is {other:?}, only Paused executions resume"
                )))
            }
        }

        let workflow = shared
            .workflows
            .get(&execution.workflow_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("workflow '{}'", execution.workflow_id)))?;
        if workflow.version != execution.workflow_version {
            warn!(
                %execution_id,
                recorded = execution.workflow_version,
                current = workflow.version,
                "workflow version changed since submission; resuming against current version"
            );
        }

        // Interrupted nodes re-drive as-is; failed nodes re-drive only while
        // retries remain, consuming one.
        for ne in execution.node_executions.iter_mut() {
            let interrupted = matches!(
                ne.status,
                NodeExecutionStatus::Running | NodeExecutionStatus::Retrying
            ) || ne
                .error
                .as_ref()
                .is_some_and(|e| e.error_type == NodeErrorType::Cancelled);
            let retryable = ne.status == NodeExecutionStatus::Failed && ne.can_retry();
            if !interrupted && !retryable {
                continue;
            }
            if ne.status == NodeExecutionStatus::Failed && !interrupted {
                ne.retry_count += 1;
            }
            ne.status = NodeExecutionStatus::Pending;
            ne.error = None;
            shared
                .executions
                .update_node_execution(execution_id, ne.clone())
                .await?;
        }
        let execution = self.get_execution(execution_id).await?;

        shared
            .executions
            .update_status(execution_id, ExecutionStatus::Running)
            .await?;
        shared
            .executions
            .append_log(execution_id, ExecutionLogEntry::info("execution resumed", None))
            .await?;

        let session = ExecutionSession::from_execution(workflow, &execution);
        shared.sessions.insert(execution_id, Arc::clone(&session));

        let shared = Arc::clone(shared);
        tokio::spawn(async move {
            drive(shared, session).await;
        });
        Ok(())
    }

    /// Cancel an execution. Idempotent.
    pub async fn cancel(&self, execution_id: Uuid) -> Result<()> {
        let shared = &self.shared;
        if let Some(session) = shared.sessions.get(&execution_id).map(|s| Arc::clone(s.value())) {
            session.interrupt(Interrupt::Cancel);
            return Ok(());
        }

        let mut execution = self.get_execution(execution_id).await?;
        if !execution.status.is_terminal() {
            execution.status = ExecutionStatus::Cancelled;
            execution.completed_at = Some(Utc::now());
            shared.executions.update(&execution).await?;
        }
        Ok(())
    }

    pub async fn get_statistics(&self, execution_id: Uuid) -> Result<ExecutionStatistics> {
        let execution = self.get_execution(execution_id).await?;

        let end = execution.completed_at.unwrap_or_else(Utc::now);
        let total_execution_time_ms = (end - execution.started_at).num_milliseconds().max(0) as u64;
        let total_retries = execution.node_executions.iter().map(|ne| ne.retry_count).sum();

        let timed: Vec<(&str, u64)> = execution
            .node_executions
            .iter()
            .filter_map(|ne| ne.duration_ms.map(|d| (ne.node_id.as_str(), d)))
            .collect();
        let average_node_execution_time_ms = if timed.is_empty() {
            0.0
        } else {
            timed.iter().map(|(_, d)| *d as f64).sum::<f64>() / timed.len() as f64
        };

        Ok(ExecutionStatistics {
            total_execution_time_ms,
            total_retries,
            average_node_execution_time_ms,
            slowest_node: timed
                .iter()
                .max_by_key(|(_, d)| *d)
                .map(|(id, _)| id.to_string()),
            fastest_node: timed
                .iter()
                .min_by_key(|(_, d)| *d)
                .map(|(id, _)| id.to_string()),
        })
    }

    /// A slice of the execution's append-only log.
    pub async fn get_logs(
        &self,
        execution_id: Uuid,
        skip: usize,
        take: usize,
    ) -> Result<Vec<ExecutionLogEntry>> {
        let execution = self.get_execution(execution_id).await?;
        Ok(execution.logs.into_iter().skip(skip).take(take).collect())
    }

    pub async fn is_complete(&self, execution_id: Uuid) -> Result<bool> {
        Ok(self.get_execution(execution_id).await?.status.is_terminal())
    }

    pub async fn get_active_executions(&self) -> Result<Vec<WorkflowExecution>> {
        self.shared.executions.get_running().await
    }

    /// Drop any in-memory session state for an execution.
    pub async fn cleanup(&self, execution_id: Uuid) -> Result<()> {
        self.shared.sessions.remove(&execution_id);
        Ok(())
    }

    pub async fn get_execution(&self, execution_id: Uuid) -> Result<WorkflowExecution> {
        self.shared
            .executions
            .get(execution_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("execution '{execution_id}'")))
    }

    /// Resolve when the current driver settles (terminal status or pause).
    pub async fn wait_for_completion(&self, execution_id: Uuid) -> Result<WorkflowExecution> {
        let session = self
            .shared
            .sessions
            .get(&execution_id)
            .map(|s| Arc::clone(s.value()));
        if let Some(session) = session {
            let mut rx = session.done_receiver();
            while !*rx.borrow_and_update() {
                if rx.changed().await.is_err() {
                    break;
                }
            }
        }
        self.get_execution(execution_id).await
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

async fn drive<E: ProjectExecutor + 'static>(
    shared: Arc<EngineShared<E>>,
    session: Arc<ExecutionSession>,
) {
    let execution_id = session.execution_id;

    // Bounded concurrent workflows; the wait itself observes cancellation.
    let cancel = session.cancel_token();
    let permit = {
        let semaphore = Arc::clone(&shared.workflow_semaphore);
        tokio::select! {
            permit = semaphore.acquire_owned() => permit.ok(),
            _ = cancel.cancelled() => None,
        }
    };

    if permit.is_some() {
        if let Err(e) = run_waves(&shared, &session).await {
            error!(%execution_id, error = %e, "workflow driver failed");
            if let Err(persist_err) = fail_execution(&shared, &session, &e).await {
                error!(%execution_id, error = %persist_err, "failed to record driver failure");
            }
            shared.sessions.remove(&execution_id);
            session.mark_done();
            return;
        }
    }

    if let Err(e) = finalize(&shared, &session).await {
        error!(%execution_id, error = %e, "failed to finalize execution");
    }
    shared.sessions.remove(&execution_id);
    session.mark_done();
}

async fn run_waves<E: ProjectExecutor + 'static>(
    shared: &Arc<EngineShared<E>>,
    session: &Arc<ExecutionSession>,
) -> Result<()> {
    let execution_id = session.execution_id;

    sync_progress(shared, session, Some("Analyzing dependencies")).await?;
    let waves = validator::waves(&session.workflow)?;
    debug!(%execution_id, depth = waves.len(), "resolved topological waves");

    // Disabled nodes never dispatch.
    let disabled: Vec<String> = session
        .workflow
        .nodes
        .iter()
        .filter(|n| n.is_disabled)
        .map(|n| n.id.clone())
        .collect();
    for node_id in disabled {
        if !is_terminal_in_session(session, &node_id) {
            record_skip(shared, session, &node_id, "Node is disabled").await?;
        }
    }

    sync_progress(shared, session, Some("Running")).await?;

    for wave in waves {
        if session.is_interrupted() {
            break;
        }

        let mut handles = Vec::new();
        for node_id in wave {
            if session.is_interrupted() {
                break;
            }
            if is_terminal_in_session(session, &node_id) {
                continue;
            }
            if !session.dependencies_satisfied(&node_id) {
                warn!(%execution_id, node_id, "dependencies not satisfied, node will not run");
                record_skip(shared, session, &node_id, "Upstream dependency did not complete")
                    .await?;
                continue;
            }

            let node = session
                .workflow
                .node(&node_id)
                .cloned()
                .ok_or_else(|| EngineError::Validation(format!("node '{node_id}' missing")))?;
            let task_shared = Arc::clone(shared);
            let task_session = Arc::clone(session);
            handles.push((
                node_id,
                tokio::spawn(async move { run_node(task_shared, task_session, node).await }),
            ));
        }

        for (node_id, handle) in handles {
            if let Err(join_err) = handle.await {
                // A panicking node task is converted at the session boundary.
                error!(%execution_id, node_id, error = %join_err, "node task panicked");
                record_failure(
                    shared,
                    session,
                    &node_id,
                    NodeErrorType::SystemError,
                    &format!("node task panicked: {join_err}"),
                    None,
                    None,
                )
                .await;
            }
        }
    }

    Ok(())
}

fn is_terminal_in_session(session: &ExecutionSession, node_id: &str) -> bool {
    session.completed_nodes.contains(node_id)
        || session.failed_nodes.contains(node_id)
        || session.skipped_nodes.contains(node_id)
}

// ---------------------------------------------------------------------------
// Node execution
// ---------------------------------------------------------------------------

async fn run_node<E: ProjectExecutor + 'static>(
    shared: Arc<EngineShared<E>>,
    session: Arc<ExecutionSession>,
    node: WorkflowNode,
) {
    let execution_id = session.execution_id;
    let node_id = node.id.clone();

    // Nodes waiting on the semaphore return immediately once cancelled.
    let semaphore = session.semaphore();
    let cancel = session.cancel_token();
    let _permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            record_failure(
                &shared, &session, &node_id,
                NodeErrorType::Cancelled, "cancelled before dispatch", None, None,
            ).await;
            return;
        }
        permit = semaphore.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return,
        },
    };

    if let Err(e) = mark_running(&shared, &session, &node).await {
        warn!(%execution_id, node_id, error = %e, "failed to persist running state");
    }

    let inputs = match compose_inputs(&node, &session.context, &session) {
        Ok(inputs) => inputs,
        Err(node_error) => {
            session.running_nodes.fetch_sub(1, Ordering::Relaxed);
            record_failure(
                &shared,
                &session,
                &node_id,
                node_error.error_type,
                &node_error.message,
                node_error.exit_code,
                None,
            )
            .await;
            return;
        }
    };

    let program_execution_id = Uuid::new_v4();
    let request = ProjectExecutionRequest {
        program_id: node.program_id.clone(),
        version_id: node.version_id.clone(),
        user_id: session.executed_by.clone(),
        parameters: mapper::from_json(&inputs),
        environment: node.execution_settings.environment.clone(),
        timeout_minutes: node.execution_settings.timeout_minutes,
        resource_limits: node.execution_settings.resource_limits.clone(),
        execution_id: Some(program_execution_id),
    };

    debug!(%execution_id, node_id, %program_execution_id, "dispatching node to project engine");
    let result = shared
        .executor
        .execute_project(request, session.cancel_token())
        .await;

    session.running_nodes.fetch_sub(1, Ordering::Relaxed);

    if result.success {
        match assemble_output(&node, &result) {
            Ok(output) => {
                record_completion(
                    &shared,
                    &session,
                    &node_id,
                    &inputs,
                    program_execution_id,
                    &result,
                    output,
                )
                .await;
            }
            Err(message) => {
                record_failure(
                    &shared,
                    &session,
                    &node_id,
                    NodeErrorType::ExecutionError,
                    &message,
                    Some(result.exit_code),
                    Some(&inputs),
                )
                .await;
            }
        }
    } else {
        let error_type = result.error_type.unwrap_or(NodeErrorType::ExecutionError);
        let message = if result.error_output.is_empty() {
            format!("program exited with code {}", result.exit_code)
        } else {
            result.error_output.clone()
        };
        record_failure(
            &shared,
            &session,
            &node_id,
            error_type,
            &message,
            Some(result.exit_code),
            Some(&inputs),
        )
        .await;
    }
}

async fn mark_running<E: ProjectExecutor>(
    shared: &Arc<EngineShared<E>>,
    session: &Arc<ExecutionSession>,
    node: &WorkflowNode,
) -> Result<()> {
    session.running_nodes.fetch_add(1, Ordering::Relaxed);

    let mut execution = shared
        .executions
        .get(session.execution_id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("execution '{}'", session.execution_id)))?;
    if let Some(ne) = execution.node_execution_mut(&node.id) {
        ne.status = NodeExecutionStatus::Running;
        ne.started_at = Some(Utc::now());
        ne.completed_at = None;
        ne.error = None;
        ne.was_skipped = false;
        ne.skip_reason = None;
        let snapshot = ne.clone();
        shared
            .executions
            .update_node_execution(session.execution_id, snapshot)
            .await?;
    }
    shared
        .executions
        .append_log(
            session.execution_id,
            ExecutionLogEntry::info("node started", Some(&node.id)),
        )
        .await?;
    sync_progress(shared, session, None).await
}

#[allow(clippy::too_many_arguments)]
async fn record_completion<E: ProjectExecutor>(
    shared: &Arc<EngineShared<E>>,
    session: &Arc<ExecutionSession>,
    node_id: &str,
    inputs: &Value,
    program_execution_id: Uuid,
    result: &ProjectExecutionResult,
    output: Value,
) {
    let execution_id = session.execution_id;

    let persisted = async {
        let mut execution = shared
            .executions
            .get(execution_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("execution '{execution_id}'")))?;
        if let Some(ne) = execution.node_execution_mut(node_id) {
            ne.status = NodeExecutionStatus::Completed;
            ne.completed_at = Some(Utc::now());
            ne.duration_ms = Some(result.duration_ms);
            ne.program_execution_id = Some(program_execution_id);
            ne.input_data = Some(inputs.clone());
            ne.output_data = Some(output.clone());
            ne.error = None;
            let snapshot = ne.clone();
            shared
                .executions
                .update_node_execution(execution_id, snapshot)
                .await?;
        }
        shared
            .executions
            .append_log(
                execution_id,
                ExecutionLogEntry::info(
                    format!("node completed in {} ms", result.duration_ms),
                    Some(node_id),
                ),
            )
            .await
    }
    .await;
    if let Err(e) = persisted {
        error!(%execution_id, node_id, error = %e, "failed to persist node completion");
    }

    // Publish only after the Completed transition is recorded, so
    // dependents never observe outputs of a non-completed node.
    session.publish_output(node_id, DataContract::new(node_id, output));
    session.completed_nodes.insert(node_id.to_string());

    if let Err(e) = sync_progress(shared, session, None).await {
        warn!(%execution_id, node_id, error = %e, "failed to persist progress");
    }
    info!(%execution_id, node_id, "node completed");
}

async fn record_failure<E: ProjectExecutor>(
    shared: &Arc<EngineShared<E>>,
    session: &Arc<ExecutionSession>,
    node_id: &str,
    error_type: NodeErrorType,
    message: &str,
    exit_code: Option<i32>,
    inputs: Option<&Value>,
) {
    let execution_id = session.execution_id;

    let persisted = async {
        let mut execution = shared
            .executions
            .get(execution_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("execution '{execution_id}'")))?;
        if let Some(ne) = execution.node_execution_mut(node_id) {
            ne.status = NodeExecutionStatus::Failed;
            ne.completed_at = Some(Utc::now());
            if let Some(inputs) = inputs {
                ne.input_data = Some(inputs.clone());
            }
            if let (Some(started), Some(completed)) = (ne.started_at, ne.completed_at) {
                ne.duration_ms = Some((completed - started).num_milliseconds().max(0) as u64);
            }
            ne.error = Some(NodeExecutionError {
                error_type,
                message: message.to_string(),
                exit_code,
                timestamp: Utc::now(),
                can_retry: ne.can_retry() && error_type.is_retryable(),
            });
            let snapshot = ne.clone();
            shared
                .executions
                .update_node_execution(execution_id, snapshot)
                .await?;
        }
        shared
            .executions
            .append_log(
                execution_id,
                ExecutionLogEntry::error(format!("node failed: {message}"), Some(node_id)),
            )
            .await
    }
    .await;
    if let Err(e) = persisted {
        error!(%execution_id, node_id, error = %e, "failed to persist node failure");
    }

    session.failed_nodes.insert(node_id.to_string());

    if let Err(e) = sync_progress(shared, session, None).await {
        warn!(%execution_id, node_id, error = %e, "failed to persist progress");
    }
    warn!(%execution_id, node_id, ?error_type, "node failed");

    if !session.options.continue_on_error {
        session.interrupt(Interrupt::Abort);
    }
}

async fn record_skip<E: ProjectExecutor>(
    shared: &Arc<EngineShared<E>>,
    session: &Arc<ExecutionSession>,
    node_id: &str,
    reason: &str,
) -> Result<()> {
    session.skipped_nodes.insert(node_id.to_string());

    let mut execution = shared
        .executions
        .get(session.execution_id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("execution '{}'", session.execution_id)))?;
    if let Some(ne) = execution.node_execution_mut(node_id) {
        ne.status = NodeExecutionStatus::Skipped;
        ne.was_skipped = true;
        ne.skip_reason = Some(reason.to_string());
        ne.completed_at = Some(Utc::now());
        let snapshot = ne.clone();
        shared
            .executions
            .update_node_execution(session.execution_id, snapshot)
            .await?;
    }
    shared
        .executions
        .append_log(
            session.execution_id,
            ExecutionLogEntry::warning(format!("node skipped: {reason}"), Some(node_id)),
        )
        .await
}

async fn sync_progress<E: ProjectExecutor>(
    shared: &Arc<EngineShared<E>>,
    session: &Arc<ExecutionSession>,
    phase: Option<&str>,
) -> Result<()> {
    let mut execution = shared
        .executions
        .get(session.execution_id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("execution '{}'", session.execution_id)))?;
    let progress = &mut execution.progress;
    progress.completed_nodes = session.completed_nodes.len();
    progress.failed_nodes = session.failed_nodes.len();
    progress.running_nodes = session.running_nodes.load(Ordering::Relaxed);
    if let Some(phase) = phase {
        progress.current_phase = phase.to_string();
    }
    progress.recompute_percent();
    shared
        .executions
        .update_progress(session.execution_id, progress.clone())
        .await
}

// ---------------------------------------------------------------------------
// Finalization
// ---------------------------------------------------------------------------

async fn finalize<E: ProjectExecutor>(
    shared: &Arc<EngineShared<E>>,
    session: &Arc<ExecutionSession>,
) -> Result<()> {
    let execution_id = session.execution_id;
    let Some(mut execution) = shared.executions.get(execution_id).await? else {
        return Ok(());
    };
    if execution.status.is_terminal() {
        return Ok(());
    }

    let now = Utc::now();
    match session.interrupt_kind() {
        Some(Interrupt::Pause) => {
            execution.status = ExecutionStatus::Paused;
            execution.progress.current_phase = "Paused".to_string();
            execution
                .logs
                .push(ExecutionLogEntry::info("execution paused", None));
        }
        Some(Interrupt::Cancel) => {
            execution.status = ExecutionStatus::Cancelled;
            execution.completed_at = Some(now);
            execution.progress.current_phase = "Cancelled".to_string();
            execution
                .logs
                .push(ExecutionLogEntry::warning("execution cancelled", None));
        }
        _ => {
            let failed: Vec<String> = session.failed_nodes.iter().map(|r| r.key().clone()).collect();
            if !failed.is_empty() && !session.options.continue_on_error {
                execution.status = ExecutionStatus::Failed;
                execution.progress.current_phase = "Failed".to_string();
                execution.error = Some(ExecutionFailure {
                    error_type: NodeErrorType::ExecutionError,
                    message: format!("{} node(s) failed: {}", failed.len(), failed.join(", ")),
                    failed_node_ids: failed,
                    timestamp: now,
                });
            } else {
                execution.status = ExecutionStatus::Completed;
                execution.progress.current_phase = "Completed".to_string();
                execution.results = Some(build_results(session));
            }
            execution.completed_at = Some(now);
        }
    }

    execution.progress.completed_nodes = session.completed_nodes.len();
    execution.progress.failed_nodes = session.failed_nodes.len();
    execution.progress.running_nodes = 0;
    execution.progress.recompute_percent();

    shared.executions.update(&execution).await?;
    info!(%execution_id, status = ?execution.status, "execution finalized");
    Ok(())
}

fn build_results(session: &ExecutionSession) -> ExecutionResults {
    let outputs: HashMap<String, Value> = session
        .node_outputs
        .iter()
        .map(|entry| (entry.key().clone(), entry.value().data.clone()))
        .collect();
    ExecutionResults {
        final_outputs: outputs.clone(),
        intermediate_results: outputs,
        summary: format!(
            "{} of {} nodes completed, {} failed, {} skipped",
            session.completed_nodes.len(),
            session.workflow.nodes.len(),
            session.failed_nodes.len(),
            session.skipped_nodes.len()
        ),
    }
}

/// Driver-level failure: the whole execution transitions to Failed.
async fn fail_execution<E: ProjectExecutor>(
    shared: &Arc<EngineShared<E>>,
    session: &Arc<ExecutionSession>,
    error: &EngineError,
) -> Result<()> {
    let Some(mut execution) = shared.executions.get(session.execution_id).await? else {
        return Ok(());
    };
    execution.status = ExecutionStatus::Failed;
    execution.completed_at = Some(Utc::now());
    execution.progress.current_phase = "Failed".to_string();
    execution.error = Some(ExecutionFailure {
        error_type: NodeErrorType::SystemError,
        message: error.to_string(),
        failed_node_ids: Vec::new(),
        timestamp: Utc::now(),
    });
    shared.executions.update(&execution).await
}

/// After an out-of-session retry, refresh a settled execution's results.
async fn refresh_results<E: ProjectExecutor>(
    shared: &Arc<EngineShared<E>>,
    session: &Arc<ExecutionSession>,
) -> Result<()> {
    let Some(mut execution) = shared.executions.get(session.execution_id).await? else {
        return Ok(());
    };
    if !execution.status.is_terminal() {
        return Ok(());
    }

    execution.progress.completed_nodes = session.completed_nodes.len();
    execution.progress.failed_nodes = session.failed_nodes.len();
    execution.progress.running_nodes = 0;
    execution.progress.recompute_percent();

    if session.failed_nodes.is_empty() && execution.status == ExecutionStatus::Failed {
        execution.status = ExecutionStatus::Completed;
        execution.error = None;
    }
    if execution.status == ExecutionStatus::Completed {
        execution.results = Some(build_results(session));
    }
    shared.executions.update(&execution).await
}

// ---------------------------------------------------------------------------
// Input composition and output assembly
// ---------------------------------------------------------------------------

/// Build a node's input object: static inputs, then user inputs, then
/// upstream mappings, later layers overriding earlier ones.
fn compose_inputs(
    node: &WorkflowNode,
    context: &ExecutionContext,
    session: &ExecutionSession,
) -> std::result::Result<Value, NodeExecutionError> {
    let mut inputs = Map::new();

    for static_input in &node.input_configuration.static_inputs {
        inputs.insert(static_input.name.clone(), static_input.value.clone());
    }

    for user_input in &node.input_configuration.user_inputs {
        let key = format!("{}.{}", node.id, user_input.name);
        match context.user_inputs.get(&key).or(user_input.default_value.as_ref()) {
            Some(value) => {
                inputs.insert(user_input.name.clone(), value.clone());
            }
            None => {}
        }
    }

    for mapping in &node.input_configuration.input_mappings {
        let extracted = session
            .node_outputs
            .get(&mapping.source_node_id)
            .and_then(|contract| contract.field(&mapping.source_output_name).cloned());

        let value = match extracted {
            Some(value) => value,
            None => match &mapping.default_value {
                Some(default) => default.clone(),
                None if mapping.is_optional => continue,
                None => {
                    return Err(input_error(format!(
                        "input '{}' unavailable: node '{}' produced no output '{}'",
                        mapping.input_name, mapping.source_node_id, mapping.source_output_name
                    )));
                }
            },
        };

        let value = match &mapping.transformation {
            Some(name) => apply_transformation(name, value).map_err(input_error)?,
            None => value,
        };
        inputs.insert(mapping.input_name.clone(), value);
    }

    Ok(Value::Object(inputs))
}

fn input_error(message: String) -> NodeExecutionError {
    NodeExecutionError {
        error_type: NodeErrorType::ExecutionError,
        message,
        exit_code: None,
        timestamp: Utc::now(),
        can_retry: false,
    }
}

/// The closed transformation set. Identity is the only member today.
fn apply_transformation(name: &str, value: Value) -> std::result::Result<Value, String> {
    match name {
        "identity" => Ok(value),
        other => Err(format!("unknown transformation '{other}'")),
    }
}

/// The built-in fields plus declared custom output mappings.
fn assemble_output(
    node: &WorkflowNode,
    result: &ProjectExecutionResult,
) -> std::result::Result<Value, String> {
    let mut output = Map::new();
    output.insert("stdout".to_string(), json!(result.output));
    output.insert("stderr".to_string(), json!(result.error_output));
    output.insert("exitCode".to_string(), json!(result.exit_code));
    output.insert("success".to_string(), json!(result.success));
    output.insert("duration".to_string(), json!(result.duration_ms));
    output.insert(
        "outputFiles".to_string(),
        Value::Array(
            result
                .output_files
                .iter()
                .map(|path| {
                    let file_name = std::path::Path::new(path)
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_else(|| path.clone());
                    json!({"fileName": file_name, "path": path})
                })
                .collect(),
        ),
    );

    for mapping in &node.output_configuration.output_mappings {
        let value = extract_value_from_program_output(result, &mapping.source_field);
        let value = match &mapping.transformation {
            Some(name) => apply_transformation(name, value)?,
            None => value,
        };
        output.insert(mapping.output_name.clone(), value);
    }

    Ok(Value::Object(output))
}

/// Built-in result fields; unknown names resolve to null.
fn extract_value_from_program_output(result: &ProjectExecutionResult, field: &str) -> Value {
    match field {
        "stdout" => json!(result.output),
        "stderr" => json!(result.error_output),
        "exitCode" => json!(result.exit_code),
        "success" => json!(result.success),
        "duration" => json!(result.duration_ms),
        "outputFiles" => json!(result.output_files),
        _ => Value::Null,
    }
}
