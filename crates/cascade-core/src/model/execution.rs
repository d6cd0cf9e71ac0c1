//! Execution records: the persisted state of a workflow run and its nodes.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::NodeErrorType;

/// Persisted state of one workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub workflow_id: String,
    /// Snapshot of the workflow version at submission; the authority for the
    /// run's shape.
    pub workflow_version: u32,
    pub execution_name: String,
    pub executed_by: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    pub execution_context: ExecutionContext,
    /// Policy knobs snapshotted at submission; resume re-creates the
    /// session from these.
    #[serde(default)]
    pub options: ExecutionOptions,
    pub progress: ExecutionProgress,
    pub trigger_type: TriggerType,
    /// One entry per workflow node, in workflow order at submission time.
    pub node_executions: Vec<NodeExecution>,
    pub results: Option<ExecutionResults>,
    pub error: Option<ExecutionFailure>,
    /// Append-only.
    pub logs: Vec<ExecutionLogEntry>,
}

impl WorkflowExecution {
    pub fn node_execution(&self, node_id: &str) -> Option<&NodeExecution> {
        self.node_executions.iter().find(|ne| ne.node_id == node_id)
    }

    pub fn node_execution_mut(&mut self, node_id: &str) -> Option<&mut NodeExecution> {
        self.node_executions
            .iter_mut()
            .find(|ne| ne.node_id == node_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    pub fn is_active(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Pending | ExecutionStatus::Running | ExecutionStatus::Paused
        )
    }
}

/// Per-execution policy knobs, snapshotted at submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionOptions {
    pub max_concurrent_nodes: usize,
    pub continue_on_error: bool,
    pub retain_artifacts: bool,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            max_concurrent_nodes: 4,
            continue_on_error: false,
            retain_artifacts: false,
        }
    }
}

/// User-supplied inputs for a run, keyed by `"nodeId.inputName"`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionContext {
    pub user_inputs: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionProgress {
    pub total_nodes: usize,
    pub completed_nodes: usize,
    pub failed_nodes: usize,
    pub running_nodes: usize,
    pub percent_complete: f64,
    pub current_phase: String,
}

impl ExecutionProgress {
    pub fn new(total_nodes: usize) -> Self {
        Self {
            total_nodes,
            current_phase: "Pending".to_string(),
            ..Default::default()
        }
    }

    pub fn recompute_percent(&mut self) {
        self.percent_complete = if self.total_nodes == 0 {
            0.0
        } else {
            100.0 * self.completed_nodes as f64 / self.total_nodes as f64
        };
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    #[default]
    Manual,
    Scheduled,
    Api,
}

/// Persisted state of one node within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeExecution {
    pub node_id: String,
    pub node_name: String,
    pub program_id: String,
    pub status: NodeExecutionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    /// Id of the project execution that served this node, when one ran.
    pub program_execution_id: Option<Uuid>,
    pub input_data: Option<serde_json::Value>,
    pub output_data: Option<serde_json::Value>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub error: Option<NodeExecutionError>,
    pub was_skipped: bool,
    pub skip_reason: Option<String>,
}

impl NodeExecution {
    pub fn pending(node_id: &str, node_name: &str, program_id: &str, max_retries: u32) -> Self {
        Self {
            node_id: node_id.to_string(),
            node_name: node_name.to_string(),
            program_id: program_id.to_string(),
            status: NodeExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            program_execution_id: None,
            input_data: None,
            output_data: None,
            retry_count: 0,
            max_retries,
            error: None,
            was_skipped: false,
            skip_reason: None,
        }
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Retrying,
}

impl NodeExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeExecutionStatus::Completed
                | NodeExecutionStatus::Failed
                | NodeExecutionStatus::Skipped
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeExecutionError {
    pub error_type: NodeErrorType,
    pub message: String,
    pub exit_code: Option<i32>,
    pub timestamp: DateTime<Utc>,
    pub can_retry: bool,
}

/// Final outputs assembled when a run completes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionResults {
    pub final_outputs: HashMap<String, serde_json::Value>,
    pub intermediate_results: HashMap<String, serde_json::Value>,
    pub summary: String,
}

/// Execution-level failure description.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionFailure {
    pub error_type: NodeErrorType,
    pub message: String,
    pub failed_node_ids: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionLogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub node_id: Option<String>,
}

impl ExecutionLogEntry {
    pub fn info(message: impl Into<String>, node_id: Option<&str>) -> Self {
        Self {
            timestamp: Utc::now(),
            level: LogLevel::Info,
            message: message.into(),
            node_id: node_id.map(str::to_string),
        }
    }

    pub fn warning(message: impl Into<String>, node_id: Option<&str>) -> Self {
        Self {
            timestamp: Utc::now(),
            level: LogLevel::Warning,
            message: message.into(),
            node_id: node_id.map(str::to_string),
        }
    }

    pub fn error(message: impl Into<String>, node_id: Option<&str>) -> Self {
        Self {
            timestamp: Utc::now(),
            level: LogLevel::Error,
            message: message.into(),
            node_id: node_id.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}
