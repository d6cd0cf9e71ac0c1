//! Narrow collaborator interfaces the engine consumes, plus in-memory and
//! directory-backed implementations used by tests and the CLI.
//!
//! The stores guarantee read-your-writes per execution id; the in-memory
//! implementations serialize updates through their map entry locks.

mod memory;

pub use memory::{AllowAll, FsFileStore, MemoryExecutionStore, MemoryFileStore, MemoryWorkflowStore};

use async_trait::async_trait;
use uuid::Uuid;

use crate::model::{
    ExecutionLogEntry, ExecutionProgress, ExecutionStatus, NodeExecution, Workflow,
    WorkflowExecution,
};
use crate::Result;

/// Persistence for workflow executions and their per-node records.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn create(&self, execution: WorkflowExecution) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<WorkflowExecution>>;

    /// Replace the full record.
    async fn update(&self, execution: &WorkflowExecution) -> Result<()>;

    async fn update_status(&self, id: Uuid, status: ExecutionStatus) -> Result<()>;

    async fn update_progress(&self, id: Uuid, progress: ExecutionProgress) -> Result<()>;

    /// Replace the node execution matching `node_execution.node_id`.
    async fn update_node_execution(&self, id: Uuid, node_execution: NodeExecution) -> Result<()>;

    /// Append to the execution's log. Logs are append-only.
    async fn append_log(&self, id: Uuid, entry: ExecutionLogEntry) -> Result<()>;

    async fn get_running(&self) -> Result<Vec<WorkflowExecution>>;

    async fn get_by_workflow(&self, workflow_id: &str) -> Result<Vec<WorkflowExecution>>;

    /// Most recent executions first, up to `limit`.
    async fn get_history(&self, workflow_id: &str, limit: usize) -> Result<Vec<WorkflowExecution>>;
}

/// Persistence for workflow definitions.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Workflow>>;

    async fn create(&self, workflow: Workflow) -> Result<()>;

    async fn update(&self, workflow: &Workflow) -> Result<()>;

    /// Refused while any execution of the workflow is still active.
    async fn delete(&self, id: &str) -> Result<()>;
}

/// One stored file of a program's source tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramFile {
    /// Path relative to the project root.
    pub relative_path: String,
    pub storage_key: String,
}

/// Access to stored program source trees.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn list_program_files(
        &self,
        program_id: &str,
        version_id: Option<&str>,
    ) -> Result<Vec<ProgramFile>>;

    async fn get_file_content(&self, storage_key: &str) -> Result<Vec<u8>>;
}

/// External permission precheck.
#[async_trait]
pub trait PermissionChecker: Send + Sync {
    async fn has_workflow_permission(
        &self,
        workflow_id: &str,
        user_id: &str,
        permission: &str,
    ) -> Result<bool>;
}
