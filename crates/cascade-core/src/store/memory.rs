//! In-memory and directory-backed store implementations.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::model::{
    ExecutionLogEntry, ExecutionProgress, ExecutionStatus, NodeExecution, Workflow,
    WorkflowExecution,
};
use crate::{EngineError, Result};

use super::{ExecutionStore, FileStore, PermissionChecker, ProgramFile, WorkflowStore};

// ---------------------------------------------------------------------------
// Executions
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryExecutionStore {
    executions: DashMap<Uuid, WorkflowExecution>,
}

impl MemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_mut<F>(&self, id: Uuid, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut WorkflowExecution),
    {
        let mut entry = self
            .executions
            .get_mut(&id)
            .ok_or_else(|| EngineError::NotFound(format!("execution '{id}'")))?;
        mutate(entry.value_mut());
        Ok(())
    }
}

#[async_trait]
impl ExecutionStore for MemoryExecutionStore {
    async fn create(&self, execution: WorkflowExecution) -> Result<()> {
        if self.executions.contains_key(&execution.id) {
            return Err(EngineError::Store(format!(
                "execution '{}' already exists",
                execution.id
            )));
        }
        self.executions.insert(execution.id, execution);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<WorkflowExecution>> {
        Ok(self.executions.get(&id).map(|e| e.clone()))
    }

    async fn update(&self, execution: &WorkflowExecution) -> Result<()> {
        self.with_mut(execution.id, |stored| *stored = execution.clone())
    }

    async fn update_status(&self, id: Uuid, status: ExecutionStatus) -> Result<()> {
        self.with_mut(id, |stored| stored.status = status)
    }

    async fn update_progress(&self, id: Uuid, progress: ExecutionProgress) -> Result<()> {
        self.with_mut(id, |stored| stored.progress = progress)
    }

    async fn update_node_execution(&self, id: Uuid, node_execution: NodeExecution) -> Result<()> {
        self.with_mut(id, |stored| {
            match stored.node_execution_mut(&node_execution.node_id) {
                Some(existing) => *existing = node_execution,
                None => stored.node_executions.push(node_execution),
            }
        })
    }

    async fn append_log(&self, id: Uuid, entry: ExecutionLogEntry) -> Result<()> {
        self.with_mut(id, |stored| stored.logs.push(entry))
    }

    async fn get_running(&self) -> Result<Vec<WorkflowExecution>> {
        Ok(self
            .executions
            .iter()
            .filter(|e| e.status == ExecutionStatus::Running)
            .map(|e| e.clone())
            .collect())
    }

    async fn get_by_workflow(&self, workflow_id: &str) -> Result<Vec<WorkflowExecution>> {
        Ok(self
            .executions
            .iter()
            .filter(|e| e.workflow_id == workflow_id)
            .map(|e| e.clone())
            .collect())
    }

    async fn get_history(&self, workflow_id: &str, limit: usize) -> Result<Vec<WorkflowExecution>> {
        let mut all = self.get_by_workflow(workflow_id).await?;
        all.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        all.truncate(limit);
        Ok(all)
    }
}

// ---------------------------------------------------------------------------
// Workflows
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryWorkflowStore {
    workflows: DashMap<String, Workflow>,
    /// When linked, deletes are refused while active executions exist.
    executions: Option<Arc<MemoryExecutionStore>>,
}

impl MemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_executions(executions: Arc<MemoryExecutionStore>) -> Self {
        Self {
            workflows: DashMap::new(),
            executions: Some(executions),
        }
    }
}

#[async_trait]
impl WorkflowStore for MemoryWorkflowStore {
    async fn get(&self, id: &str) -> Result<Option<Workflow>> {
        Ok(self.workflows.get(id).map(|w| w.clone()))
    }

    async fn create(&self, workflow: Workflow) -> Result<()> {
        if self.workflows.contains_key(&workflow.id) {
            return Err(EngineError::Store(format!(
                "workflow '{}' already exists",
                workflow.id
            )));
        }
        self.workflows.insert(workflow.id.clone(), workflow);
        Ok(())
    }

    async fn update(&self, workflow: &Workflow) -> Result<()> {
        let mut entry = self
            .workflows
            .get_mut(&workflow.id)
            .ok_or_else(|| EngineError::NotFound(format!("workflow '{}'", workflow.id)))?;
        *entry.value_mut() = workflow.clone();
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        if let Some(executions) = &self.executions {
            let active = executions
                .get_by_workflow(id)
                .await?
                .iter()
                .any(|e| e.status.is_active());
            if active {
                return Err(EngineError::Store(format!(
                    "workflow '{id}' has active executions and cannot be deleted"
                )));
            }
        }
        self.workflows
            .remove(id)
            .ok_or_else(|| EngineError::NotFound(format!("workflow '{id}'")))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryFileStore {
    programs: DashMap<String, Vec<(String, Vec<u8>)>>,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_program(&self, program_id: &str, files: Vec<(&str, &[u8])>) {
        self.programs.insert(
            program_id.to_string(),
            files
                .into_iter()
                .map(|(path, bytes)| (path.to_string(), bytes.to_vec()))
                .collect(),
        );
    }
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn list_program_files(
        &self,
        program_id: &str,
        _version_id: Option<&str>,
    ) -> Result<Vec<ProgramFile>> {
        let files = self
            .programs
            .get(program_id)
            .ok_or_else(|| EngineError::NotFound(format!("program '{program_id}'")))?;
        Ok(files
            .iter()
            .map(|(path, _)| ProgramFile {
                relative_path: path.clone(),
                storage_key: format!("{program_id}/{path}"),
            })
            .collect())
    }

    async fn get_file_content(&self, storage_key: &str) -> Result<Vec<u8>> {
        let (program_id, path) = storage_key
            .split_once('/')
            .ok_or_else(|| EngineError::Store(format!("malformed storage key '{storage_key}'")))?;
        let files = self
            .programs
            .get(program_id)
            .ok_or_else(|| EngineError::NotFound(format!("program '{program_id}'")))?;
        files
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| EngineError::NotFound(format!("file '{storage_key}'")))
    }
}

/// Serves program trees from subdirectories of a root directory; the
/// program id is the subdirectory name.
pub struct FsFileStore {
    root: PathBuf,
}

impl FsFileStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn walk(dir: &std::path::Path, base: &std::path::Path, out: &mut Vec<String>) {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                Self::walk(&path, base, out);
            } else if let Ok(rel) = path.strip_prefix(base) {
                out.push(rel.display().to_string());
            }
        }
    }
}

#[async_trait]
impl FileStore for FsFileStore {
    async fn list_program_files(
        &self,
        program_id: &str,
        _version_id: Option<&str>,
    ) -> Result<Vec<ProgramFile>> {
        let dir = self.root.join(program_id);
        if !dir.is_dir() {
            return Err(EngineError::NotFound(format!(
                "program directory '{}'",
                dir.display()
            )));
        }
        let mut paths = Vec::new();
        Self::walk(&dir, &dir, &mut paths);
        paths.sort();
        Ok(paths
            .into_iter()
            .map(|path| ProgramFile {
                storage_key: format!("{program_id}/{path}"),
                relative_path: path,
            })
            .collect())
    }

    async fn get_file_content(&self, storage_key: &str) -> Result<Vec<u8>> {
        let full = self.root.join(storage_key);
        Ok(tokio::fs::read(&full).await?)
    }
}

// ---------------------------------------------------------------------------
// Permissions
// ---------------------------------------------------------------------------

/// Permission checker that grants everything; the static workflow-level
/// checks still apply.
pub struct AllowAll;

#[async_trait]
impl PermissionChecker for AllowAll {
    async fn has_workflow_permission(
        &self,
        _workflow_id: &str,
        _user_id: &str,
        _permission: &str,
    ) -> Result<bool> {
        Ok(true)
    }
}
