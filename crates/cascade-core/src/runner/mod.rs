//! Language runners: per-stack strategies that turn a project directory
//! into a built, executable subprocess.
//!
//! Runners are stateless with respect to sessions; everything an invocation
//! needs travels in the [`RunnerContext`].

pub mod java;
pub mod node;
pub mod python;
mod registry;

pub use registry::RunnerRegistry;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::NodeErrorType;
use crate::model::{ProjectExecutionResult, ResourceLimits, ResourceUsage};
use crate::process::{CancelToken, ProcessResult, ProcessSpec, EXIT_CANCELLED, EXIT_TIMEOUT};
use crate::Result;

/// What a runner learned about a project directory.
#[derive(Debug, Clone, Default)]
pub struct ProjectStructureAnalysis {
    pub language: String,
    pub project_type: String,
    /// Relative paths.
    pub source_files: Vec<PathBuf>,
    pub config_files: Vec<PathBuf>,
    pub has_build_file: bool,
    pub entry_points: Vec<String>,
    pub main_entry_point: Option<String>,
    /// Shallow hints extracted from build files, not a resolved graph.
    pub dependencies: Vec<String>,
    pub metadata: HashMap<String, String>,
}

/// Outcome of a runner's build phase.
#[derive(Debug, Clone)]
pub struct ProjectBuildResult {
    pub success: bool,
    pub exit_code: i32,
    pub output: String,
    pub error_output: String,
    pub duration: Duration,
}

impl ProjectBuildResult {
    /// A build phase that had nothing to do.
    pub fn noop() -> Self {
        Self {
            success: true,
            exit_code: 0,
            output: String::new(),
            error_output: String::new(),
            duration: Duration::ZERO,
        }
    }

    pub fn tool_missing(tool: &str) -> Self {
        Self {
            success: false,
            exit_code: crate::process::EXIT_SPAWN_FAILED,
            output: String::new(),
            error_output: format!("required build tool '{tool}' not found on PATH"),
            duration: Duration::ZERO,
        }
    }

    pub fn from_process(result: ProcessResult) -> Self {
        Self {
            success: result.success,
            exit_code: result.exit_code,
            output: result.output,
            error_output: result.error_output,
            duration: result.duration,
        }
    }
}

/// Per-invocation state passed through build and execute.
#[derive(Debug, Clone)]
pub struct RunnerContext {
    pub execution_id: Uuid,
    pub project_dir: PathBuf,
    pub parameters: serde_json::Value,
    pub environment: HashMap<String, String>,
    pub timeout: Duration,
    pub build_timeout: Duration,
    pub resource_limits: ResourceLimits,
    pub cancel: CancelToken,
}

impl RunnerContext {
    pub(crate) fn process_spec(&self, program: impl Into<String>, args: Vec<String>) -> ProcessSpec {
        ProcessSpec {
            program: program.into(),
            args,
            cwd: self.project_dir.clone(),
            env: self.environment.clone(),
            timeout: self.timeout,
            execution_id: Some(self.execution_id),
        }
    }

    pub(crate) fn build_spec(&self, program: impl Into<String>, args: Vec<String>) -> ProcessSpec {
        let mut spec = self.process_spec(program, args);
        spec.timeout = self.build_timeout;
        spec
    }
}

/// Core trait every language runner implements.
#[async_trait]
pub trait LanguageRunner: Send + Sync {
    /// Stack tag, e.g. `"java"`.
    fn language(&self) -> &'static str;

    /// Selection priority; higher wins when several runners match.
    fn priority(&self) -> i32;

    /// Cheap filesystem probe.
    fn can_handle(&self, dir: &Path) -> bool;

    async fn analyze(&self, dir: &Path) -> Result<ProjectStructureAnalysis>;

    async fn build(&self, ctx: &RunnerContext) -> Result<ProjectBuildResult>;

    async fn execute(&self, ctx: &RunnerContext) -> Result<ProjectExecutionResult>;
}

/// Classify a finished process into the closed error taxonomy.
pub(crate) fn classify_process(result: &ProcessResult) -> Option<NodeErrorType> {
    if result.success {
        return None;
    }
    Some(match result.exit_code {
        EXIT_TIMEOUT => NodeErrorType::Timeout,
        EXIT_CANCELLED => NodeErrorType::Cancelled,
        _ => NodeErrorType::ExecutionError,
    })
}

/// Map a finished process into a [`ProjectExecutionResult`], applying the
/// stack's memory-estimation floor.
pub(crate) fn execution_result_from_process(
    execution_id: Uuid,
    result: ProcessResult,
    memory_floor_mb: u64,
) -> ProjectExecutionResult {
    let error_type = classify_process(&result);
    ProjectExecutionResult {
        execution_id,
        success: result.success,
        exit_code: result.exit_code,
        output: result.output,
        error_output: result.error_output,
        duration_ms: result.duration.as_millis() as u64,
        output_files: Vec::new(),
        resource_usage: ResourceUsage {
            cpu_time_ms: result.duration.as_millis() as u64,
            peak_memory_mb: memory_floor_mb,
        },
        error_type,
    }
}

/// Recursively collect files with one of the given extensions, as paths
/// relative to `dir`. Hidden directories and common dependency trees are
/// skipped.
pub(crate) fn collect_files(dir: &Path, extensions: &[&str]) -> Vec<PathBuf> {
    let mut found = Vec::new();
    collect_into(dir, dir, extensions, &mut found);
    found.sort();
    found
}

fn collect_into(root: &Path, dir: &Path, extensions: &[&str], out: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if path.is_dir() {
            if name.starts_with('.')
                || name == "node_modules"
                || name == "target"
                || name == "bin"
                || name == "__pycache__"
            {
                continue;
            }
            collect_into(root, &path, extensions, out);
        } else if path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| extensions.contains(&e))
        {
            if let Ok(rel) = path.strip_prefix(root) {
                out.push(rel.to_path_buf());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn classify_exit_codes() {
        let base = ProcessResult {
            success: false,
            exit_code: 2,
            output: String::new(),
            error_output: String::new(),
            duration: Duration::ZERO,
        };
        assert_eq!(classify_process(&base), Some(NodeErrorType::ExecutionError));

        let timeout = ProcessResult {
            exit_code: EXIT_TIMEOUT,
            ..base.clone()
        };
        assert_eq!(classify_process(&timeout), Some(NodeErrorType::Timeout));

        let cancelled = ProcessResult {
            exit_code: EXIT_CANCELLED,
            ..base.clone()
        };
        assert_eq!(classify_process(&cancelled), Some(NodeErrorType::Cancelled));

        let ok = ProcessResult {
            success: true,
            exit_code: 0,
            ..base
        };
        assert_eq!(classify_process(&ok), None);
    }

    #[test]
    fn collect_files_skips_dependency_trees() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("src")).unwrap();
        std::fs::create_dir_all(tmp.path().join("node_modules/lib")).unwrap();
        std::fs::write(tmp.path().join("src/a.js"), "1").unwrap();
        std::fs::write(tmp.path().join("node_modules/lib/b.js"), "1").unwrap();

        let files = collect_files(tmp.path(), &["js"]);
        assert_eq!(files, vec![PathBuf::from("src/a.js")]);
    }

    #[test]
    fn noop_build_succeeds() {
        let r = ProjectBuildResult::noop();
        assert!(r.success);
        assert_eq!(r.exit_code, 0);
    }
}
