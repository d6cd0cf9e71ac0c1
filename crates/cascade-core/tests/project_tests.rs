//! End-to-end tests for the project execution engine, using a test-local
//! shell runner so no language toolchain is required.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use cascade_core::config::EngineConfig;
use cascade_core::mapper;
use cascade_core::model::{ProjectExecutionRequest, ProjectExecutionResult, ResourceUsage};
use cascade_core::process::{
    CancelToken, ProcessRunner, ProcessSpec, StreamRegistry, EXIT_CANCELLED, EXIT_TIMEOUT,
};
use cascade_core::project::{ProjectEngine, ProjectExecutor};
use cascade_core::runner::{
    LanguageRunner, ProjectBuildResult, ProjectStructureAnalysis, RunnerContext, RunnerRegistry,
};
use cascade_core::store::MemoryFileStore;
use cascade_core::{NodeErrorType, Result};

// ---------------------------------------------------------------------------
// Test runner: executes `sh main.sh`, builds with `sh build.sh` if present
// ---------------------------------------------------------------------------

struct ShellRunner {
    process: Arc<ProcessRunner>,
}

impl ShellRunner {
    fn spec(ctx: &RunnerContext, script: &str) -> ProcessSpec {
        ProcessSpec {
            program: "sh".to_string(),
            args: vec![script.to_string()],
            cwd: ctx.project_dir.clone(),
            env: ctx.environment.clone(),
            timeout: ctx.timeout,
            execution_id: Some(ctx.execution_id),
        }
    }
}

#[async_trait]
impl LanguageRunner for ShellRunner {
    fn language(&self) -> &'static str {
        "shell"
    }

    fn priority(&self) -> i32 {
        50
    }

    fn can_handle(&self, dir: &Path) -> bool {
        dir.join("main.sh").is_file()
    }

    async fn analyze(&self, _dir: &Path) -> Result<ProjectStructureAnalysis> {
        Ok(ProjectStructureAnalysis {
            language: "shell".to_string(),
            project_type: "script".to_string(),
            main_entry_point: Some("main.sh".to_string()),
            ..ProjectStructureAnalysis::default()
        })
    }

    async fn build(&self, ctx: &RunnerContext) -> Result<ProjectBuildResult> {
        if !ctx.project_dir.join("build.sh").is_file() {
            return Ok(ProjectBuildResult::noop());
        }
        let result = self
            .process
            .run(Self::spec(ctx, "build.sh"), ctx.cancel.clone())
            .await?;
        Ok(ProjectBuildResult {
            success: result.success,
            exit_code: result.exit_code,
            output: result.output,
            error_output: result.error_output,
            duration: result.duration,
        })
    }

    async fn execute(&self, ctx: &RunnerContext) -> Result<ProjectExecutionResult> {
        let result = self
            .process
            .run(Self::spec(ctx, "main.sh"), ctx.cancel.clone())
            .await?;
        let error_type = if result.success {
            None
        } else {
            Some(match result.exit_code {
                EXIT_TIMEOUT => NodeErrorType::Timeout,
                EXIT_CANCELLED => NodeErrorType::Cancelled,
                _ => NodeErrorType::ExecutionError,
            })
        };
        Ok(ProjectExecutionResult {
            execution_id: ctx.execution_id,
            success: result.success,
            exit_code: result.exit_code,
            output: result.output,
            error_output: result.error_output,
            duration_ms: result.duration.as_millis() as u64,
            output_files: Vec::new(),
            resource_usage: ResourceUsage::default(),
            error_type,
        })
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    engine: ProjectEngine,
    files: Arc<MemoryFileStore>,
    workspace: tempfile::TempDir,
}

fn harness(retain_artifacts: bool) -> Harness {
    let workspace = tempfile::tempdir().unwrap();
    let mut config = EngineConfig::default();
    config.workspace.root_dir = workspace.path().display().to_string();
    config.workspace.retain_artifacts = retain_artifacts;

    let process = Arc::new(ProcessRunner::new(
        &config.process,
        Arc::new(StreamRegistry::new(64)),
    ));
    let registry = Arc::new(RunnerRegistry::new(vec![Arc::new(ShellRunner {
        process: Arc::clone(&process),
    })]));

    let files = Arc::new(MemoryFileStore::new());
    let file_store: Arc<dyn cascade_core::store::FileStore> = files.clone();
    let engine = ProjectEngine::new(config, file_store, registry);
    Harness {
        engine,
        files,
        workspace,
    }
}

fn request(program_id: &str, parameters: serde_json::Value) -> ProjectExecutionRequest {
    ProjectExecutionRequest {
        program_id: program_id.to_string(),
        version_id: None,
        user_id: "tester".to_string(),
        parameters: mapper::from_json(&parameters),
        environment: Default::default(),
        timeout_minutes: 1,
        resource_limits: Default::default(),
        execution_id: Some(Uuid::new_v4()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn materializes_runs_and_collects_output_files() {
    let h = harness(false);
    h.files.put_program(
        "prog",
        vec![(
            "main.sh",
            b"cat parameters.json && echo done > output/result.txt".as_slice(),
        )],
    );

    let req = request("prog", json!({"answer": 42}));
    let execution_id = req.execution_id.unwrap();
    let result = h.engine.execute_project(req, CancelToken::never()).await;

    assert!(result.success, "stderr: {}", result.error_output);
    assert_eq!(result.execution_id, execution_id);
    // The parameters file was materialized as UTF-8 JSON.
    assert!(result.output.contains("\"answer\": 42"));
    assert_eq!(result.output_files, vec!["output/result.txt".to_string()]);

    // Scratch directory removed after the run.
    assert!(!h.workspace.path().join(execution_id.to_string()).exists());
}

#[tokio::test]
async fn retention_keeps_the_scratch_directory() {
    let h = harness(true);
    h.files
        .put_program("prog", vec![("main.sh", b"echo kept".as_slice())]);

    let req = request("prog", json!({}));
    let execution_id = req.execution_id.unwrap();
    let result = h.engine.execute_project(req, CancelToken::never()).await;

    assert!(result.success);
    let dir = h.workspace.path().join(execution_id.to_string());
    assert!(dir.join("main.sh").is_file());
    assert!(dir.join("parameters.json").is_file());
}

#[tokio::test]
async fn declared_input_files_are_written() {
    let h = harness(false);
    h.files
        .put_program("prog", vec![("main.sh", b"cat settings.ini".as_slice())]);

    let params = json!({
        "config": {"filename": "settings.ini", "content": "mode=fast", "contentType": "text/plain"}
    });
    let result = h
        .engine
        .execute_project(request("prog", params), CancelToken::never())
        .await;

    assert!(result.success, "stderr: {}", result.error_output);
    assert!(result.output.contains("mode=fast"));
}

#[tokio::test]
async fn base64_input_files_are_decoded() {
    let h = harness(false);
    h.files
        .put_program("prog", vec![("main.sh", b"cat blob.bin".as_slice())]);

    // "aGVsbG8=" is the base64 form of "hello".
    let params = json!({
        "blob": {"filename": "blob.bin", "content": "aGVsbG8=", "contentType": "application/octet-stream"}
    });
    let result = h
        .engine
        .execute_project(request("prog", params), CancelToken::never())
        .await;

    assert!(result.success);
    assert!(result.output.contains("hello"));
}

#[tokio::test]
async fn build_failure_short_circuits_execution() {
    let h = harness(true);
    h.files.put_program(
        "prog",
        vec![
            ("build.sh", b"echo compile error >&2 && exit 3".as_slice()),
            ("main.sh", b"echo ran > output/ran.txt".as_slice()),
        ],
    );

    let req = request("prog", json!({}));
    let execution_id = req.execution_id.unwrap();
    let result = h.engine.execute_project(req, CancelToken::never()).await;

    assert!(!result.success);
    assert_eq!(result.error_type, Some(NodeErrorType::BuildFailed));
    assert_eq!(result.exit_code, 3);
    assert!(result.error_output.contains("compile error"));

    // Execution never ran.
    let dir = h.workspace.path().join(execution_id.to_string());
    assert!(!dir.join("output/ran.txt").exists());
}

#[tokio::test]
async fn no_matching_runner_is_structured() {
    let h = harness(false);
    h.files
        .put_program("prog", vec![("readme.txt", b"no entry point".as_slice())]);

    let result = h
        .engine
        .execute_project(request("prog", json!({})), CancelToken::never())
        .await;

    assert!(!result.success);
    assert_eq!(result.error_type, Some(NodeErrorType::NoRunnerAvailable));
    assert!(result.error_output.contains("no language runner"));
}

#[tokio::test]
async fn unknown_program_becomes_system_error() {
    let h = harness(false);

    let result = h
        .engine
        .execute_project(request("ghost", json!({})), CancelToken::never())
        .await;

    assert!(!result.success);
    assert_eq!(result.error_type, Some(NodeErrorType::SystemError));
    assert!(result.error_output.contains("ghost"));
}

#[tokio::test]
async fn nonzero_exit_classified_as_execution_error() {
    let h = harness(false);
    h.files
        .put_program("prog", vec![("main.sh", b"exit 9".as_slice())]);

    let result = h
        .engine
        .execute_project(request("prog", json!({})), CancelToken::never())
        .await;

    assert!(!result.success);
    assert_eq!(result.exit_code, 9);
    assert_eq!(result.error_type, Some(NodeErrorType::ExecutionError));
}
