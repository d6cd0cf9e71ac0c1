//! Project execution engine: materializes a stored program into a scratch
//! directory, drives the selected language runner through build and
//! execute, and assembles a structured result.

mod layout;

pub use layout::ProjectDir;

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::NodeErrorType;
use crate::mapper;
use crate::model::{ProjectExecutionRequest, ProjectExecutionResult};
use crate::process::{CancelToken, EXIT_SPAWN_FAILED};
use crate::runner::{RunnerContext, RunnerRegistry};
use crate::store::FileStore;
use crate::{EngineError, Result};

/// The seam between the workflow engine and project execution.
///
/// Failures are structured results, never errors; anything that escapes the
/// engine internals is converted to a `SystemError` result.
#[async_trait]
pub trait ProjectExecutor: Send + Sync {
    async fn execute_project(
        &self,
        request: ProjectExecutionRequest,
        cancel: CancelToken,
    ) -> ProjectExecutionResult;
}

pub struct ProjectEngine {
    config: EngineConfig,
    files: Arc<dyn FileStore>,
    registry: Arc<RunnerRegistry>,
}

impl ProjectEngine {
    pub fn new(config: EngineConfig, files: Arc<dyn FileStore>, registry: Arc<RunnerRegistry>) -> Self {
        Self {
            config,
            files,
            registry,
        }
    }

    async fn run_inner(
        &self,
        execution_id: Uuid,
        request: &ProjectExecutionRequest,
        cancel: CancelToken,
    ) -> Result<ProjectExecutionResult> {
        let project = ProjectDir::new(self.config.workspace.root_path(), execution_id);
        project.create().await?;

        let result = self
            .run_in_dir(execution_id, request, &project, cancel)
            .await;

        if self.config.workspace.retain_artifacts {
            debug!(%execution_id, dir = %project.root().display(), "retaining project directory");
        } else if let Err(e) = project.remove().await {
            warn!(%execution_id, error = %e, "failed to remove project directory");
        }

        result
    }

    async fn run_in_dir(
        &self,
        execution_id: Uuid,
        request: &ProjectExecutionRequest,
        project: &ProjectDir,
        cancel: CancelToken,
    ) -> Result<ProjectExecutionResult> {
        let parameters = self.materialize(request, project).await?;

        let runner = match self.registry.select(project.root()) {
            Ok(runner) => runner,
            Err(EngineError::NoRunner(message)) => {
                return Ok(ProjectExecutionResult::failure(
                    execution_id,
                    NodeErrorType::NoRunnerAvailable,
                    EXIT_SPAWN_FAILED,
                    message,
                ));
            }
            Err(e) => return Err(e),
        };
        info!(%execution_id, language = runner.language(), "selected runner");

        let analysis = runner.analyze(project.root()).await?;
        debug!(
            %execution_id,
            project_type = %analysis.project_type,
            sources = analysis.source_files.len(),
            "analyzed project structure"
        );

        let timeout_minutes = request
            .timeout_minutes
            .min(self.config.process.max_timeout_minutes);
        let ctx = RunnerContext {
            execution_id,
            project_dir: project.root().to_path_buf(),
            parameters,
            environment: request.environment.clone(),
            timeout: std::time::Duration::from_secs(timeout_minutes * 60),
            build_timeout: self.config.build.timeout(),
            resource_limits: request.resource_limits.clone(),
            cancel: cancel.clone(),
        };

        let build = runner.build(&ctx).await?;
        if !build.success {
            info!(%execution_id, exit_code = build.exit_code, "build failed");
            return Ok(ProjectExecutionResult {
                execution_id,
                success: false,
                exit_code: build.exit_code,
                output: build.output,
                error_output: build.error_output,
                duration_ms: build.duration.as_millis() as u64,
                output_files: Vec::new(),
                resource_usage: Default::default(),
                error_type: Some(NodeErrorType::BuildFailed),
            });
        }

        let mut result = runner.execute(&ctx).await?;
        result.output_files = project.list_output_files().await?;
        Ok(result)
    }

    /// Write program files, the parameters file, and any declared input
    /// files into the project directory. Returns the JSON-safe parameter
    /// tree so the caller does not convert again.
    async fn materialize(
        &self,
        request: &ProjectExecutionRequest,
        project: &ProjectDir,
    ) -> Result<serde_json::Value> {
        let files = self
            .files
            .list_program_files(&request.program_id, request.version_id.as_deref())
            .await?;
        for file in &files {
            let content = self.files.get_file_content(&file.storage_key).await?;
            project.write_file(&file.relative_path, &content).await?;
        }
        debug!(program_id = %request.program_id, count = files.len(), "materialized program files");

        let (parameters, warnings) = mapper::to_json(&request.parameters);
        for w in &warnings {
            warn!(key = %w.key, message = %w.message, "parameter conversion warning");
        }
        project
            .write_file(
                ProjectDir::PARAMETERS_FILE,
                serde_json::to_string_pretty(&parameters)?.as_bytes(),
            )
            .await?;

        for input in mapper::extract_input_files(&parameters) {
            let content = if input.is_base64() {
                base64::engine::general_purpose::STANDARD
                    .decode(input.content.as_bytes())
                    .map_err(|e| {
                        EngineError::Project(format!(
                            "input file '{}' is not valid base64: {e}",
                            input.name
                        ))
                    })?
            } else {
                input.content.clone().into_bytes()
            };
            project.write_file(&input.name, &content).await?;
        }

        Ok(parameters)
    }
}

#[async_trait]
impl ProjectExecutor for ProjectEngine {
    async fn execute_project(
        &self,
        request: ProjectExecutionRequest,
        cancel: CancelToken,
    ) -> ProjectExecutionResult {
        let execution_id = request.execution_id.unwrap_or_else(Uuid::new_v4);

        match self.run_inner(execution_id, &request, cancel).await {
            Ok(result) => result,
            Err(e) => {
                warn!(%execution_id, error = %e, "project execution failed internally");
                ProjectExecutionResult::failure(
                    execution_id,
                    NodeErrorType::SystemError,
                    EXIT_SPAWN_FAILED,
                    e.to_string(),
                )
            }
        }
    }
}
