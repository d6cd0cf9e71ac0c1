//! Node.js runner: npm packages or plain scripts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::model::ProjectExecutionResult;
use crate::process::ProcessRunner;
use crate::{EngineError, Result};

use super::{
    collect_files, execution_result_from_process, LanguageRunner, ProjectBuildResult,
    ProjectStructureAnalysis, RunnerContext,
};

const NODE_MEMORY_FLOOR_MB: u64 = 75;

const ENTRY_CANDIDATES: &[&str] = &["index.js", "main.js", "app.js"];

pub struct NodeRunner {
    process: Arc<ProcessRunner>,
}

impl NodeRunner {
    pub fn new(process: Arc<ProcessRunner>) -> Self {
        Self { process }
    }

    fn package_json(dir: &Path) -> Option<serde_json::Value> {
        let text = std::fs::read_to_string(dir.join("package.json")).ok()?;
        serde_json::from_str(&text).ok()
    }

    fn entry_point(dir: &Path, package: Option<&serde_json::Value>) -> Option<String> {
        if let Some(main) = package
            .and_then(|p| p.get("main"))
            .and_then(|m| m.as_str())
        {
            if dir.join(main).is_file() {
                return Some(main.to_string());
            }
        }
        for candidate in ENTRY_CANDIDATES {
            if dir.join(candidate).is_file() {
                return Some((*candidate).to_string());
            }
        }
        match collect_files(dir, &["js", "mjs", "cjs"]).as_slice() {
            [single] => Some(single.display().to_string()),
            _ => None,
        }
    }

    fn has_dependencies(package: &serde_json::Value) -> bool {
        ["dependencies", "devDependencies"].iter().any(|key| {
            package
                .get(*key)
                .and_then(|d| d.as_object())
                .is_some_and(|d| !d.is_empty())
        })
    }
}

#[async_trait]
impl LanguageRunner for NodeRunner {
    fn language(&self) -> &'static str {
        "node"
    }

    fn priority(&self) -> i32 {
        20
    }

    fn can_handle(&self, dir: &Path) -> bool {
        dir.join("package.json").is_file() || !collect_files(dir, &["js", "mjs", "cjs"]).is_empty()
    }

    async fn analyze(&self, dir: &Path) -> Result<ProjectStructureAnalysis> {
        let package = Self::package_json(dir);
        let source_files = collect_files(dir, &["js", "mjs", "cjs"]);

        let mut config_files = Vec::new();
        for candidate in ["package.json", "package-lock.json"] {
            if dir.join(candidate).is_file() {
                config_files.push(PathBuf::from(candidate));
            }
        }

        let dependencies = package
            .as_ref()
            .and_then(|p| p.get("dependencies"))
            .and_then(|d| d.as_object())
            .map(|d| d.keys().cloned().collect())
            .unwrap_or_default();

        let main_entry_point = Self::entry_point(dir, package.as_ref());
        let entry_points = main_entry_point.iter().cloned().collect();

        let mut metadata = std::collections::HashMap::new();
        if let Some(name) = package
            .as_ref()
            .and_then(|p| p.get("name"))
            .and_then(|n| n.as_str())
        {
            metadata.insert("packageName".to_string(), name.to_string());
        }
        if let Some(start) = package
            .as_ref()
            .and_then(|p| p.get("scripts"))
            .and_then(|s| s.get("start"))
            .and_then(|s| s.as_str())
        {
            metadata.insert("startScript".to_string(), start.to_string());
        }

        Ok(ProjectStructureAnalysis {
            language: "node".to_string(),
            project_type: if package.is_some() { "npm" } else { "script" }.to_string(),
            has_build_file: package.is_some(),
            source_files,
            config_files,
            entry_points,
            main_entry_point,
            dependencies,
            metadata,
        })
    }

    /// Build means dependency install when the manifest declares any.
    async fn build(&self, ctx: &RunnerContext) -> Result<ProjectBuildResult> {
        let dir = &ctx.project_dir;
        let has_deps = Self::package_json(dir)
            .as_ref()
            .is_some_and(Self::has_dependencies);
        if !has_deps {
            return Ok(ProjectBuildResult::noop());
        }

        if which::which("npm").is_err() {
            return Ok(ProjectBuildResult::tool_missing("npm"));
        }

        let subcommand = if dir.join("package-lock.json").is_file() {
            "ci"
        } else {
            "install"
        };
        debug!(execution_id = %ctx.execution_id, subcommand, "installing node dependencies");

        let result = self
            .process
            .run(
                ctx.build_spec("npm", vec![subcommand.into(), "--no-audit".into()]),
                ctx.cancel.clone(),
            )
            .await?;
        Ok(ProjectBuildResult::from_process(result))
    }

    async fn execute(&self, ctx: &RunnerContext) -> Result<ProjectExecutionResult> {
        let dir = &ctx.project_dir;
        let package = Self::package_json(dir);
        let entry = Self::entry_point(dir, package.as_ref()).ok_or_else(|| {
            EngineError::Runner(format!("no node entry point found in '{}'", dir.display()))
        })?;
        let node = which::which("node")
            .map_err(|_| EngineError::Runner("node not found on PATH".into()))?;

        let result = self
            .process
            .run(
                ctx.process_spec(node.display().to_string(), vec![entry]),
                ctx.cancel.clone(),
            )
            .await?;
        Ok(execution_result_from_process(
            ctx.execution_id,
            result,
            NODE_MEMORY_FLOOR_MB,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProcessConfig;
    use crate::process::StreamRegistry;

    fn runner() -> NodeRunner {
        let process = Arc::new(ProcessRunner::new(
            &ProcessConfig::default(),
            Arc::new(StreamRegistry::new(16)),
        ));
        NodeRunner::new(process)
    }

    #[test]
    fn detects_package_json() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("package.json"), "{}").unwrap();
        assert!(runner().can_handle(tmp.path()));
    }

    #[tokio::test]
    async fn analyze_reads_manifest_fields() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("package.json"),
            r#"{"name": "svc", "main": "server.js", "scripts": {"start": "node server.js"},
                "dependencies": {"express": "^4"}}"#,
        )
        .unwrap();
        std::fs::write(tmp.path().join("server.js"), "1").unwrap();

        let analysis = runner().analyze(tmp.path()).await.unwrap();
        assert_eq!(analysis.project_type, "npm");
        assert_eq!(analysis.main_entry_point.as_deref(), Some("server.js"));
        assert_eq!(analysis.dependencies, vec!["express"]);
        assert_eq!(analysis.metadata.get("packageName").map(String::as_str), Some("svc"));
    }

    #[tokio::test]
    async fn missing_main_falls_back_to_index_js() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("package.json"), r#"{"main": "gone.js"}"#).unwrap();
        std::fs::write(tmp.path().join("index.js"), "1").unwrap();

        let analysis = runner().analyze(tmp.path()).await.unwrap();
        assert_eq!(analysis.main_entry_point.as_deref(), Some("index.js"));
    }

    #[tokio::test]
    async fn build_is_noop_without_dependencies() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("package.json"), r#"{"name": "bare"}"#).unwrap();

        let ctx = RunnerContext {
            execution_id: uuid::Uuid::new_v4(),
            project_dir: tmp.path().to_path_buf(),
            parameters: serde_json::Value::Null,
            environment: Default::default(),
            timeout: std::time::Duration::from_secs(5),
            build_timeout: std::time::Duration::from_secs(5),
            resource_limits: Default::default(),
            cancel: crate::process::CancelToken::never(),
        };
        let result = runner().build(&ctx).await.unwrap();
        assert!(result.success);
        assert_eq!(result.exit_code, 0);
    }
}
