//! Python runner: pyproject/requirements projects or plain scripts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use crate::model::ProjectExecutionResult;
use crate::process::ProcessRunner;
use crate::{EngineError, Result};

use super::{
    collect_files, execution_result_from_process, LanguageRunner, ProjectBuildResult,
    ProjectStructureAnalysis, RunnerContext,
};

const PY_MEMORY_FLOOR_MB: u64 = 50;

/// Entry-point candidates in preference order.
const ENTRY_CANDIDATES: &[&str] = &["main.py", "app.py", "__main__.py"];

pub struct PythonRunner {
    process: Arc<ProcessRunner>,
}

impl PythonRunner {
    pub fn new(process: Arc<ProcessRunner>) -> Self {
        Self { process }
    }

    fn interpreter(dir: &Path) -> Option<String> {
        let venv = dir.join(".venv/bin/python");
        if venv.is_file() {
            return Some(venv.display().to_string());
        }
        for name in ["python3", "python"] {
            if let Ok(p) = which::which(name) {
                return Some(p.display().to_string());
            }
        }
        None
    }

    fn entry_point(dir: &Path, sources: &[PathBuf]) -> Option<String> {
        for candidate in ENTRY_CANDIDATES {
            if dir.join(candidate).is_file() {
                return Some((*candidate).to_string());
            }
        }
        match sources {
            [single] => Some(single.display().to_string()),
            _ => None,
        }
    }
}

#[async_trait]
impl LanguageRunner for PythonRunner {
    fn language(&self) -> &'static str {
        "python"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn can_handle(&self, dir: &Path) -> bool {
        dir.join("pyproject.toml").is_file()
            || dir.join("requirements.txt").is_file()
            || !collect_files(dir, &["py"]).is_empty()
    }

    async fn analyze(&self, dir: &Path) -> Result<ProjectStructureAnalysis> {
        let source_files = collect_files(dir, &["py"]);

        let mut config_files = Vec::new();
        for candidate in ["pyproject.toml", "requirements.txt", "setup.py"] {
            if dir.join(candidate).is_file() {
                config_files.push(PathBuf::from(candidate));
            }
        }

        let project_type = if dir.join("pyproject.toml").is_file() {
            "pyproject"
        } else if dir.join("requirements.txt").is_file() {
            "requirements"
        } else {
            "script"
        };

        let dependencies = dependency_hints(dir)?;
        let main_entry_point = Self::entry_point(dir, &source_files);
        let entry_points = main_entry_point.iter().cloned().collect();

        Ok(ProjectStructureAnalysis {
            language: "python".to_string(),
            project_type: project_type.to_string(),
            has_build_file: project_type != "script",
            source_files,
            config_files,
            entry_points,
            main_entry_point,
            dependencies,
            metadata: std::collections::HashMap::new(),
        })
    }

    /// Build means environment preparation: a venv plus dependency install
    /// when a requirements file is present. Plain scripts have no build.
    async fn build(&self, ctx: &RunnerContext) -> Result<ProjectBuildResult> {
        let dir = &ctx.project_dir;
        if !dir.join("requirements.txt").is_file() {
            return Ok(ProjectBuildResult::noop());
        }

        let python = match Self::interpreter(dir) {
            Some(python) => python,
            None => return Ok(ProjectBuildResult::tool_missing("python3")),
        };

        debug!(execution_id = %ctx.execution_id, "creating virtualenv");
        let venv = self
            .process
            .run(
                ctx.build_spec(
                    python.as_str(),
                    vec!["-m".into(), "venv".into(), ".venv".into()],
                ),
                ctx.cancel.clone(),
            )
            .await?;
        if !venv.success {
            return Ok(ProjectBuildResult::from_process(venv));
        }

        let pip = dir.join(".venv/bin/pip").display().to_string();
        let install = self
            .process
            .run(
                ctx.build_spec(
                    pip,
                    vec![
                        "install".into(),
                        "--quiet".into(),
                        "-r".into(),
                        "requirements.txt".into(),
                    ],
                ),
                ctx.cancel.clone(),
            )
            .await?;

        let mut result = ProjectBuildResult::from_process(install);
        result.duration += venv.duration;
        Ok(result)
    }

    async fn execute(&self, ctx: &RunnerContext) -> Result<ProjectExecutionResult> {
        let dir = &ctx.project_dir;
        let sources = collect_files(dir, &["py"]);
        let entry = Self::entry_point(dir, &sources).ok_or_else(|| {
            EngineError::Runner(format!("no python entry point found in '{}'", dir.display()))
        })?;
        let python = Self::interpreter(dir)
            .ok_or_else(|| EngineError::Runner("python interpreter not found on PATH".into()))?;

        let result = self
            .process
            .run(ctx.process_spec(python, vec![entry]), ctx.cancel.clone())
            .await?;
        Ok(execution_result_from_process(
            ctx.execution_id,
            result,
            PY_MEMORY_FLOOR_MB,
        ))
    }
}

fn dependency_hints(dir: &Path) -> Result<Vec<String>> {
    if let Ok(text) = std::fs::read_to_string(dir.join("requirements.txt")) {
        return Ok(text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|line| {
                line.split(['=', '<', '>', '~', '!', ';', ' '])
                    .next()
                    .unwrap_or(line)
                    .to_string()
            })
            .collect());
    }

    if let Ok(text) = std::fs::read_to_string(dir.join("pyproject.toml")) {
        let re = Regex::new(r#""([A-Za-z0-9_.-]+)\s*[=<>~!\[]"#)
            .map_err(|e| EngineError::Runner(e.to_string()))?;
        return Ok(re
            .captures_iter(&text)
            .map(|caps| caps[1].to_string())
            .collect());
    }

    Ok(Vec::new())
}
