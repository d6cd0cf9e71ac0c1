//! Java runner: Maven, Gradle (wrapper preferred), or plain javac projects.

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

/// JVM processes rarely sit below this, regardless of workload.
const JVM_MEMORY_FLOOR_MB: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuildSystem {
    Maven,
    Gradle,
    Javac,
}

impl BuildSystem {
    fn detect(dir: &Path) -> Self {
        if dir.join("pom.xml").is_file() {
            BuildSystem::Maven
        } else if dir.join("build.gradle").is_file() || dir.join("build.gradle.kts").is_file() {
            BuildSystem::Gradle
        } else {
            BuildSystem::Javac
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            BuildSystem::Maven => "maven",
            BuildSystem::Gradle => "gradle",
            BuildSystem::Javac => "javac",
        }
    }
}

pub struct JavaRunner {
    process: Arc<ProcessRunner>,
}

impl JavaRunner {
    pub fn new(process: Arc<ProcessRunner>) -> Self {
        Self { process }
    }

    /// Wrapper script if present, else `gradle` from PATH.
    fn gradle_program(dir: &Path) -> Option<String> {
        let wrapper = if cfg!(windows) { "gradlew.bat" } else { "gradlew" };
        let path = dir.join(wrapper);
        if path.is_file() {
            return Some(path.display().to_string());
        }
        which::which("gradle").ok().map(|p| p.display().to_string())
    }

    fn jvm_memory_env(ctx: &RunnerContext) -> (String, String) {
        (
            "JAVA_TOOL_OPTIONS".to_string(),
            format!("-Xmx{}m", ctx.resource_limits.max_memory_mb),
        )
    }
}

#[async_trait]
impl LanguageRunner for JavaRunner {
    fn language(&self) -> &'static str {
        "java"
    }

    fn priority(&self) -> i32 {
        30
    }

    fn can_handle(&self, dir: &Path) -> bool {
        BuildSystem::detect(dir) != BuildSystem::Javac || !collect_files(dir, &["java"]).is_empty()
    }

    async fn analyze(&self, dir: &Path) -> Result<ProjectStructureAnalysis> {
        let build_system = BuildSystem::detect(dir);
        let source_files = collect_files(dir, &["java"]);

        let mut config_files = Vec::new();
        for candidate in ["pom.xml", "build.gradle", "build.gradle.kts", "settings.gradle"] {
            if dir.join(candidate).is_file() {
                config_files.push(PathBuf::from(candidate));
            }
        }

        let main_regex = Regex::new(r"public\s+static\s+void\s+main\s*\(")
            .map_err(|e| EngineError::Runner(e.to_string()))?;
        let package_regex = Regex::new(r"(?m)^\s*package\s+([\w.]+)\s*;")
            .map_err(|e| EngineError::Runner(e.to_string()))?;

        let mut entry_points = Vec::new();
        for rel in &source_files {
            let text = match std::fs::read_to_string(dir.join(rel)) {
                Ok(text) => text,
                Err(_) => continue,
            };
            if !main_regex.is_match(&text) {
                continue;
            }
            let class = rel
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            let fqcn = match package_regex.captures(&text) {
                Some(caps) => format!("{}.{class}", &caps[1]),
                None => class,
            };
            entry_points.push(fqcn);
        }

        let dependencies = match build_system {
            BuildSystem::Maven => maven_dependency_hints(dir),
            BuildSystem::Gradle => gradle_dependency_hints(dir),
            BuildSystem::Javac => Vec::new(),
        };

        let mut metadata = std::collections::HashMap::new();
        metadata.insert("buildSystem".to_string(), build_system.as_str().to_string());

        Ok(ProjectStructureAnalysis {
            language: "java".to_string(),
            project_type: build_system.as_str().to_string(),
            main_entry_point: entry_points.first().cloned(),
            entry_points,
            has_build_file: build_system != BuildSystem::Javac,
            source_files,
            config_files,
            dependencies,
            metadata,
        })
    }

    async fn build(&self, ctx: &RunnerContext) -> Result<ProjectBuildResult> {
        let dir = &ctx.project_dir;
        let spec = match BuildSystem::detect(dir) {
            BuildSystem::Maven => {
                if which::which("mvn").is_err() {
                    return Ok(ProjectBuildResult::tool_missing("mvn"));
                }
                ctx.build_spec(
                    "mvn",
                    vec!["-B".into(), "-q".into(), "clean".into(), "compile".into()],
                )
            }
            BuildSystem::Gradle => match Self::gradle_program(dir) {
                Some(program) => {
                    ctx.build_spec(program, vec!["build".into(), "-x".into(), "test".into()])
                }
                None => return Ok(ProjectBuildResult::tool_missing("gradle")),
            },
            BuildSystem::Javac => {
                if which::which("javac").is_err() {
                    return Ok(ProjectBuildResult::tool_missing("javac"));
                }
                let sources = collect_files(dir, &["java"]);
                if sources.is_empty() {
                    return Ok(ProjectBuildResult::noop());
                }
                let mut args = vec!["-d".to_string(), "bin".to_string()];
                args.extend(sources.iter().map(|p| p.display().to_string()));
                ctx.build_spec("javac", args)
            }
        };

        debug!(execution_id = %ctx.execution_id, program = %spec.program, "building java project");
        let result = self.process.run(spec, ctx.cancel.clone()).await?;
        Ok(ProjectBuildResult::from_process(result))
    }

    async fn execute(&self, ctx: &RunnerContext) -> Result<ProjectExecutionResult> {
        let dir = &ctx.project_dir;
        let mut spec = match BuildSystem::detect(dir) {
            BuildSystem::Maven => ctx.process_spec("mvn", vec!["-q".into(), "exec:java".into()]),
            BuildSystem::Gradle => {
                let program = Self::gradle_program(dir).ok_or_else(|| {
                    EngineError::Runner("gradle unavailable for execution".into())
                })?;
                ctx.process_spec(program, vec!["run".into(), "--quiet".into()])
            }
            BuildSystem::Javac => {
                let analysis = self.analyze(dir).await?;
                let main_class = analysis.main_entry_point.ok_or_else(|| {
                    EngineError::Runner(format!(
                        "no class with a main method found in '{}'",
                        dir.display()
                    ))
                })?;
                ctx.process_spec("java", vec!["-cp".into(), "bin".into(), main_class])
            }
        };

        let (key, value) = Self::jvm_memory_env(ctx);
        spec.env.entry(key).or_insert(value);

        let result = self.process.run(spec, ctx.cancel.clone()).await?;
        Ok(execution_result_from_process(
            ctx.execution_id,
            result,
            JVM_MEMORY_FLOOR_MB,
        ))
    }
}

fn maven_dependency_hints(dir: &Path) -> Vec<String> {
    let text = match std::fs::read_to_string(dir.join("pom.xml")) {
        Ok(text) => text,
        Err(_) => return Vec::new(),
    };
    let re = match Regex::new(
        r"(?s)<dependency>.*?<groupId>([^<]+)</groupId>.*?<artifactId>([^<]+)</artifactId>",
    ) {
        Ok(re) => re,
        Err(_) => return Vec::new(),
    };
    re.captures_iter(&text)
        .map(|caps| format!("{}:{}", caps[1].trim(), caps[2].trim()))
        .collect()
}

fn gradle_dependency_hints(dir: &Path) -> Vec<String> {
    let mut text = String::new();
    for name in ["build.gradle", "build.gradle.kts"] {
        if let Ok(content) = std::fs::read_to_string(dir.join(name)) {
            text.push_str(&content);
            text.push('\n');
        }
    }
    let re = match Regex::new(
        r#"(?m)^\s*(?:implementation|api|compileOnly|runtimeOnly)\s*[\(]?\s*["']([^"']+)["']"#,
    ) {
        Ok(re) => re,
        Err(_) => return Vec::new(),
    };
    re.captures_iter(&text).map(|caps| caps[1].to_string()).collect()
}
