use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use tracing::info;

use cascade_core::config::EngineConfig;
use cascade_core::engine::{ExecutionRequest, WorkflowEngine};
use cascade_core::model::ExecutionOptions;
use cascade_core::process::{ProcessRunner, StreamRegistry};
use cascade_core::project::ProjectEngine;
use cascade_core::runner::RunnerRegistry;
use cascade_core::store::{
    AllowAll, ExecutionStore, FsFileStore, MemoryExecutionStore, MemoryWorkflowStore,
    WorkflowStore,
};

use crate::validate::load_workflow;

#[derive(Args)]
pub struct RunArgs {
    /// Workflow definition (JSON).
    workflow: PathBuf,

    /// Directory whose subdirectories are program trees, named by program id.
    #[arg(long)]
    programs: PathBuf,

    /// User input as nodeId.inputName=value; value parses as JSON, falling
    /// back to a plain string. Repeatable.
    #[arg(long = "input", value_name = "KEY=VALUE")]
    inputs: Vec<String>,

    /// Executing user id.
    #[arg(long, default_value = "cli")]
    user: String,

    /// Override the workflow's node concurrency bound.
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Keep going after node failures.
    #[arg(long)]
    continue_on_error: bool,

    /// Keep per-execution project directories on disk.
    #[arg(long)]
    retain_artifacts: bool,
}

pub async fn run(mut config: EngineConfig, args: RunArgs) -> Result<()> {
    let workflow = load_workflow(&args.workflow)?;
    let workflow_id = workflow.id.clone();
    let default_concurrency = workflow.settings.max_concurrent_nodes;
    config.workspace.retain_artifacts |= args.retain_artifacts;

    let user_inputs = parse_inputs(&args.inputs)?;

    let streams = Arc::new(StreamRegistry::new(config.process.stream_buffer_lines));
    let process = Arc::new(ProcessRunner::new(&config.process, streams));
    let registry = Arc::new(RunnerRegistry::with_defaults(process));
    let files = Arc::new(FsFileStore::new(args.programs.clone()));
    let project_engine = Arc::new(ProjectEngine::new(config.clone(), files, registry));

    let executions = Arc::new(MemoryExecutionStore::new());
    let workflows = Arc::new(MemoryWorkflowStore::new());
    workflows.create(workflow).await?;

    let exec_store: Arc<dyn ExecutionStore> = executions.clone();
    let wf_store: Arc<dyn WorkflowStore> = workflows.clone();
    let engine = WorkflowEngine::new(&config, project_engine, exec_store, wf_store, Arc::new(AllowAll));

    let mut request = ExecutionRequest::new(workflow_id, args.user.clone());
    request.user_inputs = user_inputs;
    request.options = Some(ExecutionOptions {
        max_concurrent_nodes: args.max_concurrent.unwrap_or(default_concurrency),
        continue_on_error: args.continue_on_error,
        retain_artifacts: args.retain_artifacts,
    });

    let submitted = engine.execute(request).await?;
    info!(execution_id = %submitted.id, "execution started");

    let done = engine.wait_for_completion(submitted.id).await?;

    for ne in &done.node_executions {
        let state = format!("{:?}", ne.status).to_lowercase();
        match (&ne.error, &ne.skip_reason) {
            (Some(error), _) => println!("node {:12} {state}: {}", ne.node_id, error.message),
            (None, Some(reason)) => println!("node {:12} {state}: {reason}", ne.node_id),
            _ => println!("node {:12} {state}", ne.node_id),
        }
    }

    if let Some(results) = &done.results {
        println!("{}", serde_json::to_string_pretty(&results.final_outputs)?);
        println!("{}", results.summary);
    }
    if let Some(error) = &done.error {
        println!("execution failed: {}", error.message);
    }

    let stats = engine.get_statistics(done.id).await?;
    println!(
        "total {} ms, avg node {:.0} ms",
        stats.total_execution_time_ms, stats.average_node_execution_time_ms
    );

    if done.status != cascade_core::model::ExecutionStatus::Completed {
        bail!("execution finished with status {:?}", done.status);
    }
    Ok(())
}

fn parse_inputs(pairs: &[String]) -> Result<HashMap<String, serde_json::Value>> {
    let mut inputs = HashMap::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .with_context(|| format!("input '{pair}' is not of the form KEY=VALUE"))?;
        let value = serde_json::from_str(raw)
            .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
        inputs.insert(key.to_string(), value);
    }
    Ok(inputs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inputs_parse_json_with_string_fallback() {
        let inputs = parse_inputs(&[
            "a.count=5".to_string(),
            "a.name=plain text".to_string(),
            "b.flag=true".to_string(),
        ])
        .unwrap();

        assert_eq!(inputs["a.count"], serde_json::json!(5));
        assert_eq!(inputs["a.name"], serde_json::json!("plain text"));
        assert_eq!(inputs["b.flag"], serde_json::json!(true));
    }

    #[test]
    fn malformed_input_rejected() {
        assert!(parse_inputs(&["missing-equals".to_string()]).is_err());
    }
}
