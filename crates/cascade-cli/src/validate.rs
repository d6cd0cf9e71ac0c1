use std::path::Path;

use anyhow::{bail, Context, Result};

use cascade_core::model::Workflow;
use cascade_core::validator;

pub fn load_workflow(path: &Path) -> Result<Workflow> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read workflow file '{}'", path.display()))?;
    serde_json::from_str(&data)
        .with_context(|| format!("failed to parse workflow file '{}'", path.display()))
}

pub fn validate(path: &Path) -> Result<()> {
    let workflow = load_workflow(path)?;
    let report = validator::validate_workflow(&workflow);

    for warning in &report.warnings {
        println!("warning: {warning}");
    }
    for error in &report.errors {
        println!("error: {error}");
    }

    if let Ok(metrics) = validator::complexity(&workflow) {
        println!(
            "nodes: {}, edges: {}, depth: {}, parallel width: {}, branching factor: {:.2}",
            metrics.node_count,
            metrics.edge_count,
            metrics.depth,
            metrics.parallel_width,
            metrics.branching_factor
        );
    }

    if !report.is_valid() {
        bail!("workflow '{}' failed validation", workflow.id);
    }
    println!("workflow '{}' is valid", workflow.id);
    Ok(())
}
