use std::path::Path;

use anyhow::Result;

use cascade_core::validator;

use crate::validate::load_workflow;

pub fn inspect(path: &Path) -> Result<()> {
    let workflow = load_workflow(path)?;

    let order = validator::topological_order(&workflow)?;
    println!("topological order: {}", order.join(" -> "));

    println!("waves:");
    for (index, wave) in validator::waves(&workflow)?.iter().enumerate() {
        println!("  {index}: {}", wave.join(", "));
    }

    println!("dependencies:");
    let graph = validator::dependency_graph(&workflow);
    let mut nodes: Vec<_> = graph.iter().collect();
    nodes.sort_by_key(|(id, _)| order.iter().position(|n| n == *id));
    for (node_id, deps) in nodes {
        if deps.is_empty() {
            println!("  {node_id}: (none)");
        } else {
            println!("  {node_id}: {}", deps.join(", "));
        }
    }

    Ok(())
}
