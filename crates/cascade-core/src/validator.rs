//! Static validation of workflow definitions: structure, acyclicity,
//! mapping consistency, permissions, and graph metrics.

use std::collections::{HashMap, HashSet};

use crate::model::{ExecutionContext, Workflow};
use crate::{EngineError, Result};

/// Output fields every completed node publishes, addressable by mappings.
pub const BUILTIN_OUTPUT_FIELDS: &[&str] =
    &["stdout", "stderr", "exitCode", "success", "duration", "outputFiles"];

/// The closed set of mapping transformations.
pub const KNOWN_TRANSFORMATIONS: &[&str] = &["identity"];

/// Result of a validation pass. Warnings do not block execution.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Collapse into an error when any rule failed.
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.errors.is_empty() {
            Ok(self.warnings)
        } else {
            Err(EngineError::Validation(self.errors.join("; ")))
        }
    }
}

/// Graph shape metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowComplexity {
    pub node_count: usize,
    pub edge_count: usize,
    /// Number of topological waves.
    pub depth: usize,
    /// Size of the widest wave.
    pub parallel_width: usize,
    /// Average out-degree over the enabled subgraph.
    pub branching_factor: f64,
}

/// Structural checks on the definition itself.
pub fn validate_workflow(workflow: &Workflow) -> ValidationReport {
    let mut report = ValidationReport::default();

    if workflow.nodes.is_empty() {
        report.warnings.push("workflow has no nodes".to_string());
    }

    let mut seen = HashSet::new();
    for node in &workflow.nodes {
        if !seen.insert(node.id.as_str()) {
            report
                .errors
                .push(format!("duplicate node id '{}'", node.id));
        }
    }

    for edge in &workflow.edges {
        for endpoint in [&edge.source_node_id, &edge.target_node_id] {
            match workflow.node(endpoint) {
                None => report.errors.push(format!(
                    "edge '{}' references unknown node '{endpoint}'",
                    edge.id
                )),
                Some(node) if node.is_disabled && !edge.is_disabled => {
                    report.warnings.push(format!(
                        "edge '{}' references disabled node '{endpoint}'",
                        edge.id
                    ));
                }
                Some(_) => {}
            }
        }
    }

    if report.errors.is_empty() {
        if let Err(e) = topological_order(workflow) {
            report.errors.push(e.to_string());
        }
    }

    validate_mappings(workflow, &mut report);

    report
}

fn validate_mappings(workflow: &Workflow, report: &mut ValidationReport) {
    let ancestors = ancestor_sets(workflow);

    for node in workflow.nodes.iter().filter(|n| !n.is_disabled) {
        for mapping in &node.input_configuration.input_mappings {
            let source = match workflow.node(&mapping.source_node_id) {
                Some(source) => source,
                None => {
                    report.errors.push(format!(
                        "node '{}' input '{}' maps from unknown node '{}'",
                        node.id, mapping.input_name, mapping.source_node_id
                    ));
                    continue;
                }
            };

            let is_ancestor = ancestors
                .get(&node.id)
                .is_some_and(|set| set.contains(&mapping.source_node_id));
            if !is_ancestor {
                report.errors.push(format!(
                    "node '{}' input '{}' maps from '{}', which is not an ancestor",
                    node.id, mapping.input_name, mapping.source_node_id
                ));
            }

            let declared = source
                .output_configuration
                .output_mappings
                .iter()
                .any(|m| m.output_name == mapping.source_output_name);
            if !declared && !BUILTIN_OUTPUT_FIELDS.contains(&mapping.source_output_name.as_str()) {
                report.errors.push(format!(
                    "node '{}' input '{}' maps from undeclared output '{}' of node '{}'",
                    node.id, mapping.input_name, mapping.source_output_name, source.id
                ));
            }

            check_transformation(&mapping.transformation, &node.id, report);
        }

        for mapping in &node.output_configuration.output_mappings {
            check_transformation(&mapping.transformation, &node.id, report);
        }
    }
}

fn check_transformation(transformation: &Option<String>, node_id: &str, report: &mut ValidationReport) {
    if let Some(name) = transformation {
        if !KNOWN_TRANSFORMATIONS.contains(&name.as_str()) {
            report.errors.push(format!(
                "node '{node_id}' uses unknown transformation '{name}'"
            ));
        }
    }
}

/// Check the supplied execution context against node input declarations.
pub fn validate_execution(workflow: &Workflow, context: &ExecutionContext) -> ValidationReport {
    let mut report = ValidationReport::default();

    for node in workflow.nodes.iter().filter(|n| !n.is_disabled) {
        for input in &node.input_configuration.user_inputs {
            if input.default_value.is_some() {
                continue;
            }
            let key = format!("{}.{}", node.id, input.name);
            if !context.user_inputs.contains_key(&key) {
                report.errors.push(format!(
                    "required user input '{key}' missing from execution context"
                ));
            }
        }
    }

    for key in context.user_inputs.keys() {
        let known = key
            .split_once('.')
            .and_then(|(node_id, input)| workflow.node(node_id).map(|n| (n, input)))
            .is_some_and(|(node, input)| {
                node.input_configuration
                    .user_inputs
                    .iter()
                    .any(|u| u.name == input)
            });
        if !known {
            report
                .warnings
                .push(format!("user input '{key}' does not match any declaration"));
        }
    }

    report
}

/// Static permission precheck. Public visibility is read-only and does not
/// grant execute.
pub fn validate_permissions(workflow: &Workflow, user_id: &str, user_roles: &[String]) -> Result<()> {
    let perms = &workflow.permissions;

    let allowed = user_id == perms.created_by
        || perms.allowed_users.iter().any(|u| u == user_id)
        || perms.allowed_roles.iter().any(|r| user_roles.contains(r))
        || perms
            .user_permissions
            .get(user_id)
            .is_some_and(|set| set.iter().any(|p| p == "execute"));

    if allowed {
        Ok(())
    } else {
        Err(EngineError::PermissionDenied(format!(
            "user '{user_id}' may not execute workflow '{}'",
            workflow.id
        )))
    }
}

/// Flat topological order over the enabled subgraph, tie-broken by node
/// insertion order.
pub fn topological_order(workflow: &Workflow) -> Result<Vec<String>> {
    Ok(waves(workflow)?.into_iter().flatten().collect())
}

/// Topological waves: each wave contains nodes whose predecessors all sit
/// in earlier waves. Nodes within a wave are eligible to run concurrently.
pub fn waves(workflow: &Workflow) -> Result<Vec<Vec<String>>> {
    let enabled: Vec<&str> = workflow
        .nodes
        .iter()
        .filter(|n| !n.is_disabled)
        .map(|n| n.id.as_str())
        .collect();

    let mut in_degree: HashMap<&str, usize> = enabled.iter().map(|id| (*id, 0)).collect();
    let mut dependents: HashMap<&str, Vec<&str>> =
        enabled.iter().map(|id| (*id, Vec::new())).collect();

    for edge in workflow.enabled_edges() {
        let (source, target) = (edge.source_node_id.as_str(), edge.target_node_id.as_str());
        if !in_degree.contains_key(source) || !in_degree.contains_key(target) {
            continue;
        }
        *in_degree.get_mut(target).expect("target present") += 1;
        dependents.get_mut(source).expect("source present").push(target);
    }

    let mut result: Vec<Vec<String>> = Vec::new();
    let mut processed = 0;
    // Insertion order of `enabled` gives the deterministic tie-break.
    let mut ready: Vec<&str> = enabled
        .iter()
        .copied()
        .filter(|id| in_degree[id] == 0)
        .collect();

    while !ready.is_empty() {
        let wave: Vec<String> = ready.iter().map(|id| id.to_string()).collect();
        let mut next: Vec<&str> = Vec::new();

        for id in &ready {
            processed += 1;
            if let Some(deps) = dependents.get(id) {
                for dep in deps {
                    let degree = in_degree.get_mut(dep).expect("dependent present");
                    *degree -= 1;
                    if *degree == 0 {
                        next.push(dep);
                    }
                }
            }
        }

        // Restore insertion order for the next wave.
        next.sort_by_key(|id| enabled.iter().position(|n| n == id));
        result.push(wave);
        ready = next;
    }

    if processed != enabled.len() {
        return Err(EngineError::Validation(
            "workflow contains a dependency cycle".into(),
        ));
    }

    Ok(result)
}

/// Map of node id to its direct dependencies over the enabled subgraph.
pub fn dependency_graph(workflow: &Workflow) -> HashMap<String, Vec<String>> {
    let mut graph: HashMap<String, Vec<String>> = workflow
        .nodes
        .iter()
        .filter(|n| !n.is_disabled)
        .map(|n| (n.id.clone(), Vec::new()))
        .collect();

    for edge in workflow.enabled_edges() {
        if let Some(deps) = graph.get_mut(&edge.target_node_id) {
            deps.push(edge.source_node_id.clone());
        }
    }

    graph
}

/// All transitive ancestors per node, over the enabled subgraph.
fn ancestor_sets(workflow: &Workflow) -> HashMap<String, HashSet<String>> {
    let direct = dependency_graph(workflow);
    let mut sets: HashMap<String, HashSet<String>> = HashMap::new();

    fn visit(
        node: &str,
        direct: &HashMap<String, Vec<String>>,
        sets: &mut HashMap<String, HashSet<String>>,
        visiting: &mut HashSet<String>,
    ) -> HashSet<String> {
        if let Some(done) = sets.get(node) {
            return done.clone();
        }
        // Break on cycles; acyclicity is reported separately.
        if !visiting.insert(node.to_string()) {
            return HashSet::new();
        }
        let mut all = HashSet::new();
        if let Some(parents) = direct.get(node) {
            for parent in parents {
                all.insert(parent.clone());
                all.extend(visit(parent, direct, sets, visiting));
            }
        }
        visiting.remove(node);
        sets.insert(node.to_string(), all.clone());
        all
    }

    let mut visiting = HashSet::new();
    for node in workflow.nodes.iter().filter(|n| !n.is_disabled) {
        visit(node.id.as_str(), &direct, &mut sets, &mut visiting);
    }

    sets
}

/// Graph metrics for the enabled subgraph.
pub fn complexity(workflow: &Workflow) -> Result<WorkflowComplexity> {
    let all_waves = waves(workflow)?;
    let node_count = workflow.nodes.iter().filter(|n| !n.is_disabled).count();
    let edge_count = workflow.enabled_edges().count();

    Ok(WorkflowComplexity {
        node_count,
        edge_count,
        depth: all_waves.len(),
        parallel_width: all_waves.iter().map(Vec::len).max().unwrap_or(0),
        branching_factor: if node_count == 0 {
            0.0
        } else {
            edge_count as f64 / node_count as f64
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        InputMapping, WorkflowEdge, WorkflowNode, WorkflowPermissions,
    };
    use serde_json::json;

    fn node(id: &str) -> WorkflowNode {
        serde_json::from_value(json!({"id": id, "name": id, "programId": "p"})).unwrap()
    }

    fn edge(from: &str, to: &str) -> WorkflowEdge {
        serde_json::from_value(json!({
            "id": format!("{from}-{to}"),
            "sourceNodeId": from,
            "targetNodeId": to
        }))
        .unwrap()
    }

    fn workflow(nodes: Vec<WorkflowNode>, edges: Vec<WorkflowEdge>) -> Workflow {
        serde_json::from_value(json!({"id": "wf", "name": "wf", "nodes": [], "edges": []}))
            .map(|mut wf: Workflow| {
                wf.nodes = nodes;
                wf.edges = edges;
                wf
            })
            .unwrap()
    }

    fn diamond() -> Workflow {
        workflow(
            vec![node("a"), node("b"), node("c"), node("d")],
            vec![edge("a", "b"), edge("a", "c"), edge("b", "d"), edge("c", "d")],
        )
    }

    #[test]
    fn waves_for_diamond() {
        let wf = diamond();
        let waves = waves(&wf).unwrap();
        assert_eq!(waves, vec![vec!["a"], vec!["b", "c"], vec!["d"]]);
    }

    #[test]
    fn topological_order_respects_edges() {
        let wf = diamond();
        let order = topological_order(&wf).unwrap();
        let pos = |id: &str| order.iter().position(|n| n == id).unwrap();
        for e in wf.enabled_edges() {
            assert!(pos(&e.source_node_id) < pos(&e.target_node_id));
        }
    }

    #[test]
    fn tie_break_follows_insertion_order() {
        let wf = workflow(vec![node("z"), node("m"), node("a")], vec![]);
        let order = topological_order(&wf).unwrap();
        assert_eq!(order, vec!["z", "m", "a"]);
    }

    #[test]
    fn cycle_is_rejected() {
        let wf = workflow(vec![node("a"), node("b")], vec![edge("a", "b"), edge("b", "a")]);
        let err = waves(&wf).unwrap_err();
        assert!(err.to_string().contains("cycle"));

        let report = validate_workflow(&wf);
        assert!(!report.is_valid());
    }

    #[test]
    fn cycle_through_disabled_node_is_ignored() {
        let mut wf = workflow(
            vec![node("a"), node("b"), node("c")],
            vec![edge("a", "b"), edge("b", "c"), edge("c", "a")],
        );
        wf.nodes[2].is_disabled = true;
        assert!(waves(&wf).is_ok());
    }

    #[test]
    fn dangling_edge_is_an_error() {
        let wf = workflow(vec![node("a")], vec![edge("a", "ghost")]);
        let report = validate_workflow(&wf);
        assert!(report.errors.iter().any(|e| e.contains("ghost")));
    }

    #[test]
    fn duplicate_node_ids_rejected() {
        let wf = workflow(vec![node("a"), node("a")], vec![]);
        let report = validate_workflow(&wf);
        assert!(report.errors.iter().any(|e| e.contains("duplicate")));
    }

    #[test]
    fn edge_to_disabled_node_is_a_warning() {
        let mut wf = workflow(vec![node("a"), node("b")], vec![edge("a", "b")]);
        wf.nodes[1].is_disabled = true;
        let report = validate_workflow(&wf);
        assert!(report.is_valid());
        assert!(report.warnings.iter().any(|w| w.contains("disabled")));
    }

    #[test]
    fn mapping_from_non_ancestor_rejected() {
        let mut wf = diamond();
        // b and c are siblings; a mapping between them is invalid.
        wf.nodes[1].input_configuration.input_mappings = vec![InputMapping {
            input_name: "x".into(),
            source_node_id: "c".into(),
            source_output_name: "stdout".into(),
            transformation: None,
            is_optional: false,
            default_value: None,
        }];
        let report = validate_workflow(&wf);
        assert!(report.errors.iter().any(|e| e.contains("not an ancestor")));
    }

    #[test]
    fn mapping_from_builtin_output_accepted() {
        let mut wf = diamond();
        wf.nodes[3].input_configuration.input_mappings = vec![InputMapping {
            input_name: "x".into(),
            source_node_id: "b".into(),
            source_output_name: "exitCode".into(),
            transformation: None,
            is_optional: false,
            default_value: None,
        }];
        assert!(validate_workflow(&wf).is_valid());
    }

    #[test]
    fn mapping_from_undeclared_output_rejected() {
        let mut wf = diamond();
        wf.nodes[3].input_configuration.input_mappings = vec![InputMapping {
            input_name: "x".into(),
            source_node_id: "b".into(),
            source_output_name: "mystery".into(),
            transformation: None,
            is_optional: false,
            default_value: None,
        }];
        let report = validate_workflow(&wf);
        assert!(report.errors.iter().any(|e| e.contains("undeclared output")));
    }

    #[test]
    fn unknown_transformation_rejected() {
        let mut wf = diamond();
        wf.nodes[3].input_configuration.input_mappings = vec![InputMapping {
            input_name: "x".into(),
            source_node_id: "b".into(),
            source_output_name: "stdout".into(),
            transformation: Some("jsonpath".into()),
            is_optional: false,
            default_value: None,
        }];
        let report = validate_workflow(&wf);
        assert!(report.errors.iter().any(|e| e.contains("unknown transformation")));
    }

    #[test]
    fn missing_required_user_input_rejected() {
        let mut wf = diamond();
        wf.nodes[0].input_configuration.user_inputs =
            vec![serde_json::from_value(json!({"name": "threshold"})).unwrap()];

        let report = validate_execution(&wf, &ExecutionContext::default());
        assert!(report.errors.iter().any(|e| e.contains("a.threshold")));

        let mut ctx = ExecutionContext::default();
        ctx.user_inputs.insert("a.threshold".into(), json!(5));
        assert!(validate_execution(&wf, &ctx).is_valid());
    }

    #[test]
    fn user_input_with_default_is_not_required() {
        let mut wf = diamond();
        wf.nodes[0].input_configuration.user_inputs =
            vec![serde_json::from_value(json!({"name": "threshold", "defaultValue": 3})).unwrap()];
        assert!(validate_execution(&wf, &ExecutionContext::default()).is_valid());
    }

    #[test]
    fn permissions_creator_and_roles() {
        let mut wf = diamond();
        wf.permissions = WorkflowPermissions {
            created_by: "owner".into(),
            is_public: true,
            allowed_users: vec!["alice".into()],
            allowed_roles: vec!["ops".into()],
            user_permissions: Default::default(),
        };

        assert!(validate_permissions(&wf, "owner", &[]).is_ok());
        assert!(validate_permissions(&wf, "alice", &[]).is_ok());
        assert!(validate_permissions(&wf, "bob", &["ops".into()]).is_ok());
        // Public visibility is read-only.
        assert!(validate_permissions(&wf, "mallory", &[]).is_err());
    }

    #[test]
    fn complexity_metrics_for_diamond() {
        let wf = diamond();
        let metrics = complexity(&wf).unwrap();
        assert_eq!(metrics.node_count, 4);
        assert_eq!(metrics.edge_count, 4);
        assert_eq!(metrics.depth, 3);
        assert_eq!(metrics.parallel_width, 2);
        assert!((metrics.branching_factor - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn complexity_counts_only_the_enabled_subgraph() {
        let mut wf = diamond();
        wf.nodes[3].is_disabled = true;

        let metrics = complexity(&wf).unwrap();
        assert_eq!(metrics.node_count, 3);
        // Both edges into the disabled node are excluded.
        assert_eq!(metrics.edge_count, 2);
        assert_eq!(metrics.depth, 2);
        assert_eq!(metrics.parallel_width, 2);
        assert!((metrics.branching_factor - 2.0 / 3.0).abs() < f64::EPSILON);
    }
}
