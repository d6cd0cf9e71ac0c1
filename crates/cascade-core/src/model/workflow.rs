//! Workflow definition types: the DAG of program nodes and its settings.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user-defined workflow: nodes, edges, and execution policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: String,
    pub name: String,
    /// Monotonic version; executions snapshot the version they ran against.
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub status: WorkflowStatus,
    #[serde(default)]
    pub settings: WorkflowSettings,
    #[serde(default)]
    pub permissions: WorkflowPermissions,
    pub nodes: Vec<WorkflowNode>,
    #[serde(default)]
    pub edges: Vec<WorkflowEdge>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub execution_count: u64,
    #[serde(default)]
    pub average_duration_ms: f64,
}

fn default_version() -> u32 {
    1
}

impl Workflow {
    pub fn node(&self, node_id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    /// Enabled edges between enabled nodes.
    pub fn enabled_edges(&self) -> impl Iterator<Item = &WorkflowEdge> {
        self.edges.iter().filter(move |e| {
            !e.is_disabled
                && self.node(&e.source_node_id).is_some_and(|n| !n.is_disabled)
                && self.node(&e.target_node_id).is_some_and(|n| !n.is_disabled)
        })
    }

    /// Enabled edges pointing at `node_id`.
    pub fn incoming_edges<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a WorkflowEdge> {
        self.enabled_edges().filter(move |e| e.target_node_id == node_id)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    #[default]
    Draft,
    Active,
    Archived,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkflowSettings {
    pub max_concurrent_nodes: usize,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            max_concurrent_nodes: 4,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkflowPermissions {
    pub created_by: String,
    pub is_public: bool,
    pub allowed_users: Vec<String>,
    pub allowed_roles: Vec<String>,
    /// Per-user permission sets, e.g. `{"alice": ["execute", "edit"]}`.
    pub user_permissions: HashMap<String, Vec<String>>,
}

/// A single program invocation unit within a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowNode {
    /// Stable id, unique within the workflow.
    pub id: String,
    pub name: String,
    pub program_id: String,
    #[serde(default)]
    pub version_id: Option<String>,
    #[serde(default)]
    pub is_disabled: bool,
    #[serde(default)]
    pub execution_settings: NodeExecutionSettings,
    #[serde(default)]
    pub input_configuration: NodeInputConfiguration,
    #[serde(default)]
    pub output_configuration: NodeOutputConfiguration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeExecutionSettings {
    pub timeout_minutes: u64,
    /// Maximum retries allowed for this node.
    pub retry_count: u32,
    pub environment: HashMap<String, String>,
    pub resource_limits: ResourceLimits,
}

impl Default for NodeExecutionSettings {
    fn default() -> Self {
        Self {
            timeout_minutes: 30,
            retry_count: 0,
            environment: HashMap::new(),
            resource_limits: ResourceLimits::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceLimits {
    pub max_cpu_percent: u32,
    pub max_memory_mb: u64,
    pub max_disk_mb: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_cpu_percent: 100,
            max_memory_mb: 1024,
            max_disk_mb: 2048,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeInputConfiguration {
    pub static_inputs: Vec<StaticInput>,
    pub user_inputs: Vec<UserInput>,
    pub input_mappings: Vec<InputMapping>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticInput {
    pub name: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInput {
    pub name: String,
    #[serde(default)]
    pub default_value: Option<serde_json::Value>,
}

/// Routes one output field of an upstream node into a named input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputMapping {
    pub input_name: String,
    pub source_node_id: String,
    pub source_output_name: String,
    /// Name of a transformation from the closed operator set.
    #[serde(default)]
    pub transformation: Option<String>,
    #[serde(default)]
    pub is_optional: bool,
    #[serde(default)]
    pub default_value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeOutputConfiguration {
    pub output_mappings: Vec<OutputMapping>,
}

/// Publishes one field of the program result under a custom output name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputMapping {
    pub output_name: String,
    pub source_field: String,
    #[serde(default)]
    pub transformation: Option<String>,
}

/// A dependency between two nodes. Data routing is expressed by the target
/// node's input mappings, not by the edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowEdge {
    pub id: String,
    pub source_node_id: String,
    pub target_node_id: String,
    #[serde(default)]
    pub is_disabled: bool,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}
