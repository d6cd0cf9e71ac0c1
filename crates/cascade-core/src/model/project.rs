//! Request/result pair for one project execution (one node's program run).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::NodeErrorType;
use crate::value::DocumentValue;

use super::workflow::ResourceLimits;

/// Everything the project execution engine needs to run one program.
#[derive(Debug, Clone)]
pub struct ProjectExecutionRequest {
    pub program_id: String,
    pub version_id: Option<String>,
    pub user_id: String,
    /// Parameters in persisted-document form; materialized to JSON on disk.
    pub parameters: DocumentValue,
    pub environment: HashMap<String, String>,
    pub timeout_minutes: u64,
    pub resource_limits: ResourceLimits,
    /// Pre-assigned id, e.g. for binding a streaming sink before the run.
    /// Generated when absent.
    pub execution_id: Option<Uuid>,
}

/// Structured outcome of one project execution. Failures are carried here
/// rather than raised.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectExecutionResult {
    pub execution_id: Uuid,
    pub success: bool,
    pub exit_code: i32,
    pub output: String,
    pub error_output: String,
    pub duration_ms: u64,
    /// Paths relative to the project root, discovered under the output
    /// convention.
    pub output_files: Vec<String>,
    pub resource_usage: ResourceUsage,
    /// Failure classification; `None` on success.
    pub error_type: Option<NodeErrorType>,
}

impl ProjectExecutionResult {
    pub fn failure(
        execution_id: Uuid,
        error_type: NodeErrorType,
        exit_code: i32,
        message: impl Into<String>,
    ) -> Self {
        Self {
            execution_id,
            success: false,
            exit_code,
            output: String::new(),
            error_output: message.into(),
            duration_ms: 0,
            output_files: Vec::new(),
            resource_usage: ResourceUsage::default(),
            error_type: Some(error_type),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceUsage {
    pub cpu_time_ms: u64,
    /// Estimated; language runners apply per-stack floors.
    pub peak_memory_mb: u64,
}
