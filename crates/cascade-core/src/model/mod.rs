//! Core data model: workflow definitions, execution records, and the
//! in-flight data contracts exchanged between nodes.

mod contract;
mod execution;
mod project;
mod workflow;

pub use contract::{ContractMetadata, DataContract, DataContractType};
pub use execution::{
    ExecutionContext, ExecutionFailure, ExecutionLogEntry, ExecutionOptions, ExecutionProgress,
    ExecutionResults, ExecutionStatus, LogLevel, NodeExecution, NodeExecutionError,
    NodeExecutionStatus, TriggerType, WorkflowExecution,
};
pub use project::{ProjectExecutionRequest, ProjectExecutionResult, ResourceUsage};
pub use workflow::{
    InputMapping, NodeExecutionSettings, NodeInputConfiguration, NodeOutputConfiguration,
    OutputMapping, ResourceLimits, StaticInput, UserInput, Workflow, WorkflowEdge, WorkflowNode,
    WorkflowPermissions, WorkflowSettings, WorkflowStatus,
};
