//! In-memory state for one live workflow execution.

use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex};

use dashmap::{DashMap, DashSet};
use tokio::sync::{watch, Semaphore};
use uuid::Uuid;

use crate::model::{
    DataContract, ExecutionContext, ExecutionOptions, NodeExecutionStatus, Workflow,
    WorkflowExecution,
};
use crate::process::{cancel_pair, CancelHandle, CancelToken};

/// Why a session is being stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// Operator pause; state is preserved for resume.
    Pause,
    /// Operator cancel; the execution ends Cancelled.
    Cancel,
    /// A node failed and `continue_on_error` is off.
    Abort,
}

/// Live state for one execution. Owned by the engine's session registry;
/// only the owning session's tasks mutate the concurrent structures.
pub struct ExecutionSession {
    pub execution_id: Uuid,
    /// Workflow snapshot the run is shaped by.
    pub workflow: Workflow,
    pub context: ExecutionContext,
    pub executed_by: String,
    pub options: ExecutionOptions,
    pub node_outputs: DashMap<String, DataContract>,
    pub completed_nodes: DashSet<String>,
    pub failed_nodes: DashSet<String>,
    pub skipped_nodes: DashSet<String>,
    pub running_nodes: AtomicUsize,
    node_semaphore: Arc<Semaphore>,
    cancel_handle: CancelHandle,
    cancel_token: CancelToken,
    interrupt: Mutex<Option<Interrupt>>,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

impl ExecutionSession {
    pub fn new(
        execution_id: Uuid,
        workflow: Workflow,
        context: ExecutionContext,
        executed_by: impl Into<String>,
        options: ExecutionOptions,
    ) -> Arc<Self> {
        let (cancel_handle, cancel_token) = cancel_pair();
        let (done_tx, done_rx) = watch::channel(false);
        Arc::new(Self {
            execution_id,
            workflow,
            context,
            executed_by: executed_by.into(),
            node_semaphore: Arc::new(Semaphore::new(options.max_concurrent_nodes.max(1))),
            options,
            node_outputs: DashMap::new(),
            completed_nodes: DashSet::new(),
            failed_nodes: DashSet::new(),
            skipped_nodes: DashSet::new(),
            running_nodes: AtomicUsize::new(0),
            cancel_handle,
            cancel_token,
            interrupt: Mutex::new(None),
            done_tx,
            done_rx,
        })
    }

    /// Rebuild a session from a persisted execution, reloading outputs of
    /// completed nodes. Used by resume and out-of-session retry.
    pub fn from_execution(workflow: Workflow, execution: &WorkflowExecution) -> Arc<Self> {
        let session = Self::new(
            execution.id,
            workflow,
            execution.execution_context.clone(),
            execution.executed_by.clone(),
            execution.options.clone(),
        );
        for ne in &execution.node_executions {
            match ne.status {
                NodeExecutionStatus::Completed => {
                    if let Some(output) = &ne.output_data {
                        session
                            .node_outputs
                            .insert(ne.node_id.clone(), DataContract::new(&ne.node_id, output.clone()));
                    }
                    session.completed_nodes.insert(ne.node_id.clone());
                }
                NodeExecutionStatus::Failed => {
                    session.failed_nodes.insert(ne.node_id.clone());
                }
                NodeExecutionStatus::Skipped => {
                    session.skipped_nodes.insert(ne.node_id.clone());
                }
                _ => {}
            }
        }
        session
    }

    pub fn semaphore(&self) -> Arc<Semaphore> {
        Arc::clone(&self.node_semaphore)
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel_token.clone()
    }

    /// Link the caller's cancellation into this session as a full cancel.
    pub fn link_caller_cancel(self: &Arc<Self>, caller: CancelToken) {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            caller.cancelled().await;
            session.interrupt(Interrupt::Cancel);
        });
    }

    /// Raise an interrupt. The first interrupt wins, except that a Cancel
    /// upgrades an earlier Pause.
    pub fn interrupt(&self, kind: Interrupt) {
        {
            let mut current = self.interrupt.lock().expect("interrupt lock");
            match (*current, kind) {
                (None, _) => *current = Some(kind),
                (Some(Interrupt::Pause), Interrupt::Cancel) => *current = Some(Interrupt::Cancel),
                _ => {}
            }
        }
        self.cancel_handle.cancel();
    }

    pub fn interrupt_kind(&self) -> Option<Interrupt> {
        *self.interrupt.lock().expect("interrupt lock")
    }

    pub fn is_interrupted(&self) -> bool {
        self.cancel_handle.is_cancelled()
    }

    /// Publish a node's output for its dependents. Replaces atomically on
    /// retry.
    pub fn publish_output(&self, node_id: &str, contract: DataContract) {
        self.node_outputs.insert(node_id.to_string(), contract);
    }

    /// Whether every incoming dependency of `node_id` allows it to run.
    pub fn dependencies_satisfied(&self, node_id: &str) -> bool {
        let Some(node) = self.workflow.node(node_id) else {
            return false;
        };
        self.workflow.incoming_edges(node_id).all(|edge| {
            if self.completed_nodes.contains(&edge.source_node_id) {
                return true;
            }
            // A non-completed source is tolerable only when every mapping
            // drawn from it is optional.
            let mappings: Vec<_> = node
                .input_configuration
                .input_mappings
                .iter()
                .filter(|m| m.source_node_id == edge.source_node_id)
                .collect();
            !mappings.is_empty() && mappings.iter().all(|m| m.is_optional)
        })
    }

    pub fn mark_done(&self) {
        self.done_tx.send_replace(true);
    }

    pub fn done_receiver(&self) -> watch::Receiver<bool> {
        self.done_rx.clone()
    }
}
