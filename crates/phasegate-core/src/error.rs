//! Unified error types for phasegate

use thiserror::Error;

use crate::types::{TaskId, WorkflowState};

/// Unified error type for all phasegate operations
#[derive(Error, Debug)]
pub enum PhaseGateError {
    // Configuration errors (fail fast, never default-routed)
    #[error("Unknown workflow state: {0}")]
    UnknownState(String),

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Unknown phase outcome: {0}")]
    UnknownOutcome(String),

    #[error("State {0} has no rejection path")]
    NoRejectionPath(WorkflowState),

    #[error("State {0} cannot route a tests-defective outcome")]
    NoRevisionPath(WorkflowState),

    #[error("State {0} has no failure route")]
    NoFailurePath(WorkflowState),

    #[error("State {0} is terminal and accepts no outcome")]
    OutcomeOnTerminal(WorkflowState),

    #[error("Invalid state table: {0}")]
    InvalidStateTable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // Phase failures surfaced for manual handling
    #[error("Phase failed for task {task_id} in state {state}: {reason}")]
    PhaseFailed {
        task_id: TaskId,
        state: WorkflowState,
        reason: String,
    },

    // Task set errors
    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Duplicate task id: {0}")]
    DuplicateTask(TaskId),

    #[error("Duplicate epic id: {0}")]
    DuplicateEpic(String),

    #[error("Task {task_id} references unknown epic {epic}")]
    UnknownEpic { task_id: TaskId, epic: String },

    #[error("Dependency cycle detected: {}", .0.join(" -> "))]
    DependencyCycle(Vec<TaskId>),

    // Collaborator errors
    #[error("Executor error: {0}")]
    Executor(String),

    #[error("Store error: {0}")]
    Store(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using PhaseGateError
pub type Result<T> = std::result::Result<T, PhaseGateError>;
