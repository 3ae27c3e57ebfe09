//! The storage seam between the scheduler and task records

use async_trait::async_trait;
use phasegate_core::{Result, TaskSnapshot, WorkflowState};
use std::sync::Arc;

/// Backend holding task records.
///
/// The scheduler reads whole snapshots and performs exactly one kind of write:
/// persisting a task's new workflow state. That write must be atomic per task
/// and visible to the next `snapshot` call.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Read every task record plus the epic definition order
    async fn snapshot(&self) -> Result<TaskSnapshot>;

    /// Persist a new workflow state for one task
    async fn write_state(&self, task_id: &str, state: WorkflowState) -> Result<()>;

    /// Set or clear the manual hold. Out-of-band; the scheduler never calls this.
    async fn set_breakpoint(&self, task_id: &str, breakpoint: bool) -> Result<()>;
}

#[async_trait]
impl<T: TaskStore + ?Sized> TaskStore for Arc<T> {
    async fn snapshot(&self) -> Result<TaskSnapshot> {
        (**self).snapshot().await
    }

    async fn write_state(&self, task_id: &str, state: WorkflowState) -> Result<()> {
        (**self).write_state(task_id, state).await
    }

    async fn set_breakpoint(&self, task_id: &str, breakpoint: bool) -> Result<()> {
        (**self).set_breakpoint(task_id, breakpoint).await
    }
}
