//! In-memory task store, used by tests and embedding callers

use async_trait::async_trait;
use phasegate_core::{EpicId, PhaseGateError, Result, Task, TaskSnapshot, WorkflowState};
use tokio::sync::RwLock;

use crate::store::TaskStore;

#[derive(Debug, Default)]
struct Records {
    epics: Vec<EpicId>,
    tasks: Vec<Task>,
}

/// Task store backed by a lock-guarded vector
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    records: RwLock<Records>,
}

impl MemoryTaskStore {
    /// Create a store, validating the records the same way a snapshot does
    pub fn new(epics: Vec<EpicId>, tasks: Vec<Task>) -> Result<Self> {
        TaskSnapshot::new(epics.clone(), tasks.clone())?;
        Ok(Self {
            records: RwLock::new(Records { epics, tasks }),
        })
    }

    /// Current state of one task, if present
    pub async fn state_of(&self, task_id: &str) -> Option<WorkflowState> {
        let records = self.records.read().await;
        records
            .tasks
            .iter()
            .find(|t| t.id == task_id)
            .map(|t| t.workflow_state)
    }

    async fn update_task<F>(&self, task_id: &str, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut Task) + Send,
    {
        let mut records = self.records.write().await;
        let task = records
            .tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| PhaseGateError::TaskNotFound(task_id.to_string()))?;
        mutate(task);
        Ok(())
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn snapshot(&self) -> Result<TaskSnapshot> {
        let records = self.records.read().await;
        TaskSnapshot::new(records.epics.clone(), records.tasks.clone())
    }

    async fn write_state(&self, task_id: &str, state: WorkflowState) -> Result<()> {
        self.update_task(task_id, |task| task.workflow_state = state)
            .await
    }

    async fn set_breakpoint(&self, task_id: &str, breakpoint: bool) -> Result<()> {
        self.update_task(task_id, |task| task.breakpoint = breakpoint)
            .await
    }
}
