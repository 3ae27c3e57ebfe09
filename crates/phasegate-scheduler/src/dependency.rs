//! Dependency resolution
//!
//! A pure membership check recomputed on every pass. There is no cached
//! dependency graph; cycle detection lives in [`crate::diagnostics`].

use phasegate_core::{Task, TaskId, TaskSnapshot};
use std::collections::HashSet;

/// Ids of every task in terminal success, across all epics
pub fn completed_ids(snapshot: &TaskSnapshot) -> HashSet<&str> {
    snapshot
        .tasks()
        .iter()
        .filter(|t| t.is_done())
        .map(|t| t.id.as_str())
        .collect()
}

/// Whether every predecessor of `task` has reached terminal success.
///
/// Always false for a task that is itself done.
pub fn can_start(task: &Task, completed: &HashSet<&str>) -> bool {
    if task.is_done() {
        return false;
    }
    task.depends_on
        .iter()
        .all(|dep| completed.contains(dep.as_str()))
}

/// Predecessors still blocking `task`, in id order
pub fn unmet_dependencies(task: &Task, completed: &HashSet<&str>) -> Vec<TaskId> {
    task.depends_on
        .iter()
        .filter(|dep| !completed.contains(dep.as_str()))
        .cloned()
        .collect()
}
