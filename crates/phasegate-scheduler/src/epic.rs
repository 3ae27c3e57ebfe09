//! Epic completion tracking
//!
//! Completion is derived from member tasks on every call and never stored.

use phasegate_core::{EpicId, Task, TaskSnapshot};
use serde::Serialize;

/// True iff the group is non-empty and every member is in terminal success
pub fn is_complete<'a, I>(epic_tasks: I) -> bool
where
    I: IntoIterator<Item = &'a Task>,
{
    let mut any = false;
    for task in epic_tasks {
        if !task.is_done() {
            return false;
        }
        any = true;
    }
    any
}

/// Complete epics, in definition order
pub fn completed_epics(snapshot: &TaskSnapshot) -> Vec<EpicId> {
    snapshot
        .epics()
        .iter()
        .filter(|epic| is_complete(snapshot.epic_tasks(epic)))
        .cloned()
        .collect()
}

/// First epic in definition order that is not complete.
///
/// Every task of a later epic waits behind this one under the epic barrier.
pub fn head_epic(snapshot: &TaskSnapshot) -> Option<&str> {
    snapshot
        .epics()
        .iter()
        .find(|epic| !is_complete(snapshot.epic_tasks(epic)))
        .map(String::as_str)
}

/// Per-epic progress summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EpicProgress {
    pub epic: EpicId,
    pub total: usize,
    pub done: usize,
    /// Members stuck in a failure terminal
    pub failed: usize,
    pub complete: bool,
}

impl EpicProgress {
    /// Percentage of members in terminal success
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.done as f64 / self.total as f64) * 100.0
        }
    }
}

/// Progress of every epic, in definition order
pub fn epic_progress(snapshot: &TaskSnapshot) -> Vec<EpicProgress> {
    snapshot
        .epics()
        .iter()
        .map(|epic| {
            let members: Vec<&Task> = snapshot.epic_tasks(epic).collect();
            EpicProgress {
                epic: epic.clone(),
                total: members.len(),
                done: members.iter().filter(|t| t.is_done()).count(),
                failed: members
                    .iter()
                    .filter(|t| t.workflow_state.is_terminal() && !t.is_done())
                    .count(),
                complete: is_complete(members.iter().copied()),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use phasegate_core::WorkflowState;

    fn done(id: &str, epic: &str) -> Task {
        Task::new(id, epic).with_state(WorkflowState::Done)
    }

    #[test]
    fn test_all_done_is_complete() {
        let tasks = [done("t1", "e"), done("t2", "e")];
        assert!(is_complete(&tasks));
    }

    #[test]
    fn test_any_non_done_member_makes_incomplete() {
        for state in WorkflowState::ALL {
            if state == WorkflowState::Done {
                continue;
            }
            let tasks = [
                done("t1", "e"),
                done("t2", "e"),
                Task::new("t3", "e").with_state(state),
            ];
            assert!(!is_complete(&tasks), "state {}", state);
        }
    }

    #[test]
    fn test_empty_epic_is_never_complete() {
        let tasks: [Task; 0] = [];
        assert!(!is_complete(&tasks));
    }

    #[test]
    fn test_completed_epics_and_head() {
        let snapshot = TaskSnapshot::new(
            vec!["a".into(), "b".into(), "c".into()],
            vec![done("t1", "a"), Task::new("t2", "b"), done("t3", "c")],
        )
        .unwrap();

        assert_eq!(completed_epics(&snapshot), vec!["a".to_string(), "c".to_string()]);
        assert_eq!(head_epic(&snapshot), Some("b"));
    }

    #[test]
    fn test_head_epic_none_when_all_complete() {
        let snapshot = TaskSnapshot::new(vec!["a".into()], vec![done("t1", "a")]).unwrap();
        assert_eq!(head_epic(&snapshot), None);
    }

    #[test]
    fn test_epic_progress() {
        let snapshot = TaskSnapshot::new(
            vec!["a".into(), "empty".into()],
            vec![
                done("t1", "a"),
                Task::new("t2", "a").with_state(WorkflowState::PrFailed),
                Task::new("t3", "a"),
                done("t4", "a"),
            ],
        )
        .unwrap();

        let progress = epic_progress(&snapshot);
        assert_eq!(progress.len(), 2);
        assert_eq!(progress[0].total, 4);
        assert_eq!(progress[0].done, 2);
        assert_eq!(progress[0].failed, 1);
        assert!(!progress[0].complete);
        assert_eq!(progress[0].percent(), 50.0);

        assert_eq!(progress[1].total, 0);
        assert!(!progress[1].complete);
    }
}
