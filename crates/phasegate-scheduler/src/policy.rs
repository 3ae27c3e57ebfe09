//! Ordering policies for the ready set

use phasegate_core::{PolicyKind, Task, TaskSnapshot};
use std::cmp::Ordering;
use std::collections::HashSet;

use crate::dependency::completed_ids;
use crate::epic::head_epic;

/// Facts derived once per scheduling pass and shared by every comparison
pub struct SchedulingContext<'a> {
    pub snapshot: &'a TaskSnapshot,
    /// Ids of tasks in terminal success
    pub completed: HashSet<&'a str>,
    /// First incomplete epic in definition order
    pub head_epic: Option<&'a str>,
}

impl<'a> SchedulingContext<'a> {
    pub fn new(snapshot: &'a TaskSnapshot) -> Self {
        Self {
            snapshot,
            completed: completed_ids(snapshot),
            head_epic: head_epic(snapshot),
        }
    }

    /// Position of a task's epic in definition order
    pub fn epic_rank(&self, task: &Task) -> usize {
        // TaskSnapshot::new rejects tasks in undefined epics
        self.snapshot.epic_rank(&task.epic).unwrap_or(usize::MAX)
    }

    fn head_rank(&self) -> Option<usize> {
        self.head_epic.and_then(|epic| self.snapshot.epic_rank(epic))
    }
}

/// Strategy deciding which ready tasks may go now and in what order
pub trait OrderingPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether a ready task may be dispatched in this pass
    fn admits(&self, task: &Task, ctx: &SchedulingContext<'_>) -> bool;

    /// Total order over ready tasks; `Less` goes first
    fn compare(&self, a: &Task, b: &Task, ctx: &SchedulingContext<'_>) -> Ordering;
}

/// Epic definition order first, then priority, then id.
///
/// Tasks of a later epic are deferred while any earlier epic is incomplete.
#[derive(Debug, Clone, Copy, Default)]
pub struct EpicBarrierPolicy;

impl OrderingPolicy for EpicBarrierPolicy {
    fn name(&self) -> &'static str {
        "epic-barrier"
    }

    fn admits(&self, task: &Task, ctx: &SchedulingContext<'_>) -> bool {
        match ctx.head_rank() {
            Some(head) => ctx.epic_rank(task) <= head,
            None => true,
        }
    }

    fn compare(&self, a: &Task, b: &Task, ctx: &SchedulingContext<'_>) -> Ordering {
        ctx.epic_rank(a)
            .cmp(&ctx.epic_rank(b))
            .then(a.priority.cmp(&b.priority))
            .then_with(|| a.id.cmp(&b.id))
    }
}

/// Priority first, epic order as tie-break, no barrier
#[derive(Debug, Clone, Copy, Default)]
pub struct PriorityFirstPolicy;

impl OrderingPolicy for PriorityFirstPolicy {
    fn name(&self) -> &'static str {
        "priority-first"
    }

    fn admits(&self, _task: &Task, _ctx: &SchedulingContext<'_>) -> bool {
        true
    }

    fn compare(&self, a: &Task, b: &Task, ctx: &SchedulingContext<'_>) -> Ordering {
        a.priority
            .cmp(&b.priority)
            .then(ctx.epic_rank(a).cmp(&ctx.epic_rank(b)))
            .then_with(|| a.id.cmp(&b.id))
    }
}

/// Build the policy named in configuration
pub fn policy_for(kind: PolicyKind) -> Box<dyn OrderingPolicy> {
    match kind {
        PolicyKind::EpicBarrier => Box::new(EpicBarrierPolicy),
        PolicyKind::PriorityFirst => Box::new(PriorityFirstPolicy),
    }
}
