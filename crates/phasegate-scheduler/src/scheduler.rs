//! Ready-set computation and dispatch selection
//!
//! Everything here is a pure function of one [`TaskSnapshot`]; nothing is
//! cached between calls.

use phasegate_core::{Action, SchedulerConfig, Task, TaskSnapshot};
use std::collections::HashSet;

use crate::context::needs_fresh_context;
use crate::dependency::{can_start, completed_ids};
use crate::policy::{policy_for, OrderingPolicy, SchedulingContext};
use crate::state_table::StateTable;

/// Tasks whose dependencies are met, without a breakpoint, not yet done.
///
/// Returned in snapshot order. In-flight and failed tasks are included; only
/// tasks whose state requires an action are ever dispatched.
pub fn ready_tasks(snapshot: &TaskSnapshot) -> Vec<&Task> {
    let completed = completed_ids(snapshot);
    snapshot
        .tasks()
        .iter()
        .filter(|task| is_ready(task, &completed))
        .collect()
}

pub(crate) fn is_ready(task: &Task, completed: &HashSet<&str>) -> bool {
    !task.breakpoint && can_start(task, completed)
}

/// A task the driver may hand to the executor now
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub task: &'a Task,
    pub action: Action,
    pub fresh_context: bool,
}

/// Composes the state table, dependency resolver, epic tracker and an
/// ordering policy into a dispatch order
pub struct Scheduler {
    table: StateTable,
    policy: Box<dyn OrderingPolicy>,
}

impl Scheduler {
    pub fn new(policy: Box<dyn OrderingPolicy>) -> Self {
        Self {
            table: StateTable::new(),
            policy,
        }
    }

    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(policy_for(config.policy))
    }

    pub fn table(&self) -> &StateTable {
        &self.table
    }

    pub fn policy(&self) -> &dyn OrderingPolicy {
        self.policy.as_ref()
    }

    /// Every ready task sorted by the policy, including tasks the policy
    /// currently defers
    pub fn order<'a>(&self, snapshot: &'a TaskSnapshot) -> Vec<&'a Task> {
        let ctx = SchedulingContext::new(snapshot);
        let mut ready: Vec<&Task> = snapshot
            .tasks()
            .iter()
            .filter(|task| is_ready(task, &ctx.completed))
            .collect();
        ready.sort_by(|a, b| self.policy.compare(a, b, &ctx));
        ready
    }

    /// Ordered tasks the policy admits now and whose state has a required action
    pub fn candidates<'a>(&self, snapshot: &'a TaskSnapshot) -> Vec<Candidate<'a>> {
        let ctx = SchedulingContext::new(snapshot);
        let mut ready: Vec<&Task> = snapshot
            .tasks()
            .iter()
            .filter(|task| is_ready(task, &ctx.completed) && self.policy.admits(task, &ctx))
            .collect();
        ready.sort_by(|a, b| self.policy.compare(a, b, &ctx));

        ready
            .into_iter()
            .filter_map(|task| {
                self.table
                    .required_action(task.workflow_state)
                    .map(|action| Candidate {
                        task,
                        action,
                        fresh_context: needs_fresh_context(task.workflow_state),
                    })
            })
            .collect()
    }

    /// Head of the candidate list
    pub fn next_dispatch<'a>(&self, snapshot: &'a TaskSnapshot) -> Option<Candidate<'a>> {
        self.candidates(snapshot).into_iter().next()
    }

    /// Every candidate sharing the head candidate's epic.
    ///
    /// Concurrency never crosses an epic boundary.
    pub fn epic_batch<'a>(&self, snapshot: &'a TaskSnapshot) -> Vec<Candidate<'a>> {
        let candidates = self.candidates(snapshot);
        let Some(epic) = candidates.first().map(|c| c.task.epic.clone()) else {
            return Vec::new();
        };
        candidates
            .into_iter()
            .filter(|c| c.task.epic == epic)
            .collect()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::from_config(&SchedulerConfig::default())
    }
}
