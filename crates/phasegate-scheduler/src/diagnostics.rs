//! Scheduling diagnostics
//!
//! Answers "why is this task not moving?" and reports dependency problems the
//! scheduling path deliberately ignores (a cycle just starves its members).

use phasegate_core::{CycleCheck, PhaseGateError, Result, TaskId, TaskSnapshot};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

use crate::dependency::{can_start, unmet_dependencies};
use crate::policy::{OrderingPolicy, SchedulingContext};
use crate::state_table::{StateCategory, StateTable};

/// Why a task is absent from the ready set
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum Exclusion {
    /// Already in terminal success
    Completed,
    /// Manual hold set
    Breakpoint,
    /// Predecessors not yet done
    UnmetDependencies { pending: Vec<TaskId> },
    /// An earlier epic is still incomplete
    EpicBarrier { blocking_epic: String },
}

/// Scheduling status of one task
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum Eligibility {
    /// Would be handed to the executor
    Dispatchable,
    /// Phase is running externally
    AwaitingOutcome,
    /// Stuck in a failure terminal
    NeedsAttention,
    Excluded(Exclusion),
}

impl std::fmt::Display for Eligibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dispatchable => write!(f, "dispatchable"),
            Self::AwaitingOutcome => write!(f, "awaiting outcome of an in-flight phase"),
            Self::NeedsAttention => write!(f, "in a failure terminal, needs manual attention"),
            Self::Excluded(Exclusion::Completed) => write!(f, "excluded: already done"),
            Self::Excluded(Exclusion::Breakpoint) => write!(f, "excluded: breakpoint set"),
            Self::Excluded(Exclusion::UnmetDependencies { pending }) => {
                write!(f, "excluded: waiting on {}", pending.join(", "))
            }
            Self::Excluded(Exclusion::EpicBarrier { blocking_epic }) => {
                write!(f, "excluded: epic {} is not complete", blocking_epic)
            }
        }
    }
}

/// Explain the scheduling status of one task.
///
/// Exclusions are checked in a fixed order (completed, breakpoint,
/// dependencies, epic barrier) so every excluded task gets exactly one reason.
pub fn explain(
    snapshot: &TaskSnapshot,
    policy: &dyn OrderingPolicy,
    task_id: &str,
) -> Result<Eligibility> {
    let task = snapshot
        .get(task_id)
        .ok_or_else(|| PhaseGateError::TaskNotFound(task_id.to_string()))?;
    let ctx = SchedulingContext::new(snapshot);

    if task.is_done() {
        return Ok(Eligibility::Excluded(Exclusion::Completed));
    }
    if task.breakpoint {
        return Ok(Eligibility::Excluded(Exclusion::Breakpoint));
    }
    if !can_start(task, &ctx.completed) {
        return Ok(Eligibility::Excluded(Exclusion::UnmetDependencies {
            pending: unmet_dependencies(task, &ctx.completed),
        }));
    }
    if !policy.admits(task, &ctx) {
        let blocking_epic = ctx.head_epic.unwrap_or_default().to_string();
        return Ok(Eligibility::Excluded(Exclusion::EpicBarrier { blocking_epic }));
    }

    Ok(match StateTable::new().category(task.workflow_state) {
        StateCategory::Actionable => Eligibility::Dispatchable,
        StateCategory::InFlight => Eligibility::AwaitingOutcome,
        StateCategory::Terminal => Eligibility::NeedsAttention,
    })
}

/// Dependency cycles, each listed as a closed path (`a -> b -> a`).
///
/// Self-dependencies show up as `[a, a]`. Dependencies naming unknown tasks
/// are ignored here; see [`dangling_dependencies`].
pub fn find_cycles(snapshot: &TaskSnapshot) -> Vec<Vec<TaskId>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Visited,
    }

    fn dependencies<'a>(
        snapshot: &'a TaskSnapshot,
        id: &str,
    ) -> impl Iterator<Item = &'a TaskId> + 'a {
        snapshot
            .get(id)
            .into_iter()
            .flat_map(|task| task.depends_on.iter())
    }

    let mut ids: Vec<&str> = snapshot.tasks().iter().map(|t| t.id.as_str()).collect();
    ids.sort_unstable();

    let mut marks: HashMap<&str, Mark> = HashMap::new();
    let mut cycles = Vec::new();

    // Explicit stack: `path` is the current DFS path, `frames` holds the
    // unvisited dependencies of each task on it.
    for root in ids {
        if marks.contains_key(root) {
            continue;
        }
        marks.insert(root, Mark::Visiting);
        let mut path = vec![root];
        let mut frames = vec![dependencies(snapshot, root)];

        while let Some(frame) = frames.last_mut() {
            let Some(dep) = frame.next() else {
                frames.pop();
                if let Some(finished) = path.pop() {
                    marks.insert(finished, Mark::Visited);
                }
                continue;
            };

            let dep = dep.as_str();
            if !snapshot.contains(dep) {
                continue;
            }
            match marks.get(dep).copied() {
                Some(Mark::Visiting) => {
                    if let Some(start) = path.iter().position(|s| *s == dep) {
                        let mut cycle: Vec<TaskId> =
                            path[start..].iter().map(|s| s.to_string()).collect();
                        cycle.push(dep.to_string());
                        cycles.push(cycle);
                    }
                }
                Some(Mark::Visited) => {}
                None => {
                    marks.insert(dep, Mark::Visiting);
                    path.push(dep);
                    frames.push(dependencies(snapshot, dep));
                }
            }
        }
    }
    cycles
}

/// A dependency naming a task that does not exist
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DanglingDependency {
    pub task_id: TaskId,
    pub missing: TaskId,
}

/// Dependencies that can never be satisfied because no such task exists
pub fn dangling_dependencies(snapshot: &TaskSnapshot) -> Vec<DanglingDependency> {
    let mut dangling = Vec::new();
    for task in snapshot.tasks() {
        for dep in &task.depends_on {
            if !snapshot.contains(dep) {
                dangling.push(DanglingDependency {
                    task_id: task.id.clone(),
                    missing: dep.clone(),
                });
            }
        }
    }
    dangling.sort_by(|a, b| a.task_id.cmp(&b.task_id).then(a.missing.cmp(&b.missing)));
    dangling
}

/// Defined epics with no member tasks.
///
/// An empty epic is never complete, so under the epic barrier it holds back
/// every epic defined after it.
pub fn empty_epics(snapshot: &TaskSnapshot) -> Vec<String> {
    snapshot
        .epics()
        .iter()
        .filter(|epic| snapshot.epic_tasks(epic).next().is_none())
        .cloned()
        .collect()
}

/// Apply the configured cycle policy before a run
pub fn check_cycles(snapshot: &TaskSnapshot, mode: CycleCheck) -> Result<Vec<Vec<TaskId>>> {
    if mode == CycleCheck::Ignore {
        return Ok(Vec::new());
    }

    let cycles = find_cycles(snapshot);
    if let Some(first) = cycles.first() {
        if mode == CycleCheck::Error {
            return Err(PhaseGateError::DependencyCycle(first.clone()));
        }
        for cycle in &cycles {
            warn!(cycle = %cycle.join(" -> "), "Dependency cycle starves its tasks");
        }
    }
    Ok(cycles)
}

/// Summary of every check, as printed by `phasegate check`
#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthReport {
    pub cycles: Vec<Vec<TaskId>>,
    pub dangling: Vec<DanglingDependency>,
    pub empty_epics: Vec<String>,
    /// Blocked task to its failed predecessors (failure terminal states)
    pub blocked_by_failures: BTreeMap<TaskId, Vec<TaskId>>,
}

impl HealthReport {
    pub fn is_clean(&self) -> bool {
        self.cycles.is_empty()
            && self.dangling.is_empty()
            && self.empty_epics.is_empty()
            && self.blocked_by_failures.is_empty()
    }
}

/// Run every dependency and epic check over a snapshot
pub fn health_report(snapshot: &TaskSnapshot) -> HealthReport {
    let mut blocked_by_failures = BTreeMap::new();
    for task in snapshot.tasks() {
        let failed: Vec<TaskId> = task
            .depends_on
            .iter()
            .filter(|dep| {
                snapshot
                    .get(dep)
                    .map(|d| d.workflow_state.is_terminal() && !d.is_done())
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        if !failed.is_empty() {
            blocked_by_failures.insert(task.id.clone(), failed);
        }
    }

    HealthReport {
        cycles: find_cycles(snapshot),
        dangling: dangling_dependencies(snapshot),
        empty_epics: empty_epics(snapshot),
        blocked_by_failures,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{EpicBarrierPolicy, PriorityFirstPolicy};
    use phasegate_core::{Task, WorkflowState};

    fn snapshot(epics: &[&str], tasks: Vec<Task>) -> TaskSnapshot {
        TaskSnapshot::new(epics.iter().map(|e| e.to_string()).collect(), tasks).unwrap()
    }

    #[test]
    fn test_explain_each_exclusion() {
        let snap = snapshot(
            &["a", "b"],
            vec![
                Task::new("done", "a").with_state(WorkflowState::Done),
                Task::new("held", "a").with_breakpoint(true),
                Task::new("waiting", "a").with_dependency("held"),
                Task::new("later", "b"),
            ],
        );

        assert_eq!(
            explain(&snap, &EpicBarrierPolicy, "done").unwrap(),
            Eligibility::Excluded(Exclusion::Completed)
        );
        assert_eq!(
            explain(&snap, &EpicBarrierPolicy, "held").unwrap(),
            Eligibility::Excluded(Exclusion::Breakpoint)
        );
        assert_eq!(
            explain(&snap, &EpicBarrierPolicy, "waiting").unwrap(),
            Eligibility::Excluded(Exclusion::UnmetDependencies {
                pending: vec!["held".to_string()]
            })
        );
        assert_eq!(
            explain(&snap, &EpicBarrierPolicy, "later").unwrap(),
            Eligibility::Excluded(Exclusion::EpicBarrier {
                blocking_epic: "a".to_string()
            })
        );
        assert_eq!(
            explain(&snap, &PriorityFirstPolicy, "later").unwrap(),
            Eligibility::Dispatchable
        );
    }

    #[test]
    fn test_breakpoint_reported_before_dependencies() {
        let snap = snapshot(
            &["a"],
            vec![Task::new("t", "a")
                .with_breakpoint(true)
                .with_dependency("ghost")],
        );
        assert_eq!(
            explain(&snap, &EpicBarrierPolicy, "t").unwrap(),
            Eligibility::Excluded(Exclusion::Breakpoint)
        );
    }

    #[test]
    fn test_explain_ready_states() {
        let snap = snapshot(
            &["a"],
            vec![
                Task::new("flight", "a").with_state(WorkflowState::PrOpen),
                Task::new("broken", "a").with_state(WorkflowState::IntegrationFailed),
            ],
        );
        assert_eq!(
            explain(&snap, &EpicBarrierPolicy, "flight").unwrap(),
            Eligibility::AwaitingOutcome
        );
        assert_eq!(
            explain(&snap, &EpicBarrierPolicy, "broken").unwrap(),
            Eligibility::NeedsAttention
        );
        assert!(matches!(
            explain(&snap, &EpicBarrierPolicy, "nope"),
            Err(PhaseGateError::TaskNotFound(_))
        ));
    }

    #[test]
    fn test_find_cycles() {
        let snap = snapshot(
            &["a"],
            vec![
                Task::new("x", "a").with_dependency("y"),
                Task::new("y", "a").with_dependency("z"),
                Task::new("z", "a").with_dependency("x"),
                Task::new("self", "a").with_dependency("self"),
                Task::new("free", "a").with_dependency("x"),
            ],
        );

        let cycles = find_cycles(&snap);
        assert_eq!(cycles.len(), 2);
        assert!(cycles.contains(&vec!["self".to_string(), "self".to_string()]));
        assert!(cycles.contains(&vec![
            "x".to_string(),
            "y".to_string(),
            "z".to_string(),
            "x".to_string()
        ]));
    }

    #[test]
    fn test_acyclic_graph_has_no_cycles() {
        let snap = snapshot(
            &["a"],
            vec![
                Task::new("x", "a"),
                Task::new("y", "a").with_dependency("x"),
                Task::new("z", "a").with_dependency("x").with_dependency("y"),
            ],
        );
        assert!(find_cycles(&snap).is_empty());
    }

    #[test]
    fn test_long_dependency_chain() {
        const LEN: usize = 100_000;
        let id = |i: usize| format!("t{:06}", i);
        // each task waits on the next, so the scan from the first id walks the whole chain
        let chain = |closed: bool| {
            let tasks = (0..LEN)
                .map(|i| {
                    let task = Task::new(id(i), "a");
                    if i + 1 < LEN {
                        task.with_dependency(id(i + 1))
                    } else if closed {
                        task.with_dependency(id(0))
                    } else {
                        task
                    }
                })
                .collect();
            snapshot(&["a"], tasks)
        };

        assert!(find_cycles(&chain(false)).is_empty());

        let cycles = find_cycles(&chain(true));
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].len(), LEN + 1);
        assert_eq!(cycles[0].first(), cycles[0].last());
    }

    #[test]
    fn test_check_cycles_modes() {
        let snap = snapshot(&["a"], vec![Task::new("x", "a").with_dependency("x")]);

        assert!(check_cycles(&snap, CycleCheck::Ignore).unwrap().is_empty());
        assert_eq!(check_cycles(&snap, CycleCheck::Warn).unwrap().len(), 1);
        assert!(matches!(
            check_cycles(&snap, CycleCheck::Error),
            Err(PhaseGateError::DependencyCycle(_))
        ));
    }

    #[test]
    fn test_health_report() {
        let snap = snapshot(
            &["a", "empty"],
            vec![
                Task::new("x", "a").with_dependency("ghost"),
                Task::new("f", "a").with_state(WorkflowState::PrFailed),
                Task::new("y", "a").with_dependency("f"),
            ],
        );

        let report = health_report(&snap);
        assert!(!report.is_clean());
        assert_eq!(
            report.dangling,
            vec![DanglingDependency {
                task_id: "x".to_string(),
                missing: "ghost".to_string()
            }]
        );
        assert_eq!(report.empty_epics, vec!["empty".to_string()]);
        // keyed by the blocked task, not by the failed predecessor
        assert_eq!(report.blocked_by_failures.len(), 1);
        assert_eq!(report.blocked_by_failures["y"], vec!["f".to_string()]);
        assert!(report.cycles.is_empty());
    }
}
