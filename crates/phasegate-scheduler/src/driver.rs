//! Dispatch driver
//!
//! Pull-based loop: snapshot the store, pick the head candidate, hand its
//! action to a [`PhaseExecutor`], route the outcome through the state table
//! and persist the new state. Nothing is cached between steps.
//!
//! Claims: when an actionable state's default successor is in-flight, that
//! in-flight state is written before the executor runs, so a concurrent pass
//! never dispatches the same phase twice. The outcome is applied to the
//! claimed state. Review states are evaluated in place.
//!
//! A dispatch that errors hands the task back to the state it was picked in
//! (a claim is released, a failed rework returns to its review). Only a
//! failure with no failure route keeps the task where it is.

use async_trait::async_trait;
use futures::future::join_all;
use phasegate_core::fail_open::fail_open;
use phasegate_core::{
    Action, CycleCheck, DispatchMode, PhaseGateConfig, PhaseGateError, PhaseOutcome, Result,
    Task, TaskId, WorkflowState,
};
use phasegate_store::TaskStore;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::audit::{TransitionKind, TransitionLog, TransitionRecord};
use crate::context::needs_fresh_context;
use crate::diagnostics::check_cycles;
use crate::scheduler::Scheduler;
use crate::state_table::{StateCategory, StateTable};

/// Work handed to the executor
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    /// Task record as seen when the phase was selected
    pub task: Task,
    pub action: Action,
    /// Start the phase with no carried-over history
    pub fresh_context: bool,
    /// Phase re-run after a review rejected the previous attempt
    pub rework: bool,
}

/// What the executor reports back for one phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseReport {
    pub outcome: PhaseOutcome,
    /// Free-form detail, surfaced when a failure cannot be routed
    pub detail: Option<String>,
}

impl PhaseReport {
    pub fn new(outcome: PhaseOutcome) -> Self {
        Self {
            outcome,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl From<PhaseOutcome> for PhaseReport {
    fn from(outcome: PhaseOutcome) -> Self {
        Self::new(outcome)
    }
}

/// Runs one phase for one task.
///
/// `Err` means the phase could not be run at all (spawn failure, missing
/// command); a phase that ran and failed reports `PhaseOutcome::Failed`.
#[async_trait]
pub trait PhaseExecutor: Send + Sync {
    async fn execute(&self, request: &DispatchRequest) -> Result<PhaseReport>;
}

#[async_trait]
impl<F> PhaseExecutor for F
where
    F: Fn(&DispatchRequest) -> Result<PhaseReport> + Send + Sync,
{
    async fn execute(&self, request: &DispatchRequest) -> Result<PhaseReport> {
        self(request)
    }
}

/// Driving loop limits
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Stop after this many dispatches (0 = unlimited)
    pub max_dispatches: usize,
    pub mode: DispatchMode,
    pub cycle_check: CycleCheck,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self::from_config(&PhaseGateConfig::default())
    }
}

impl DriverConfig {
    pub fn from_config(config: &PhaseGateConfig) -> Self {
        Self {
            max_dispatches: config.driver.max_dispatches,
            mode: config.driver.mode,
            cycle_check: config.scheduler.cycle_check,
        }
    }
}

/// One executed phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchResult {
    pub task_id: TaskId,
    pub action: Action,
    /// State the phase was selected in
    pub from: WorkflowState,
    /// State persisted after the outcome
    pub to: WorkflowState,
    pub outcome: PhaseOutcome,
    pub rework: bool,
}

/// Result of one driver step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Phases executed this step, including any rework dispatch
    Dispatched(Vec<DispatchResult>),
    /// Nothing dispatchable
    Idle,
}

/// Why a run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopReason {
    Idle,
    MaxDispatches,
}

/// Summary of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub dispatches: Vec<DispatchResult>,
    pub stop_reason: StopReason,
}

/// Pulls work from a [`TaskStore`] and drives it through a [`PhaseExecutor`]
pub struct Driver<S: TaskStore, E: PhaseExecutor> {
    store: S,
    executor: E,
    scheduler: Scheduler,
    config: DriverConfig,
    audit: Option<TransitionLog>,
}

impl<S: TaskStore, E: PhaseExecutor> Driver<S, E> {
    /// Create a driver, refusing to start if the state table is inconsistent
    pub fn new(store: S, executor: E, scheduler: Scheduler, config: DriverConfig) -> Result<Self> {
        scheduler.table().validate()?;
        Ok(Self {
            store,
            executor,
            scheduler,
            config,
            audit: None,
        })
    }

    /// Record every transition to a JSON-lines audit file
    pub fn with_audit_log(mut self, log: TransitionLog) -> Self {
        self.audit = Some(log);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Dispatch the head candidate, plus rework if a rejection handed the
    /// task back to an in-flight phase
    #[instrument(skip(self))]
    pub async fn step(&self) -> Result<StepOutcome> {
        let snapshot = self.store.snapshot().await?;
        let Some(candidate) = self.scheduler.next_dispatch(&snapshot) else {
            debug!("No dispatchable task");
            return Ok(StepOutcome::Idle);
        };

        let results = self
            .dispatch(candidate.task.clone(), candidate.action, candidate.fresh_context)
            .await?;
        Ok(StepOutcome::Dispatched(results))
    }

    /// Dispatch every candidate of the head epic concurrently.
    ///
    /// Each member is re-validated against a fresh snapshot right before its
    /// claim; a member that stopped being dispatchable is skipped.
    #[instrument(skip(self))]
    pub async fn step_epic_batch(&self) -> Result<StepOutcome> {
        let snapshot = self.store.snapshot().await?;
        let batch: Vec<TaskId> = self
            .scheduler
            .epic_batch(&snapshot)
            .iter()
            .map(|c| c.task.id.clone())
            .collect();
        if batch.is_empty() {
            debug!("No dispatchable task");
            return Ok(StepOutcome::Idle);
        }
        info!(size = batch.len(), "Dispatching epic batch");

        let outcomes = join_all(batch.iter().map(|id| self.dispatch_revalidated(id))).await;

        let mut results = Vec::new();
        let mut first_error = None;
        for (id, outcome) in batch.iter().zip(outcomes) {
            match outcome {
                Ok(dispatched) => results.extend(dispatched),
                Err(e) => {
                    warn!(task_id = %id, error = %e, "Batch member failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        if results.is_empty() {
            return Ok(StepOutcome::Idle);
        }
        Ok(StepOutcome::Dispatched(results))
    }

    /// Step until nothing is dispatchable or the dispatch limit is reached.
    ///
    /// Halts with `PhaseFailed` when a failure has no failure route.
    #[instrument(skip(self), fields(mode = ?self.config.mode, max = self.config.max_dispatches))]
    pub async fn run(&self) -> Result<RunReport> {
        let snapshot = self.store.snapshot().await?;
        check_cycles(&snapshot, self.config.cycle_check)?;
        drop(snapshot);

        let mut dispatches = Vec::new();
        let stop_reason = loop {
            if self.config.max_dispatches > 0 && dispatches.len() >= self.config.max_dispatches {
                info!(dispatches = dispatches.len(), "Dispatch limit reached");
                break StopReason::MaxDispatches;
            }

            let outcome = match self.config.mode {
                DispatchMode::Single => self.step().await?,
                DispatchMode::EpicBatch => self.step_epic_batch().await?,
            };
            match outcome {
                StepOutcome::Dispatched(results) => dispatches.extend(results),
                StepOutcome::Idle => break StopReason::Idle,
            }
        };

        info!(dispatches = dispatches.len(), stop = ?stop_reason, "Run finished");
        Ok(RunReport {
            dispatches,
            stop_reason,
        })
    }

    async fn dispatch_revalidated(&self, task_id: &str) -> Result<Vec<DispatchResult>> {
        let snapshot = self.store.snapshot().await?;
        let candidate = self
            .scheduler
            .candidates(&snapshot)
            .into_iter()
            .find(|c| c.task.id == task_id);

        match candidate {
            Some(c) => {
                self.dispatch(c.task.clone(), c.action, c.fresh_context)
                    .await
            }
            None => {
                debug!(task_id, "No longer dispatchable, skipping");
                Ok(Vec::new())
            }
        }
    }

    async fn dispatch(
        &self,
        task: Task,
        action: Action,
        fresh_context: bool,
    ) -> Result<Vec<DispatchResult>> {
        let table = self.scheduler.table();
        let first = self.execute_phase(&task, action, fresh_context, false).await?;

        let reviewed = first.from;
        let landed = first.to;
        let rejected = first.outcome == PhaseOutcome::Rejected;
        let mut results = vec![first];

        // A rejection that lands in an in-flight state hands the phase straight
        // back to its owner; nothing else would ever dispatch it.
        if rejected && table.category(landed) == StateCategory::InFlight {
            if let Some(rework_action) = table.claiming_action(landed) {
                info!(
                    task_id = %task.id,
                    state = %landed,
                    action = %rework_action,
                    "Dispatching rework"
                );
                let mut reworked = task;
                reworked.workflow_state = landed;
                let rework = match self
                    .execute_phase(&reworked, rework_action, needs_fresh_context(landed), true)
                    .await
                {
                    Ok(rework) => rework,
                    Err(e) => {
                        // back to the review, which hands the rework out again
                        if releases_claim(&e) {
                            self.release(&reworked, landed, reviewed, rework_action)
                                .await?;
                        }
                        return Err(e);
                    }
                };
                results.push(rework);
            }
        }

        Ok(results)
    }

    async fn execute_phase(
        &self,
        task: &Task,
        action: Action,
        fresh_context: bool,
        rework: bool,
    ) -> Result<DispatchResult> {
        let table = self.scheduler.table();
        let from = task.workflow_state;

        let evaluated = match table.claim(from) {
            Some(claimed) => {
                let record = TransitionRecord::new(
                    &task.id,
                    &task.epic,
                    TransitionKind::Claim,
                    from,
                    claimed,
                )
                .with_action(action)
                .with_rework(rework);
                self.persist(record).await?;
                claimed
            }
            None => from,
        };

        info!(
            task_id = %task.id,
            action = %action,
            state = %evaluated,
            fresh_context,
            rework,
            "Dispatching phase"
        );
        let request = DispatchRequest {
            task: task.clone(),
            action,
            fresh_context,
            rework,
        };

        let report = match self.executor.execute(&request).await {
            Ok(report) => report,
            Err(e) => {
                self.release(task, evaluated, from, action).await?;
                return Err(e);
            }
        };

        let to = match route_outcome(table, task, evaluated, &report) {
            Ok(to) => to,
            Err(e) => {
                if releases_claim(&e) {
                    self.release(task, evaluated, from, action).await?;
                }
                return Err(e);
            }
        };
        let record = TransitionRecord::new(
            &task.id,
            &task.epic,
            TransitionKind::Outcome,
            evaluated,
            to,
        )
        .with_action(action)
        .with_outcome(report.outcome)
        .with_rework(rework);
        self.persist(record).await?;

        info!(
            task_id = %task.id,
            from = %evaluated,
            to = %to,
            outcome = %report.outcome,
            "Phase outcome applied"
        );
        Ok(DispatchResult {
            task_id: task.id.clone(),
            action,
            from,
            to,
            outcome: report.outcome,
            rework,
        })
    }

    /// Put a task held in `held` back into `back_to` so it can be dispatched again
    async fn release(
        &self,
        task: &Task,
        held: WorkflowState,
        back_to: WorkflowState,
        action: Action,
    ) -> Result<()> {
        if held == back_to {
            return Ok(());
        }
        warn!(task_id = %task.id, from = %held, to = %back_to, "Releasing task");
        let record =
            TransitionRecord::new(&task.id, &task.epic, TransitionKind::Release, held, back_to)
                .with_action(action);
        self.persist(record).await
    }

    async fn persist(&self, record: TransitionRecord) -> Result<()> {
        persist_transition(&self.store, self.audit.as_ref(), record).await
    }
}

/// Unrouted failures keep the task where it is for manual handling; every
/// other dispatch error hands the task back.
fn releases_claim(err: &PhaseGateError) -> bool {
    !matches!(err, PhaseGateError::PhaseFailed { .. })
}

/// Apply an outcome reported out-of-band, e.g. a pull request merged by hand.
///
/// The outcome is routed from the task's current state. Returns the state
/// before and after.
pub async fn advance<S: TaskStore + ?Sized>(
    store: &S,
    audit: Option<&TransitionLog>,
    task_id: &str,
    outcome: PhaseOutcome,
) -> Result<(WorkflowState, WorkflowState)> {
    let snapshot = store.snapshot().await?;
    let task = snapshot
        .get(task_id)
        .ok_or_else(|| PhaseGateError::TaskNotFound(task_id.to_string()))?;
    let table = StateTable::new();
    let from = task.workflow_state;

    let report = PhaseReport::new(outcome).with_detail("reported manually");
    let to = route_outcome(&table, task, from, &report)?;

    let record = TransitionRecord::new(&task.id, &task.epic, TransitionKind::Manual, from, to)
        .with_outcome(outcome);
    persist_transition(store, audit, record).await?;

    info!(task_id, from = %from, to = %to, outcome = %outcome, "Outcome applied manually");
    Ok((from, to))
}

fn route_outcome(
    table: &StateTable,
    task: &Task,
    state: WorkflowState,
    report: &PhaseReport,
) -> Result<WorkflowState> {
    match table.apply(state, report.outcome) {
        Ok(to) => Ok(to),
        Err(PhaseGateError::NoFailurePath(state)) => Err(PhaseGateError::PhaseFailed {
            task_id: task.id.clone(),
            state,
            reason: report
                .detail
                .clone()
                .unwrap_or_else(|| "phase reported failure".to_string()),
        }),
        Err(e) => Err(e),
    }
}

async fn persist_transition<S: TaskStore + ?Sized>(
    store: &S,
    audit: Option<&TransitionLog>,
    record: TransitionRecord,
) -> Result<()> {
    store.write_state(&record.task_id, record.to).await?;
    debug!(task_id = %record.task_id, from = %record.from, to = %record.to, "State persisted");

    if let Some(log) = audit {
        fail_open("audit::append", log.append(&record)).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use phasegate_store::MemoryTaskStore;
    use std::sync::Mutex;

    fn store_with(tasks: Vec<Task>) -> MemoryTaskStore {
        MemoryTaskStore::new(vec!["e1".to_string()], tasks).unwrap()
    }

    fn accept_all(_: &DispatchRequest) -> Result<PhaseReport> {
        Ok(PhaseOutcome::Accepted.into())
    }

    #[tokio::test]
    async fn test_step_claims_and_applies_outcome() {
        let driver = Driver::new(
            store_with(vec![Task::new("t1", "e1")]),
            accept_all,
            Scheduler::default(),
            DriverConfig::default(),
        )
        .unwrap();

        let outcome = driver.step().await.unwrap();
        assert_eq!(
            outcome,
            StepOutcome::Dispatched(vec![DispatchResult {
                task_id: "t1".to_string(),
                action: Action::Analyze,
                from: WorkflowState::Backlog,
                to: WorkflowState::UxReview,
                outcome: PhaseOutcome::Accepted,
                rework: false,
            }])
        );
        assert_eq!(
            driver.store().state_of("t1").await,
            Some(WorkflowState::UxReview)
        );
    }

    #[tokio::test]
    async fn test_executor_receives_selected_state() {
        let seen = Mutex::new(Vec::new());
        let executor = |req: &DispatchRequest| -> Result<PhaseReport> {
            seen.lock().unwrap().push((req.task.workflow_state, req.action));
            Ok(PhaseReport::new(PhaseOutcome::Accepted))
        };
        let driver = Driver::new(
            store_with(vec![Task::new("t1", "e1").with_state(WorkflowState::TestsReady)]),
            executor,
            Scheduler::default(),
            DriverConfig::default(),
        )
        .unwrap();

        driver.step().await.unwrap();
        drop(driver);
        assert_eq!(
            seen.into_inner().unwrap(),
            vec![(WorkflowState::TestsReady, Action::Implement)]
        );
    }

    #[tokio::test]
    async fn test_executor_error_releases_claim() {
        let executor = |_: &DispatchRequest| -> Result<PhaseReport> {
            Err(PhaseGateError::Executor("no command".to_string()))
        };
        let driver = Driver::new(
            store_with(vec![Task::new("t1", "e1")]),
            executor,
            Scheduler::default(),
            DriverConfig::default(),
        )
        .unwrap();

        assert!(matches!(
            driver.step().await,
            Err(PhaseGateError::Executor(_))
        ));
        assert_eq!(
            driver.store().state_of("t1").await,
            Some(WorkflowState::Backlog)
        );
    }

    #[tokio::test]
    async fn test_idle_when_only_in_flight_tasks() {
        let driver = Driver::new(
            store_with(vec![Task::new("t1", "e1").with_state(WorkflowState::PrOpen)]),
            accept_all,
            Scheduler::default(),
            DriverConfig::default(),
        )
        .unwrap();

        assert_eq!(driver.step().await.unwrap(), StepOutcome::Idle);
    }

    #[tokio::test]
    async fn test_advance_manual_outcome() {
        let store = store_with(vec![Task::new("t1", "e1").with_state(WorkflowState::PrOpen)]);

        let (from, to) = advance(&store, None, "t1", PhaseOutcome::Accepted)
            .await
            .unwrap();
        assert_eq!((from, to), (WorkflowState::PrOpen, WorkflowState::Done));
        assert_eq!(store.state_of("t1").await, Some(WorkflowState::Done));

        assert!(matches!(
            advance(&store, None, "t1", PhaseOutcome::Accepted).await,
            Err(PhaseGateError::OutcomeOnTerminal(WorkflowState::Done))
        ));
    }

    #[tokio::test]
    async fn test_advance_unrouted_failure() {
        let store = store_with(vec![Task::new("t1", "e1").with_state(WorkflowState::CodeReview)]);

        let err = advance(&store, None, "t1", PhaseOutcome::Failed)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PhaseGateError::PhaseFailed { ref task_id, state: WorkflowState::CodeReview, .. }
                if task_id == "t1"
        ));
        assert_eq!(store.state_of("t1").await, Some(WorkflowState::CodeReview));
    }
}
