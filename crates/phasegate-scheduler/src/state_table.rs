//! Phase pipeline state table
//!
//! Pure lookups over [`WorkflowState`] with NO I/O. Every mapping is an
//! exhaustive `match`, so adding a state without routing it fails to compile;
//! [`StateTable::validate`] checks the cross-table invariants at startup.

use phasegate_core::{Action, PhaseGateError, PhaseOutcome, Result, WorkflowState};
use serde::Serialize;

/// Coarse behaviour of a state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StateCategory {
    /// Waits for an external action to be dispatched
    Actionable,
    /// Phase runs externally; blocks duplicate dispatch until an outcome arrives
    InFlight,
    /// No outgoing transition
    Terminal,
}

impl std::fmt::Display for StateCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Actionable => write!(f, "actionable"),
            Self::InFlight => write!(f, "in-flight"),
            Self::Terminal => write!(f, "terminal"),
        }
    }
}

/// The static phase routing table
#[derive(Debug, Clone, Copy, Default)]
pub struct StateTable;

impl StateTable {
    pub fn new() -> Self {
        Self
    }

    pub fn category(&self, state: WorkflowState) -> StateCategory {
        use WorkflowState::*;
        match state {
            Backlog | UxReview | PlanReview | TestsPending | TestsNeedRevision | TestsReady
            | UiReview | CodeReview | QaReview | IntegrationVerification | DocsPending
            | ReleasePending => StateCategory::Actionable,
            AnalysisInProgress | TestsInProgress | ImplementationInProgress | DocsInProgress
            | PrInProgress | PrOpen => StateCategory::InFlight,
            Done | IntegrationFailed | PrFailed => StateCategory::Terminal,
        }
    }

    /// Action key the executor must run for this state, if any
    pub fn required_action(&self, state: WorkflowState) -> Option<Action> {
        use WorkflowState::*;
        match state {
            Backlog => Some(Action::Analyze),
            UxReview => Some(Action::ReviewUx),
            PlanReview => Some(Action::ReviewPlan),
            TestsPending | TestsNeedRevision => Some(Action::WriteTests),
            TestsReady => Some(Action::Implement),
            UiReview => Some(Action::ReviewUi),
            CodeReview => Some(Action::ReviewCode),
            QaReview => Some(Action::Qa),
            IntegrationVerification => Some(Action::IntegrationVerify),
            DocsPending => Some(Action::UpdateDocs),
            ReleasePending => Some(Action::CommitAndPr),
            AnalysisInProgress | TestsInProgress | ImplementationInProgress | DocsInProgress
            | PrInProgress | PrOpen | Done | IntegrationFailed | PrFailed => None,
        }
    }

    /// Forward successor on acceptance
    pub fn default_successor(&self, state: WorkflowState) -> Option<WorkflowState> {
        use WorkflowState::*;
        match state {
            Backlog => Some(AnalysisInProgress),
            AnalysisInProgress => Some(UxReview),
            UxReview => Some(PlanReview),
            PlanReview => Some(TestsPending),
            TestsPending => Some(TestsInProgress),
            TestsInProgress => Some(TestsReady),
            TestsNeedRevision => Some(TestsReady),
            TestsReady => Some(ImplementationInProgress),
            ImplementationInProgress => Some(UiReview),
            UiReview => Some(CodeReview),
            CodeReview => Some(QaReview),
            QaReview => Some(IntegrationVerification),
            IntegrationVerification => Some(DocsPending),
            DocsPending => Some(DocsInProgress),
            DocsInProgress => Some(ReleasePending),
            ReleasePending => Some(PrInProgress),
            PrInProgress => Some(PrOpen),
            PrOpen => Some(Done),
            Done | IntegrationFailed | PrFailed => None,
        }
    }

    /// Successor on rejection; defined for the six review states only
    pub fn rejection_successor(&self, state: WorkflowState) -> Option<WorkflowState> {
        use WorkflowState::*;
        match state {
            UxReview | PlanReview => Some(AnalysisInProgress),
            UiReview | CodeReview | QaReview => Some(ImplementationInProgress),
            IntegrationVerification => Some(IntegrationFailed),
            _ => None,
        }
    }

    /// Failure terminal for phases that have one
    pub fn failure_successor(&self, state: WorkflowState) -> Option<WorkflowState> {
        use WorkflowState::*;
        match state {
            IntegrationVerification => Some(IntegrationFailed),
            ReleasePending | PrInProgress | PrOpen => Some(PrFailed),
            _ => None,
        }
    }

    /// Successor when the implementation phase reports the tests as defective
    pub fn revision_successor(&self, state: WorkflowState) -> Option<WorkflowState> {
        match state {
            WorkflowState::ImplementationInProgress => Some(WorkflowState::TestsNeedRevision),
            _ => None,
        }
    }

    /// Next state for a plain accept/reject decision.
    ///
    /// `Ok(None)` means the state is terminal. Asking for a rejection on a state
    /// without a rejection path is a configuration error, never a fallback to
    /// the default successor.
    pub fn next_state(
        &self,
        state: WorkflowState,
        rejected: bool,
    ) -> Result<Option<WorkflowState>> {
        if state.is_terminal() {
            return Ok(None);
        }
        if rejected {
            return self
                .rejection_successor(state)
                .map(Some)
                .ok_or(PhaseGateError::NoRejectionPath(state));
        }
        Ok(self.default_successor(state))
    }

    /// Route a phase outcome reported for `state`.
    ///
    /// A failure without a failure route comes back as `NoFailurePath`; the
    /// caller surfaces it with the task id attached.
    pub fn apply(&self, state: WorkflowState, outcome: PhaseOutcome) -> Result<WorkflowState> {
        if state.is_terminal() {
            return Err(PhaseGateError::OutcomeOnTerminal(state));
        }
        match outcome {
            PhaseOutcome::Accepted => self
                .default_successor(state)
                .ok_or(PhaseGateError::OutcomeOnTerminal(state)),
            PhaseOutcome::Rejected => self
                .rejection_successor(state)
                .ok_or(PhaseGateError::NoRejectionPath(state)),
            PhaseOutcome::TestsDefective => self
                .revision_successor(state)
                .ok_or(PhaseGateError::NoRevisionPath(state)),
            PhaseOutcome::Failed => self
                .failure_successor(state)
                .ok_or(PhaseGateError::NoFailurePath(state)),
        }
    }

    /// In-flight state to persist when dispatching from `state`.
    ///
    /// Non-review actionable states whose default successor is in-flight claim
    /// that successor at dispatch time; the outcome is then applied to it.
    /// Review states and `tests-need-revision` evaluate in place.
    pub fn claim(&self, state: WorkflowState) -> Option<WorkflowState> {
        if self.category(state) != StateCategory::Actionable || state.is_review() {
            return None;
        }
        self.default_successor(state)
            .filter(|next| self.category(*next) == StateCategory::InFlight)
    }

    /// Action whose dispatch claims `in_flight`, used to hand rework back to
    /// the phase owner after a rejection lands in an in-flight state
    pub fn claiming_action(&self, in_flight: WorkflowState) -> Option<Action> {
        WorkflowState::ALL
            .iter()
            .copied()
            .find(|state| self.claim(*state) == Some(in_flight))
            .and_then(|state| self.required_action(state))
    }

    /// Canonical path from the initial state following default successors
    pub fn happy_path(&self) -> Vec<WorkflowState> {
        let mut path = vec![WorkflowState::INITIAL];
        let mut current = WorkflowState::INITIAL;
        while let Some(next) = self.default_successor(current) {
            if path.contains(&next) || path.len() > WorkflowState::ALL.len() {
                break;
            }
            path.push(next);
            current = next;
        }
        path
    }

    /// Startup self-check of the cross-table invariants
    pub fn validate(&self) -> Result<()> {
        for state in WorkflowState::ALL {
            let category = self.category(state);
            let default = self.default_successor(state);
            let rejection = self.rejection_successor(state);
            let action = self.required_action(state);

            if (category == StateCategory::Terminal) != state.is_terminal() {
                return Err(invalid(format!("{} category disagrees with terminal flag", state)));
            }

            if state.is_terminal() {
                if default.is_some()
                    || rejection.is_some()
                    || self.failure_successor(state).is_some()
                    || self.revision_successor(state).is_some()
                {
                    return Err(invalid(format!("terminal state {} has a successor", state)));
                }
            } else if default.is_none() {
                return Err(invalid(format!("{} has no default successor", state)));
            }

            if state.is_review() != rejection.is_some() {
                return Err(invalid(format!(
                    "{} rejection path does not match its review flag",
                    state
                )));
            }
            if rejection.is_some() && rejection == default {
                return Err(invalid(format!(
                    "{} rejection successor equals its default",
                    state
                )));
            }

            if (category == StateCategory::Actionable) != action.is_some() {
                return Err(invalid(format!(
                    "{} is {} but action is {:?}",
                    state, category, action
                )));
            }

            if category == StateCategory::InFlight {
                let reachable = WorkflowState::ALL.iter().any(|s| {
                    self.claim(*s) == Some(state) || self.default_successor(*s) == Some(state)
                });
                if !reachable {
                    return Err(invalid(format!("in-flight state {} is unreachable", state)));
                }
            }
        }

        let path = self.happy_path();
        if path.last() != Some(&WorkflowState::Done) {
            return Err(invalid("done is not reachable from the initial state".to_string()));
        }

        Ok(())
    }
}

fn invalid(message: String) -> PhaseGateError {
    PhaseGateError::InvalidStateTable(message)
}
