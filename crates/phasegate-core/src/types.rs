//! Core type definitions for phasegate scheduling

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::{PhaseGateError, Result};

/// Task identifier, unique across the whole task set
pub type TaskId = String;

/// Epic identifier
pub type EpicId = String;

/// Task priority levels, declared in severity order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical = 0,
    High = 1,
    #[default]
    Medium = 2,
    Low = 3,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Critical => write!(f, "critical"),
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "critical" | "0" => Ok(Self::Critical),
            "high" | "1" => Ok(Self::High),
            "medium" | "2" => Ok(Self::Medium),
            "low" | "3" => Ok(Self::Low),
            _ => Err(format!("Invalid priority: {}", s)),
        }
    }
}

/// Workflow state of a task.
///
/// This is a closed set: a record carrying any other value fails to parse and is
/// reported as a configuration error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkflowState {
    Backlog,
    AnalysisInProgress,
    UxReview,
    PlanReview,
    TestsPending,
    TestsInProgress,
    TestsNeedRevision,
    TestsReady,
    ImplementationInProgress,
    UiReview,
    CodeReview,
    QaReview,
    IntegrationVerification,
    DocsPending,
    DocsInProgress,
    ReleasePending,
    PrInProgress,
    PrOpen,
    Done,
    IntegrationFailed,
    PrFailed,
}

impl WorkflowState {
    /// Every state, in declaration order
    pub const ALL: [WorkflowState; 21] = [
        Self::Backlog,
        Self::AnalysisInProgress,
        Self::UxReview,
        Self::PlanReview,
        Self::TestsPending,
        Self::TestsInProgress,
        Self::TestsNeedRevision,
        Self::TestsReady,
        Self::ImplementationInProgress,
        Self::UiReview,
        Self::CodeReview,
        Self::QaReview,
        Self::IntegrationVerification,
        Self::DocsPending,
        Self::DocsInProgress,
        Self::ReleasePending,
        Self::PrInProgress,
        Self::PrOpen,
        Self::Done,
        Self::IntegrationFailed,
        Self::PrFailed,
    ];

    /// State every new task starts in
    pub const INITIAL: WorkflowState = Self::Backlog;

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backlog => "backlog",
            Self::AnalysisInProgress => "analysis-in-progress",
            Self::UxReview => "ux-review",
            Self::PlanReview => "plan-review",
            Self::TestsPending => "tests-pending",
            Self::TestsInProgress => "tests-in-progress",
            Self::TestsNeedRevision => "tests-need-revision",
            Self::TestsReady => "tests-ready",
            Self::ImplementationInProgress => "implementation-in-progress",
            Self::UiReview => "ui-review",
            Self::CodeReview => "code-review",
            Self::QaReview => "qa-review",
            Self::IntegrationVerification => "integration-verification",
            Self::DocsPending => "docs-pending",
            Self::DocsInProgress => "docs-in-progress",
            Self::ReleasePending => "release-pending",
            Self::PrInProgress => "pr-in-progress",
            Self::PrOpen => "pr-open",
            Self::Done => "done",
            Self::IntegrationFailed => "integration-failed",
            Self::PrFailed => "pr-failed",
        }
    }

    /// True only for the success terminal
    pub fn is_terminal_success(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// True for the three terminal states
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::IntegrationFailed | Self::PrFailed)
    }

    /// The six review-type states, the only ones that accept a rejection
    pub fn is_review(&self) -> bool {
        matches!(
            self,
            Self::UxReview
                | Self::PlanReview
                | Self::UiReview
                | Self::CodeReview
                | Self::QaReview
                | Self::IntegrationVerification
        )
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkflowState {
    type Err = PhaseGateError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        Self::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == normalized)
            .ok_or_else(|| PhaseGateError::UnknownState(s.to_string()))
    }
}

/// External action required to progress an actionable state
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    Analyze,
    ReviewUx,
    ReviewPlan,
    WriteTests,
    Implement,
    ReviewUi,
    ReviewCode,
    Qa,
    IntegrationVerify,
    UpdateDocs,
    CommitAndPr,
}

impl Action {
    pub const ALL: [Action; 11] = [
        Self::Analyze,
        Self::ReviewUx,
        Self::ReviewPlan,
        Self::WriteTests,
        Self::Implement,
        Self::ReviewUi,
        Self::ReviewCode,
        Self::Qa,
        Self::IntegrationVerify,
        Self::UpdateDocs,
        Self::CommitAndPr,
    ];

    /// Key handed to the executor
    pub fn key(&self) -> &'static str {
        match self {
            Self::Analyze => "analyze",
            Self::ReviewUx => "review-ux",
            Self::ReviewPlan => "review-plan",
            Self::WriteTests => "write-tests",
            Self::Implement => "implement",
            Self::ReviewUi => "review-ui",
            Self::ReviewCode => "review-code",
            Self::Qa => "qa",
            Self::IntegrationVerify => "integration-verify",
            Self::UpdateDocs => "update-docs",
            Self::CommitAndPr => "commit-and-pr",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

impl std::str::FromStr for Action {
    type Err = PhaseGateError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        Self::ALL
            .iter()
            .copied()
            .find(|action| action.key() == normalized)
            .ok_or_else(|| PhaseGateError::UnknownAction(s.to_string()))
    }
}

/// Terminal outcome reported by an executor for one phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PhaseOutcome {
    /// Advance via the default transition
    Accepted,
    /// Advance via the rejection transition (review states only)
    Rejected,
    /// The implementation phase judged the tests themselves defective
    TestsDefective,
    /// Unrecoverable failure of the phase
    Failed,
}

impl std::fmt::Display for PhaseOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accepted => write!(f, "accepted"),
            Self::Rejected => write!(f, "rejected"),
            Self::TestsDefective => write!(f, "tests-defective"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for PhaseOutcome {
    type Err = PhaseGateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "accepted" | "accept" | "success" => Ok(Self::Accepted),
            "rejected" | "reject" => Ok(Self::Rejected),
            "tests-defective" => Ok(Self::TestsDefective),
            "failed" | "fail" | "failure" => Ok(Self::Failed),
            _ => Err(PhaseGateError::UnknownOutcome(s.to_string())),
        }
    }
}

/// A unit of work moving through the phase pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    #[serde(default)]
    pub priority: Priority,
    pub workflow_state: WorkflowState,
    pub epic: EpicId,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub depends_on: BTreeSet<TaskId>,
    #[serde(default)]
    pub breakpoint: bool,
}

impl Task {
    pub fn new(id: impl Into<String>, epic: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            priority: Priority::default(),
            workflow_state: WorkflowState::INITIAL,
            epic: epic.into(),
            depends_on: BTreeSet::new(),
            breakpoint: false,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_state(mut self, state: WorkflowState) -> Self {
        self.workflow_state = state;
        self
    }

    pub fn with_dependency(mut self, id: impl Into<String>) -> Self {
        self.depends_on.insert(id.into());
        self
    }

    pub fn with_breakpoint(mut self, breakpoint: bool) -> Self {
        self.breakpoint = breakpoint;
        self
    }

    pub fn is_done(&self) -> bool {
        self.workflow_state.is_terminal_success()
    }
}

/// Read-only view of every task record plus the epic definition order.
///
/// Built fresh for each scheduling pass; nothing derived from it is cached.
#[derive(Debug, Clone, Default)]
pub struct TaskSnapshot {
    epics: Vec<EpicId>,
    tasks: Vec<Task>,
    index: HashMap<TaskId, usize>,
}

impl TaskSnapshot {
    /// Build a snapshot, rejecting duplicate ids and tasks whose epic is not defined
    pub fn new(epics: Vec<EpicId>, tasks: Vec<Task>) -> Result<Self> {
        let mut seen_epics = HashSet::new();
        for epic in &epics {
            if !seen_epics.insert(epic.as_str()) {
                return Err(PhaseGateError::DuplicateEpic(epic.clone()));
            }
        }

        let mut index = HashMap::with_capacity(tasks.len());
        for (pos, task) in tasks.iter().enumerate() {
            if !seen_epics.contains(task.epic.as_str()) {
                return Err(PhaseGateError::UnknownEpic {
                    task_id: task.id.clone(),
                    epic: task.epic.clone(),
                });
            }
            if index.insert(task.id.clone(), pos).is_some() {
                return Err(PhaseGateError::DuplicateTask(task.id.clone()));
            }
        }

        Ok(Self {
            epics,
            tasks,
            index,
        })
    }

    /// Epic ids in definition order
    pub fn epics(&self) -> &[EpicId] {
        &self.epics
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.index.get(id).map(|&pos| &self.tasks[pos])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Position of an epic in definition order
    pub fn epic_rank(&self, epic: &str) -> Option<usize> {
        self.epics.iter().position(|e| e == epic)
    }

    /// Members of one epic
    pub fn epic_tasks<'a>(&'a self, epic: &'a str) -> impl Iterator<Item = &'a Task> + 'a {
        self.tasks.iter().filter(move |t| t.epic == epic)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn into_parts(self) -> (Vec<EpicId>, Vec<Task>) {
        (self.epics, self.tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Critical < Priority::High);
        assert!(Priority::High < Priority::Medium);
        assert!(Priority::Medium < Priority::Low);
    }

    #[test]
    fn test_workflow_state_parsing() {
        let state: WorkflowState = "qa-review".parse().unwrap();
        assert_eq!(state, WorkflowState::QaReview);

        let state: WorkflowState = "IMPLEMENTATION_IN_PROGRESS".parse().unwrap();
        assert_eq!(state, WorkflowState::ImplementationInProgress);

        let err = "shipping".parse::<WorkflowState>().unwrap_err();
        assert!(matches!(err, PhaseGateError::UnknownState(s) if s == "shipping"));
    }

    #[test]
    fn test_workflow_state_wire_names_match_display() {
        for state in WorkflowState::ALL {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", state));
        }
    }

    #[test]
    fn test_unknown_state_in_record_is_rejected() {
        let json = r#"{"id":"t1","workflow_state":"limbo","epic":"e1"}"#;
        assert!(serde_json::from_str::<Task>(json).is_err());
    }

    #[test]
    fn test_task_record_defaults() {
        let json = r#"{"id":"t1","workflow_state":"backlog","epic":"e1"}"#;
        let task: Task = serde_json::from_str(json).unwrap();
        assert_eq!(task.priority, Priority::Medium);
        assert!(task.depends_on.is_empty());
        assert!(!task.breakpoint);
    }

    #[test]
    fn test_terminal_states() {
        let terminal: Vec<_> = WorkflowState::ALL
            .iter()
            .filter(|s| s.is_terminal())
            .collect();
        assert_eq!(terminal.len(), 3);
        assert!(WorkflowState::Done.is_terminal_success());
        assert!(!WorkflowState::PrFailed.is_terminal_success());
    }

    #[test]
    fn test_action_keys_roundtrip() {
        for action in Action::ALL {
            assert_eq!(action.key().parse::<Action>().unwrap(), action);
        }
        assert!("deploy".parse::<Action>().is_err());
    }

    #[test]
    fn test_outcome_parsing() {
        assert_eq!("accepted".parse::<PhaseOutcome>().unwrap(), PhaseOutcome::Accepted);
        assert_eq!("REJECTED".parse::<PhaseOutcome>().unwrap(), PhaseOutcome::Rejected);
        assert_eq!(
            "tests_defective".parse::<PhaseOutcome>().unwrap(),
            PhaseOutcome::TestsDefective
        );
        assert!("maybe".parse::<PhaseOutcome>().is_err());
    }

    #[test]
    fn test_snapshot_rejects_duplicate_ids() {
        let tasks = vec![Task::new("t1", "e1"), Task::new("t1", "e1")];
        let err = TaskSnapshot::new(vec!["e1".into()], tasks).unwrap_err();
        assert!(matches!(err, PhaseGateError::DuplicateTask(id) if id == "t1"));
    }

    #[test]
    fn test_snapshot_rejects_unknown_epic() {
        let tasks = vec![Task::new("t1", "missing")];
        let err = TaskSnapshot::new(vec!["e1".into()], tasks).unwrap_err();
        assert!(matches!(err, PhaseGateError::UnknownEpic { .. }));
    }

    #[test]
    fn test_snapshot_lookup_and_epic_rank() {
        let snapshot = TaskSnapshot::new(
            vec!["foundation".into(), "api".into()],
            vec![Task::new("t1", "api"), Task::new("t2", "foundation")],
        )
        .unwrap();

        assert_eq!(snapshot.get("t2").unwrap().epic, "foundation");
        assert!(snapshot.get("t3").is_none());
        assert_eq!(snapshot.epic_rank("foundation"), Some(0));
        assert_eq!(snapshot.epic_rank("api"), Some(1));
        assert_eq!(snapshot.epic_tasks("api").count(), 1);
    }
}
