//! Transition audit trail
//!
//! One JSON object per line, appended for every persisted state change.
//! Callers wrap appends in `fail_open`; a broken audit file never stops the
//! scheduler.

use chrono::{DateTime, Utc};
use phasegate_core::{Action, PhaseGateError, PhaseOutcome, Result, TaskId, WorkflowState};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

/// What caused a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransitionKind {
    /// In-flight state persisted at dispatch time
    Claim,
    /// Executor outcome applied by the driver
    Outcome,
    /// Outcome reported out-of-band (`phasegate advance`)
    Manual,
    /// Claim undone because the executor could not run the phase
    Release,
}

/// One line of the audit trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub timestamp: DateTime<Utc>,
    pub task_id: TaskId,
    pub epic: String,
    pub kind: TransitionKind,
    pub from: WorkflowState,
    pub to: WorkflowState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<PhaseOutcome>,
    #[serde(default)]
    pub rework: bool,
}

impl TransitionRecord {
    pub fn new(
        task_id: impl Into<TaskId>,
        epic: impl Into<String>,
        kind: TransitionKind,
        from: WorkflowState,
        to: WorkflowState,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            task_id: task_id.into(),
            epic: epic.into(),
            kind,
            from,
            to,
            action: None,
            outcome: None,
            rework: false,
        }
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }

    pub fn with_outcome(mut self, outcome: PhaseOutcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    pub fn with_rework(mut self, rework: bool) -> Self {
        self.rework = rework;
        self
    }
}

/// Append-only JSON-lines log of transitions
#[derive(Debug, Clone)]
pub struct TransitionLog {
    path: PathBuf,
}

impl TransitionLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, record: &TransitionRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Every record in file order; a missing file is an empty trail
    pub async fn read_all(&self) -> Result<Vec<TransitionRecord>> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str::<TransitionRecord>(line).map_err(PhaseGateError::from)
            })
            .collect()
    }

    /// Records for one task, oldest first
    pub async fn history(&self, task_id: &str) -> Result<Vec<TransitionRecord>> {
        Ok(self
            .read_all()
            .await?
            .into_iter()
            .filter(|r| r.task_id == task_id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_append_and_read() {
        let dir = TempDir::new().unwrap();
        let log = TransitionLog::new(dir.path().join("nested/audit.jsonl"));

        let claim = TransitionRecord::new(
            "t1",
            "e1",
            TransitionKind::Claim,
            WorkflowState::Backlog,
            WorkflowState::AnalysisInProgress,
        )
        .with_action(Action::Analyze);
        let outcome = TransitionRecord::new(
            "t1",
            "e1",
            TransitionKind::Outcome,
            WorkflowState::AnalysisInProgress,
            WorkflowState::UxReview,
        )
        .with_action(Action::Analyze)
        .with_outcome(PhaseOutcome::Accepted);

        log.append(&claim).await.unwrap();
        log.append(&outcome).await.unwrap();

        let records = log.read_all().await.unwrap();
        assert_eq!(records, vec![claim, outcome]);
    }

    #[tokio::test]
    async fn test_record_wire_format() {
        let dir = TempDir::new().unwrap();
        let log = TransitionLog::new(dir.path().join("audit.jsonl"));
        let record = TransitionRecord::new(
            "t1",
            "e1",
            TransitionKind::Outcome,
            WorkflowState::QaReview,
            WorkflowState::ImplementationInProgress,
        )
        .with_outcome(PhaseOutcome::Rejected);
        log.append(&record).await.unwrap();

        let raw = std::fs::read_to_string(log.path()).unwrap();
        assert!(raw.ends_with('\n'));
        assert!(raw.contains("\"from\":\"qa-review\""));
        assert!(raw.contains("\"outcome\":\"rejected\""));
        assert!(!raw.contains("\"action\""));
    }

    #[tokio::test]
    async fn test_history_filters_by_task() {
        let dir = TempDir::new().unwrap();
        let log = TransitionLog::new(dir.path().join("audit.jsonl"));
        for id in ["a", "b", "a"] {
            let record = TransitionRecord::new(
                id,
                "e1",
                TransitionKind::Manual,
                WorkflowState::PrOpen,
                WorkflowState::Done,
            );
            log.append(&record).await.unwrap();
        }

        assert_eq!(log.history("a").await.unwrap().len(), 2);
        assert!(log.history("zzz").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let log = TransitionLog::new(dir.path().join("absent.jsonl"));
        assert!(log.read_all().await.unwrap().is_empty());
    }
}
