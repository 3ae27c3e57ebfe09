//! Shell-command phase executor
//!
//! Each action key maps to a command line from `[executor.commands]`. The
//! command runs through the configured shell in the repository root with the
//! task described in `PHASEGATE_*` environment variables.

use async_trait::async_trait;
use phasegate_core::{Action, ExecutorConfig, PhaseGateError, PhaseOutcome};
use phasegate_scheduler::{DispatchRequest, PhaseExecutor, PhaseReport};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

pub struct CommandExecutor {
    config: ExecutorConfig,
    workdir: PathBuf,
}

impl CommandExecutor {
    pub fn new(config: &ExecutorConfig, workdir: impl Into<PathBuf>) -> Self {
        Self {
            config: config.clone(),
            workdir: workdir.into(),
        }
    }

    /// Actions that have no command configured
    pub fn missing_actions(&self) -> Vec<Action> {
        Action::ALL
            .into_iter()
            .filter(|a| self.config.command_for(*a).is_none())
            .collect()
    }

    /// Map a process exit code to a phase outcome
    fn classify(&self, code: Option<i32>) -> PhaseOutcome {
        match code {
            Some(0) => PhaseOutcome::Accepted,
            Some(c) if c == self.config.rejected_exit_code => PhaseOutcome::Rejected,
            Some(c) if c == self.config.tests_defective_exit_code => PhaseOutcome::TestsDefective,
            // non-zero or killed by a signal
            _ => PhaseOutcome::Failed,
        }
    }
}

#[async_trait]
impl PhaseExecutor for CommandExecutor {
    async fn execute(&self, request: &DispatchRequest) -> phasegate_core::Result<PhaseReport> {
        let command = self.config.command_for(request.action).ok_or_else(|| {
            PhaseGateError::Executor(format!(
                "no command configured for action '{}'",
                request.action
            ))
        })?;

        debug!(task_id = %request.task.id, command = %command, "Running phase command");

        let output = Command::new(&self.config.shell)
            .arg("-c")
            .arg(command)
            .current_dir(&self.workdir)
            .env("PHASEGATE_TASK_ID", &request.task.id)
            .env("PHASEGATE_EPIC", &request.task.epic)
            .env("PHASEGATE_ACTION", request.action.key())
            .env("PHASEGATE_STATE", request.task.workflow_state.as_str())
            .env("PHASEGATE_PRIORITY", request.task.priority.to_string())
            .env(
                "PHASEGATE_FRESH_CONTEXT",
                if request.fresh_context { "1" } else { "0" },
            )
            .env("PHASEGATE_REWORK", if request.rework { "1" } else { "0" })
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                PhaseGateError::Executor(format!("failed to run '{}': {}", self.config.shell, e))
            })?;

        let outcome = self.classify(output.status.code());
        // phase output goes to the log; stdout belongs to the CLI
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stdout.trim().is_empty() {
            debug!(task_id = %request.task.id, stdout = %stdout.trim(), "Phase command stdout");
        }
        if !stderr.trim().is_empty() {
            debug!(task_id = %request.task.id, stderr = %stderr.trim(), "Phase command stderr");
        }

        let detail = last_line(&stderr)
            .or_else(|| last_line(&stdout))
            .unwrap_or_else(|| format!("{} exited with {}", request.action, output.status));

        Ok(PhaseReport::new(outcome).with_detail(detail))
    }
}

fn last_line(text: &str) -> Option<String> {
    text.lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}
