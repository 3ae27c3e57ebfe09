//! phasegate - epic-gated phase pipeline scheduler
//!
//! Usage:
//!   phasegate init                      Create the task store and default config
//!   phasegate add <id> --epic <epic>    Create a task record
//!   phasegate ready                     List the ordered ready set
//!   phasegate next                      Show the next dispatch
//!   phasegate explain <id>              Explain why a task is or is not ready
//!   phasegate run [--max N] [--batch]   Drive phases through the executor
//!   phasegate advance <id> <outcome>    Record an outcome by hand

mod executor;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use executor::CommandExecutor;
use phasegate_core::{
    CycleCheck, DispatchMode, PhaseGateConfig, PhaseOutcome, Priority, Task, WorkflowState,
};
use phasegate_scheduler::diagnostics::health_report;
use phasegate_scheduler::{
    advance, epic_progress, explain, DispatchResult, Driver, DriverConfig, Eligibility,
    RunReport, Scheduler, StateCategory, StateTable, StopReason, TransitionLog,
};
use phasegate_store::{FileTaskStore, TaskStore};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "phasegate")]
#[command(author, version, about = "Epic-gated phase pipeline scheduler")]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Repository root holding `.phasegate/`
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the task store and a default config file
    Init,

    /// Create a task record in backlog
    Add {
        /// Task ID
        id: String,

        /// Epic the task belongs to (appended to the epic order if new)
        #[arg(long)]
        epic: String,

        /// Priority (critical, high, medium, low)
        #[arg(long, default_value = "medium")]
        priority: String,

        /// Predecessor task IDs
        #[arg(long = "depends-on", value_delimiter = ',')]
        depends_on: Vec<String>,
    },

    /// List ready tasks in dispatch order
    Ready,

    /// Show the task and action that would be dispatched next
    Next,

    /// Explain the scheduling status of one task
    Explain {
        /// Task ID
        id: String,
    },

    /// Show epic order and progress
    Epics,

    /// Check the task graph for cycles, dangling dependencies and empty epics
    Check,

    /// Apply an outcome to a task by hand (e.g. a merged PR)
    Advance {
        /// Task ID
        id: String,

        /// Outcome (accepted, rejected, tests-defective, failed)
        outcome: String,
    },

    /// Set or clear a task's breakpoint
    Breakpoint {
        /// Task ID
        id: String,

        /// Hold the task out of scheduling
        #[arg(long, conflicts_with = "off", required_unless_present = "off")]
        on: bool,

        /// Release the task back into scheduling
        #[arg(long)]
        off: bool,
    },

    /// Dispatch phases until nothing is dispatchable
    Run {
        /// Maximum number of dispatches
        #[arg(long)]
        max: Option<usize>,

        /// Dispatch the head epic's ready tasks concurrently each step
        #[arg(long)]
        batch: bool,
    },

    /// Show recorded transitions for a task
    History {
        /// Task ID
        id: String,
    },

    /// Print the workflow state table
    Path,
}

/// Resolved repository root with its configuration
struct Workspace {
    root: PathBuf,
    config: PhaseGateConfig,
}

impl Workspace {
    fn load(root: &Path) -> Result<Self> {
        let config = PhaseGateConfig::load_or_default(root)
            .with_context(|| format!("Failed to load config under {}", root.display()))?;
        Ok(Self {
            root: root.to_path_buf(),
            config,
        })
    }

    fn store(&self) -> FileTaskStore {
        FileTaskStore::new(
            self.config.store.tasks_dir(&self.root),
            self.config.store.epics_file(&self.root),
        )
    }

    fn audit_log(&self) -> Option<TransitionLog> {
        self.config
            .audit
            .enabled
            .then(|| TransitionLog::new(self.root.join(&self.config.audit.path)))
    }

    fn scheduler(&self) -> Scheduler {
        Scheduler::from_config(&self.config.scheduler)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let root = cli.root.as_path();
    let json = cli.json;

    match cli.command {
        Commands::Init => cmd_init(root).await,
        Commands::Add {
            id,
            epic,
            priority,
            depends_on,
        } => cmd_add(root, &id, &epic, &priority, depends_on).await,
        Commands::Ready => cmd_ready(root, json).await,
        Commands::Next => cmd_next(root, json).await,
        Commands::Explain { id } => cmd_explain(root, &id, json).await,
        Commands::Epics => cmd_epics(root, json).await,
        Commands::Check => cmd_check(root, json).await,
        Commands::Advance { id, outcome } => cmd_advance(root, &id, &outcome).await,
        Commands::Breakpoint { id, on, off: _ } => cmd_breakpoint(root, &id, on).await,
        Commands::Run { max, batch } => cmd_run(root, max, batch, json).await,
        Commands::History { id } => cmd_history(root, &id, json).await,
        Commands::Path => cmd_path(json),
    }
}

async fn cmd_init(root: &Path) -> Result<()> {
    let config_path = PhaseGateConfig::config_path(root);
    if config_path.exists() {
        println!("Config already exists at {}", config_path.display());
    } else {
        let written = PhaseGateConfig::write_default(root).context("Failed to write config")?;
        println!("Wrote default config to {}", written.display());
    }

    let ws = Workspace::load(root)?;
    let store = ws.store();
    store.init().await.context("Failed to initialize task store")?;

    println!("Tasks directory: {}", store.tasks_dir().display());
    println!("Epics file:      {}", store.epics_file().display());
    Ok(())
}

async fn cmd_add(
    root: &Path,
    id: &str,
    epic: &str,
    priority: &str,
    depends_on: Vec<String>,
) -> Result<()> {
    let ws = Workspace::load(root)?;
    let store = ws.store();
    store.init().await?;

    let priority: Priority = priority.parse().map_err(anyhow::Error::msg)?;

    let snapshot = store.snapshot().await?;
    if snapshot.contains(id) {
        bail!("Task {} already exists", id);
    }

    let mut epics = snapshot.epics().to_vec();
    if !epics.iter().any(|e| e == epic) {
        epics.push(epic.to_string());
        store.write_epics(&epics).await?;
        info!(epic = %epic, "Added epic");
    }

    let mut task = Task::new(id, epic).with_priority(priority);
    for dep in depends_on {
        task = task.with_dependency(dep);
    }
    store.put_task(&task).await?;

    println!("Created {} in epic {} ({})", id, epic, priority);
    Ok(())
}

async fn cmd_ready(root: &Path, json: bool) -> Result<()> {
    let ws = Workspace::load(root)?;
    let snapshot = ws.store().snapshot().await?;
    let scheduler = ws.scheduler();
    let table = scheduler.table();
    let ordered = scheduler.order(&snapshot);

    if json {
        let rows: Vec<_> = ordered
            .iter()
            .map(|task| {
                serde_json::json!({
                    "id": task.id,
                    "epic": task.epic,
                    "priority": task.priority,
                    "state": task.workflow_state,
                    "action": table.required_action(task.workflow_state),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if ordered.is_empty() {
        println!("No ready tasks");
        return Ok(());
    }

    println!(
        "{:<20} {:<16} {:<9} {:<28} ACTION",
        "TASK", "EPIC", "PRIORITY", "STATE"
    );
    for task in ordered {
        let action = table
            .required_action(task.workflow_state)
            .map(|a| a.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<20} {:<16} {:<9} {:<28} {}",
            task.id, task.epic, task.priority, task.workflow_state, action
        );
    }
    Ok(())
}

async fn cmd_next(root: &Path, json: bool) -> Result<()> {
    let ws = Workspace::load(root)?;
    let snapshot = ws.store().snapshot().await?;
    let scheduler = ws.scheduler();

    let next = scheduler.next_dispatch(&snapshot);
    if json {
        let value = next.map(|c| {
            serde_json::json!({
                "id": c.task.id,
                "epic": c.task.epic,
                "state": c.task.workflow_state,
                "action": c.action,
                "fresh_context": c.fresh_context,
            })
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    match next {
        Some(c) => {
            let fresh = if c.fresh_context { " [fresh context]" } else { "" };
            println!(
                "{} -> {} ({}){}",
                c.task.id, c.action, c.task.workflow_state, fresh
            );
        }
        None => println!("Nothing to dispatch"),
    }
    Ok(())
}

async fn cmd_explain(root: &Path, id: &str, json: bool) -> Result<()> {
    let ws = Workspace::load(root)?;
    let snapshot = ws.store().snapshot().await?;
    let scheduler = ws.scheduler();

    let eligibility = explain(&snapshot, scheduler.policy(), id)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&eligibility)?);
        return Ok(());
    }

    // explain has already rejected unknown ids
    let Some(task) = snapshot.get(id) else {
        return Ok(());
    };
    let table = scheduler.table();
    println!("Task:     {}", task.id);
    println!("Epic:     {}", task.epic);
    println!("Priority: {}", task.priority);
    println!(
        "State:    {} ({})",
        task.workflow_state,
        table.category(task.workflow_state)
    );
    if !task.depends_on.is_empty() {
        let deps: Vec<&str> = task.depends_on.iter().map(String::as_str).collect();
        println!("Depends:  {}", deps.join(", "));
    }
    println!("Status:   {}", eligibility);
    if eligibility == Eligibility::Dispatchable {
        if let Some(action) = table.required_action(task.workflow_state) {
            println!("Action:   {}", action);
        }
    }
    Ok(())
}

async fn cmd_epics(root: &Path, json: bool) -> Result<()> {
    let ws = Workspace::load(root)?;
    let snapshot = ws.store().snapshot().await?;
    let progress = epic_progress(&snapshot);

    if json {
        println!("{}", serde_json::to_string_pretty(&progress)?);
        return Ok(());
    }

    if progress.is_empty() {
        println!("No epics defined");
        return Ok(());
    }

    for (rank, epic) in progress.iter().enumerate() {
        let marker = if epic.complete { "done" } else { "open" };
        let failed = if epic.failed > 0 {
            format!(", {} failed", epic.failed)
        } else {
            String::new()
        };
        println!(
            "{:>2}. {:<20} {:>3}/{:<3} {:>5.1}% [{}]{}",
            rank + 1,
            epic.epic,
            epic.done,
            epic.total,
            epic.percent(),
            marker,
            failed
        );
    }
    Ok(())
}

async fn cmd_check(root: &Path, json: bool) -> Result<()> {
    let ws = Workspace::load(root)?;
    StateTable::new().validate()?;
    let snapshot = ws.store().snapshot().await?;
    let report = health_report(&snapshot);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if report.is_clean() {
        println!("No problems found ({} tasks)", snapshot.len());
    } else {
        for cycle in &report.cycles {
            println!("cycle:      {}", cycle.join(" -> "));
        }
        for dangling in &report.dangling {
            println!(
                "dangling:   {} depends on unknown task {}",
                dangling.task_id, dangling.missing
            );
        }
        for epic in &report.empty_epics {
            println!("empty epic: {} (blocks every later epic)", epic);
        }
        for (blocked, failed) in &report.blocked_by_failures {
            println!("{}", blocked_line(blocked, failed));
        }
    }

    if !report.cycles.is_empty() && ws.config.scheduler.cycle_check == CycleCheck::Error {
        bail!("{} dependency cycle(s) found", report.cycles.len());
    }
    Ok(())
}

fn blocked_line(blocked: &str, failed: &[String]) -> String {
    format!("blocked:    {} held up by failed {}", blocked, failed.join(", "))
}

async fn cmd_advance(root: &Path, id: &str, outcome: &str) -> Result<()> {
    let ws = Workspace::load(root)?;
    let outcome: PhaseOutcome = outcome.parse()?;
    let store = ws.store();
    let audit = ws.audit_log();

    let (from, to) = advance(&store, audit.as_ref(), id, outcome)
        .await
        .with_context(|| format!("Failed to advance {}", id))?;
    println!("{}: {} -> {} ({})", id, from, to, outcome);
    Ok(())
}

async fn cmd_breakpoint(root: &Path, id: &str, on: bool) -> Result<()> {
    let ws = Workspace::load(root)?;
    ws.store().set_breakpoint(id, on).await?;
    if on {
        println!("Breakpoint set on {}", id);
    } else {
        println!("Breakpoint cleared on {}", id);
    }
    Ok(())
}

async fn cmd_run(root: &Path, max: Option<usize>, batch: bool, json: bool) -> Result<()> {
    let ws = Workspace::load(root)?;
    let mut config = DriverConfig::from_config(&ws.config);
    if let Some(max) = max {
        config.max_dispatches = max;
    }
    if batch {
        config.mode = DispatchMode::EpicBatch;
    }

    let executor = CommandExecutor::new(&ws.config.executor, &ws.root);
    let missing = executor.missing_actions();
    if !missing.is_empty() {
        let names: Vec<String> = missing.iter().map(|a| a.to_string()).collect();
        tracing::warn!(actions = %names.join(", "), "No command configured for some actions");
    }

    let mut driver = Driver::new(ws.store(), executor, ws.scheduler(), config)?;
    if let Some(log) = ws.audit_log() {
        driver = driver.with_audit_log(log);
    }

    let report = driver.run().await.context("Run aborted")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    print_run_report(&report);
    Ok(())
}

fn print_run_report(report: &RunReport) {
    for DispatchResult {
        task_id,
        action,
        from,
        to,
        outcome,
        rework,
    } in &report.dispatches
    {
        let rework = if *rework { " (rework)" } else { "" };
        println!(
            "{:<20} {:<22} {} -> {} [{}]{}",
            task_id, action, from, to, outcome, rework
        );
    }

    let reason = match report.stop_reason {
        StopReason::Idle => "nothing left to dispatch",
        StopReason::MaxDispatches => "dispatch limit reached",
    };
    println!(
        "\n{} dispatch(es), stopped: {}",
        report.dispatches.len(),
        reason
    );
}

async fn cmd_history(root: &Path, id: &str, json: bool) -> Result<()> {
    let ws = Workspace::load(root)?;
    let Some(log) = ws.audit_log() else {
        bail!("Audit log is disabled in {}", PhaseGateConfig::config_path(root).display());
    };

    let records = log.history(id).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No transitions recorded for {}", id);
        return Ok(());
    }
    for record in records {
        let action = record
            .action
            .map(|a| a.to_string())
            .unwrap_or_else(|| "-".to_string());
        let outcome = record
            .outcome
            .map(|o| o.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{} {:<8} {:<22} {} -> {} [{}]",
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            format!("{:?}", record.kind),
            action,
            record.from,
            record.to,
            outcome
        );
    }
    Ok(())
}

fn cmd_path(json: bool) -> Result<()> {
    let table = StateTable::new();

    if json {
        let rows: Vec<_> = WorkflowState::ALL
            .iter()
            .map(|&state| {
                serde_json::json!({
                    "state": state,
                    "category": table.category(state),
                    "action": table.required_action(state),
                    "next": table.default_successor(state),
                    "rejected": table.rejection_successor(state),
                    "failed": table.failure_successor(state),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    let path: Vec<&str> = table.happy_path().iter().map(|s| s.as_str()).collect();
    println!("Happy path:\n  {}\n", path.join(" -> "));

    println!(
        "{:<28} {:<11} {:<22} {:<28} {:<28} FAILED",
        "STATE", "CATEGORY", "ACTION", "NEXT", "REJECTED"
    );
    let dash = |s: Option<WorkflowState>| s.map(|s| s.as_str()).unwrap_or("-");
    for state in WorkflowState::ALL {
        let category = table.category(state);
        let action = table
            .required_action(state)
            .map(|a| a.key())
            .unwrap_or("-");
        let next = match category {
            StateCategory::Terminal => "-",
            _ => dash(table.default_successor(state)),
        };
        println!(
            "{:<28} {:<11} {:<22} {:<28} {:<28} {}",
            state.as_str(),
            category.to_string(),
            action,
            next,
            dash(table.rejection_successor(state)),
            dash(table.failure_successor(state))
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use phasegate_core::TaskSnapshot;

    #[test]
    fn test_blocked_line_names_blocked_task_first() {
        let snapshot = TaskSnapshot::new(
            vec!["e1".to_string()],
            vec![
                Task::new("f", "e1").with_state(WorkflowState::PrFailed),
                Task::new("y", "e1").with_dependency("f"),
            ],
        )
        .unwrap();
        let report = health_report(&snapshot);

        let lines: Vec<String> = report
            .blocked_by_failures
            .iter()
            .map(|(blocked, failed)| blocked_line(blocked, failed))
            .collect();
        assert_eq!(lines, vec!["blocked:    y held up by failed f"]);
    }

    #[test]
    fn test_cli_parses_breakpoint_flags() {
        let cli = Cli::try_parse_from(["phasegate", "breakpoint", "t1", "--off"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Breakpoint { on: false, off: true, .. }
        ));
        assert!(Cli::try_parse_from(["phasegate", "breakpoint", "t1"]).is_err());
        assert!(Cli::try_parse_from(["phasegate", "breakpoint", "t1", "--on", "--off"]).is_err());
    }
}
