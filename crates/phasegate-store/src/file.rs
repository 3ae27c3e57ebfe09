//! Task records as JSON files on disk.
//!
//! Layout:
//! - `{tasks_dir}/{id}.json`: one task record per file
//! - `{epics_file}`: JSON array of epic ids in definition order
//!
//! Writes go to a temporary sibling file and are renamed into place, so a
//! reader never observes a half-written record.

use async_trait::async_trait;
use phasegate_core::{EpicId, PhaseGateError, Result, Task, TaskSnapshot, WorkflowState};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::store::TaskStore;

/// File-backed task store
pub struct FileTaskStore {
    tasks_dir: PathBuf,
    epics_file: PathBuf,
    // Serializes read-modify-write cycles on records within this process
    write_lock: Mutex<()>,
}

impl FileTaskStore {
    pub fn new(tasks_dir: impl Into<PathBuf>, epics_file: impl Into<PathBuf>) -> Self {
        Self {
            tasks_dir: tasks_dir.into(),
            epics_file: epics_file.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn tasks_dir(&self) -> &Path {
        &self.tasks_dir
    }

    pub fn epics_file(&self) -> &Path {
        &self.epics_file
    }

    /// Create the tasks directory and an empty epics file if missing
    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.tasks_dir).await?;
        if !self.epics_file.exists() {
            self.write_epics(&[]).await?;
        }
        Ok(())
    }

    /// Replace the epic definition order
    pub async fn write_epics(&self, epics: &[EpicId]) -> Result<()> {
        let data = serde_json::to_vec_pretty(epics)?;
        write_atomic(&self.epics_file, &data).await
    }

    /// Read the epic definition order (empty if the file does not exist)
    pub async fn read_epics(&self) -> Result<Vec<EpicId>> {
        match fs::read(&self.epics_file).await {
            Ok(data) => serde_json::from_slice(&data).map_err(|e| {
                PhaseGateError::Config(format!("{}: {}", self.epics_file.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Create or overwrite a task record
    pub async fn put_task(&self, task: &Task) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        write_task_file(&self.tasks_dir, task).await
    }

    /// Read one task record by id
    pub async fn get_task(&self, task_id: &str) -> Result<Task> {
        let path = self.task_path(task_id);
        if !path.exists() {
            return Err(PhaseGateError::TaskNotFound(task_id.to_string()));
        }
        read_task_file(&path).await
    }

    fn task_path(&self, task_id: &str) -> PathBuf {
        self.tasks_dir.join(format!("{}.json", task_id))
    }

    async fn update_task<F>(&self, task_id: &str, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut Task) + Send,
    {
        let _guard = self.write_lock.lock().await;
        let mut task = self.get_task(task_id).await?;
        mutate(&mut task);
        write_task_file(&self.tasks_dir, &task).await
    }
}

#[async_trait]
impl TaskStore for FileTaskStore {
    #[instrument(skip(self), fields(tasks_dir = %self.tasks_dir.display()))]
    async fn snapshot(&self) -> Result<TaskSnapshot> {
        let epics = self.read_epics().await?;
        let tasks = read_all_task_files(&self.tasks_dir).await?;
        debug!(epics = epics.len(), tasks = tasks.len(), "Loaded task snapshot");
        TaskSnapshot::new(epics, tasks)
    }

    #[instrument(skip(self))]
    async fn write_state(&self, task_id: &str, state: WorkflowState) -> Result<()> {
        self.update_task(task_id, |task| task.workflow_state = state)
            .await
    }

    #[instrument(skip(self))]
    async fn set_breakpoint(&self, task_id: &str, breakpoint: bool) -> Result<()> {
        self.update_task(task_id, |task| task.breakpoint = breakpoint)
            .await
    }
}

/// Read and parse a single task record.
///
/// Unknown workflow states and malformed records are configuration errors.
pub async fn read_task_file(path: &Path) -> Result<Task> {
    debug!("Reading task file: {}", path.display());

    let data = fs::read(path).await?;
    let task: Task = serde_json::from_slice(&data)
        .map_err(|e| PhaseGateError::Config(format!("{}: {}", path.display(), e)))?;

    if task.id.is_empty() {
        return Err(PhaseGateError::Config(format!(
            "{}: task id is required",
            path.display()
        )));
    }
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    if stem != task.id {
        return Err(PhaseGateError::Config(format!(
            "{}: file name does not match task id '{}'",
            path.display(),
            task.id
        )));
    }

    Ok(task)
}

/// Write a task record to `{tasks_dir}/{id}.json` atomically
pub async fn write_task_file(tasks_dir: &Path, task: &Task) -> Result<()> {
    if task.id.is_empty() || task.id.contains(['/', '\\']) {
        return Err(PhaseGateError::Config(format!(
            "invalid task id '{}'",
            task.id
        )));
    }

    fs::create_dir_all(tasks_dir).await?;

    let data = serde_json::to_vec_pretty(task)?;
    let path = tasks_dir.join(format!("{}.json", task.id));
    debug!("Writing task file: {}", path.display());
    write_atomic(&path, &data).await
}

/// Read every `.json` record in a directory, sorted by file name.
///
/// A missing directory is an empty task set. Any unreadable record fails the
/// whole read: a silently skipped task would vanish from scheduling.
pub async fn read_all_task_files(tasks_dir: &Path) -> Result<Vec<Task>> {
    let mut entries = match fs::read_dir(tasks_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("Tasks directory does not exist, returning empty list");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("json") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut tasks = Vec::with_capacity(paths.len());
    for path in &paths {
        tasks.push(read_task_file(path).await?);
    }
    Ok(tasks)
}

async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| PhaseGateError::Store(format!("invalid path: {}", path.display())))?;
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));

    fs::write(&tmp, data).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}
