//! # Execution Recorder
//!
//! Tracks in-flight recoveries (for introspection and cancellation) and keeps
//! every finished [`DecisionPath`] in an append-only history. When an archive
//! is configured each finished path is also appended to it as one NDJSON
//! line; archive failures are logged and never reach the caller.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::path::DecisionPath;

/// Durable sink for finished decision paths
#[async_trait]
pub trait PathArchive: Send + Sync {
    async fn append(&self, path: &DecisionPath) -> Result<()>;

    async fn load_all(&self) -> Result<Vec<DecisionPath>>;
}

/// Append-only NDJSON file: one serialized path per line
#[derive(Debug, Clone)]
pub struct NdjsonArchive {
    path: PathBuf,
}

impl NdjsonArchive {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn ensure_parent_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PathArchive for NdjsonArchive {
    async fn append(&self, path: &DecisionPath) -> Result<()> {
        self.ensure_parent_dir().await?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        let mut line = serde_json::to_string(path)?;
        line.push('\n');
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<DecisionPath>> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut paths = Vec::new();
        for line in contents.lines().filter(|line| !line.trim().is_empty()) {
            match serde_json::from_str::<DecisionPath>(line) {
                Ok(path) => paths.push(path),
                Err(e) => warn!(error = %e, "Skipping unreadable archived decision path"),
            }
        }
        Ok(paths)
    }
}

/// Snapshot of a recovery that is still running
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveExecution {
    pub path_id: Uuid,
    pub failure_id: String,
    pub strategy_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub dry_run: bool,
}

struct ActiveEntry {
    execution: ActiveExecution,
    cancel: watch::Sender<bool>,
}

/// Active-execution table plus finished-path history
#[derive(Default)]
pub struct ExecutionRecorder {
    active: Mutex<HashMap<Uuid, ActiveEntry>>,
    history: Mutex<Vec<DecisionPath>>,
    archive: Option<Arc<dyn PathArchive>>,
}

impl ExecutionRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_archive<A: PathArchive + 'static>(self, archive: A) -> Self {
        self.with_shared_archive(Arc::new(archive))
    }

    pub fn with_shared_archive(mut self, archive: Arc<dyn PathArchive>) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn has_archive(&self) -> bool {
        self.archive.is_some()
    }

    fn active_map(&self) -> MutexGuard<'_, HashMap<Uuid, ActiveEntry>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn history_log(&self) -> MutexGuard<'_, Vec<DecisionPath>> {
        self.history.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers a starting run and hands back its cancellation signal.
    ///
    /// The returned guard removes the entry again if the run is abandoned
    /// before [`complete`](Self::complete) is called.
    pub fn begin(&self, path: &DecisionPath) -> (ActiveGuard<'_>, watch::Receiver<bool>) {
        let (cancel, cancelled) = watch::channel(false);
        let execution = ActiveExecution {
            path_id: path.path_id,
            failure_id: path.failure_id.clone(),
            strategy_id: path.strategy_id.clone(),
            started_at: path.start_time,
            dry_run: path.dry_run,
        };

        self.active_map().insert(path.path_id, ActiveEntry { execution, cancel });
        debug!(path_id = %path.path_id, failure_id = %path.failure_id, "Execution registered");

        (
            ActiveGuard {
                recorder: self,
                path_id: path.path_id,
            },
            cancelled,
        )
    }

    /// Signals a running execution to stop before its next node.
    ///
    /// Returns false when no active run carries `path_id`.
    pub fn cancel(&self, path_id: Uuid) -> bool {
        match self.active_map().get(&path_id) {
            Some(entry) => {
                let _ = entry.cancel.send(true);
                true
            }
            None => false,
        }
    }

    /// Moves a finished path into history and the archive
    pub async fn complete(&self, path: DecisionPath) {
        self.active_map().remove(&path.path_id);
        self.history_log().push(path.clone());

        if let Some(archive) = &self.archive {
            if let Err(e) = archive.append(&path).await {
                warn!(path_id = %path.path_id, error = %e, "Failed to archive decision path");
            }
        }
    }

    /// Runs in flight, oldest first
    pub fn active(&self) -> Vec<ActiveExecution> {
        let mut executions: Vec<ActiveExecution> = self
            .active_map()
            .values()
            .map(|entry| entry.execution.clone())
            .collect();
        executions.sort_by_key(|e| e.started_at);
        executions
    }

    /// Every finished path in completion order
    pub fn history(&self) -> Vec<DecisionPath> {
        self.history_log().clone()
    }

    pub fn completed_count(&self) -> usize {
        self.history_log().len()
    }

    pub fn find(&self, path_id: Uuid) -> Option<DecisionPath> {
        self.history_log().iter().find(|p| p.path_id == path_id).cloned()
    }

    pub fn for_failure(&self, failure_id: &str) -> Vec<DecisionPath> {
        self.history_log()
            .iter()
            .filter(|p| p.failure_id == failure_id)
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for ExecutionRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionRecorder")
            .field("active", &self.active_map().len())
            .field("completed", &self.completed_count())
            .field("archive", &self.has_archive())
            .finish()
    }
}

/// Drops the active entry of an abandoned run
pub struct ActiveGuard<'a> {
    recorder: &'a ExecutionRecorder,
    path_id: Uuid,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.recorder.active_map().remove(&self.path_id);
    }
}
