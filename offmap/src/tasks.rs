//! Background merge and index jobs.
//!
//! Every job gets a deterministic identifier and a progress value that HTTP
//! handlers can poll at any time without waiting on the job itself:
//! `0..=99` while the job is queued or running, `100` once its output is
//! published and `-1` when it failed.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicI8, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use offmap_mbtiles::{
    CopyDuplicateMode, MbtResult, PoiIndexOutcome, PoiIndexer, ProgressReporter,
    TileErrorPolicy, TileMerger, index_path,
};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::config::TasksConfig;

pub const PROGRESS_FAILED: i8 = -1;
pub const PROGRESS_DONE: i8 = 100;

/// Identifier of a merge job: MD5 of the sorted, concatenated source paths.
///
/// Any permutation of the same sources produces the same identifier.
#[must_use]
pub fn merge_task_id<P: AsRef<Path>>(sources: &[P]) -> String {
    let mut paths: Vec<String> = sources
        .iter()
        .map(|p| p.as_ref().to_string_lossy().into_owned())
        .collect();
    paths.sort();
    format!("{:x}", md5::compute(paths.concat()))
}

/// Identifier of an index job: MD5 of the index file path
#[must_use]
pub fn index_task_id(archive: &Path) -> String {
    format!(
        "{:x}",
        md5::compute(index_path(archive).to_string_lossy().as_bytes())
    )
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Merge,
    Index,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Done,
    Failed,
}

impl TaskStatus {
    #[must_use]
    pub fn from_progress(progress: i8) -> Self {
        match progress {
            PROGRESS_FAILED => Self::Failed,
            PROGRESS_DONE => Self::Done,
            _ => Self::Running,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub task_id: String,
    pub kind: TaskKind,
    pub progress: i8,
    pub status: TaskStatus,
}

#[derive(Debug)]
struct TaskEntry {
    kind: TaskKind,
    progress: AtomicI8,
}

impl TaskEntry {
    fn new(kind: TaskKind) -> Self {
        Self {
            kind,
            progress: AtomicI8::new(0),
        }
    }

    fn progress(&self) -> i8 {
        self.progress.load(Ordering::Acquire)
    }

    fn is_terminal(&self) -> bool {
        is_terminal(self.progress())
    }
}

fn is_terminal(progress: i8) -> bool {
    progress == PROGRESS_FAILED || progress == PROGRESS_DONE
}

/// Write side of a job's progress, owned by the worker running the job.
///
/// Values never go down, and nothing changes once the job is done or failed.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    task_id: String,
    entry: Arc<TaskEntry>,
}

impl TaskHandle {
    #[must_use]
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    #[must_use]
    pub fn progress(&self) -> i8 {
        self.entry.progress()
    }

    /// Returns `true` if the stored value changed
    fn set(&self, value: i8) -> bool {
        self.entry
            .progress
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if is_terminal(current) || (value != PROGRESS_FAILED && value <= current) {
                    None
                } else {
                    Some(value)
                }
            })
            .is_ok()
    }

    fn fail(&self) {
        self.set(PROGRESS_FAILED);
    }

    fn complete(&self) {
        self.set(PROGRESS_DONE);
    }

    /// Record the job result as terminal progress
    fn finish<T>(&self, result: MbtResult<T>) -> Option<T> {
        match result {
            Ok(value) => {
                self.complete();
                Some(value)
            }
            Err(err) => {
                error!("Task {} failed: {err}", self.task_id);
                self.fail();
                None
            }
        }
    }
}

impl ProgressReporter for TaskHandle {
    fn report(&self, percent: u8) {
        // 100 is reserved for a published result
        self.set(i8::try_from(percent.min(99)).unwrap_or(99));
    }
}

/// Settings applied to every job started by a [`TaskTracker`]
#[derive(Clone, Debug, PartialEq)]
pub struct JobSettings {
    pub max_concurrent_jobs: usize,
    pub page_size: usize,
    pub on_duplicate: CopyDuplicateMode,
    pub on_tile_error: TileErrorPolicy,
}

impl From<&TasksConfig> for JobSettings {
    fn from(cfg: &TasksConfig) -> Self {
        Self {
            max_concurrent_jobs: cfg.max_concurrent_jobs(),
            page_size: cfg.page_size(),
            on_duplicate: cfg.on_duplicate.unwrap_or_default(),
            on_tile_error: cfg.on_tile_error.unwrap_or_default(),
        }
    }
}

/// Registry of merge and index jobs.
///
/// Jobs run on the tokio runtime the tracker was created in, at most
/// `max_concurrent_jobs` at a time. Entries are kept for the lifetime of the process.
#[derive(Clone, Debug)]
pub struct TaskTracker {
    tasks: Arc<DashMap<String, Arc<TaskEntry>>>,
    permits: Arc<Semaphore>,
    settings: JobSettings,
    runtime: Handle,
}

impl TaskTracker {
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(settings: JobSettings) -> Self {
        Self {
            tasks: Arc::default(),
            permits: Arc::new(Semaphore::new(settings.max_concurrent_jobs.max(1))),
            settings,
            runtime: Handle::current(),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &JobSettings {
        &self.settings
    }

    /// Create a fresh entry unless a job with the same id is still running
    fn register(&self, task_id: &str, kind: TaskKind) -> Option<TaskHandle> {
        let entry = Arc::new(TaskEntry::new(kind));
        match self.tasks.entry(task_id.to_string()) {
            Entry::Occupied(mut existing) => {
                if !existing.get().is_terminal() {
                    return None;
                }
                existing.insert(entry.clone());
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry.clone());
            }
        }
        Some(TaskHandle {
            task_id: task_id.to_string(),
            entry,
        })
    }

    /// Start merging `sources` into `target` and return the task id right away.
    ///
    /// Submitting the same set of sources while that merge is still running
    /// returns the existing id without starting another job.
    pub fn submit_merge(&self, sources: Vec<PathBuf>, target: PathBuf) -> String {
        let task_id = merge_task_id(&sources);
        let Some(handle) = self.register(&task_id, TaskKind::Merge) else {
            info!("Merge task {task_id} is already running");
            return task_id;
        };

        let mut merger = TileMerger::new(sources, target);
        merger.on_duplicate = self.settings.on_duplicate;
        merger.page_size = self.settings.page_size;
        info!(
            "Submitted merge task {task_id}: {} source(s) into {}",
            merger.sources.len(),
            merger.target.display()
        );

        let permits = self.permits.clone();
        self.runtime.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                handle.fail();
                return;
            };
            if let Some(summary) = handle.finish(merger.run(&handle).await) {
                info!(
                    "Merge task {} finished: {} tiles in {}",
                    handle.task_id(),
                    summary.metadata.total_tiles,
                    summary.target.display()
                );
            }
        });
        task_id
    }

    /// Start building the point-of-interest index of `archive`.
    ///
    /// Archives without vector tiles and archives that already have an index
    /// complete immediately with progress `100`.
    pub fn submit_index(&self, archive: PathBuf) -> String {
        let task_id = index_task_id(&archive);
        let Some(handle) = self.register(&task_id, TaskKind::Index) else {
            info!("Index task {task_id} is already running");
            return task_id;
        };

        let mut indexer = PoiIndexer::new(archive);
        indexer.page_size = self.settings.page_size;
        indexer.on_tile_error = self.settings.on_tile_error;

        let permits = self.permits.clone();
        self.runtime.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                handle.fail();
                return;
            };
            let file = indexer.file.display().to_string();
            match handle.finish(indexer.run(&handle).await) {
                Some(PoiIndexOutcome::Built(stats)) if stats.skipped_tiles > 0 => {
                    warn!("{} tiles of {file} could not be decoded", stats.skipped_tiles);
                }
                Some(PoiIndexOutcome::AlreadyIndexed(index)) => {
                    info!("{} already exists, nothing to index", index.display());
                }
                Some(PoiIndexOutcome::NotVector(format)) => {
                    info!(
                        "Skipping POI index of {file}: format {} has no vector features",
                        format.as_deref().unwrap_or("unknown")
                    );
                }
                Some(PoiIndexOutcome::Built(_)) | None => {}
            }
        });
        task_id
    }

    /// Current progress of a task, or `None` if it was never submitted
    #[must_use]
    pub fn progress(&self, task_id: &str) -> Option<i8> {
        self.tasks.get(task_id).map(|entry| entry.progress())
    }

    #[must_use]
    pub fn task(&self, task_id: &str) -> Option<TaskInfo> {
        self.tasks.get(task_id).map(|entry| {
            let progress = entry.progress();
            TaskInfo {
                task_id: task_id.to_string(),
                kind: entry.kind,
                progress,
                status: TaskStatus::from_progress(progress),
            }
        })
    }
}
