//! Background task manager.
//!
//! Long-running transfers (uploads, cross-storage copies) run as tasks with
//! a bounded number of concurrent workers. Each task carries a cancellation
//! token and a progress value; finished tasks move to a bounded history.
//!
//! Cancellation is cooperative once a task is running: work receives a
//! [`TaskContext`] and is expected to watch its token. A task cancelled
//! while still waiting for a worker never starts.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use strum::Display;
use tokio::sync::{Notify, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::vfs::{FsError, FsResult, UpdateProgress};

/// Lifecycle of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Canceled,
    Errored(String),
}

impl TaskState {
    pub fn is_done(&self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Canceled | TaskState::Errored(_)
        )
    }
}

/// Snapshot of a task for reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: u64,
    pub name: String,
    pub state: TaskState,
    /// Percent complete, 0 to 100.
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct Status {
    state: TaskState,
    progress: f64,
}

struct TaskEntry {
    id: u64,
    name: String,
    token: CancellationToken,
    status: Mutex<Status>,
    finished: Notify,
}

impl TaskEntry {
    fn state(&self) -> TaskState {
        self.status.lock().state.clone()
    }

    fn set_state(&self, state: TaskState) {
        let mut status = self.status.lock();
        if state == TaskState::Succeeded {
            status.progress = 100.0;
        }
        status.state = state;
    }

    fn info(&self) -> TaskInfo {
        let status = self.status.lock();
        let error = match &status.state {
            TaskState::Errored(e) => Some(e.clone()),
            _ => None,
        };
        TaskInfo {
            id: self.id,
            name: self.name.clone(),
            state: status.state.clone(),
            progress: status.progress,
            error,
        }
    }
}

/// Handle given to running work.
#[derive(Clone)]
pub struct TaskContext {
    entry: Arc<TaskEntry>,
}

impl TaskContext {
    pub fn id(&self) -> u64 {
        self.entry.id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.entry.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.entry.token.is_cancelled()
    }

    pub fn set_progress(&self, progress: f64) {
        self.entry.status.lock().progress = progress.clamp(0.0, 100.0);
    }

    /// Progress callback suitable for handing to a driver.
    pub fn progress_fn(&self) -> UpdateProgress {
        let ctx = self.clone();
        Arc::new(move |p| ctx.set_progress(p))
    }
}

struct Inner {
    name: String,
    next_id: AtomicU64,
    workers: Arc<Semaphore>,
    tasks: dashmap::DashMap<u64, Arc<TaskEntry>>,
    done: Mutex<VecDeque<TaskInfo>>,
    max_done: usize,
    shutdown: CancellationToken,
}

impl Inner {
    fn finish(&self, entry: &TaskEntry, state: TaskState) {
        match &state {
            TaskState::Errored(e) => warn!(manager = %self.name, id = entry.id, task = %entry.name, error = %e, "task failed"),
            state => debug!(manager = %self.name, id = entry.id, task = %entry.name, %state, "task finished"),
        }
        entry.set_state(state);

        {
            let mut done = self.done.lock();
            done.push_back(entry.info());
            while done.len() > self.max_done {
                done.pop_front();
            }
        }
        self.tasks.remove(&entry.id);
        entry.finished.notify_waiters();
    }
}

/// Runs tasks with a fixed number of workers.
///
/// Cheap to clone; clones share the same queue and history.
#[derive(Clone)]
pub struct TaskManager {
    inner: Arc<Inner>,
}

impl TaskManager {
    /// Default number of finished tasks kept for reporting.
    pub const DEFAULT_MAX_DONE: usize = 100;

    pub fn new(name: impl Into<String>, workers: usize, max_done: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                next_id: AtomicU64::new(0),
                workers: Arc::new(Semaphore::new(workers.max(1))),
                tasks: dashmap::DashMap::new(),
                done: Mutex::new(VecDeque::new()),
                max_done,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Queue `work` and return its task id.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit<F>(&self, name: impl Into<String>, work: F) -> FsResult<u64>
    where
        F: FnOnce(TaskContext) -> BoxFuture<'static, FsResult<()>> + Send + 'static,
    {
        if self.inner.shutdown.is_cancelled() {
            return Err(FsError::other(format!("{} tasks are shut down", self.inner.name)));
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let entry = Arc::new(TaskEntry {
            id,
            name: name.into(),
            token: self.inner.shutdown.child_token(),
            status: Mutex::new(Status {
                state: TaskState::Pending,
                progress: 0.0,
            }),
            finished: Notify::new(),
        });
        self.inner.tasks.insert(id, Arc::clone(&entry));
        debug!(manager = %self.inner.name, id, task = %entry.name, "task queued");

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let permit = tokio::select! {
                biased;
                _ = entry.token.cancelled() => None,
                permit = Arc::clone(&inner.workers).acquire_owned() => permit.ok(),
            };
            let state = match permit {
                None => TaskState::Canceled,
                Some(_permit) => {
                    entry.set_state(TaskState::Running);
                    let ctx = TaskContext {
                        entry: Arc::clone(&entry),
                    };
                    match work(ctx).await {
                        Ok(()) => TaskState::Succeeded,
                        Err(e) if e.is_canceled() => TaskState::Canceled,
                        Err(e) => TaskState::Errored(e.to_string()),
                    }
                }
            };
            inner.finish(&entry, state);
        });
        Ok(id)
    }

    /// Look up a task, running or finished.
    pub fn get(&self, id: u64) -> Option<TaskInfo> {
        if let Some(entry) = self.inner.tasks.get(&id) {
            return Some(entry.info());
        }
        self.inner.done.lock().iter().find(|t| t.id == id).cloned()
    }

    /// Request cancellation of an unfinished task.
    pub fn cancel(&self, id: u64) -> FsResult<()> {
        let entry = self
            .inner
            .tasks
            .get(&id)
            .map(|e| Arc::clone(e.value()))
            .ok_or(FsError::TaskNotFound(id))?;
        entry.token.cancel();
        Ok(())
    }

    pub fn list_undone(&self) -> Vec<TaskInfo> {
        let mut tasks: Vec<TaskInfo> = self.inner.tasks.iter().map(|e| e.info()).collect();
        tasks.sort_by_key(|t| t.id);
        tasks
    }

    pub fn list_done(&self) -> Vec<TaskInfo> {
        self.inner.done.lock().iter().cloned().collect()
    }

    pub fn clear_done(&self) {
        self.inner.done.lock().clear();
    }

    pub fn clear_succeeded(&self) {
        self.inner
            .done
            .lock()
            .retain(|t| t.state != TaskState::Succeeded);
    }

    /// Forget a finished task.
    pub fn remove(&self, id: u64) -> FsResult<()> {
        if self.inner.tasks.contains_key(&id) {
            return Err(FsError::TaskRunning(id));
        }
        let mut done = self.inner.done.lock();
        let before = done.len();
        done.retain(|t| t.id != id);
        if done.len() == before {
            return Err(FsError::TaskNotFound(id));
        }
        Ok(())
    }

    /// Wait for a task to finish and return its final snapshot.
    pub async fn wait(&self, id: u64) -> FsResult<TaskInfo> {
        let entry = self.inner.tasks.get(&id).map(|e| Arc::clone(e.value()));
        let Some(entry) = entry else {
            return self.get(id).ok_or(FsError::TaskNotFound(id));
        };
        loop {
            let finished = entry.finished.notified();
            if entry.state().is_done() {
                return Ok(entry.info());
            }
            finished.await;
        }
    }

    /// Cancel every task and refuse new ones.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }
}
