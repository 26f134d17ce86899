//! Build job controller.
//!
//! Serializes index builds for one workspace root. Builds are queued FIFO
//! and executed one at a time by a spawned worker loop, which is woken
//! through an mpsc command channel. Every state transition is published on
//! a broadcast channel.
//!
//! ```text
//! enqueue ──▶ queued ──▶ running ──▶ ok | error | canceled
//!               │           │
//!               │ cancel    │ cancel
//!               ▼           ▼
//!           canceled    canceling ──▶ canceled | error | ok
//! ```
//!
//! Canceling a running job fires its [`CancellationToken`]; the builder
//! observes it between files, before each embedding batch and before
//! persisting. A build that already persisted when the token fired still
//! finishes `ok`.
//!
//! The controller is runner-agnostic: anything implementing
//! [`BuildRunner`] can be scheduled. [`IndexBuildRunner`] wraps
//! [`build_index`](crate::builder::build_index).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::builder::{build_index, BuildContext};
use crate::config::{BuildConfig, Config};
use crate::error::{RecallError, Result};
use crate::models::IndexMeta;
use crate::progress::BuildProgress;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Canceling,
    Ok,
    Error,
    Canceled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Ok | JobStatus::Error | JobStatus::Canceled)
    }
}

/// Counts of a successful build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildSummary {
    pub item_count: usize,
    pub reused_files: usize,
    pub reused_items: usize,
    pub embedded_items: usize,
    pub skipped_files: usize,
}

impl From<&IndexMeta> for BuildSummary {
    fn from(meta: &IndexMeta) -> Self {
        Self {
            item_count: meta.item_count,
            reused_files: meta.reused_files,
            reused_items: meta.reused_items,
            embedded_items: meta.embedded_items,
            skipped_files: meta.skipped_files,
        }
    }
}

/// A build job and its current state. Returned by value as a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Uuid,
    pub status: JobStatus,
    pub params: BuildConfig,
    pub reason: String,
    pub progress: Option<BuildProgress>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub summary: Option<BuildSummary>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobStatusView {
    pub active: Option<Job>,
    pub queued: Vec<Job>,
    /// Oldest first, capped at `jobs.history_limit`.
    pub history: Vec<Job>,
}

/// Published on every job state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    Updated { job: Job },
    Progress { id: Uuid, progress: BuildProgress },
}

/// Executes one build. The context carries the job's cancellation token
/// and progress channel.
#[async_trait]
pub trait BuildRunner: Send + Sync {
    async fn run(&self, root: &Path, params: &BuildConfig, ctx: BuildContext) -> Result<BuildSummary>;
}

/// Runs [`build_index`] with the workspace configuration, overriding the
/// `[build]` section with the job's parameters.
pub struct IndexBuildRunner {
    config: Config,
}

impl IndexBuildRunner {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BuildRunner for IndexBuildRunner {
    async fn run(&self, root: &Path, params: &BuildConfig, ctx: BuildContext) -> Result<BuildSummary> {
        let mut config = self.config.clone();
        config.build = params.clone();
        let (meta, _) = build_index(root, &config, &ctx).await?;
        Ok(BuildSummary::from(&meta))
    }
}

enum Command {
    Wake,
    Shutdown,
}

struct ActiveJob {
    job: Job,
    cancel: CancellationToken,
}

#[derive(Default)]
struct State {
    active: Option<ActiveJob>,
    queued: VecDeque<Job>,
    history: VecDeque<Job>,
    closed: bool,
}

struct Shared {
    state: Mutex<State>,
    event_tx: broadcast::Sender<JobEvent>,
    history_limit: usize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, job: &Job) {
        let _ = self.event_tx.send(JobEvent::Updated { job: job.clone() });
    }

    fn retire(&self, state: &mut State, job: Job) {
        state.history.push_back(job);
        while state.history.len() > self.history_limit {
            state.history.pop_front();
        }
    }
}

struct Inner {
    shared: Arc<Shared>,
    command_tx: mpsc::UnboundedSender<Command>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Queue and worker for the builds of one workspace root.
#[derive(Clone)]
pub struct JobController {
    inner: Arc<Inner>,
}

impl JobController {
    /// Spawn the worker loop. Must be called inside a tokio runtime.
    pub fn start(root: impl Into<PathBuf>, config: &Config, runner: Arc<dyn BuildRunner>) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(256);
        let shared = Arc::new(Shared {
            state: Mutex::new(State::default()),
            event_tx,
            history_limit: config.jobs.history_limit.max(1),
        });

        let worker = tokio::spawn(worker_loop(
            root.into(),
            runner,
            shared.clone(),
            command_rx,
        ));

        Self {
            inner: Arc::new(Inner {
                shared,
                command_tx,
                worker: Mutex::new(Some(worker)),
            }),
        }
    }

    /// Controller running real index builds with `config`.
    pub fn for_workspace(root: impl Into<PathBuf>, config: &Config) -> Self {
        let runner = Arc::new(IndexBuildRunner::new(config.clone()));
        Self::start(root, config, runner)
    }

    /// Append a build to the queue. After [`shutdown`](Self::shutdown) the
    /// job is recorded as canceled right away.
    pub fn enqueue(&self, params: BuildConfig, reason: impl Into<String>) -> Job {
        let shared = &self.inner.shared;
        let mut job = Job {
            id: Uuid::new_v4(),
            status: JobStatus::Queued,
            params,
            reason: reason.into(),
            progress: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
            summary: None,
        };

        let mut state = shared.lock();
        if state.closed {
            job.status = JobStatus::Canceled;
            job.finished_at = Some(Utc::now());
            shared.retire(&mut state, job.clone());
            drop(state);
            shared.publish(&job);
            return job;
        }
        state.queued.push_back(job.clone());
        drop(state);

        tracing::info!(job = %job.id, reason = %job.reason, "build job queued");
        shared.publish(&job);
        let _ = self.inner.command_tx.send(Command::Wake);
        job
    }

    pub fn status(&self) -> JobStatusView {
        let state = self.inner.shared.lock();
        JobStatusView {
            active: state.active.as_ref().map(|a| a.job.clone()),
            queued: state.queued.iter().cloned().collect(),
            history: state.history.iter().cloned().collect(),
        }
    }

    /// Look a job up: active first, then queued, then history.
    pub fn get_job(&self, id: Uuid) -> Option<Job> {
        let state = self.inner.shared.lock();
        find_job(&state, id)
    }

    /// Cancel a job. Returns the updated snapshot, or `None` for an unknown id.
    /// Terminal jobs are returned unchanged.
    pub fn cancel(&self, id: Uuid) -> Option<Job> {
        let shared = &self.inner.shared;
        let mut state = shared.lock();

        if let Some(active) = state.active.as_mut().filter(|a| a.job.id == id) {
            if active.job.status == JobStatus::Running {
                active.job.status = JobStatus::Canceling;
                active.cancel.cancel();
                tracing::info!(job = %id, "canceling running build");
                shared.publish(&active.job);
            }
            return Some(active.job.clone());
        }

        if let Some(pos) = state.queued.iter().position(|j| j.id == id) {
            let mut job = state.queued.remove(pos)?;
            job.status = JobStatus::Canceled;
            job.finished_at = Some(Utc::now());
            shared.retire(&mut state, job.clone());
            drop(state);
            tracing::info!(job = %id, "canceled queued build");
            shared.publish(&job);
            return Some(job);
        }

        state.history.iter().find(|j| j.id == id).cloned()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.shared.event_tx.subscribe()
    }

    /// Resolve once job `id` is terminal. `None` for an unknown id.
    pub async fn wait(&self, id: Uuid) -> Option<Job> {
        let mut rx = self.subscribe();
        loop {
            let job = self.get_job(id)?;
            if job.status.is_terminal() {
                return Some(job);
            }
            match rx.recv().await {
                Ok(JobEvent::Updated { job }) if job.id == id && job.status.is_terminal() => {
                    return Some(job)
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return self.get_job(id),
            }
        }
    }

    /// Cancel everything, stop the worker and wait for it to exit.
    pub async fn shutdown(&self) {
        self.close();
        let handle = self
            .inner
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "job worker exited abnormally");
            }
        }
    }

    fn close(&self) {
        let shared = &self.inner.shared;
        let mut state = shared.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        let mut canceled = Vec::new();
        while let Some(mut job) = state.queued.pop_front() {
            job.status = JobStatus::Canceled;
            job.finished_at = Some(Utc::now());
            shared.retire(&mut state, job.clone());
            canceled.push(job);
        }
        if let Some(active) = state.active.as_mut() {
            active.job.status = JobStatus::Canceling;
            active.cancel.cancel();
            canceled.push(active.job.clone());
        }
        drop(state);

        for job in &canceled {
            shared.publish(job);
        }
        let _ = self.inner.command_tx.send(Command::Shutdown);
    }
}

impl Drop for JobController {
    fn drop(&mut self) {
        if Arc::strong_count(&self.inner) == 1 {
            self.close();
        }
    }
}

fn find_job(state: &State, id: Uuid) -> Option<Job> {
    if let Some(active) = state.active.as_ref().filter(|a| a.job.id == id) {
        return Some(active.job.clone());
    }
    state
        .queued
        .iter()
        .chain(state.history.iter())
        .find(|j| j.id == id)
        .cloned()
}

async fn worker_loop(
    root: PathBuf,
    runner: Arc<dyn BuildRunner>,
    shared: Arc<Shared>,
    mut command_rx: mpsc::UnboundedReceiver<Command>,
) {
    while let Some(command) = command_rx.recv().await {
        if matches!(command, Command::Shutdown) {
            break;
        }
        while let Some((job, cancel)) = next_job(&shared) {
            run_job(&root, &runner, &shared, job, cancel).await;
        }
    }
    tracing::debug!("job worker stopped");
}

fn next_job(shared: &Shared) -> Option<(Job, CancellationToken)> {
    let mut state = shared.lock();
    if state.closed || state.active.is_some() {
        return None;
    }
    let mut job = state.queued.pop_front()?;
    job.status = JobStatus::Running;
    job.started_at = Some(Utc::now());
    let cancel = CancellationToken::new();
    state.active = Some(ActiveJob {
        job: job.clone(),
        cancel: cancel.clone(),
    });
    drop(state);
    shared.publish(&job);
    Some((job, cancel))
}

async fn run_job(
    root: &Path,
    runner: &Arc<dyn BuildRunner>,
    shared: &Arc<Shared>,
    job: Job,
    cancel: CancellationToken,
) {
    tracing::info!(job = %job.id, reason = %job.reason, "build job started");

    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<BuildProgress>();
    let drain_shared = shared.clone();
    let job_id = job.id;
    let drain = tokio::spawn(async move {
        while let Some(progress) = progress_rx.recv().await {
            {
                let mut state = drain_shared.lock();
                if let Some(active) = state.active.as_mut().filter(|a| a.job.id == job_id) {
                    active.job.progress = Some(progress.clone());
                }
            }
            let _ = drain_shared.event_tx.send(JobEvent::Progress {
                id: job_id,
                progress,
            });
        }
    });

    let ctx = BuildContext::new(cancel).with_progress(progress_tx);
    // The runner gets its own task so a panic cannot take the worker down.
    let task_runner = runner.clone();
    let task_root = root.to_path_buf();
    let params = job.params.clone();
    let result = match tokio::spawn(async move { task_runner.run(&task_root, &params, ctx).await })
        .await
    {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(job = %job_id, error = %e, "build task aborted");
            Err(RecallError::Job(e.to_string()))
        }
    };
    let _ = drain.await;

    let mut state = shared.lock();
    let mut finished = match state.active.take() {
        Some(active) if active.job.id == job_id => active.job,
        other => {
            state.active = other;
            job
        }
    };
    finished.finished_at = Some(Utc::now());
    match result {
        Ok(summary) => {
            finished.status = JobStatus::Ok;
            tracing::info!(job = %job_id, items = summary.item_count, embedded = summary.embedded_items, "build job finished");
            finished.summary = Some(summary);
        }
        Err(e) if e.is_canceled() => {
            finished.status = JobStatus::Canceled;
            tracing::info!(job = %job_id, "build job canceled");
        }
        Err(e) => {
            finished.status = JobStatus::Error;
            tracing::warn!(job = %job_id, error = %e, "build job failed");
            finished.error = Some(e.to_string());
        }
    }
    shared.retire(&mut state, finished.clone());
    drop(state);
    shared.publish(&finished);
}
