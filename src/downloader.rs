//! Job orchestration.
//!
//! A job moves through `Planning -> Running -> Merging -> Done`, or ends in
//! `PartiallyFailed` when some chunk could not be finished. Partial failures
//! keep every temporary file and the state sidecar so the next run only
//! fetches what is missing.
use crate::error::DownloadError;
use crate::job::DownloadJob;
use crate::merge;
use crate::notify::{CompletionEvent, LogNotifier, Notifier};
use crate::observer::{NoopObserver, ProgressObserver};
use crate::planner::plan_chunks;
use crate::probe;
use crate::proxy;
use crate::state::{ChunkStatus, JobState, StateStore};
use crate::utils;
use crate::worker::{self, ChunkTask};
use futures_util::future::join_all;
use reqwest::Client;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Planning,
    Running,
    Merging,
    Done,
    PartiallyFailed,
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobPhase::Planning => "planning",
            JobPhase::Running => "running",
            JobPhase::Merging => "merging",
            JobPhase::Done => "done",
            JobPhase::PartiallyFailed => "partially failed",
        };
        f.write_str(name)
    }
}

/// Final state of a run that did not hit a fatal error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Every chunk was fetched and merged into `path`.
    Done { path: PathBuf, size: u64 },
    /// Some chunks are still missing; a later run resumes them.
    PartiallyFailed {
        unfinished: Vec<usize>,
        cancelled: bool,
    },
}

impl JobOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, JobOutcome::Done { .. })
    }
}

/// Runs a [`DownloadJob`] with injected progress and notification collaborators.
pub struct Downloader {
    job: DownloadJob,
    observer: Arc<dyn ProgressObserver>,
    notifier: Arc<dyn Notifier>,
    cancel: CancellationToken,
}

impl Downloader {
    pub fn new(job: DownloadJob) -> Self {
        Self {
            job,
            observer: Arc::new(NoopObserver),
            notifier: Arc::new(LogNotifier),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn job(&self) -> &DownloadJob {
        &self.job
    }

    /// Runs the job to completion and notifies the notifier exactly once,
    /// whatever the result.
    pub async fn run(&self) -> Result<JobOutcome, DownloadError> {
        let name = self
            .job
            .output_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.job.url.clone());

        let result = self.execute().await;

        let event = match &result {
            Ok(outcome) => CompletionEvent::from_outcome(&name, outcome),
            Err(e) => {
                error!(error = %e, "Download aborted");
                CompletionEvent::from_error(&name, e)
            }
        };
        self.notifier.notify(&event);

        result
    }

    async fn execute(&self) -> Result<JobOutcome, DownloadError> {
        let job = &self.job;
        validate_job(job)?;

        enter(JobPhase::Planning);
        if let Some(parent) = job.output_path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let client = utils::build_client(job, None)?;
        let store = Arc::new(StateStore::new(&job.output_path));
        let state = prepare_download(job, &client, &store).await?;

        enter(JobPhase::Running);
        self.observer.start(state.size, state.bytes_on_disk());
        let resume = state.resume_set();
        info!(
            total = state.chunks.len(),
            pending = resume.len(),
            "Starting chunk workers"
        );

        let shared_state = Arc::new(Mutex::new(state));
        self.run_chunks(&resume, &client, &store, &shared_state)
            .await;

        let state = {
            let mut locked_state = shared_state.lock().await;
            for chunk in locked_state.chunks.iter_mut() {
                if chunk.status == ChunkStatus::InProgress {
                    chunk.status = ChunkStatus::Failed;
                }
            }
            persist(&store, &locked_state).await;
            locked_state.clone()
        };

        let unfinished = state.resume_set();
        if !unfinished.is_empty() {
            enter(JobPhase::PartiallyFailed);
            warn!(unfinished = ?unfinished, "Some chunks did not finish");
            return Ok(JobOutcome::PartiallyFailed {
                unfinished,
                cancelled: self.cancel.is_cancelled(),
            });
        }

        enter(JobPhase::Merging);
        let size = merge::merge_parts(&state, &store).await?;
        self.observer.finish();

        enter(JobPhase::Done);
        Ok(JobOutcome::Done {
            path: job.output_path.clone(),
            size,
        })
    }

    /// Spawns one worker per pending chunk and waits for all of them.
    async fn run_chunks(
        &self,
        resume: &[usize],
        direct: &Client,
        store: &Arc<StateStore>,
        shared_state: &Arc<Mutex<JobState>>,
    ) {
        let job = &self.job;
        if resume.is_empty() {
            return;
        }

        let verdicts = if job.proxies.is_enabled() {
            proxy::validate_pool(job, resume).await
        } else {
            HashMap::new()
        };
        let mut clients: HashMap<String, Client> = HashMap::new();

        let ranges: Vec<_> = {
            let locked_state = shared_state.lock().await;
            resume
                .iter()
                .filter_map(|&i| locked_state.chunks.get(i).map(|c| c.range))
                .collect()
        };

        let mut indices = Vec::new();
        let mut tasks = Vec::new();

        for range in ranges {
            let index = range.index;
            let client = match job.proxies.assign(index) {
                None => direct.clone(),
                Some(endpoint) => {
                    if !verdicts.get(endpoint).copied().unwrap_or(false) {
                        warn!(chunk = index, proxy = endpoint, "Proxy unavailable, skipping chunk");
                        continue;
                    }
                    match clients.get(endpoint) {
                        Some(c) => c.clone(),
                        None => match utils::build_client(job, Some(endpoint)) {
                            Ok(c) => {
                                clients.insert(endpoint.to_string(), c.clone());
                                c
                            }
                            Err(e) => {
                                warn!(chunk = index, proxy = endpoint, error = %e, "Bad proxy, skipping chunk");
                                continue;
                            }
                        },
                    }
                }
            };

            let task = ChunkTask {
                range,
                url: job.url.clone(),
                client,
                retry: job.retry.clone(),
                store: store.clone(),
                state: shared_state.clone(),
                observer: self.observer.clone(),
                cancel: self.cancel.clone(),
            };
            indices.push(index);
            tasks.push(tokio::spawn(worker::download_chunk(task)));
        }

        let results = join_all(tasks).await;
        for (index, result) in indices.into_iter().zip(results) {
            match result {
                Ok(status) => info!(chunk = index, status = ?status, "Worker finished"),
                Err(e) => error!(chunk = index, error = %e, "Worker task panicked"),
            }
        }
    }
}

/// Loads a resumable state for the job or plans a fresh one.
///
/// This consolidates the logic for:
/// 1. Reusing a sidecar that matches the URL and chunk count, optionally
///    re-probing the server to make sure the resource did not change.
/// 2. Otherwise probing the size, planning chunks and dropping stale parts.
/// 3. Reconciling the result with the part files on disk.
pub async fn prepare_download(
    job: &DownloadJob,
    client: &Client,
    store: &StateStore,
) -> Result<JobState, DownloadError> {
    let previous = store.load().await;
    let stale_parts = previous.as_ref().map_or(0, |s| s.chunks.len());

    if let Some(mut state) = previous
        && state.url == job.url
        && state.chunks.len() == job.chunks
    {
        if !job.revalidate_on_resume || still_current(&state, client).await? {
            store.reconcile(&mut state).await?;
            persist(store, &state).await;
            info!(
                on_disk = state.bytes_on_disk(),
                size = state.size,
                "Resuming download"
            );
            return Ok(state);
        }
        warn!(url = %job.url, "Remote resource changed since the last run, starting over");
    }

    let remote = probe::probe(client, &job.url).await?;
    let ranges = plan_chunks(remote.size, job.chunks)?;
    if !remote.accepts_ranges && job.chunks > 1 {
        warn!(url = %job.url, "Server does not advertise byte ranges");
    }
    info!(size = remote.size, chunks = job.chunks, "Planned new download");

    store.discard_parts(stale_parts.max(job.chunks)).await?;
    let mut state = JobState::new(&job.url, remote.size, remote.validator, ranges);
    store.reconcile(&mut state).await?;
    persist(store, &state).await;

    Ok(state)
}

async fn still_current(state: &JobState, client: &Client) -> Result<bool, DownloadError> {
    let remote = probe::probe(client, &state.url).await?;
    let validator_matches = match (&state.validator, &remote.validator) {
        (Some(old), Some(new)) => old == new,
        _ => true,
    };
    Ok(remote.size == state.size && validator_matches)
}

fn validate_job(job: &DownloadJob) -> Result<(), DownloadError> {
    if url::Url::parse(&job.url).is_err() {
        return Err(DownloadError::InvalidConfig(format!(
            "'{}' is not a valid URL",
            job.url
        )));
    }
    if job.chunks == 0 {
        return Err(DownloadError::InvalidPlan {
            size: 0,
            chunks: 0,
        });
    }
    if job.retry.max_retries == 0 {
        return Err(DownloadError::InvalidConfig(
            "max_retries must be at least 1".into(),
        ));
    }
    if job.proxies.is_enabled() && job.proxies.endpoints().is_empty() {
        return Err(DownloadError::InvalidConfig(
            "proxy mode is enabled but no proxies are configured".into(),
        ));
    }
    Ok(())
}

async fn persist(store: &StateStore, state: &JobState) {
    if let Err(e) = store.save(state).await {
        warn!(error = %e, "Could not persist state, keeping it in memory");
    }
}

fn enter(phase: JobPhase) {
    info!(phase = %phase, "Job phase");
}
