//! Downloading a single chunk.
use crate::error::DownloadError;
use crate::job::RetryPolicy;
use crate::observer::ProgressObserver;
use crate::state::{ChunkRange, ChunkStatus, JobState, StateStore};
use reqwest::StatusCode;
use reqwest::header::RANGE;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Everything one worker needs to fetch its chunk.
#[derive(Clone)]
pub struct ChunkTask {
    pub range: ChunkRange,
    pub url: String,
    /// Client bound to the chunk's proxy, or a direct client.
    pub client: reqwest::Client,
    pub retry: RetryPolicy,
    pub store: Arc<StateStore>,
    pub state: Arc<Mutex<JobState>>,
    pub observer: Arc<dyn ProgressObserver>,
    pub cancel: CancellationToken,
}

enum Fetch {
    Complete,
    Cancelled,
}

/// Downloads one chunk into its part file, retrying transient failures.
///
/// Bytes are only ever appended, starting from whatever is already on disk,
/// so a retry or a later run continues where the last one stopped. Returns
/// the terminal status of the chunk: `Complete`, `Failed` once the retry
/// budget is spent, or `Pending` if the run was cancelled.
pub async fn download_chunk(task: ChunkTask) -> ChunkStatus {
    let index = task.range.index;
    let expected = task.range.length();
    let part = task.store.part_path(index);

    if task.store.part_len(index).await == expected {
        debug!(chunk = index, "Part already complete");
        record(&task, ChunkStatus::Complete).await;
        return ChunkStatus::Complete;
    }

    record(&task, ChunkStatus::InProgress).await;
    let policy = &task.retry;
    let mut attempt = 0;

    for cycle in 0..=policy.cooldown_cycles {
        if cycle > 0 {
            warn!(
                chunk = index,
                cooldown = ?policy.cooldown,
                "Retries exhausted, cooling down before another round"
            );
            task.observer.message(format!(
                "Chunk {} cooling down for {}s",
                index,
                policy.cooldown.as_secs()
            ));
            if !pause(policy.cooldown, &task.cancel).await {
                return stop(&task).await;
            }
        }

        for try_no in 1..=policy.max_retries {
            if task.cancel.is_cancelled() {
                return stop(&task).await;
            }
            attempt += 1;
            if attempt > 1 {
                debug!(chunk = index, attempt, "Retrying chunk");
            }

            match fetch_once(&task, &part, expected).await {
                Ok(Fetch::Complete) => {
                    record(&task, ChunkStatus::Complete).await;
                    info!(chunk = index, attempts = attempt, "Chunk complete");
                    return ChunkStatus::Complete;
                }
                Ok(Fetch::Cancelled) => return stop(&task).await,
                Err(e) if !e.is_transient() => {
                    error!(chunk = index, error = %e, "Chunk failed");
                    record(&task, ChunkStatus::Failed).await;
                    return ChunkStatus::Failed;
                }
                Err(e) => {
                    record(&task, ChunkStatus::InProgress).await;
                    if try_no == policy.max_retries {
                        warn!(chunk = index, attempt, error = %e, "Attempt failed");
                        continue;
                    }
                    let delay = policy.backoff.delay(try_no);
                    warn!(chunk = index, attempt, error = %e, ?delay, "Attempt failed, retrying");
                    task.observer
                        .message(format!("Error: {}. Retrying in {:?}...", e, delay));
                    if !pause(delay, &task.cancel).await {
                        return stop(&task).await;
                    }
                }
            }
        }
    }

    let exhausted = DownloadError::ChunkExhausted {
        index,
        attempts: attempt,
    };
    error!(chunk = index, "{}", exhausted);
    record(&task, ChunkStatus::Failed).await;
    ChunkStatus::Failed
}

/// One ranged request, appending the body to the part file.
async fn fetch_once(task: &ChunkTask, part: &Path, expected: u64) -> Result<Fetch, DownloadError> {
    let offset = task.store.part_len(task.range.index).await;
    if offset >= expected {
        return Ok(Fetch::Complete);
    }
    let remaining = expected - offset;
    let from = task.range.start + offset;
    let range_header = format!("bytes={}-{}", from, task.range.end);

    let request = task.client.get(&task.url).header(RANGE, &range_header).send();
    let mut response = tokio::select! {
        _ = task.cancel.cancelled() => return Ok(Fetch::Cancelled),
        response = request => response?,
    };

    // A plain 200 carries the whole resource, which only lines up with the
    // part file when we asked for the first byte.
    let status = response.status();
    if status != StatusCode::PARTIAL_CONTENT && !(status == StatusCode::OK && from == 0) {
        return Err(DownloadError::UnexpectedStatus {
            status,
            range: range_header,
        });
    }

    let file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(part)
        .await?;
    let mut writer = BufWriter::new(file);
    let mut received = 0u64;

    let result = loop {
        let next = tokio::select! {
            _ = task.cancel.cancelled() => break Ok(false),
            next = response.chunk() => next,
        };

        match next {
            Ok(Some(bytes)) => {
                let take = (bytes.len() as u64).min(remaining - received) as usize;
                if let Err(e) = writer.write_all(&bytes[..take]).await {
                    break Err(DownloadError::Io(e));
                }
                received += take as u64;
                task.observer.inc(take as u64);
                if received == remaining {
                    break Ok(true);
                }
            }
            Ok(None) => break Ok(true),
            Err(e) => break Err(DownloadError::Transport(e)),
        }
    };

    // Whatever arrived stays on disk for the next attempt
    writer.flush().await?;

    match result? {
        false => Ok(Fetch::Cancelled),
        true if received == remaining => Ok(Fetch::Complete),
        true => Err(DownloadError::ShortBody {
            received: offset + received,
            expected,
        }),
    }
}

/// Writes the chunk's on-disk progress and status into the shared state and
/// persists it. Persist failures are logged; the next save retries.
async fn record(task: &ChunkTask, status: ChunkStatus) {
    let index = task.range.index;
    let on_disk = task.store.part_len(index).await;

    let mut locked_state = task.state.lock().await;
    if let Some(c) = locked_state.chunks.get_mut(index) {
        c.bytes_written = on_disk.min(task.range.length());
        c.status = status;
    }
    if let Err(e) = task.store.save(&locked_state).await {
        warn!(chunk = index, error = %e, "Could not persist state, keeping it in memory");
    }
}

async fn stop(task: &ChunkTask) -> ChunkStatus {
    debug!(chunk = task.range.index, "Chunk cancelled");
    record(task, ChunkStatus::Pending).await;
    ChunkStatus::Pending
}

/// Sleeps for `delay`, returning false if cancelled first.
async fn pause(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = sleep(delay) => true,
        _ = cancel.cancelled() => false,
    }
}
