//! Error types shared by every stage of a download job.
use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

/// Errors produced while planning, fetching, persisting or merging a job.
#[derive(Error, Debug)]
pub enum DownloadError {
    /// The server did not report a usable size. The job cannot start.
    #[error("Could not determine the size of {url}: {reason}")]
    SizeUnavailable { url: String, reason: String },

    /// The resource cannot be split into the requested number of chunks.
    #[error("Cannot split {size} bytes into {chunks} chunks")]
    InvalidPlan { size: u64, chunks: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Network request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Server returned {status} for range {range}")]
    UnexpectedStatus { status: StatusCode, range: String },

    #[error("Connection closed after {received} of {expected} bytes")]
    ShortBody { received: u64, expected: u64 },

    /// A chunk used its whole retry budget without completing.
    #[error("Chunk {index} failed after {attempts} attempts")]
    ChunkExhausted { index: usize, attempts: u32 },

    #[error("Failed to persist state to {}: {source}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to merge into {}: {reason}", path.display())]
    Merge { path: PathBuf, reason: String },

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DownloadError {
    /// Whether a chunk worker should retry after this error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DownloadError::Transport(_)
                | DownloadError::UnexpectedStatus { .. }
                | DownloadError::ShortBody { .. }
        )
    }
}
