//! # chunkfetch Download Library
//!
//! `chunkfetch` downloads a file as a set of byte ranges fetched in parallel.
//! It supports:
//! - Deterministic chunk planning
//! - Resuming interrupted downloads from per-chunk part files
//! - Retries with backoff and a bounded cooldown round
//! - Round-robin proxy assignment with reachability checks
//! - Streaming merge of the parts into the final file
//!
//! ## Example Usage
//!
//! ```no_run
//! use chunkfetch::{DownloadJob, Downloader};
//!
//! # async fn run() -> Result<(), chunkfetch::DownloadError> {
//! let job = DownloadJob::new("https://example.com/big.iso", "big.iso").with_chunks(8);
//! let outcome = Downloader::new(job).run().await?;
//! println!("{:?}", outcome);
//! # Ok(())
//! # }
//! ```

pub mod args;
pub mod config;
pub mod downloader;
pub mod error;
pub mod job;
pub mod merge;
pub mod notify;
pub mod observer;
pub mod planner;
pub mod probe;
pub mod proxy;
pub mod state;
pub mod utils;
pub mod worker;

pub use args::Args;
pub use downloader::{Downloader, JobOutcome, JobPhase};
pub use error::DownloadError;
pub use job::{Backoff, DownloadJob, RetryPolicy};
pub use state::{ChunkRange, ChunkStatus, JobState, StateStore};
pub use worker::download_chunk;
