//! Per-run job configuration.
use crate::proxy::ProxyPool;
use std::path::PathBuf;
use std::time::Duration;

/// How long to wait between failed attempts of the same chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Always wait the same delay.
    Fixed(Duration),
    /// Wait `base * 2^attempt`, never more than `max`.
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    /// Delay to apply after the given (1-based) failed attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, max } => {
                let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
                base.checked_mul(factor).unwrap_or(max).min(max)
            }
        }
    }
}

/// Retry budget of a single chunk.
///
/// A chunk gets `max_retries` attempts per cycle. When a cycle is used up the
/// worker waits `cooldown` and starts another one, at most `cooldown_cycles`
/// times, before the chunk is reported as failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Backoff,
    pub cooldown: Duration,
    pub cooldown_cycles: u32,
}

impl RetryPolicy {
    /// Upper bound on attempts a chunk can make in one run.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_mul(self.cooldown_cycles.saturating_add(1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff: Backoff::Exponential {
                base: Duration::from_secs(1),
                max: Duration::from_secs(60),
            },
            cooldown: Duration::from_secs(6 * 60),
            cooldown_cycles: 1,
        }
    }
}

/// Reachability check used to validate proxies before a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyCheck {
    pub enabled: bool,
    pub url: String,
    pub timeout: Duration,
}

impl Default for ProxyCheck {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "https://www.gstatic.com/generate_204".to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Everything a single download run needs to know.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub url: String,
    pub output_path: PathBuf,
    /// Number of chunks, which is also the maximum parallelism.
    pub chunks: usize,
    pub proxies: ProxyPool,
    pub proxy_check: ProxyCheck,
    pub retry: RetryPolicy,
    pub verify_tls: bool,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// Re-probe the server on resume and start over if the resource changed.
    pub revalidate_on_resume: bool,
    pub user_agent: String,
}

impl DownloadJob {
    pub fn new(url: impl Into<String>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            output_path: output_path.into(),
            chunks: 6,
            proxies: ProxyPool::default(),
            proxy_check: ProxyCheck::default(),
            retry: RetryPolicy::default(),
            verify_tls: true,
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
            revalidate_on_resume: false,
            user_agent: concat!("chunkfetch/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }

    pub fn with_chunks(mut self, chunks: usize) -> Self {
        self.chunks = chunks;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_proxies(mut self, proxies: ProxyPool) -> Self {
        self.proxies = proxies;
        self
    }
}
