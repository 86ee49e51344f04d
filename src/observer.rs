//! Progress reporting.
//!
//! Workers report byte deltas through [`ProgressObserver`]. Implementations
//! are shared by every chunk task of a job, so they must tolerate concurrent
//! calls.
use indicatif::ProgressBar;
use std::sync::atomic::{AtomicU64, Ordering};

pub trait ProgressObserver: Send + Sync {
    /// Called once before workers start, with the bytes already on disk.
    fn start(&self, _total: u64, _completed: u64) {}
    fn inc(&self, delta: u64);
    fn message(&self, msg: String);
    fn finish(&self);
}

/// Renders progress with an `indicatif` bar.
pub struct ConsoleObserver {
    pub pb: ProgressBar,
}

impl ProgressObserver for ConsoleObserver {
    fn start(&self, total: u64, completed: u64) {
        self.pb.set_length(total);
        self.pb.set_position(completed);
    }

    fn inc(&self, delta: u64) {
        self.pb.inc(delta);
    }

    fn message(&self, msg: String) {
        self.pb.set_message(msg);
    }

    fn finish(&self) {
        self.pb.finish();
    }
}

/// Discards everything.
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn inc(&self, _delta: u64) {}
    fn message(&self, _msg: String) {}
    fn finish(&self) {}
}

/// Counts bytes with an atomic counter. Useful for headless runs and tests.
#[derive(Default)]
pub struct CountingObserver {
    total: AtomicU64,
    received: AtomicU64,
}

impl CountingObserver {
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

impl ProgressObserver for CountingObserver {
    fn start(&self, total: u64, completed: u64) {
        self.total.store(total, Ordering::Relaxed);
        self.received.store(completed, Ordering::Relaxed);
    }

    fn inc(&self, delta: u64) {
        self.received.fetch_add(delta, Ordering::Relaxed);
    }

    fn message(&self, _msg: String) {}

    fn finish(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn counting_observer_sums_concurrent_deltas() {
        let observer = Arc::new(CountingObserver::default());
        observer.start(4000, 1000);

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let obs = observer.clone();
                tokio::spawn(async move {
                    for _ in 0..75 {
                        obs.inc(10);
                    }
                })
            })
            .collect();
        for t in tasks {
            t.await.unwrap();
        }

        assert_eq!(observer.total(), 4000);
        assert_eq!(observer.received(), 4000);
    }
}
