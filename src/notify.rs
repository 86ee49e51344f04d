//! Job completion notifications.
//!
//! The orchestrator emits exactly one [`CompletionEvent`] per run. Delivery
//! (desktop popups, push services) belongs to the [`Notifier`] implementation
//! the caller injects.
use crate::downloader::JobOutcome;
use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct CompletionEvent {
    pub title: String,
    pub body: String,
    pub success: bool,
    /// `None` when the job aborted with a fatal error.
    pub outcome: Option<JobOutcome>,
}

impl CompletionEvent {
    pub fn from_outcome(name: &str, outcome: &JobOutcome) -> Self {
        match outcome {
            JobOutcome::Done { path, size } => Self {
                title: "Download complete".to_string(),
                body: format!("{} ({} bytes) saved to {}", name, size, path.display()),
                success: true,
                outcome: Some(outcome.clone()),
            },
            JobOutcome::PartiallyFailed {
                unfinished,
                cancelled,
            } => Self {
                title: if *cancelled {
                    "Download paused".to_string()
                } else {
                    "Download incomplete".to_string()
                },
                body: format!(
                    "{}: {} chunk(s) unfinished, run again to resume",
                    name,
                    unfinished.len()
                ),
                success: false,
                outcome: Some(outcome.clone()),
            },
        }
    }

    pub fn from_error(name: &str, err: &crate::DownloadError) -> Self {
        Self {
            title: "Download failed".to_string(),
            body: format!("{}: {}", name, err),
            success: false,
            outcome: None,
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, event: &CompletionEvent);
}

/// Writes completion events to the log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: &CompletionEvent) {
        if event.success {
            info!(title = %event.title, "{}", event.body);
        } else {
            error!(title = %event.title, "{}", event.body);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn partial_failure_reports_unfinished_count() {
        let outcome = JobOutcome::PartiallyFailed {
            unfinished: vec![1, 4],
            cancelled: false,
        };
        let event = CompletionEvent::from_outcome("big.iso", &outcome);

        assert!(!event.success);
        assert_eq!(event.title, "Download incomplete");
        assert!(event.body.contains("2 chunk(s) unfinished"));
    }

    #[test]
    fn done_is_a_success() {
        let outcome = JobOutcome::Done {
            path: PathBuf::from("/tmp/big.iso"),
            size: 42,
        };
        let event = CompletionEvent::from_outcome("big.iso", &outcome);
        assert!(event.success);
        assert!(event.body.contains("42 bytes"));
    }
}
