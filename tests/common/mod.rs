#![allow(dead_code)]

use chunkfetch::notify::{CompletionEvent, Notifier};
use chunkfetch::{Backoff, RetryPolicy};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use wiremock::{Request, Respond, ResponseTemplate};

/// Deterministic test payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 2,
        backoff: Backoff::Fixed(Duration::from_millis(5)),
        cooldown: Duration::from_millis(10),
        cooldown_cycles: 1,
    }
}

/// HEAD response advertising `len` bytes.
pub fn head_response(len: usize) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("Accept-Ranges", "bytes")
        .set_body_bytes(vec![0u8; len])
}

pub fn range_of(request: &Request) -> Option<(usize, usize)> {
    let value = request.headers.get("range")?.to_str().ok()?;
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

/// Serves byte ranges of a fixed body, like a static file server.
pub struct RangeResponder {
    pub body: Vec<u8>,
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let total = self.body.len();
        match range_of(request) {
            Some((start, end)) if start <= end && end < total => ResponseTemplate::new(206)
                .insert_header("Content-Range", format!("bytes {}-{}/{}", start, end, total))
                .set_body_bytes(self.body[start..=end].to_vec()),
            _ => ResponseTemplate::new(200).set_body_bytes(self.body.clone()),
        }
    }
}

/// Returns only the first half of the first response, then behaves normally.
pub struct CutOffOnceResponder {
    pub body: Vec<u8>,
    pub calls: AtomicUsize,
}

impl Respond for CutOffOnceResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let (start, end) = range_of(request).unwrap_or((0, self.body.len() - 1));
        let end = if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            start + (end - start) / 2
        } else {
            end
        };
        ResponseTemplate::new(206).set_body_bytes(self.body[start..=end].to_vec())
    }
}

/// Answers 500 for ranges starting at `fail_start` until `healthy` is set.
pub struct FailingRangeResponder {
    pub inner: RangeResponder,
    pub fail_start: usize,
    pub healthy: Arc<AtomicBool>,
}

impl Respond for FailingRangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let failing = range_of(request).is_some_and(|(start, _)| start == self.fail_start);
        if failing && !self.healthy.load(Ordering::SeqCst) {
            return ResponseTemplate::new(500);
        }
        self.inner.respond(request)
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub events: Mutex<Vec<CompletionEvent>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<CompletionEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, event: &CompletionEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
