//! Utility helpers used across the crate.
//!
//! HTTP client construction and filename extraction.
use crate::job::DownloadJob;
use percent_encoding::percent_decode_str;
use reqwest::{Client, Proxy};
use sanitize_filename::sanitize;
use std::time::Duration;
use url::Url;

/// Builds the HTTP client used for one proxy (or for direct connections).
///
/// Direct clients ignore proxy environment variables so that a job with
/// proxies disabled really connects directly.
///
/// # Errors
///
/// Returns an error if the proxy URL is invalid or the TLS backend fails to
/// initialize.
pub fn build_client(job: &DownloadJob, proxy: Option<&str>) -> reqwest::Result<Client> {
    let builder = Client::builder()
        .user_agent(&job.user_agent)
        .connect_timeout(job.connect_timeout)
        .read_timeout(job.read_timeout)
        .danger_accept_invalid_certs(!job.verify_tls);

    let builder = match proxy {
        Some(p) => builder.proxy(Proxy::all(p)?),
        None => builder.no_proxy(),
    };

    builder.build()
}

/// Client for a single proxy reachability probe.
pub(crate) fn proxied_check_client(
    proxy: &str,
    timeout: Duration,
    verify_tls: bool,
) -> reqwest::Result<Client> {
    Client::builder()
        .proxy(Proxy::all(proxy)?)
        .timeout(timeout)
        .danger_accept_invalid_certs(!verify_tls)
        .build()
}

/// Output name for a download: the last path segment of `url`,
/// percent-decoded and made safe for the local filesystem. Query strings are
/// ignored; `output.bin` is used when the path has no usable segment.
pub fn get_filename_from_url(url: &str) -> String {
    last_segment(url)
        .map(|segment| sanitize(percent_decode_str(&segment).decode_utf8_lossy()))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| FALLBACK_FILENAME.to_string())
}

const FALLBACK_FILENAME: &str = "output.bin";

fn last_segment(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    parsed.path_segments()?.next_back().map(str::to_string)
}
