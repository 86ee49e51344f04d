//! Remote resource metadata.
use crate::error::DownloadError;
use reqwest::Client;
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, ETAG, HeaderMap, LAST_MODIFIED};

/// What a HEAD request tells us about the remote resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteResource {
    pub size: u64,
    /// ETag, or Last-Modified when no ETag is sent.
    pub validator: Option<String>,
    pub accepts_ranges: bool,
}

/// Fetches resource metadata from a URL using a HEAD request.
///
/// # Errors
///
/// Returns [`DownloadError::SizeUnavailable`] if:
/// * The network request fails.
/// * The server returns a non-success status code.
/// * The `Content-Length` header is missing, non-numeric or zero.
pub async fn probe(client: &Client, url: &str) -> Result<RemoteResource, DownloadError> {
    let unavailable = |reason: String| DownloadError::SizeUnavailable {
        url: url.to_string(),
        reason,
    };

    let response = client
        .head(url)
        .send()
        .await
        .map_err(|e| unavailable(e.to_string()))?;

    if !response.status().is_success() {
        return Err(unavailable(format!(
            "request failed with status {}",
            response.status()
        )));
    }

    let headers = response.headers();
    let size = headers
        .get(CONTENT_LENGTH)
        .ok_or_else(|| unavailable("no Content-Length header".into()))?
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .ok_or_else(|| unavailable("Content-Length is not a number".into()))?;

    if size == 0 {
        return Err(unavailable("Content-Length is zero".into()));
    }

    Ok(RemoteResource {
        size,
        validator: validator(headers),
        accepts_ranges: headers
            .get(ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("bytes")),
    })
}

/// Convenience wrapper returning only the size.
pub async fn probe_size(client: &Client, url: &str) -> Result<u64, DownloadError> {
    probe(client, url).await.map(|r| r.size)
}

fn validator(headers: &HeaderMap) -> Option<String> {
    headers
        .get(ETAG)
        .or_else(|| headers.get(LAST_MODIFIED))
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
