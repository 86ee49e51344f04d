//! Proxy assignment and validation.
//!
//! When proxies are enabled every chunk is bound to exactly one endpoint from
//! the pool. A chunk whose proxy fails validation is skipped for the run
//! rather than downloaded over a direct connection.
use crate::job::{DownloadJob, ProxyCheck};
use crate::utils;
use futures_util::future::join_all;
use std::collections::HashMap;
use tracing::{debug, warn};

/// An ordered list of proxy endpoints, e.g. `http://127.0.0.1:6890`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyPool {
    endpoints: Vec<String>,
    enabled: bool,
}

impl ProxyPool {
    pub fn new(endpoints: Vec<String>, enabled: bool) -> Self {
        Self { endpoints, enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// Proxy for chunk `index`, round robin over the pool.
    pub fn assign(&self, index: usize) -> Option<&str> {
        if !self.enabled || self.endpoints.is_empty() {
            return None;
        }
        Some(&self.endpoints[index % self.endpoints.len()])
    }
}

/// Returns true if a request to the check URL succeeds through `proxy`.
pub async fn validate(proxy: &str, check: &ProxyCheck, verify_tls: bool) -> bool {
    let client = match utils::proxied_check_client(proxy, check.timeout, verify_tls) {
        Ok(c) => c,
        Err(e) => {
            warn!(proxy, error = %e, "Proxy endpoint is malformed");
            return false;
        }
    };

    match client.get(&check.url).send().await {
        Ok(response) if response.status().is_success() => {
            debug!(proxy, status = %response.status(), "Proxy is reachable");
            true
        }
        Ok(response) => {
            warn!(proxy, status = %response.status(), "Proxy check returned an error status");
            false
        }
        Err(e) => {
            warn!(proxy, error = %e, "Proxy check failed");
            false
        }
    }
}

/// Validates, concurrently and once each, the distinct proxies assigned to
/// `chunks`. Endpoints no listed chunk uses are not contacted.
///
/// Returns the verdict per endpoint. When checks are disabled every proxy is
/// accepted.
pub async fn validate_pool(job: &DownloadJob, chunks: &[usize]) -> HashMap<String, bool> {
    let mut endpoints: Vec<&str> = Vec::new();
    for &index in chunks {
        if let Some(endpoint) = job.proxies.assign(index)
            && !endpoints.contains(&endpoint)
        {
            endpoints.push(endpoint);
        }
    }

    if !job.proxy_check.enabled {
        return endpoints.into_iter().map(|e| (e.to_string(), true)).collect();
    }

    let checks = endpoints
        .iter()
        .map(|endpoint| validate(endpoint, &job.proxy_check, job.verify_tls));
    let results = join_all(checks).await;

    endpoints
        .into_iter()
        .map(str::to_string)
        .zip(results)
        .collect()
}
