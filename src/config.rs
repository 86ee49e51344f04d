//! User settings.
//!
//! Settings are layered: built-in defaults, then the user config file
//! (`<config dir>/chunkfetch/config.toml`), then an explicit file passed on
//! the command line, then `CHUNKFETCH_*` environment variables. For example
//! `CHUNKFETCH_PROXIES=http://127.0.0.1:6890,http://127.0.0.1:6891`.
use crate::job::{Backoff, DownloadJob, ProxyCheck, RetryPolicy};
use crate::proxy::ProxyPool;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Number of chunks (and concurrent connections) per download.
    pub threads: usize,
    pub max_retries: u32,
    pub backoff: BackoffKind,
    pub retry_delay_secs: u64,
    pub max_retry_delay_secs: u64,
    /// Wait after a full round of retries has failed.
    pub cooldown_secs: u64,
    /// Extra retry rounds after the first one.
    pub cooldown_cycles: u32,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub verify_tls: bool,
    pub proxies: Vec<String>,
    pub proxy_check_url: String,
    pub proxy_check_timeout_secs: u64,
    pub validate_proxies: bool,
    pub revalidate_on_resume: bool,
    pub default_dir: Option<String>,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            threads: 6,
            max_retries: 5,
            backoff: BackoffKind::Exponential,
            retry_delay_secs: 1,
            max_retry_delay_secs: 60,
            cooldown_secs: 6 * 60,
            cooldown_cycles: 1,
            connect_timeout_secs: 30,
            read_timeout_secs: 60,
            verify_tls: true,
            proxies: Vec::new(),
            proxy_check_url: ProxyCheck::default().url,
            proxy_check_timeout_secs: 5,
            validate_proxies: true,
            revalidate_on_resume: false,
            default_dir: None,
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Default location of the user config file.
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("chunkfetch").join("config.toml"))
    }

    /// Loads settings from every layer.
    ///
    /// # Errors
    ///
    /// Fails if `explicit` does not exist or any layer cannot be parsed.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_layers(explicit, Self::environment())
    }

    /// `CHUNKFETCH_THREADS=8`, `CHUNKFETCH_PROXIES=a,b`. Nested keys use `__`.
    fn environment() -> Environment {
        Environment::with_prefix("CHUNKFETCH")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("proxies")
    }

    fn load_layers(explicit: Option<&Path>, env: Environment) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Some(user) = Self::user_config_path() {
            builder = builder.add_source(File::from(user).required(false));
        }
        if let Some(path) = explicit {
            builder = builder.add_source(File::from(path).required(true));
        }

        builder.add_source(env).build()?.try_deserialize()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let base = Duration::from_secs(self.retry_delay_secs);
        let backoff = match self.backoff {
            BackoffKind::Fixed => Backoff::Fixed(base),
            BackoffKind::Exponential => Backoff::Exponential {
                base,
                max: Duration::from_secs(self.max_retry_delay_secs),
            },
        };

        RetryPolicy {
            max_retries: self.max_retries,
            backoff,
            cooldown: Duration::from_secs(self.cooldown_secs),
            cooldown_cycles: self.cooldown_cycles,
        }
    }

    /// Builds the job for one URL. `use_proxies` turns the configured pool on.
    pub fn to_job(&self, url: &str, output: PathBuf, use_proxies: bool) -> DownloadJob {
        let mut job = DownloadJob::new(url, output)
            .with_chunks(self.threads)
            .with_retry(self.retry_policy())
            .with_proxies(ProxyPool::new(self.proxies.clone(), use_proxies));

        job.proxy_check = ProxyCheck {
            enabled: self.validate_proxies,
            url: self.proxy_check_url.clone(),
            timeout: Duration::from_secs(self.proxy_check_timeout_secs),
        };
        job.verify_tls = self.verify_tls;
        job.connect_timeout = Duration::from_secs(self.connect_timeout_secs);
        job.read_timeout = Duration::from_secs(self.read_timeout_secs);
        job.revalidate_on_resume = self.revalidate_on_resume;
        job
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn explicit_file_overrides_defaults() -> anyhow::Result<()> {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile()?;
        writeln!(
            file,
            r#"
threads = 3
backoff = "fixed"
retry_delay_secs = 2
proxies = ["http://127.0.0.1:6890", "http://127.0.0.1:6891"]
verify_tls = false
"#
        )?;

        let settings = Settings::load(Some(file.path()))?;
        assert_eq!(settings.threads, 3);
        assert_eq!(settings.backoff, BackoffKind::Fixed);
        assert_eq!(settings.proxies.len(), 2);
        assert!(!settings.verify_tls);
        // Untouched keys keep their defaults
        assert_eq!(settings.max_retries, 5);
        assert_eq!(settings.cooldown_secs, 360);
        Ok(())
    }

    #[test]
    fn environment_overrides_files() -> anyhow::Result<()> {
        let vars: config::Map<String, String> = [
            ("CHUNKFETCH_THREADS", "8"),
            ("CHUNKFETCH_PROXIES", "http://127.0.0.1:6890,http://127.0.0.1:6891"),
            ("CHUNKFETCH_PROXY_CHECK_TIMEOUT_SECS", "2"),
            ("CHUNKFETCH_REVALIDATE_ON_RESUME", "true"),
            ("OTHERAPP_THREADS", "99"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let mut file = tempfile::Builder::new().suffix(".toml").tempfile()?;
        writeln!(file, "threads = 3")?;

        let settings =
            Settings::load_layers(Some(file.path()), Settings::environment().source(Some(vars)))?;
        assert_eq!(settings.threads, 8);
        assert_eq!(
            settings.proxies,
            vec!["http://127.0.0.1:6890", "http://127.0.0.1:6891"]
        );
        assert_eq!(settings.proxy_check_timeout_secs, 2);
        assert!(settings.revalidate_on_resume);
        Ok(())
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let result = Settings::load(Some(Path::new("/definitely/not/here.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn to_job_maps_every_setting() {
        let settings = Settings {
            threads: 4,
            backoff: BackoffKind::Fixed,
            retry_delay_secs: 3,
            proxies: vec!["http://127.0.0.1:6890".into()],
            verify_tls: false,
            ..Settings::default()
        };

        let job = settings.to_job("https://example.com/a.iso", PathBuf::from("a.iso"), true);
        assert_eq!(job.chunks, 4);
        assert_eq!(job.retry.backoff, Backoff::Fixed(Duration::from_secs(3)));
        assert_eq!(job.proxies.assign(5), Some("http://127.0.0.1:6890"));
        assert!(!job.verify_tls);

        let direct = settings.to_job("https://example.com/a.iso", PathBuf::from("a.iso"), false);
        assert_eq!(direct.proxies.assign(0), None);
    }
}
