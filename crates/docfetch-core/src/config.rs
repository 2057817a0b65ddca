use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::retry::RetryPolicy;
use crate::source::Credentials;

/// Longest accepted retry delay or rate-limit window, in seconds.
const MAX_DELAY_SECS: u64 = 86_400;

/// Retry policy parameters (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts allowed before a task that keeps failing becomes Failed.
    pub retry_attempts: u32,
    /// Base delay in seconds; doubled for each further attempt.
    pub retry_delay_secs: f64,
    /// Upper bound on the backoff delay in seconds.
    pub max_retry_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            retry_delay_secs: 5.0,
            max_retry_delay_secs: 300,
        }
    }
}

impl RetryConfig {
    /// Out-of-range values are clamped; `validate` reports them.
    pub fn policy(&self) -> RetryPolicy {
        let max_delay = Duration::from_secs(self.max_retry_delay_secs.min(MAX_DELAY_SECS));
        let base_delay = Duration::try_from_secs_f64(self.retry_delay_secs)
            .unwrap_or(if self.retry_delay_secs > 0.0 {
                max_delay
            } else {
                Duration::ZERO
            });
        RetryPolicy {
            retry_attempts: self.retry_attempts,
            base_delay: base_delay.min(max_delay),
            max_delay,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.retry_attempts == 0 {
            anyhow::bail!("retry.retry_attempts must be >= 1");
        }
        let delay = self.retry_delay_secs;
        if !delay.is_finite() || !(0.0..=MAX_DELAY_SECS as f64).contains(&delay) {
            anyhow::bail!(
                "retry.retry_delay_secs must be between 0 and {MAX_DELAY_SECS}, got {delay}"
            );
        }
        if self.max_retry_delay_secs > MAX_DELAY_SECS {
            anyhow::bail!(
                "retry.max_retry_delay_secs must be <= {MAX_DELAY_SECS}, got {}",
                self.max_retry_delay_secs
            );
        }
        Ok(())
    }
}

/// Global rate limit defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests per minute for sources without their own entry.
    pub default_requests_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_requests_per_minute: 30,
        }
    }
}

/// Per-source settings (`[sources.<id>]`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SourceConfig {
    /// Transfers that may start per window; falls back to the global default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_minute: Option<u32>,
    /// Window length in seconds (default 60).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_secs: Option<u64>,
    /// Extra request headers sent to this source.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Treat a `text/html` body as a login wall (credentials required).
    #[serde(default)]
    pub login_on_html: bool,
}

/// Global configuration loaded from `~/.config/docfetch/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocfetchConfig {
    /// Worker slots: transfers that may be Active at once.
    pub max_parallel: usize,
    /// Receive buffer size in bytes. I/O only; retries resume from the last written byte.
    pub chunk_size: usize,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Connect timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Emit a progress event after this many bytes since the last one...
    #[serde(default = "default_progress_bytes_threshold")]
    pub progress_bytes_threshold: u64,
    /// ...or after this much time, whichever comes first.
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    /// Per-subscriber event buffer.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    /// Root for CLI default destinations (`<library_dir>/<source>/<file>`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library_dir: Option<PathBuf>,
    /// Optional retry policy; if missing, built-in defaults are used.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,
    /// Static credentials per source id.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub credentials: BTreeMap<String, Credentials>,
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_progress_bytes_threshold() -> u64 {
    256 * 1024
}

fn default_progress_interval_ms() -> u64 {
    500
}

fn default_event_buffer() -> usize {
    256
}

fn default_sources() -> BTreeMap<String, SourceConfig> {
    [
        ("who", 10),
        ("iarc", 10),
        ("springer", 20),
        ("awmf", 60),
        ("pubmed", 30),
        ("cap", 15),
    ]
    .into_iter()
    .map(|(id, rpm)| {
        (
            id.to_string(),
            SourceConfig {
                requests_per_minute: Some(rpm),
                ..SourceConfig::default()
            },
        )
    })
    .collect()
}

impl Default for DocfetchConfig {
    fn default() -> Self {
        Self {
            max_parallel: 3,
            chunk_size: 1024 * 1024,
            timeout_secs: 300,
            connect_timeout_secs: default_connect_timeout_secs(),
            progress_bytes_threshold: default_progress_bytes_threshold(),
            progress_interval_ms: default_progress_interval_ms(),
            event_buffer: default_event_buffer(),
            library_dir: None,
            retry: None,
            rate_limits: RateLimitConfig::default(),
            sources: default_sources(),
            credentials: BTreeMap::new(),
        }
    }
}

impl DocfetchConfig {
    /// Effective retry policy (configured or built-in).
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.clone().unwrap_or_default().policy()
    }

    /// Requests per window and window length for a source.
    pub fn rate_for(&self, source_id: &str) -> (u32, Duration) {
        let entry = self.sources.get(source_id);
        let rpm = entry
            .and_then(|s| s.requests_per_minute)
            .unwrap_or(self.rate_limits.default_requests_per_minute);
        let window = entry.and_then(|s| s.window_secs).unwrap_or(60);
        (rpm, Duration::from_secs(window))
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    /// Rejects values outside the supported ranges.
    pub fn validate(&self) -> Result<()> {
        if !(1..=64).contains(&self.max_parallel) {
            anyhow::bail!("max_parallel must be in 1..=64, got {}", self.max_parallel);
        }
        if !(1024..=10 * 1024 * 1024).contains(&self.chunk_size) {
            anyhow::bail!(
                "chunk_size must be between 1 KiB and 10 MiB, got {}",
                self.chunk_size
            );
        }
        if self.timeout_secs == 0 {
            anyhow::bail!("timeout_secs must be > 0");
        }
        if self.event_buffer == 0 {
            anyhow::bail!("event_buffer must be > 0");
        }
        if let Some(retry) = &self.retry {
            retry.validate()?;
        }
        if self.rate_limits.default_requests_per_minute == 0 {
            anyhow::bail!("rate_limits.default_requests_per_minute must be >= 1");
        }
        for (id, source) in &self.sources {
            if source.requests_per_minute == Some(0) {
                anyhow::bail!("sources.{id}.requests_per_minute must be >= 1");
            }
            if let Some(window) = source.window_secs {
                if !(1..=MAX_DELAY_SECS).contains(&window) {
                    anyhow::bail!(
                        "sources.{id}.window_secs must be in 1..={MAX_DELAY_SECS}, got {window}"
                    );
                }
            }
        }
        Ok(())
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("docfetch")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<DocfetchConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = DocfetchConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: DocfetchConfig = toml::from_str(&data)?;
    cfg.validate()?;
    Ok(cfg)
}
