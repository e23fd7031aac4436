// src/config.rs

use crate::limiter::clamp_concurrency;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("cannot serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("cannot locate config directory: {0}")]
    Xdg(#[from] xdg::BaseDirectoriesError),
}

/// Transport retry parameters (optional `[retry]` section).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per request, including the first.
    pub max_attempts: u32,
    /// Backoff before the second attempt; doubles after each failure.
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 250,
            max_delay_ms: 5_000,
        }
    }
}

impl RetryConfig {
    /// Delay after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

/// Run parameters, loaded from `~/.config/imgharvest/config.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Concurrency ceiling; unset means derived from the CPU count.
    pub concurrency: Option<usize>,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub max_redirects: usize,
    pub output_dir: PathBuf,
    pub user_agent: String,
    /// Emit a progress event every this many completions.
    pub progress_every: u64,
    /// Abandon the whole fetch run after this many seconds.
    pub run_timeout_secs: Option<u64>,
    pub retry: RetryConfig,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            concurrency: None,
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
            max_redirects: 5,
            output_dir: PathBuf::from("downloads"),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            progress_every: 10,
            run_timeout_secs: None,
            retry: RetryConfig::default(),
        }
    }
}

impl HarvestConfig {
    /// The ceiling actually used, always within `[1, 200]`.
    pub fn effective_concurrency(&self) -> usize {
        clamp_concurrency(self.concurrency.unwrap_or_else(default_concurrency))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }
}

/// Image fetches are I/O bound, so allow a few requests per core.
pub fn default_concurrency() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    clamp_concurrency(cores * 4)
}

pub fn config_path() -> Result<PathBuf, ConfigError> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("imgharvest")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<HarvestConfig, ConfigError> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = HarvestConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }
    load_from(&path)
}

pub fn load_from(path: &Path) -> Result<HarvestConfig, ConfigError> {
    let data = fs::read_to_string(path)?;
    Ok(toml::from_str(&data)?)
}
