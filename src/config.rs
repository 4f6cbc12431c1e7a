//! Optional config file loading. Search order: ./bookscrape.toml, then
//! $XDG_CONFIG_HOME/bookscrape/config.toml (or ~/.config/bookscrape/config.toml).

use crate::fetch::{
    browser_headers, Backoff, FetchEngine, IdentityPool, RateLimitDetector, Transport,
    BROWSER_USER_AGENTS, DEFAULT_ACCEPT_LANGUAGE, DEFAULT_BACKOFF_BASE, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_REFERER, DEFAULT_TIMEOUT,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors from loading or validating configuration. Raised at startup, never mid-fetch.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Identity pool is empty: configure at least one user agent.")]
    EmptyIdentityPool,

    #[error("Invalid backoff base {0}: must be at least 1.")]
    InvalidBackoffBase(u32),

    #[error("Invalid extraction pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Invalid selector {selector:?}: {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("Cannot determine current directory: {0}")]
    CurrentDir(#[source] std::io::Error),

    #[error("Cannot read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Config file contents. All fields optional; only present keys override defaults.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct Config {
    /// User agents to rotate through, in order. Defaults to five desktop browsers.
    pub user_agents: Option<Vec<String>>,
    /// Referer sent with every identity.
    pub referer: Option<String>,
    pub accept_language: Option<String>,
    /// Per-request timeout in seconds (default 10).
    pub timeout_secs: Option<u64>,
    /// Attempts per fetch, including the first (default 3).
    pub max_attempts: Option<u32>,
    /// Exponential backoff base (default 2).
    pub backoff_base: Option<u32>,
    /// Backoff unit in milliseconds (default 1000, giving 2s, 4s, ...).
    pub backoff_unit_ms: Option<u64>,
    /// Upper bound on a single backoff delay.
    pub max_backoff_secs: Option<u64>,
    /// Phrases whose presence in a response means the caller is being throttled.
    pub throttle_markers: Option<Vec<String>>,
    /// Directory relative output paths are resolved against.
    pub output_dir: Option<PathBuf>,
}

/// Search order: (1) ./bookscrape.toml, (2) $XDG_CONFIG_HOME/bookscrape/config.toml.
/// Missing file returns Ok(None). Invalid TOML or I/O error reading a present file returns Err.
pub fn load_config() -> Result<Option<Config>, ConfigError> {
    let cwd = std::env::current_dir().map_err(ConfigError::CurrentDir)?;
    let mut paths = vec![cwd.join("bookscrape.toml")];
    if let Some(d) = dirs::config_dir() {
        paths.push(d.join("bookscrape").join("config.toml"));
    }
    for path in &paths {
        if path.exists() {
            return load_config_from(path).map(Some);
        }
    }
    Ok(None)
}

pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&s).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

impl Config {
    pub fn identity_pool(&self) -> Result<IdentityPool, ConfigError> {
        let companions = browser_headers(
            self.referer.as_deref().unwrap_or(DEFAULT_REFERER),
            self.accept_language
                .as_deref()
                .unwrap_or(DEFAULT_ACCEPT_LANGUAGE),
        );
        match &self.user_agents {
            Some(agents) => IdentityPool::from_user_agents(agents.iter(), &companions),
            None => IdentityPool::from_user_agents(BROWSER_USER_AGENTS, &companions),
        }
    }

    pub fn detector(&self) -> RateLimitDetector {
        match &self.throttle_markers {
            Some(markers) => RateLimitDetector::new(markers.iter()),
            None => RateLimitDetector::default(),
        }
    }

    pub fn backoff(&self) -> Result<Backoff, ConfigError> {
        let unit = self
            .backoff_unit_ms
            .map(Duration::from_millis)
            .unwrap_or(crate::fetch::DEFAULT_BACKOFF_UNIT);
        let backoff = Backoff::new(self.backoff_base.unwrap_or(DEFAULT_BACKOFF_BASE), unit)?;
        Ok(match self.max_backoff_secs {
            Some(secs) => backoff.with_max_delay(Duration::from_secs(secs)),
            None => backoff,
        })
    }

    /// Validate everything the fetch engine needs. Fails on an empty pool or a zero base.
    pub fn engine_settings(&self) -> Result<EngineSettings, ConfigError> {
        Ok(EngineSettings {
            identities: self.identity_pool()?,
            detector: self.detector(),
            backoff: self.backoff()?,
            timeout: self
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_TIMEOUT),
            max_attempts: self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS).max(1),
        })
    }
}

/// Validated engine configuration, built once at startup.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub identities: IdentityPool,
    pub detector: RateLimitDetector,
    pub backoff: Backoff,
    pub timeout: Duration,
    pub max_attempts: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            identities: IdentityPool::browser_defaults(),
            detector: RateLimitDetector::default(),
            backoff: Backoff::default(),
            timeout: DEFAULT_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl EngineSettings {
    pub fn engine<T: Transport + 'static>(self, transport: T) -> FetchEngine {
        FetchEngine::builder(transport)
            .identities(self.identities)
            .detector(self.detector)
            .backoff(self.backoff)
            .timeout(self.timeout)
            .max_attempts(self.max_attempts)
            .build()
    }
}
