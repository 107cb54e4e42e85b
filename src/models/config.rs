//! Application configuration structures.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Remote API endpoint and credentials
    #[serde(default)]
    pub api: ApiConfig,

    /// Discovery (map) request settings
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Sync engine policy: polling cadence, retry ceilings, deletion hysteresis
    #[serde(default)]
    pub sync: SyncConfig,

    /// Output locations
    #[serde(default)]
    pub output: OutputConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.api.base_url.trim().is_empty() {
            return Err(AppError::validation("api.base_url is empty"));
        }
        if self.api.user_agent.trim().is_empty() {
            return Err(AppError::validation("api.user_agent is empty"));
        }
        if self.api.timeout_secs == 0 {
            return Err(AppError::validation("api.timeout_secs must be > 0"));
        }
        if self.discovery.limit == 0 {
            return Err(AppError::validation("discovery.limit must be at least 1"));
        }
        if self.discovery.limit > 100_000 {
            return Err(AppError::validation(
                "discovery.limit cannot exceed 100000 (provider max)",
            ));
        }
        if self.sync.poll_interval_secs == 0 {
            return Err(AppError::validation("sync.poll_interval_secs must be > 0"));
        }
        if self.sync.max_poll_secs < self.sync.poll_interval_secs {
            return Err(AppError::validation(
                "sync.max_poll_secs must be at least sync.poll_interval_secs",
            ));
        }
        if self.sync.poll_retry_limit == 0 {
            return Err(AppError::validation("sync.poll_retry_limit must be > 0"));
        }
        if self.sync.batch_limit == 0 {
            return Err(AppError::validation("sync.batch_limit must be > 0"));
        }
        if self.sync.miss_threshold == 0 {
            return Err(AppError::validation("sync.miss_threshold must be > 0"));
        }
        Ok(())
    }
}

/// Remote API endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the scraping provider API
    #[serde(default = "defaults::base_url")]
    pub base_url: String,

    /// API key; the FIRECRAWL_API_KEY environment variable takes precedence
    #[serde(default)]
    pub api_key: Option<String>,

    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,
}

impl ApiConfig {
    /// Resolve the API key from the environment or the config file.
    pub fn resolve_key(&self) -> Result<String> {
        if let Ok(key) = std::env::var("FIRECRAWL_API_KEY") {
            if !key.trim().is_empty() {
                return Ok(key);
            }
        }
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                AppError::config(
                    "No API key found. Set FIRECRAWL_API_KEY or api.api_key in the config file.",
                )
            })
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::base_url(),
            api_key: None,
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
        }
    }
}

/// Discovery (map) request settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Include subdomains in discovery (subdomains are separate sites)
    #[serde(default)]
    pub include_subdomains: bool,

    /// Collapse URLs differing only in query parameters
    #[serde(default = "defaults::ignore_query_parameters")]
    pub ignore_query_parameters: bool,

    /// Maximum URLs to discover per run
    #[serde(default = "defaults::discovery_limit")]
    pub limit: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            include_subdomains: false,
            ignore_query_parameters: defaults::ignore_query_parameters(),
            limit: defaults::discovery_limit(),
        }
    }
}

/// Sync engine policy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Seconds between job status polls
    #[serde(default = "defaults::poll_interval")]
    pub poll_interval_secs: u64,

    /// Wall-clock budget for polling one job, in seconds
    #[serde(default = "defaults::max_poll")]
    pub max_poll_secs: u64,

    /// Consecutive failed poll attempts tolerated before the run fails
    #[serde(default = "defaults::poll_retry_limit")]
    pub poll_retry_limit: u32,

    /// Maximum URLs submitted to one batch job
    #[serde(default = "defaults::batch_limit")]
    pub batch_limit: usize,

    /// Consecutive discovery misses before a resource is deleted
    #[serde(default = "defaults::miss_threshold")]
    pub miss_threshold: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: defaults::poll_interval(),
            max_poll_secs: defaults::max_poll(),
            poll_retry_limit: defaults::poll_retry_limit(),
            batch_limit: defaults::batch_limit(),
            miss_threshold: defaults::miss_threshold(),
        }
    }
}

/// Output location settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Root directory; each site gets a subdirectory named by its domain
    #[serde(default = "defaults::root_dir")]
    pub root_dir: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            root_dir: defaults::root_dir(),
        }
    }
}

mod defaults {
    // API defaults
    pub fn base_url() -> String {
        "https://api.firecrawl.dev".into()
    }
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; sitesync/0.1)".into()
    }
    pub fn timeout() -> u64 {
        120
    }

    // Discovery defaults
    pub fn ignore_query_parameters() -> bool {
        true
    }
    pub fn discovery_limit() -> usize {
        5000
    }

    // Sync defaults
    pub fn poll_interval() -> u64 {
        5
    }
    pub fn max_poll() -> u64 {
        600
    }
    pub fn poll_retry_limit() -> u32 {
        4
    }
    pub fn batch_limit() -> usize {
        100
    }
    pub fn miss_threshold() -> u32 {
        3
    }

    // Output defaults
    pub fn root_dir() -> String {
        "output".into()
    }
}
