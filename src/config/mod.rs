use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Error;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub dataset: DatasetConfig,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Remote API configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    /// Base URL of the API, without the `/api/v1` prefix
    #[serde(default = "default_api_url")]
    pub url: String,
    /// Login used to request an access token
    #[serde(default)]
    pub login: Option<String>,
    /// Password used to request an access token
    #[serde(default)]
    pub password: Option<String>,
    /// Pre-issued access token, skips the login call
    #[serde(default)]
    pub token: Option<String>,
    /// Per-request timeout (seconds)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Attempts for retryable failures, including the first one
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Initial delay between attempts in milliseconds, doubled each time
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

/// Sequence download configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DownloadConfig {
    /// Directory receiving one folder per sequence
    #[serde(default = "default_target_dir")]
    pub target_dir: PathBuf,
    /// Local camera ledger
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,
    /// Detections fetched per sequence
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Newest detections first
    #[serde(default)]
    pub descending: bool,
    /// Re-download sequences whose folder already exists
    #[serde(default)]
    pub force: bool,
}

/// Sample dataset configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatasetConfig {
    /// Archive URL
    #[serde(default = "default_dataset_url")]
    pub url: String,
    /// Where the archive is saved before extraction
    #[serde(default = "default_archive_path")]
    pub archive_path: PathBuf,
    /// Extraction directory
    #[serde(default = "default_extract_dir")]
    pub extract_dir: PathBuf,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_api_url() -> String {
    "http://localhost:5050".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    500
}

fn default_target_dir() -> PathBuf {
    PathBuf::from("data/sequences")
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("data/csv/API_DATA_DEV - cameras.csv")
}

fn default_limit() -> u32 {
    10
}

fn default_dataset_url() -> String {
    "https://github.com/pyronear/pyro-envdev/releases/download/v0.0.1/selection-true-positives.zip"
        .to_string()
}

fn default_archive_path() -> PathBuf {
    PathBuf::from("selection-true-positives.zip")
}

fn default_extract_dir() -> PathBuf {
    PathBuf::from("selection-true-positives")
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            url: default_api_url(),
            login: None,
            password: None,
            token: None,
            timeout_secs: default_timeout_secs(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            target_dir: default_target_dir(),
            ledger_path: default_ledger_path(),
            limit: default_limit(),
            descending: false,
            force: false,
        }
    }
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            url: default_dataset_url(),
            archive_path: default_archive_path(),
            extract_dir: default_extract_dir(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            download: DownloadConfig::default(),
            dataset: DatasetConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Apply `API_URL`, `API_LOGIN`, `API_PWD` and `API_TOKEN` from the environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("API_URL") {
            self.api.url = url;
        }
        if let Some(login) = lookup("API_LOGIN") {
            self.api.login = Some(login);
        }
        if let Some(password) = lookup("API_PWD") {
            self.api.password = Some(password);
        }
        if let Some(token) = lookup("API_TOKEN") {
            self.api.token = Some(token);
        }
    }

    /// Check values that would only fail later, in the middle of a run
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.api.url)
            .map_err(|e| Error::Config(format!("Invalid API url {}: {}", self.api.url, e)))?;

        if self.download.limit == 0 {
            return Err(Error::Config("download.limit must be at least 1".to_string()).into());
        }
        if self.api.retry_attempts == 0 {
            return Err(Error::Config("api.retry_attempts must be at least 1".to_string()).into());
        }

        Ok(())
    }
}

/// Load configuration from a file or use default
pub fn load_config(config_path: Option<&Path>) -> Result<Config> {
    match config_path {
        Some(path) => {
            let config_str = std::fs::read_to_string(path)
                .context(format!("Failed to read config file: {:?}", path))?;

            let config = if path.extension().map_or(false, |ext| ext == "json") {
                serde_json::from_str(&config_str).context("Failed to parse JSON config")?
            } else if path.extension().map_or(false, |ext| ext == "toml") {
                toml::from_str(&config_str).context("Failed to parse TOML config")?
            } else {
                return Err(Error::Config(format!(
                    "Unsupported config file format: {:?}",
                    path
                ))
                .into());
            };

            Ok(config)
        }
        None => Ok(Config::default()),
    }
}
