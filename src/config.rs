use crate::api::ExportFormat;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const CONFIG_FILE: &str = "narration-sync.json";
const WORKFLOW_FILE: &str = "narration-workflow.json";

pub const DEFAULT_API_URL: &str = "http://localhost:8000/api";
pub const DEFAULT_WS_URL: &str = "ws://localhost:8000";
pub const DEFAULT_READING_RATE_WPM: u32 = 130;

const MIN_POLL_INTERVAL_MS: u64 = 250;
const MIN_HEARTBEAT_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write config {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api_base_url: String,
    pub ws_base_url: String,
    pub api_token: Option<String>,
    pub request_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub heartbeat_timeout_secs: u64,
    pub reconnect: ReconnectConfig,
    pub auto_merge: bool,
    pub reading_rate_wpm: u32,
    pub export_format: ExportFormat,
    pub workflow_store_path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            ws_base_url: DEFAULT_WS_URL.to_string(),
            api_token: None,
            request_timeout_secs: 30,
            poll_interval_ms: 3_000,
            heartbeat_timeout_secs: 45,
            reconnect: ReconnectConfig::default(),
            auto_merge: true,
            reading_rate_wpm: DEFAULT_READING_RATE_WPM,
            export_format: ExportFormat::Mp3,
            workflow_store_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// `None` retries forever
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_retries: Some(10),
        }
    }
}

impl AppConfig {
    pub fn workflow_store_path(&self) -> PathBuf {
        self.workflow_store_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(WORKFLOW_FILE))
    }
}

/// Config file location: `NARRATION_CONFIG` or `./narration-sync.json`
pub fn default_config_path() -> PathBuf {
    std::env::var("NARRATION_CONFIG")
        .ok()
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE))
}

/// Loads the config, writing defaults when the file is missing. A file that
/// fails to parse is kept as `*.json.bak` and replaced with defaults.
pub fn load_or_create(path: &Path) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        let config = AppConfig::default();
        save(path, &config)?;
        tracing::info!("Created default config at {}", path.display());
        return Ok(config);
    }

    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    match serde_json::from_str::<AppConfig>(&raw) {
        Ok(mut config) => {
            normalize_config(&mut config);
            Ok(config)
        }
        Err(e) => {
            tracing::warn!("Config {} is invalid ({}), resetting", path.display(), e);
            let backup = path.with_extension("json.bak");
            let _ = fs::copy(path, backup);
            let config = AppConfig::default();
            save(path, &config)?;
            Ok(config)
        }
    }
}

pub fn save(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    let json = serde_json::to_string_pretty(config)?;
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|source| ConfigError::Write {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    fs::write(path, json).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Applies `NARRATION_*` environment overrides on top of the file config.
pub fn apply_env_overrides(config: &mut AppConfig) {
    apply_overrides(config, |key| std::env::var(key).ok());
}

fn apply_overrides(config: &mut AppConfig, lookup: impl Fn(&str) -> Option<String>) {
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(url) = non_empty("NARRATION_API_URL") {
        config.api_base_url = url;
    }
    if let Some(url) = non_empty("NARRATION_WS_URL") {
        config.ws_base_url = url;
    }
    if let Some(token) = non_empty("NARRATION_API_TOKEN") {
        config.api_token = Some(token.trim().to_string());
    }
    normalize_config(config);
}

pub fn normalize_config(config: &mut AppConfig) {
    config.api_base_url = normalize_url(&config.api_base_url, DEFAULT_API_URL);
    config.ws_base_url = normalize_url(&config.ws_base_url, DEFAULT_WS_URL);
    config.api_token = config
        .api_token
        .take()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());
    config.request_timeout_secs = config.request_timeout_secs.max(1);
    config.poll_interval_ms = config.poll_interval_ms.max(MIN_POLL_INTERVAL_MS);
    config.heartbeat_timeout_secs = config
        .heartbeat_timeout_secs
        .max(MIN_HEARTBEAT_TIMEOUT_SECS);
    config.reconnect.base_delay_ms = config.reconnect.base_delay_ms.max(1);
    config.reconnect.max_delay_ms = config
        .reconnect
        .max_delay_ms
        .max(config.reconnect.base_delay_ms);
    config.reading_rate_wpm = config.reading_rate_wpm.max(1);
}

fn normalize_url(input: &str, fallback: &str) -> String {
    let trimmed = input.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}
