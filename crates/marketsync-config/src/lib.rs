// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Layered configuration: TOML file defaults, overridden by recognized environment
//! variables, then validated into hard errors and soft warnings.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file path was given but does not exist.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// The path that was probed.
        path: String,
    },
    /// The file contents could not be parsed as TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Underlying parser message.
        reason: String,
    },
    /// One or more hard validation rules failed.
    #[error("invalid config: {}", .reasons.join("; "))]
    ValidationError {
        /// Human-readable reasons, one per violated rule.
        reasons: Vec<String>,
    },
}

/// A non-fatal configuration concern surfaced to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// `CONCURRENT_REQUESTS` is set unusually high and may trigger host bans.
    HighConcurrency {
        /// The configured value.
        value: u32,
    },
    /// `ROBOTS_RESPECT` is disabled.
    RobotsDisabled,
    /// An optional field was left at its default.
    MissingOptionalField {
        /// Field name.
        field: String,
        /// Suggestion for the operator.
        hint: String,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HighConcurrency { value } => {
                write!(f, "concurrent_requests={value} is unusually high")
            }
            Self::RobotsDisabled => write!(f, "robots_respect is disabled"),
            Self::MissingOptionalField { field, hint } => {
                write!(f, "{field} not set: {hint}")
            }
        }
    }
}

const MAX_SANE_CONCURRENCY: u32 = 256;
const HIGH_CONCURRENCY_THRESHOLD: u32 = 64;
pub(crate) const VALID_LOG_LEVELS: [&str; 4] = ["debug", "info", "warning", "error"];

/// Top-level configuration document, loadable from TOML and overridable by environment.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct MarketsyncConfig {
    /// Relational store connection string (`DB_URL`).
    pub db_url: Option<String>,
    /// Durable queue backend connection string (`QUEUE_URL`).
    pub queue_url: Option<String>,
    /// Log level, one of debug/info/warning/error (`LOG_LEVEL`).
    pub log_level: String,
    /// Max in-flight fetch requests per worker (`CONCURRENT_REQUESTS`).
    pub concurrent_requests: u32,
    /// Minimum delay between requests to the same host, in milliseconds
    /// (`DOWNLOAD_DELAY_MS`).
    pub download_delay_ms: u64,
    /// Whether to honor `robots.txt` by default (`ROBOTS_RESPECT`).
    pub robots_respect: bool,
    /// Root directory for scratch and checkpoint data (`DATA_DIR`).
    pub data_dir: Option<String>,
    /// Root directory for the content-addressed image store (`IMAGE_DIR`).
    pub image_dir: Option<String>,
}

impl Default for MarketsyncConfig {
    fn default() -> Self {
        Self {
            db_url: None,
            queue_url: None,
            log_level: "info".to_string(),
            concurrent_requests: 8,
            download_delay_ms: 250,
            robots_respect: true,
            data_dir: None,
            image_dir: None,
        }
    }
}

/// Load configuration from an optional TOML file, then apply environment overrides.
///
/// # Errors
///
/// Returns [`ConfigError::FileNotFound`] if `path` is given but missing, or
/// [`ConfigError::ParseError`] if its contents are not valid TOML.
pub fn load_config(path: Option<&Path>) -> Result<MarketsyncConfig, ConfigError> {
    let mut config = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                path: p.display().to_string(),
            })?;
            parse_toml(&content)?
        }
        None => MarketsyncConfig::default(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Parse a TOML document into a [`MarketsyncConfig`], falling back to defaults for
/// any field the document omits.
///
/// # Errors
///
/// Returns [`ConfigError::ParseError`] if `content` is not valid TOML or does not
/// match the expected shape.
pub fn parse_toml(content: &str) -> Result<MarketsyncConfig, ConfigError> {
    #[derive(Deserialize, Default)]
    #[serde(default)]
    struct Partial {
        db_url: Option<String>,
        queue_url: Option<String>,
        log_level: Option<String>,
        concurrent_requests: Option<u32>,
        download_delay_ms: Option<u64>,
        robots_respect: Option<bool>,
        data_dir: Option<String>,
        image_dir: Option<String>,
    }

    let partial: Partial =
        toml::from_str(content).map_err(|e| ConfigError::ParseError { reason: e.to_string() })?;
    let defaults = MarketsyncConfig::default();
    Ok(MarketsyncConfig {
        db_url: partial.db_url,
        queue_url: partial.queue_url,
        log_level: partial.log_level.unwrap_or(defaults.log_level),
        concurrent_requests: partial.concurrent_requests.unwrap_or(defaults.concurrent_requests),
        download_delay_ms: partial.download_delay_ms.unwrap_or(defaults.download_delay_ms),
        robots_respect: partial.robots_respect.unwrap_or(defaults.robots_respect),
        data_dir: partial.data_dir,
        image_dir: partial.image_dir,
    })
}

/// Overwrite fields of `config` from recognized environment variables, if set.
pub fn apply_env_overrides(config: &mut MarketsyncConfig) {
    if let Ok(v) = std::env::var("DB_URL") {
        config.db_url = Some(v);
    }
    if let Ok(v) = std::env::var("QUEUE_URL") {
        config.queue_url = Some(v);
    }
    if let Ok(v) = std::env::var("LOG_LEVEL") {
        config.log_level = v.to_lowercase();
    }
    if let Ok(v) = std::env::var("CONCURRENT_REQUESTS") {
        if let Ok(n) = v.parse() {
            config.concurrent_requests = n;
        }
    }
    if let Ok(v) = std::env::var("DOWNLOAD_DELAY_MS") {
        if let Ok(n) = v.parse() {
            config.download_delay_ms = n;
        }
    }
    if let Ok(v) = std::env::var("ROBOTS_RESPECT") {
        config.robots_respect = matches!(v.to_lowercase().as_str(), "1" | "true" | "yes");
    }
    if let Ok(v) = std::env::var("DATA_DIR") {
        config.data_dir = Some(v);
    }
    if let Ok(v) = std::env::var("IMAGE_DIR") {
        config.image_dir = Some(v);
    }
}

/// Validate a loaded configuration, returning hard errors or soft warnings.
///
/// # Errors
///
/// Returns [`ConfigError::ValidationError`] collecting every violated hard rule.
pub fn validate_config(config: &MarketsyncConfig) -> Result<Vec<ConfigWarning>, ConfigError> {
    let mut reasons = Vec::new();
    if !VALID_LOG_LEVELS.contains(&config.log_level.as_str()) {
        reasons.push(format!(
            "log_level must be one of {VALID_LOG_LEVELS:?}, got {:?}",
            config.log_level
        ));
    }
    if config.concurrent_requests == 0 {
        reasons.push("concurrent_requests must be greater than zero".to_string());
    }
    if config.concurrent_requests > MAX_SANE_CONCURRENCY {
        reasons.push(format!(
            "concurrent_requests must not exceed {MAX_SANE_CONCURRENCY}"
        ));
    }
    if !reasons.is_empty() {
        return Err(ConfigError::ValidationError { reasons });
    }

    let mut warnings = Vec::new();
    if config.concurrent_requests > HIGH_CONCURRENCY_THRESHOLD {
        warnings.push(ConfigWarning::HighConcurrency {
            value: config.concurrent_requests,
        });
    }
    if !config.robots_respect {
        warnings.push(ConfigWarning::RobotsDisabled);
    }
    if config.data_dir.is_none() {
        warnings.push(ConfigWarning::MissingOptionalField {
            field: "data_dir".to_string(),
            hint: "checkpoints will be held in-memory only".to_string(),
        });
    }
    Ok(warnings)
}

/// Overlay `overlay` onto `base`: `Some` fields in `overlay` win, `None` falls through.
#[must_use]
pub fn merge_configs(base: MarketsyncConfig, overlay: PartialConfig) -> MarketsyncConfig {
    MarketsyncConfig {
        db_url: overlay.db_url.or(base.db_url),
        queue_url: overlay.queue_url.or(base.queue_url),
        log_level: overlay.log_level.unwrap_or(base.log_level),
        concurrent_requests: overlay.concurrent_requests.unwrap_or(base.concurrent_requests),
        download_delay_ms: overlay.download_delay_ms.unwrap_or(base.download_delay_ms),
        robots_respect: overlay.robots_respect.unwrap_or(base.robots_respect),
        data_dir: overlay.data_dir.or(base.data_dir),
        image_dir: overlay.image_dir.or(base.image_dir),
    }
}

/// A sparse overlay used with [`merge_configs`], e.g. built from CLI flags.
#[derive(Debug, Clone, Default)]
pub struct PartialConfig {
    /// See [`MarketsyncConfig::db_url`].
    pub db_url: Option<String>,
    /// See [`MarketsyncConfig::queue_url`].
    pub queue_url: Option<String>,
    /// See [`MarketsyncConfig::log_level`].
    pub log_level: Option<String>,
    /// See [`MarketsyncConfig::concurrent_requests`].
    pub concurrent_requests: Option<u32>,
    /// See [`MarketsyncConfig::download_delay_ms`].
    pub download_delay_ms: Option<u64>,
    /// See [`MarketsyncConfig::robots_respect`].
    pub robots_respect: Option<bool>,
    /// See [`MarketsyncConfig::data_dir`].
    pub data_dir: Option<String>,
    /// See [`MarketsyncConfig::image_dir`].
    pub image_dir: Option<String>,
}

