//! Configuration management for Zero services.
//!
//! All Zero services share a unified configuration file at `~/.codecoder/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Explicit config file values
//! 2. Environment variables (ZERO_* prefix)
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `ZERO_LOG_LEVEL` → observability.log_level
//! - `ZERO_FUNDFLOW_DB` → fundflow.db_path
//! - `ZERO_FUNDFLOW_HISTORY_DB` → fundflow.history_db_path
//! - `ZERO_FUNDFLOW_TOP_N` → fundflow.top_n

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new()
        .map_or_else(
            || PathBuf::from(".codecoder"),
            |dirs| dirs.home_dir().join(".codecoder"),
        )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration structure for the fund-flow service.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// JSON Schema reference
    #[serde(rename = "$schema", default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Fund-flow screening configuration
    #[serde(default)]
    pub fundflow: FundFlowConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable fallbacks.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("ZERO_LOG_LEVEL") {
            self.observability.log_level = level;
        }

        if let Ok(path) = std::env::var("ZERO_FUNDFLOW_DB") {
            self.fundflow.db_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("ZERO_FUNDFLOW_HISTORY_DB") {
            self.fundflow.history_db_path = PathBuf::from(path);
        }
        if let Ok(top_n) = std::env::var("ZERO_FUNDFLOW_TOP_N") {
            if let Ok(n) = top_n.parse() {
                self.fundflow.top_n = n;
            }
        }
    }

    /// Save configuration to the default path.
    pub fn save(&self) -> Result<()> {
        let path = config_path();
        let dir = config_dir();

        if !dir.exists() {
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(&path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }
}

// ============================================================================
// Observability Configuration
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    /// Aliases: "level" for backward compatibility with existing config files
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    /// Aliases: "format" for backward compatibility with existing config files
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,

    /// Additional module targets to exclude from logging.
    ///
    /// These modules will be set to `warn` level to reduce noise.
    #[serde(default)]
    pub excluded_targets: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            excluded_targets: Vec::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

// ============================================================================
// Fund Flow Configuration
// ============================================================================

/// Fund-flow screening configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundFlowConfig {
    /// SQLite database for date-scoped market data caches
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// SQLite database for leaderboard history and backtest rows
    #[serde(default = "default_history_db_path")]
    pub history_db_path: PathBuf,

    /// Leaderboard size
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    /// Number of phase-1 leaders promoted to phase 2
    #[serde(default = "default_candidate_pool")]
    pub candidate_pool: usize,

    /// Float market cap at or above which a stock is not leaderboard-eligible
    #[serde(default = "default_float_cap_ceiling")]
    pub float_cap_ceiling: f64,

    /// Worker count for per-instrument requests
    #[serde(default = "default_enrichment_workers")]
    pub enrichment_workers: usize,

    /// Delay after every per-instrument request (milliseconds)
    #[serde(default = "default_per_call_delay_ms")]
    pub per_call_delay_ms: u64,

    /// Timeout for a single per-instrument request (seconds)
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,

    /// Attempts per instrument before it is marked missing
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Interval between enrichment progress log lines (seconds)
    #[serde(default = "default_progress_interval_secs")]
    pub progress_interval_secs: u64,

    /// Compute volume ratio for phase-2 candidates
    #[serde(default = "default_true")]
    pub volume_ratio_enabled: bool,

    /// Sessions averaged for the volume ratio denominator
    #[serde(default = "default_volume_lookback_days")]
    pub volume_lookback_days: usize,

    /// Days of date-scoped cache rows to keep
    #[serde(default = "default_keep_days")]
    pub keep_days: u32,

    /// Periods ranked by a full run (e.g. ["instant", "3d", "5d"])
    #[serde(default = "default_periods")]
    pub periods: Vec<String>,

    /// Directory for leaderboard exports (disabled when unset)
    #[serde(default)]
    pub report_dir: Option<PathBuf>,
}

impl Default for FundFlowConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            history_db_path: default_history_db_path(),
            top_n: default_top_n(),
            candidate_pool: default_candidate_pool(),
            float_cap_ceiling: default_float_cap_ceiling(),
            enrichment_workers: default_enrichment_workers(),
            per_call_delay_ms: default_per_call_delay_ms(),
            call_timeout_secs: default_call_timeout_secs(),
            max_attempts: default_max_attempts(),
            progress_interval_secs: default_progress_interval_secs(),
            volume_ratio_enabled: true,
            volume_lookback_days: default_volume_lookback_days(),
            keep_days: default_keep_days(),
            periods: default_periods(),
            report_dir: None,
        }
    }
}

fn default_db_path() -> PathBuf {
    config_dir().join("fundflow.db")
}

fn default_history_db_path() -> PathBuf {
    config_dir().join("fundflow_history.db")
}

fn default_top_n() -> usize {
    20
}

fn default_candidate_pool() -> usize {
    500
}

fn default_float_cap_ceiling() -> f64 {
    1.0e11 // 1000亿
}

fn default_enrichment_workers() -> usize {
    10
}

fn default_per_call_delay_ms() -> u64 {
    200
}

fn default_call_timeout_secs() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    1
}

fn default_progress_interval_secs() -> u64 {
    5
}

fn default_volume_lookback_days() -> usize {
    7
}

fn default_keep_days() -> u32 {
    7
}

fn default_periods() -> Vec<String> {
    vec!["instant".to_string(), "3d".to_string(), "5d".to_string()]
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_fundflow_config() {
        let config = Config::default();
        assert_eq!(config.fundflow.top_n, 20);
        assert_eq!(config.fundflow.candidate_pool, 500);
        assert_eq!(config.fundflow.max_attempts, 1);
        assert!(config.fundflow.volume_ratio_enabled);
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let json = r#"{
            "observability": { "level": "debug" },
            "fundflow": { "top_n": 50, "periods": ["instant"] }
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.observability.log_level, "debug");
        assert_eq!(config.observability.log_format, "pretty");
        assert_eq!(config.fundflow.top_n, 50);
        assert_eq!(config.fundflow.periods, vec!["instant".to_string()]);
        assert_eq!(config.fundflow.enrichment_workers, 10);
        assert!((config.fundflow.float_cap_ceiling - 1.0e11).abs() < 1.0);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "fundflow": { "keep_days": 3 } }"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.fundflow.keep_days, 3);
        assert_eq!(config.fundflow.per_call_delay_ms, 200);
    }

    #[test]
    fn test_load_from_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "not json").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }
}
