//! Configuration management for Tollgate
//!
//! Job pricing, payment monitoring cadence, retrieval parameters, and
//! generation limits all live in one TOML file so that deployments can tune
//! the pipeline without touching code.

use crate::error::{Result, TollgateError, ValidationError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub payment: PaymentConfig,
    pub monitor: MonitorConfig,
    pub retrieval: RetrievalConfig,
    pub generation: GenerationConfig,
}

/// Payment terms requested from the settlement service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentConfig {
    /// Price of one answered question, in the smallest denomination
    pub amount: u64,
    /// Currency unit understood by the settlement service
    pub unit: String,
    /// Extra time past the payment deadline before the supervising timeout
    /// forces the job to a terminal state
    pub supervising_slack_ms: u64,
}

/// Payment monitor polling behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Delay between settlement status polls
    pub poll_interval_ms: u64,
    /// Upper bound on a single poll round-trip
    pub poll_timeout_ms: u64,
    /// Transient failures tolerated before the monitor gives up
    pub max_retries: u32,
    /// Base delay for exponential backoff after a transient failure
    pub backoff_base_ms: u64,
}

/// Retrieval index parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Target chunk length in characters
    pub chunk_size: usize,
    /// Number of context chunks retrieved per question
    pub top_k: usize,
    /// Maximum accepted question length in characters
    pub max_question_len: usize,
}

/// Answer generation limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Upper bound on one generation call
    pub timeout_ms: u64,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(TollgateError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| TollgateError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        // Apply environment variable overrides
        config.apply_env_overrides();

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| TollgateError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: TOLLGATE_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("TOLLGATE_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        // Simple implementation for common overrides
        match path {
            "PAYMENT__AMOUNT" => {
                self.payment.amount = parse_env(path, value)?;
            }
            "PAYMENT__UNIT" => {
                self.payment.unit = value.to_string();
            }
            "MONITOR__POLL_INTERVAL_MS" => {
                self.monitor.poll_interval_ms = parse_env(path, value)?;
            }
            "MONITOR__MAX_RETRIES" => {
                self.monitor.max_retries = parse_env(path, value)?;
            }
            "RETRIEVAL__TOP_K" => {
                self.retrieval.top_k = parse_env(path, value)?;
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Validate the configuration, collecting every violation
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.payment.amount == 0 {
            errors.push(ValidationError::new(
                "payment.amount",
                "Payment amount must be greater than 0",
            ));
        }
        if self.payment.unit.is_empty() {
            errors.push(ValidationError::new(
                "payment.unit",
                "Payment unit must not be empty",
            ));
        }
        if self.monitor.poll_interval_ms == 0 {
            errors.push(ValidationError::new(
                "monitor.poll_interval_ms",
                "Poll interval must be greater than 0",
            ));
        }
        if self.monitor.poll_timeout_ms == 0 {
            errors.push(ValidationError::new(
                "monitor.poll_timeout_ms",
                "Poll timeout must be greater than 0",
            ));
        }
        if self.retrieval.chunk_size == 0 {
            errors.push(ValidationError::new(
                "retrieval.chunk_size",
                "Chunk size must be greater than 0",
            ));
        }
        if self.retrieval.top_k == 0 {
            errors.push(ValidationError::new(
                "retrieval.top_k",
                "top_k must be greater than 0",
            ));
        }
        if self.retrieval.max_question_len == 0 {
            errors.push(ValidationError::new(
                "retrieval.max_question_len",
                "Maximum question length must be greater than 0",
            ));
        }
        if self.generation.timeout_ms == 0 {
            errors.push(ValidationError::new(
                "generation.timeout_ms",
                "Generation timeout must be greater than 0",
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(TollgateError::ConfigValidation { errors })
        }
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| TollgateError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("tollgate").join("config.toml"))
    }
}

fn parse_env<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| TollgateError::Config(format!("Cannot parse '{}' for {}", value, path)))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            payment: PaymentConfig {
                // 10 ADA in lovelace, matching the settlement service defaults
                amount: 10_000_000,
                unit: "lovelace".to_string(),
                supervising_slack_ms: 30_000,
            },
            monitor: MonitorConfig {
                poll_interval_ms: 5_000,
                poll_timeout_ms: 10_000,
                max_retries: 5,
                backoff_base_ms: 500,
            },
            retrieval: RetrievalConfig {
                chunk_size: 1000,
                top_k: 5,
                max_question_len: 2000,
            },
            generation: GenerationConfig { timeout_ms: 60_000 },
        }
    }
}
