//! Application configuration from environment variables.
//!
//! Every setting has a default; only values that are present but malformed
//! are errors.
//!
//! | Variable | Default |
//! |---|---|
//! | `SUPPLYLINE_SOURCE` | `supplyline` |
//! | `SUPPLYLINE_SUBJECT_PREFIX` | `supplychain` |
//! | `SUPPLYLINE_CONFLICT_RETRIES` | `3` |
//! | `RELAY_POLL_INTERVAL_MS` | `500` |
//! | `RELAY_BATCH_SIZE` | `100` |
//! | `RELAY_PUBLISH_TIMEOUT_MS` | `5000` |
//! | `RELAY_MAX_ATTEMPTS` | `10` |
//! | `RELAY_BASE_DELAY_MS` | `500` |
//! | `RELAY_MAX_DELAY_MS` | `300000` |
//! | `HEALTH_MAX_BACKLOG` | `10000` |
//! | `HEALTH_MAX_LAG_SECS` | `300` |
//! | `DATABASE_URL` | unset |
//! | `REDIS_URL` | `redis://localhost:6379` |
//! | `LOG_LEVEL` | `info` |
//! | `LOG_FORMAT` | `json` |

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use supplyline_observability::{LogFormat, LoggingConfig};

use crate::outbox::{RelayConfig, RelayHealth, RetryPolicy};
use crate::repository::PipelineConfig;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub pipeline: PipelineConfig,
    pub relay: RelayConfig,
    pub health: RelayHealth,
    pub database_url: Option<String>,
    pub redis_url: String,
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            relay: RelayConfig::default(),
            health: RelayHealth::default(),
            database_url: None,
            redis_url: "redis://localhost:6379".to_string(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` uses the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = AppConfig::default();
        let env = Env(lookup);

        let pipeline = PipelineConfig {
            source: env.string("SUPPLYLINE_SOURCE", &defaults.pipeline.source),
            subject_prefix: env.string("SUPPLYLINE_SUBJECT_PREFIX", &defaults.pipeline.subject_prefix),
            conflict_retries: env.parse("SUPPLYLINE_CONFLICT_RETRIES", defaults.pipeline.conflict_retries)?,
        };

        let retry = RetryPolicy {
            max_attempts: env.parse("RELAY_MAX_ATTEMPTS", defaults.relay.retry.max_attempts)?,
            base_delay: env.millis("RELAY_BASE_DELAY_MS", defaults.relay.retry.base_delay)?,
            max_delay: env.millis("RELAY_MAX_DELAY_MS", defaults.relay.retry.max_delay)?,
            ..defaults.relay.retry.clone()
        };

        let relay = RelayConfig {
            poll_interval: env.millis("RELAY_POLL_INTERVAL_MS", defaults.relay.poll_interval)?,
            batch_size: env.parse("RELAY_BATCH_SIZE", defaults.relay.batch_size)?,
            publish_timeout: env.millis("RELAY_PUBLISH_TIMEOUT_MS", defaults.relay.publish_timeout)?,
            retry,
            ..defaults.relay.clone()
        };

        let health = RelayHealth {
            max_backlog: env.parse("HEALTH_MAX_BACKLOG", defaults.health.max_backlog)?,
            max_lag: Duration::from_secs(env.parse("HEALTH_MAX_LAG_SECS", defaults.health.max_lag.as_secs())?),
        };

        let logging = LoggingConfig {
            level: env.string("LOG_LEVEL", &defaults.logging.level),
            format: match env.get("LOG_FORMAT") {
                Some(raw) => raw
                    .parse::<LogFormat>()
                    .map_err(|reason| ConfigError::invalid("LOG_FORMAT", reason))?,
                None => defaults.logging.format,
            },
        };

        let config = AppConfig {
            pipeline,
            relay,
            health,
            database_url: env.get("DATABASE_URL"),
            redis_url: env.string("REDIS_URL", &defaults.redis_url),
            logging,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.source.trim().is_empty() {
            return Err(ConfigError::invalid("SUPPLYLINE_SOURCE", "must not be empty"));
        }
        if self.pipeline.subject_prefix.trim().is_empty() {
            return Err(ConfigError::invalid("SUPPLYLINE_SUBJECT_PREFIX", "must not be empty"));
        }
        if self.relay.batch_size == 0 {
            return Err(ConfigError::invalid("RELAY_BATCH_SIZE", "must be greater than 0"));
        }
        if self.relay.publish_timeout.is_zero() {
            return Err(ConfigError::invalid("RELAY_PUBLISH_TIMEOUT_MS", "must be greater than 0"));
        }
        if self.relay.retry.max_delay < self.relay.retry.base_delay {
            return Err(ConfigError::invalid(
                "RELAY_MAX_DELAY_MS",
                "must not be smaller than RELAY_BASE_DELAY_MS",
            ));
        }
        Ok(())
    }
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    /// Present and non-blank.
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|e| ConfigError::invalid(key, format!("{raw:?}: {e}"))),
            None => Ok(default),
        }
    }

    fn millis(&self, key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        let ms = self.parse(key, default.as_millis() as u64)?;
        Ok(Duration::from_millis(ms))
    }
}
