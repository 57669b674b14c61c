//! lagscale.toml configuration parser.
//!
//! ```toml
//! [daemon]
//! listen = "0.0.0.0:9797"
//! evaluation_timeout = "4s"
//! request_timeout = "2s"
//!
//! [retry]
//! attempts = 3
//! base_delay = "100ms"
//! max_delay = "2s"
//!
//! [[scaler]]
//! name = "orders"
//! [scaler.metadata]
//! bootstrapServers = "kafka:9092"
//! consumerGroup = "orders"
//! topic = "orders"
//! lagThreshold = "5"
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::duration;
use crate::error::{ConfigError, ConfigResult};
use crate::policy::ScalerPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct LagscaleConfig {
    #[serde(default)]
    pub daemon: DaemonSettings,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default, rename = "scaler")]
    pub scalers: Vec<ScalerEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonSettings {
    /// Address the HTTP surface binds to.
    pub listen: String,
    /// Budget for a whole evaluation pass; an unfinished pass is cancelled.
    #[serde(deserialize_with = "duration::deserialize")]
    pub evaluation_timeout: Duration,
    /// Budget for a single broker lookup attempt.
    #[serde(deserialize_with = "duration::deserialize")]
    pub request_timeout: Duration,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:9797".to_string(),
            evaluation_timeout: Duration::from_secs(4),
            request_timeout: Duration::from_secs(2),
        }
    }
}

/// Bounded backoff for transient broker errors.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub attempts: u32,
    #[serde(deserialize_with = "duration::deserialize")]
    pub base_delay: Duration,
    #[serde(deserialize_with = "duration::deserialize")]
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `retry` (1-based): doubles each time, capped.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// One configured scaler: a name plus its raw trigger metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct ScalerEntry {
    pub name: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl ScalerEntry {
    pub fn policy(&self) -> ConfigResult<ScalerPolicy> {
        ScalerPolicy::from_metadata(&self.metadata).map_err(|e| ConfigError::Scaler {
            name: self.name.clone(),
            source: Box::new(e),
        })
    }
}

impl LagscaleConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate. Every scaler's policy must build.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: LagscaleConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.retry.attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "retry.attempts",
                value: "0".to_string(),
                reason: "at least one attempt is required".to_string(),
            });
        }

        let mut seen = BTreeSet::new();
        for entry in &self.scalers {
            if !seen.insert(entry.name.as_str()) {
                return Err(ConfigError::DuplicateScaler(entry.name.clone()));
            }
            entry.policy()?;
        }
        Ok(())
    }

    /// Named policies in declaration order.
    pub fn policies(&self) -> ConfigResult<Vec<(String, ScalerPolicy)>> {
        self.scalers
            .iter()
            .map(|entry| Ok((entry.name.clone(), entry.policy()?)))
            .collect()
    }
}
