//! Configuration types
//!
//! Store settings are read from the environment; cache and retry settings
//! are plain values with builder-style overrides.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;

/// Default AWS region when neither `KRITI_REGION` nor `AWS_REGION` is set.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default base table name.
pub const DEFAULT_TABLE_NAME: &str = "kriti-main";

// ============================================================================
// STORE CONFIGURATION
// ============================================================================

/// Where the single table lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Region identifier
    pub region: String,
    /// Local endpoint override for development (e.g. DynamoDB Local)
    pub endpoint: Option<String>,
    /// Base table name; see [`StoreConfig::table_name`]
    pub table_name: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            endpoint: None,
            table_name: DEFAULT_TABLE_NAME.to_string(),
        }
    }
}

impl StoreConfig {
    /// Create StoreConfig from environment variables.
    ///
    /// Environment variables:
    /// - `KRITI_REGION`: region (falls back to `AWS_REGION`, then `us-east-1`)
    /// - `KRITI_DYNAMODB_ENDPOINT`: optional endpoint override
    /// - `KRITI_TABLE_NAME`: base table name (default: `kriti-main`)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let config = Self {
            region: var("KRITI_REGION")
                .or_else(|| var("AWS_REGION"))
                .unwrap_or_else(|| DEFAULT_REGION.to_string()),
            endpoint: var("KRITI_DYNAMODB_ENDPOINT"),
            table_name: var("KRITI_TABLE_NAME").unwrap_or_else(|| DEFAULT_TABLE_NAME.to_string()),
        };
        config.validate()?;
        Ok(config)
    }

    /// Resolve the physical table name, optionally for a parallel or
    /// staging table (`kriti-main-staging`).
    pub fn table_name(&self, suffix: Option<&str>) -> String {
        match suffix {
            Some(s) if !s.is_empty() => format!("{}-{}", self.table_name, s),
            _ => self.table_name.clone(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_table_name(mut self, name: impl Into<String>) -> Self {
        self.table_name = name.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.region.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "region".to_string(),
            });
        }
        if self.table_name.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "table_name".to_string(),
            });
        }
        if let Some(endpoint) = &self.endpoint {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err(ConfigError::InvalidValue {
                    field: "endpoint".to_string(),
                    value: endpoint.clone(),
                    reason: "must be an http(s) URL".to_string(),
                });
            }
        }
        Ok(())
    }
}

// ============================================================================
// CACHE CONFIGURATION
// ============================================================================

/// Settings for the in-process TTL cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL applied when `set` is called without one
    pub default_ttl: Duration,
    /// How often the background sweeper evicts expired entries
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl CacheConfig {
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "sweep_interval".to_string(),
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// RETRY CONFIGURATION
// ============================================================================

/// Bounded exponential backoff for batch-write unprocessed items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first submission
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
        }
    }
}

impl RetryConfig {
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay before retry number `attempt` (zero-based):
    /// `min(base * 2^attempt, max)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_store_config_defaults() {
        let config = StoreConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, StoreConfig::default());
        assert_eq!(config.region, "us-east-1");
        assert_eq!(config.table_name(None), "kriti-main");
    }

    #[test]
    fn test_store_config_region_fallback() {
        let config = StoreConfig::from_lookup(lookup(&[("AWS_REGION", "ap-south-1")])).unwrap();
        assert_eq!(config.region, "ap-south-1");

        let config = StoreConfig::from_lookup(lookup(&[
            ("AWS_REGION", "ap-south-1"),
            ("KRITI_REGION", "eu-west-1"),
        ]))
        .unwrap();
        assert_eq!(config.region, "eu-west-1");
    }

    #[test]
    fn test_store_config_endpoint_and_table() {
        let config = StoreConfig::from_lookup(lookup(&[
            ("KRITI_DYNAMODB_ENDPOINT", "http://localhost:8000"),
            ("KRITI_TABLE_NAME", "kriti-dev"),
        ]))
        .unwrap();
        assert_eq!(config.endpoint.as_deref(), Some("http://localhost:8000"));
        assert_eq!(config.table_name(Some("staging")), "kriti-dev-staging");
        assert_eq!(config.table_name(Some("")), "kriti-dev");
    }

    #[test]
    fn test_store_config_rejects_bad_endpoint() {
        let err = StoreConfig::from_lookup(lookup(&[("KRITI_DYNAMODB_ENDPOINT", "localhost")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "endpoint"));
    }

    #[test]
    fn test_blank_values_are_unset() {
        let config = StoreConfig::from_lookup(lookup(&[("KRITI_TABLE_NAME", "  ")])).unwrap();
        assert_eq!(config.table_name, "kriti-main");
    }

    #[test]
    fn test_retry_backoff_doubles_then_caps() {
        let retry = RetryConfig::default();
        assert_eq!(retry.backoff(0), Duration::from_millis(1000));
        assert_eq!(retry.backoff(1), Duration::from_millis(2000));
        assert_eq!(retry.backoff(3), Duration::from_millis(8000));
        assert_eq!(retry.backoff(4), Duration::from_millis(10_000));
        assert_eq!(retry.backoff(40), Duration::from_millis(10_000));
    }

    #[test]
    fn test_cache_config_builders() {
        let config = CacheConfig::default()
            .with_default_ttl(Duration::from_secs(10))
            .with_sweep_interval(Duration::from_secs(1));
        assert_eq!(config.default_ttl, Duration::from_secs(10));
        assert!(config.validate().is_ok());
        assert!(config.with_sweep_interval(Duration::ZERO).validate().is_err());
    }
}
