//! Configuration management

use serde::Deserialize;

use crate::error::SqsError;

/// Environment prefix for every setting, e.g. `QUEUESTACK_LATENCY_MIN`
pub const ENV_PREFIX: &str = "QUEUESTACK";

/// Settings consumed by the queue core
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SqsConfig {
    #[serde(default = "default_account_id")]
    pub account_id: String,

    #[serde(default = "default_region")]
    pub region: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Lower latency bound in milliseconds, kept raw so bad input reaches the clock
    #[serde(default)]
    pub latency_min: Option<String>,

    #[serde(default)]
    pub latency_max: Option<String>,
}

impl Default for SqsConfig {
    fn default() -> Self {
        Self {
            account_id: default_account_id(),
            region: default_region(),
            base_url: default_base_url(),
            latency_min: None,
            latency_max: None,
        }
    }
}

fn default_account_id() -> String {
    "000000000000".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_base_url() -> String {
    "http://localhost:4566".to_string()
}

impl SqsConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self, SqsError> {
        let source = config::Config::builder()
            .add_source(config::Environment::with_prefix(ENV_PREFIX))
            .build()
            .map_err(|e| SqsError::Configuration(e.to_string()))?;
        Self::from_source(source)
    }

    /// Deserialize from an already built `config::Config`
    pub fn from_source(source: config::Config) -> Result<Self, SqsError> {
        source
            .try_deserialize::<SqsConfig>()
            .map_err(|e| SqsError::Configuration(e.to_string()))
    }

    pub fn latency(&self) -> LatencyConfig {
        LatencyConfig {
            min: self.latency_min.clone(),
            max: self.latency_max.clone(),
        }
    }
}

/// Raw latency bounds in milliseconds; validated by the visibility clock
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LatencyConfig {
    pub min: Option<String>,
    pub max: Option<String>,
}

impl LatencyConfig {
    pub fn fixed(millis: u32) -> Self {
        Self::range(millis, millis)
    }

    pub fn range(min: u32, max: u32) -> Self {
        Self {
            min: Some(min.to_string()),
            max: Some(max.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let source = config::Config::builder().build().unwrap();
        let config = SqsConfig::from_source(source).unwrap();
        assert_eq!(config, SqsConfig::default());
        assert_eq!(config.latency(), LatencyConfig::default());
    }

    #[test]
    fn test_overrides() {
        let source = config::Config::builder()
            .set_override("region", "eu-west-1")
            .unwrap()
            .set_override("latency_min", "100")
            .unwrap()
            .set_override("latency_max", "250")
            .unwrap()
            .build()
            .unwrap();
        let config = SqsConfig::from_source(source).unwrap();
        assert_eq!(config.region, "eu-west-1");
        assert_eq!(config.latency(), LatencyConfig::range(100, 250));
    }

    #[test]
    fn test_malformed_latency_is_kept_raw() {
        let source = config::Config::builder()
            .set_override("latency_min", "fast")
            .unwrap()
            .build()
            .unwrap();
        let config = SqsConfig::from_source(source).unwrap();
        assert_eq!(config.latency_min.as_deref(), Some("fast"));
    }
}
