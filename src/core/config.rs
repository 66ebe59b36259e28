use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::core::errors::{PoolError, Result};

/// Pool configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of execution units to spawn
    pub units: usize,
    /// How long bootstrap waits for every unit to report ready (None = forever)
    pub startup_timeout: Option<Duration>,
    /// Prefix used to name unit threads and tag unit processes in logs
    pub unit_name_prefix: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            units: num_cpus::get().max(1),
            startup_timeout: None,
            unit_name_prefix: "wool-unit".to_string(),
        }
    }
}

impl PoolConfig {
    /// Create a new builder for PoolConfig
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.units == 0 {
            return Err(PoolError::configuration_field(
                "units must be greater than 0",
                "units",
            ));
        }
        if let Some(timeout) = self.startup_timeout {
            if timeout.is_zero() {
                return Err(PoolError::configuration_field(
                    "startup_timeout must be non-zero when set",
                    "startup_timeout",
                ));
            }
        }
        if self.unit_name_prefix.trim().is_empty() {
            return Err(PoolError::configuration_field(
                "unit_name_prefix cannot be empty",
                "unit_name_prefix",
            ));
        }
        Ok(())
    }

    /// Small pool with a bounded startup, for development and tests
    pub fn development() -> Self {
        Self {
            units: 4,
            startup_timeout: Some(Duration::from_secs(10)),
            ..Default::default()
        }
    }

    /// One unit, useful for debugging a module in isolation
    pub fn single() -> Self {
        Self {
            units: 1,
            ..Default::default()
        }
    }

    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}

/// Builder for PoolConfig
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl PoolConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            config: PoolConfig::default(),
        }
    }

    /// Set the number of units
    pub fn units(mut self, units: usize) -> Self {
        self.config.units = units;
        self
    }

    /// Set the startup timeout
    pub fn startup_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.startup_timeout = timeout;
        self
    }

    /// Set the unit name prefix
    pub fn unit_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.unit_name_prefix = prefix.into();
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<PoolConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for PoolConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.units >= 1);
        assert_eq!(config.startup_timeout, None);
    }

    #[test]
    fn test_presets() {
        let dev = PoolConfig::development();
        assert!(dev.validate().is_ok());
        assert_eq!(dev.units, 4);

        assert_eq!(PoolConfig::single().units, 1);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = PoolConfig::default();

        config.units = 0;
        assert!(config.validate().is_err());
        config.units = 2;

        config.startup_timeout = Some(Duration::ZERO);
        assert!(config.validate().is_err());
        config.startup_timeout = None;

        config.unit_name_prefix = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder() {
        let config = PoolConfig::builder()
            .units(3)
            .startup_timeout(Some(Duration::from_secs(2)))
            .unit_name_prefix("squarer")
            .build()
            .unwrap();

        assert_eq!(config.units, 3);
        assert_eq!(config.startup_timeout, Some(Duration::from_secs(2)));
        assert_eq!(config.unit_name_prefix, "squarer");

        assert!(PoolConfig::builder().units(0).build().is_err());
    }

    #[test]
    fn test_from_yaml() {
        let config = PoolConfig::from_yaml_str("units: 6\nunit_name_prefix: blur\n").unwrap();
        assert_eq!(config.units, 6);
        assert_eq!(config.unit_name_prefix, "blur");
        assert_eq!(config.startup_timeout, None);

        assert!(PoolConfig::from_yaml_str("units: 0\n").is_err());
    }

    #[test]
    fn test_from_json() {
        let config =
            PoolConfig::from_json_str(r#"{"units": 2, "startup_timeout": {"secs": 5, "nanos": 0}}"#)
                .unwrap();
        assert_eq!(config.units, 2);
        assert_eq!(config.startup_timeout, Some(Duration::from_secs(5)));
    }
}
