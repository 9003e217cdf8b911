//! Configuration types

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;

/// Default soft-lock timeout (one minute).
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(60);

/// Configuration of a read-write concurrency strategy instance.
///
/// One strategy instance serves one cache region, so the region name shows
/// up in every log line the strategy emits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Name of the cache region (entity type) this strategy guards.
    pub region: String,

    /// Callers skip opportunistic `put` and rely on the lock protocol only.
    /// The read-write strategy refuses to run in this mode.
    #[serde(default)]
    pub minimal_puts: bool,

    /// How long a soft lock stays valid before the backend may reclaim it.
    #[serde(default = "default_lock_timeout", with = "duration_millis")]
    pub lock_timeout: Duration,
}

fn default_lock_timeout() -> Duration {
    DEFAULT_LOCK_TIMEOUT
}

impl StrategyConfig {
    /// Build a configuration for `region` with default settings.
    pub fn for_region(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            minimal_puts: false,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_minimal_puts(mut self, minimal_puts: bool) -> Self {
        self.minimal_puts = minimal_puts;
        self
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Parse and validate a TOML document.
    ///
    /// ```toml
    /// region = "accounts"
    /// lock_timeout = 30000   # milliseconds
    /// ```
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check every field. Minimal puts is rejected here so a misconfigured
    /// region fails at setup time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.region.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "region".to_string(),
            });
        }
        if self.minimal_puts {
            return Err(ConfigError::MinimalPutsUnsupported {
                region: self.region.clone(),
            });
        }
        if self.lock_timeout < Duration::from_millis(1) {
            return Err(ConfigError::InvalidValue {
                field: "lock_timeout".to_string(),
                value: format!("{:?}", self.lock_timeout),
                reason: "must be at least one millisecond".to_string(),
            });
        }
        Ok(())
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_region_defaults() {
        let config = StrategyConfig::for_region("accounts");
        assert_eq!(config.region, "accounts");
        assert!(!config.minimal_puts);
        assert_eq!(config.lock_timeout, DEFAULT_LOCK_TIMEOUT);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_minimal_puts_rejected() {
        let config = StrategyConfig::for_region("accounts").with_minimal_puts(true);
        assert_eq!(
            config.validate(),
            Err(ConfigError::MinimalPutsUnsupported {
                region: "accounts".to_string()
            })
        );
    }

    #[test]
    fn test_empty_region_rejected() {
        let config = StrategyConfig::for_region("  ");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRequired { .. })
        ));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = StrategyConfig::for_region("accounts").with_lock_timeout(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "lock_timeout"
        ));
    }

    #[test]
    fn test_from_toml_str() {
        let config = StrategyConfig::from_toml_str(
            r#"
            region = "orders"
            lock_timeout = 1500
            "#,
        )
        .expect("config should parse");

        assert_eq!(config.region, "orders");
        assert!(!config.minimal_puts);
        assert_eq!(config.lock_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn test_from_toml_str_defaults_timeout() {
        let config = StrategyConfig::from_toml_str(r#"region = "orders""#)
            .expect("config should parse");
        assert_eq!(config.lock_timeout, DEFAULT_LOCK_TIMEOUT);
    }

    #[test]
    fn test_from_toml_str_rejects_minimal_puts() {
        let result = StrategyConfig::from_toml_str(
            r#"
            region = "orders"
            minimal_puts = true
            "#,
        );
        assert!(matches!(result, Err(ConfigError::MinimalPutsUnsupported { .. })));
    }

    #[test]
    fn test_from_toml_str_parse_error() {
        let result = StrategyConfig::from_toml_str("region = ");
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_serde_roundtrip_through_json() {
        let config = StrategyConfig::for_region("accounts")
            .with_lock_timeout(Duration::from_millis(2500));
        let json = serde_json::to_value(&config).expect("serialize should succeed");
        assert_eq!(json["lock_timeout"], 2500);
        let back: StrategyConfig = serde_json::from_value(json).expect("deserialize should succeed");
        assert_eq!(back, config);
    }
}
