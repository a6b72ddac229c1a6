use std::fs;
use std::path::Path;
use std::time::Duration;

use nack_core::{NackError, PrecisionBits, DEFAULT_PRECISION_BITS};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backoff::MultiplierRedeliveryBackoff;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error(transparent)]
    Invalid(#[from] NackError),
}

/// Tracker configuration, immutable for the lifetime of one tracker.
///
/// ```toml
/// precision_bits = 8
/// nack_delay = "1m"
///
/// [backoff]
/// min_delay = "1s"
/// max_delay = "10m"
/// multiplier = 2.0
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NackTrackerConfig {
    /// Low-order due-time bits zeroed when bucketing, in `[0, 63]`.
    pub precision_bits: u32,
    /// Delay applied when a nack carries no explicit delay.
    #[serde(with = "humantime_serde")]
    pub nack_delay: Duration,
    /// Optional redelivery-count based delay; overrides `nack_delay` when set.
    pub backoff: Option<MultiplierRedeliveryBackoff>,
    /// Name given to the timer worker thread.
    pub timer_thread_name: String,
}

impl Default for NackTrackerConfig {
    fn default() -> Self {
        Self {
            precision_bits: DEFAULT_PRECISION_BITS,
            nack_delay: Duration::from_secs(60),
            backoff: None,
            timer_thread_name: "nack-timer".to_string(),
        }
    }
}

impl NackTrackerConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), NackError> {
        self.precision()?;
        if let Some(backoff) = &self.backoff {
            backoff.validate()?;
        }
        Ok(())
    }

    /// Returns the validated bucketing precision.
    pub fn precision(&self) -> Result<PrecisionBits, NackError> {
        PrecisionBits::new(self.precision_bits)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{ConfigError, NackTrackerConfig};
    use nack_core::NackError;

    #[test]
    fn defaults_are_valid() {
        let cfg = NackTrackerConfig::default();
        assert_eq!(cfg.precision_bits, 8);
        assert_eq!(cfg.nack_delay, Duration::from_secs(60));
        assert!(cfg.backoff.is_none());
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.precision().map(|p| p.span_millis()), Ok(256));
    }

    #[test]
    fn parses_toml_with_backoff_table() {
        let cfg = NackTrackerConfig::from_toml_str(
            r#"
            precision_bits = 3
            nack_delay = "250ms"

            [backoff]
            min_delay = "100ms"
            max_delay = "5s"
            multiplier = 3.0
            "#,
        )
        .expect("config should parse");

        assert_eq!(cfg.precision_bits, 3);
        assert_eq!(cfg.nack_delay, Duration::from_millis(250));
        let backoff = cfg.backoff.expect("backoff should be set");
        assert_eq!(backoff.min_delay, Duration::from_millis(100));
        assert_eq!(backoff.max_delay, Duration::from_secs(5));
        assert_eq!(backoff.multiplier, 3.0);
        assert_eq!(cfg.timer_thread_name, "nack-timer");
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let cfg = NackTrackerConfig::from_toml_str("").expect("empty config should parse");
        assert_eq!(cfg, NackTrackerConfig::default());
    }

    #[test]
    fn rejects_out_of_range_precision() {
        let err = NackTrackerConfig::from_toml_str("precision_bits = 64")
            .expect_err("precision 64 should be rejected");
        assert!(matches!(
            err,
            ConfigError::Invalid(NackError::InvalidPrecisionBits(64))
        ));
    }

    #[test]
    fn rejects_malformed_toml() {
        let err = NackTrackerConfig::from_toml_str("precision_bits = \"eight\"")
            .expect_err("string precision should be rejected");
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = NackTrackerConfig::load("/nonexistent/nack-tracker.toml")
            .expect_err("missing file should fail");
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
