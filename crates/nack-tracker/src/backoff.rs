use std::time::Duration;

use nack_core::NackError;
use serde::{Deserialize, Serialize};

/// Maps how many times a message was already redelivered to its next nack delay.
pub trait RedeliveryBackoff: Send + Sync {
    fn next_delay(&self, redelivery_count: u32) -> Duration;
}

/// Exponential backoff: `min_delay * multiplier^count`, capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiplierRedeliveryBackoff {
    #[serde(with = "humantime_serde")]
    pub min_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for MultiplierRedeliveryBackoff {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl MultiplierRedeliveryBackoff {
    pub fn new(min_delay: Duration, max_delay: Duration, multiplier: f64) -> Result<Self, NackError> {
        let backoff = Self {
            min_delay,
            max_delay,
            multiplier,
        };
        backoff.validate()?;
        Ok(backoff)
    }

    pub fn validate(&self) -> Result<(), NackError> {
        if self.max_delay < self.min_delay {
            return Err(NackError::InvalidConfig(
                "backoff max_delay must not be below min_delay",
            ));
        }
        if self.multiplier.is_nan() || self.multiplier < 1.0 {
            return Err(NackError::InvalidConfig("backoff multiplier must be >= 1"));
        }
        Ok(())
    }
}

impl RedeliveryBackoff for MultiplierRedeliveryBackoff {
    fn next_delay(&self, redelivery_count: u32) -> Duration {
        if redelivery_count == 0 || self.min_delay.is_zero() {
            return self.min_delay;
        }
        let scaled = self.min_delay.as_millis() as f64
            * self.multiplier.powi(redelivery_count.min(i32::MAX as u32) as i32);
        let capped = scaled.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}
