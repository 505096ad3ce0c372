use serde::{Deserialize, Serialize};

/// Default ceiling on queued (not yet started) operations per lane.
pub const DEFAULT_MAX_PIN_QUEUE_SIZE: usize = 50_000;
/// Default number of pin calls sent to the daemon in parallel.
pub const DEFAULT_CONCURRENT_PINS: usize = 10;
/// Unpin calls are always processed one by one.
pub const UNPIN_CONCURRENCY: usize = 1;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("tracker.max_pin_queue_size too low")]
    MaxPinQueueSizeTooLow,
    #[error("tracker.concurrent_pins is too low")]
    ConcurrentPinsTooLow,
}

/// Tuning knobs of the pin tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Operations beyond this many waiting in a lane are rejected with
    /// `TrackerError::QueueFull`.
    pub max_pin_queue_size: usize,
    /// How many pin requests are sent to the daemon in parallel.
    pub concurrent_pins: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_pin_queue_size: DEFAULT_MAX_PIN_QUEUE_SIZE,
            concurrent_pins: DEFAULT_CONCURRENT_PINS,
        }
    }
}

impl TrackerConfig {
    /// Checks that the fields have working values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_pin_queue_size == 0 {
            return Err(ConfigError::MaxPinQueueSizeTooLow);
        }
        if self.concurrent_pins == 0 {
            return Err(ConfigError::ConcurrentPinsTooLow);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = TrackerConfig::default();
        assert_eq!(cfg.max_pin_queue_size, 50_000);
        assert_eq!(cfg.concurrent_pins, 10);
        assert_eq!(cfg.validate(), Ok(()));
    }

    #[test]
    fn test_validate_rejects_zero() {
        let cfg = TrackerConfig {
            max_pin_queue_size: 0,
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::MaxPinQueueSizeTooLow));

        let cfg = TrackerConfig {
            concurrent_pins: 0,
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::ConcurrentPinsTooLow));
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let cfg: TrackerConfig = serde_json::from_str(r#"{"concurrent_pins": 3}"#).unwrap();
        assert_eq!(cfg.concurrent_pins, 3);
        assert_eq!(cfg.max_pin_queue_size, DEFAULT_MAX_PIN_QUEUE_SIZE);
    }
}
