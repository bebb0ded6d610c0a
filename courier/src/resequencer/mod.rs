//! Reordering out-of-order exchange streams.
//!
//! Two strategies share one comparator abstraction: the batch
//! resequencer collects a window of exchanges and releases it sorted;
//! the stream resequencer maintains a sliding sorted buffer and emits an
//! exchange as soon as its predecessor has gone out, or its wait
//! timeout expires. Both accept exchanges as ordinary processors, so they
//! compose into pipelines like any other step.

mod batch;
mod comparator;
mod stream;

pub use batch::BatchResequencer;
pub use comparator::{HeaderSequenceComparator, SequenceComparator};
pub use stream::StreamResequencer;

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What to do when the next in-sequence exchange has not arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GapPolicy {
    /// Hold ready successors back until the gap fills or times out.
    #[default]
    Wait,
    /// Emit in buffer order without waiting for gaps to fill.
    ForceEmit,
}

/// Configuration for [`BatchResequencer`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Number of exchanges that triggers an immediate flush.
    pub batch_size: usize,
    /// How long a partially filled batch may wait before flushing.
    pub timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            timeout: Duration::from_secs(1),
        }
    }
}

impl BatchConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidResequencer(
                "batch size must be at least 1".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::InvalidResequencer(
                "batch timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for [`StreamResequencer`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Maximum number of buffered exchanges before the head is forced out.
    pub capacity: usize,
    /// How long an exchange may wait for its predecessor.
    pub timeout: Duration,
    /// Behavior when the next in-sequence exchange is missing.
    pub gap_policy: GapPolicy,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            timeout: Duration::from_secs(1),
            gap_policy: GapPolicy::Wait,
        }
    }
}

impl StreamConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::InvalidResequencer(
                "capacity must be at least 1".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::InvalidResequencer(
                "timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_config_validation() {
        assert!(BatchConfig::default().validate().is_ok());

        let zero_size = BatchConfig {
            batch_size: 0,
            ..BatchConfig::default()
        };
        assert!(zero_size.validate().is_err());

        let zero_timeout = BatchConfig {
            timeout: Duration::ZERO,
            ..BatchConfig::default()
        };
        assert!(zero_timeout.validate().is_err());
    }

    #[test]
    fn test_stream_config_validation() {
        assert!(StreamConfig::default().validate().is_ok());

        let zero_capacity = StreamConfig {
            capacity: 0,
            ..StreamConfig::default()
        };
        assert!(zero_capacity.validate().is_err());

        let zero_timeout = StreamConfig {
            timeout: Duration::ZERO,
            ..StreamConfig::default()
        };
        assert!(zero_timeout.validate().is_err());
    }
}
