//! Event log configuration.

use serde::{Deserialize, Serialize};
use weft_core::error::ConfigError;
use weft_core::types::Importance;

use crate::ring::FRAME_HEADER;

/// Smallest permitted tier capacity in bytes.
pub const MIN_TIER_CAPACITY: usize = 128;

/// Configuration for one buffer tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierConfig {
    /// Importance level this tier is the final destination for.
    pub importance: Importance,
    /// Ring capacity in bytes.
    pub capacity: usize,
}

impl TierConfig {
    /// Create a tier configuration.
    #[must_use]
    pub const fn new(importance: Importance, capacity: usize) -> Self {
        Self { importance, capacity }
    }
}

/// Configuration for the tiered event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogConfig {
    /// Buffer tiers in ascending importance order. Events are appended
    /// at the first tier and promoted forward under eviction pressure.
    pub tiers: Vec<TierConfig>,
    /// Events below this importance are dropped without consuming an id.
    pub global_threshold: Importance,
    /// Initial byte budget reserved for one serialized event.
    pub event_size_reserve: usize,
    /// Step by which the budget grows when serialization overflows.
    pub event_size_increment: usize,
    /// Maximum number of concurrently registered external event blocks.
    pub external_registry_capacity: usize,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            tiers: vec![
                TierConfig::new(Importance::Debug, 1024),
                TierConfig::new(Importance::Info, 2048),
                TierConfig::new(Importance::Production, 4096),
            ],
            global_threshold: Importance::Debug,
            event_size_reserve: 160,
            event_size_increment: 32,
            external_registry_capacity: 4,
        }
    }
}

impl EventLogConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the buffer tiers.
    #[must_use]
    pub fn with_tiers(mut self, tiers: Vec<TierConfig>) -> Self {
        self.tiers = tiers;
        self
    }

    /// Set the global importance threshold.
    #[must_use]
    pub fn with_global_threshold(mut self, threshold: Importance) -> Self {
        self.global_threshold = threshold;
        self
    }

    /// Set the initial event serialization budget.
    #[must_use]
    pub fn with_event_size_reserve(mut self, reserve: usize) -> Self {
        self.event_size_reserve = reserve;
        self
    }

    /// Set the serialization budget growth step.
    #[must_use]
    pub fn with_event_size_increment(mut self, increment: usize) -> Self {
        self.event_size_increment = increment;
        self
    }

    /// Set the external event registry capacity.
    #[must_use]
    pub fn with_external_registry_capacity(mut self, capacity: usize) -> Self {
        self.external_registry_capacity = capacity;
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if any value is out of range. A valid
    /// configuration guarantees the log can always make forward
    /// progress: the minimum serialization reserve fits every tier.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tiers.is_empty() {
            return Err(ConfigError::new("tiers", "at least one tier is required"));
        }
        for window in self.tiers.windows(2) {
            if window[1].importance <= window[0].importance {
                return Err(ConfigError::new(
                    "tiers",
                    "tier importance must be strictly increasing",
                ));
            }
        }
        for (index, tier) in self.tiers.iter().enumerate() {
            if tier.capacity < MIN_TIER_CAPACITY {
                return Err(ConfigError::new(
                    "tiers",
                    format!(
                        "tier {index} capacity {} below minimum {MIN_TIER_CAPACITY}",
                        tier.capacity
                    ),
                ));
            }
        }
        if self.event_size_reserve < 64 {
            return Err(ConfigError::new("event_size_reserve", "must be at least 64"));
        }
        let smallest = self.tiers.iter().map(|t| t.capacity).min().unwrap_or(0);
        if self.event_size_reserve + FRAME_HEADER > smallest {
            return Err(ConfigError::new(
                "event_size_reserve",
                format!("framed reserve must fit the smallest tier ({smallest} bytes)"),
            ));
        }
        if self.event_size_increment < 8 {
            return Err(ConfigError::new("event_size_increment", "must be at least 8"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EventLogConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_empty_tiers() {
        let config = EventLogConfig::default().with_tiers(Vec::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unordered_tiers() {
        let config = EventLogConfig::default().with_tiers(vec![
            TierConfig::new(Importance::Info, 1024),
            TierConfig::new(Importance::Debug, 1024),
        ]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_tiny_tier() {
        let config = EventLogConfig::default()
            .with_tiers(vec![TierConfig::new(Importance::Production, 64)]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_reserve_exceeding_smallest_tier() {
        let config = EventLogConfig::default()
            .with_tiers(vec![
                TierConfig::new(Importance::Debug, 256),
                TierConfig::new(Importance::Production, 4096),
            ])
            .with_event_size_reserve(256);
        assert!(config.validate().is_err());
    }
}
