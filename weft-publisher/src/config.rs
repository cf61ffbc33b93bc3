//! Engine and solver configuration.

use serde::{Deserialize, Serialize};
use weft_core::error::ConfigError;

/// Configuration for the notification engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of concurrently active subscriptions.
    pub max_subscriptions: usize,
    /// System-wide cap on outstanding notify buffers. This gates the
    /// whole engine, not one subscription.
    pub max_notifies_in_flight: u32,
    /// Smallest acceptable notify buffer the transport may hand back.
    pub min_notification_size: usize,
    /// Notify buffer size requested from the transport.
    pub max_notification_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_subscriptions: 8,
            max_notifies_in_flight: 2,
            min_notification_size: 128,
            max_notification_size: 1024,
        }
    }
}

impl EngineConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the subscription table capacity.
    #[must_use]
    pub fn with_max_subscriptions(mut self, max_subscriptions: usize) -> Self {
        self.max_subscriptions = max_subscriptions;
        self
    }

    /// Set the outstanding-notify cap.
    #[must_use]
    pub fn with_max_notifies_in_flight(mut self, max_notifies_in_flight: u32) -> Self {
        self.max_notifies_in_flight = max_notifies_in_flight;
        self
    }

    /// Set the minimum acceptable notify buffer size.
    #[must_use]
    pub fn with_min_notification_size(mut self, min_notification_size: usize) -> Self {
        self.min_notification_size = min_notification_size;
        self
    }

    /// Set the notify buffer size requested from the transport.
    #[must_use]
    pub fn with_max_notification_size(mut self, max_notification_size: usize) -> Self {
        self.max_notification_size = max_notification_size;
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_subscriptions == 0 {
            return Err(ConfigError::new("max_subscriptions", "must be greater than 0"));
        }
        if self.max_notifies_in_flight == 0 {
            return Err(ConfigError::new("max_notifies_in_flight", "must be greater than 0"));
        }
        if self.min_notification_size < 64 {
            return Err(ConfigError::new("min_notification_size", "must be at least 64"));
        }
        if self.max_notification_size < self.min_notification_size {
            return Err(ConfigError::new(
                "max_notification_size",
                "must be at least min_notification_size",
            ));
        }
        Ok(())
    }
}

/// Configuration for the graph solver's fixed stores.
///
/// The stores are arena-style fixed arrays on purpose: overflowing one
/// escalates the owning trait to root-dirty, which is load-bearing
/// behavior, not an optimization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Capacity of the granular dirty-path store.
    pub dirty_store_capacity: usize,
    /// Capacity of the dictionary-deletion store. Zero disables
    /// dictionary delete tracking.
    pub delete_store_capacity: usize,
    /// Bound on the per-retrieval merge handle set; overflow degrades to
    /// "send all children of the common handle".
    pub merge_set_capacity: usize,
    /// Bound on the per-retrieval delete handle set; overflow degrades
    /// to "replace the whole dictionary".
    pub delete_set_capacity: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            dirty_store_capacity: 16,
            delete_store_capacity: 8,
            merge_set_capacity: 8,
            delete_set_capacity: 4,
        }
    }
}

impl SolverConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the dirty store capacity.
    #[must_use]
    pub fn with_dirty_store_capacity(mut self, capacity: usize) -> Self {
        self.dirty_store_capacity = capacity;
        self
    }

    /// Set the delete store capacity (zero disables delete tracking).
    #[must_use]
    pub fn with_delete_store_capacity(mut self, capacity: usize) -> Self {
        self.delete_store_capacity = capacity;
        self
    }

    /// Set the merge set bound.
    #[must_use]
    pub fn with_merge_set_capacity(mut self, capacity: usize) -> Self {
        self.merge_set_capacity = capacity;
        self
    }

    /// Set the delete set bound.
    #[must_use]
    pub fn with_delete_set_capacity(mut self, capacity: usize) -> Self {
        self.delete_set_capacity = capacity;
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dirty_store_capacity == 0 {
            return Err(ConfigError::new("dirty_store_capacity", "must be greater than 0"));
        }
        if self.merge_set_capacity == 0 {
            return Err(ConfigError::new("merge_set_capacity", "must be greater than 0"));
        }
        if self.delete_set_capacity == 0 {
            return Err(ConfigError::new("delete_set_capacity", "must be greater than 0"));
        }
        Ok(())
    }
}
