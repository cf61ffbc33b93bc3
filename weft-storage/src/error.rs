//! Event log error types.

use thiserror::Error;
use weft_core::error::{ConfigError, WireError};

/// Result type alias for event log operations.
pub type EventLogResult<T> = Result<T, EventLogError>;

/// Errors raised by the tiered event log.
#[derive(Error, Debug)]
pub enum EventLogError {
    /// A space reservation exceeded a tier's total capacity.
    #[error("Insufficient space: required {required} bytes exceed tier capacity {capacity}")]
    BufferTooSmall {
        /// Bytes the reservation required.
        required: usize,
        /// Total capacity of the tier that could not satisfy it.
        capacity: usize,
    },

    /// A serialized event cannot transit every tier on its eviction path.
    ///
    /// Such an event could never be evicted forward and would wedge the
    /// log, so it is dropped at append time instead.
    #[error("Event of {size} bytes cannot transit tier {tier_index} (capacity {capacity})")]
    EventTooLarge {
        /// Framed size of the serialized event.
        size: usize,
        /// Index of the tier it does not fit.
        tier_index: usize,
        /// That tier's total capacity.
        capacity: usize,
    },

    /// The external event registry has no free slots.
    #[error("External event registry full: capacity {capacity}")]
    ExternalRegistryFull {
        /// Registry capacity.
        capacity: usize,
    },

    /// A resident record failed to decode.
    #[error("Corrupt record in tier {tier_index}: {details}")]
    CorruptRecord {
        /// Tier holding the record.
        tier_index: usize,
        /// Decode failure details.
        details: String,
    },

    /// Wire encoding failed.
    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    /// Configuration validation failed.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl EventLogError {
    /// Check whether this error is a recoverable out-of-space condition.
    #[must_use]
    pub fn is_out_of_space(&self) -> bool {
        match self {
            Self::BufferTooSmall { .. } => true,
            Self::Wire(wire) => wire.is_no_memory(),
            _ => false,
        }
    }

    /// Create a corrupt-record error from a wire decode failure.
    #[must_use]
    pub fn corrupt(tier_index: usize, source: &WireError) -> Self {
        Self::CorruptRecord { tier_index, details: source.to_string() }
    }
}
