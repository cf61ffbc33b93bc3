//! Publisher error types.

use thiserror::Error;

use weft_core::error::{ConfigError, WireError};
use weft_core::types::{SubscriptionId, TraitHandle};
use weft_storage::EventLogError;

use crate::builder::BuilderState;

/// Result type alias for publisher operations.
pub type PublisherResult<T> = Result<T, PublisherError>;

/// Errors raised by the notification engine and its collaborators.
#[derive(Error, Debug)]
pub enum PublisherError {
    /// Wire serialization failed.
    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    /// Event log operation failed.
    #[error("Event log error: {0}")]
    EventLog(#[from] EventLogError),

    /// The notify builder was asked for an impossible transition.
    #[error("Invalid builder transition from {from:?} to {to:?}")]
    InvalidTransition {
        /// State the builder was in.
        from: BuilderState,
        /// State that was requested.
        to: BuilderState,
    },

    /// The subscription table has no free slots.
    #[error("Subscription table full: capacity {capacity}")]
    SubscriptionTableFull {
        /// Table capacity.
        capacity: usize,
    },

    /// No subscription with the given id is active.
    #[error("Unknown subscription {0}")]
    UnknownSubscription(SubscriptionId),

    /// The trait handle is not published in the catalog.
    #[error("Unknown trait handle {0}")]
    UnknownTrait(TraitHandle),

    /// The transport failed to allocate or send.
    #[error("Transport failure: {message}")]
    Transport {
        /// What the transport reported.
        message: String,
    },

    /// Configuration validation failed.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl PublisherError {
    /// Check whether this error is a recoverable out-of-space condition
    /// (rollback and retry next round), as opposed to a failure that
    /// terminates the subscription.
    #[must_use]
    pub fn is_out_of_space(&self) -> bool {
        match self {
            Self::Wire(wire) => wire.is_no_memory(),
            Self::EventLog(log) => log.is_out_of_space(),
            _ => false,
        }
    }

    /// Create a transport failure error.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport { message: message.into() }
    }
}
