//! Error types for the Weft core library.

use thiserror::Error;

/// Errors raised by the bounded wire writer and reader.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// The writer ran out of space before the element was complete.
    #[error("Writer out of space: needed {needed} more bytes, {available} available")]
    NoMemory {
        /// Additional bytes the element required.
        needed: usize,
        /// Bytes still available in the writer.
        available: usize,
    },

    /// Container open/close calls did not balance.
    #[error("Container nesting violation: {message}")]
    Nesting {
        /// What went wrong.
        message: String,
    },

    /// The reader encountered a malformed element.
    #[error("Malformed element at offset {offset}: {message}")]
    Malformed {
        /// Byte offset of the offending element.
        offset: usize,
        /// What was malformed.
        message: String,
    },

    /// The reader ran off the end of the input.
    #[error("Unexpected end of input at offset {offset}")]
    UnexpectedEnd {
        /// Byte offset where input ended.
        offset: usize,
    },
}

impl WireError {
    /// Check whether this error is a recoverable out-of-space condition.
    ///
    /// Out-of-space is the one wire error callers are expected to handle
    /// by rolling back to a checkpoint and retrying with a larger budget
    /// or in a later round; every other variant indicates corrupt input
    /// or a caller bug.
    #[must_use]
    pub fn is_no_memory(&self) -> bool {
        matches!(self, Self::NoMemory { .. })
    }

    /// Create a nesting violation error.
    #[must_use]
    pub fn nesting(message: impl Into<String>) -> Self {
        Self::Nesting { message: message.into() }
    }

    /// Create a malformed-element error.
    #[must_use]
    pub fn malformed(offset: usize, message: impl Into<String>) -> Self {
        Self::Malformed { offset, message: message.into() }
    }
}

/// Result type alias for wire operations.
pub type WireResult<T> = Result<T, WireError>;

/// Error raised when a configuration value fails validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Configuration error: {parameter} is invalid: {reason}")]
pub struct ConfigError {
    /// Configuration parameter with the invalid value.
    pub parameter: String,
    /// Reason why the value is invalid.
    pub reason: String,
}

impl ConfigError {
    /// Create a new configuration error.
    #[must_use]
    pub fn new(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self { parameter: parameter.into(), reason: reason.into() }
    }
}
