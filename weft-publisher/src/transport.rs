//! Transport boundary for notify dispatch.
//!
//! The engine only needs two primitives from its transport: allocate a
//! right-sized outbound buffer and hand off a serialized notify. A sent
//! buffer belongs to the transport; the engine never retracts one.

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;

use weft_core::types::SubscriptionId;

use crate::error::{PublisherError, PublisherResult};

/// Transport consumed by the notification engine.
pub trait NotifyTransport: Send + Sync {
    /// Allocate an outbound buffer of up to `desired` payload bytes.
    ///
    /// Returns the buffer and the payload budget it actually supports,
    /// which must be at least `min`.
    ///
    /// # Errors
    /// Returns a transport error when no buffer of at least `min` bytes
    /// is available. The engine treats this as fatal to the
    /// subscription being served.
    fn allocate_buffer(&self, desired: usize, min: usize) -> PublisherResult<(BytesMut, usize)>;

    /// Hand a serialized notify to the wire.
    ///
    /// # Errors
    /// Returns a transport error on send failure; the engine terminates
    /// the subscription.
    fn send_notify(&self, subscription: SubscriptionId, payload: Bytes) -> PublisherResult<()>;
}

/// In-process transport that records every dispatched notify.
///
/// Useful for tests and single-process wiring; the payload budget can
/// be capped to exercise the engine's rollover behavior under small
/// buffers.
#[derive(Debug)]
pub struct LoopbackTransport {
    buffer_size: usize,
    fail_sends: Mutex<bool>,
    sent: Mutex<Vec<(SubscriptionId, Bytes)>>,
}

impl LoopbackTransport {
    /// Create a transport granting whatever buffer size is requested.
    #[must_use]
    pub fn new() -> Self {
        Self::with_buffer_size(usize::MAX)
    }

    /// Create a transport capping every allocation at `buffer_size`.
    #[must_use]
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self { buffer_size, fail_sends: Mutex::new(false), sent: Mutex::new(Vec::new()) }
    }

    /// Make subsequent sends fail (to exercise termination paths).
    pub fn set_fail_sends(&self, fail: bool) {
        *self.fail_sends.lock() = fail;
    }

    /// Number of notifies dispatched so far.
    #[must_use]
    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    /// Drain the recorded notifies.
    #[must_use]
    pub fn take_sent(&self) -> Vec<(SubscriptionId, Bytes)> {
        std::mem::take(&mut *self.sent.lock())
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyTransport for LoopbackTransport {
    fn allocate_buffer(&self, desired: usize, min: usize) -> PublisherResult<(BytesMut, usize)> {
        let granted = desired.min(self.buffer_size);
        if granted < min {
            return Err(PublisherError::transport(format!(
                "cannot allocate {min} bytes, only {granted} available"
            )));
        }
        Ok((BytesMut::with_capacity(granted), granted))
    }

    fn send_notify(&self, subscription: SubscriptionId, payload: Bytes) -> PublisherResult<()> {
        if *self.fail_sends.lock() {
            return Err(PublisherError::transport("send failed"));
        }
        self.sent.lock().push((subscription, payload));
        Ok(())
    }
}
