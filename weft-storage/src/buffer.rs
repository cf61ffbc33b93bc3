//! One importance tier of the event log.
//!
//! A tier owns a byte ring plus the id/timestamp bookkeeping for the
//! importance level it is the final destination of: the id range still
//! alive anywhere in the chain, the timestamp anchor of the oldest
//! resident event, and the counter that vends this importance's ids.
//! Tiers are addressed by index in the log's owned array; neighbor
//! relationships are index arithmetic, not pointers.

use weft_core::types::{EventId, Importance, Timestamp};

use crate::counter::MonotonicCounter;
use crate::ring::CircularBuffer;

/// One buffer tier in the importance-ordered chain.
#[derive(Debug)]
pub struct EventBuffer {
    ring: CircularBuffer,
    importance: Importance,
    counter: Box<dyn MonotonicCounter>,
    first_event_id: EventId,
    last_event_id: EventId,
    first_event_timestamp: Timestamp,
    last_event_timestamp: Timestamp,
}

impl EventBuffer {
    /// Create a tier over a fresh ring.
    #[must_use]
    pub fn new(importance: Importance, capacity: usize, counter: Box<dyn MonotonicCounter>) -> Self {
        let first = EventId::new(counter.value());
        Self {
            ring: CircularBuffer::new(capacity),
            importance,
            counter,
            first_event_id: first,
            last_event_id: EventId::new(first.value().saturating_sub(1)),
            first_event_timestamp: Timestamp::default(),
            last_event_timestamp: Timestamp::default(),
        }
    }

    /// Importance level this tier is the final destination for.
    #[must_use]
    pub fn importance(&self) -> Importance {
        self.importance
    }

    /// Total ring capacity in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// The tier's ring.
    #[must_use]
    pub fn ring(&self) -> &CircularBuffer {
        &self.ring
    }

    /// The tier's ring, mutably.
    pub fn ring_mut(&mut self) -> &mut CircularBuffer {
        &mut self.ring
    }

    /// Next id this tier's counter will vend.
    #[must_use]
    pub fn next_event_id(&self) -> EventId {
        EventId::new(self.counter.value())
    }

    /// Oldest id of this importance still alive anywhere in the chain.
    #[must_use]
    pub fn first_event_id(&self) -> EventId {
        self.first_event_id
    }

    /// Newest id vended for this importance.
    #[must_use]
    pub fn last_event_id(&self) -> EventId {
        self.last_event_id
    }

    /// Timestamp anchor of the oldest alive event (the timestamp of the
    /// most recently dropped one).
    #[must_use]
    pub fn first_event_timestamp(&self) -> Timestamp {
        self.first_event_timestamp
    }

    /// Timestamp of the newest event of this importance.
    #[must_use]
    pub fn last_event_timestamp(&self) -> Timestamp {
        self.last_event_timestamp
    }

    /// Vend the next id for this importance and record its timestamp.
    pub fn vend_id(&mut self, timestamp: Timestamp) -> EventId {
        let id = EventId::new(self.counter.advance());
        self.last_event_id = id;
        self.last_event_timestamp = timestamp;
        id
    }

    /// Vend a contiguous id range (for external blocks).
    pub fn vend_range(&mut self, count: u64, timestamp: Timestamp) -> (EventId, EventId) {
        debug_assert!(count > 0);
        let first = EventId::new(self.counter.advance());
        let mut last = first;
        for _ in 1..count {
            last = EventId::new(self.counter.advance());
        }
        self.last_event_id = last;
        self.last_event_timestamp = timestamp;
        (first, last)
    }

    /// Record that the event with `event_id` was dropped for good.
    ///
    /// Dropping only ever advances the first-id watermark; ids are never
    /// reclaimed.
    pub fn record_dropped(&mut self, event_id: EventId, timestamp: Timestamp) {
        debug_assert_eq!(
            event_id, self.first_event_id,
            "events of one importance are dropped strictly oldest-first"
        );
        self.first_event_id = event_id.next();
        self.first_event_timestamp = timestamp;
    }

    /// Record that an external block covering up to `last_id` was dropped.
    pub fn record_block_dropped(&mut self, last_id: EventId) {
        debug_assert!(last_id >= self.first_event_id);
        self.first_event_id = last_id.next();
    }
}
