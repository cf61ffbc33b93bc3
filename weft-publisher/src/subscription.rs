//! Subscription handler bookkeeping.
//!
//! A handler records which trait instances a subscriber watches, the
//! resume cursor for partially built notifies, and the per-importance
//! event-id high-water marks the engine has vended to this subscriber.
//! All resumable state lives here; the engine re-reads it on every
//! `run()` pass instead of suspending mid-build.

use weft_core::types::{EventId, Importance, SubscriptionId, TraitHandle};

/// One watched trait instance inside a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraitInstanceInfo {
    /// The watched trait instance.
    pub trait_handle: TraitHandle,
    /// Schema version the subscriber requested.
    pub requested_version: u64,
    /// Set when the instance changed since the last retrieval for this
    /// subscriber.
    pub dirty: bool,
    /// Set while the subscriber still needs the whole instance (initial
    /// synchronization), cleared together with `dirty`.
    pub retrieve_all: bool,
}

impl TraitInstanceInfo {
    /// Create an entry pending initial synchronization.
    #[must_use]
    pub const fn new(trait_handle: TraitHandle, requested_version: u64) -> Self {
        Self { trait_handle, requested_version, dirty: true, retrieve_all: true }
    }
}

/// State of one active subscription.
#[derive(Debug)]
pub struct SubscriptionHandler {
    id: SubscriptionId,
    trait_instances: Vec<TraitInstanceInfo>,
    next_trait_idx: usize,
    event_cursors: [EventId; Importance::COUNT],
    notify_in_flight: bool,
    active: bool,
}

impl SubscriptionHandler {
    /// Create a handler watching the given instances.
    ///
    /// Event cursors start at `event_cursors`; a cursor of
    /// [`EventId::NONE`] delivers all retained history for that tier.
    #[must_use]
    pub fn new(
        id: SubscriptionId,
        trait_instances: Vec<TraitInstanceInfo>,
        event_cursors: [EventId; Importance::COUNT],
    ) -> Self {
        Self {
            id,
            trait_instances,
            next_trait_idx: 0,
            event_cursors,
            notify_in_flight: false,
            active: true,
        }
    }

    /// The subscription's id.
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Whether the engine may build a notify for this subscription.
    ///
    /// At most one notify is in flight per subscription.
    #[must_use]
    pub fn is_notifiable(&self) -> bool {
        self.active && !self.notify_in_flight
    }

    /// The watched instances.
    #[must_use]
    pub fn trait_instances(&self) -> &[TraitInstanceInfo] {
        &self.trait_instances
    }

    /// The watched instances, mutably.
    pub fn trait_instances_mut(&mut self) -> &mut [TraitInstanceInfo] {
        &mut self.trait_instances
    }

    /// Whether any watched instance is pending retrieval.
    #[must_use]
    pub fn any_dirty(&self) -> bool {
        self.trait_instances.iter().any(|info| info.dirty)
    }

    /// Mark every watched instance matching `trait_handle` dirty.
    /// Returns how many entries matched.
    pub fn mark_trait_dirty(&mut self, trait_handle: TraitHandle) -> usize {
        let mut marked = 0;
        for info in &mut self.trait_instances {
            if info.trait_handle == trait_handle {
                info.dirty = true;
                marked += 1;
            }
        }
        marked
    }

    /// Index of the instance the next data-list pass starts from.
    #[must_use]
    pub fn next_trait_idx(&self) -> usize {
        self.next_trait_idx
    }

    /// Save the data-list resume cursor.
    pub fn set_next_trait_idx(&mut self, idx: usize) {
        self.next_trait_idx = idx;
    }

    /// Newest event id already vended to this subscriber at `importance`.
    #[must_use]
    pub fn event_cursor(&self, importance: Importance) -> EventId {
        self.event_cursors[importance.index()]
    }

    /// Advance the event cursor for `importance`.
    pub fn set_event_cursor(&mut self, importance: Importance, cursor: EventId) {
        debug_assert!(cursor >= self.event_cursors[importance.index()]);
        self.event_cursors[importance.index()] = cursor;
    }

    /// Whether a notify is currently outstanding for this subscription.
    #[must_use]
    pub fn notify_in_flight(&self) -> bool {
        self.notify_in_flight
    }

    /// Record that a notify was handed to (or confirmed by) the transport.
    pub fn set_notify_in_flight(&mut self, in_flight: bool) {
        self.notify_in_flight = in_flight;
    }

    /// Whether the subscription is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> SubscriptionHandler {
        SubscriptionHandler::new(
            SubscriptionId::new(1),
            vec![TraitInstanceInfo::new(TraitHandle::new(0), 1)],
            [EventId::NONE; Importance::COUNT],
        )
    }

    #[test]
    fn test_new_subscription_pends_initial_sync() {
        let handler = handler();
        assert!(handler.any_dirty());
        assert!(handler.trait_instances()[0].retrieve_all);
        assert!(handler.is_notifiable());
    }

    #[test]
    fn test_in_flight_gates_notifiability() {
        let mut handler = handler();
        handler.set_notify_in_flight(true);
        assert!(!handler.is_notifiable());
        handler.set_notify_in_flight(false);
        assert!(handler.is_notifiable());
    }

    #[test]
    fn test_mark_trait_dirty_matches_by_handle() {
        let mut handler = SubscriptionHandler::new(
            SubscriptionId::new(2),
            vec![
                TraitInstanceInfo::new(TraitHandle::new(0), 1),
                TraitInstanceInfo::new(TraitHandle::new(1), 1),
            ],
            [EventId::NONE; Importance::COUNT],
        );
        for info in handler.trait_instances_mut() {
            info.dirty = false;
        }
        assert_eq!(handler.mark_trait_dirty(TraitHandle::new(1)), 1);
        assert!(!handler.trait_instances()[0].dirty);
        assert!(handler.trait_instances()[1].dirty);
    }

    #[test]
    fn test_event_cursor_only_advances() {
        let mut handler = handler();
        handler.set_event_cursor(Importance::Info, EventId::new(5));
        assert_eq!(handler.event_cursor(Importance::Info), EventId::new(5));
        assert_eq!(handler.event_cursor(Importance::Debug), EventId::NONE);
    }
}
