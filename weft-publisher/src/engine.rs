//! The notification engine.
//!
//! `run()` makes one bounded round-robin pass over the subscription
//! table under a single coarse lock: for each notifiable subscription
//! it fills one right-sized notify buffer — data-element diffs first,
//! then events by importance — and hands it to the transport. All
//! resumable state (trait cursor, event cursors) lives on the handler,
//! so a partially served subscription simply picks up where it left off
//! on the next pass. Any error while building or sending terminates
//! that one subscription and nothing else.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use weft_core::schema::{PropertySchema, TraitCatalog};
use weft_core::types::{EventId, Importance, PathHandle, SubscriptionId, TraitHandle};
use weft_storage::EventLog;

use crate::builder::{BuilderState, NotifyRequestBuilder};
use crate::config::{EngineConfig, SolverConfig};
use crate::error::{PublisherError, PublisherResult};
use crate::solver::IntermediateGraphSolver;
use crate::subscription::{SubscriptionHandler, TraitInstanceInfo};
use crate::transport::NotifyTransport;

/// Observer of subscription lifecycle events.
pub trait SubscriptionEvents: Send + Sync {
    /// A subscription was terminated because building or sending its
    /// notify failed.
    fn on_subscription_terminated(&self, id: SubscriptionId, error: &PublisherError);
}

struct EngineInner {
    catalog: TraitCatalog,
    solver: IntermediateGraphSolver,
    subscriptions: Vec<Option<SubscriptionHandler>>,
    cur_subscription_idx: usize,
    notifies_in_flight: u32,
    next_subscription_id: u64,
    events: Arc<EventLog>,
    transport: Arc<dyn NotifyTransport>,
    observer: Option<Box<dyn SubscriptionEvents>>,
}

struct BuildReport {
    sent: bool,
    clean: bool,
}

/// Publisher-side orchestrator: owns the trait catalog, the graph
/// solver, and the subscription table.
pub struct NotificationEngine {
    config: EngineConfig,
    inner: Mutex<EngineInner>,
}

impl NotificationEngine {
    /// Create an engine.
    ///
    /// # Errors
    /// Returns an error when either configuration fails validation.
    pub fn new(
        config: EngineConfig,
        solver_config: SolverConfig,
        catalog: TraitCatalog,
        events: Arc<EventLog>,
        transport: Arc<dyn NotifyTransport>,
    ) -> PublisherResult<Self> {
        config.validate()?;
        let solver = IntermediateGraphSolver::new(solver_config)?;
        let subscriptions = (0..config.max_subscriptions).map(|_| None).collect();
        Ok(Self {
            config,
            inner: Mutex::new(EngineInner {
                catalog,
                solver,
                subscriptions,
                cur_subscription_idx: 0,
                notifies_in_flight: 0,
                next_subscription_id: 0,
                events,
                transport,
                observer: None,
            }),
        })
    }

    /// Install a lifecycle observer.
    pub fn set_observer(&self, observer: Box<dyn SubscriptionEvents>) {
        self.inner.lock().observer = Some(observer);
    }

    /// Publish a trait instance into the catalog.
    ///
    /// # Errors
    /// Returns an error when the catalog is full.
    pub fn publish_trait(&self, schema: Arc<PropertySchema>) -> PublisherResult<TraitHandle> {
        Ok(self.inner.lock().catalog.publish(schema)?)
    }

    /// Create a subscription watching `traits`, delivering all retained
    /// event history.
    ///
    /// # Errors
    /// Returns an error when the table is full or a handle is unknown.
    pub fn subscribe(&self, traits: &[(TraitHandle, u64)]) -> PublisherResult<SubscriptionId> {
        self.subscribe_with_cursors(traits, [EventId::NONE; Importance::COUNT])
    }

    /// Create a subscription with explicit per-importance event cursors
    /// (the newest ids the subscriber has already seen).
    ///
    /// # Errors
    /// Returns an error when the table is full or a handle is unknown.
    pub fn subscribe_with_cursors(
        &self,
        traits: &[(TraitHandle, u64)],
        event_cursors: [EventId; Importance::COUNT],
    ) -> PublisherResult<SubscriptionId> {
        let mut inner = self.inner.lock();
        for (handle, _) in traits {
            if inner.catalog.get(*handle).is_none() {
                return Err(PublisherError::UnknownTrait(*handle));
            }
        }
        let capacity = inner.subscriptions.len();
        let Some(slot) = inner.subscriptions.iter().position(Option::is_none) else {
            return Err(PublisherError::SubscriptionTableFull { capacity });
        };
        inner.next_subscription_id += 1;
        let id = SubscriptionId::new(inner.next_subscription_id);
        let infos = traits
            .iter()
            .map(|&(handle, version)| TraitInstanceInfo::new(handle, version))
            .collect();
        inner.subscriptions[slot] = Some(SubscriptionHandler::new(id, infos, event_cursors));
        debug!(subscription = %id, traits = traits.len(), "subscription established");
        Ok(id)
    }

    /// Terminate a subscription immediately.
    ///
    /// Synchronous: the handler is gone when this returns. A notify
    /// already handed to the transport is not retracted.
    ///
    /// # Errors
    /// Returns [`PublisherError::UnknownSubscription`] when not active.
    pub fn handle_subscription_terminated(&self, id: SubscriptionId) -> PublisherResult<()> {
        let mut inner = self.inner.lock();
        let slot = inner
            .subscriptions
            .iter()
            .position(|entry| entry.as_ref().is_some_and(|handler| handler.id() == id))
            .ok_or(PublisherError::UnknownSubscription(id))?;
        let handler = inner.subscriptions[slot].take();
        if handler.is_some_and(|h| h.notify_in_flight()) {
            inner.notifies_in_flight = inner.notifies_in_flight.saturating_sub(1);
        }
        debug!(subscription = %id, "subscription terminated");
        Ok(())
    }

    /// Mark a path of a published trait dirty.
    ///
    /// # Errors
    /// Returns [`PublisherError::UnknownTrait`] for unpublished handles.
    pub fn set_dirty(&self, trait_handle: TraitHandle, path: PathHandle) -> PublisherResult<()> {
        let mut inner = self.inner.lock();
        let EngineInner { catalog, solver, subscriptions, .. } = &mut *inner;
        solver.set_dirty(catalog, subscriptions, trait_handle, path)
    }

    /// Record the deletion of a dictionary element of a published trait.
    ///
    /// # Errors
    /// Returns [`PublisherError::UnknownTrait`] for unpublished handles.
    pub fn delete_key(&self, trait_handle: TraitHandle, path: PathHandle) -> PublisherResult<()> {
        let mut inner = self.inner.lock();
        let EngineInner { catalog, solver, subscriptions, .. } = &mut *inner;
        solver.delete_key(catalog, subscriptions, trait_handle, path)
    }

    /// A notify for `id` was confirmed delivered; its buffer slot is
    /// free again.
    ///
    /// # Errors
    /// Returns [`PublisherError::UnknownSubscription`] when not active.
    pub fn on_notify_confirm(&self, id: SubscriptionId) -> PublisherResult<()> {
        let mut inner = self.inner.lock();
        let mut found = false;
        for handler in inner.subscriptions.iter_mut().flatten() {
            if handler.id() == id {
                handler.set_notify_in_flight(false);
                found = true;
                break;
            }
        }
        if !found {
            return Err(PublisherError::UnknownSubscription(id));
        }
        inner.notifies_in_flight = inner.notifies_in_flight.saturating_sub(1);
        trace!(subscription = %id, "notify confirmed");
        Ok(())
    }

    /// Outstanding notify buffers across all subscriptions.
    #[must_use]
    pub fn notifies_in_flight(&self) -> u32 {
        self.inner.lock().notifies_in_flight
    }

    /// Ids of the active subscriptions.
    #[must_use]
    pub fn active_subscriptions(&self) -> Vec<SubscriptionId> {
        self.inner.lock().subscriptions.iter().flatten().map(SubscriptionHandler::id).collect()
    }

    /// Whether the solver still holds granular dirty state.
    #[must_use]
    pub fn has_dirty_state(&self) -> bool {
        let inner = self.inner.lock();
        inner.solver.dirty_len() > 0
            || inner.solver.deleted_len() > 0
            || inner.catalog.iter().any(|(_, instance)| instance.is_root_dirty())
    }

    /// Make one bounded pass over the subscription table.
    ///
    /// The pass ends after a full quiet cycle (every subscription
    /// handled with nothing left to write) or when the notify admission
    /// gate closes; a subscription that filled its buffer resets the
    /// quiet count, bounding total work to one buffer per active
    /// subscription per call. Afterwards, if no active subscription has
    /// dirty trait instances left, the solver's granular state is
    /// cleared (global quiescence).
    pub fn run(&self) {
        let mut inner = self.inner.lock();
        let table_size = inner.subscriptions.len();
        let mut consecutive_handled = 0usize;

        while consecutive_handled < table_size {
            if inner.notifies_in_flight >= self.config.max_notifies_in_flight {
                trace!(in_flight = inner.notifies_in_flight, "notify admission gate closed");
                break;
            }
            let idx = inner.cur_subscription_idx;
            inner.cur_subscription_idx = (idx + 1) % table_size;

            // Take the handler out of its slot for the duration of the
            // build so the table stays borrowable.
            let Some(mut handler) = inner.subscriptions[idx].take() else {
                consecutive_handled += 1;
                continue;
            };
            if !handler.is_notifiable() {
                inner.subscriptions[idx] = Some(handler);
                consecutive_handled += 1;
                continue;
            }

            match Self::build_single_notify_request(&self.config, &mut inner, &mut handler) {
                Ok(report) => {
                    if report.sent {
                        handler.set_notify_in_flight(true);
                        inner.notifies_in_flight += 1;
                    }
                    inner.subscriptions[idx] = Some(handler);
                    if report.clean {
                        consecutive_handled += 1;
                    } else {
                        consecutive_handled = 0;
                    }
                },
                Err(err) => {
                    // Blast-radius containment: the failure terminates
                    // this subscription only; the slot stays empty.
                    warn!(subscription = %handler.id(), error = %err, "notify failed, terminating subscription");
                    if let Some(observer) = &inner.observer {
                        observer.on_subscription_terminated(handler.id(), &err);
                    }
                    consecutive_handled += 1;
                },
            }
        }

        // Granular dirty state may only be discarded once no active
        // subscription still needs it.
        let all_clean = inner.subscriptions.iter().flatten().all(|handler| !handler.any_dirty());
        if all_clean {
            let EngineInner { catalog, solver, .. } = &mut *inner;
            solver.clear_dirty(catalog);
        }
    }

    fn build_single_notify_request(
        config: &EngineConfig,
        inner: &mut EngineInner,
        handler: &mut SubscriptionHandler,
    ) -> PublisherResult<BuildReport> {
        let (buf, max_payload) = inner
            .transport
            .allocate_buffer(config.max_notification_size, config.min_notification_size)?;
        let limit = max_payload.min(config.max_notification_size);
        let mut builder = NotifyRequestBuilder::new(buf, limit);
        builder.start(Some(handler.id()))?;

        let data_exhausted = Self::fill_data_list(inner, handler, &mut builder)?;
        let events_exhausted = Self::fill_event_list(inner, handler, &mut builder)?;

        let clean = data_exhausted && events_exhausted;
        if !builder.has_payload() {
            return Ok(BuildReport { sent: false, clean });
        }
        let payload = builder.finish()?;
        inner.transport.send_notify(handler.id(), payload)?;
        debug!(subscription = %handler.id(), "notify dispatched");
        Ok(BuildReport { sent: true, clean })
    }

    /// Fill the data list from the handler's saved trait cursor.
    /// Returns whether every dirty instance was written.
    fn fill_data_list(
        inner: &EngineInner,
        handler: &mut SubscriptionHandler,
        builder: &mut NotifyRequestBuilder,
    ) -> PublisherResult<bool> {
        if !handler.any_dirty() {
            return Ok(true);
        }
        let list_checkpoint = builder.checkpoint();
        builder.move_to_state(BuilderState::DataList)?;

        let mut exhausted = true;
        let count = handler.trait_instances().len();
        let start = handler.next_trait_idx();
        for step in 0..count {
            let index = (start + step) % count;
            let info = handler.trait_instances()[index];
            if !info.dirty {
                continue;
            }
            let element_checkpoint = builder.checkpoint();
            let result = inner.solver.retrieve_trait_instance_data(
                builder,
                &inner.catalog,
                info.trait_handle,
                info.retrieve_all,
            );
            match result {
                Ok(()) => {
                    let entry = &mut handler.trait_instances_mut()[index];
                    entry.dirty = false;
                    entry.retrieve_all = false;
                },
                Err(err) if err.is_out_of_space() => {
                    builder.rollback(element_checkpoint);
                    if builder.has_payload() {
                        // Resume from this instance next round.
                        handler.set_next_trait_idx(index);
                        exhausted = false;
                        break;
                    }
                    // Even an otherwise-empty buffer cannot carry this
                    // diff; drop it for this subscriber instead of
                    // retrying forever.
                    error!(
                        subscription = %handler.id(),
                        trait_handle = %info.trait_handle,
                        "trait diff exceeds an empty notify buffer, dropped"
                    );
                    let entry = &mut handler.trait_instances_mut()[index];
                    entry.dirty = false;
                    entry.retrieve_all = false;
                },
                Err(err) => return Err(err),
            }
        }

        builder.move_to_state(BuilderState::Ready)?;
        if builder.data_elements() == 0 {
            builder.rollback(list_checkpoint);
        }
        Ok(exhausted)
    }

    /// Fill the event list by importance priority, advancing this
    /// subscriber's self-vended cursors. Returns whether every pending
    /// event was written.
    fn fill_event_list(
        inner: &EngineInner,
        handler: &mut SubscriptionHandler,
        builder: &mut NotifyRequestBuilder,
    ) -> PublisherResult<bool> {
        let list_checkpoint = builder.checkpoint();
        builder.move_to_state(BuilderState::EventList)?;

        let mut exhausted = true;
        'tiers: for importance in Importance::by_priority() {
            loop {
                let mut cursor = handler.event_cursor(importance);
                let report =
                    inner.events.fetch_events_since(builder.writer_mut(), importance, &mut cursor)?;
                builder.note_events(report.copied);
                handler.set_event_cursor(importance, cursor);
                match report.blocked {
                    None => break,
                    Some(stuck) => {
                        if report.copied == 0 && !builder.has_payload() {
                            // An event that exceeds an otherwise-empty
                            // buffer can never be delivered; skip it.
                            warn!(
                                subscription = %handler.id(),
                                event = %stuck,
                                importance = %importance,
                                "event exceeds an empty notify buffer, skipped"
                            );
                            handler.set_event_cursor(importance, stuck);
                            continue;
                        }
                        exhausted = false;
                        break 'tiers;
                    },
                }
            }
        }

        builder.move_to_state(BuilderState::Ready)?;
        if builder.events() == 0 {
            builder.rollback(list_checkpoint);
        }
        Ok(exhausted)
    }
}
