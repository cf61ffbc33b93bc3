//! Bounded incremental notify serializer.
//!
//! The builder is a small state machine over one output buffer:
//! `Idle -> Ready -> {DataList | EventList} -> Ready -> Idle`.
//! [`NotifyRequestBuilder::move_to_state`] is the single transition
//! entry point: it closes whatever container is open before opening the
//! requested one and fails if the reached state does not match.
//! Checkpoints snapshot the writer position and element counts for
//! byte-exact rollback of a partially written, too-large element.

use bytes::{Bytes, BytesMut};

use weft_core::types::{PathHandle, SubscriptionId, TraitHandle};
use weft_core::wire::{Checkpoint, WireWriter};

use crate::error::{PublisherError, PublisherResult};
use crate::solver::MergeSet;

/// Wire tags of the notify request envelope.
pub mod tag {
    use weft_core::wire::Tag;

    /// Top-level notify request container.
    pub const NOTIFY_REQUEST: Tag = 32;
    /// Optional subscription id.
    pub const SUBSCRIPTION_ID: Tag = 33;
    /// Data-element list container.
    pub const DATA_LIST: Tag = 34;
    /// Event list container.
    pub const EVENT_LIST: Tag = 35;
    /// One data element.
    pub const DATA_ELEMENT: Tag = 36;
    /// Trait handle of a data element.
    pub const TRAIT_HANDLE: Tag = 37;
    /// Common path handle of a data element.
    pub const PATH: Tag = 38;
    /// Data version of the element's instance.
    pub const VERSION: Tag = 39;
    /// Merge handle list container.
    pub const MERGE_HANDLES: Tag = 40;
    /// One merge handle.
    pub const MERGE_HANDLE: Tag = 41;
    /// Delete key list container.
    pub const DELETE_KEYS: Tag = 42;
    /// One deleted dictionary element handle.
    pub const DELETE_KEY: Tag = 43;
    /// Whole-instance retrieval flag.
    pub const RETRIEVE_ALL: Tag = 44;
}

/// Builder lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuilderState {
    /// No notify container open.
    Idle,
    /// Notify container open, no list open.
    Ready,
    /// Data-element list open.
    DataList,
    /// Event list open.
    EventList,
}

/// Snapshot of the builder for byte-exact rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuilderCheckpoint {
    wire: Checkpoint,
    state: BuilderState,
    data_elements: u32,
    events: u32,
}

/// Incremental serializer for one bandwidth-bounded notify request.
#[derive(Debug)]
pub struct NotifyRequestBuilder {
    writer: WireWriter,
    state: BuilderState,
    data_elements: u32,
    events: u32,
}

impl NotifyRequestBuilder {
    /// Create an idle builder over a transport buffer with the given
    /// payload budget.
    #[must_use]
    pub fn new(buf: BytesMut, limit: usize) -> Self {
        Self {
            writer: WireWriter::with_buffer(buf, limit),
            state: BuilderState::Idle,
            data_elements: 0,
            events: 0,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> BuilderState {
        self.state
    }

    /// Data elements written so far.
    #[must_use]
    pub fn data_elements(&self) -> u32 {
        self.data_elements
    }

    /// Events written so far.
    #[must_use]
    pub fn events(&self) -> u32 {
        self.events
    }

    /// Whether the notify carries any data elements or events yet.
    #[must_use]
    pub fn has_payload(&self) -> bool {
        self.data_elements > 0 || self.events > 0
    }

    /// Open the notify envelope: `Idle -> Ready`.
    ///
    /// # Errors
    /// Returns an invalid-transition error outside `Idle`, or a wire
    /// error when even the envelope does not fit.
    pub fn start(&mut self, subscription: Option<SubscriptionId>) -> PublisherResult<()> {
        if self.state != BuilderState::Idle {
            return Err(PublisherError::InvalidTransition {
                from: self.state,
                to: BuilderState::Ready,
            });
        }
        self.writer.start_container(tag::NOTIFY_REQUEST)?;
        if let Some(id) = subscription {
            self.writer.put_u64(tag::SUBSCRIPTION_ID, id.value())?;
        }
        self.state = BuilderState::Ready;
        Ok(())
    }

    /// Transition to `target`, closing and opening containers as needed.
    ///
    /// # Errors
    /// Returns an invalid-transition error when no legal container
    /// sequence reaches `target` (e.g. the data list cannot reopen after
    /// the event list), or a wire error from the container writes.
    pub fn move_to_state(&mut self, target: BuilderState) -> PublisherResult<()> {
        if self.state == target {
            return Ok(());
        }
        match (self.state, target) {
            (BuilderState::Ready, BuilderState::DataList) => {
                self.writer.start_container(tag::DATA_LIST)?;
            },
            (BuilderState::Ready, BuilderState::EventList) => {
                self.writer.start_container(tag::EVENT_LIST)?;
            },
            (BuilderState::DataList | BuilderState::EventList, BuilderState::Ready) => {
                self.writer.end_container()?;
            },
            (BuilderState::DataList, BuilderState::EventList) => {
                self.writer.end_container()?;
                self.writer.start_container(tag::EVENT_LIST)?;
            },
            (BuilderState::Ready, BuilderState::Idle) => {
                self.writer.end_container()?;
            },
            (BuilderState::DataList | BuilderState::EventList, BuilderState::Idle) => {
                self.writer.end_container()?;
                self.writer.end_container()?;
            },
            (from, to) => {
                return Err(PublisherError::InvalidTransition { from, to });
            },
        }
        self.state = target;
        debug_assert_eq!(self.state, target, "transition must land exactly on the target");
        Ok(())
    }

    /// Snapshot the builder.
    #[must_use]
    pub fn checkpoint(&self) -> BuilderCheckpoint {
        BuilderCheckpoint {
            wire: self.writer.checkpoint(),
            state: self.state,
            data_elements: self.data_elements,
            events: self.events,
        }
    }

    /// Restore a snapshot, discarding everything written after it.
    pub fn rollback(&mut self, checkpoint: BuilderCheckpoint) {
        self.writer.rollback(checkpoint.wire);
        self.state = checkpoint.state;
        self.data_elements = checkpoint.data_elements;
        self.events = checkpoint.events;
    }

    /// Serialize one data element into the open data list.
    ///
    /// An out-of-space failure leaves the builder exactly as it was
    /// before the call.
    ///
    /// # Errors
    /// Returns an invalid-transition error outside `DataList`, or the
    /// propagated wire error.
    pub fn write_data_element(
        &mut self,
        trait_handle: TraitHandle,
        path: PathHandle,
        version: u64,
        merge: &MergeSet,
        delete_keys: &[PathHandle],
        retrieve_all: bool,
    ) -> PublisherResult<()> {
        if self.state != BuilderState::DataList {
            return Err(PublisherError::InvalidTransition {
                from: self.state,
                to: BuilderState::DataList,
            });
        }
        let checkpoint = self.checkpoint();
        let result = (|| {
            self.writer.start_container(tag::DATA_ELEMENT)?;
            self.writer.put_u32(tag::TRAIT_HANDLE, u32::from(trait_handle.value()))?;
            self.writer.put_u32(tag::PATH, path.raw())?;
            self.writer.put_u64(tag::VERSION, version)?;
            if retrieve_all {
                self.writer.put_bool(tag::RETRIEVE_ALL, true)?;
            }
            if let Some(handles) = merge.handles() {
                if !handles.is_empty() {
                    self.writer.start_container(tag::MERGE_HANDLES)?;
                    for handle in handles {
                        self.writer.put_u32(tag::MERGE_HANDLE, handle.raw())?;
                    }
                    self.writer.end_container()?;
                }
            }
            if !delete_keys.is_empty() {
                self.writer.start_container(tag::DELETE_KEYS)?;
                for handle in delete_keys {
                    self.writer.put_u32(tag::DELETE_KEY, handle.raw())?;
                }
                self.writer.end_container()?;
            }
            self.writer.end_container()
        })();
        if let Err(error) = result {
            self.rollback(checkpoint);
            return Err(error.into());
        }
        self.data_elements += 1;
        Ok(())
    }

    /// Direct writer access for the event-list fill.
    pub fn writer_mut(&mut self) -> &mut WireWriter {
        debug_assert_eq!(self.state, BuilderState::EventList);
        &mut self.writer
    }

    /// Account for events written through [`Self::writer_mut`].
    pub fn note_events(&mut self, count: u32) {
        self.events += count;
    }

    /// Close everything and return the serialized notify payload.
    ///
    /// # Errors
    /// Propagates container-close failures.
    pub fn finish(mut self) -> PublisherResult<Bytes> {
        self.move_to_state(BuilderState::Idle)?;
        Ok(self.writer.finish()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder(limit: usize) -> NotifyRequestBuilder {
        NotifyRequestBuilder::new(BytesMut::with_capacity(limit), limit)
    }

    #[test]
    fn test_state_machine_happy_path() {
        let mut b = builder(512);
        b.start(Some(SubscriptionId::new(9))).unwrap();
        assert_eq!(b.state(), BuilderState::Ready);
        b.move_to_state(BuilderState::DataList).unwrap();
        b.write_data_element(
            TraitHandle::new(0),
            PathHandle::ROOT,
            1,
            &MergeSet::new(),
            &[],
            true,
        )
        .unwrap();
        b.move_to_state(BuilderState::EventList).unwrap();
        b.move_to_state(BuilderState::Ready).unwrap();
        let payload = b.finish().unwrap();
        assert!(!payload.is_empty());
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let mut b = builder(512);
        b.start(None).unwrap();
        assert!(matches!(b.start(None), Err(PublisherError::InvalidTransition { .. })));
    }

    #[test]
    fn test_event_list_cannot_reopen_data_list() {
        let mut b = builder(512);
        b.start(None).unwrap();
        b.move_to_state(BuilderState::EventList).unwrap();
        assert!(matches!(
            b.move_to_state(BuilderState::DataList),
            Err(PublisherError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_data_element_outside_list_is_rejected() {
        let mut b = builder(512);
        b.start(None).unwrap();
        let result = b.write_data_element(
            TraitHandle::new(0),
            PathHandle::ROOT,
            1,
            &MergeSet::new(),
            &[],
            false,
        );
        assert!(matches!(result, Err(PublisherError::InvalidTransition { .. })));
    }

    #[test]
    fn test_overflowing_element_rolls_back_cleanly() {
        let mut b = builder(80);
        b.start(Some(SubscriptionId::new(1))).unwrap();
        b.move_to_state(BuilderState::DataList).unwrap();
        b.write_data_element(
            TraitHandle::new(0),
            PathHandle::from_schema(2),
            1,
            &MergeSet::new(),
            &[],
            false,
        )
        .unwrap();
        let before = b.checkpoint();

        let mut big = MergeSet::new();
        for id in 10..30 {
            big.insert(PathHandle::from_schema(id), 64);
        }
        let err = b
            .write_data_element(TraitHandle::new(1), PathHandle::from_schema(3), 2, &big, &[], false)
            .unwrap_err();
        assert!(err.is_out_of_space());
        assert_eq!(b.checkpoint(), before, "failed element must leave no trace");
        assert_eq!(b.data_elements(), 1);

        // The first element survives an orderly close.
        b.move_to_state(BuilderState::Ready).unwrap();
        let payload = b.finish().unwrap();
        assert!(!payload.is_empty());
    }

    #[test]
    fn test_rollback_restores_counts_and_state() {
        let mut b = builder(512);
        b.start(None).unwrap();
        let checkpoint = b.checkpoint();
        b.move_to_state(BuilderState::EventList).unwrap();
        b.note_events(3);
        b.rollback(checkpoint);
        assert_eq!(b.state(), BuilderState::Ready);
        assert_eq!(b.events(), 0);
        assert!(!b.has_payload());
    }

    #[test]
    fn test_finish_closes_open_lists() {
        let mut b = builder(512);
        b.start(None).unwrap();
        b.move_to_state(BuilderState::DataList).unwrap();
        // finish() must unwind DataList -> Ready -> Idle on its own.
        let payload = b.finish().unwrap();
        assert!(!payload.is_empty());
    }
}
