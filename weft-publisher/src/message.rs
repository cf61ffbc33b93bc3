//! Subscriber-side notify decoding.
//!
//! The decoded form mirrors what [`crate::builder::NotifyRequestBuilder`]
//! serializes; it is what a subscriber (or a test) uses to interpret a
//! received notify payload.

use bytes::Bytes;

use weft_core::error::{WireError, WireResult};
use weft_core::types::{EventId, Importance, PathHandle, SubscriptionId, Timestamp, TraitHandle};
use weft_core::wire::{WireElement, WireReader};
use weft_storage::record::{tag as event_tag, DEFAULT_SCHEMA_VERSION};

use crate::builder::tag;

/// One decoded data element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataElement {
    /// Trait instance the element applies to.
    pub trait_handle: TraitHandle,
    /// Common path handle the element is rooted at.
    pub path: PathHandle,
    /// Data version of the instance at serialization time.
    pub version: u64,
    /// Whole-instance retrieval flag.
    pub retrieve_all: bool,
    /// Immediate children of `path` to merge in; empty means every
    /// child is covered.
    pub merge_handles: Vec<PathHandle>,
    /// Dictionary elements reported deleted.
    pub delete_keys: Vec<PathHandle>,
}

/// Timestamp form carried by one decoded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTimestamp {
    /// Absolute milliseconds (first event of a fetch pass).
    Absolute(Timestamp),
    /// Delta from the previous event in the list.
    Delta(u64),
}

/// One decoded event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyEvent {
    /// Importance tier.
    pub importance: Importance,
    /// Absolute event id.
    pub event_id: EventId,
    /// Timestamp (absolute or delta form).
    pub timestamp: EventTimestamp,
    /// Originating trait instance id.
    pub trait_id: u32,
    /// Event type within the trait.
    pub event_type: u32,
    /// Event schema version.
    pub schema_version: u32,
    /// Cross-referenced related event.
    pub related: Option<EventId>,
    /// Caller-serialized payload.
    pub payload: Bytes,
}

/// A decoded notify request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NotifyRequest {
    /// Subscription the notify addresses.
    pub subscription_id: Option<SubscriptionId>,
    /// Data elements, in serialization order.
    pub data_elements: Vec<DataElement>,
    /// Events, in serialization order.
    pub events: Vec<NotifyEvent>,
}

impl NotifyRequest {
    /// Decode a serialized notify payload.
    ///
    /// # Errors
    /// Returns a wire error on malformed or truncated input.
    pub fn decode(payload: Bytes) -> WireResult<Self> {
        let mut reader = WireReader::new(payload);
        match reader.next()? {
            Some(WireElement::ContainerStart(tag::NOTIFY_REQUEST)) => {},
            other => {
                return Err(WireError::malformed(0, format!("expected notify request, got {other:?}")));
            },
        }

        let mut notify = Self::default();
        loop {
            match reader.next()? {
                Some(WireElement::Value { tag: tag::SUBSCRIPTION_ID, value }) => {
                    notify.subscription_id = value.as_u64().map(SubscriptionId::new);
                },
                Some(WireElement::ContainerStart(tag::DATA_LIST)) => {
                    Self::decode_data_list(&mut reader, &mut notify.data_elements)?;
                },
                Some(WireElement::ContainerStart(tag::EVENT_LIST)) => {
                    Self::decode_event_list(&mut reader, &mut notify.events)?;
                },
                Some(WireElement::ContainerEnd) => break,
                Some(other) => {
                    return Err(WireError::malformed(0, format!("unexpected element {other:?}")));
                },
                None => return Err(WireError::UnexpectedEnd { offset: 0 }),
            }
        }
        Ok(notify)
    }

    fn decode_data_list(
        reader: &mut WireReader,
        elements: &mut Vec<DataElement>,
    ) -> WireResult<()> {
        loop {
            match reader.next()? {
                Some(WireElement::ContainerStart(tag::DATA_ELEMENT)) => {
                    elements.push(Self::decode_data_element(reader)?);
                },
                Some(WireElement::ContainerEnd) => return Ok(()),
                other => {
                    return Err(WireError::malformed(0, format!("unexpected element {other:?}")));
                },
            }
        }
    }

    fn decode_data_element(reader: &mut WireReader) -> WireResult<DataElement> {
        let mut trait_handle = None;
        let mut path = None;
        let mut version = None;
        let mut retrieve_all = false;
        let mut merge_handles = Vec::new();
        let mut delete_keys = Vec::new();

        loop {
            match reader.next()? {
                Some(WireElement::Value { tag: tag::TRAIT_HANDLE, value }) => {
                    trait_handle = value.as_u64().and_then(|v| u16::try_from(v).ok());
                },
                Some(WireElement::Value { tag: tag::PATH, value }) => {
                    path = value
                        .as_u64()
                        .and_then(|v| u32::try_from(v).ok())
                        .map(PathHandle::from_raw);
                },
                Some(WireElement::Value { tag: tag::VERSION, value }) => {
                    version = value.as_u64();
                },
                Some(WireElement::Value { tag: tag::RETRIEVE_ALL, .. }) => {
                    retrieve_all = true;
                },
                Some(WireElement::ContainerStart(tag::MERGE_HANDLES)) => {
                    Self::decode_handle_list(reader, tag::MERGE_HANDLE, &mut merge_handles)?;
                },
                Some(WireElement::ContainerStart(tag::DELETE_KEYS)) => {
                    Self::decode_handle_list(reader, tag::DELETE_KEY, &mut delete_keys)?;
                },
                Some(WireElement::ContainerEnd) => break,
                other => {
                    return Err(WireError::malformed(0, format!("unexpected element {other:?}")));
                },
            }
        }

        Ok(DataElement {
            trait_handle: TraitHandle::new(
                trait_handle.ok_or_else(|| WireError::malformed(0, "missing trait handle"))?,
            ),
            path: path.ok_or_else(|| WireError::malformed(0, "missing path"))?,
            version: version.ok_or_else(|| WireError::malformed(0, "missing version"))?,
            retrieve_all,
            merge_handles,
            delete_keys,
        })
    }

    fn decode_handle_list(
        reader: &mut WireReader,
        expected_tag: u32,
        out: &mut Vec<PathHandle>,
    ) -> WireResult<()> {
        loop {
            match reader.next()? {
                Some(WireElement::Value { tag, value }) if tag == expected_tag => {
                    let raw = value
                        .as_u64()
                        .and_then(|v| u32::try_from(v).ok())
                        .ok_or_else(|| WireError::malformed(0, "bad handle value"))?;
                    out.push(PathHandle::from_raw(raw));
                },
                Some(WireElement::ContainerEnd) => return Ok(()),
                other => {
                    return Err(WireError::malformed(0, format!("unexpected element {other:?}")));
                },
            }
        }
    }

    fn decode_event_list(reader: &mut WireReader, events: &mut Vec<NotifyEvent>) -> WireResult<()> {
        loop {
            match reader.next()? {
                Some(WireElement::ContainerStart(event_tag::EVENT)) => {
                    events.push(Self::decode_event(reader)?);
                },
                Some(WireElement::ContainerEnd) => return Ok(()),
                other => {
                    return Err(WireError::malformed(0, format!("unexpected element {other:?}")));
                },
            }
        }
    }

    fn decode_event(reader: &mut WireReader) -> WireResult<NotifyEvent> {
        let mut importance = None;
        let mut event_id = None;
        let mut timestamp = None;
        let mut trait_id = None;
        let mut event_type = None;
        let mut schema_version = DEFAULT_SCHEMA_VERSION;
        let mut related = None;
        let mut payload = None;

        loop {
            match reader.next()? {
                Some(WireElement::Value { tag, value }) => match tag {
                    event_tag::IMPORTANCE => {
                        importance = value
                            .as_u64()
                            .and_then(|v| u8::try_from(v).ok())
                            .and_then(Importance::from_u8);
                    },
                    event_tag::EVENT_ID => event_id = value.as_u64().map(EventId::new),
                    event_tag::TIMESTAMP => {
                        timestamp = value
                            .as_u64()
                            .map(|v| EventTimestamp::Absolute(Timestamp::from_millis(v)));
                    },
                    event_tag::DELTA_TIMESTAMP => {
                        timestamp = value.as_u64().map(EventTimestamp::Delta);
                    },
                    event_tag::TRAIT_ID => {
                        trait_id = value.as_u64().and_then(|v| u32::try_from(v).ok());
                    },
                    event_tag::EVENT_TYPE => {
                        event_type = value.as_u64().and_then(|v| u32::try_from(v).ok());
                    },
                    event_tag::SCHEMA_VERSION => {
                        if let Some(v) = value.as_u64().and_then(|v| u32::try_from(v).ok()) {
                            schema_version = v;
                        }
                    },
                    event_tag::RELATED_ID => related = value.as_u64().map(EventId::new),
                    event_tag::PAYLOAD => payload = value.as_bytes().cloned(),
                    _ => {},
                },
                Some(WireElement::ContainerEnd) => break,
                other => {
                    return Err(WireError::malformed(0, format!("unexpected element {other:?}")));
                },
            }
        }

        Ok(NotifyEvent {
            importance: importance
                .ok_or_else(|| WireError::malformed(0, "missing event importance"))?,
            event_id: event_id.ok_or_else(|| WireError::malformed(0, "missing event id"))?,
            timestamp: timestamp.ok_or_else(|| WireError::malformed(0, "missing timestamp"))?,
            trait_id: trait_id.ok_or_else(|| WireError::malformed(0, "missing trait id"))?,
            event_type: event_type.ok_or_else(|| WireError::malformed(0, "missing event type"))?,
            schema_version,
            related,
            payload: payload.unwrap_or_else(Bytes::new),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    use crate::builder::{BuilderState, NotifyRequestBuilder};
    use crate::solver::MergeSet;

    #[test]
    fn test_round_trip_data_elements() {
        let mut builder = NotifyRequestBuilder::new(BytesMut::new(), 1024);
        builder.start(Some(SubscriptionId::new(4))).unwrap();
        builder.move_to_state(BuilderState::DataList).unwrap();

        let mut merge = MergeSet::new();
        merge.insert(PathHandle::from_schema(3), 8);
        merge.insert(PathHandle::from_schema(4), 8);
        builder
            .write_data_element(
                TraitHandle::new(1),
                PathHandle::from_schema(2),
                7,
                &merge,
                &[],
                false,
            )
            .unwrap();
        builder
            .write_data_element(
                TraitHandle::new(2),
                PathHandle::ROOT,
                1,
                &MergeSet::new(),
                &[],
                true,
            )
            .unwrap();

        let payload = {
            builder.move_to_state(BuilderState::Ready).unwrap();
            builder.finish().unwrap()
        };
        let notify = NotifyRequest::decode(payload).unwrap();

        assert_eq!(notify.subscription_id, Some(SubscriptionId::new(4)));
        assert_eq!(notify.data_elements.len(), 2);
        assert_eq!(notify.events.len(), 0);

        let first = &notify.data_elements[0];
        assert_eq!(first.trait_handle, TraitHandle::new(1));
        assert_eq!(first.path, PathHandle::from_schema(2));
        assert_eq!(first.version, 7);
        assert!(!first.retrieve_all);
        assert_eq!(
            first.merge_handles,
            vec![PathHandle::from_schema(3), PathHandle::from_schema(4)]
        );

        let second = &notify.data_elements[1];
        assert!(second.retrieve_all);
        assert!(second.merge_handles.is_empty());
    }

    #[test]
    fn test_round_trip_delete_keys() {
        let dict = PathHandle::from_schema(7);
        let mut builder = NotifyRequestBuilder::new(BytesMut::new(), 1024);
        builder.start(None).unwrap();
        builder.move_to_state(BuilderState::DataList).unwrap();
        builder
            .write_data_element(
                TraitHandle::new(0),
                dict,
                3,
                &MergeSet::new(),
                &[PathHandle::dictionary_element(dict, 1), PathHandle::dictionary_element(dict, 9)],
                false,
            )
            .unwrap();
        let payload = builder.finish().unwrap();

        let notify = NotifyRequest::decode(payload).unwrap();
        assert_eq!(notify.subscription_id, None);
        let element = &notify.data_elements[0];
        assert_eq!(element.delete_keys.len(), 2);
        assert_eq!(element.delete_keys[0].dictionary_key(), Some(1));
        assert_eq!(element.delete_keys[1].dictionary_key(), Some(9));
    }

    #[test]
    fn test_decode_rejects_non_notify_payload() {
        assert!(NotifyRequest::decode(Bytes::from_static(&[0x03, 0, 0, 0, 0])).is_err());
    }
}
