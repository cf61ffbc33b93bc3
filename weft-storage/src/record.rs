//! Event record schema and codec.
//!
//! Resident records carry absolute event ids and timestamps so they can
//! be promoted between tiers byte-for-byte; the fetch path rewrites the
//! leading timestamp field into the delta form expected on the notify
//! wire, re-anchored once per fetch pass.

use bytes::Bytes;

use weft_core::error::{WireError, WireResult};
use weft_core::types::{EventId, Importance, Timestamp};
use weft_core::wire::{WireElement, WireReader, WireWriter};

/// Schema version assumed when a record carries none.
pub const DEFAULT_SCHEMA_VERSION: u32 = 1;

/// Wire tags used by event records and notify event elements.
pub mod tag {
    use weft_core::wire::Tag;

    /// Record kind discriminator.
    pub const KIND: Tag = 1;
    /// Importance tier.
    pub const IMPORTANCE: Tag = 2;
    /// Absolute event id.
    pub const EVENT_ID: Tag = 3;
    /// Absolute timestamp in milliseconds.
    pub const TIMESTAMP: Tag = 4;
    /// Timestamp delta from the previous event in a fetch pass.
    pub const DELTA_TIMESTAMP: Tag = 5;
    /// Originating trait instance id.
    pub const TRAIT_ID: Tag = 6;
    /// Event type within the trait.
    pub const EVENT_TYPE: Tag = 7;
    /// Non-default schema version.
    pub const SCHEMA_VERSION: Tag = 8;
    /// Cross-referenced related event id.
    pub const RELATED_ID: Tag = 9;
    /// Caller-serialized event payload.
    pub const PAYLOAD: Tag = 10;
    /// First id covered by an external block.
    pub const FIRST_ID: Tag = 11;
    /// Last id covered by an external block.
    pub const LAST_ID: Tag = 12;
    /// External registry slot of a marker record.
    pub const REGISTRY_SLOT: Tag = 13;
    /// Container tag of one event on the notify wire.
    pub const EVENT: Tag = 14;
}

const KIND_EVENT: u32 = 0;
const KIND_EXTERNAL: u32 = 1;

/// Static description of one loggable event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventSchema {
    /// Originating trait instance id.
    pub trait_id: u32,
    /// Event type within the trait.
    pub event_type: u32,
    /// Importance tier of the event.
    pub importance: Importance,
    /// Event schema version.
    pub version: u32,
}

impl EventSchema {
    /// Create a schema at the default version.
    #[must_use]
    pub const fn new(trait_id: u32, event_type: u32, importance: Importance) -> Self {
        Self { trait_id, event_type, importance, version: DEFAULT_SCHEMA_VERSION }
    }

    /// Set a non-default schema version.
    #[must_use]
    pub const fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }
}

/// Per-append options.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventOptions {
    /// Timestamp override; the log clock is used when absent.
    pub timestamp: Option<Timestamp>,
    /// Cross-reference to a related event.
    pub related: Option<EventId>,
    /// Request an immediate flush after the append.
    pub urgent: bool,
}

impl EventOptions {
    /// Create default options.
    #[must_use]
    pub const fn new() -> Self {
        Self { timestamp: None, related: None, urgent: false }
    }

    /// Set an explicit timestamp.
    #[must_use]
    pub const fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Cross-reference a related event.
    #[must_use]
    pub const fn with_related(mut self, related: EventId) -> Self {
        self.related = Some(related);
        self
    }

    /// Mark the event urgent.
    #[must_use]
    pub const fn urgent(mut self) -> Self {
        self.urgent = true;
        self
    }
}

/// One serialized event resident in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    /// Importance tier.
    pub importance: Importance,
    /// Absolute event id.
    pub event_id: EventId,
    /// Absolute timestamp.
    pub timestamp: Timestamp,
    /// Originating trait instance id.
    pub trait_id: u32,
    /// Event type within the trait.
    pub event_type: u32,
    /// Event schema version.
    pub schema_version: u32,
    /// Cross-referenced related event, if any.
    pub related: Option<EventId>,
    /// Caller-serialized payload.
    pub payload: Bytes,
}

impl EventRecord {
    /// Serialize the record within a byte budget.
    ///
    /// # Errors
    /// Returns [`WireError::NoMemory`] when the record exceeds the budget.
    pub fn encode(&self, budget: usize) -> WireResult<Bytes> {
        let mut writer = WireWriter::new(budget);
        writer.put_u32(tag::KIND, KIND_EVENT)?;
        writer.put_u32(tag::IMPORTANCE, u32::from(self.importance.as_u8()))?;
        writer.put_u64(tag::EVENT_ID, self.event_id.value())?;
        writer.put_u64(tag::TIMESTAMP, self.timestamp.as_millis())?;
        writer.put_u32(tag::TRAIT_ID, self.trait_id)?;
        writer.put_u32(tag::EVENT_TYPE, self.event_type)?;
        if self.schema_version != DEFAULT_SCHEMA_VERSION {
            writer.put_u32(tag::SCHEMA_VERSION, self.schema_version)?;
        }
        if let Some(related) = self.related {
            writer.put_u64(tag::RELATED_ID, related.value())?;
        }
        writer.put_bytes(tag::PAYLOAD, &self.payload)?;
        writer.finish()
    }
}

/// Marker splicing an externally sourced id range into the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalMarker {
    /// Importance tier of the external events.
    pub importance: Importance,
    /// First id of the block.
    pub first_id: EventId,
    /// Last id of the block.
    pub last_id: EventId,
    /// Registry slot holding the fetch hook.
    pub registry_slot: u32,
}

impl ExternalMarker {
    /// Serialize the marker within a byte budget.
    ///
    /// # Errors
    /// Returns [`WireError::NoMemory`] when the budget is exceeded.
    pub fn encode(&self, budget: usize) -> WireResult<Bytes> {
        let mut writer = WireWriter::new(budget);
        writer.put_u32(tag::KIND, KIND_EXTERNAL)?;
        writer.put_u32(tag::IMPORTANCE, u32::from(self.importance.as_u8()))?;
        writer.put_u64(tag::FIRST_ID, self.first_id.value())?;
        writer.put_u64(tag::LAST_ID, self.last_id.value())?;
        writer.put_u32(tag::REGISTRY_SLOT, self.registry_slot)?;
        writer.finish()
    }
}

/// A decoded resident record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// An ordinary event.
    Event(EventRecord),
    /// An external block marker.
    External(ExternalMarker),
}

impl Record {
    /// Importance tier of the record.
    #[must_use]
    pub fn importance(&self) -> Importance {
        match self {
            Self::Event(event) => event.importance,
            Self::External(marker) => marker.importance,
        }
    }

    /// Decode a resident record.
    ///
    /// # Errors
    /// Returns [`WireError::Malformed`] on missing or invalid fields.
    pub fn decode(bytes: &[u8]) -> WireResult<Self> {
        let mut reader = WireReader::new(Bytes::copy_from_slice(bytes));
        let mut kind = None;
        let mut importance = None;
        let mut event_id = None;
        let mut timestamp = None;
        let mut trait_id = None;
        let mut event_type = None;
        let mut schema_version = DEFAULT_SCHEMA_VERSION;
        let mut related = None;
        let mut payload = None;
        let mut first_id = None;
        let mut last_id = None;
        let mut registry_slot = None;

        while let Some(element) = reader.next()? {
            let WireElement::Value { tag, value } = element else {
                return Err(WireError::malformed(0, "unexpected container in record"));
            };
            match tag {
                tag::KIND => kind = value.as_u64(),
                tag::IMPORTANCE => importance = value.as_u64(),
                tag::EVENT_ID => event_id = value.as_u64(),
                tag::TIMESTAMP => timestamp = value.as_u64(),
                tag::TRAIT_ID => trait_id = value.as_u64(),
                tag::EVENT_TYPE => event_type = value.as_u64(),
                tag::SCHEMA_VERSION => {
                    schema_version = value.as_u64().map_or(schema_version, |v| v as u32);
                },
                tag::RELATED_ID => related = value.as_u64().map(EventId::new),
                tag::PAYLOAD => payload = value.as_bytes().cloned(),
                tag::FIRST_ID => first_id = value.as_u64(),
                tag::LAST_ID => last_id = value.as_u64(),
                tag::REGISTRY_SLOT => registry_slot = value.as_u64(),
                _ => {},
            }
        }

        let importance = importance
            .and_then(|v| u8::try_from(v).ok())
            .and_then(Importance::from_u8)
            .ok_or_else(|| WireError::malformed(0, "missing or invalid importance"))?;

        match kind {
            Some(k) if k == u64::from(KIND_EVENT) => Ok(Self::Event(EventRecord {
                importance,
                event_id: EventId::new(
                    event_id.ok_or_else(|| WireError::malformed(0, "missing event id"))?,
                ),
                timestamp: Timestamp::from_millis(
                    timestamp.ok_or_else(|| WireError::malformed(0, "missing timestamp"))?,
                ),
                #[allow(clippy::cast_possible_truncation)]
                trait_id: trait_id.ok_or_else(|| WireError::malformed(0, "missing trait id"))?
                    as u32,
                #[allow(clippy::cast_possible_truncation)]
                event_type: event_type
                    .ok_or_else(|| WireError::malformed(0, "missing event type"))?
                    as u32,
                schema_version,
                related,
                payload: payload.ok_or_else(|| WireError::malformed(0, "missing payload"))?,
            })),
            Some(k) if k == u64::from(KIND_EXTERNAL) => Ok(Self::External(ExternalMarker {
                importance,
                first_id: EventId::new(
                    first_id.ok_or_else(|| WireError::malformed(0, "missing first id"))?,
                ),
                last_id: EventId::new(
                    last_id.ok_or_else(|| WireError::malformed(0, "missing last id"))?,
                ),
                #[allow(clippy::cast_possible_truncation)]
                registry_slot: registry_slot
                    .ok_or_else(|| WireError::malformed(0, "missing registry slot"))?
                    as u32,
            })),
            other => Err(WireError::malformed(0, format!("unknown record kind {other:?}"))),
        }
    }
}

/// Copy one event onto the notify wire.
///
/// The first event of a fetch pass (`previous == None`) carries its
/// absolute timestamp; later events carry the delta from the event
/// before them. On failure the writer is rolled back to the element
/// boundary, so a partial event never reaches the wire.
///
/// # Errors
/// Returns [`WireError::NoMemory`] when the event does not fit.
pub fn write_notify_event(
    writer: &mut WireWriter,
    record: &EventRecord,
    previous: Option<Timestamp>,
) -> WireResult<()> {
    let checkpoint = writer.checkpoint();
    let result = (|| {
        writer.start_container(tag::EVENT)?;
        writer.put_u32(tag::IMPORTANCE, u32::from(record.importance.as_u8()))?;
        writer.put_u64(tag::EVENT_ID, record.event_id.value())?;
        match previous {
            None => writer.put_u64(tag::TIMESTAMP, record.timestamp.as_millis())?,
            Some(prev) => {
                writer.put_u64(tag::DELTA_TIMESTAMP, record.timestamp.delta_since(prev))?;
            },
        }
        writer.put_u32(tag::TRAIT_ID, record.trait_id)?;
        writer.put_u32(tag::EVENT_TYPE, record.event_type)?;
        if record.schema_version != DEFAULT_SCHEMA_VERSION {
            writer.put_u32(tag::SCHEMA_VERSION, record.schema_version)?;
        }
        if let Some(related) = record.related {
            writer.put_u64(tag::RELATED_ID, related.value())?;
        }
        writer.put_bytes(tag::PAYLOAD, &record.payload)?;
        writer.end_container()
    })();
    if let Err(error) = result {
        writer.rollback(checkpoint);
        return Err(error);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> EventRecord {
        EventRecord {
            importance: Importance::Info,
            event_id: EventId::new(42),
            timestamp: Timestamp::from_millis(10_000),
            trait_id: 7,
            event_type: 3,
            schema_version: DEFAULT_SCHEMA_VERSION,
            related: None,
            payload: Bytes::from_static(b"sensor reading"),
        }
    }

    #[test]
    fn test_event_record_round_trip() {
        let record = sample_event();
        let encoded = record.encode(256).unwrap();
        assert_eq!(Record::decode(&encoded).unwrap(), Record::Event(record));
    }

    #[test]
    fn test_optional_fields_round_trip() {
        let mut record = sample_event();
        record.schema_version = 9;
        record.related = Some(EventId::new(41));
        let encoded = record.encode(256).unwrap();
        assert_eq!(Record::decode(&encoded).unwrap(), Record::Event(record));
    }

    #[test]
    fn test_default_schema_version_is_omitted() {
        let with_default = sample_event().encode(256).unwrap();
        let mut versioned = sample_event();
        versioned.schema_version = 2;
        let with_version = versioned.encode(256).unwrap();
        assert!(with_version.len() > with_default.len());
    }

    #[test]
    fn test_external_marker_round_trip() {
        let marker = ExternalMarker {
            importance: Importance::Production,
            first_id: EventId::new(100),
            last_id: EventId::new(150),
            registry_slot: 2,
        };
        let encoded = marker.encode(128).unwrap();
        assert_eq!(Record::decode(&encoded).unwrap(), Record::External(marker));
    }

    #[test]
    fn test_encode_respects_budget() {
        let record = sample_event();
        let err = record.encode(16).unwrap_err();
        assert!(err.is_no_memory());
    }

    #[test]
    fn test_notify_event_timestamp_forms() {
        let record = sample_event();

        let mut writer = WireWriter::new(512);
        write_notify_event(&mut writer, &record, None).unwrap();
        write_notify_event(&mut writer, &record, Some(Timestamp::from_millis(9_250))).unwrap();
        let payload = writer.finish().unwrap();

        let mut reader = WireReader::new(payload);
        let mut absolute = 0;
        let mut deltas = Vec::new();
        while let Some(element) = reader.next().unwrap() {
            match element {
                WireElement::Value { tag: tag::TIMESTAMP, .. } => absolute += 1,
                WireElement::Value { tag: tag::DELTA_TIMESTAMP, value } => {
                    deltas.push(value.as_u64().unwrap());
                },
                _ => {},
            }
        }
        assert_eq!(absolute, 1);
        assert_eq!(deltas, vec![750]);
    }

    #[test]
    fn test_notify_event_rolls_back_on_overflow() {
        let record = sample_event();
        let mut writer = WireWriter::new(24);
        let before = writer.written();
        assert!(write_notify_event(&mut writer, &record, None).unwrap_err().is_no_memory());
        assert_eq!(writer.written(), before);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Record::decode(&[0xFF, 0x00]).is_err());
    }
}
