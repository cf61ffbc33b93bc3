//! Tiered circular event log.
//!
//! The log owns an importance-ordered array of [`EventBuffer`] tiers.
//! Every event is appended at the first (least important) tier; under
//! eviction pressure a record is either dropped, if the tier under
//! pressure is its final destination, or copied forward into the next
//! tier before its slot is reclaimed. Space reservations cascade across
//! tiers through an explicit worklist, never the call stack.
//!
//! All mutations happen under one short-hold lock so events can be
//! logged from contexts other than the engine loop; the lock is never
//! held across the flush notifier.

use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use weft_core::types::{EventId, Importance, Timestamp};
use weft_core::wire::WireWriter;
use weft_core::WireResult;

use crate::buffer::EventBuffer;
use crate::config::EventLogConfig;
use crate::counter::{InMemoryCounter, MonotonicCounter};
use crate::error::{EventLogError, EventLogResult};
use crate::record::{
    write_notify_event, EventOptions, EventRecord, EventSchema, ExternalMarker, Record,
};
use crate::ring::{CircularBuffer, Evicted, EvictionPolicy, FRAME_HEADER};

/// Byte budget for serializing an external block marker.
const MARKER_BUDGET: usize = 64;

/// Callback fired after a successful append, outside the log lock.
pub type FlushNotifier = Box<dyn Fn(Importance, bool) + Send + Sync>;

/// Clock supplying event timestamps when the caller provides none.
pub type LogClock = Box<dyn Fn() -> Timestamp + Send + Sync>;

/// Hook producing externally sourced events for an id range.
///
/// Invoked with the notify writer and the inclusive id range to emit;
/// returns the number of events written. The hook writes complete event
/// containers with absolute timestamps.
pub type ExternalFetchHook =
    Box<dyn FnMut(&mut WireWriter, EventId, EventId) -> EventLogResult<u32> + Send>;

/// Outcome of one [`EventLog::fetch_events_since`] pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchReport {
    /// Events copied onto the writer.
    pub copied: u32,
    /// Id of the first event that did not fit, when the writer ran out
    /// of space. The writer is already rolled back to the last complete
    /// event boundary.
    pub blocked: Option<EventId>,
}

/// Snapshot of one tier's occupancy and id range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierSnapshot {
    /// Importance this tier is the final destination for.
    pub importance: Importance,
    /// Ring capacity in bytes.
    pub capacity: usize,
    /// Bytes occupied by resident records.
    pub data_length: usize,
    /// Oldest alive id of this importance.
    pub first_event_id: EventId,
    /// Newest vended id of this importance.
    pub last_event_id: EventId,
}

struct ExternalBlock {
    importance: Importance,
    first_id: EventId,
    last_id: EventId,
    hook: ExternalFetchHook,
}

impl fmt::Debug for ExternalBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalBlock")
            .field("importance", &self.importance)
            .field("first_id", &self.first_id)
            .field("last_id", &self.last_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct LogInner {
    config: EventLogConfig,
    tiers: Vec<EventBuffer>,
    throttled: bool,
    trait_thresholds: HashMap<u32, Importance>,
    externals: Vec<Option<ExternalBlock>>,
}

/// The tiered event log.
///
/// Constructed once at startup and shared by reference for the life of
/// the process; tiers are never reconfigured after construction.
pub struct EventLog {
    inner: Mutex<LogInner>,
    flush_notifier: Option<FlushNotifier>,
    clock: LogClock,
}

impl fmt::Debug for EventLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLog").field("inner", &self.inner).finish_non_exhaustive()
    }
}

fn system_clock() -> Timestamp {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or(0);
    #[allow(clippy::cast_possible_truncation)]
    Timestamp::from_millis(millis as u64)
}

impl EventLog {
    /// Create a log with volatile per-tier counters.
    ///
    /// # Errors
    /// Returns an error when the configuration fails validation.
    pub fn new(config: EventLogConfig) -> EventLogResult<Self> {
        let counters = config
            .tiers
            .iter()
            .map(|_| Box::new(InMemoryCounter::default()) as Box<dyn MonotonicCounter>)
            .collect();
        Self::with_counters(config, counters)
    }

    /// Create a log with caller-supplied per-tier counters (e.g. persisted
    /// ones), one per tier in tier order.
    ///
    /// # Errors
    /// Returns an error when the configuration fails validation or the
    /// counter count does not match the tier count.
    pub fn with_counters(
        config: EventLogConfig,
        counters: Vec<Box<dyn MonotonicCounter>>,
    ) -> EventLogResult<Self> {
        config.validate()?;
        if counters.len() != config.tiers.len() {
            return Err(weft_core::ConfigError::new(
                "counters",
                format!("expected {} counters, got {}", config.tiers.len(), counters.len()),
            )
            .into());
        }
        let tiers = config
            .tiers
            .iter()
            .zip(counters)
            .map(|(tier, counter)| EventBuffer::new(tier.importance, tier.capacity, counter))
            .collect();
        let externals = (0..config.external_registry_capacity).map(|_| None).collect();
        Ok(Self {
            inner: Mutex::new(LogInner {
                config,
                tiers,
                throttled: false,
                trait_thresholds: HashMap::new(),
                externals,
            }),
            flush_notifier: None,
            clock: Box::new(system_clock),
        })
    }

    /// Install the flush notifier. Call before sharing the log.
    pub fn set_flush_notifier(&mut self, notifier: FlushNotifier) {
        self.flush_notifier = Some(notifier);
    }

    /// Replace the timestamp clock. Call before sharing the log.
    pub fn set_clock(&mut self, clock: LogClock) {
        self.clock = clock;
    }

    /// Enable or disable global throttling.
    ///
    /// While throttled only `Production` events are accepted, regardless
    /// of the configured thresholds.
    pub fn set_throttled(&self, throttled: bool) {
        self.inner.lock().throttled = throttled;
    }

    /// Set or clear a per-trait importance threshold override.
    pub fn set_trait_threshold(&self, trait_id: u32, threshold: Option<Importance>) {
        let mut inner = self.inner.lock();
        match threshold {
            Some(level) => {
                inner.trait_thresholds.insert(trait_id, level);
            },
            None => {
                inner.trait_thresholds.remove(&trait_id);
            },
        }
    }

    /// The threshold currently applied to events of `trait_id`.
    #[must_use]
    pub fn effective_threshold(&self, trait_id: u32) -> Importance {
        self.inner.lock().effective_threshold(trait_id)
    }

    /// Append one event.
    ///
    /// The caller serializes the event payload through `payload_fn`,
    /// which may run several times: serialization starts from the
    /// configured reserve budget and grows in increments until the event
    /// fits or provably cannot transit its eviction path.
    ///
    /// Returns the vended event id, or [`EventId::NONE`] when the event
    /// was below the effective importance threshold (no id consumed).
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError::EventTooLarge`] when the serialized
    /// event cannot fit every tier between insertion and its final
    /// destination; such an event could never be evicted forward.
    ///
    /// # Panics
    ///
    /// Panics if a space reservation fails for an event that passed the
    /// transit-capacity check. A validated configuration makes this
    /// unreachable; hitting it means the log can never again make
    /// forward progress.
    pub fn log_event<F>(
        &self,
        schema: &EventSchema,
        options: &EventOptions,
        mut payload_fn: F,
    ) -> EventLogResult<EventId>
    where
        F: FnMut(&mut WireWriter) -> WireResult<()>,
    {
        let mut inner = self.inner.lock();

        if schema.importance < inner.effective_threshold(schema.trait_id) {
            trace!(trait_id = schema.trait_id, importance = %schema.importance, "event below threshold, dropped");
            return Ok(EventId::NONE);
        }

        let final_dest = inner.final_destination(schema.importance);
        let timestamp = options.timestamp.unwrap_or_else(|| (self.clock)());
        let prospective = inner.tiers[final_dest].next_event_id();

        let (squeeze_index, transit_capacity) = inner.smallest_transit_tier(final_dest);
        let mut budget = inner.config.event_size_reserve;
        let encoded = loop {
            match serialize_event(schema, prospective, timestamp, options.related, &mut payload_fn, budget)
            {
                Ok(bytes) => break bytes,
                Err(err) if err.is_no_memory() => {
                    if CircularBuffer::frame_size(budget) >= transit_capacity {
                        warn!(
                            trait_id = schema.trait_id,
                            budget, "event too large for its eviction path, dropped"
                        );
                        return Err(EventLogError::EventTooLarge {
                            size: CircularBuffer::frame_size(budget),
                            tier_index: squeeze_index,
                            capacity: transit_capacity,
                        });
                    }
                    budget =
                        (budget + inner.config.event_size_increment).min(transit_capacity - FRAME_HEADER);
                },
                Err(err) => return Err(err.into()),
            }
        };

        let frame = CircularBuffer::frame_size(encoded.len());
        for (tier_index, tier) in inner.tiers[..=final_dest].iter().enumerate() {
            if frame > tier.capacity() {
                warn!(
                    trait_id = schema.trait_id,
                    frame, tier_index, "event cannot transit tier, dropped"
                );
                return Err(EventLogError::EventTooLarge {
                    size: frame,
                    tier_index,
                    capacity: tier.capacity(),
                });
            }
        }

        if let Err(err) = inner.ensure_space(frame) {
            match err {
                EventLogError::BufferTooSmall { .. } => {
                    panic!("event log cannot make forward progress: {err}")
                },
                other => return Err(other),
            }
        }

        let event_id = inner.tiers[final_dest].vend_id(timestamp);
        debug_assert_eq!(event_id, prospective);
        if inner.tiers[0].ring_mut().push_record(&encoded).is_err() {
            unreachable!("space was reserved for the record");
        }
        debug!(event_id = %event_id, importance = %schema.importance, bytes = frame, "event logged");

        drop(inner);
        if let Some(notifier) = &self.flush_notifier {
            notifier(schema.importance, options.urgent);
        }
        Ok(event_id)
    }

    /// Splice a block of externally sourced events into the id space.
    ///
    /// Vends `count` contiguous ids at the importance's final
    /// destination and records a marker in the log; fetch passes that
    /// overlap the block defer to `hook`, passes beyond it skip the
    /// whole block. The block unregisters when its marker is finally
    /// evicted.
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError::ExternalRegistryFull`] when no registry
    /// slot is free, or a space error when the marker cannot be stored.
    pub fn register_external_events(
        &self,
        importance: Importance,
        count: u64,
        hook: ExternalFetchHook,
    ) -> EventLogResult<(EventId, EventId)> {
        let mut inner = self.inner.lock();
        if count == 0 {
            return Err(weft_core::ConfigError::new(
                "count",
                "external block must cover at least one id",
            )
            .into());
        }
        let capacity = inner.config.external_registry_capacity;
        let Some(slot) = inner.externals.iter().position(Option::is_none) else {
            return Err(EventLogError::ExternalRegistryFull { capacity });
        };

        let final_dest = inner.final_destination(importance);
        let timestamp = (self.clock)();

        // Marker size is id-independent (fixed-width ids), so reserve
        // before vending.
        #[allow(clippy::cast_possible_truncation)]
        let probe = ExternalMarker {
            importance,
            first_id: EventId::new(u64::MAX),
            last_id: EventId::new(u64::MAX),
            registry_slot: slot as u32,
        };
        let frame = CircularBuffer::frame_size(probe.encode(MARKER_BUDGET)?.len());
        inner.ensure_space(frame)?;

        let (first_id, last_id) = inner.tiers[final_dest].vend_range(count, timestamp);
        #[allow(clippy::cast_possible_truncation)]
        let marker = ExternalMarker { importance, first_id, last_id, registry_slot: slot as u32 };
        let encoded = marker.encode(MARKER_BUDGET)?;
        if inner.tiers[0].ring_mut().push_record(&encoded).is_err() {
            unreachable!("space was reserved for the marker");
        }
        inner.externals[slot] = Some(ExternalBlock { importance, first_id, last_id, hook });
        debug!(importance = %importance, first = %first_id, last = %last_id, "external events registered");

        drop(inner);
        if let Some(notifier) = &self.flush_notifier {
            notifier(importance, false);
        }
        Ok((first_id, last_id))
    }

    /// Copy events of `importance` with ids greater than `last_id` onto
    /// the writer, oldest first, advancing `last_id` past each one.
    ///
    /// The first copied event carries an absolute timestamp; later ones
    /// carry deltas, re-anchored per call. When the writer runs out of
    /// space the pass stops at the last complete event boundary and
    /// reports the id that did not fit; interpreting that (retry next
    /// round versus skip an event that can never fit) is the caller's
    /// policy.
    ///
    /// # Errors
    /// Returns [`EventLogError::CorruptRecord`] if a resident record
    /// fails to decode, or an error propagated from an external hook.
    pub fn fetch_events_since(
        &self,
        writer: &mut WireWriter,
        importance: Importance,
        last_id: &mut EventId,
    ) -> EventLogResult<FetchReport> {
        let mut inner = self.inner.lock();
        let final_dest = inner.final_destination(importance);
        let mut copied = 0u32;
        let mut previous: Option<Timestamp> = None;

        // Oldest events live deepest; walk back toward the insertion tier.
        for tier_index in (0..=final_dest).rev() {
            let mut offset = 0usize;
            loop {
                let Some((bytes, next_offset)) = inner.tiers[tier_index].ring().record_at(offset)
                else {
                    break;
                };
                offset = next_offset;
                let record = Record::decode(&bytes)
                    .map_err(|err| EventLogError::corrupt(tier_index, &err))?;
                match record {
                    Record::Event(event)
                        if event.importance == importance && event.event_id > *last_id =>
                    {
                        match write_notify_event(writer, &event, previous) {
                            Ok(()) => {
                                *last_id = event.event_id;
                                previous = Some(event.timestamp);
                                copied += 1;
                            },
                            Err(err) if err.is_no_memory() => {
                                return Ok(FetchReport { copied, blocked: Some(event.event_id) });
                            },
                            Err(err) => return Err(err.into()),
                        }
                    },
                    Record::External(marker)
                        if marker.importance == importance && marker.last_id > *last_id =>
                    {
                        let from = if *last_id >= marker.first_id {
                            last_id.next()
                        } else {
                            marker.first_id
                        };
                        let slot = marker.registry_slot as usize;
                        match inner.externals.get_mut(slot).and_then(Option::as_mut) {
                            None => {
                                // Hook gone; skip the whole block.
                                trace!(slot, "external block unregistered, skipped");
                                *last_id = marker.last_id;
                            },
                            Some(block) => {
                                let checkpoint = writer.checkpoint();
                                match (block.hook)(writer, from, marker.last_id) {
                                    Ok(count) => {
                                        copied += count;
                                        *last_id = marker.last_id;
                                        // External events carry their own
                                        // absolute timestamps; re-anchor.
                                        previous = None;
                                    },
                                    Err(err) if err.is_out_of_space() => {
                                        writer.rollback(checkpoint);
                                        return Ok(FetchReport { copied, blocked: Some(from) });
                                    },
                                    Err(err) => return Err(err),
                                }
                            },
                        }
                    },
                    _ => {},
                }
            }
        }
        Ok(FetchReport { copied, blocked: None })
    }

    /// Reserve `required` bytes of free space at the insertion tier,
    /// evicting and promoting as needed.
    ///
    /// # Errors
    /// Returns [`EventLogError::BufferTooSmall`] when a reservation
    /// exceeds the total capacity of a tier on the eviction path.
    pub fn ensure_space(&self, required: usize) -> EventLogResult<()> {
        self.inner.lock().ensure_space(required)
    }

    /// Free bytes currently available at the insertion tier.
    #[must_use]
    pub fn available_data_length(&self) -> usize {
        self.inner.lock().tiers[0].ring().available_data_length()
    }

    /// Newest id vended for `importance`.
    #[must_use]
    pub fn last_vended(&self, importance: Importance) -> EventId {
        let inner = self.inner.lock();
        let tier = inner.final_destination(importance);
        inner.tiers[tier].last_event_id()
    }

    /// Oldest id of `importance` still alive in the log.
    #[must_use]
    pub fn first_alive(&self, importance: Importance) -> EventId {
        let inner = self.inner.lock();
        let tier = inner.final_destination(importance);
        inner.tiers[tier].first_event_id()
    }

    /// Per-tier occupancy snapshot.
    #[must_use]
    pub fn stats(&self) -> Vec<TierSnapshot> {
        let inner = self.inner.lock();
        inner
            .tiers
            .iter()
            .map(|tier| TierSnapshot {
                importance: tier.importance(),
                capacity: tier.capacity(),
                data_length: tier.ring().data_length(),
                first_event_id: tier.first_event_id(),
                last_event_id: tier.last_event_id(),
            })
            .collect()
    }
}

fn serialize_event<F>(
    schema: &EventSchema,
    event_id: EventId,
    timestamp: Timestamp,
    related: Option<EventId>,
    payload_fn: &mut F,
    budget: usize,
) -> WireResult<bytes::Bytes>
where
    F: FnMut(&mut WireWriter) -> WireResult<()>,
{
    let mut payload_writer = WireWriter::new(budget);
    payload_fn(&mut payload_writer)?;
    let payload = payload_writer.finish()?;
    let record = EventRecord {
        importance: schema.importance,
        event_id,
        timestamp,
        trait_id: schema.trait_id,
        event_type: schema.event_type,
        schema_version: schema.version,
        related,
        payload,
    };
    record.encode(budget)
}

impl LogInner {
    fn effective_threshold(&self, trait_id: u32) -> Importance {
        if self.throttled {
            return Importance::Production;
        }
        self.trait_thresholds.get(&trait_id).copied().unwrap_or(self.config.global_threshold)
    }

    /// Index of the deepest tier whose importance does not exceed the
    /// event's; events end their life there.
    fn final_destination(&self, importance: Importance) -> usize {
        self.tiers
            .iter()
            .rposition(|tier| tier.importance() <= importance)
            .unwrap_or(0)
    }

    /// Smallest-capacity tier on the eviction path from insertion to
    /// `final_dest`, as `(index, capacity)`.
    fn smallest_transit_tier(&self, final_dest: usize) -> (usize, usize) {
        self.tiers[..=final_dest]
            .iter()
            .enumerate()
            .min_by_key(|(_, tier)| tier.capacity())
            .map(|(index, tier)| (index, tier.capacity()))
            .unwrap_or((0, 0))
    }

    fn ensure_space(&mut self, required: usize) -> EventLogResult<()> {
        // Explicit worklist of (tier, requirement): a nested reservation
        // on the next tier is pushed on top and retired before the
        // original requirement is retried.
        let mut requests: Vec<(usize, usize)> = vec![(0, required)];
        while let Some(&(tier_index, need)) = requests.last() {
            if need > self.tiers[tier_index].capacity() {
                return Err(EventLogError::BufferTooSmall {
                    required: need,
                    capacity: self.tiers[tier_index].capacity(),
                });
            }
            if self.tiers[tier_index].ring().available_data_length() >= need {
                requests.pop();
                continue;
            }

            let Some(head) = self.tiers[tier_index].ring().peek_front() else {
                unreachable!("tier short on space cannot be empty");
            };
            let record =
                Record::decode(&head).map_err(|err| EventLogError::corrupt(tier_index, &err))?;
            let victim_final = self.final_destination(record.importance());

            if tier_index >= victim_final {
                // This tier is the victim's final destination: drop it.
                match record {
                    Record::Event(event) => {
                        self.tiers[victim_final].record_dropped(event.event_id, event.timestamp);
                        debug!(event_id = %event.event_id, tier = tier_index, "event evicted");
                    },
                    Record::External(marker) => {
                        let slot = marker.registry_slot as usize;
                        if let Some(block) = self.externals.get_mut(slot) {
                            *block = None;
                        }
                        self.tiers[victim_final].record_block_dropped(marker.last_id);
                        warn!(
                            first = %marker.first_id,
                            last = %marker.last_id,
                            "external event block evicted before fetch"
                        );
                    },
                }
                let _ = self.tiers[tier_index].ring_mut().evict_front(EvictionPolicy::Evict);
            } else {
                // Copy the victim forward before reclaiming its slot.
                let frame = CircularBuffer::frame_size(head.len());
                if self.tiers[tier_index + 1].ring().available_data_length() >= frame {
                    match self.tiers[tier_index].ring_mut().evict_front(EvictionPolicy::Evict) {
                        Some(Evicted::Removed(bytes)) => {
                            if self.tiers[tier_index + 1].ring_mut().push_record(&bytes).is_err() {
                                unreachable!("next tier space was just verified");
                            }
                            trace!(from = tier_index, to = tier_index + 1, bytes = frame, "record promoted");
                        },
                        _ => unreachable!("head record was just measured"),
                    }
                } else {
                    requests.push((tier_index + 1, frame));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TierConfig;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn tiny_config() -> EventLogConfig {
        EventLogConfig::default().with_tiers(vec![
            TierConfig::new(Importance::Debug, 256),
            TierConfig::new(Importance::Info, 256),
            TierConfig::new(Importance::Production, 512),
        ])
        .with_event_size_reserve(96)
        .with_event_size_increment(16)
    }

    fn schema(importance: Importance) -> EventSchema {
        EventSchema::new(7, 1, importance)
    }

    fn log_one(log: &EventLog, importance: Importance, fill: &[u8]) -> EventId {
        log.log_event(&schema(importance), &EventOptions::new(), |writer| {
            writer.put_bytes(100, fill)
        })
        .unwrap()
    }

    #[test]
    fn test_event_ids_are_strictly_sequential() {
        let log = EventLog::new(tiny_config()).unwrap();
        for expected in 1..=20u64 {
            let id = log_one(&log, Importance::Info, b"x");
            assert_eq!(id, EventId::new(expected));
        }
    }

    #[test]
    fn test_per_importance_id_spaces_are_independent() {
        let log = EventLog::new(tiny_config()).unwrap();
        assert_eq!(log_one(&log, Importance::Info, b"a"), EventId::new(1));
        assert_eq!(log_one(&log, Importance::Production, b"b"), EventId::new(1));
        assert_eq!(log_one(&log, Importance::Info, b"c"), EventId::new(2));
    }

    #[test]
    fn test_below_threshold_consumes_no_id() {
        let config = tiny_config().with_global_threshold(Importance::Info);
        let log = EventLog::new(config).unwrap();
        assert_eq!(log_one(&log, Importance::Debug, b"quiet"), EventId::NONE);
        assert_eq!(log_one(&log, Importance::Info, b"loud"), EventId::new(1));
    }

    #[test]
    fn test_throttling_forces_production_only() {
        let log = EventLog::new(tiny_config()).unwrap();
        log.set_throttled(true);
        assert_eq!(log_one(&log, Importance::Info, b"x"), EventId::NONE);
        assert_eq!(log_one(&log, Importance::Production, b"y"), EventId::new(1));
        log.set_throttled(false);
        assert_eq!(log_one(&log, Importance::Info, b"x"), EventId::new(1));
    }

    #[test]
    fn test_per_trait_threshold_override() {
        let log = EventLog::new(tiny_config()).unwrap();
        log.set_trait_threshold(7, Some(Importance::Production));
        assert_eq!(log_one(&log, Importance::Info, b"x"), EventId::NONE);
        log.set_trait_threshold(7, None);
        assert_eq!(log_one(&log, Importance::Info, b"x"), EventId::new(1));
    }

    #[test]
    fn test_eviction_advances_first_id_without_reuse() {
        let log = EventLog::new(tiny_config()).unwrap();
        // Debug events die at tier 0; filling it evicts the oldest.
        let mut last = EventId::NONE;
        for _ in 0..40 {
            last = log_one(&log, Importance::Debug, &[0xAB; 40]);
        }
        let first = log.first_alive(Importance::Debug);
        assert!(first > EventId::new(1), "oldest debug events must have been dropped");
        assert_eq!(log.last_vended(Importance::Debug), last);
        assert!(first <= last);
    }

    #[test]
    fn test_promotion_preserves_higher_importance_events() {
        let log = EventLog::new(tiny_config()).unwrap();
        let kept = log_one(&log, Importance::Production, b"keep me");
        // Flood with debug events; the production event must survive by
        // promotion instead of being dropped from the insertion tier.
        for _ in 0..60 {
            log_one(&log, Importance::Debug, &[0xCD; 40]);
        }
        assert_eq!(log.first_alive(Importance::Production), kept);

        let mut writer = WireWriter::new(4096);
        let mut cursor = EventId::NONE;
        let report = log.fetch_events_since(&mut writer, Importance::Production, &mut cursor).unwrap();
        assert_eq!(report.copied, 1);
        assert_eq!(cursor, kept);
    }

    #[test]
    fn test_oversized_event_is_rejected() {
        let log = EventLog::new(tiny_config()).unwrap();
        let result = log.log_event(&schema(Importance::Info), &EventOptions::new(), |writer| {
            writer.put_bytes(100, &[0u8; 100])?;
            writer.put_bytes(101, &[0u8; 100])?;
            writer.put_bytes(102, &[0u8; 100])
        });
        assert!(matches!(result, Err(EventLogError::EventTooLarge { .. })));
        // No id consumed by the drop.
        assert_eq!(log_one(&log, Importance::Info, b"ok"), EventId::new(1));
    }

    #[test]
    fn test_serialization_budget_grows_past_reserve() {
        // Payload larger than the reserve but well within tier capacity.
        let config = tiny_config().with_event_size_reserve(64);
        let log = EventLog::new(config).unwrap();
        let id = log
            .log_event(&schema(Importance::Info), &EventOptions::new(), |writer| {
                writer.put_bytes(100, &[0x11; 120])
            })
            .unwrap();
        assert_eq!(id, EventId::new(1));
    }

    #[test]
    fn test_ensure_space_postcondition() {
        let log = EventLog::new(tiny_config()).unwrap();
        for _ in 0..10 {
            log_one(&log, Importance::Debug, &[0xEE; 40]);
        }
        log.ensure_space(200).unwrap();
        assert!(log.available_data_length() >= 200);
    }

    #[test]
    fn test_ensure_space_rejects_impossible_request() {
        let log = EventLog::new(tiny_config()).unwrap();
        let result = log.ensure_space(10_000);
        assert!(matches!(result, Err(EventLogError::BufferTooSmall { .. })));
    }

    #[test]
    fn test_fetch_rewrites_timestamps_as_deltas() {
        let mut log = EventLog::new(tiny_config()).unwrap();
        log.set_clock(Box::new(|| Timestamp::from_millis(0)));
        let opts = |millis| EventOptions::new().with_timestamp(Timestamp::from_millis(millis));
        log.log_event(&schema(Importance::Info), &opts(1_000), |w| w.put_bool(100, true)).unwrap();
        log.log_event(&schema(Importance::Info), &opts(1_300), |w| w.put_bool(100, true)).unwrap();
        log.log_event(&schema(Importance::Info), &opts(1_900), |w| w.put_bool(100, true)).unwrap();

        let mut writer = WireWriter::new(4096);
        let mut cursor = EventId::NONE;
        let report = log.fetch_events_since(&mut writer, Importance::Info, &mut cursor).unwrap();
        assert_eq!(report.copied, 3);
        assert_eq!(report.blocked, None);

        let mut reader = weft_core::WireReader::new(writer.finish().unwrap());
        let mut absolute = Vec::new();
        let mut deltas = Vec::new();
        while let Some(element) = reader.next().unwrap() {
            if let weft_core::WireElement::Value { tag, value } = element {
                match tag {
                    crate::record::tag::TIMESTAMP => absolute.push(value.as_u64().unwrap()),
                    crate::record::tag::DELTA_TIMESTAMP => deltas.push(value.as_u64().unwrap()),
                    _ => {},
                }
            }
        }
        assert_eq!(absolute, vec![1_000]);
        assert_eq!(deltas, vec![300, 600]);
    }

    #[test]
    fn test_fetch_resumes_from_cursor() {
        let log = EventLog::new(tiny_config()).unwrap();
        for _ in 0..3 {
            log_one(&log, Importance::Info, b"ev");
        }
        let mut writer = WireWriter::new(4096);
        let mut cursor = EventId::new(2);
        let report = log.fetch_events_since(&mut writer, Importance::Info, &mut cursor).unwrap();
        assert_eq!(report.copied, 1);
        assert_eq!(cursor, EventId::new(3));
    }

    #[test]
    fn test_fetch_stops_at_event_boundary_when_writer_fills() {
        let log = EventLog::new(tiny_config()).unwrap();
        for _ in 0..3 {
            log_one(&log, Importance::Info, &[0x55; 30]);
        }
        // Room for roughly one event only.
        let mut writer = WireWriter::new(120);
        let mut cursor = EventId::NONE;
        let report = log.fetch_events_since(&mut writer, Importance::Info, &mut cursor).unwrap();
        assert!(report.copied >= 1);
        assert_eq!(report.blocked, Some(cursor.next()));
        // Writer holds only complete events.
        let payload = writer.finish().unwrap();
        let mut reader = weft_core::WireReader::new(payload);
        while reader.next().unwrap().is_some() {}
    }

    #[test]
    fn test_external_block_is_spliced_into_fetch() {
        let log = EventLog::new(tiny_config()).unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_hook = Arc::clone(&calls);
        let (first, last) = log
            .register_external_events(
                Importance::Info,
                3,
                Box::new(move |writer, from, to| {
                    calls_hook.fetch_add(1, Ordering::SeqCst);
                    let mut count = 0;
                    let mut id = from;
                    while id <= to {
                        writer.start_container(crate::record::tag::EVENT)?;
                        writer.put_u64(crate::record::tag::EVENT_ID, id.value())?;
                        writer.end_container()?;
                        count += 1;
                        id = id.next();
                    }
                    Ok(count)
                }),
            )
            .unwrap();
        assert_eq!(first, EventId::new(1));
        assert_eq!(last, EventId::new(3));
        let native = log_one(&log, Importance::Info, b"after");
        assert_eq!(native, EventId::new(4));

        let mut writer = WireWriter::new(4096);
        let mut cursor = EventId::NONE;
        let report = log.fetch_events_since(&mut writer, Importance::Info, &mut cursor).unwrap();
        assert_eq!(report.copied, 4);
        assert_eq!(cursor, EventId::new(4));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // A later pass skips the already-consumed block entirely.
        let mut writer = WireWriter::new(4096);
        let report = log.fetch_events_since(&mut writer, Importance::Info, &mut cursor).unwrap();
        assert_eq!(report.copied, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_flush_notifier_fires_outside_lock() {
        let mut log = EventLog::new(tiny_config()).unwrap();
        let fired = Arc::new(AtomicU32::new(0));
        let fired_clone = Arc::clone(&fired);
        log.set_flush_notifier(Box::new(move |_, _| {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        }));
        log_one(&log, Importance::Info, b"x");
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
