//! # Weft Storage
//!
//! Tiered circular event log for the Weft sync engine.
//!
//! Serialized events live in an importance-ordered chain of ring-buffer
//! tiers. Appends always land in the first (least important) tier;
//! eviction pressure either drops a record, when the pressured tier is
//! its final destination, or promotes it into the next tier first. The
//! notification engine drains the log through [`EventLog::fetch_events_since`],
//! which rewrites timestamps into the delta form used on the notify wire.

#![deny(unsafe_code)]
#![warn(clippy::all)]

pub mod buffer;
pub mod config;
pub mod counter;
pub mod error;
pub mod log;
pub mod record;
pub mod ring;

pub use crate::{
    buffer::EventBuffer,
    config::{EventLogConfig, TierConfig, MIN_TIER_CAPACITY},
    counter::{CounterStore, InMemoryCounter, MonotonicCounter, PersistedCounter},
    error::{EventLogError, EventLogResult},
    log::{EventLog, ExternalFetchHook, FetchReport, FlushNotifier, LogClock, TierSnapshot},
    record::{EventOptions, EventRecord, EventSchema, ExternalMarker, Record, DEFAULT_SCHEMA_VERSION},
    ring::{CircularBuffer, Evicted, EvictionPolicy, RecordIter, FRAME_HEADER},
};
