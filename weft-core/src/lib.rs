//! # Weft Core
//!
//! Shared foundation for the Weft publish/subscribe data-synchronization
//! engine: identifier types, the property-tree schema engine with
//! lowest-common-ancestor queries, the published-trait catalog, and the
//! bounded structured wire codec with checkpoint/rollback.
//!
//! The heavier machinery lives in the sibling crates: `weft-storage`
//! holds the tiered circular event log, `weft-publisher` the
//! notification engine and graph-diffing solver.

#![deny(unsafe_code)]
#![warn(clippy::all)]

pub mod error;
pub mod schema;
pub mod types;
pub mod wire;

pub use crate::{
    error::{ConfigError, WireError, WireResult},
    schema::{Lca, PropertySchema, SchemaBuilder, TraitCatalog, TraitInstance},
    types::{EventId, Importance, PathHandle, SubscriptionId, Timestamp, TraitHandle, TraitPath},
    wire::{Checkpoint, Tag, WireElement, WireReader, WireValue, WireWriter},
};
