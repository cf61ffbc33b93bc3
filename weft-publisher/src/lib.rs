//! # Weft Publisher
//!
//! Publisher side of the Weft data-synchronization engine: granular
//! dirty tracking with lowest-common-ancestor diff folding, bounded
//! incremental notify serialization, and the round-robin notification
//! engine that keeps every subscriber in sync within one in-flight
//! buffer per subscription.
//!
//! ## Data flow
//!
//! Application mutations call [`NotificationEngine::set_dirty`] /
//! [`NotificationEngine::delete_key`] and append to the shared
//! [`weft_storage::EventLog`]. Each [`NotificationEngine::run`] pass
//! folds the dirty paths of every notifiable subscription into minimal
//! data elements, rides pending events along in the same buffer, and
//! hands the result to the [`NotifyTransport`]. Resumable cursors on
//! each [`SubscriptionHandler`] carry partial progress to the next
//! pass; the [`EngineDriver`] re-invokes the engine on flush and
//! delivery-confirmation triggers.

#![deny(unsafe_code)]
#![warn(clippy::all)]

pub mod builder;
pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod message;
pub mod solver;
pub mod subscription;
pub mod transport;

pub use crate::{
    builder::{BuilderCheckpoint, BuilderState, NotifyRequestBuilder},
    config::{EngineConfig, SolverConfig},
    driver::{EngineDriver, EngineTrigger, RunTrigger},
    engine::{NotificationEngine, SubscriptionEvents},
    error::{PublisherError, PublisherResult},
    message::{DataElement, EventTimestamp, NotifyEvent, NotifyRequest},
    solver::{BasicGraphSolver, DirtyStore, IntermediateGraphSolver, MergeSet},
    subscription::{SubscriptionHandler, TraitInstanceInfo},
    transport::{LoopbackTransport, NotifyTransport},
};
