//! Async driver glue for the synchronous engine.
//!
//! The engine itself never blocks or suspends; it is re-invoked by an
//! external scheduler whenever something changed. The driver is that
//! scheduler: a tokio task draining a trigger channel fed by the event
//! log's flush notifier and the transport's delivery confirmations,
//! coalescing bursts into single `run()` passes.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use weft_core::types::SubscriptionId;
use weft_storage::FlushNotifier;

use crate::engine::NotificationEngine;

/// Reasons to re-invoke the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunTrigger {
    /// New dirtiness or events are pending.
    Flush,
    /// A notify buffer came back from the transport.
    NotifyConfirmed(SubscriptionId),
    /// Stop the driver.
    Shutdown,
}

/// Cloneable handle feeding the driver's trigger channel.
#[derive(Debug, Clone)]
pub struct EngineTrigger {
    tx: mpsc::UnboundedSender<RunTrigger>,
}

impl EngineTrigger {
    /// Request an engine pass.
    pub fn flush(&self) {
        let _ = self.tx.send(RunTrigger::Flush);
    }

    /// Report a confirmed notify delivery.
    pub fn notify_confirmed(&self, id: SubscriptionId) {
        let _ = self.tx.send(RunTrigger::NotifyConfirmed(id));
    }

    /// Stop the driver after pending triggers drain.
    pub fn shutdown(&self) {
        let _ = self.tx.send(RunTrigger::Shutdown);
    }

    /// Adapt this trigger into the event log's flush notifier.
    #[must_use]
    pub fn flush_notifier(&self) -> FlushNotifier {
        let tx = self.tx.clone();
        Box::new(move |_, _| {
            let _ = tx.send(RunTrigger::Flush);
        })
    }
}

/// Tokio task driving an engine from a trigger channel.
pub struct EngineDriver {
    engine: Arc<NotificationEngine>,
    rx: mpsc::UnboundedReceiver<RunTrigger>,
}

impl EngineDriver {
    /// Create a driver and its trigger handle.
    #[must_use]
    pub fn new(engine: Arc<NotificationEngine>) -> (Self, EngineTrigger) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { engine, rx }, EngineTrigger { tx })
    }

    /// Drain triggers until shutdown, coalescing bursts into single
    /// engine passes.
    pub async fn run(mut self) {
        while let Some(trigger) = self.rx.recv().await {
            if !self.apply(trigger) {
                debug!("engine driver shut down");
                return;
            }
            while let Ok(trigger) = self.rx.try_recv() {
                if !self.apply(trigger) {
                    debug!("engine driver shut down");
                    return;
                }
            }
            self.engine.run();
        }
    }

    fn apply(&self, trigger: RunTrigger) -> bool {
        match trigger {
            RunTrigger::Shutdown => false,
            RunTrigger::Flush => true,
            RunTrigger::NotifyConfirmed(id) => {
                if let Err(err) = self.engine.on_notify_confirm(id) {
                    warn!(subscription = %id, error = %err, "stale notify confirmation");
                }
                true
            },
        }
    }
}
