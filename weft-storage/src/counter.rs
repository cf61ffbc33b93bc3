//! Monotonic event-id counters.
//!
//! Each tier vends ids from its own counter. Counters never go
//! backwards and ids are never reused, even across eviction or process
//! restart (when backed by a persisted store).

use std::fmt;

/// A strictly monotonic id source.
pub trait MonotonicCounter: fmt::Debug + Send {
    /// The next id that will be vended.
    fn value(&self) -> u64;

    /// Vend the next id and advance.
    fn advance(&mut self) -> u64;
}

/// Volatile counter starting at a configured first id.
#[derive(Debug, Clone)]
pub struct InMemoryCounter {
    next: u64,
}

impl InMemoryCounter {
    /// Create a counter whose first vended id is `first`.
    #[must_use]
    pub const fn new(first: u64) -> Self {
        Self { next: first }
    }
}

impl Default for InMemoryCounter {
    fn default() -> Self {
        Self::new(1)
    }
}

impl MonotonicCounter for InMemoryCounter {
    fn value(&self) -> u64 {
        self.next
    }

    fn advance(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        id
    }
}

/// Caller-supplied durable storage for a counter position.
pub trait CounterStore: fmt::Debug + Send {
    /// Load the last persisted counter position.
    fn load(&mut self) -> u64;

    /// Persist the counter position.
    fn save(&mut self, next: u64);
}

/// Counter backed by a persisted store.
///
/// On restart the first vended id resumes from the persisted position
/// plus the configured epoch, guaranteeing no reuse even if the final
/// saves of the previous run were lost.
#[derive(Debug)]
pub struct PersistedCounter {
    store: Box<dyn CounterStore>,
    next: u64,
}

impl PersistedCounter {
    /// Restore a counter from its store, applying the epoch offset.
    #[must_use]
    pub fn restore(mut store: Box<dyn CounterStore>, epoch: u64) -> Self {
        let next = store.load().saturating_add(epoch).max(1);
        store.save(next);
        Self { store, next }
    }
}

impl MonotonicCounter for PersistedCounter {
    fn value(&self) -> u64 {
        self.next
    }

    fn advance(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        self.store.save(self.next);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_in_memory_counter_is_strictly_increasing() {
        let mut counter = InMemoryCounter::default();
        assert_eq!(counter.value(), 1);
        assert_eq!(counter.advance(), 1);
        assert_eq!(counter.advance(), 2);
        assert_eq!(counter.value(), 3);
    }

    #[derive(Debug, Clone, Default)]
    struct SharedStore(Arc<Mutex<u64>>);

    impl CounterStore for SharedStore {
        fn load(&mut self) -> u64 {
            *self.0.lock().unwrap()
        }

        fn save(&mut self, next: u64) {
            *self.0.lock().unwrap() = next;
        }
    }

    #[test]
    fn test_persisted_counter_resumes_with_epoch() {
        let cell = SharedStore::default();

        let mut counter = PersistedCounter::restore(Box::new(cell.clone()), 0);
        assert_eq!(counter.advance(), 1);
        assert_eq!(counter.advance(), 2);

        // Restart with an epoch bump: ids must not overlap the old run.
        let mut counter = PersistedCounter::restore(Box::new(cell.clone()), 1000);
        let first = counter.advance();
        assert!(first > 2);
        assert_eq!(first, 3 + 1000);
    }
}
