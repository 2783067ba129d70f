//! Observation bus
//!
//! Registration swaps in a new observer list; a broadcast iterates over the
//! snapshot it took when it started, so concurrent register/unregister never
//! disturbs it. Broadcasts from different threads are serialized by the bus's
//! delivery lock, which keeps delivery in submission order. The lock is
//! reentrant, so an observer may publish to the same bus from its callback;
//! that nested batch reaches every observer before the outer one continues.

use crate::observe::{Changes, Observer};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

type ObserverList = Arc<Vec<Arc<dyn Observer>>>;

pub struct ObservationBus {
    observers: RwLock<ObserverList>,
    shutdown: AtomicBool,
    delivery: ReentrantMutex<()>,
    sequence: Mutex<u64>,
}

fn same_observer(a: &Arc<dyn Observer>, b: &Arc<dyn Observer>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

impl ObservationBus {
    pub fn new() -> Self {
        ObservationBus {
            observers: RwLock::new(Arc::new(Vec::new())),
            shutdown: AtomicBool::new(false),
            delivery: ReentrantMutex::new(()),
            sequence: Mutex::new(0),
        }
    }

    /// Register an observer
    ///
    /// Returns false if it was already registered or the bus is shut down.
    pub fn register(&self, observer: Arc<dyn Observer>) -> bool {
        if self.is_shutdown() {
            debug!("Ignoring registration on a shut down observation bus");
            return false;
        }
        let mut observers = self.observers.write();
        if observers.iter().any(|o| same_observer(o, &observer)) {
            return false;
        }
        let mut next = Vec::with_capacity(observers.len() + 1);
        next.extend(observers.iter().cloned());
        next.push(observer);
        *observers = Arc::new(next);
        true
    }

    pub fn unregister(&self, observer: &Arc<dyn Observer>) -> bool {
        let mut observers = self.observers.write();
        if !observers.iter().any(|o| same_observer(o, observer)) {
            return false;
        }
        let next: Vec<_> = observers
            .iter()
            .filter(|o| !same_observer(o, observer))
            .cloned()
            .collect();
        *observers = Arc::new(next);
        true
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    pub fn has_observers(&self) -> bool {
        self.observer_count() > 0
    }

    /// Drop all observers and refuse any further registration
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        *self.observers.write() = Arc::new(Vec::new());
        debug!("Observation bus shut down");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Sequence number of the most recent broadcast; zero before the first
    pub fn last_sequence(&self) -> u64 {
        *self.sequence.lock()
    }

    fn snapshot(&self) -> ObserverList {
        self.observers.read().clone()
    }
}

impl Default for ObservationBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Observer for ObservationBus {
    fn notify(&self, changes: &Changes) {
        let _delivering = self.delivery.lock();
        let sequence = {
            let mut last = self.sequence.lock();
            *last += 1;
            *last
        };
        let stamped = changes.sequenced(sequence);
        let observers = self.snapshot();
        trace!(
            sequence = sequence,
            observers = observers.len(),
            requests = stamped.len(),
            "Broadcasting changes"
        );
        for observer in observers.iter() {
            observer.notify(&stamped);
        }
    }
}
