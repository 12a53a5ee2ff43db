//! Node-wide publish/subscribe event bus.
//!
//! One bus is shared by every committee on the node. Subscribers receive events
//! over unbounded crossbeam channels; a subscriber that has dropped its receiver
//! is pruned on the next publish.

use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;

/// [`CommitteeEvent`] is published on lifecycle changes of a committee.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommitteeEvent {
    /// A committee service was created and registered.
    Registered {
        committee_id: u64,
        /// Last height committed before the committee took over.
        base_height: u64,
    },
    /// A committee's switch and dispatcher started.
    Started { committee_id: u64 },
    /// A committee's switch and dispatcher stopped.
    Stopped { committee_id: u64 },
    /// A committee's terminal height was set.
    EndHeight { committee_id: u64, height: u64 },
}

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("event bus already started")]
    AlreadyStarted,
}

/// [`EventBus`] fans events out to every live subscriber while running.
#[derive(Default)]
pub struct EventBus {
    running: AtomicBool,
    subscribers: Mutex<Vec<Sender<CommitteeEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self) -> Result<(), EventBusError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(EventBusError::AlreadyStarted);
        }
        Ok(())
    }

    /// Stops delivery. Existing subscribers stay registered.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn subscribe(&self) -> Receiver<CommitteeEvent> {
        let (tx, rx) = channel::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Publish an event to every subscriber.
    ///
    /// Returns the number of subscribers reached; zero if the bus is stopped.
    pub fn publish(&self, event: CommitteeEvent) -> usize {
        if !self.is_running() {
            return 0;
        }
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        subscribers.len()
    }
}
