//! Orchestration events and the queue connecting background tasks to the
//! event loop

use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;

/// Outcome reported by a background task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinerEvent {
    /// The mining task stored a solved block in its cycle slot
    BlockMined,
    /// The chain monitor saw the daemon's head move
    ChainUpdated,
}

/// Unbounded FIFO of events with a single consumer.
///
/// `Notify::notify_one` stores a permit when nobody is waiting, so a push that
/// lands between the consumer's empty check and its wait still wakes it.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: Mutex<VecDeque<MinerEvent>>,
    notify: Notify,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event and wake the consumer
    pub fn push(&self, event: MinerEvent) {
        self.events.lock().push_back(event);
        self.notify.notify_one();
    }

    /// Wait until an event is available and remove the oldest one
    pub async fn wait_one(&self) -> MinerEvent {
        loop {
            let next = self.events.lock().pop_front();
            if let Some(event) = next {
                return event;
            }
            self.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}
