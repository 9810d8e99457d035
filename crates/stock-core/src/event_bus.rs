//! Event bus for decoupled communication between the session and its observers.
//!
//! Events are buffered until an observer drains them. Tasks on any thread may
//! emit; an observer that wants to sleep until something happens awaits `wait()`.
//! The buffer is bounded: once full, the oldest event is dropped and counted
//! in `lagged()`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use stock_types::event::SessionEvent;
use tokio::sync::Notify;

/// Pending events kept for an observer that is not draining.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Shared event bus — clone-cheap via Arc.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    queue: Mutex<VecDeque<SessionEvent>>,
    capacity: usize,
    lagged: AtomicU64,
    notify: Notify,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(BusInner {
                queue: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY))),
                capacity,
                lagged: AtomicU64::new(0),
                notify: Notify::new(),
            }),
        }
    }

    /// Publish an event, dropping the oldest pending one if the buffer is full.
    pub fn emit(&self, event: SessionEvent) {
        {
            let mut queue = self.queue();
            if queue.len() >= self.inner.capacity {
                queue.pop_front();
                if self.inner.lagged.fetch_add(1, Ordering::Relaxed) == 0 {
                    log::warn!(
                        "Event bus full ({} pending), dropping oldest events",
                        self.inner.capacity
                    );
                }
            }
            queue.push_back(event);
        }
        self.inner.notify.notify_one();
    }

    /// Events dropped because nobody drained in time.
    pub fn lagged(&self) -> u64 {
        self.inner.lagged.load(Ordering::Relaxed)
    }

    /// Drain all pending events.
    pub fn drain(&self) -> Vec<SessionEvent> {
        self.queue().drain(..).collect()
    }

    pub fn has_pending(&self) -> bool {
        !self.queue().is_empty()
    }

    /// Resolve once at least one event is pending.
    pub async fn wait(&self) {
        loop {
            // Register before checking so an emit in between is not lost.
            let notified = self.inner.notify.notified();
            if self.has_pending() {
                return;
            }
            notified.await;
        }
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<SessionEvent>> {
        self.inner.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
