//! Fixed-capacity queues and stop flags shared between room tasks.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::{watch, Notify};

/// Bounded queue whose producer never waits. When the queue is full the
/// oldest item is evicted to admit the new one.
///
/// Only [`BoundedChannel::pop`] suspends, and each channel is expected to
/// have a single consumer task.
#[derive(Debug)]
pub struct BoundedChannel<T> {
    capacity: usize,
    state: Mutex<ChannelState<T>>,
    notify: Notify,
}

#[derive(Debug)]
struct ChannelState<T> {
    items: VecDeque<T>,
    closed: bool,
    dropped: u64,
}

impl<T> BoundedChannel<T> {
    /// Creates a channel holding at most `capacity` items (minimum one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: Mutex::new(ChannelState {
                items: VecDeque::with_capacity(capacity),
                closed: false,
                dropped: 0,
            }),
            notify: Notify::new(),
        }
    }

    /// Enqueues `item`, evicting the oldest queued item if the channel is
    /// full. Returns the evicted item, or `item` itself if the channel has
    /// been closed.
    pub fn push(&self, item: T) -> Option<T> {
        let evicted = {
            let mut state = self.state.lock();
            if state.closed {
                return Some(item);
            }
            let evicted = if state.items.len() >= self.capacity {
                state.dropped += 1;
                state.items.pop_front()
            } else {
                None
            };
            state.items.push_back(item);
            evicted
        };
        self.notify.notify_one();
        evicted
    }

    /// Waits for the next item. Returns `None` once the channel is closed
    /// and drained. Cancel safe: an item is only removed when returned.
    pub async fn pop(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock();
                if let Some(item) = state.items.pop_front() {
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Returns the next item without waiting.
    pub fn try_pop(&self) -> Option<T> {
        self.state.lock().items.pop_front()
    }

    /// Rejects further pushes and wakes a waiting consumer. Items already
    /// queued can still be popped.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of items evicted by drop-oldest so far.
    pub fn dropped(&self) -> u64 {
        self.state.lock().dropped
    }
}

/// One-shot cooperative stop flag. Cloning shares the flag.
#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: std::sync::Arc<watch::Sender<bool>>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            tx: std::sync::Arc::new(tx),
        }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`StopSignal::trigger`] has been called.
    pub async fn triggered(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}
