//! Bounded FIFO work queue with a wake-up signal for one consumer task.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;

/// A lock-guarded FIFO paired with a [`Notify`].
///
/// `push` never blocks on anything but the queue lock. The consumer drains
/// the queue, then awaits [`WorkQueue::notified`]; a push that happens while
/// the consumer is draining leaves a stored permit, so no wake-up is lost.
pub struct WorkQueue<T> {
    items: Mutex<VecDeque<T>>,
    ready: Notify,
    capacity: usize,
}

impl<T> WorkQueue<T> {
    /// `capacity == 0` means unbounded.
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            ready: Notify::new(),
            capacity,
        }
    }

    /// Enqueue and signal the consumer. Hands the item back when full.
    pub fn push(&self, item: T) -> Result<(), T> {
        {
            let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
            if self.capacity > 0 && items.len() >= self.capacity {
                return Err(item);
            }
            items.push_back(item);
        }
        self.ready.notify_one();
        Ok(())
    }

    pub fn pop(&self) -> Option<T> {
        self.items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }

    /// Take everything currently queued, oldest first.
    pub fn drain(&self) -> Vec<T> {
        self.items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Wait until something is pushed (or [`WorkQueue::wake`] is called).
    pub async fn notified(&self) {
        self.ready.notified().await;
    }

    /// Wake the consumer without enqueuing, used on shutdown.
    pub fn wake(&self) {
        self.ready.notify_one();
    }
}
