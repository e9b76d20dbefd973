//! Ordered hand-off queue.
//!
//! Producers push items while holding their own state lock, so the queue
//! order is the order in which decisions were made. Draining happens after
//! that lock is released and is performed by at most one thread at a time:
//! a thread that finds another drainer active leaves its items to it.

use parking_lot::Mutex;
use std::collections::VecDeque;

/// FIFO queue drained by a single thread at a time.
pub struct Outbox<T> {
    /// Items waiting to be handed off.
    queue: Mutex<VecDeque<T>>,

    /// Held by the thread currently draining.
    draining: Mutex<()>,
}

impl<T> Outbox<T> {
    /// Create an empty outbox.
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            draining: Mutex::new(()),
        }
    }

    /// Append an item.
    pub fn push(&self, item: T) {
        self.queue.lock().push_back(item);
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Check whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Hand every queued item to `f`, in push order.
    ///
    /// Returns immediately if another thread (or an outer frame of this
    /// thread) is already draining; that drainer picks up the items.
    pub fn drain(&self, mut f: impl FnMut(T)) {
        loop {
            let Some(guard) = self.draining.try_lock() else {
                return;
            };

            loop {
                let next = self.queue.lock().pop_front();
                match next {
                    Some(item) => f(item),
                    None => break,
                }
            }

            drop(guard);

            // An item pushed between the last pop and the guard release
            // would otherwise be stranded.
            if self.queue.lock().is_empty() {
                return;
            }
        }
    }
}

impl<T> Default for Outbox<T> {
    fn default() -> Self {
        Self::new()
    }
}
