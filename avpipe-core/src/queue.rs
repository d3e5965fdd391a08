//! FIFO with a condition variable for worker hand-off.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// A FIFO queue whose consumer can wait for the next element.
///
/// The consumer peeks with [`wait_front`](Self::wait_front) and only pops
/// once the element has been fully handled, so a failed attempt can be
/// retried with the same element.
pub struct SignalQueue<T> {
    items: Mutex<VecDeque<T>>,
    cond: Condvar,
}

impl<T: Clone> SignalQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            cond: Condvar::new(),
        }
    }

    /// Append an element and wake one waiter.
    pub fn push(&self, item: T) {
        self.items.lock().push_back(item);
        self.cond.notify_one();
    }

    /// Peek at the head, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `None` on timeout or when woken by [`wake_all`](Self::wake_all)
    /// with the queue still empty.
    pub fn wait_front(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut items = self.items.lock();
        if items.is_empty() {
            let _ = self.cond.wait_until(&mut items, deadline);
        }
        items.front().cloned()
    }

    pub fn front(&self) -> Option<T> {
        self.items.lock().front().cloned()
    }

    pub fn pop_front(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// Swap the head for `item` and return the old head. Does nothing on
    /// an empty queue.
    pub fn replace_front(&self, item: T) -> Option<T> {
        self.items
            .lock()
            .front_mut()
            .map(|front| std::mem::replace(front, item))
    }

    /// Drop every element.
    pub fn clear(&self) {
        self.items.lock().clear();
    }

    /// Remove and return every element, front first.
    pub fn drain(&self) -> Vec<T> {
        self.items.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Wake every waiter, e.g. on a state change.
    pub fn wake_all(&self) {
        self.cond.notify_all();
    }
}

impl<T: Clone> Default for SignalQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
