//! A bounded, byte-sized FIFO of owned items with blocking consumption and
//! non-blocking, drop-newest production.
//!
//! Grounded on the original `debug_agent::util::BlockingQueue<T>`
//! (`Util/BlockingQueue.hpp`): a `close()` wakes every blocked consumer, but
//! items already queued remain servicable until drained, so `remove()`
//! keeps returning `Some` while the queue is non-empty even after close.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

struct State<T> {
    items: VecDeque<T>,
    bytes_used: usize,
    open: bool,
}

/// See module docs.
pub struct BlockingQueue<T> {
    state: Mutex<State<T>>,
    cv: Condvar,
    max_bytes: usize,
    element_size: Box<dyn Fn(&T) -> usize + Send + Sync>,
}

impl<T> BlockingQueue<T> {
    /// Create a closed queue with the given byte budget and per-element
    /// size function.
    pub fn new(max_bytes: usize, element_size: impl Fn(&T) -> usize + Send + Sync + 'static) -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::new(),
                bytes_used: 0,
                open: false,
            }),
            cv: Condvar::new(),
            max_bytes,
            element_size: Box::new(element_size),
        }
    }

    /// Open the queue so items can be enqueued. Idempotent.
    pub fn open(&self) {
        let mut state = self.state.lock().unwrap();
        state.open = true;
    }

    /// Close the queue: no more items are admitted, and every blocked
    /// `remove()` wakes. Items already queued remain consumable. Idempotent.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        if state.open {
            state.open = false;
            self.cv.notify_all();
        }
    }

    /// Non-blocking. Returns `false` if the queue is closed, or if adding
    /// `item` would exceed the byte budget (drop-newest: the item is
    /// discarded, nothing already queued is evicted). Wakes one consumer on
    /// success.
    pub fn add(&self, item: T) -> bool {
        let mut state = self.state.lock().unwrap();
        if !state.open {
            return false;
        }
        let size = (self.element_size)(&item);
        if size + state.bytes_used > self.max_bytes {
            return false;
        }
        state.bytes_used += size;
        state.items.push_back(item);
        self.cv.notify_one();
        true
    }

    /// Blocks until an item is available, or the queue is empty *and*
    /// closed (returns `None`).
    pub fn remove(&self) -> Option<T> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(item) = state.items.pop_front() {
                state.bytes_used -= (self.element_size)(&item);
                return Some(item);
            }
            if !state.open {
                return None;
            }
            state = self.cv.wait(state).unwrap();
        }
    }

    /// Discard all queued items.
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.items.clear();
        state.bytes_used = 0;
    }

    /// Number of items currently queued.
    pub fn element_count(&self) -> usize {
        self.state.lock().unwrap().items.len()
    }

    /// Total byte size of items currently queued.
    pub fn memory_size(&self) -> usize {
        self.state.lock().unwrap().bytes_used
    }

    /// Whether the queue currently accepts new items.
    pub fn is_open(&self) -> bool {
        self.state.lock().unwrap().open
    }
}

/// Opens a [`BlockingQueue`] on construction and closes it on scope exit,
/// even along an error/panic unwind path.
pub struct AutoOpenClose<'a, T> {
    queue: &'a BlockingQueue<T>,
}

impl<'a, T> AutoOpenClose<'a, T> {
    /// Open `queue` and return a guard that will close it on drop.
    pub fn new(queue: &'a BlockingQueue<T>) -> Self {
        queue.open();
        Self { queue }
    }
}

impl<T> Drop for AutoOpenClose<'_, T> {
    fn drop(&mut self) {
        self.queue.close();
    }
}
