//! A minimal one-shot rendezvous used to cancel a blocking device wait from
//! a task other than the one blocked in it.
//!
//! `unblock_wait()` arriving *before* any waiter still latches, so the next
//! `wait_until_unblock()` returns immediately; once that latch is consumed,
//! further waits block again until unblocked anew.

use std::sync::{Condvar, Mutex};

struct State {
    waiting: bool,
    unblocked: bool,
}

/// See module docs.
pub struct SyncWait {
    state: Mutex<State>,
    cv: Condvar,
}

impl Default for SyncWait {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncWait {
    /// Create a new, not-yet-unblocked rendezvous.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                waiting: false,
                unblocked: false,
            }),
            cv: Condvar::new(),
        }
    }

    /// Block the caller until `unblock_wait()` is called. Returns
    /// immediately if `unblock_wait()` already latched since the last time
    /// this returned.
    pub fn wait_until_unblock(&self) {
        let mut state = self.state.lock().unwrap();
        if state.unblocked {
            state.unblocked = false;
            return;
        }
        state.waiting = true;
        while state.waiting {
            state = self.cv.wait(state).unwrap();
        }
    }

    /// Wake exactly one blocked (or future) `wait_until_unblock()` call.
    pub fn unblock_wait(&self) {
        let mut state = self.state.lock().unwrap();
        if state.waiting {
            state.waiting = false;
            self.cv.notify_one();
        } else {
            state.unblocked = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn unblock_before_wait_latches() {
        let sw = SyncWait::new();
        sw.unblock_wait();
        sw.wait_until_unblock(); // must return immediately
    }

    #[test]
    fn latch_is_consumed_by_one_wait() {
        let sw = Arc::new(SyncWait::new());
        sw.unblock_wait();
        sw.wait_until_unblock();

        // The latch was consumed; a second wait must block until unblocked
        // again.
        let sw2 = sw.clone();
        let handle = std::thread::spawn(move || {
            sw2.wait_until_unblock();
        });
        std::thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());
        sw.unblock_wait();
        handle.join().unwrap();
    }

    #[test]
    fn wait_then_unblock_wakes_the_waiter() {
        let sw = Arc::new(SyncWait::new());
        let sw2 = sw.clone();
        let handle = std::thread::spawn(move || {
            sw2.wait_until_unblock();
        });
        std::thread::sleep(Duration::from_millis(50));
        sw.unblock_wait();
        handle.join().unwrap();
    }
}
