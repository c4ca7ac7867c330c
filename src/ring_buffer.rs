//! A fixed-capacity byte ring buffer with blocking and non-blocking
//! read/write that guarantees neither overflow nor underflow.
//!
//! Grounded on `Util::RingBuffer` (`Util/RingBuffer.hpp`): producer and
//! consumer positions are monotonically increasing byte counters; the used
//! size is always `producer - consumer`, wrap-around is handled by copying
//! in at most two contiguous chunks.

use std::sync::{Condvar, Mutex};

struct State {
    open: bool,
    buffer: Vec<u8>,
    producer_position: usize,
    consumer_position: usize,
}

impl State {
    fn available_consumption(&self) -> usize {
        self.producer_position - self.consumer_position
    }

    fn available_production(&self) -> usize {
        self.buffer.len() - self.available_consumption()
    }

    /// Copy `count` bytes from `source` into the buffer at the producer
    /// position, wrapping around if needed, and advance both `source` and
    /// the producer position.
    fn write_locked(&mut self, source: &mut &[u8], count: usize) {
        let len = self.buffer.len();
        let producer_index = self.producer_position % len;
        if producer_index + count <= len {
            self.buffer[producer_index..producer_index + count].copy_from_slice(&source[..count]);
        } else {
            let first_part = len - producer_index;
            let second_part = count - first_part;
            self.buffer[producer_index..].copy_from_slice(&source[..first_part]);
            self.buffer[..second_part].copy_from_slice(&source[first_part..count]);
        }
        *source = &source[count..];
        self.producer_position += count;
    }

    /// Copy `count` bytes from the buffer at the consumer position into
    /// `dest`, wrapping around if needed, and advance both `dest` and the
    /// consumer position.
    fn read_locked(&mut self, dest: &mut &mut [u8], count: usize) {
        let len = self.buffer.len();
        let consumer_index = self.consumer_position % len;
        if consumer_index + count <= len {
            dest[..count].copy_from_slice(&self.buffer[consumer_index..consumer_index + count]);
        } else {
            let first_part = len - consumer_index;
            let second_part = count - first_part;
            dest[..first_part].copy_from_slice(&self.buffer[consumer_index..]);
            dest[first_part..count].copy_from_slice(&self.buffer[..second_part]);
        }
        let taken = std::mem::take(dest);
        let (_, rest) = taken.split_at_mut(count);
        *dest = rest;
        self.consumer_position += count;
    }

    fn closed_for_consumer(&self) -> bool {
        !self.open && self.available_consumption() == 0
    }
}

/// See module docs.
pub struct RingBuffer {
    state: Mutex<State>,
    producer_cv: Condvar,
    consumer_cv: Condvar,
}

impl RingBuffer {
    /// Create a closed ring buffer of the given byte capacity.
    pub fn new(size: usize) -> Self {
        Self {
            state: Mutex::new(State {
                open: false,
                buffer: vec![0u8; size],
                producer_position: 0,
                consumer_position: 0,
            }),
            producer_cv: Condvar::new(),
            consumer_cv: Condvar::new(),
        }
    }

    /// Open the buffer so writes are accepted.
    pub fn open(&self) {
        let mut state = self.state.lock().unwrap();
        state.open = true;
    }

    /// Close the buffer: no more writes are accepted, and every blocked
    /// read/write wakes. Bytes already buffered remain readable.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        if state.open {
            state.open = false;
            self.producer_cv.notify_all();
            self.consumer_cv.notify_all();
        }
    }

    /// Write as much of `content` as fits without blocking. Returns the
    /// number of bytes actually written; fewer than `content.len()` means
    /// the buffer is full (or closed, in which case it returns 0).
    pub fn write_non_blocking(&self, content: &[u8]) -> usize {
        let mut state = self.state.lock().unwrap();
        if !state.open {
            return 0;
        }
        let to_write = state.available_production().min(content.len());
        let mut source = content;
        state.write_locked(&mut source, to_write);
        self.consumer_cv.notify_one();
        to_write
    }

    /// Block until all of `content` has been written, or the buffer is
    /// closed first. Returns `false` if closed before the write completed.
    pub fn write_blocking(&self, content: &[u8]) -> bool {
        let mut state = self.state.lock().unwrap();
        let mut source = content;
        while state.open && !source.is_empty() {
            let to_write = state.available_production().min(source.len());
            if to_write == 0 {
                state = self.producer_cv.wait(state).unwrap();
            } else {
                state.write_locked(&mut source, to_write);
                self.consumer_cv.notify_one();
            }
        }
        state.open
    }

    /// Read as much as is available into `target` without blocking. Returns
    /// the number of bytes actually read; fewer than `target.len()` means
    /// the buffer is empty.
    pub fn read_non_blocking(&self, target: &mut [u8]) -> usize {
        let mut state = self.state.lock().unwrap();
        let to_read = state.available_consumption().min(target.len());
        let mut dest = target;
        state.read_locked(&mut dest, to_read);
        self.producer_cv.notify_one();
        to_read
    }

    /// Block until `target` is fully filled, or the buffer is closed and
    /// drained first. Returns `false` if the buffer was already closed and
    /// empty, or became so before filling `target`.
    pub fn read_blocking(&self, target: &mut [u8]) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.closed_for_consumer() {
            return target.is_empty();
        }
        let mut dest = target;
        while !dest.is_empty() && !state.closed_for_consumer() {
            let to_read = state.available_consumption().min(dest.len());
            if to_read == 0 {
                state = self.consumer_cv.wait(state).unwrap();
            } else {
                state.read_locked(&mut dest, to_read);
                self.producer_cv.notify_one();
            }
        }
        dest.is_empty()
    }

    /// Bytes currently stored in the buffer.
    pub fn used_size(&self) -> usize {
        self.state.lock().unwrap().available_consumption()
    }

    /// Bytes of free capacity remaining.
    pub fn available_size(&self) -> usize {
        self.state.lock().unwrap().available_production()
    }

    /// Whether the buffer currently accepts writes.
    pub fn is_open(&self) -> bool {
        self.state.lock().unwrap().open
    }

    /// Discard all buffered content, resetting to empty.
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.producer_position = 0;
        state.consumer_position = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn write_then_read_round_trips() {
        let rb = RingBuffer::new(16);
        rb.open();
        assert_eq!(rb.write_non_blocking(b"hello"), 5);
        let mut out = [0u8; 5];
        assert_eq!(rb.read_non_blocking(&mut out), 5);
        assert_eq!(&out, b"hello");
    }

    #[test]
    fn write_non_blocking_truncates_when_full() {
        let rb = RingBuffer::new(4);
        rb.open();
        assert_eq!(rb.write_non_blocking(b"abcdef"), 4);
        assert_eq!(rb.available_size(), 0);
    }

    #[test]
    fn wrap_around_preserves_order() {
        let rb = RingBuffer::new(4);
        rb.open();
        rb.write_non_blocking(b"ab");
        let mut out = [0u8; 2];
        rb.read_non_blocking(&mut out);
        assert_eq!(&out, b"ab");
        // producer/consumer positions are now at 2; next write wraps.
        assert_eq!(rb.write_non_blocking(b"cdef"), 4);
        let mut out2 = [0u8; 4];
        assert_eq!(rb.read_non_blocking(&mut out2), 4);
        assert_eq!(&out2, b"cdef");
    }

    #[test]
    fn read_blocking_drains_after_close() {
        let rb = RingBuffer::new(8);
        rb.open();
        rb.write_non_blocking(b"ab");
        rb.close();
        let mut out = [0u8; 2];
        assert!(rb.read_blocking(&mut out));
        assert_eq!(&out, b"ab");
        let mut out2 = [0u8; 1];
        assert!(!rb.read_blocking(&mut out2));
    }

    #[test]
    fn write_blocking_wakes_on_read_and_close_unblocks_waiters() {
        let rb = Arc::new(RingBuffer::new(2));
        rb.open();
        rb.write_non_blocking(b"xy");

        let rb2 = rb.clone();
        let handle = std::thread::spawn(move || rb2.write_blocking(b"zz"));
        std::thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());

        let mut out = [0u8; 2];
        rb.read_non_blocking(&mut out);
        assert!(handle.join().unwrap());

        let rb3 = rb.clone();
        let handle2 = std::thread::spawn(move || rb3.write_blocking(b"qq"));
        std::thread::sleep(Duration::from_millis(50));
        rb.close();
        assert!(!handle2.join().unwrap());
    }
}
