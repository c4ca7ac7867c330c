//! Compressed-stream endpoint: the per-core log capture devices and
//! per-probe capture/playback devices all speak this one contract.
//!
//! Grounded on `cAVS::Linux::compress::Config`/`DeviceInfo`
//! (`Linux/CompressTypes.hpp`): a stream is opened with a fragment/period
//! configuration and a role, then driven through wait/read/write.

use crate::{AgentError, Buffer, Result};

/// Blocking policy for a stream's `wait()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// `wait()` may return `false` on an implementation-defined timeout.
    Blocking,
    /// `wait()` only ever returns due to data readiness or `stop()`.
    NonBlocking,
}

/// Direction of data flow for a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Device produces data (firmware logs, probe extraction).
    Capture,
    /// Device consumes data (probe injection).
    Playback,
}

/// Fragment/period configuration, mirroring `compress::Config`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressedStreamConfig {
    /// Size in bytes of one fragment (period).
    pub fragment_size: usize,
    /// Number of fragments the device buffers.
    pub fragments: usize,
    /// Opaque codec identifier; currently always PCM.
    pub codec: u32,
}

impl CompressedStreamConfig {
    /// Total device buffer size: `fragment_size * fragments`.
    pub fn buffer_size(&self) -> usize {
        self.fragment_size * self.fragments
    }
}

/// Sentinel passed to [`CompressedStream::wait`] meaning "block until data
/// is ready or `stop()` is called, with no timeout."
pub const WAIT_FOREVER: i64 = -1;

/// A streaming device endpoint: one capture device per logging core or
/// extraction probe, one playback device per injection probe.
///
/// A real implementation wraps a kernel compress device; [`testing`]
/// provides a state-machine-only stand-in for tests.
pub trait CompressedStream: Send + Sync {
    /// Acquire the device in the given mode/role with the given fragment
    /// configuration. Must be called before any other operation.
    fn open(&self, mode: StreamMode, role: Role, config: CompressedStreamConfig) -> Result<()>;

    /// Start streaming. No-op if already started.
    fn start(&self) -> Result<()>;

    /// Stop streaming. Any concurrent `wait()` must return `Err(Io)`
    /// promptly. No-op if already stopped.
    fn stop(&self) -> Result<()>;

    /// Release the device. Must be called only once stopped.
    fn close(&self) -> Result<()>;

    /// Block until data space is ready, `timeout_ms` milliseconds elapse
    /// (returning `Ok(false)`), or `stop()` is called concurrently
    /// (returning `Err(Io)`). `timeout_ms == WAIT_FOREVER` waits without a
    /// timeout.
    fn wait(&self, timeout_ms: i64) -> Result<bool>;

    /// Read up to `out.len()` bytes (capture role). Returns bytes read.
    fn read(&self, out: &mut [u8]) -> Result<usize>;

    /// Write up to `data.len()` bytes (playback role). Returns bytes
    /// written.
    fn write(&self, data: &[u8]) -> Result<usize>;

    /// Bytes of data (capture) or free space (playback) currently ready.
    fn get_available(&self) -> Result<usize>;

    /// Total device buffer size in bytes.
    fn get_buffer_size(&self) -> Result<usize>;

    /// Whether `open()` has succeeded and `close()` has not yet run.
    fn is_open(&self) -> bool;

    /// Whether `start()` has succeeded and `stop()` has not yet run.
    fn is_running(&self) -> bool;
}

/// Adapts a capture-role [`CompressedStream`] to [`std::io::Read`], so the
/// C1 byte-stream codec can decode directly off the device: each `read`
/// waits for data, then drains it. A `stop()`-triggered wait error is
/// reported as a clean `Ok(0)` (end of stream) rather than an I/O error, so
/// [`crate::probe`]'s extractor sees a normal end-of-stream on shutdown
/// instead of a decode failure.
pub struct StreamReader {
    stream: std::sync::Arc<dyn CompressedStream>,
}

impl StreamReader {
    /// Wrap a capture device for byte-stream decoding.
    pub fn new(stream: std::sync::Arc<dyn CompressedStream>) -> Self {
        Self { stream }
    }
}

impl std::io::Read for StreamReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.stream.wait(WAIT_FOREVER).is_err() {
            return Ok(0);
        }
        self.stream
            .read(buf)
            .map_err(|e| std::io::Error::other(e.to_string()))
    }
}

/// State-machine-only [`CompressedStream`] double: models open/start/stop
/// transitions and a fixed-size in-memory ring without touching any real
/// device, for use in tests.
pub mod testing {
    use super::*;
    use crate::sync_wait::SyncWait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// See module docs.
    pub struct StubbedCompressedStream {
        open: Mutex<bool>,
        running: Mutex<bool>,
        config: Mutex<Option<CompressedStreamConfig>>,
        role: Mutex<Option<Role>>,
        /// Bytes available to read (capture) queued by the test; consumed
        /// by `read`.
        capture_data: Mutex<VecDeque<u8>>,
        /// Bytes handed to `write` (playback), recorded for assertions.
        pub written: Mutex<Buffer>,
        cancel: SyncWait,
    }

    impl Default for StubbedCompressedStream {
        fn default() -> Self {
            Self::new()
        }
    }

    impl StubbedCompressedStream {
        /// A fresh, closed stream.
        pub fn new() -> Self {
            Self {
                open: Mutex::new(false),
                running: Mutex::new(false),
                config: Mutex::new(None),
                role: Mutex::new(None),
                capture_data: Mutex::new(VecDeque::new()),
                written: Mutex::new(Vec::new()),
                cancel: SyncWait::new(),
            }
        }

        /// Queue bytes a subsequent `read()` will return (capture role).
        pub fn push_capture_data(&self, data: &[u8]) {
            self.capture_data.lock().unwrap().extend(data.iter().copied());
        }
    }

    impl CompressedStream for StubbedCompressedStream {
        fn open(&self, _mode: StreamMode, role: Role, config: CompressedStreamConfig) -> Result<()> {
            *self.open.lock().unwrap() = true;
            *self.config.lock().unwrap() = Some(config);
            *self.role.lock().unwrap() = Some(role);
            Ok(())
        }

        fn start(&self) -> Result<()> {
            *self.running.lock().unwrap() = true;
            Ok(())
        }

        fn stop(&self) -> Result<()> {
            *self.running.lock().unwrap() = false;
            self.cancel.unblock_wait();
            Ok(())
        }

        fn close(&self) -> Result<()> {
            *self.open.lock().unwrap() = false;
            Ok(())
        }

        fn wait(&self, _timeout_ms: i64) -> Result<bool> {
            if !*self.running.lock().unwrap() {
                return Err(AgentError::Io(std::io::Error::other(
                    "wait() on a stopped stream",
                )));
            }
            let data_ready = matches!(*self.role.lock().unwrap(), Some(Role::Capture))
                && !self.capture_data.lock().unwrap().is_empty();
            if !data_ready {
                self.cancel.wait_until_unblock();
                if !*self.running.lock().unwrap() {
                    return Err(AgentError::Io(std::io::Error::other("stream stopped")));
                }
            }
            Ok(true)
        }

        fn read(&self, out: &mut [u8]) -> Result<usize> {
            let mut data = self.capture_data.lock().unwrap();
            let n = data.len().min(out.len());
            for slot in out.iter_mut().take(n) {
                *slot = data.pop_front().unwrap();
            }
            Ok(n)
        }

        fn write(&self, data: &[u8]) -> Result<usize> {
            self.written.lock().unwrap().extend_from_slice(data);
            Ok(data.len())
        }

        fn get_available(&self) -> Result<usize> {
            match *self.role.lock().unwrap() {
                Some(Role::Capture) => Ok(self.capture_data.lock().unwrap().len()),
                _ => Ok(self
                    .config
                    .lock()
                    .unwrap()
                    .map(|c| c.buffer_size())
                    .unwrap_or(0)),
            }
        }

        fn get_buffer_size(&self) -> Result<usize> {
            Ok(self
                .config
                .lock()
                .unwrap()
                .map(|c| c.buffer_size())
                .unwrap_or(0))
        }

        fn is_open(&self) -> bool {
            *self.open.lock().unwrap()
        }

        fn is_running(&self) -> bool {
            *self.running.lock().unwrap()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::StubbedCompressedStream;
    use super::*;

    fn config() -> CompressedStreamConfig {
        CompressedStreamConfig {
            fragment_size: 2048,
            fragments: 16,
            codec: 0,
        }
    }

    #[test]
    fn open_start_stop_close_transitions() {
        let stream = StubbedCompressedStream::new();
        assert!(!stream.is_open());
        stream.open(StreamMode::NonBlocking, Role::Capture, config()).unwrap();
        assert!(stream.is_open());
        stream.start().unwrap();
        assert!(stream.is_running());
        stream.stop().unwrap();
        assert!(!stream.is_running());
        stream.close().unwrap();
        assert!(!stream.is_open());
    }

    #[test]
    fn stop_unblocks_concurrent_wait_with_io_error() {
        use std::sync::Arc;
        let stream = Arc::new(StubbedCompressedStream::new());
        stream.open(StreamMode::Blocking, Role::Capture, config()).unwrap();
        stream.start().unwrap();

        let waiter = stream.clone();
        let handle = std::thread::spawn(move || waiter.wait(WAIT_FOREVER));
        std::thread::sleep(std::time::Duration::from_millis(50));
        stream.stop().unwrap();
        assert!(matches!(handle.join().unwrap(), Err(AgentError::Io(_))));
    }

    #[test]
    fn read_drains_queued_capture_data() {
        let stream = StubbedCompressedStream::new();
        stream.open(StreamMode::NonBlocking, Role::Capture, config()).unwrap();
        stream.push_capture_data(b"abc");
        let mut out = [0u8; 2];
        assert_eq!(stream.read(&mut out).unwrap(), 2);
        assert_eq!(&out, b"ab");
    }
}
