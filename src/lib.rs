#![warn(missing_docs)]
/*! Device-IPC and streaming substrate for a cAVS-class audio DSP debug agent.

This crate bridges an external client (HTTP/XML layer, not implemented
here) to a kernel audio driver through three device endpoint kinds: a
message endpoint for binary IPC request/response, a control endpoint for
named scalar/struct controls, and a set of compressed-stream endpoints for
PCM/compressed data (one per DSP core for firmware logs, one per probe
point for audio capture/inject).

# Architecture overview

```text
HTTP ── ModuleHandler ──► Device (message ep) ──► firmware
HTTP ── Logger.params ──► ControlEndpoint (log level)
firmware ──► CompressedStream[core] ──► Logger producer ──► BlockingQueue<LogBlock> ──► HTTP stream
HTTP ──► ControlEndpoint (probe slots)            ──► firmware
HTTP (extract GET) ◄── BlockingQueue<Buffer>[i] ◄── ProbeExtractor ◄── CompressedStream(extract)
HTTP (inject PUT) ──► RingBuffer[i] ──► ProbeInjector ──► CompressedStream(inject[i])
```

The HTTP server, URL routing, XML parameter framework, procfs device
enumeration and the top-level CLI process are external collaborators; this
crate only names their contracts where it consumes them.
*/

pub mod blocking_queue;
pub mod byte_stream;
pub mod compress_stream;
pub mod device;
pub mod ids;
pub mod logger;
pub mod module_handler;
pub mod packet;
pub mod probe;
pub mod ring_buffer;
pub mod sync_wait;
pub mod tlv;

/// Octet buffer used throughout the crate. A buffer has no shared ownership;
/// it is moved or cloned by value.
pub type Buffer = Vec<u8>;

/// Result alias for fallible operations in this crate.
pub type Result<T> = std::result::Result<T, AgentError>;

/// The single sum-typed error for this crate.
///
/// Some components expose their own narrower error type where that reads
/// more naturally (`tlv::TlvError`, `packet::PacketDecodeError`, ...); those
/// convert into one of the variants below rather than wrapping themselves
/// transparently, so callers can match on error *kind* regardless of which
/// component raised it.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// I/O failure at a device endpoint, a stream close, or a broken pipe.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stream reader hit end-of-stream in the middle of a record.
    #[error("end of stream reached while decoding")]
    DecodeEos,

    /// A decode failed for a reason other than truncation: bad sync word,
    /// bad checksum, bad enum value, bit-field overflow.
    #[error("decode error: {0}")]
    DecodeInvalid(String),

    /// A `ProbePointId` in an extracted packet has no known probe index.
    #[error("unknown probe point: {0:?}")]
    ProbeUnknownPoint(crate::ids::ProbePointId),

    /// A probe index resolved outside the valid `[0, ProbeCount)` range.
    #[error("probe index {0} out of range")]
    ProbeWrongId(u32),

    /// Non-success `driver_status` field in a message-endpoint reply.
    #[error("driver status error: {0}")]
    DriverStatus(u32),

    /// Non-success `fw_status` field in a message-endpoint reply.
    #[error("firmware status error: {0}")]
    FirmwareStatus(u32),

    /// A state machine transition was attempted from a state that forbids it.
    #[error("invalid state transition: {0}")]
    StateInvalid(String),

    /// A logger parameter change was attempted while logging was active.
    #[error("cannot change parameters while logging is activated")]
    ParameterLocked,

}
