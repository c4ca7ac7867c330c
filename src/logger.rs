//! Firmware log control and per-core producer pipeline (C9).
//!
//! Grounded on `cavs::linux::Logger`/`Logger::LogProducer`
//! (`Linux/Logger.hpp`): one producer task per active DSP core, each
//! driving a `Capture`/`NonBlocking` compressed stream into one shared
//! [`BlockingQueue`], merged in per-core FIFO order.

use crate::blocking_queue::BlockingQueue;
use crate::compress_stream::{CompressedStream, CompressedStreamConfig, Role, StreamMode, WAIT_FOREVER};
use crate::device::ControlEndpoint;
use crate::ids::CoreId;
use crate::module_handler::ModuleHandler;
use crate::packet::LogBlock;
use crate::{AgentError, Result};
use std::sync::Arc;

const FRAGMENT_SIZE: usize = 2048;
const NB_FRAGMENTS: usize = 16;
/// `fragments * fragment_size * 320`, ≈10 MiB.
const QUEUE_MAX_BYTES: usize = NB_FRAGMENTS * FRAGMENT_SIZE * 320;

/// Firmware log verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum LogLevel {
    /// No logs.
    Quiet = 0,
    /// Critical errors only.
    Critical = 1,
    /// High-priority events.
    High = 2,
    /// Medium-priority events.
    Medium = 3,
    /// Low-priority events.
    Low = 4,
    /// Everything, including trace-level detail.
    Verbose = 5,
}

impl LogLevel {
    fn from_u32(v: u32) -> Result<Self> {
        match v {
            0 => Ok(LogLevel::Quiet),
            1 => Ok(LogLevel::Critical),
            2 => Ok(LogLevel::High),
            3 => Ok(LogLevel::Medium),
            4 => Ok(LogLevel::Low),
            5 => Ok(LogLevel::Verbose),
            other => Err(AgentError::DecodeInvalid(format!("invalid log level {other}"))),
        }
    }
}

/// Where log output is currently routed. Informational only at this layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    /// Firmware-internal SRAM ring (the only transport this crate drives).
    Sram,
}

/// Desired/observed logger configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogParameters {
    /// Whether log production is (or should be) running.
    pub started: bool,
    /// Firmware log verbosity.
    pub level: LogLevel,
    /// Output routing (informational).
    pub output: LogOutput,
}

impl Default for LogParameters {
    fn default() -> Self {
        Self {
            started: false,
            level: LogLevel::Quiet,
            output: LogOutput::Sram,
        }
    }
}

struct Producer {
    core_id: CoreId,
    device: Arc<dyn CompressedStream>,
    handle: Option<std::thread::JoinHandle<()>>,
}

/// See module docs. Owns the merged log queue and the set of active
/// per-core producer tasks.
pub struct Logger<'a> {
    control: &'a dyn ControlEndpoint,
    module_handler: ModuleHandler<'a>,
    queue: Arc<BlockingQueue<LogBlock>>,
    producers: Vec<Producer>,
}

impl<'a> Logger<'a> {
    /// Build a logger over the given control endpoint and module handler.
    pub fn new(control: &'a dyn ControlEndpoint, module_handler: ModuleHandler<'a>) -> Self {
        Self {
            control,
            module_handler,
            queue: Arc::new(BlockingQueue::new(QUEUE_MAX_BYTES, LogBlock::wire_size)),
            producers: Vec::new(),
        }
    }

    fn read_level(&self) -> Result<LogLevel> {
        let mut buf = [0u8; 4];
        self.control.ctl_read(crate::device::LOG_LEVEL_CONTROL, &mut buf)?;
        LogLevel::from_u32(u32::from_le_bytes(buf))
    }

    fn write_level(&self, level: LogLevel) -> Result<()> {
        self.control
            .ctl_write(crate::device::LOG_LEVEL_CONTROL, &(level as u32).to_le_bytes())
    }

    /// `get_parameters`.
    pub fn get_parameters(&self) -> Result<LogParameters> {
        Ok(LogParameters {
            started: !self.producers.is_empty(),
            level: self.read_level()?,
            output: LogOutput::Sram,
        })
    }

    /// `set_parameters`. Starts or stops the per-core producer pipeline;
    /// refuses to change anything but `started: true → false` while
    /// already started.
    pub fn set_parameters(
        &mut self,
        parameters: LogParameters,
        core_devices: impl IntoIterator<Item = (CoreId, Arc<dyn CompressedStream>)>,
    ) -> Result<()> {
        let currently_started = !self.producers.is_empty();
        if currently_started && parameters.started {
            return Err(AgentError::ParameterLocked);
        }

        if !currently_started && parameters.started {
            self.write_level(parameters.level)?;
            self.queue.clear();
            self.queue.open();
            match self.start_producers(core_devices) {
                Ok(()) => Ok(()),
                Err(e) => {
                    self.stop_producers();
                    self.queue.close();
                    Err(e)
                }
            }
        } else if currently_started && !parameters.started {
            self.stop_producers();
            self.queue.close();
            Ok(())
        } else {
            self.write_level(parameters.level)
        }
    }

    fn start_producers(
        &mut self,
        core_devices: impl IntoIterator<Item = (CoreId, Arc<dyn CompressedStream>)>,
    ) -> Result<()> {
        for (core_id, device) in core_devices {
            // The driver cannot wake cores other than 0 individually, so
            // the power-up request is issued twice around core 0's log
            // start, matching the kernel driver's documented quirk.
            self.module_handler.set_core_power(core_id, false)?;
            if core_id == 0 {
                self.module_handler.set_core_power(core_id, false)?;
            }

            let open_result = device.open(
                StreamMode::NonBlocking,
                Role::Capture,
                CompressedStreamConfig {
                    fragment_size: FRAGMENT_SIZE,
                    fragments: NB_FRAGMENTS,
                    codec: 0,
                },
            );
            if let Err(e) = open_result.and_then(|()| device.start()) {
                let _ = self.module_handler.set_core_power(core_id, true);
                return Err(e);
            }

            let queue = self.queue.clone();
            let producer_device = device.clone();
            let handle = std::thread::Builder::new()
                .name(format!("log-producer-core{core_id}"))
                .spawn(move || produce_entries(core_id, producer_device, queue))
                .expect("failed to spawn log producer thread");

            self.producers.push(Producer {
                core_id,
                device,
                handle: Some(handle),
            });
        }
        Ok(())
    }

    fn stop_producers(&mut self) {
        for producer in &self.producers {
            let _ = producer.device.stop();
        }
        for producer in &mut self.producers {
            if let Some(handle) = producer.handle.take() {
                let _ = handle.join();
            }
            let _ = producer.device.close();
            let _ = self.module_handler.set_core_power(producer.core_id, true);
            if producer.core_id == 0 {
                let _ = self.module_handler.set_core_power(producer.core_id, true);
            }
        }
        self.producers.clear();
    }

    /// `read_log_block`: blocks until a block is available, or returns
    /// `None` once logging has stopped and the queue is drained.
    pub fn read_log_block(&self) -> Option<LogBlock> {
        self.queue.remove()
    }
}

fn produce_entries(core_id: CoreId, device: Arc<dyn CompressedStream>, queue: Arc<BlockingQueue<LogBlock>>) {
    loop {
        let wait_result = device.wait(WAIT_FOREVER);
        if wait_result.is_err() {
            log::debug!("log producer for core {core_id}: device stopped, exiting");
            return;
        }
        let mut buf = vec![0u8; FRAGMENT_SIZE];
        let read = match device.read(&mut buf) {
            Ok(n) => n,
            Err(e) => {
                log::error!("log producer for core {core_id}: read failed: {e}");
                return;
            }
        };
        buf.truncate(read);
        if read == 0 {
            continue;
        }
        let block = match LogBlock::new(core_id, buf) {
            Ok(b) => b,
            Err(e) => {
                log::error!("log producer for core {core_id}: invalid log block: {e}");
                return;
            }
        };
        if !queue.add(block) {
            log::warn!("log producer for core {core_id}: queue full or closed, dropping log block");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress_stream::testing::StubbedCompressedStream;
    use crate::device::testing::{ExpectedCommand, ExpectedControlCall, ScriptedControlEndpoint, ScriptedMessageEndpoint};
    use crate::module_handler::{ModuleHandler, TunneledParamPredicate};
    use std::io::Write as _;

    fn core_power_request(core_id: CoreId, allowed_to_sleep: bool) -> crate::Buffer {
        let mut payload = Vec::new();
        payload.write_all(&[core_id, allowed_to_sleep as u8]).unwrap();
        let mut buf = Vec::new();
        let mut w = crate::byte_stream::ByteStreamWriter::new(&mut buf);
        w.write_u32(1).unwrap(); // Set
        w.write_u16(0).unwrap();
        w.write_u16(0).unwrap();
        w.write_u32(11).unwrap();
        w.write_u32(payload.len() as u32).unwrap();
        w.write_bytes(&payload).unwrap();
        buf
    }

    fn ack() -> crate::Buffer {
        let mut buf = Vec::new();
        let mut w = crate::byte_stream::ByteStreamWriter::new(&mut buf);
        w.write_u32(0).unwrap();
        w.write_u32(0).unwrap();
        buf
    }

    #[test]
    fn get_parameters_reports_not_started_before_any_start() {
        let control = ScriptedControlEndpoint::new(vec![ExpectedControlCall::Read {
            name: crate::device::LOG_LEVEL_CONTROL.to_string(),
            value: (LogLevel::Critical as u32).to_le_bytes().to_vec(),
        }]);
        let message = ScriptedMessageEndpoint::new(vec![]);
        let handler = ModuleHandler::new(&message, TunneledParamPredicate::new());
        let logger = Logger::new(&control, handler);
        let params = logger.get_parameters().unwrap();
        assert!(!params.started);
        assert_eq!(params.level, LogLevel::Critical);
    }

    #[test]
    fn start_stop_drains_queue_and_locks_parameters_while_running() {
        let control = ScriptedControlEndpoint::new(vec![ExpectedControlCall::Write {
            name: crate::device::LOG_LEVEL_CONTROL.to_string(),
            data: (LogLevel::Verbose as u32).to_le_bytes().to_vec(),
        }]);
        let message = ScriptedMessageEndpoint::new(vec![
            ExpectedCommand {
                request: core_power_request(0, false),
                max_reply_len: 8,
                reply: Ok(ack()),
            },
            ExpectedCommand {
                request: core_power_request(0, false),
                max_reply_len: 8,
                reply: Ok(ack()),
            },
            ExpectedCommand {
                request: core_power_request(0, true),
                max_reply_len: 8,
                reply: Ok(ack()),
            },
            ExpectedCommand {
                request: core_power_request(0, true),
                max_reply_len: 8,
                reply: Ok(ack()),
            },
        ]);
        let handler = ModuleHandler::new(&message, TunneledParamPredicate::new());
        let mut logger = Logger::new(&control, handler);

        let stream = Arc::new(StubbedCompressedStream::new()) as Arc<dyn CompressedStream>;
        logger
            .set_parameters(
                LogParameters {
                    started: true,
                    level: LogLevel::Verbose,
                    output: LogOutput::Sram,
                },
                [(0u8, stream)],
            )
            .unwrap();

        let err = logger
            .set_parameters(
                LogParameters {
                    started: true,
                    level: LogLevel::Verbose,
                    output: LogOutput::Sram,
                },
                std::iter::empty::<(CoreId, Arc<dyn CompressedStream>)>(),
            )
            .unwrap_err();
        assert!(matches!(err, AgentError::ParameterLocked));

        logger
            .set_parameters(
                LogParameters {
                    started: false,
                    level: LogLevel::Verbose,
                    output: LogOutput::Sram,
                },
                std::iter::empty::<(CoreId, Arc<dyn CompressedStream>)>(),
            )
            .unwrap();

        assert_eq!(logger.read_log_block(), None);
        assert!(message.is_exhausted());
    }
}
