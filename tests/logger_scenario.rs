//! End-to-end log start/stop/start scenario (spec.md §8, scenario 1),
//! exercised through the public `Logger` API with scripted device doubles.

use cavs_debug_agent::compress_stream::testing::StubbedCompressedStream;
use cavs_debug_agent::compress_stream::CompressedStream;
use cavs_debug_agent::device::testing::{
    ExpectedCommand, ExpectedControlCall, ScriptedControlEndpoint, ScriptedMessageEndpoint,
};
use cavs_debug_agent::device::LOG_LEVEL_CONTROL;
use cavs_debug_agent::logger::{LogLevel, LogOutput, LogParameters, Logger};
use cavs_debug_agent::module_handler::{ModuleHandler, TunneledParamPredicate};
use cavs_debug_agent::AgentError;
use std::sync::Arc;

fn core_power_request(core_id: u8, allowed_to_sleep: bool) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut w = cavs_debug_agent::byte_stream::ByteStreamWriter::new(&mut buf);
    w.write_u32(1).unwrap(); // Set
    w.write_u16(0).unwrap();
    w.write_u16(0).unwrap();
    w.write_u32(11).unwrap();
    w.write_u32(2).unwrap();
    w.write_u8(core_id).unwrap();
    w.write_u8(allowed_to_sleep as u8).unwrap();
    buf
}

fn ack() -> Vec<u8> {
    let mut buf = Vec::new();
    let mut w = cavs_debug_agent::byte_stream::ByteStreamWriter::new(&mut buf);
    w.write_u32(0).unwrap();
    w.write_u32(0).unwrap();
    buf
}

#[test]
fn log_start_stop_start_lifecycle() -> anyhow::Result<()> {
    let control = ScriptedControlEndpoint::new(vec![
        ExpectedControlCall::Read {
            name: LOG_LEVEL_CONTROL.to_string(),
            value: (LogLevel::Quiet as u32).to_le_bytes().to_vec(),
        },
        ExpectedControlCall::Write {
            name: LOG_LEVEL_CONTROL.to_string(),
            data: (LogLevel::Verbose as u32).to_le_bytes().to_vec(),
        },
    ]);
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

    // Not started: level read reflects the current control value.
    let params = logger.get_parameters()?;
    assert!(!params.started);
    assert_eq!(params.level, LogLevel::Quiet);

    // Start: writes the requested level, double-powers core 0, opens the
    // device, and starts the producer.
    let device = Arc::new(StubbedCompressedStream::new()) as Arc<dyn CompressedStream>;
    logger.set_parameters(
        LogParameters {
            started: true,
            level: LogLevel::Verbose,
            output: LogOutput::Sram,
        },
        [(0u8, device)],
    )?;

    // A second start while already started is rejected.
    let err = logger
        .set_parameters(
            LogParameters {
                started: true,
                level: LogLevel::Verbose,
                output: LogOutput::Sram,
            },
            std::iter::empty(),
        )
        .unwrap_err();
    assert!(matches!(err, AgentError::ParameterLocked));

    // Stop: tears the producer down, closes the queue.
    logger.set_parameters(
        LogParameters {
            started: false,
            level: LogLevel::Verbose,
            output: LogOutput::Sram,
        },
        std::iter::empty(),
    )?;

    // Queue is drained and closed: read_log_block returns None.
    assert_eq!(logger.read_log_block(), None);
    assert!(message.is_exhausted());
    Ok(())
}
