//! Device endpoint abstractions: the message endpoint used by
//! [`crate::module_handler`] and the named control endpoint used by
//! [`crate::logger`] and [`crate::probe`].
//!
//! Grounded on `cAVS::Linux::ControlDeviceTypes.hpp` and the
//! `MockedControlDevice`/scripted-queue test-double pattern from the same
//! tree: production code only ever depends on these two traits, never on a
//! concrete kernel handle.

use crate::{AgentError, Buffer, Result};

/// Name of the scalar control carrying the firmware log priority.
pub const LOG_LEVEL_CONTROL: &str = "DSP Log Level";

/// Name of the struct control for extraction probe slot `n` (`0..8`).
pub fn probe_extractor_control(n: usize) -> String {
    format!("Probe probe 0 Extractor {n} params")
}

/// Name of the struct control for injection probe slot `n` (`0..8`).
pub fn probe_injector_control(n: usize) -> String {
    format!("Probe probe 0 Injector {n} params")
}

/// A single request/response round-trip over the firmware's binary IPC
/// channel. All ModuleHandler operations funnel through one instance of
/// this, shared and internally serialized.
pub trait MessageEndpoint: Send + Sync {
    /// Write `request`, then read back a reply of at most `max_reply_len`
    /// bytes. Returns the reply, truncated to however many bytes the
    /// device actually returned.
    fn command(&self, request: &[u8], max_reply_len: usize) -> Result<Buffer>;
}

/// Named scalar/struct control access, serialized internally.
pub trait ControlEndpoint: Send + Sync {
    /// Read the current value of control `name` into `out`, which must be
    /// exactly the control's known size.
    fn ctl_read(&self, name: &str, out: &mut [u8]) -> Result<()>;

    /// Write `data` as the new value of control `name`.
    fn ctl_write(&self, name: &str, data: &[u8]) -> Result<()>;
}

/// Test-double infrastructure: scripted endpoints that assert the
/// production code issues exactly the commands expected, in order.
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    /// One expected `MessageEndpoint::command` call.
    pub struct ExpectedCommand {
        /// The exact request bytes expected.
        pub request: Buffer,
        /// The maximum reply length the caller is expected to pass.
        pub max_reply_len: usize,
        /// The reply to hand back if the request matches.
        pub reply: Result<Buffer>,
    }

    /// A [`MessageEndpoint`] that replays a fixed script, failing loudly on
    /// divergence. Grounded on `MockedControlDevice`'s scripted-queue
    /// pattern.
    pub struct ScriptedMessageEndpoint {
        script: Mutex<std::collections::VecDeque<ExpectedCommand>>,
    }

    impl ScriptedMessageEndpoint {
        /// Build an endpoint that expects exactly `script`, in order.
        pub fn new(script: Vec<ExpectedCommand>) -> Self {
            Self {
                script: Mutex::new(script.into()),
            }
        }

        /// `true` once every scripted command has been consumed.
        pub fn is_exhausted(&self) -> bool {
            self.script.lock().unwrap().is_empty()
        }
    }

    impl MessageEndpoint for ScriptedMessageEndpoint {
        fn command(&self, request: &[u8], max_reply_len: usize) -> Result<Buffer> {
            let mut script = self.script.lock().unwrap();
            let expected = script.pop_front().ok_or_else(|| {
                AgentError::DecodeInvalid("unexpected message endpoint command: script exhausted".into())
            })?;
            if expected.request != request || expected.max_reply_len != max_reply_len {
                return Err(AgentError::DecodeInvalid(format!(
                    "unexpected message endpoint command: got {request:?} (max_reply_len {max_reply_len}), expected {:?} (max_reply_len {})",
                    expected.request, expected.max_reply_len
                )));
            }
            expected.reply
        }
    }

    /// One expected [`ControlEndpoint`] call.
    pub enum ExpectedControlCall {
        /// A `ctl_read(name, _)` is expected; `value` is returned to the
        /// caller.
        Read {
            /// Expected control name.
            name: String,
            /// Value handed back to the caller.
            value: Buffer,
        },
        /// A `ctl_write(name, data)` is expected; `data` must match.
        Write {
            /// Expected control name.
            name: String,
            /// Expected written value.
            data: Buffer,
        },
    }

    /// A [`ControlEndpoint`] that replays a fixed script of reads/writes.
    pub struct ScriptedControlEndpoint {
        script: Mutex<std::collections::VecDeque<ExpectedControlCall>>,
    }

    impl ScriptedControlEndpoint {
        /// Build an endpoint that expects exactly `script`, in order.
        pub fn new(script: Vec<ExpectedControlCall>) -> Self {
            Self {
                script: Mutex::new(script.into()),
            }
        }

        /// `true` once every scripted call has been consumed.
        pub fn is_exhausted(&self) -> bool {
            self.script.lock().unwrap().is_empty()
        }
    }

    impl ControlEndpoint for ScriptedControlEndpoint {
        fn ctl_read(&self, name: &str, out: &mut [u8]) -> Result<()> {
            let mut script = self.script.lock().unwrap();
            match script.pop_front() {
                Some(ExpectedControlCall::Read { name: expected, value }) if expected == name => {
                    if value.len() != out.len() {
                        return Err(AgentError::DecodeInvalid(format!(
                            "control {name}: scripted value length {} does not match requested {}",
                            value.len(),
                            out.len()
                        )));
                    }
                    out.copy_from_slice(&value);
                    Ok(())
                }
                other => Err(AgentError::DecodeInvalid(format!(
                    "unexpected ctl_read({name}): script had {other:?}"
                ))),
            }
        }

        fn ctl_write(&self, name: &str, data: &[u8]) -> Result<()> {
            let mut script = self.script.lock().unwrap();
            match script.pop_front() {
                Some(ExpectedControlCall::Write { name: expected, data: expected_data })
                    if expected == name && expected_data == data =>
                {
                    Ok(())
                }
                other => Err(AgentError::DecodeInvalid(format!(
                    "unexpected ctl_write({name}, {data:?}): script had {other:?}"
                ))),
            }
        }
    }

    impl std::fmt::Debug for ExpectedControlCall {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                ExpectedControlCall::Read { name, value } => {
                    write!(f, "Read{{name: {name}, value: {value:?}}}")
                }
                ExpectedControlCall::Write { name, data } => {
                    write!(f, "Write{{name: {name}, data: {data:?}}}")
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn scripted_message_endpoint_matches_exact_request() {
        let ep = ScriptedMessageEndpoint::new(vec![ExpectedCommand {
            request: vec![1, 2, 3],
            max_reply_len: 4,
            reply: Ok(vec![9, 9]),
        }]);
        assert_eq!(ep.command(&[1, 2, 3], 4).unwrap(), vec![9, 9]);
        assert!(ep.is_exhausted());
    }

    #[test]
    fn scripted_message_endpoint_rejects_divergent_request() {
        let ep = ScriptedMessageEndpoint::new(vec![ExpectedCommand {
            request: vec![1],
            max_reply_len: 1,
            reply: Ok(vec![]),
        }]);
        assert!(ep.command(&[2], 1).is_err());
    }

    #[test]
    fn scripted_control_endpoint_round_trips_read_and_write() {
        let ep = ScriptedControlEndpoint::new(vec![
            ExpectedControlCall::Read {
                name: LOG_LEVEL_CONTROL.to_string(),
                value: vec![3, 0, 0, 0],
            },
            ExpectedControlCall::Write {
                name: LOG_LEVEL_CONTROL.to_string(),
                data: vec![5, 0, 0, 0],
            },
        ]);
        let mut out = [0u8; 4];
        ep.ctl_read(LOG_LEVEL_CONTROL, &mut out).unwrap();
        assert_eq!(out, [3, 0, 0, 0]);
        ep.ctl_write(LOG_LEVEL_CONTROL, &[5, 0, 0, 0]).unwrap();
        assert!(ep.is_exhausted());
    }
}
