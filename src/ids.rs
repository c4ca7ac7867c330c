//! Fingerprinted identifiers used across the device-IPC and streaming
//! substrate: module, parameter, core, pipeline/gateway/task ids, and the
//! bit-packed probe point id.

use crate::byte_stream::{ByteStreamReader, ByteStreamWriter, FromStream, ToStream};
use crate::{AgentError, Result};
use std::io::{Read, Write};

/// A firmware module type id plus instance id, packed on the wire as a
/// 32-bit `compound_id` (`type_id << 16 | instance_id`... see
/// [`ModuleId::compound_id`] for the exact layout).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ModuleId {
    /// 16-bit module type id.
    pub type_id: u16,
    /// 16-bit module instance id.
    pub instance_id: u16,
}

impl ModuleId {
    /// Build from a type id and instance id.
    pub fn new(type_id: u16, instance_id: u16) -> Self {
        Self { type_id, instance_id }
    }

    /// Pack into the wire's 32-bit compound id: high 16 bits type, low 16
    /// bits instance.
    pub fn compound_id(&self) -> u32 {
        (u32::from(self.type_id) << 16) | u32::from(self.instance_id)
    }
}

/// A 32-bit firmware parameter selector.
///
/// An "extended" parameter id encodes a secondary selector (e.g. pipeline
/// id, core id) in its high 24 bits and the base parameter id in the low 8
/// bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ParameterId(pub u32);

impl ParameterId {
    /// Build a plain (non-extended) parameter id.
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Build an extended parameter id: `selector` in the high 24 bits,
    /// `base_param_id` in the low 8 bits.
    pub fn extended(selector: u32, base_param_id: u8) -> Self {
        Self((selector << 8) | u32::from(base_param_id))
    }

    /// The raw wire value, `large_param_id` in the request envelope.
    pub fn raw(&self) -> u32 {
        self.0
    }
}

/// Small unsigned core identifier. `0..15` on the wire.
pub type CoreId = u8;

/// The maximum valid [`CoreId`] value (4-bit field in [`crate::packet::LogBlock`]).
pub const MAX_CORE_ID: CoreId = 15;

/// Opaque pipeline identifier.
pub type PipelineId = u32;
/// Opaque gateway identifier.
pub type GatewayId = u32;
/// Opaque scheduler task identifier.
pub type TaskId = u32;

/// Number of `ProbeConfig` slots the system maintains at all times.
pub const PROBE_COUNT: usize = 8;

/// Whether a probe point taps an input pin, output pin, or an internal
/// point of a module instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[repr(u32)]
pub enum ProbeType {
    /// Input pin.
    Input = 0,
    /// Output pin.
    Output = 1,
    /// Internal tap point.
    Internal = 2,
}

impl ProbeType {
    fn from_u32(v: u32) -> Result<Self> {
        match v {
            0 => Ok(ProbeType::Input),
            1 => Ok(ProbeType::Output),
            2 => Ok(ProbeType::Internal),
            other => Err(AgentError::DecodeInvalid(format!(
                "invalid probe type {other}"
            ))),
        }
    }
}

/// Whether a probe injects samples, extracts them, or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ProbePurpose {
    /// Inject samples into the pipeline.
    Inject,
    /// Extract samples from the pipeline.
    Extract,
    /// Inject, then re-extract the result.
    InjectReextract,
}

const MODULE_ID_BITS: u32 = 16;
const INSTANCE_ID_BITS: u32 = 8;
const TYPE_BITS: u32 = 2;
const INDEX_BITS: u32 = 6;

/// A probe point identified by `(module, instance, pin-type, pin-index)`,
/// bit-packed little-endian into 4 octets:
/// `moduleId:16 | instanceId:8 | type:2 | index:6`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ProbePointId {
    module_id: u32,
    instance_id: u32,
    probe_type: ProbeType,
    index: u32,
}

impl ProbePointId {
    /// Construct a probe point id, rejecting any field whose value exceeds
    /// its bit width.
    pub fn new(module_id: u32, instance_id: u32, probe_type: ProbeType, index: u32) -> Result<Self> {
        if module_id >= (1 << MODULE_ID_BITS) {
            return Err(AgentError::DecodeInvalid(format!(
                "module id too large ({module_id})"
            )));
        }
        if instance_id >= (1 << INSTANCE_ID_BITS) {
            return Err(AgentError::DecodeInvalid(format!(
                "instance id too large ({instance_id})"
            )));
        }
        if index >= (1 << INDEX_BITS) {
            return Err(AgentError::DecodeInvalid(format!(
                "pin index too large ({index})"
            )));
        }
        Ok(Self {
            module_id,
            instance_id,
            probe_type,
            index,
        })
    }

    /// The module type id.
    pub fn module_id(&self) -> u32 {
        self.module_id
    }

    /// The module instance id.
    pub fn instance_id(&self) -> u32 {
        self.instance_id
    }

    /// The pin type.
    pub fn probe_type(&self) -> ProbeType {
        self.probe_type
    }

    /// The pin index.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Pack into the 32-bit wire form.
    pub fn to_u32(&self) -> u32 {
        (self.module_id & 0xffff)
            | ((self.instance_id & 0xff) << MODULE_ID_BITS)
            | ((self.probe_type as u32 & 0x3) << (MODULE_ID_BITS + INSTANCE_ID_BITS))
            | ((self.index & 0x3f) << (MODULE_ID_BITS + INSTANCE_ID_BITS + TYPE_BITS))
    }

    /// Unpack from the 32-bit wire form.
    pub fn from_u32(raw: u32) -> Result<Self> {
        let module_id = raw & 0xffff;
        let instance_id = (raw >> MODULE_ID_BITS) & 0xff;
        let probe_type = ProbeType::from_u32((raw >> (MODULE_ID_BITS + INSTANCE_ID_BITS)) & 0x3)?;
        let index = (raw >> (MODULE_ID_BITS + INSTANCE_ID_BITS + TYPE_BITS)) & 0x3f;
        Self::new(module_id, instance_id, probe_type, index)
    }
}

impl FromStream for ProbePointId {
    fn from_stream<R: Read>(reader: &mut ByteStreamReader<R>) -> Result<Self> {
        Self::from_u32(reader.read_u32()?)
    }
}

impl ToStream for ProbePointId {
    fn to_stream<W: Write>(&self, writer: &mut ByteStreamWriter<W>) -> Result<()> {
        writer.write_u32(self.to_u32())
    }
}

/// Configuration of one probe slot. The system keeps an ordered vector of
/// exactly [`PROBE_COUNT`] of these at all times; disabled slots carry
/// placeholder values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ProbeConfig {
    /// The probe point this slot is connected to.
    pub point_id: ProbePointId,
    /// What the probe does at that point.
    pub purpose: ProbePurpose,
    /// Whether the slot is active.
    pub enabled: bool,
}

impl ProbeConfig {
    /// A disabled placeholder slot.
    pub fn disabled() -> Self {
        Self {
            point_id: ProbePointId::new(0, 0, ProbeType::Input, 0)
                .expect("0,0,Input,0 is always in range"),
            purpose: ProbePurpose::Extract,
            enabled: false,
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self::disabled()
    }
}
