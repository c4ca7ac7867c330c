//! Typed firmware configuration/parameter access over the message
//! endpoint (C7).
//!
//! Grounded on `cAVS::ModuleHandlerImpl` (`configGet`/`configSet`) and the
//! `LargeConfigAccess` wire envelope described in the external-interfaces
//! section: every operation here builds a request envelope, issues one
//! [`MessageEndpoint::command`], and parses the reply envelope
//! (`driver_status`, `fw_status`, payload).

use crate::byte_stream::{ByteStreamReader, ByteStreamWriter, FromStream};
use crate::device::MessageEndpoint;
use crate::ids::{CoreId, GatewayId, ModuleId, ParameterId, PipelineId, TaskId};
use crate::tlv::{read_exact_value, TlvLanguage, TlvUnpack};
use crate::{AgentError, Buffer, Result};
use std::io::Read;

const CMD_TYPE_GET: u32 = 0;
const CMD_TYPE_SET: u32 = 1;

/// A `(moduleId, paramId)` pair whose payload is wrapped with an extra
/// `(paramId, size)` header in both request and reply.
///
/// Grounded on §9's "tunneled vs. non-tunneled parameters": a static
/// predicate, kept alongside the parser that must agree with it.
pub type TunneledParamPredicate = std::collections::HashSet<(u16, u8)>;

/// Firmware version and capability set, decoded via TLV.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FwConfig {
    /// `major.minor.hotfix.build` firmware version, if present.
    pub fw_version: Option<(u16, u16, u16, u16)>,
    /// Raw capability bitmask, if present.
    pub capabilities: Option<u32>,
}

const TAG_FW_VERSION: u32 = 0;
const TAG_CAPABILITIES: u32 = 1;

impl TlvLanguage for FwConfig {
    fn bind(&mut self, tag: u32, reader: &mut ByteStreamReader<&[u8]>) -> Result<bool> {
        match tag {
            TAG_FW_VERSION => {
                let major = reader.read_u16()?;
                let minor = reader.read_u16()?;
                let hotfix = reader.read_u16()?;
                let build = reader.read_u16()?;
                self.fw_version = Some((major, minor, hotfix, build));
                Ok(true)
            }
            TAG_CAPABILITIES => {
                self.capabilities = Some(read_exact_value(reader)?);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Hardware topology summary, decoded via TLV.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HwConfig {
    /// Number of DSP cores, if present.
    pub core_count: Option<u32>,
    /// Number of memory banks, if present.
    pub mem_bank_count: Option<u32>,
}

const TAG_CORE_COUNT: u32 = 0;
const TAG_MEM_BANK_COUNT: u32 = 1;

impl TlvLanguage for HwConfig {
    fn bind(&mut self, tag: u32, reader: &mut ByteStreamReader<&[u8]>) -> Result<bool> {
        match tag {
            TAG_CORE_COUNT => {
                self.core_count = Some(read_exact_value(reader)?);
                Ok(true)
            }
            TAG_MEM_BANK_COUNT => {
                self.mem_bank_count = Some(read_exact_value(reader)?);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// One loaded module type entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleEntry {
    /// Module type id.
    pub module_id: u16,
    /// 16-byte firmware-assigned UUID.
    pub uuid: [u8; 16],
    /// Fixed-size, NUL-padded module name.
    pub name: [u8; 8],
}

impl FromStream for ModuleEntry {
    fn from_stream<R: Read>(reader: &mut ByteStreamReader<R>) -> Result<Self> {
        let module_id = reader.read_u16()?;
        let _padding = reader.read_u16()?;
        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(&reader.read_bytes(16)?);
        let mut name = [0u8; 8];
        name.copy_from_slice(&reader.read_bytes(8)?);
        Ok(Self { module_id, uuid, name })
    }
}

/// Pipeline properties (§4.7 `get_pipeline_props`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PplProps {
    /// The pipeline's id.
    pub id: PipelineId,
    /// Scheduling priority.
    pub priority: u32,
    /// Opaque firmware state code.
    pub state: u32,
}

impl FromStream for PplProps {
    fn from_stream<R: Read>(reader: &mut ByteStreamReader<R>) -> Result<Self> {
        Ok(Self {
            id: reader.read_u32()?,
            priority: reader.read_u32()?,
            state: reader.read_u32()?,
        })
    }
}

/// One scheduler and the tasks it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerInfo {
    /// Scheduler id.
    pub id: u32,
    /// Ids of tasks currently scheduled on it.
    pub tasks: Vec<TaskId>,
}

impl FromStream for SchedulerInfo {
    fn from_stream<R: Read>(reader: &mut ByteStreamReader<R>) -> Result<Self> {
        Ok(Self {
            id: reader.read_u32()?,
            tasks: reader.read_vector()?,
        })
    }
}

/// All schedulers on one core (§4.7 `get_schedulers_info`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SchedulersInfo {
    /// One entry per scheduler.
    pub schedulers: Vec<SchedulerInfo>,
}

impl FromStream for SchedulersInfo {
    fn from_stream<R: Read>(reader: &mut ByteStreamReader<R>) -> Result<Self> {
        Ok(Self {
            schedulers: reader.read_vector()?,
        })
    }
}

/// A single audio gateway's properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayProps {
    /// Gateway id.
    pub id: GatewayId,
    /// Opaque firmware attribute bitmask.
    pub attribs: u32,
}

impl FromStream for GatewayProps {
    fn from_stream<R: Read>(reader: &mut ByteStreamReader<R>) -> Result<Self> {
        Ok(Self {
            id: reader.read_u32()?,
            attribs: reader.read_u32()?,
        })
    }
}

/// The audio format of one module pin: used by the probe injector to
/// compute its sample size (`bit_depth × channel_count`, see §4.12).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    /// Bits per sample.
    pub bit_depth: u32,
    /// Number of interleaved channels.
    pub channel_count: u32,
}

impl AudioFormat {
    /// Sample size in octets: `bit_depth / 8 * channel_count`.
    pub fn sample_byte_size(&self) -> usize {
        (self.bit_depth / 8 * self.channel_count) as usize
    }
}

impl FromStream for AudioFormat {
    fn from_stream<R: Read>(reader: &mut ByteStreamReader<R>) -> Result<Self> {
        Ok(Self {
            bit_depth: reader.read_u32()?,
            channel_count: reader.read_u32()?,
        })
    }
}

/// A module instance's properties (§4.7 `get_module_instance_props`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInstanceProps {
    /// The module this instance belongs to.
    pub module: ModuleId,
    /// Format of the instance's first input pin.
    pub input_format: AudioFormat,
}

impl FromStream for ModuleInstanceProps {
    fn from_stream<R: Read>(reader: &mut ByteStreamReader<R>) -> Result<Self> {
        let type_id = reader.read_u16()?;
        let instance_id = reader.read_u16()?;
        let input_format = reader.read()?;
        Ok(Self {
            module: ModuleId::new(type_id, instance_id),
            input_format,
        })
    }
}

/// One module instance's performance counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerfDataItem {
    /// The module this entry refers to.
    pub module: ModuleId,
    /// Core the instance runs on.
    pub core_id: CoreId,
    /// Average cycle count per frame.
    pub avg_cycles: u32,
    /// Peak observed cycle count.
    pub peak_cycles: u32,
}

impl FromStream for PerfDataItem {
    fn from_stream<R: Read>(reader: &mut ByteStreamReader<R>) -> Result<Self> {
        let type_id = reader.read_u16()?;
        let instance_id = reader.read_u16()?;
        Ok(Self {
            module: ModuleId::new(type_id, instance_id),
            core_id: reader.read_u8()?,
            avg_cycles: reader.read_u32()?,
            peak_cycles: reader.read_u32()?,
        })
    }
}

/// Free-page/EBB allocation state of one SRAM bank.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BankState {
    /// Number of free pages in this bank.
    pub free_pages: u32,
    /// Whether the bank is EBB-managed (powered independently).
    pub ebb_state: bool,
    /// Per-page allocation bitmap.
    pub page_allocations: Vec<u8>,
}

/// Global memory state, decoded via TLV (one `BANK` tag per SRAM bank).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryState {
    /// One entry per SRAM bank, in firmware-reported order.
    pub banks: Vec<BankState>,
}

const TAG_BANK: u32 = 0;

impl TlvLanguage for MemoryState {
    fn bind(&mut self, tag: u32, reader: &mut ByteStreamReader<&[u8]>) -> Result<bool> {
        match tag {
            TAG_BANK => {
                let free_pages = reader.read_u32()?;
                let ebb_state = reader.read_u8()? != 0;
                let page_allocations = reader.read_vector::<u8>()?;
                self.banks.push(BankState {
                    free_pages,
                    ebb_state,
                    page_allocations,
                });
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Typed access to firmware configuration and module parameters over a
/// shared [`MessageEndpoint`] (§4.7).
pub struct ModuleHandler<'a> {
    endpoint: &'a dyn MessageEndpoint,
    tunneled_params: TunneledParamPredicate,
}

impl<'a> ModuleHandler<'a> {
    /// Build a handler over `endpoint`. `tunneled_params` names the
    /// `(moduleId, paramId)` pairs whose payload carries the extra
    /// `(paramId, size)` tunnel header.
    pub fn new(endpoint: &'a dyn MessageEndpoint, tunneled_params: TunneledParamPredicate) -> Self {
        Self { endpoint, tunneled_params }
    }

    fn is_tunneled(&self, module_id: u16, param_id: u8) -> bool {
        self.tunneled_params.contains(&(module_id, param_id))
    }

    fn build_request(
        cmd_type: u32,
        module_id: u16,
        instance_id: u16,
        param_id: ParameterId,
        size: u32,
        payload: Option<&[u8]>,
    ) -> Result<Buffer> {
        let mut buf = Vec::new();
        let mut w = ByteStreamWriter::new(&mut buf);
        w.write_u32(cmd_type)?;
        w.write_u16(module_id)?;
        w.write_u16(instance_id)?;
        w.write_u32(param_id.raw())?;
        w.write_u32(size)?;
        if let Some(payload) = payload {
            w.write_bytes(payload)?;
        }
        Ok(buf)
    }

    /// Issue `request`, expecting at most `max_reply_len` bytes back, and
    /// parse the `driver_status`/`fw_status`/payload reply envelope.
    fn call(&self, request: &Buffer, max_reply_len: usize) -> Result<Buffer> {
        let reply = self.endpoint.command(request, max_reply_len)?;
        let mut r = ByteStreamReader::new(reply.as_slice());
        let driver_status = r.read_u32()?;
        if driver_status != 0 {
            return Err(AgentError::DriverStatus(driver_status));
        }
        let fw_status = r.read_u32()?;
        if fw_status != 0 {
            return Err(AgentError::FirmwareStatus(fw_status));
        }
        Ok(r.remaining().to_vec())
    }

    fn config_get_raw(
        &self,
        module_id: u16,
        instance_id: u16,
        param_id: ParameterId,
        max_size: usize,
    ) -> Result<Buffer> {
        let request = Self::build_request(CMD_TYPE_GET, module_id, instance_id, param_id, max_size as u32, None)?;
        let effective_param_id = (param_id.raw() & 0xff) as u8;
        let payload = self.call(&request, max_size + 8)?;
        if self.is_tunneled(module_id, effective_param_id) {
            let mut r = ByteStreamReader::new(payload.as_slice());
            let _tunneled_param_id = r.read_u32()?;
            let size = r.read_u32()? as usize;
            r.read_bytes(size)
        } else {
            Ok(payload)
        }
    }

    fn config_set_raw(
        &self,
        module_id: u16,
        instance_id: u16,
        param_id: ParameterId,
        payload: &[u8],
    ) -> Result<()> {
        let effective_param_id = (param_id.raw() & 0xff) as u8;
        let body: Buffer = if self.is_tunneled(module_id, effective_param_id) {
            let mut buf = Vec::new();
            let mut w = ByteStreamWriter::new(&mut buf);
            w.write_u32(param_id.raw())?;
            w.write_u32(payload.len() as u32)?;
            w.write_bytes(payload)?;
            buf
        } else {
            payload.to_vec()
        };
        let request = Self::build_request(
            CMD_TYPE_SET,
            module_id,
            instance_id,
            param_id,
            body.len() as u32,
            Some(&body),
        )?;
        self.call(&request, 8)?;
        Ok(())
    }

    fn tlv_get<L: TlvLanguage + Default>(&self, module_id: u16, instance_id: u16, param_id: ParameterId, max_size: usize) -> Result<L> {
        let payload = self.config_get_raw(module_id, instance_id, param_id, max_size)?;
        let mut lang = L::default();
        let mut unpacker = TlvUnpack::new(&mut lang, &payload);
        while unpacker.read_next()? {}
        Ok(lang)
    }

    /// `get_fw_config`.
    pub fn get_fw_config(&self) -> Result<FwConfig> {
        self.tlv_get(0, 0, ParameterId::new(0), 4096)
    }

    /// `get_hw_config`.
    pub fn get_hw_config(&self) -> Result<HwConfig> {
        self.tlv_get(0, 0, ParameterId::new(1), 4096)
    }

    /// `get_module_entries`.
    pub fn get_module_entries(&self, expected_count: usize) -> Result<Vec<ModuleEntry>> {
        let max_size = expected_count * 28;
        let payload = self.config_get_raw(0, 0, ParameterId::new(2), max_size)?;
        let mut r = ByteStreamReader::new(payload.as_slice());
        (0..expected_count).map(|_| r.read()).collect()
    }

    /// `get_pipeline_ids`.
    pub fn get_pipeline_ids(&self, max_count: usize) -> Result<Vec<PipelineId>> {
        let payload = self.config_get_raw(0, 0, ParameterId::new(3), max_count * 4 + 4)?;
        let mut r = ByteStreamReader::new(payload.as_slice());
        r.read_vector()
    }

    /// `get_pipeline_props`.
    pub fn get_pipeline_props(&self, pipeline_id: PipelineId) -> Result<PplProps> {
        let payload = self.config_get_raw(0, 0, ParameterId::extended(pipeline_id, 4), 64)?;
        let mut r = ByteStreamReader::new(payload.as_slice());
        r.read()
    }

    /// `get_schedulers_info`.
    pub fn get_schedulers_info(&self, core_id: CoreId) -> Result<SchedulersInfo> {
        let payload = self.config_get_raw(0, 0, ParameterId::extended(u32::from(core_id), 5), 4096)?;
        let mut r = ByteStreamReader::new(payload.as_slice());
        r.read()
    }

    /// `get_gateways`.
    pub fn get_gateways(&self, expected_count: usize) -> Result<Vec<GatewayProps>> {
        let payload = self.config_get_raw(0, 0, ParameterId::new(6), expected_count * 8 + 4)?;
        let mut r = ByteStreamReader::new(payload.as_slice());
        r.read_vector()
    }

    /// `get_module_instance_props`.
    pub fn get_module_instance_props(&self, module: ModuleId) -> Result<ModuleInstanceProps> {
        let payload = self.config_get_raw(module.type_id, module.instance_id, ParameterId::new(7), 64)?;
        let mut r = ByteStreamReader::new(payload.as_slice());
        r.read()
    }

    /// `get_module_parameter`.
    pub fn get_module_parameter(
        &self,
        module: ModuleId,
        param_id: ParameterId,
        max_size: usize,
    ) -> Result<Buffer> {
        self.config_get_raw(module.type_id, module.instance_id, param_id, max_size)
    }

    /// `set_module_parameter`.
    pub fn set_module_parameter(&self, module: ModuleId, param_id: ParameterId, payload: &[u8]) -> Result<()> {
        self.config_set_raw(module.type_id, module.instance_id, param_id, payload)
    }

    /// `get_global_perf_data`.
    pub fn get_global_perf_data(&self, max_items: usize) -> Result<Vec<PerfDataItem>> {
        let payload = self.config_get_raw(0, 0, ParameterId::new(8), max_items * 16 + 4)?;
        let mut r = ByteStreamReader::new(payload.as_slice());
        r.read_vector()
    }

    /// `get_global_memory_state`.
    pub fn get_global_memory_state(&self) -> Result<MemoryState> {
        self.tlv_get(0, 0, ParameterId::new(9), 4096)
    }

    /// `set_perf_state`.
    pub fn set_perf_state(&self, state: u32) -> Result<()> {
        self.config_set_raw(0, 0, ParameterId::new(10), &state.to_le_bytes())
    }

    /// `get_perf_state`.
    pub fn get_perf_state(&self) -> Result<u32> {
        let payload = self.config_get_raw(0, 0, ParameterId::new(10), 4)?;
        let mut r = ByteStreamReader::new(payload.as_slice());
        r.read_u32()
    }

    /// `set_core_power`.
    pub fn set_core_power(&self, core_id: CoreId, allowed_to_sleep: bool) -> Result<()> {
        let mut payload = Vec::new();
        let mut w = ByteStreamWriter::new(&mut payload);
        w.write_u8(core_id)?;
        w.write_u8(allowed_to_sleep as u8)?;
        self.config_set_raw(0, 0, ParameterId::new(11), &payload)
    }

    /// `set_log_info_state`.
    pub fn set_log_info_state(&self, core_mask: u32, enabled: bool, level: u32) -> Result<()> {
        let mut payload = Vec::new();
        let mut w = ByteStreamWriter::new(&mut payload);
        w.write_u32(core_mask)?;
        w.write_u8(enabled as u8)?;
        w.write_u32(level)?;
        self.config_set_raw(0, 0, ParameterId::new(12), &payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::testing::{ExpectedCommand, ScriptedMessageEndpoint};

    fn reply_envelope(payload: &[u8]) -> Buffer {
        let mut buf = Vec::new();
        let mut w = ByteStreamWriter::new(&mut buf);
        w.write_u32(0).unwrap(); // driver_status
        w.write_u32(0).unwrap(); // fw_status
        w.write_bytes(payload).unwrap();
        buf
    }

    #[test]
    fn get_module_parameter_returns_payload_unchanged() {
        let payload = vec![0xABu8; 642];
        let request =
            ModuleHandler::build_request(CMD_TYPE_GET, 1, 1, ParameterId::new(0), 642, None).unwrap();
        let endpoint = ScriptedMessageEndpoint::new(vec![ExpectedCommand {
            request,
            max_reply_len: 650,
            reply: Ok(reply_envelope(&payload)),
        }]);
        let handler = ModuleHandler::new(&endpoint, TunneledParamPredicate::new());
        let got = handler
            .get_module_parameter(ModuleId::new(1, 1), ParameterId::new(0), 642)
            .unwrap();
        assert_eq!(got, payload);
        assert!(endpoint.is_exhausted());
    }

    #[test]
    fn set_module_parameter_wraps_tunneled_payload() {
        let payload = vec![4u8, 5, 6];
        let mut tunneled_body = Vec::new();
        {
            let mut w = ByteStreamWriter::new(&mut tunneled_body);
            w.write_u32(2).unwrap();
            w.write_u32(3).unwrap();
            w.write_bytes(&payload).unwrap();
        }
        let request = ModuleHandler::build_request(
            CMD_TYPE_SET,
            0x1024,
            2,
            ParameterId::new(2),
            tunneled_body.len() as u32,
            Some(&tunneled_body),
        )
        .unwrap();
        let endpoint = ScriptedMessageEndpoint::new(vec![ExpectedCommand {
            request,
            max_reply_len: 8,
            reply: Ok(reply_envelope(&[])),
        }]);
        let mut tunneled = TunneledParamPredicate::new();
        tunneled.insert((0x1024, 2));
        let handler = ModuleHandler::new(&endpoint, tunneled);
        handler
            .set_module_parameter(ModuleId::new(0x1024, 2), ParameterId::new(2), &payload)
            .unwrap();
        assert!(endpoint.is_exhausted());
    }

    #[test]
    fn nonzero_driver_status_is_reported() {
        let mut reply = Vec::new();
        ByteStreamWriter::new(&mut reply).write_u32(7).unwrap();
        let endpoint = ScriptedMessageEndpoint::new(vec![ExpectedCommand {
            request: ModuleHandler::build_request(CMD_TYPE_GET, 1, 1, ParameterId::new(0), 4, None)
                .unwrap(),
            max_reply_len: 12,
            reply: Ok(reply),
        }]);
        let handler = ModuleHandler::new(&endpoint, TunneledParamPredicate::new());
        let err = handler
            .get_module_parameter(ModuleId::new(1, 1), ParameterId::new(0), 4)
            .unwrap_err();
        assert!(matches!(err, AgentError::DriverStatus(7)));
    }
}
