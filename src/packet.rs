//! Wire records carried over the compressed-stream endpoints: extracted
//! probe [`Packet`]s and firmware log [`LogBlock`]s.

use crate::byte_stream::{ByteStreamReader, ByteStreamWriter, FromStream, ToStream};
use crate::ids::{ProbePointId, CoreId, MAX_CORE_ID};
use crate::{AgentError, Buffer, Result};
use std::io::{Read, Write};

/// Marks the start of a probe extraction record on the wire.
///
/// Grounded on `dsp_fw::Packet::syncWord` (`DspFw/Probe.hpp`).
pub const PACKET_SYNC_WORD: u32 = 0xBABEBEBA;

/// A single probe-extraction record as produced by the firmware's probe
/// extraction service.
///
/// `header_checksum` is the wrapping sum of every other field (including
/// the sync word and the data length, but not the data itself); it is
/// validated on decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Which probe point produced this record.
    pub probe_point_id: ProbePointId,
    /// Firmware-defined sample format tag.
    pub format: u32,
    /// High word of the DSP wall clock timestamp.
    pub dsp_wall_clock_ts_hw: u32,
    /// Low word of the DSP wall clock timestamp.
    pub dsp_wall_clock_ts_lw: u32,
    /// Raw sample payload.
    pub data: Buffer,
}

impl Packet {
    /// Wrapping sum of sync word, probe point id, format, both timestamp
    /// words, and the data length - the value `header_checksum` must equal.
    pub fn sum(&self) -> u32 {
        PACKET_SYNC_WORD
            .wrapping_add(self.probe_point_id.to_u32())
            .wrapping_add(self.format)
            .wrapping_add(self.dsp_wall_clock_ts_hw)
            .wrapping_add(self.dsp_wall_clock_ts_lw)
            .wrapping_add(self.data.len() as u32)
    }
}

impl FromStream for Packet {
    fn from_stream<R: Read>(reader: &mut ByteStreamReader<R>) -> Result<Self> {
        let sync_word = reader.read_u32()?;
        if sync_word != PACKET_SYNC_WORD {
            return Err(AgentError::DecodeInvalid(format!(
                "invalid sync word in extracted probe packet header: expected {PACKET_SYNC_WORD:#x}, found {sync_word:#x}"
            )));
        }
        let probe_point_id = reader.read::<ProbePointId>()?;
        let format = reader.read_u32()?;
        let dsp_wall_clock_ts_hw = reader.read_u32()?;
        let dsp_wall_clock_ts_lw = reader.read_u32()?;
        let data: Buffer = reader.read_vector::<u8>()?;

        let packet = Packet {
            probe_point_id,
            format,
            dsp_wall_clock_ts_hw,
            dsp_wall_clock_ts_lw,
            data,
        };

        let header_checksum = reader.read_u32()?;
        if header_checksum != packet.sum() {
            return Err(AgentError::DecodeInvalid(format!(
                "header checksum mismatch: expected {}, found {header_checksum}",
                packet.sum()
            )));
        }
        Ok(packet)
    }
}

impl ToStream for Packet {
    fn to_stream<W: Write>(&self, writer: &mut ByteStreamWriter<W>) -> Result<()> {
        writer.write_u32(PACKET_SYNC_WORD)?;
        writer.write(&self.probe_point_id)?;
        writer.write_u32(self.format)?;
        writer.write_u32(self.dsp_wall_clock_ts_hw)?;
        writer.write_u32(self.dsp_wall_clock_ts_lw)?;
        writer.write_vector(&self.data)?;
        writer.write_u32(self.sum())
    }
}

const LOG_DATA_SIZE_BITS: u32 = 28;
const LOG_CORE_ID_SHIFT: u32 = LOG_DATA_SIZE_BITS;

/// A chunk of firmware log bytes tagged with the core that emitted it.
///
/// Wire form is a 4-byte little-endian header (`data_size:28 | core_id:4`)
/// followed by `data_size` raw octets, no trailer. Grounded on
/// `cavs::LogBlock` (`cAVS/test/LogBlockTest.cpp`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogBlock {
    /// Which DSP core this block's log data came from.
    pub core_id: CoreId,
    /// Raw log bytes.
    pub data: Buffer,
}

impl LogBlock {
    /// Build a log block, rejecting a core id outside `0..=15` or data
    /// longer than 2^28 - 1 bytes.
    pub fn new(core_id: CoreId, data: Buffer) -> Result<Self> {
        if core_id > MAX_CORE_ID {
            return Err(AgentError::DecodeInvalid(format!(
                "invalid core id: {core_id} should be in [0..{MAX_CORE_ID}]"
            )));
        }
        if data.len() >= (1 << LOG_DATA_SIZE_BITS) {
            return Err(AgentError::DecodeInvalid(
                "log block size exceeds maximum value".to_string(),
            ));
        }
        Ok(Self { core_id, data })
    }

    /// Total bytes this block occupies on the wire: header plus payload.
    /// Used as the blocking queue's per-element size function.
    pub fn wire_size(&self) -> usize {
        4 + self.data.len()
    }
}

impl ToStream for LogBlock {
    fn to_stream<W: Write>(&self, writer: &mut ByteStreamWriter<W>) -> Result<()> {
        let header = (self.data.len() as u32) | (u32::from(self.core_id) << LOG_CORE_ID_SHIFT);
        writer.write_u32(header)?;
        writer.write_bytes(&self.data)
    }
}

impl FromStream for LogBlock {
    fn from_stream<R: Read>(reader: &mut ByteStreamReader<R>) -> Result<Self> {
        let header = reader.read_u32()?;
        let data_size = (header & ((1 << LOG_DATA_SIZE_BITS) - 1)) as usize;
        let core_id = (header >> LOG_CORE_ID_SHIFT) as CoreId;
        let data = reader.read_bytes(data_size)?;
        LogBlock::new(core_id, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ProbeType;
    use std::io::Cursor;

    fn sample_packet() -> Packet {
        Packet {
            probe_point_id: ProbePointId::new(1, 2, ProbeType::Output, 3).unwrap(),
            format: 7,
            dsp_wall_clock_ts_hw: 0x0102_0304,
            dsp_wall_clock_ts_lw: 0x0506_0708,
            data: vec![1, 2, 3, 4, 5],
        }
    }

    #[test]
    fn packet_round_trips() {
        let packet = sample_packet();
        let mut buf = Vec::new();
        {
            let mut w = ByteStreamWriter::new(&mut buf);
            w.write(&packet).unwrap();
        }
        let mut r = ByteStreamReader::new(Cursor::new(buf));
        let decoded: Packet = r.read().unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn packet_rejects_bad_sync_word() {
        let mut buf = Vec::new();
        ByteStreamWriter::new(&mut buf).write_u32(0xdead_beef).unwrap();
        let mut r = ByteStreamReader::new(Cursor::new(buf));
        assert!(matches!(r.read::<Packet>(), Err(AgentError::DecodeInvalid(_))));
    }

    #[test]
    fn packet_rejects_bad_checksum() {
        let packet = sample_packet();
        let mut buf = Vec::new();
        {
            let mut w = ByteStreamWriter::new(&mut buf);
            w.write(&packet).unwrap();
        }
        *buf.last_mut().unwrap() ^= 0xff;
        let mut r = ByteStreamReader::new(Cursor::new(buf));
        assert!(matches!(r.read::<Packet>(), Err(AgentError::DecodeInvalid(_))));
    }

    #[test]
    fn log_block_rejects_core_id_over_max() {
        assert!(LogBlock::new(MAX_CORE_ID + 1, vec![]).is_err());
        assert!(LogBlock::new(MAX_CORE_ID, vec![]).is_ok());
    }

    #[test]
    fn log_block_empty_header_matches_expected_bytes() {
        let block = LogBlock::new(15, vec![]).unwrap();
        let mut buf = Vec::new();
        ByteStreamWriter::new(&mut buf).write(&block).unwrap();
        assert_eq!(buf, vec![0, 0, 0, 15 << 4]);
    }

    #[test]
    fn log_block_round_trips_with_data() {
        let block = LogBlock::new(3, b"hello world".to_vec()).unwrap();
        let mut buf = Vec::new();
        ByteStreamWriter::new(&mut buf).write(&block).unwrap();
        let mut r = ByteStreamReader::new(Cursor::new(buf));
        let decoded: LogBlock = r.read().unwrap();
        assert_eq!(decoded, block);
    }
}
