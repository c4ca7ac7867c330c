//! Tag-Length-Value decoding over a byte buffer, parameterized by a
//! "language" mapping each known tag to a typed field binding.
//!
//! Grounded on `Tlv::TlvUnpack` (`Tlv/TlvUnpackUnitTest.cpp`): each record is
//! `tag:u32, size:u32, value[size]`. Tags the language does not recognize
//! are skipped (the `size` octets are consumed and discarded, no error is
//! raised); a tag the language does recognize fails the whole read if its
//! value does not decode to exactly `size` bytes.

use crate::byte_stream::{ByteStreamReader, FromStream};

/// Failure decoding a single TLV record.
#[derive(Debug, thiserror::Error)]
pub enum TlvError {
    /// The `tag`/`size` header itself could not be read (stream truncated).
    #[error("unable to read tlv header")]
    Header,

    /// A recognized tag's value failed to decode, or did not consume
    /// exactly the `size` octets the header promised.
    #[error("error reading value for tag {tag}: {reason}")]
    Value {
        /// The tag whose value failed to decode.
        tag: u32,
        /// Human-readable reason.
        reason: String,
    },
}

impl From<TlvError> for crate::AgentError {
    fn from(e: TlvError) -> Self {
        match e {
            TlvError::Header => crate::AgentError::DecodeEos,
            TlvError::Value { tag, reason } => {
                crate::AgentError::DecodeInvalid(format!("tag {tag}: {reason}"))
            }
        }
    }
}

/// Binds TLV tags to typed fields. Implemented by a record type whose
/// fields are each addressable by a distinct tag.
///
/// `bind` is called once per recognized tag in the stream, with a reader
/// scoped to exactly that tag's `size` octets; it must consume the reader
/// fully or return an error. Tags for which `bind` returns `Ok(false)` (or
/// which no variant of this trait's tag set covers at all) are treated as
/// present-but-ignored and silently skipped by [`TlvUnpack`].
pub trait TlvLanguage {
    /// Dispatch on `tag`, decoding from `reader` (bounded to the record's
    /// declared `size`) into `self`. Returns `true` if `tag` was
    /// recognized, `false` if it is unknown to this language (in which
    /// case the caller has not consumed anything and the record is
    /// skipped by byte count instead).
    fn bind(&mut self, tag: u32, reader: &mut ByteStreamReader<&[u8]>) -> crate::Result<bool>;
}

/// Walks a byte buffer as a sequence of TLV records, feeding each
/// recognized one to a [`TlvLanguage`].
pub struct TlvUnpack<'a, L> {
    reader: ByteStreamReader<&'a [u8]>,
    language: &'a mut L,
}

impl<'a, L: TlvLanguage> TlvUnpack<'a, L> {
    /// Build an unpacker over `buffer`, dispatching recognized tags to
    /// `language`.
    pub fn new(language: &'a mut L, buffer: &'a [u8]) -> Self {
        Self {
            reader: ByteStreamReader::new(buffer),
            language,
        }
    }

    /// Decode and dispatch the next TLV record.
    ///
    /// Returns `Ok(true)` if a record was read (whether recognized or
    /// skipped), `Ok(false)` at end of buffer, `Err` if the header or a
    /// recognized tag's value failed to decode.
    pub fn read_next(&mut self) -> Result<bool, TlvError> {
        if self.reader.remaining().is_empty() {
            return Ok(false);
        }
        let tag = self.reader.read_u32().map_err(|_| TlvError::Header)?;
        let size = self.reader.read_u32().map_err(|_| TlvError::Header)?;
        let value = self
            .reader
            .read_bytes(size as usize)
            .map_err(|_| TlvError::Header)?;

        let mut value_reader = ByteStreamReader::new(value.as_slice());
        let recognized = self
            .language
            .bind(tag, &mut value_reader)
            .map_err(|e| TlvError::Value {
                tag,
                reason: e.to_string(),
            })?;
        if recognized && !value_reader.remaining().is_empty() {
            return Err(TlvError::Value {
                tag,
                reason: "value buffer not fully consumed".to_string(),
            });
        }
        Ok(true)
    }
}

/// Read a single `T` value as a tag's entire body, then assert that it
/// consumed the whole bounded buffer. Most [`TlvLanguage::bind`]
/// implementations will call this once per recognized tag.
pub fn read_exact_value<T: FromStream>(reader: &mut ByteStreamReader<&[u8]>) -> crate::Result<T> {
    let value = T::from_stream(reader)?;
    if !reader.remaining().is_empty() {
        return Err(crate::AgentError::DecodeInvalid(
            "value buffer not fully consumed".to_string(),
        ));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::byte_stream::{ByteStreamWriter, ToStream};
    use std::io::Read;

    #[derive(Debug, Default, PartialEq)]
    struct Hello {
        a: u16,
        b: u16,
    }

    impl FromStream for Hello {
        fn from_stream<R: Read>(reader: &mut ByteStreamReader<R>) -> crate::Result<Self> {
            Ok(Hello {
                a: reader.read_u16()?,
                b: reader.read_u16()?,
            })
        }
    }

    impl ToStream for Hello {
        fn to_stream<W: std::io::Write>(&self, writer: &mut ByteStreamWriter<W>) -> crate::Result<()> {
            writer.write_u16(self.a)?;
            writer.write_u16(self.b)
        }
    }

    #[derive(Default)]
    struct TestLanguage {
        hello: Option<Hello>,
        world: Vec<u32>,
    }

    const TAG_HELLO: u32 = 54;
    const TAG_WORLD_ENTRY: u32 = 24;

    impl TlvLanguage for TestLanguage {
        fn bind(&mut self, tag: u32, reader: &mut ByteStreamReader<&[u8]>) -> crate::Result<bool> {
            match tag {
                TAG_HELLO => {
                    self.hello = Some(read_exact_value(reader)?);
                    Ok(true)
                }
                TAG_WORLD_ENTRY => {
                    self.world.push(read_exact_value(reader)?);
                    Ok(true)
                }
                _ => Ok(false),
            }
        }
    }

    fn encode_tlv(tag: u32, value: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut w = ByteStreamWriter::new(&mut buf);
        w.write_u32(tag).unwrap();
        w.write_u32(value.len() as u32).unwrap();
        w.write_bytes(value).unwrap();
        buf
    }

    #[test]
    fn empty_buffer_yields_no_records() {
        let mut lang = TestLanguage::default();
        let mut unpacker = TlvUnpack::new(&mut lang, &[]);
        assert!(!unpacker.read_next().unwrap());
        assert!(lang.hello.is_none());
    }

    #[test]
    fn single_known_tag_is_bound() {
        let buf = encode_tlv(TAG_HELLO, &[0x34, 0x12, 0x78, 0x56]);
        let mut lang = TestLanguage::default();
        let mut unpacker = TlvUnpack::new(&mut lang, &buf);
        assert!(unpacker.read_next().unwrap());
        assert!(!unpacker.read_next().unwrap());
        assert_eq!(lang.hello, Some(Hello { a: 0x1234, b: 0x5678 }));
    }

    #[test]
    fn unknown_tag_is_skipped_not_errored() {
        let mut buf = encode_tlv(0xFFFF_FFFF, &[1, 2, 3, 4]);
        buf.extend(encode_tlv(TAG_HELLO, &[0xAD, 0xDE, 0xEF, 0xBE]));
        let mut lang = TestLanguage::default();
        let mut unpacker = TlvUnpack::new(&mut lang, &buf);
        assert!(unpacker.read_next().unwrap());
        assert!(unpacker.read_next().unwrap());
        assert!(!unpacker.read_next().unwrap());
        assert_eq!(lang.hello, Some(Hello { a: 0xDEAD, b: 0xBEEF }));
    }

    #[test]
    fn repeated_tag_accumulates() {
        let mut buf = encode_tlv(TAG_WORLD_ENTRY, &1u32.to_le_bytes());
        buf.extend(encode_tlv(TAG_WORLD_ENTRY, &2u32.to_le_bytes()));
        let mut lang = TestLanguage::default();
        let mut unpacker = TlvUnpack::new(&mut lang, &buf);
        assert!(unpacker.read_next().unwrap());
        assert!(unpacker.read_next().unwrap());
        assert!(!unpacker.read_next().unwrap());
        assert_eq!(lang.world, vec![1, 2]);
    }

    #[test]
    fn truncated_header_is_an_error() {
        let buf = vec![1, 0, 0]; // 3 bytes, not enough for a u32 tag
        let mut lang = TestLanguage::default();
        let mut unpacker = TlvUnpack::new(&mut lang, &buf);
        assert!(matches!(unpacker.read_next(), Err(TlvError::Header)));
    }

    #[test]
    fn declared_size_larger_than_remaining_buffer_is_an_error() {
        let mut buf = Vec::new();
        let mut w = ByteStreamWriter::new(&mut buf);
        w.write_u32(TAG_HELLO).unwrap();
        w.write_u32(8).unwrap(); // promises 8 bytes
        w.write_bytes(&[1, 2, 3]).unwrap(); // only 3 present
        let mut lang = TestLanguage::default();
        let mut unpacker = TlvUnpack::new(&mut lang, &buf);
        assert!(matches!(unpacker.read_next(), Err(TlvError::Header)));
    }

    #[test]
    fn known_tag_with_leftover_bytes_is_an_error() {
        // Hello needs 4 bytes but the record declares 6.
        let buf = encode_tlv(TAG_HELLO, &[0, 0, 0, 0, 0, 0]);
        let mut lang = TestLanguage::default();
        let mut unpacker = TlvUnpack::new(&mut lang, &buf);
        assert!(matches!(unpacker.read_next(), Err(TlvError::Value { .. })));
    }
}
