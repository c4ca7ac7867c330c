//! Little-endian typed (de)serialization layered on top of any byte source
//! or sink (`std::io::Read`/`std::io::Write`).
//!
//! A type that wants to flow through the codec implements [`FromStream`]
//! and/or [`ToStream`]; [`ByteStreamReader`]/[`ByteStreamWriter`] handle
//! scalars, fixed arrays and `vector<T>` (encoded as `u32` count followed by
//! `T` repeated) on its behalf.

use crate::{AgentError, Result};
use std::io::{Read, Write};

/// Reads little-endian typed values from an underlying [`Read`].
///
/// Reading past the end of the underlying stream raises
/// [`AgentError::DecodeEos`]; every other I/O failure propagates as
/// [`AgentError::Io`].
pub struct ByteStreamReader<R> {
    inner: R,
}

impl<R: Read> ByteStreamReader<R> {
    /// Wrap a byte source.
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        match self.inner.read_exact(buf) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(AgentError::DecodeEos),
            Err(e) => Err(AgentError::Io(e)),
        }
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    /// Read a little-endian `u16`.
    pub fn read_u16(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    /// Read a little-endian `u32`.
    pub fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Read a little-endian `u64`.
    pub fn read_u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Read exactly `len` raw octets.
    pub fn read_bytes(&mut self, len: usize) -> Result<crate::Buffer> {
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Read a value that knows how to decode itself.
    pub fn read<T: FromStream>(&mut self) -> Result<T> {
        T::from_stream(self)
    }

    /// Read a `vector<T>`: a `u32` element count followed by that many `T`.
    pub fn read_vector<T: FromStream>(&mut self) -> Result<Vec<T>> {
        let count = self.read_u32()? as usize;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(T::from_stream(self)?);
        }
        Ok(out)
    }
}

impl<'a> ByteStreamReader<&'a [u8]> {
    /// The unread tail of the underlying slice. Used to check that a
    /// bounded decode (e.g. a TLV record's value) consumed exactly as much
    /// as it was given.
    pub fn remaining(&self) -> &'a [u8] {
        self.inner
    }
}

/// Writes little-endian typed values to an underlying [`Write`].
pub struct ByteStreamWriter<W> {
    inner: W,
}

impl<W: Write> ByteStreamWriter<W> {
    /// Wrap a byte sink.
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Write a single byte.
    pub fn write_u8(&mut self, v: u8) -> Result<()> {
        self.inner.write_all(&[v]).map_err(AgentError::Io)
    }

    /// Write a little-endian `u16`.
    pub fn write_u16(&mut self, v: u16) -> Result<()> {
        self.inner.write_all(&v.to_le_bytes()).map_err(AgentError::Io)
    }

    /// Write a little-endian `u32`.
    pub fn write_u32(&mut self, v: u32) -> Result<()> {
        self.inner.write_all(&v.to_le_bytes()).map_err(AgentError::Io)
    }

    /// Write a little-endian `u64`.
    pub fn write_u64(&mut self, v: u64) -> Result<()> {
        self.inner.write_all(&v.to_le_bytes()).map_err(AgentError::Io)
    }

    /// Write raw octets verbatim.
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.inner.write_all(data).map_err(AgentError::Io)
    }

    /// Write a value that knows how to encode itself.
    pub fn write<T: ToStream>(&mut self, value: &T) -> Result<()> {
        value.to_stream(self)
    }

    /// Write a `vector<T>`: a `u32` element count followed by that many `T`.
    pub fn write_vector<T: ToStream>(&mut self, values: &[T]) -> Result<()> {
        self.write_u32(values.len() as u32)?;
        for v in values {
            v.to_stream(self)?;
        }
        Ok(())
    }

    /// Consume the writer, returning the underlying sink.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// A type that can decode itself from a [`ByteStreamReader`].
pub trait FromStream: Sized {
    /// Decode one value, consuming exactly the octets it needs.
    fn from_stream<R: Read>(reader: &mut ByteStreamReader<R>) -> Result<Self>;
}

/// A type that can encode itself to a [`ByteStreamWriter`].
pub trait ToStream {
    /// Encode this value.
    fn to_stream<W: Write>(&self, writer: &mut ByteStreamWriter<W>) -> Result<()>;
}

macro_rules! impl_scalar_stream {
    ($t:ty, $read:ident, $write:ident) => {
        impl FromStream for $t {
            fn from_stream<R: Read>(reader: &mut ByteStreamReader<R>) -> Result<Self> {
                reader.$read()
            }
        }
        impl ToStream for $t {
            fn to_stream<W: Write>(&self, writer: &mut ByteStreamWriter<W>) -> Result<()> {
                writer.$write(*self)
            }
        }
    };
}

impl_scalar_stream!(u8, read_u8, write_u8);
impl_scalar_stream!(u16, read_u16, write_u16);
impl_scalar_stream!(u32, read_u32, write_u32);
impl_scalar_stream!(u64, read_u64, write_u64);

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn scalars_round_trip() {
        let mut buf = Vec::new();
        {
            let mut w = ByteStreamWriter::new(&mut buf);
            w.write_u8(0x12).unwrap();
            w.write_u16(0x3456).unwrap();
            w.write_u32(0x789abcde).unwrap();
        }
        let mut r = ByteStreamReader::new(Cursor::new(buf));
        assert_eq!(r.read_u8().unwrap(), 0x12);
        assert_eq!(r.read_u16().unwrap(), 0x3456);
        assert_eq!(r.read_u32().unwrap(), 0x789abcde);
    }

    #[test]
    fn truncated_read_is_eos() {
        let mut r = ByteStreamReader::new(Cursor::new(vec![0x01]));
        assert!(matches!(r.read_u32(), Err(AgentError::DecodeEos)));
    }

    #[test]
    fn vector_round_trip() {
        let mut buf = Vec::new();
        {
            let mut w = ByteStreamWriter::new(&mut buf);
            w.write_vector(&[1u32, 2, 3, 4]).unwrap();
        }
        let mut r = ByteStreamReader::new(Cursor::new(buf));
        let values: Vec<u32> = r.read_vector().unwrap();
        assert_eq!(values, vec![1, 2, 3, 4]);
    }
}
