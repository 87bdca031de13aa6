//! Binary data-stream primitives and the pluggable value codec.
//!
//! Sessions are shipped to the grid as big-endian data streams. Scalars and
//! attribute names use the fixed encodings in [`DataOutputExt`] and
//! [`DataInputExt`]; attribute values are opaque to this crate and go
//! through a [`ValueCodec`], so a deployment can swap the value format
//! without touching the session layout.

use std::fmt;
use std::io::{self, Read, Write};

use serde_json::Value;

use crate::error::{Error, Result};

/// Longest text (in UTF-8 bytes) a single `write_utf` can carry.
pub const MAX_UTF_LEN: usize = u16::MAX as usize;

/// Write side of the data-stream encoding.
pub trait DataOutputExt: Write {
    /// Write text as a u16 byte length followed by UTF-8 bytes.
    fn write_utf(&mut self, s: &str) -> Result<()> {
        let bytes = s.as_bytes();
        let len = u16::try_from(bytes.len()).map_err(|_| Error::TextTooLong { len: bytes.len() })?;
        self.write_all(&len.to_be_bytes())?;
        self.write_all(bytes)?;
        Ok(())
    }

    /// Write a big-endian i64.
    fn write_i64(&mut self, value: i64) -> Result<()> {
        self.write_all(&value.to_be_bytes())?;
        Ok(())
    }

    /// Write a big-endian i32.
    fn write_i32(&mut self, value: i32) -> Result<()> {
        self.write_all(&value.to_be_bytes())?;
        Ok(())
    }

    /// Write a collection size as an i32 count.
    fn write_count(&mut self, count: usize) -> Result<()> {
        let count = i32::try_from(count).map_err(|_| {
            Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("count {count} exceeds i32 range"),
            ))
        })?;
        self.write_i32(count)
    }
}

impl<W: Write + ?Sized> DataOutputExt for W {}

/// Read side of the data-stream encoding.
pub trait DataInputExt: Read {
    /// Read text written by [`DataOutputExt::write_utf`].
    fn read_utf(&mut self) -> Result<String> {
        let mut len = [0u8; 2];
        self.read_exact(&mut len)?;
        let mut buf = vec![0u8; u16::from_be_bytes(len) as usize];
        self.read_exact(&mut buf)?;
        String::from_utf8(buf)
            .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::InvalidData, e)))
    }

    /// Read a big-endian i64.
    fn read_i64(&mut self) -> Result<i64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(i64::from_be_bytes(buf))
    }

    /// Read a big-endian i32.
    fn read_i32(&mut self) -> Result<i32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(i32::from_be_bytes(buf))
    }

    /// Read an i32 count, rejecting negative values.
    fn read_count(&mut self, field: &'static str) -> Result<usize> {
        let count = self.read_i32()?;
        usize::try_from(count).map_err(|_| Error::InvalidLength { field, len: count })
    }
}

impl<R: Read + ?Sized> DataInputExt for R {}

/// Serializes arbitrary attribute values.
///
/// This is the "write object / read object" half of the grid's
/// serialization contract. Implementations must be able to read back
/// anything they write.
pub trait ValueCodec: Send + Sync + fmt::Debug {
    /// Write one value to the stream.
    fn write_value(&self, value: &Value, out: &mut dyn Write) -> Result<()>;

    /// Read one value from the stream.
    fn read_value(&self, input: &mut dyn Read) -> Result<Value>;
}

/// Default codec: i32 length prefix followed by JSON bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonValueCodec;

impl ValueCodec for JsonValueCodec {
    fn write_value(&self, value: &Value, out: &mut dyn Write) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        out.write_count(bytes.len())?;
        out.write_all(&bytes)?;
        Ok(())
    }

    fn read_value(&self, input: &mut dyn Read) -> Result<Value> {
        let len = input.read_count("value length")?;
        let mut buf = vec![0u8; len];
        input.read_exact(&mut buf)?;
        Ok(serde_json::from_slice(&buf)?)
    }
}

/// Incremental (delta) serialization.
///
/// A type implementing `Delta` tracks what changed since the last flush.
/// `to_delta` writes only those changes and clears the tracking;
/// `from_delta` applies changes produced by a peer's `to_delta` without
/// marking them as local changes.
pub trait Delta {
    /// Whether there are changes not yet written by `to_delta`.
    fn has_delta(&self) -> bool;

    /// Write pending changes and clear the change tracking.
    fn to_delta(&self, out: &mut dyn Write, codec: &dyn ValueCodec) -> Result<()>;

    /// Apply changes written by a peer's `to_delta`.
    fn from_delta(&self, input: &mut dyn Read, codec: &dyn ValueCodec) -> Result<()>;
}
