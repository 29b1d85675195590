//! Per-variant entry codec.
//!
//! Every entry variant serializes its payload with a fixed, big-endian
//! layout. Encoding is deterministic: the same logical entry always
//! produces the same bytes.

use super::EntryType;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// Payload codec implemented by each entry variant.
pub trait EntryCodec: Sized {
    /// Type tag written in front of the payload.
    const TYPE: EntryType;

    /// Serialize the payload (without the type id).
    fn encode<W: Write>(&self, out: &mut W) -> io::Result<()>;

    /// Deserialize a payload produced by [`EntryCodec::encode`].
    fn decode<R: Read>(input: &mut R) -> Result<Self, CodecError>;
}

/// Payload decode errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Payload ended before all fields were read
    #[error("Payload truncated")]
    Truncated,

    /// Payload had bytes left over after the last field
    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),

    /// A field held a value outside its domain
    #[error("Invalid {field}: {value}")]
    InvalidValue {
        /// Field name
        field: &'static str,
        /// Offending raw value
        value: u64,
    },

    /// A string field was not valid UTF-8
    #[error("Invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    /// Any other read failure
    #[error("Read error: {0}")]
    Io(String),
}

impl From<io::Error> for CodecError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            CodecError::Truncated
        } else {
            CodecError::Io(e.to_string())
        }
    }
}

/// Write a length-prefixed (u32) byte string.
pub(crate) fn write_bytes<W: Write>(out: &mut W, bytes: &[u8]) -> io::Result<()> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "field longer than u32::MAX"))?;
    out.write_u32::<BigEndian>(len)?;
    out.write_all(bytes)
}

/// Read a length-prefixed (u32) byte string.
pub(crate) fn read_bytes<R: Read>(input: &mut R) -> Result<Vec<u8>, CodecError> {
    let len = input.read_u32::<BigEndian>()? as usize;
    // Grow as bytes arrive so a corrupt length cannot force a huge allocation.
    let mut bytes = Vec::new();
    let read = input.take(len as u64).read_to_end(&mut bytes)?;
    if read != len {
        return Err(CodecError::Truncated);
    }
    Ok(bytes)
}
