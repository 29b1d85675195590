//! Initialize entry: appended by a leader at the start of its term.

use super::codec::{CodecError, EntryCodec};
use super::EntryType;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// Marks the beginning of a leader's term.
///
/// Layout: `timestamp:u64`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitializeEntry {
    /// Leader wall-clock time in milliseconds since the epoch
    pub timestamp: u64,
}

impl InitializeEntry {
    /// Create a new initialize entry
    pub fn new(timestamp: u64) -> Self {
        InitializeEntry { timestamp }
    }
}

impl EntryCodec for InitializeEntry {
    const TYPE: EntryType = EntryType::Initialize;

    fn encode<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_u64::<BigEndian>(self.timestamp)
    }

    fn decode<R: Read>(input: &mut R) -> Result<Self, CodecError> {
        Ok(InitializeEntry {
            timestamp: input.read_u64::<BigEndian>()?,
        })
    }
}
