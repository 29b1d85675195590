//! Client command entry.

use super::codec::{read_bytes, write_bytes, CodecError, EntryCodec};
use super::mode::CompactionMode;
use super::EntryType;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// A client operation destined for the state machine.
///
/// The operation bytes are opaque to the log; the state machine decodes
/// them. The compaction mode and key are chosen by whoever builds the
/// command, since only the state machine knows which keys an operation
/// touches.
///
/// Layout:
/// ```text
/// session:u64 | sequence:u64 | timestamp:u64 | mode:u8 | has_key:u8
/// | [key_len:u32 | key] | op_len:u32 | operation
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandEntry {
    /// Client session id
    pub session: u64,
    /// Per-session request sequence number
    pub sequence: u64,
    /// Leader wall-clock time in milliseconds since the epoch
    pub timestamp: u64,
    /// Reclamation policy for this command
    pub mode: CompactionMode,
    /// Compaction key; required for keyed modes to supersede anything
    pub key: Option<Vec<u8>>,
    /// Serialized operation
    pub operation: Vec<u8>,
}

impl CommandEntry {
    /// Create an unkeyed command
    pub fn new(
        session: u64,
        sequence: u64,
        timestamp: u64,
        mode: CompactionMode,
        operation: Vec<u8>,
    ) -> Self {
        CommandEntry {
            session,
            sequence,
            timestamp,
            mode,
            key: None,
            operation,
        }
    }

    /// Attach a compaction key
    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = Some(key.into());
        self
    }
}

impl EntryCodec for CommandEntry {
    const TYPE: EntryType = EntryType::Command;

    fn encode<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_u64::<BigEndian>(self.session)?;
        out.write_u64::<BigEndian>(self.sequence)?;
        out.write_u64::<BigEndian>(self.timestamp)?;
        out.write_u8(self.mode.to_byte())?;
        match &self.key {
            Some(key) => {
                out.write_u8(1)?;
                write_bytes(out, key)?;
            }
            None => out.write_u8(0)?,
        }
        write_bytes(out, &self.operation)
    }

    fn decode<R: Read>(input: &mut R) -> Result<Self, CodecError> {
        let session = input.read_u64::<BigEndian>()?;
        let sequence = input.read_u64::<BigEndian>()?;
        let timestamp = input.read_u64::<BigEndian>()?;

        let raw_mode = input.read_u8()?;
        let mode = CompactionMode::from_byte(raw_mode).ok_or(CodecError::InvalidValue {
            field: "compaction_mode",
            value: raw_mode as u64,
        })?;

        let key = match input.read_u8()? {
            0 => None,
            1 => Some(read_bytes(input)?),
            other => {
                return Err(CodecError::InvalidValue {
                    field: "key_flag",
                    value: other as u64,
                })
            }
        };
        let operation = read_bytes(input)?;

        Ok(CommandEntry {
            session,
            sequence,
            timestamp,
            mode,
            key,
            operation,
        })
    }
}
