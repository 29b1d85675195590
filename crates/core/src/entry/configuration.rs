//! Configuration change entry.

use super::codec::{read_bytes, write_bytes, CodecError, EntryCodec};
use super::EntryType;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// Compaction key shared by every configuration entry, so that each new
/// configuration supersedes the previous one.
pub const CONFIGURATION_KEY: &[u8] = b"\0configuration";

/// Role of a cluster member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberType {
    /// Full voting member
    Active,
    /// Receives replicated entries but does not vote
    Passive,
    /// Standby member that receives only configuration changes
    Reserve,
}

impl MemberType {
    fn to_byte(self) -> u8 {
        match self {
            MemberType::Active => 1,
            MemberType::Passive => 2,
            MemberType::Reserve => 3,
        }
    }

    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(MemberType::Active),
            2 => Some(MemberType::Passive),
            3 => Some(MemberType::Reserve),
            _ => None,
        }
    }
}

/// One cluster member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// Member id
    pub id: u64,
    /// Member role
    pub member_type: MemberType,
    /// Network address, opaque to the log
    pub address: String,
}

impl Member {
    /// Create a new member
    pub fn new(id: u64, member_type: MemberType, address: impl Into<String>) -> Self {
        Member {
            id,
            member_type,
            address: address.into(),
        }
    }
}

/// Cluster membership change.
///
/// Layout:
/// ```text
/// timestamp:u64 | count:u32 | count x (id:u64 | type:u8 | addr_len:u32 | addr)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationEntry {
    /// Leader wall-clock time in milliseconds since the epoch
    pub timestamp: u64,
    /// Full member list after the change
    pub members: Vec<Member>,
}

impl ConfigurationEntry {
    /// Create a new configuration entry
    pub fn new(timestamp: u64, members: Vec<Member>) -> Self {
        ConfigurationEntry { timestamp, members }
    }
}

impl EntryCodec for ConfigurationEntry {
    const TYPE: EntryType = EntryType::Configuration;

    fn encode<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_u64::<BigEndian>(self.timestamp)?;
        let count = u32::try_from(self.members.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many members"))?;
        out.write_u32::<BigEndian>(count)?;
        for member in &self.members {
            out.write_u64::<BigEndian>(member.id)?;
            out.write_u8(member.member_type.to_byte())?;
            write_bytes(out, member.address.as_bytes())?;
        }
        Ok(())
    }

    fn decode<R: Read>(input: &mut R) -> Result<Self, CodecError> {
        let timestamp = input.read_u64::<BigEndian>()?;
        let count = input.read_u32::<BigEndian>()?;
        let mut members = Vec::new();
        for _ in 0..count {
            let id = input.read_u64::<BigEndian>()?;
            let raw_type = input.read_u8()?;
            let member_type =
                MemberType::from_byte(raw_type).ok_or(CodecError::InvalidValue {
                    field: "member_type",
                    value: raw_type as u64,
                })?;
            let address = String::from_utf8(read_bytes(input)?)
                .map_err(|_| CodecError::InvalidUtf8("address"))?;
            members.push(Member {
                id,
                member_type,
                address,
            });
        }
        Ok(ConfigurationEntry { timestamp, members })
    }
}
