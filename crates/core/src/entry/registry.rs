//! Type id dispatch table
//!
//! Built once at startup and shared read-only afterwards. Decoding an id
//! that was never registered is a hard failure: without the codec the
//! reader cannot tell what the payload means.

use super::codec::{CodecError, EntryCodec};
use super::{CommandEntry, ConfigurationEntry, Entry, EntryType, InitializeEntry};
use crate::error::{Error, Result};
use std::io::{self, Cursor, Write};

type DecodeFn = fn(&mut Cursor<&[u8]>) -> std::result::Result<Entry, CodecError>;

fn decode_as<T: EntryCodec + Into<Entry>>(
    input: &mut Cursor<&[u8]>,
) -> std::result::Result<Entry, CodecError> {
    T::decode(input).map(Into::into)
}

/// Maps on-disk type ids to payload decoders.
#[derive(Clone)]
pub struct EntryRegistry {
    decoders: [Option<DecodeFn>; 256],
}

impl EntryRegistry {
    /// A registry with no types registered
    pub fn empty() -> Self {
        EntryRegistry {
            decoders: [None; 256],
        }
    }

    /// A registry with every built-in entry type registered
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        for ty in EntryType::ALL {
            registry.register(ty);
        }
        registry
    }

    /// Register the codec for an entry type
    pub fn register(&mut self, ty: EntryType) -> &mut Self {
        let decoder: DecodeFn = match ty {
            EntryType::Initialize => decode_as::<InitializeEntry>,
            EntryType::Configuration => decode_as::<ConfigurationEntry>,
            EntryType::Command => decode_as::<CommandEntry>,
        };
        self.decoders[ty.id() as usize] = Some(decoder);
        self
    }

    /// Whether a type id has a registered codec
    pub fn is_registered(&self, type_id: u8) -> bool {
        self.decoders[type_id as usize].is_some()
    }

    /// Serialize `entry` as `type_id:u8 | payload`.
    pub fn encode<W: Write>(&self, entry: &Entry, out: &mut W) -> io::Result<()> {
        out.write_all(&[entry.entry_type().id()])?;
        match entry {
            Entry::Initialize(e) => e.encode(out),
            Entry::Configuration(e) => e.encode(out),
            Entry::Command(e) => e.encode(out),
        }
    }

    /// Decode a payload for `type_id`.
    ///
    /// `offset` is only used to label corruption errors.
    pub fn decode(&self, type_id: u8, payload: &[u8], offset: u64) -> Result<Entry> {
        let decoder = self.decoders[type_id as usize].ok_or(Error::UnregisteredEntryType(type_id))?;
        let mut cursor = Cursor::new(payload);
        let entry = decoder(&mut cursor).map_err(|e| Error::corrupted(offset, e.to_string()))?;
        let remaining = payload.len() - cursor.position() as usize;
        if remaining > 0 {
            return Err(Error::corrupted(
                offset,
                CodecError::TrailingBytes(remaining).to_string(),
            ));
        }
        Ok(entry)
    }
}

impl Default for EntryRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl std::fmt::Debug for EntryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<u8> = (0..=255u8).filter(|id| self.is_registered(*id)).collect();
        f.debug_struct("EntryRegistry")
            .field("registered", &ids)
            .finish()
    }
}
