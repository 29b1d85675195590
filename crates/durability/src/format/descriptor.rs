//! Segment descriptor header.
//!
//! Every segment file starts with a fixed 64-byte descriptor. The
//! `(id, version)` pair names the segment; major and minor compaction write
//! a new version of the same id, so recovery keeps only the highest version
//! per id. A descriptor that was never locked belongs to a file that was
//! still being produced when the process stopped.
//!
//! # Binary Format (64 bytes, big-endian)
//!
//! ```text
//! magic("RLSG", 4) + format_version(4) + id(8) + version(8)
//! + starting_index(8) + end_index(8) + max_segment_size(8) + max_entries(4)
//! + locked(1) + reserved(7) + crc32(4) = 64 bytes
//! ```

use byteorder::{BigEndian, ByteOrder};

/// Magic bytes for segment files.
pub const DESCRIPTOR_MAGIC: &[u8; 4] = b"RLSG";

/// Current descriptor format version.
pub const DESCRIPTOR_FORMAT_VERSION: u32 = 1;

/// Serialized descriptor size; records start at this offset.
pub const DESCRIPTOR_SIZE: usize = 64;

const CRC_OFFSET: usize = DESCRIPTOR_SIZE - 4;

/// Segment identity and capacity, persisted in the file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentDescriptor {
    /// Segment id; stable across compaction rewrites
    pub id: u64,
    /// Descriptor version; bumped on every rewrite
    pub version: u64,
    /// Index of the first entry the segment may hold
    pub starting_index: u64,
    /// Last index covered once sealed; 0 while open for appends
    pub end_index: u64,
    /// Capacity in bytes, header included
    pub max_segment_size: u64,
    /// Capacity in entries
    pub max_entries: u32,
    /// Set once the file is complete and may be installed
    pub locked: bool,
}

impl SegmentDescriptor {
    /// Create an unlocked, open descriptor.
    pub fn new(
        id: u64,
        version: u64,
        starting_index: u64,
        max_segment_size: u64,
        max_entries: u32,
    ) -> Self {
        SegmentDescriptor {
            id,
            version,
            starting_index,
            end_index: 0,
            max_segment_size,
            max_entries,
            locked: false,
        }
    }

    /// Whether the segment covers a fixed index range.
    pub fn is_sealed(&self) -> bool {
        self.end_index != 0
    }

    /// Serialize to the 64-byte header.
    pub fn to_bytes(&self) -> [u8; DESCRIPTOR_SIZE] {
        let mut buf = [0u8; DESCRIPTOR_SIZE];
        buf[0..4].copy_from_slice(DESCRIPTOR_MAGIC);
        BigEndian::write_u32(&mut buf[4..8], DESCRIPTOR_FORMAT_VERSION);
        BigEndian::write_u64(&mut buf[8..16], self.id);
        BigEndian::write_u64(&mut buf[16..24], self.version);
        BigEndian::write_u64(&mut buf[24..32], self.starting_index);
        BigEndian::write_u64(&mut buf[32..40], self.end_index);
        BigEndian::write_u64(&mut buf[40..48], self.max_segment_size);
        BigEndian::write_u32(&mut buf[48..52], self.max_entries);
        buf[52] = self.locked as u8;
        let crc = crc32fast::hash(&buf[..CRC_OFFSET]);
        BigEndian::write_u32(&mut buf[CRC_OFFSET..], crc);
        buf
    }

    /// Parse and validate a header.
    pub fn from_bytes(data: &[u8]) -> Result<Self, DescriptorError> {
        if data.len() < DESCRIPTOR_SIZE {
            return Err(DescriptorError::TooShort(data.len()));
        }
        let data = &data[..DESCRIPTOR_SIZE];
        if &data[0..4] != DESCRIPTOR_MAGIC {
            return Err(DescriptorError::InvalidMagic);
        }
        let stored_crc = BigEndian::read_u32(&data[CRC_OFFSET..]);
        let computed_crc = crc32fast::hash(&data[..CRC_OFFSET]);
        if stored_crc != computed_crc {
            return Err(DescriptorError::ChecksumMismatch {
                expected: stored_crc,
                computed: computed_crc,
            });
        }
        let format_version = BigEndian::read_u32(&data[4..8]);
        if format_version != DESCRIPTOR_FORMAT_VERSION {
            return Err(DescriptorError::UnsupportedVersion(format_version));
        }
        Ok(SegmentDescriptor {
            id: BigEndian::read_u64(&data[8..16]),
            version: BigEndian::read_u64(&data[16..24]),
            starting_index: BigEndian::read_u64(&data[24..32]),
            end_index: BigEndian::read_u64(&data[32..40]),
            max_segment_size: BigEndian::read_u64(&data[40..48]),
            max_entries: BigEndian::read_u32(&data[48..52]),
            locked: data[52] != 0,
        })
    }

    /// Segment file name for this descriptor.
    pub fn file_name(&self, log_name: &str) -> String {
        segment_file_name(log_name, self.id, self.version)
    }
}

/// `{log_name}-{id}-{version}.log`
pub fn segment_file_name(log_name: &str, id: u64, version: u64) -> String {
    format!("{}-{}-{}.log", log_name, id, version)
}

/// Parse `(id, version)` out of a segment file name belonging to `log_name`.
///
/// The log name itself may contain dashes, so the id and version are taken
/// from the right.
pub fn parse_segment_file_name(log_name: &str, file_name: &str) -> Option<(u64, u64)> {
    let rest = file_name.strip_suffix(".log")?;
    let rest = rest.strip_prefix(log_name)?.strip_prefix('-')?;
    let (id, version) = rest.split_once('-')?;
    Some((id.parse().ok()?, version.parse().ok()?))
}

/// Descriptor validation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DescriptorError {
    /// Fewer than 64 bytes available
    #[error("Descriptor too short: {0} bytes")]
    TooShort(usize),

    /// Magic bytes do not match
    #[error("Invalid descriptor magic")]
    InvalidMagic,

    /// Header CRC mismatch
    #[error("Descriptor checksum mismatch: expected {expected:08x}, computed {computed:08x}")]
    ChecksumMismatch {
        /// CRC stored in the header
        expected: u32,
        /// CRC computed over the header bytes
        computed: u32,
    },

    /// Written by a newer format
    #[error("Unsupported descriptor format version {0}")]
    UnsupportedVersion(u32),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SegmentDescriptor {
        let mut d = SegmentDescriptor::new(3, 2, 1001, 32 * 1024 * 1024, 1024);
        d.locked = true;
        d
    }

    #[test]
    fn test_roundtrip() {
        let d = sample();
        let bytes = d.to_bytes();
        assert_eq!(&bytes[0..4], DESCRIPTOR_MAGIC);
        assert_eq!(SegmentDescriptor::from_bytes(&bytes).unwrap(), d);
    }

    #[test]
    fn test_sealed() {
        let mut d = sample();
        assert!(!d.is_sealed());
        d.end_index = 2000;
        assert!(d.is_sealed());
        let parsed = SegmentDescriptor::from_bytes(&d.to_bytes()).unwrap();
        assert_eq!(parsed.end_index, 2000);
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = sample().to_bytes();
        bytes[0] = b'X';
        assert_eq!(
            SegmentDescriptor::from_bytes(&bytes),
            Err(DescriptorError::InvalidMagic)
        );
    }

    #[test]
    fn test_crc_detects_flip() {
        let mut bytes = sample().to_bytes();
        bytes[20] ^= 0x01;
        assert!(matches!(
            SegmentDescriptor::from_bytes(&bytes),
            Err(DescriptorError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_too_short() {
        assert_eq!(
            SegmentDescriptor::from_bytes(&[0u8; 10]),
            Err(DescriptorError::TooShort(10))
        );
    }

    #[test]
    fn test_file_names() {
        assert_eq!(segment_file_name("raft-log", 7, 3), "raft-log-7-3.log");
        assert_eq!(parse_segment_file_name("raft-log", "raft-log-7-3.log"), Some((7, 3)));
        assert_eq!(parse_segment_file_name("raft", "raft-log-7-3.log"), None);
        assert_eq!(parse_segment_file_name("raft-log", "raft-log-7.log"), None);
        assert_eq!(parse_segment_file_name("raft-log", "raft-log-7-3.tmp"), None);
        assert_eq!(parse_segment_file_name("raft-log", "other-7-3.log"), None);
    }
}
