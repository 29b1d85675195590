//! Binary on-disk formats for segment files.
//!
//! A segment file is a 64-byte descriptor followed by entry records.

pub mod descriptor;
pub mod record;

pub use descriptor::{
    parse_segment_file_name, segment_file_name, DescriptorError, SegmentDescriptor,
    DESCRIPTOR_FORMAT_VERSION, DESCRIPTOR_MAGIC, DESCRIPTOR_SIZE,
};
pub use record::{parse_header, HeaderParse, RecordHeader, MAX_HEADER_SIZE, MIN_HEADER_SIZE};
