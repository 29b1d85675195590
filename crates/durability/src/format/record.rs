//! Entry record layout.
//!
//! # Binary Format (big-endian)
//!
//! ```text
//! index(8) + term_flag(1) + [term(8) if term_flag == 1] + length(4) + type_id(1) + payload(length - 1)
//! ```
//!
//! `length` covers the type id and payload. The term is written only when
//! it is greater than the previous record's term in the same segment; a
//! record without a term inherits the previous one. An index field of zero
//! marks the end of written data, which is why truncation zero-fills.

use byteorder::{BigEndian, ByteOrder};

/// Header size when the term is omitted.
pub const MIN_HEADER_SIZE: usize = 8 + 1 + 4;

/// Header size when the term is present.
pub const MAX_HEADER_SIZE: usize = 8 + 1 + 8 + 4;

/// Parsed record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Entry index
    pub index: u64,
    /// Term, when the record carries a term change
    pub term: Option<u64>,
    /// Length of type id plus payload
    pub length: u32,
}

impl RecordHeader {
    /// Encoded header size.
    pub fn header_len(&self) -> usize {
        if self.term.is_some() {
            MAX_HEADER_SIZE
        } else {
            MIN_HEADER_SIZE
        }
    }

    /// Full record size, header included.
    pub fn record_len(&self) -> u64 {
        self.header_len() as u64 + self.length as u64
    }

    /// Append the encoded header to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        let mut buf = [0u8; MAX_HEADER_SIZE];
        BigEndian::write_u64(&mut buf[0..8], self.index);
        let len = match self.term {
            Some(term) => {
                buf[8] = 1;
                BigEndian::write_u64(&mut buf[9..17], term);
                BigEndian::write_u32(&mut buf[17..21], self.length);
                MAX_HEADER_SIZE
            }
            None => {
                buf[8] = 0;
                BigEndian::write_u32(&mut buf[9..13], self.length);
                MIN_HEADER_SIZE
            }
        };
        out.extend_from_slice(&buf[..len]);
    }
}

/// Outcome of parsing a header from raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderParse {
    /// A complete header
    Header(RecordHeader),
    /// Index field is zero: no more records
    End,
    /// Not enough bytes for the header
    Incomplete,
    /// Term flag byte is neither 0 nor 1
    BadTermFlag(u8),
}

/// Parse a header from the start of `buf`.
pub fn parse_header(buf: &[u8]) -> HeaderParse {
    if buf.len() < 8 {
        // A zeroed tail shorter than an index still ends the data
        if !buf.is_empty() && buf.iter().all(|b| *b == 0) {
            return HeaderParse::End;
        }
        return HeaderParse::Incomplete;
    }
    let index = BigEndian::read_u64(&buf[0..8]);
    if index == 0 {
        return HeaderParse::End;
    }
    if buf.len() < 9 {
        return HeaderParse::Incomplete;
    }
    match buf[8] {
        0 => {
            if buf.len() < MIN_HEADER_SIZE {
                return HeaderParse::Incomplete;
            }
            HeaderParse::Header(RecordHeader {
                index,
                term: None,
                length: BigEndian::read_u32(&buf[9..13]),
            })
        }
        1 => {
            if buf.len() < MAX_HEADER_SIZE {
                return HeaderParse::Incomplete;
            }
            HeaderParse::Header(RecordHeader {
                index,
                term: Some(BigEndian::read_u64(&buf[9..17])),
                length: BigEndian::read_u32(&buf[17..21]),
            })
        }
        other => HeaderParse::BadTermFlag(other),
    }
}
