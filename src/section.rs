//! Section descriptors: the 76-byte records that chain together a segment
//! file's payload sections (§3, §6).
//!
//! The parser treats the type string as a closed set of known tags; an
//! unrecognized tag is kept as [`SectionType::Other`] rather than rejected,
//! since future format revisions are expected to add optional sections a
//! reader can safely skip.

use std::io::{Read, Write};

use crate::checksum::adler32;
use crate::error::{EwfError, Result};

pub const SECTION_HEADER_SIZE: u64 = 76;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionType {
    Header,
    Header2,
    XHeader,
    Volume,
    Disk,
    Sectors,
    DeltaSectors,
    Table,
    Table2,
    Ltree,
    Session,
    Error2,
    Hash,
    Digest,
    Next,
    Done,
    Other(String),
}

impl SectionType {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "header" => SectionType::Header,
            "header2" => SectionType::Header2,
            "xheader" => SectionType::XHeader,
            "volume" => SectionType::Volume,
            "disk" => SectionType::Disk,
            "sectors" => SectionType::Sectors,
            "delta_sectors" => SectionType::DeltaSectors,
            "table" => SectionType::Table,
            "table2" => SectionType::Table2,
            "ltree" => SectionType::Ltree,
            "session" => SectionType::Session,
            "error2" => SectionType::Error2,
            "hash" => SectionType::Hash,
            "digest" => SectionType::Digest,
            "next" => SectionType::Next,
            "done" => SectionType::Done,
            other => SectionType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            SectionType::Header => "header",
            SectionType::Header2 => "header2",
            SectionType::XHeader => "xheader",
            SectionType::Volume => "volume",
            SectionType::Disk => "disk",
            SectionType::Sectors => "sectors",
            SectionType::DeltaSectors => "delta_sectors",
            SectionType::Table => "table",
            SectionType::Table2 => "table2",
            SectionType::Ltree => "ltree",
            SectionType::Session => "session",
            SectionType::Error2 => "error2",
            SectionType::Hash => "hash",
            SectionType::Digest => "digest",
            SectionType::Next => "next",
            SectionType::Done => "done",
            SectionType::Other(s) => s.as_str(),
        }
    }
}

/// A decoded 76-byte section descriptor, plus the absolute file offset it
/// was read from (used by the table decoder to compute the last entry's
/// stored size against the following section).
#[derive(Debug, Clone)]
pub struct SectionHeader {
    pub section_type: SectionType,
    pub offset: u64,
    pub next_offset: u64,
    pub size: u64,
}

impl SectionHeader {
    /// Reads a 76-byte descriptor starting at the current position of
    /// `reader`. `offset` is the absolute file position the descriptor was
    /// read from, recorded for error messages and for computing payload
    /// bounds.
    pub fn read(reader: &mut impl Read, offset: u64, segment_number: u16) -> Result<Self> {
        let mut raw = [0u8; SECTION_HEADER_SIZE as usize];
        reader.read_exact(&mut raw).map_err(|e| {
            EwfError::io(format!("segment {segment_number}"), e)
        })?;

        let mut type_bytes = [0u8; 16];
        type_bytes.copy_from_slice(&raw[0..16]);
        let nul = type_bytes.iter().position(|&b| b == 0).unwrap_or(16);
        let type_str = String::from_utf8_lossy(&type_bytes[..nul]).into_owned();

        let next_offset = u64::from_le_bytes(raw[16..24].try_into().unwrap());
        let size = u64::from_le_bytes(raw[24..32].try_into().unwrap());
        let stored_checksum = u32::from_le_bytes(raw[72..76].try_into().unwrap());

        let computed = adler32(&raw[0..72]);
        if computed != stored_checksum {
            return Err(EwfError::CorruptSection {
                segment: segment_number,
                offset,
                section_type: type_str,
                reason: format!(
                    "descriptor checksum mismatch: stored 0x{stored_checksum:08x}, computed 0x{computed:08x}"
                ),
            });
        }

        if size < SECTION_HEADER_SIZE {
            return Err(EwfError::CorruptSection {
                segment: segment_number,
                offset,
                section_type: type_str,
                reason: format!("section size {size} smaller than the descriptor itself"),
            });
        }

        Ok(SectionHeader {
            section_type: SectionType::parse(&type_str),
            offset,
            next_offset,
            size,
        })
    }

    /// Absolute offset of the first payload byte.
    pub fn payload_offset(&self) -> u64 {
        self.offset + SECTION_HEADER_SIZE
    }

    /// Payload length (`size` includes the 76-byte descriptor itself).
    pub fn payload_len(&self) -> u64 {
        self.size - SECTION_HEADER_SIZE
    }

    /// Serializes and writes a section descriptor, returning the bytes
    /// written (always 76).
    pub fn write(
        writer: &mut impl Write,
        section_type: &str,
        next_offset: u64,
        size: u64,
    ) -> Result<()> {
        let mut raw = [0u8; SECTION_HEADER_SIZE as usize];
        let type_bytes = section_type.as_bytes();
        raw[0..type_bytes.len().min(16)].copy_from_slice(&type_bytes[..type_bytes.len().min(16)]);
        raw[16..24].copy_from_slice(&next_offset.to_le_bytes());
        raw[24..32].copy_from_slice(&size.to_le_bytes());
        // raw[32..72] is the zeroed padding.
        let checksum = adler32(&raw[0..72]);
        raw[72..76].copy_from_slice(&checksum.to_le_bytes());
        writer
            .write_all(&raw)
            .map_err(|e| EwfError::io("section descriptor", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trips_through_write_and_read() {
        let mut buf = Vec::new();
        SectionHeader::write(&mut buf, "sectors", 1234, 5678).unwrap();
        assert_eq!(buf.len(), 76);

        let mut cursor = Cursor::new(buf);
        let header = SectionHeader::read(&mut cursor, 0, 1).unwrap();
        assert_eq!(header.section_type, SectionType::Sectors);
        assert_eq!(header.next_offset, 1234);
        assert_eq!(header.size, 5678);
        assert_eq!(header.payload_len(), 5678 - 76);
    }

    #[test]
    fn detects_corrupted_checksum() {
        let mut buf = Vec::new();
        SectionHeader::write(&mut buf, "table", 100, 200).unwrap();
        buf[72] ^= 0xff; // flip a checksum byte
        let mut cursor = Cursor::new(buf);
        let err = SectionHeader::read(&mut cursor, 0, 1).unwrap_err();
        assert!(matches!(err, EwfError::CorruptSection { .. }));
    }

    #[test]
    fn unknown_type_is_preserved() {
        assert_eq!(SectionType::parse("rt"), SectionType::Other("rt".into()));
    }
}
