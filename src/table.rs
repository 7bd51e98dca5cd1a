//! The chunk-table index: logical chunk → physical locator (§3, §4.3).
//!
//! A `table` section lists, for each chunk it covers, an offset relative to
//! a `base_offset` with the high bit marking "compressed". The size of
//! every entry except the last is the gap to the next entry; the last
//! entry's size runs to the end of the preceding `sectors` section (or, if
//! the chunks are stored directly inside the table's own segment region,
//! to the following section's offset) — see
//! [`crate::chunk`]'s read path, which never needs the size for anything
//! but framing the compressed-data read.

use crate::checksum::adler32;
use crate::error::{EwfError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkTableEntry {
    pub segment_id: u16,
    pub file_offset: u64,
    pub stored_size: u32,
    pub compressed: bool,
}

/// Whether a table section's entries are followed by a trailing checksum
/// over the whole entry array. Inferred per-section from its declared
/// payload length rather than trusted from a format-version guess (see
/// Open Questions / DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableChecksumMode {
    WithTrailingChecksum,
    WithoutTrailingChecksum,
}

const TABLE_HEADER_LEN: usize = 24; // count(4) + pad(4) + base_offset(8) + pad(4) + checksum(4)

pub struct DecodedTable {
    pub base_offset: u64,
    /// `(raw_offset_with_flag, is_compressed)` pairs, in on-disk order.
    pub raw_entries: Vec<(u32, bool)>,
    pub checksum_mode: TableChecksumMode,
}

/// Decodes a `table`/`table2` payload, validating its header checksum.
/// Does not yet resolve entry sizes — that needs the following section's
/// offset, which the segment parser supplies.
pub fn decode_table_payload(payload: &[u8]) -> Result<DecodedTable> {
    if payload.len() < TABLE_HEADER_LEN {
        return Err(EwfError::CorruptSection {
            segment: 0,
            offset: 0,
            section_type: "table".into(),
            reason: "payload shorter than the fixed table header".into(),
        });
    }

    let count = u32::from_le_bytes(payload[0..4].try_into().unwrap()) as usize;
    let base_offset = u64::from_le_bytes(payload[8..16].try_into().unwrap());
    let stored_checksum = u32::from_le_bytes(payload[20..24].try_into().unwrap());

    let computed = adler32(&payload[0..20]);
    if computed != stored_checksum {
        return Err(EwfError::CorruptSection {
            segment: 0,
            offset: 0,
            section_type: "table".into(),
            reason: format!(
                "table header checksum mismatch: stored 0x{stored_checksum:08x}, computed 0x{computed:08x}"
            ),
        });
    }

    let entries_bytes = count
        .checked_mul(4)
        .ok_or_else(|| EwfError::CorruptSection {
            segment: 0,
            offset: 0,
            section_type: "table".into(),
            reason: "entry count overflow".into(),
        })?;
    let entries_end = TABLE_HEADER_LEN + entries_bytes;
    if payload.len() < entries_end {
        return Err(EwfError::CorruptSection {
            segment: 0,
            offset: 0,
            section_type: "table".into(),
            reason: format!("payload too short for {count} entries"),
        });
    }

    let checksum_mode = if payload.len() >= entries_end + 4 {
        TableChecksumMode::WithTrailingChecksum
    } else {
        TableChecksumMode::WithoutTrailingChecksum
    };

    let mut raw_entries = Vec::with_capacity(count);
    for i in 0..count {
        let start = TABLE_HEADER_LEN + i * 4;
        let raw = u32::from_le_bytes(payload[start..start + 4].try_into().unwrap());
        let compressed = (raw & 0x8000_0000) != 0;
        let offset = raw & 0x7fff_ffff;
        raw_entries.push((offset, compressed));
    }

    Ok(DecodedTable {
        base_offset,
        raw_entries,
        checksum_mode,
    })
}

/// Encodes a table payload (without trailing checksum; the writer decides
/// whether to append one based on the target format's convention).
pub fn encode_table_payload(
    base_offset: u64,
    entries: &[(u32, bool)],
    with_trailing_checksum: bool,
) -> Vec<u8> {
    let mut payload = vec![0u8; TABLE_HEADER_LEN];
    payload[0..4].copy_from_slice(&(entries.len() as u32).to_le_bytes());
    payload[8..16].copy_from_slice(&base_offset.to_le_bytes());
    let header_checksum = adler32(&payload[0..20]);
    payload[20..24].copy_from_slice(&header_checksum.to_le_bytes());

    for &(offset, compressed) in entries {
        let mut raw = offset & 0x7fff_ffff;
        if compressed {
            raw |= 0x8000_0000;
        }
        payload.extend_from_slice(&raw.to_le_bytes());
    }

    if with_trailing_checksum {
        let entries_start = TABLE_HEADER_LEN;
        let trailing = adler32(&payload[entries_start..]);
        payload.extend_from_slice(&trailing.to_le_bytes());
    }

    payload
}

/// The full image-wide chunk-table index, accumulated incrementally as
/// segments are parsed (§4.3).
#[derive(Debug, Clone, Default)]
pub struct ChunkTableIndex {
    entries: Vec<ChunkTableEntry>,
}

impl ChunkTableIndex {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, entry: ChunkTableEntry) {
        self.entries.push(entry);
    }

    pub fn get(&self, index: usize) -> Option<&ChunkTableEntry> {
        self.entries.get(index)
    }

    pub fn set(&mut self, index: usize, entry: ChunkTableEntry) {
        if index < self.entries.len() {
            self.entries[index] = entry;
        } else {
            // Only ever reached while appending sequentially during open;
            // the delta overlay overwrites existing entries in place via
            // the branch above.
            self.entries.push(entry);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChunkTableEntry> {
        self.entries.iter()
    }
}

/// Resolves a decoded table's raw entries into [`ChunkTableEntry`] records,
/// given the segment they belong to and the byte offset marking the end of
/// the chunk data area (either the preceding `sectors` section's end, or
/// the table section's own `next_offset` when chunks are inlined).
pub fn resolve_table_entries(
    table: &DecodedTable,
    segment_id: u16,
    data_end_offset: u64,
) -> Result<Vec<ChunkTableEntry>> {
    let n = table.raw_entries.len();
    if n == 0 {
        return Ok(Vec::new());
    }

    let mut resolved = Vec::with_capacity(n);
    for i in 0..n {
        let (offset, compressed) = table.raw_entries[i];
        let file_offset = table.base_offset + offset as u64;

        let next_offset = if i + 1 < n {
            table.base_offset + table.raw_entries[i + 1].0 as u64
        } else {
            data_end_offset
        };

        if next_offset < file_offset {
            return Err(EwfError::CorruptSection {
                segment: segment_id,
                offset: file_offset,
                section_type: "table".into(),
                reason: format!(
                    "table entry {i} is not monotonically increasing (offset {file_offset} > next {next_offset})"
                ),
            });
        }

        let stored_size = (next_offset - file_offset) as u32;
        resolved.push(ChunkTableEntry {
            segment_id,
            file_offset,
            stored_size,
            compressed,
        });
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trips() {
        let entries = vec![(0u32, false), (16384, true), (32000, false)];
        let payload = encode_table_payload(1000, &entries, true);
        let decoded = decode_table_payload(&payload).unwrap();
        assert_eq!(decoded.base_offset, 1000);
        assert_eq!(decoded.raw_entries, entries);
        assert_eq!(decoded.checksum_mode, TableChecksumMode::WithTrailingChecksum);
    }

    #[test]
    fn detects_corrupted_header_checksum() {
        let entries = vec![(0u32, false)];
        let mut payload = encode_table_payload(0, &entries, false);
        payload[20] ^= 0xff;
        assert!(decode_table_payload(&payload).is_err());
    }

    #[test]
    fn resolves_entries_monotonically() {
        let table = DecodedTable {
            base_offset: 100,
            raw_entries: vec![(0, false), (16384, true), (32000, false)],
            checksum_mode: TableChecksumMode::WithoutTrailingChecksum,
        };
        let resolved = resolve_table_entries(&table, 1, 200 + 48000).unwrap();
        assert_eq!(resolved.len(), 3);
        assert_eq!(resolved[0].file_offset, 100);
        assert_eq!(resolved[0].stored_size, 16384);
        assert_eq!(resolved[1].file_offset, 100 + 16384);
        assert!(resolved[1].compressed);
        assert_eq!(resolved[2].file_offset, 100 + 32000);
        assert_eq!(resolved[2].stored_size, (200 + 48000) - (100 + 32000));
    }

    #[test]
    fn index_set_overwrites_in_place_for_delta() {
        let mut index = ChunkTableIndex::default();
        index.push(ChunkTableEntry {
            segment_id: 1,
            file_offset: 0,
            stored_size: 10,
            compressed: false,
        });
        index.set(
            0,
            ChunkTableEntry {
                segment_id: 2,
                file_offset: 99,
                stored_size: 10,
                compressed: true,
            },
        );
        assert_eq!(index.get(0).unwrap().segment_id, 2);
    }
}
