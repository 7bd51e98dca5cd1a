//! Chunk I/O: the read/write pipeline that turns a [`crate::table::ChunkTableEntry`]
//! into plain sector bytes and back (§4.4).
//!
//! A stored chunk is either zlib-compressed data (the common case) or the
//! raw sector bytes followed by a 4-byte trailing checksum (when the
//! compressor would have grown the chunk, or compression is disabled).
//! The two are distinguished by the `compressed` flag carried on the table
//! entry, not by inspecting the bytes themselves.

use std::io::Read;

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::checksum::chunk_checksum;
use crate::error::{EwfError, Result};
use crate::io_pool::FilePool;
use crate::table::ChunkTableEntry;

/// Reads and decodes chunk `chunk_index`'s stored bytes via `entry`,
/// verifying the checksum on the uncompressed variant and returning exactly
/// `expected_len` bytes (the last chunk in an image is commonly short).
pub fn read_chunk(
    pool: &FilePool,
    entry: &ChunkTableEntry,
    chunk_index: usize,
    expected_len: usize,
) -> Result<Vec<u8>> {
    let mut stored = vec![0u8; entry.stored_size as usize];
    pool.read_at(entry.segment_id as usize, entry.file_offset, &mut stored)?;

    if entry.compressed {
        let mut decoder = ZlibDecoder::new(&stored[..]);
        let mut out = Vec::with_capacity(expected_len);
        decoder
            .read_to_end(&mut out)
            .map_err(|e| EwfError::DecompressError {
                chunk_index,
                reason: e.to_string(),
            })?;
        Ok(out)
    } else {
        if stored.len() < 4 {
            return Err(EwfError::CorruptSection {
                segment: entry.segment_id,
                offset: entry.file_offset,
                section_type: "sectors".into(),
                reason: "stored chunk shorter than its trailing checksum".into(),
            });
        }
        let split = stored.len() - 4;
        let (data, checksum_bytes) = stored.split_at(split);
        let stored_checksum = u32::from_le_bytes(checksum_bytes.try_into().unwrap());
        let computed = chunk_checksum(data);
        if computed != stored_checksum {
            return Err(EwfError::ChecksumError {
                chunk_index,
                expected: stored_checksum,
                actual: computed,
            });
        }
        Ok(data.to_vec())
    }
}

fn is_all_zero(data: &[u8]) -> bool {
    data.iter().all(|&b| b == 0)
}

/// Compresses (or, if that would not shrink the chunk, checksum-frames)
/// `data` for storage, returning the bytes to write and whether the
/// `compressed` flag should be set on the resulting table entry.
///
/// When `empty_block_compression` is set, an all-zero chunk is always
/// stored compressed (§4.4 write path step 2), even if `compression` is
/// otherwise `none` — deflate is attempted at `Compression::fast()` just
/// for that chunk rather than left at the configured level.
pub fn encode_chunk(
    data: &[u8],
    compression: Compression,
    empty_block_compression: bool,
) -> Result<(Vec<u8>, bool)> {
    let all_zero = empty_block_compression && is_all_zero(data);
    let level = if all_zero && compression == Compression::none() {
        Compression::fast()
    } else {
        compression
    };

    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len()), level);
    std::io::Write::write_all(&mut encoder, data)
        .map_err(|e| EwfError::io("chunk encode buffer", e))?;
    let compressed = encoder
        .finish()
        .map_err(|e| EwfError::io("chunk encode buffer", e))?;

    if all_zero || compressed.len() < data.len() {
        Ok((compressed, true))
    } else {
        let mut framed = Vec::with_capacity(data.len() + 4);
        framed.extend_from_slice(data);
        framed.extend_from_slice(&chunk_checksum(data).to_le_bytes());
        Ok((framed, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn pool_with(data: &[u8]) -> (FilePool, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg.bin");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(data).unwrap();
        (FilePool::new(vec![path], false), dir)
    }

    #[test]
    fn round_trips_compressed_chunk() {
        let original = vec![7u8; 16384];
        let (stored, compressed) = encode_chunk(&original, Compression::default(), false).unwrap();
        assert!(compressed);

        let (pool, _dir) = pool_with(&stored);
        let entry = ChunkTableEntry {
            segment_id: 0,
            file_offset: 0,
            stored_size: stored.len() as u32,
            compressed: true,
        };
        let decoded = read_chunk(&pool, &entry, 0, original.len()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn round_trips_uncompressible_chunk_with_checksum() {
        let original: Vec<u8> = (0..16384u32).map(|i| (i % 251) as u8).collect();
        let (stored, compressed) = encode_chunk(&original, Compression::none(), false).unwrap();
        assert!(!compressed);

        let (pool, _dir) = pool_with(&stored);
        let entry = ChunkTableEntry {
            segment_id: 0,
            file_offset: 0,
            stored_size: stored.len() as u32,
            compressed: false,
        };
        let decoded = read_chunk(&pool, &entry, 0, original.len()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn detects_checksum_mismatch_on_uncompressed_chunk() {
        let original = vec![3u8; 512];
        let (mut stored, _) = encode_chunk(&original, Compression::none(), false).unwrap();
        let last = stored.len() - 1;
        stored[last] ^= 0xff;

        let (pool, _dir) = pool_with(&stored);
        let entry = ChunkTableEntry {
            segment_id: 0,
            file_offset: 0,
            stored_size: stored.len() as u32,
            compressed: false,
        };
        let err = read_chunk(&pool, &entry, 0, original.len()).unwrap_err();
        assert!(matches!(err, EwfError::ChecksumError { .. }));
    }

    #[test]
    fn empty_block_compression_forces_a_zero_chunk_compressed_even_without_compression() {
        let zeroes = vec![0u8; 16384];
        let (stored, compressed) = encode_chunk(&zeroes, Compression::none(), true).unwrap();
        assert!(compressed);
        assert!(stored.len() < zeroes.len());

        let (pool, _dir) = pool_with(&stored);
        let entry = ChunkTableEntry {
            segment_id: 0,
            file_offset: 0,
            stored_size: stored.len() as u32,
            compressed: true,
        };
        let decoded = read_chunk(&pool, &entry, 0, zeroes.len()).unwrap();
        assert_eq!(decoded, zeroes);
    }

    #[test]
    fn without_empty_block_compression_a_zero_chunk_stays_raw_when_compression_is_none() {
        let zeroes = vec![0u8; 16384];
        let (stored, compressed) = encode_chunk(&zeroes, Compression::none(), false).unwrap();
        assert!(!compressed);
        assert_eq!(stored.len(), zeroes.len() + 4);
    }
}
