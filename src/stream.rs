//! The logical byte stream: `Read` + `Seek` over an image's chunk sequence
//! (§4.6).
//!
//! Mirrors the teacher's `EWF::ewf_read`/`ewf_seek` shape (position tracked
//! as a plain byte offset, chunk index and in-chunk offset derived from it
//! on each read) but drives the chunk cache and delta overlay instead of
//! holding every decoded chunk in a `HashMap` for the process lifetime.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use crate::cache::{CacheLookup, ChunkCache};
use crate::chunk::read_chunk;
use crate::delta::DeltaOverlay;
use crate::error::EwfError;
use crate::io_pool::FilePool;
use crate::table::ChunkTableIndex;

/// A logical, seekable read surface over a parsed image's chunks. Does not
/// own the pool/index/cache/overlay — those are shared with the owning
/// [`crate::image::Image`] so multiple streams (e.g. concurrent verify
/// workers) can read the same image without duplicating decoded chunks.
pub struct ChunkStream {
    pool: Arc<FilePool>,
    table: Arc<ChunkTableIndex>,
    cache: Arc<ChunkCache>,
    delta: Arc<DeltaOverlay>,
    chunk_size: usize,
    media_size: u64,
    position: u64,
    /// Set when a chunk failed checksum/decompress verification; subsequent
    /// reads over that same byte range keep surfacing the error until the
    /// caller seeks past it, matching the "don't silently skip bad sectors"
    /// requirement.
    last_error: Option<EwfError>,
}

impl ChunkStream {
    pub fn new(
        pool: Arc<FilePool>,
        table: Arc<ChunkTableIndex>,
        cache: Arc<ChunkCache>,
        delta: Arc<DeltaOverlay>,
        chunk_size: usize,
        media_size: u64,
    ) -> Self {
        ChunkStream {
            pool,
            table,
            cache,
            delta,
            chunk_size,
            media_size,
            position: 0,
            last_error: None,
        }
    }

    fn chunk_index_and_offset(&self, position: u64) -> (usize, usize) {
        let index = (position / self.chunk_size as u64) as usize;
        let in_chunk = (position % self.chunk_size as u64) as usize;
        (index, in_chunk)
    }

    fn load_chunk(&self, chunk_index: usize) -> Result<Arc<Vec<u8>>, EwfError> {
        match self.cache.start(chunk_index) {
            CacheLookup::Hit(data) => Ok(data),
            CacheLookup::Miss => {
                let entry = self
                    .delta
                    .lookup(chunk_index)
                    .cloned()
                    .or_else(|| self.table.get(chunk_index).copied());

                let entry = match entry {
                    Some(e) => e,
                    None => {
                        self.cache.abort(chunk_index);
                        return Err(EwfError::InvalidArgument {
                            reason: format!("chunk index {chunk_index} out of range"),
                        });
                    }
                };

                let remaining = self.media_size.saturating_sub(
                    chunk_index as u64 * self.chunk_size as u64,
                );
                let expected_len = (self.chunk_size as u64).min(remaining) as usize;

                match read_chunk(&self.pool, &entry, chunk_index, expected_len) {
                    Ok(data) => {
                        let data = Arc::new(data);
                        self.cache.finish(chunk_index, Arc::clone(&data));
                        Ok(data)
                    }
                    Err(e) => {
                        self.cache.abort(chunk_index);
                        Err(e)
                    }
                }
            }
        }
    }
}

impl Read for ChunkStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.position >= self.media_size || buf.is_empty() {
            return Ok(0);
        }

        let (chunk_index, in_chunk) = self.chunk_index_and_offset(self.position);
        let data = self.load_chunk(chunk_index).map_err(|e| {
            let io_err: io::Error = e.clone_for_io();
            self.last_error = Some(e);
            io_err
        })?;

        let available = data.len().saturating_sub(in_chunk);
        let to_copy = available.min(buf.len());
        buf[..to_copy].copy_from_slice(&data[in_chunk..in_chunk + to_copy]);
        self.position += to_copy as u64;
        self.last_error = None;
        Ok(to_copy)
    }
}

impl Seek for ChunkStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::End(delta) => self.media_size as i64 + delta,
            SeekFrom::Current(delta) => self.position as i64 + delta,
        };
        if new_pos < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative position",
            ));
        }
        self.position = new_pos as u64;
        self.last_error = None;
        Ok(self.position)
    }
}

impl EwfError {
    /// Clones enough information to hand the same failure back out through
    /// a `std::io::Error` without moving `self` out of the stored
    /// `last_error` slot.
    fn clone_for_io(&self) -> io::Error {
        io::Error::new(io::ErrorKind::Other, self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::ChunkTableEntry;
    use std::io::Write as _;

    fn build_stream(chunks: &[Vec<u8>]) -> ChunkStream {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg.bin");
        let mut file = std::fs::File::create(&path).unwrap();

        let mut table = ChunkTableIndex::default();
        for chunk in chunks {
            let offset = file.stream_position().unwrap();
            let mut framed = chunk.clone();
            framed.extend_from_slice(&crate::checksum::chunk_checksum(chunk).to_le_bytes());
            file.write_all(&framed).unwrap();
            table.push(ChunkTableEntry {
                segment_id: 0,
                file_offset: offset,
                stored_size: framed.len() as u32,
                compressed: false,
            });
        }
        drop(file);

        let chunk_size = chunks.first().map(|c| c.len()).unwrap_or(1);
        let media_size = chunks.iter().map(|c| c.len() as u64).sum();

        // `dir` must outlive the stream's reads; leak it for the test's
        // lifetime rather than threading an extra guard through the type.
        std::mem::forget(dir);

        ChunkStream::new(
            Arc::new(FilePool::new(vec![path], false)),
            Arc::new(table),
            Arc::new(ChunkCache::new(4)),
            Arc::new(DeltaOverlay::new()),
            chunk_size,
            media_size,
        )
    }

    #[test]
    fn reads_across_chunk_boundary() {
        let mut stream = build_stream(&[vec![1u8; 8], vec![2u8; 8]]);
        let mut buf = [0u8; 16];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf[..8], &[1u8; 8]);
        assert_eq!(&buf[8..], &[2u8; 8]);
    }

    #[test]
    fn seek_from_end_positions_correctly() {
        let mut stream = build_stream(&[vec![9u8; 4]]);
        let pos = stream.seek(SeekFrom::End(-2)).unwrap();
        assert_eq!(pos, 2);
        let mut buf = [0u8; 2];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [9, 9]);
    }

    #[test]
    fn read_past_media_size_returns_zero() {
        let mut stream = build_stream(&[vec![1u8; 4]]);
        stream.seek(SeekFrom::Start(4)).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
    }
}
