//! Segmented writer: lays out new chunks into size-bounded segment files,
//! sequencing sections and committing a `done`/`next` trailer (§4.7).
//!
//! Crash-safety follows the same convention libewf-derived tools use: a
//! segment isn't trustworthy until it ends in `done` (the last segment) or
//! `next` (every earlier one). A process that dies mid-chunk leaves the
//! last segment without either trailer; [`Writer::resume`] detects that and
//! is the only supported way to keep writing into such an image.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;

use crate::chunk::encode_chunk;
use crate::error::{EwfError, Result};
use crate::format::{FormatVersion, MediaKind, SegmentNaming};
use crate::metadata::{
    encode_digest_section, encode_error2_section, encode_hash_section, encode_header_section,
    encode_session_section, Session, SectorRange, Track,
};
use crate::naming::segment_filename;
use crate::section::SectionHeader;
use crate::table::{encode_table_payload, ChunkTableEntry};
use crate::volume::VolumeSection;
use std::collections::HashMap;

/// Default per-segment size ceiling (1.5 GiB), matching the common EnCase
/// default rather than libewf's larger one, since the CLI exposes this as
/// an override anyway.
pub const DEFAULT_SEGMENT_SIZE: u64 = 1_500_000_000;

pub struct WriterConfig {
    pub base_path: PathBuf,
    pub naming: SegmentNaming,
    pub format_version: FormatVersion,
    pub media_kind: MediaKind,
    pub compression: Compression,
    pub segment_size_limit: u64,
    pub volume: VolumeSection,
    pub header_values: HashMap<String, String>,
    /// The section type name the chunk-data area is wrapped in: `"sectors"`
    /// for a primary/export image, `"delta_sectors"` for a delta overlay
    /// segment (§4.8). Table framing and the rest of the section sequence
    /// are identical either way.
    pub sectors_section_name: &'static str,
    /// The segment number this writer's first emitted segment gets. `1` for
    /// a fresh primary acquisition; the next free number in the chain when
    /// continuing a delta overlay that already has earlier `.d0N` files.
    pub starting_segment_number: u16,
    /// When set, an all-zero chunk is always stored compressed (`-c
    /// empty-block`, §4.4 write path step 2), even if `compression` is
    /// otherwise `none`.
    pub empty_block_compression: bool,
}

struct OpenSegment {
    number: u16,
    file: File,
    path: PathBuf,
    table_entries: Vec<(u32, bool)>,
    table_base_offset: u64,
    /// Absolute offset of the `sectors` section's 76-byte descriptor. Its
    /// `size`/`next_offset` aren't known until every chunk destined for
    /// this segment has been written, so the descriptor is written as a
    /// placeholder here and patched in place by [`Writer::finish_segment`].
    sectors_header_offset: u64,
}

/// Drives the chunk-by-chunk write path, rolling over to a new segment file
/// once the size limit would be exceeded.
pub struct Writer {
    config: WriterConfig,
    current: Option<OpenSegment>,
    chunks_written: u64,
    total_raw_bytes: u64,
    finished_segments: Vec<PathBuf>,
    /// Absolute offset of each written volume section's payload (the start
    /// of the 1128-byte body, just past its 76-byte section header), one
    /// per segment that got its own header/volume pair. `chunk_count` and
    /// `total_sector_count` are placeholders (`Default`, i.e. 0) at write
    /// time, since the final chunk total isn't known until [`Writer::finish`]
    /// — back-patched there the same way `sectors_header_offset` is.
    volume_patches: Vec<(PathBuf, u64)>,
    hash_values: HashMap<String, Vec<u8>>,
    acquisition_errors: Vec<SectorRange>,
    sessions: Vec<Session>,
    tracks: Vec<Track>,
}

impl Writer {
    pub fn create(config: WriterConfig) -> Result<Self> {
        Ok(Writer {
            config,
            current: None,
            chunks_written: 0,
            total_raw_bytes: 0,
            finished_segments: Vec::new(),
            volume_patches: Vec::new(),
            hash_values: HashMap::new(),
            acquisition_errors: Vec::new(),
            sessions: Vec::new(),
            tracks: Vec::new(),
        })
    }

    /// Records unreadable sector ranges to emit as an `error2` section in
    /// the last segment (§4.7 step 3), for callers that track read errors
    /// encountered while acquiring (e.g. bad sectors skipped mid-read).
    pub fn set_acquisition_errors(&mut self, errors: Vec<SectorRange>) {
        self.acquisition_errors = errors;
    }

    /// Records optical-media sessions/tracks to emit as a `session` section
    /// in the last segment (§4.7 step 3); irrelevant to a plain disk/file
    /// acquisition, so both default to empty.
    pub fn set_sessions(&mut self, sessions: Vec<Session>, tracks: Vec<Track>) {
        self.sessions = sessions;
        self.tracks = tracks;
    }

    /// Reopens an image whose last segment has no `done`/`next` trailer
    /// (typically because the process acquiring it died mid-chunk) and
    /// returns a `Writer` ready to keep appending chunks (§4.7 write-resume
    /// mode). `last_segment_path` is repaired in place via
    /// [`crate::segment::repair_trailer`]: truncated to its last complete
    /// section and closed with a `next` trailer, since it becomes an
    /// interior segment once resumed writing continues into a fresh one.
    /// `config.starting_segment_number` is overwritten with the segment
    /// number that continues the repaired chain; every other field is taken
    /// from `config` as given (same volume, header values, compression,
    /// naming and size limit as the original acquisition).
    pub fn resume(mut config: WriterConfig, last_segment_path: &Path) -> Result<Self> {
        let segment_number = crate::segment::repair_trailer(last_segment_path, "next")?;
        config.starting_segment_number = segment_number + 1;
        Writer::create(config)
    }

    /// Records the digests to emit as `hash`/`digest` sections in the last
    /// segment once [`Writer::finish`] is called (§4.7 step 3). Recognized
    /// keys are `"MD5"` and `"SHA1"`; anything else is accepted but only
    /// surfaces through the in-memory metadata store on a later read, since
    /// the on-disk `digest` section has no slot for other algorithms.
    pub fn set_hash_values(&mut self, hash_values: HashMap<String, Vec<u8>>) {
        self.hash_values = hash_values;
    }

    fn open_next_segment(&mut self) -> Result<()> {
        if let Some(seg) = self.current.take() {
            self.finish_segment(seg, false)?;
        }

        let number = self.config.starting_segment_number + self.finished_segments.len() as u16;
        let base = self
            .config
            .base_path
            .to_str()
            .ok_or_else(|| EwfError::InvalidArgument {
                reason: "base path must be valid UTF-8".into(),
            })?;
        let filename = segment_filename(base, number, self.config.naming)?;
        let path = PathBuf::from(filename);

        let mut file = File::create(&path).map_err(|e| EwfError::io(path.clone(), e))?;
        write_file_header(
            &mut file,
            &path,
            number,
            self.config.format_version,
            self.config.media_kind,
        )?;
        write_header_section(&mut file, &path, &self.config.header_values)?;
        let volume_payload_offset = file
            .stream_position()
            .map_err(|e| EwfError::io(path.clone(), e))?
            + crate::section::SECTION_HEADER_SIZE;
        write_volume_section(&mut file, &path, &self.config.volume)?;
        self.volume_patches.push((path.clone(), volume_payload_offset));

        let sectors_header_offset = file
            .stream_position()
            .map_err(|e| EwfError::io(path.clone(), e))?;
        // Placeholder descriptor; patched with the real size/next_offset in
        // `finish_segment` once the chunk data run is complete.
        SectionHeader::write(&mut file, self.config.sectors_section_name, 0, 0)?;
        let table_base_offset = file
            .stream_position()
            .map_err(|e| EwfError::io(path.clone(), e))?;

        self.current = Some(OpenSegment {
            number,
            file,
            path,
            table_entries: Vec::new(),
            table_base_offset,
            sectors_header_offset,
        });
        Ok(())
    }

    /// Writes one chunk of plaintext data, opening a new segment first if
    /// none is open yet or the current one would exceed its size limit.
    pub fn write_chunk(&mut self, data: &[u8]) -> Result<()> {
        let (stored, compressed) = encode_chunk(
            data,
            self.config.compression,
            self.config.empty_block_compression,
        )?;
        self.write_encoded_chunk(stored, compressed, data.len())
    }

    /// Writes an already-encoded chunk (compressed or checksum-framed, per
    /// [`crate::chunk::encode_chunk`]'s output) without re-encoding it.
    /// Used by the acquisition worker pool, which does the encoding
    /// concurrently ahead of this call. `raw_len` is the plaintext length
    /// the stored bytes decode back to, needed to back-patch the volume
    /// section's sector count in [`Writer::finish`].
    pub fn write_encoded_chunk(
        &mut self,
        stored: Vec<u8>,
        compressed: bool,
        raw_len: usize,
    ) -> Result<()> {
        if self.current.is_none() {
            self.open_next_segment()?;
        }

        {
            let seg = self.current.as_ref().unwrap();
            let projected = seg
                .file
                .metadata()
                .map(|m| m.len())
                .unwrap_or(0)
                + stored.len() as u64;
            if projected > self.config.segment_size_limit && !seg.table_entries.is_empty() {
                self.open_next_segment()?;
            }
        }

        let seg = self.current.as_mut().unwrap();
        let offset = seg
            .file
            .stream_position()
            .map_err(|e| EwfError::io(seg.path.clone(), e))?;
        seg.file
            .write_all(&stored)
            .map_err(|e| EwfError::io(seg.path.clone(), e))?;

        let relative = (offset - seg.table_base_offset) as u32;
        seg.table_entries.push((relative, compressed));
        self.chunks_written += 1;
        self.total_raw_bytes += raw_len as u64;
        Ok(())
    }

    fn finish_segment(&mut self, mut seg: OpenSegment, is_last: bool) -> Result<()> {
        let sectors_data_end = seg
            .file
            .stream_position()
            .map_err(|e| EwfError::io(seg.path.clone(), e))?;
        let sectors_size = sectors_data_end - seg.sectors_header_offset;
        seg.file
            .seek(SeekFrom::Start(seg.sectors_header_offset))
            .map_err(|e| EwfError::io(seg.path.clone(), e))?;
        SectionHeader::write(
            &mut seg.file,
            self.config.sectors_section_name,
            sectors_data_end,
            sectors_size,
        )?;
        seg.file
            .seek(SeekFrom::Start(sectors_data_end))
            .map_err(|e| EwfError::io(seg.path.clone(), e))?;

        let table_payload =
            encode_table_payload(seg.table_base_offset, &seg.table_entries, true);
        write_section(&mut seg.file, &seg.path, "table", &table_payload)?;

        if is_last && (!self.sessions.is_empty() || !self.tracks.is_empty()) {
            let session_payload = encode_session_section(&self.sessions, &self.tracks);
            write_section(&mut seg.file, &seg.path, "session", &session_payload)?;
        }

        if is_last && !self.acquisition_errors.is_empty() {
            let error2_payload = encode_error2_section(&self.acquisition_errors);
            write_section(&mut seg.file, &seg.path, "error2", &error2_payload)?;
        }

        if is_last && !self.hash_values.is_empty() {
            let md5 = self.hash_values.get("MD5").map(Vec::as_slice);
            if let Some(md5) = md5 {
                let hash_payload = encode_hash_section(md5);
                write_section(&mut seg.file, &seg.path, "hash", &hash_payload)?;
            }
            let sha1 = self.hash_values.get("SHA1").map(Vec::as_slice);
            if md5.is_some() || sha1.is_some() {
                let digest_payload = encode_digest_section(md5, sha1);
                write_section(&mut seg.file, &seg.path, "digest", &digest_payload)?;
            }
        }

        let trailer_type = if is_last { "done" } else { "next" };
        write_section(&mut seg.file, &seg.path, trailer_type, &[])?;

        seg.file
            .sync_all()
            .map_err(|e| EwfError::io(seg.path.clone(), e))?;
        self.finished_segments.push(seg.path);
        let _ = seg.number;
        Ok(())
    }

    /// Finalizes the image: closes the current segment with a `done`
    /// trailer instead of `next`. A source that produced zero chunks still
    /// gets one segment (header, volume, empty sectors/table, `done`) so a
    /// zero-byte acquisition remains a valid, reopenable image.
    pub fn finish(mut self) -> Result<Vec<PathBuf>> {
        if self.current.is_none() && self.finished_segments.is_empty() {
            self.open_next_segment()?;
        }
        if let Some(seg) = self.current.take() {
            self.finish_segment(seg, true)?;
        }
        self.patch_volume_counts()?;
        Ok(self.finished_segments)
    }

    /// Back-patches every written volume section's `chunk_count` and
    /// `total_sector_count` fields now that the full chunk run is known
    /// (§4.7 step 3: "write-back the final file-header fields"). Every
    /// segment carries its own header/volume pair, so each gets the same
    /// final totals patched in, matching what a reader picks up regardless
    /// of which segment it reads the volume section from.
    fn patch_volume_counts(&self) -> Result<()> {
        let total_sector_count = self.total_raw_bytes / self.config.volume.bytes_per_sector as u64;
        for (path, payload_offset) in &self.volume_patches {
            let mut file = OpenOptions::new()
                .write(true)
                .open(path)
                .map_err(|e| EwfError::io(path.clone(), e))?;
            file.seek(SeekFrom::Start(*payload_offset + 4))
                .map_err(|e| EwfError::io(path.clone(), e))?;
            file.write_all(&(self.chunks_written as u32).to_le_bytes())
                .map_err(|e| EwfError::io(path.clone(), e))?;
            file.seek(SeekFrom::Start(*payload_offset + 16))
                .map_err(|e| EwfError::io(path.clone(), e))?;
            file.write_all(&(total_sector_count as u32).to_le_bytes())
                .map_err(|e| EwfError::io(path.clone(), e))?;
            file.sync_all().map_err(|e| EwfError::io(path.clone(), e))?;
        }
        Ok(())
    }
}

fn write_file_header(
    file: &mut File,
    path: &Path,
    segment_number: u16,
    version: FormatVersion,
    media_kind: MediaKind,
) -> Result<()> {
    match version {
        FormatVersion::V1 => {
            let signature = match media_kind {
                MediaKind::Physical => crate::format::EWF_V1_SIGNATURE,
                MediaKind::Logical => crate::format::EWF_V1_LOGICAL_SIGNATURE,
            };
            file.write_all(&signature)
                .map_err(|e| EwfError::io(path.to_path_buf(), e))?;
            file.write_all(&segment_number.to_le_bytes())
                .map_err(|e| EwfError::io(path.to_path_buf(), e))?;
            file.write_all(&[0u8; 3])
                .map_err(|e| EwfError::io(path.to_path_buf(), e))?;
        }
        FormatVersion::V2 => {
            file.write_all(&crate::format::EWF_V2_SIGNATURE)
                .map_err(|e| EwfError::io(path.to_path_buf(), e))?;
            let mut rest = [0u8; 30];
            rest[0..2].copy_from_slice(&segment_number.to_le_bytes());
            file.write_all(&rest)
                .map_err(|e| EwfError::io(path.to_path_buf(), e))?;
        }
    }
    Ok(())
}

fn write_section(file: &mut File, path: &Path, section_type: &str, payload: &[u8]) -> Result<()> {
    let start = file
        .stream_position()
        .map_err(|e| EwfError::io(path.to_path_buf(), e))?;
    let size = crate::section::SECTION_HEADER_SIZE + payload.len() as u64;
    let next_offset = start + size;
    SectionHeader::write(file, section_type, next_offset, size)?;
    file.write_all(payload)
        .map_err(|e| EwfError::io(path.to_path_buf(), e))?;
    Ok(())
}

fn write_header_section(
    file: &mut File,
    path: &Path,
    values: &HashMap<String, String>,
) -> Result<()> {
    let payload = encode_header_section(values)?;
    write_section(file, path, "header", &payload)
}

fn write_volume_section(file: &mut File, path: &Path, volume: &VolumeSection) -> Result<()> {
    let payload = volume.encode();
    write_section(file, path, "volume", &payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_chunks_and_finishes_with_done_section() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("case1");

        let mut header_values = HashMap::new();
        header_values.insert("c".to_string(), "case1".to_string());

        let config = WriterConfig {
            base_path: base.clone(),
            naming: SegmentNaming::E01UpperCase,
            format_version: FormatVersion::V1,
            media_kind: MediaKind::Physical,
            compression: Compression::default(),
            segment_size_limit: DEFAULT_SEGMENT_SIZE,
            volume: VolumeSection::default(),
            header_values,
            sectors_section_name: "sectors",
            starting_segment_number: 1,
            empty_block_compression: false,
        };

        let mut writer = Writer::create(config).unwrap();
        writer.write_chunk(&[1u8; 16384]).unwrap();
        writer.write_chunk(&[2u8; 16384]).unwrap();
        let segments = writer.finish().unwrap();

        assert_eq!(segments.len(), 1);
        let written = std::fs::read(&segments[0]).unwrap();
        assert_eq!(&written[0..8], &crate::format::EWF_V1_SIGNATURE);
    }

    #[test]
    fn rolls_over_to_a_new_segment_past_the_size_limit() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("case2");

        let config = WriterConfig {
            base_path: base.clone(),
            naming: SegmentNaming::E01UpperCase,
            format_version: FormatVersion::V1,
            media_kind: MediaKind::Physical,
            compression: Compression::fast(),
            segment_size_limit: 200, // tiny, forces an immediate rollover
            volume: VolumeSection::default(),
            header_values: HashMap::new(),
            sectors_section_name: "sectors",
            starting_segment_number: 1,
            empty_block_compression: false,
        };

        let mut writer = Writer::create(config).unwrap();
        writer.write_chunk(&[5u8; 16384]).unwrap();
        writer.write_chunk(&[6u8; 16384]).unwrap();
        let segments = writer.finish().unwrap();

        assert_eq!(segments.len(), 2);
    }

    #[test]
    fn resume_repairs_a_trailerless_segment_and_continues_the_chain() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("case3");

        let config = WriterConfig {
            base_path: base.clone(),
            naming: SegmentNaming::E01UpperCase,
            format_version: FormatVersion::V1,
            media_kind: MediaKind::Physical,
            compression: Compression::fast(),
            segment_size_limit: DEFAULT_SEGMENT_SIZE,
            volume: VolumeSection::default(),
            header_values: HashMap::new(),
            sectors_section_name: "sectors",
            starting_segment_number: 1,
            empty_block_compression: false,
        };

        let mut writer = Writer::create(config).unwrap();
        writer.write_chunk(&[9u8; 16384]).unwrap();
        // Simulate a crash: leak the open segment without calling `finish`,
        // so its file is left on disk with a placeholder `sectors` header
        // and no `table`/`done` trailer at all.
        std::mem::forget(writer);

        let segment_path = segment_filename(base.to_str().unwrap(), 1, SegmentNaming::E01UpperCase)
            .map(PathBuf::from)
            .unwrap();
        assert!(segment_path.exists());

        let resumed_config = WriterConfig {
            base_path: base.clone(),
            naming: SegmentNaming::E01UpperCase,
            format_version: FormatVersion::V1,
            media_kind: MediaKind::Physical,
            compression: Compression::fast(),
            segment_size_limit: DEFAULT_SEGMENT_SIZE,
            volume: VolumeSection::default(),
            header_values: HashMap::new(),
            sectors_section_name: "sectors",
            starting_segment_number: 1,
            empty_block_compression: false,
        };
        let mut resumed = Writer::resume(resumed_config, &segment_path).unwrap();
        resumed.write_chunk(&[10u8; 16384]).unwrap();
        let segments = resumed.finish().unwrap();

        // The repaired segment 1 plus the fresh segment 2 the resumed
        // writer opens for its own chunk.
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].file_name().unwrap().to_str().unwrap(), "case3.E02");

        let repaired = std::fs::read(&segment_path).unwrap();
        assert_eq!(&repaired[0..8], &crate::format::EWF_V1_SIGNATURE);
    }

    #[test]
    fn finish_backpatches_the_volume_sections_chunk_and_sector_counts() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("case4");

        let config = WriterConfig {
            base_path: base.clone(),
            naming: SegmentNaming::E01UpperCase,
            format_version: FormatVersion::V1,
            media_kind: MediaKind::Physical,
            compression: Compression::fast(),
            segment_size_limit: DEFAULT_SEGMENT_SIZE,
            volume: VolumeSection::default(),
            header_values: HashMap::new(),
            sectors_section_name: "sectors",
            starting_segment_number: 1,
            empty_block_compression: false,
        };

        let mut writer = Writer::create(config).unwrap();
        writer.write_chunk(&[1u8; 16384]).unwrap();
        writer.write_chunk(&[2u8; 16384]).unwrap();
        let segments = writer.finish().unwrap();
        assert_eq!(segments.len(), 1);

        let image = crate::image::Image::open(&segments, &[]).unwrap();
        assert_eq!(image.volume().chunk_count, 2);
        assert_eq!(image.volume().total_sector_count, 64); // 32768 bytes / 512
        assert_eq!(image.volume().media_size(), 32768);
    }

    #[test]
    fn writes_a_v2_segment_with_a_header_that_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("case5");

        let config = WriterConfig {
            base_path: base.clone(),
            naming: SegmentNaming::E01UpperCase,
            format_version: FormatVersion::V2,
            media_kind: MediaKind::Physical,
            compression: Compression::fast(),
            segment_size_limit: DEFAULT_SEGMENT_SIZE,
            volume: VolumeSection::default(),
            header_values: HashMap::new(),
            sectors_section_name: "sectors",
            starting_segment_number: 1,
            empty_block_compression: false,
        };

        let mut writer = Writer::create(config).unwrap();
        writer.write_chunk(&[3u8; 16384]).unwrap();
        let segments = writer.finish().unwrap();
        assert_eq!(segments.len(), 1);

        let written = std::fs::read(&segments[0]).unwrap();
        assert_eq!(&written[0..8], &crate::format::EWF_V2_SIGNATURE);

        let mut file = std::fs::File::open(&segments[0]).unwrap();
        let (version, segment_number, _first_offset) =
            crate::segment::read_file_header(&mut file).unwrap();
        assert_eq!(version, FormatVersion::V2);
        assert_eq!(segment_number, 1);
    }
}
