//! The top-level [`Image`]: wires segments, the chunk-table index, the
//! decoded-chunk cache, the delta overlay, and the metadata store into one
//! handle a caller opens once and reads many times (§4, §4.1-§4.10).

use std::io::{Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cache::ChunkCache;
use crate::delta::DeltaOverlay;
use crate::error::{EwfError, Result};
use crate::format::{FormatVersion, MediaKind, SegmentNaming};
use crate::io_pool::FilePool;
use crate::metadata::MetadataStore;
use crate::segment::{parse_sections, read_file_header, TableSource};
use crate::stream::ChunkStream;
use crate::table::ChunkTableIndex;
use crate::volume::VolumeSection;
use crate::writer::WriterConfig;

/// An opened EWF image: a physical (disk/volume) image or a logical
/// evidence container, spanning one or more segment files plus an optional
/// delta overlay chain.
pub struct Image {
    pool: Arc<FilePool>,
    table: Arc<ChunkTableIndex>,
    cache: Arc<ChunkCache>,
    delta: Arc<DeltaOverlay>,
    volume: VolumeSection,
    metadata: MetadataStore,
    segment_paths: Vec<PathBuf>,
    delta_paths: Vec<PathBuf>,
    format_version: FormatVersion,
    logical_tree: Option<crate::logical::LogicalTree>,
}

impl Image {
    /// Opens an image given its segment file paths in acquisition order
    /// (the first one must be the primary `.E01`/`.Ex01`/`.L01` file; any
    /// later `.E02`, `.E03`, … and delta `.d01`, … files follow).
    pub fn open(segment_paths: &[PathBuf], delta_paths: &[PathBuf]) -> Result<Self> {
        if segment_paths.is_empty() {
            return Err(EwfError::InvalidArgument {
                reason: "at least one segment path is required".into(),
            });
        }

        let mut pool = FilePool::new(segment_paths.to_vec(), false);
        let delta_path_ids: Vec<usize> = delta_paths
            .iter()
            .map(|p| pool.register(p.clone()))
            .collect();
        let mut table = ChunkTableIndex::default();
        let mut volume: Option<VolumeSection> = None;
        let mut metadata = MetadataStore::default();
        let mut saw_done = false;
        let mut format_version = None;
        let mut logical_tree = None;

        for (path_id, path) in segment_paths.iter().enumerate() {
            let mut file = std::fs::File::open(path).map_err(|e| EwfError::io(path.clone(), e))?;
            let (version, segment_number, first_offset) = read_file_header(&mut file)?;
            format_version.get_or_insert(version);
            let parsed = parse_sections(&mut file, path, segment_number, first_offset)?;

            if let Some(v) = parsed.volume {
                volume = Some(v);
            }
            if let Some(tree) = parsed.ltree {
                logical_tree = Some(tree);
            }
            metadata.merge_header_values(parsed.metadata.header_values);
            for (algo, digest) in parsed.metadata.hash_values {
                metadata.insert_hash(&algo, digest);
            }
            metadata.acquisition_errors.extend(parsed.metadata.acquisition_errors);
            metadata.sessions.extend(parsed.metadata.sessions);
            metadata.tracks.extend(parsed.metadata.tracks);

            let primary: Vec<_> = parsed
                .tables
                .iter()
                .filter(|t| t.source == TableSource::Table)
                .collect();
            let mirror: Vec<_> = parsed
                .tables
                .iter()
                .filter(|t| t.source == TableSource::Table2)
                .collect();

            if primary.is_empty() && mirror.is_empty() {
                let table_failed = parsed
                    .failed_tables
                    .iter()
                    .any(|s| *s == TableSource::Table);
                let mirror_failed = parsed
                    .failed_tables
                    .iter()
                    .any(|s| *s == TableSource::Table2);
                if table_failed && mirror_failed {
                    return Err(EwfError::CorruptTable {
                        chunk_index: table.len(),
                    });
                }
            }

            let chosen = if !primary.is_empty() { &primary } else { &mirror };
            for parsed_table in chosen {
                for entry in &parsed_table.entries {
                    let mut entry = *entry;
                    entry.segment_id = path_id as u16;
                    table.push(entry);
                }
            }

            saw_done = saw_done || parsed.has_done;
            let is_last = path_id + 1 == segment_paths.len();
            if is_last && !saw_done {
                return Err(EwfError::MissingSegment {
                    segment_number: segment_number + 1,
                });
            }
        }

        let volume = volume.ok_or_else(|| EwfError::UnsupportedFormat {
            reason: "image has no volume/disk section".into(),
        })?;
        let format_version = format_version.expect("segment_paths is non-empty, checked above");

        let mut delta = DeltaOverlay::new();
        for (delta_path, path_id) in delta_paths.iter().zip(delta_path_ids.iter().copied()) {
            let mut file =
                std::fs::File::open(delta_path).map_err(|e| EwfError::io(delta_path.clone(), e))?;
            let (_, segment_number, first_offset) = read_file_header(&mut file)?;
            let parsed = parse_sections(&mut file, delta_path, segment_number, first_offset)?;
            for parsed_table in &parsed.tables {
                let overrides = parsed_table.entries.iter().enumerate().map(|(i, entry)| {
                    let mut entry = *entry;
                    entry.segment_id = path_id as u16;
                    (i, entry)
                });
                delta.apply_segment(overrides);
            }
        }

        let pool = Arc::new(pool);
        Ok(Image {
            pool,
            table: Arc::new(table),
            cache: Arc::new(ChunkCache::default()),
            delta: Arc::new(delta),
            volume,
            metadata,
            segment_paths: segment_paths.to_vec(),
            delta_paths: delta_paths.to_vec(),
            format_version,
            logical_tree,
        })
    }

    /// The logical-evidence file tree (§4.9), if this image carries an
    /// `ltree` section. `None` for a plain physical/disk image.
    pub fn logical_tree(&self) -> Option<&crate::logical::LogicalTree> {
        self.logical_tree.as_ref()
    }

    pub fn volume(&self) -> &VolumeSection {
        &self.volume
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut MetadataStore {
        &mut self.metadata
    }

    pub fn segment_paths(&self) -> &[PathBuf] {
        &self.segment_paths
    }

    pub fn delta_paths(&self) -> &[PathBuf] {
        &self.delta_paths
    }

    pub fn chunk_count(&self) -> usize {
        self.table.len()
    }

    /// Builds the [`WriterConfig`] for the next delta segment in this
    /// image's overlay chain (§4.8): writing to an already-closed image
    /// doesn't touch the primary segments, it appends a new `.d0N` file
    /// whose `delta_sectors`/`table` pair the reader applies last-wins on
    /// top of the primary chunk table.
    ///
    /// This crate's delta segments are always a full replacement copy of
    /// every chunk in the image (rather than libewf's sparse per-chunk
    /// encoding) — see `DESIGN.md` for why: it keeps delta tables readable
    /// with the exact same position-is-chunk-index convention the primary
    /// table already uses, at the cost of the delta file being as large as
    /// a full acquisition instead of just the edited chunks. Callers
    /// overwrite in memory only the chunks that changed and re-emit the
    /// rest unmodified, read back from [`Image::open_stream`].
    pub fn next_delta_writer_config(&self, compression: flate2::Compression) -> Result<WriterConfig> {
        let primary_base = self
            .segment_paths
            .first()
            .and_then(|p| p.file_stem())
            .ok_or_else(|| EwfError::InvalidArgument {
                reason: "image has no primary segment to derive a delta base name from".into(),
            })?;
        let delta_number = self.delta_paths.len() as u16 + 1;
        let delta_dir = self
            .segment_paths
            .first()
            .and_then(|p| p.parent())
            .unwrap_or_else(|| Path::new("."));
        let base_path = delta_dir.join(primary_base);
        if delta_number == 0 || delta_number > 99 {
            return Err(EwfError::InvalidArgument {
                reason: "delta segment numbers are limited to 1..99".into(),
            });
        }

        let media_kind = match self.volume.media_type {
            crate::volume::MediaType::LogicalEvidence => MediaKind::Logical,
            _ => MediaKind::Physical,
        };

        Ok(WriterConfig {
            base_path,
            naming: SegmentNaming::Delta,
            format_version: self.format_version,
            media_kind,
            compression,
            segment_size_limit: u64::MAX,
            volume: self.volume.clone(),
            header_values: self.metadata.header_values.clone(),
            sectors_section_name: "delta_sectors",
            starting_segment_number: delta_number,
            empty_block_compression: false,
        })
    }

    /// Opens a fresh, independently-positioned read stream over this
    /// image's media bytes. Multiple streams may be opened concurrently;
    /// they share the underlying pool and cache.
    pub fn open_stream(&self) -> ChunkStream {
        ChunkStream::new(
            Arc::clone(&self.pool),
            Arc::clone(&self.table),
            Arc::clone(&self.cache),
            Arc::clone(&self.delta),
            self.volume.chunk_size(),
            self.volume.media_size(),
        )
    }
}

/// Reads an image's magic bytes without fully opening it, for quick format
/// probing (used by `ewfinfo`'s `--probe`-style fast path).
pub fn probe(path: &Path) -> Result<crate::format::DetectedFormat> {
    let mut file = std::fs::File::open(path).map_err(|e| EwfError::io(path.to_path_buf(), e))?;
    let mut magic = [0u8; 8];
    file.read_exact(&mut magic)
        .map_err(|e| EwfError::io(path.to_path_buf(), e))?;
    file.rewind().map_err(|e| EwfError::io(path.to_path_buf(), e))?;
    crate::format::detect(&magic)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::{Writer, WriterConfig};
    use std::collections::HashMap;
    use std::io::Read as _;

    fn test_volume() -> VolumeSection {
        VolumeSection {
            sectors_per_chunk: 1,
            bytes_per_sector: 16,
            total_sector_count: 3,
            ..Default::default()
        }
    }

    fn write_primary(dir: &Path, chunks: &[[u8; 16]]) -> PathBuf {
        let config = WriterConfig {
            base_path: dir.join("case"),
            naming: SegmentNaming::E01UpperCase,
            format_version: FormatVersion::V1,
            media_kind: MediaKind::Physical,
            compression: flate2::Compression::none(),
            segment_size_limit: u64::MAX,
            volume: test_volume(),
            header_values: HashMap::new(),
            sectors_section_name: "sectors",
            starting_segment_number: 1,
            empty_block_compression: false,
        };
        let mut writer = Writer::create(config).unwrap();
        for chunk in chunks {
            writer.write_chunk(chunk).unwrap();
        }
        let segments = writer.finish().unwrap();
        assert_eq!(segments.len(), 1);
        segments.into_iter().next().unwrap()
    }

    #[test]
    fn delta_overlay_overrides_chunks_without_touching_the_primary_segment() {
        let dir = tempfile::tempdir().unwrap();
        let original = [[1u8; 16], [2u8; 16], [3u8; 16]];
        let primary_path = write_primary(dir.path(), &original);
        let primary_bytes_before = std::fs::read(&primary_path).unwrap();

        let image = Image::open(&[primary_path.clone()], &[]).unwrap();
        assert_eq!(image.chunk_count(), 3);

        let delta_config = image
            .next_delta_writer_config(flate2::Compression::none())
            .unwrap();
        assert_eq!(delta_config.sectors_section_name, "delta_sectors");
        assert_eq!(delta_config.starting_segment_number, 1);

        let edited = [[1u8; 16], [0xffu8; 16], [3u8; 16]];
        let mut delta_writer = Writer::create(delta_config).unwrap();
        for chunk in &edited {
            delta_writer.write_chunk(chunk).unwrap();
        }
        let delta_segments = delta_writer.finish().unwrap();
        assert_eq!(delta_segments.len(), 1);
        assert!(delta_segments[0]
            .to_str()
            .unwrap()
            .ends_with(".d01"));

        let primary_bytes_after = std::fs::read(&primary_path).unwrap();
        assert_eq!(
            primary_bytes_before, primary_bytes_after,
            "writing a delta segment must not touch the primary segment file"
        );

        let overlaid = Image::open(&[primary_path], &delta_segments).unwrap();
        let mut stream = overlaid.open_stream();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();

        let mut expected = Vec::new();
        for chunk in &edited {
            expected.extend_from_slice(chunk);
        }
        assert_eq!(out, expected);
    }

    #[test]
    fn both_table_and_table2_corrupt_raises_corrupt_table() {
        use crate::checksum::adler32;
        use crate::section::SECTION_HEADER_SIZE;
        use crate::table::encode_table_payload;

        fn write_section(buf: &mut Vec<u8>, section_type: &str, payload: &[u8], next_offset: u64) {
            let size = SECTION_HEADER_SIZE + payload.len() as u64;
            let mut header = [0u8; SECTION_HEADER_SIZE as usize];
            let type_bytes = section_type.as_bytes();
            header[0..type_bytes.len()].copy_from_slice(type_bytes);
            header[16..24].copy_from_slice(&next_offset.to_le_bytes());
            header[24..32].copy_from_slice(&size.to_le_bytes());
            let checksum = adler32(&header[0..72]);
            header[72..76].copy_from_slice(&checksum.to_le_bytes());
            buf.extend_from_slice(&header);
            buf.extend_from_slice(payload);
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.E01");

        let mut buf = Vec::new();
        buf.extend_from_slice(&crate::format::EWF_V1_SIGNATURE);
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.extend_from_slice(&[0u8; 3]);
        assert_eq!(buf.len(), 13);

        let volume_payload = test_volume().encode();
        let volume_offset = buf.len() as u64;
        let volume_next = volume_offset + SECTION_HEADER_SIZE + volume_payload.len() as u64;
        write_section(&mut buf, "volume", &volume_payload, volume_next);

        let sectors_payload = vec![0u8; 16];
        let sectors_offset = buf.len() as u64;
        let sectors_next = sectors_offset + SECTION_HEADER_SIZE + sectors_payload.len() as u64;
        write_section(&mut buf, "sectors", &sectors_payload, sectors_next);

        let mut table_payload = encode_table_payload(0, &[(0, false)], false);
        table_payload[20] ^= 0xff;
        let table_offset = buf.len() as u64;
        let table_next = table_offset + SECTION_HEADER_SIZE + table_payload.len() as u64;
        write_section(&mut buf, "table", &table_payload, table_next);

        let mut table2_payload = encode_table_payload(0, &[(0, false)], false);
        table2_payload[20] ^= 0xff;
        let table2_offset = buf.len() as u64;
        let done_offset = table2_offset + SECTION_HEADER_SIZE + table2_payload.len() as u64;
        write_section(&mut buf, "table2", &table2_payload, done_offset);
        write_section(&mut buf, "done", &[], done_offset);

        std::fs::write(&path, &buf).unwrap();

        let err = Image::open(&[path], &[]).unwrap_err();
        assert!(matches!(err, EwfError::CorruptTable { .. }));
    }

    #[test]
    fn open_populates_logical_tree_from_ltree_section() {
        use crate::checksum::adler32;
        use crate::section::SECTION_HEADER_SIZE;
        use flate2::write::ZlibEncoder;
        use flate2::Compression;
        use std::io::Write as _;

        fn write_section(buf: &mut Vec<u8>, section_type: &str, payload: &[u8], next_offset: u64) {
            let size = SECTION_HEADER_SIZE + payload.len() as u64;
            let mut header = [0u8; SECTION_HEADER_SIZE as usize];
            let type_bytes = section_type.as_bytes();
            header[0..type_bytes.len()].copy_from_slice(type_bytes);
            header[16..24].copy_from_slice(&next_offset.to_le_bytes());
            header[24..32].copy_from_slice(&size.to_le_bytes());
            let checksum = adler32(&header[0..72]);
            header[72..76].copy_from_slice(&checksum.to_le_bytes());
            buf.extend_from_slice(&header);
            buf.extend_from_slice(payload);
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("case.L01");

        let mut buf = Vec::new();
        buf.extend_from_slice(&crate::format::EWF_V1_LOGICAL_SIGNATURE);
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.extend_from_slice(&[0u8; 3]);

        let volume_payload = VolumeSection {
            media_type: crate::volume::MediaType::LogicalEvidence,
            ..test_volume()
        }
        .encode();
        let volume_offset = buf.len() as u64;
        let volume_next = volume_offset + SECTION_HEADER_SIZE + volume_payload.len() as u64;
        write_section(&mut buf, "volume", &volume_payload, volume_next);

        let ltree_text = "0\td\troot\t0\t0\n1\tf\ta.txt\t10\t0\n";
        let units: Vec<u8> = ltree_text
            .encode_utf16()
            .flat_map(|u| u.to_le_bytes())
            .collect();
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&units).unwrap();
        let ltree_payload = encoder.finish().unwrap();
        let ltree_offset = buf.len() as u64;
        let done_offset = ltree_offset + SECTION_HEADER_SIZE + ltree_payload.len() as u64;
        write_section(&mut buf, "ltree", &ltree_payload, done_offset);
        write_section(&mut buf, "done", &[], done_offset);

        std::fs::write(&path, &buf).unwrap();

        let image = Image::open(&[path], &[]).unwrap();
        let tree = image.logical_tree().expect("ltree section was present");
        assert_eq!(tree.roots.len(), 1);
        assert_eq!(tree.roots[0].name, "root");
        assert_eq!(tree.root_child("root").unwrap().child("a.txt").unwrap().logical_size, 10);
    }

    #[test]
    fn second_delta_segment_numbers_continue_the_chain() {
        let dir = tempfile::tempdir().unwrap();
        let original = [[1u8; 16], [2u8; 16], [3u8; 16]];
        let primary_path = write_primary(dir.path(), &original);

        let image = Image::open(&[primary_path.clone()], &[]).unwrap();
        let first_delta_config = image
            .next_delta_writer_config(flate2::Compression::none())
            .unwrap();
        let mut writer = Writer::create(first_delta_config).unwrap();
        for chunk in &original {
            writer.write_chunk(chunk).unwrap();
        }
        let first_delta = writer.finish().unwrap();

        let image_with_one_delta = Image::open(&[primary_path], &first_delta).unwrap();
        let second_delta_config = image_with_one_delta
            .next_delta_writer_config(flate2::Compression::none())
            .unwrap();
        assert_eq!(second_delta_config.starting_segment_number, 2);
    }
}
