//! Drives the segmented writer over a raw source using the worker-pool
//! acquisition pipeline.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use clap::Parser;
use flate2::Compression;
use log::{error, info};

use exhume_ewf::acquire::{acquire, NullProgress};
use exhume_ewf::format::{FormatVersion, MediaKind, SegmentNaming};
use exhume_ewf::raw::RAW;
use exhume_ewf::volume::{MediaType, VolumeSection};
use exhume_ewf::writer::{Writer, WriterConfig, DEFAULT_SEGMENT_SIZE};

#[derive(Parser)]
#[command(name = "ewfacquire", version, about = "Acquire a raw source into an EWF image")]
struct Args {
    /// Raw source to read (use "-" for stdin is not supported; pass a path).
    source: PathBuf,

    /// Output base path (extension is computed from the segment naming scheme).
    #[arg(short = 't', long = "target")]
    target: PathBuf,

    /// Chunk size in sectors.
    #[arg(short = 'b', long = "chunk", default_value_t = 32)]
    sectors_per_chunk: u32,

    /// Bytes per sector.
    #[arg(short = 'B', long = "bytes", default_value_t = 512)]
    bytes_per_sector: u32,

    /// Compression level: none, fast, default, best, empty-block (no
    /// compression except all-zero chunks, which are always compressed).
    #[arg(short = 'c', long = "compression", default_value = "default")]
    compression: String,

    /// Maximum segment size in bytes.
    #[arg(short = 'S', long = "segsize", default_value_t = DEFAULT_SEGMENT_SIZE)]
    segment_size: u64,

    /// Number of worker threads.
    #[arg(short = 'w', long = "workers", default_value_t = 4)]
    workers: usize,

    #[arg(short = 'C', long = "case")]
    case_number: Option<String>,
    #[arg(short = 'D', long = "description")]
    description: Option<String>,
    #[arg(short = 'E', long = "evidence")]
    evidence_number: Option<String>,
    #[arg(short = 'e', long = "examiner")]
    examiner: Option<String>,
    #[arg(short = 'N', long = "notes")]
    notes: Option<String>,

    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

/// Returns the zlib level plus whether all-zero chunks should always be
/// stored compressed regardless of level (`-c empty-block`).
fn parse_compression(s: &str) -> (Compression, bool) {
    match s {
        "none" => (Compression::none(), false),
        "empty-block" => (Compression::none(), true),
        "fast" => (Compression::fast(), false),
        "best" => (Compression::best(), false),
        _ => (Compression::default(), false),
    }
}

fn main() {
    let args = Args::parse();
    if args.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::init();
    }

    let source = match RAW::new(args.source.to_string_lossy().as_ref()) {
        Ok(r) => r,
        Err(e) => {
            error!("could not open source {}: {e}", args.source.display());
            std::process::exit(2);
        }
    };

    let chunk_size = (args.sectors_per_chunk * args.bytes_per_sector) as usize;

    let mut header_values = HashMap::new();
    if let Some(v) = args.case_number {
        header_values.insert("c".to_string(), v);
    }
    if let Some(v) = args.description {
        header_values.insert("a".to_string(), v);
    }
    if let Some(v) = args.evidence_number {
        header_values.insert("n".to_string(), v);
    }
    if let Some(v) = args.examiner {
        header_values.insert("e".to_string(), v);
    }
    if let Some(v) = args.notes {
        header_values.insert("t".to_string(), v);
    }

    let volume = VolumeSection {
        sectors_per_chunk: args.sectors_per_chunk,
        bytes_per_sector: args.bytes_per_sector,
        media_type: MediaType::Fixed,
        set_identifier: *uuid::Uuid::new_v4().as_bytes(),
        ..Default::default()
    };

    let target_base = args
        .target
        .to_str()
        .map(|s| s.to_string())
        .unwrap_or_default();

    let (compression, empty_block_compression) = parse_compression(&args.compression);

    let config = WriterConfig {
        base_path: PathBuf::from(&target_base),
        naming: SegmentNaming::E01UpperCase,
        format_version: FormatVersion::V1,
        media_kind: MediaKind::Physical,
        compression,
        segment_size_limit: args.segment_size,
        volume,
        header_values,
        sectors_section_name: "sectors",
        starting_segment_number: 1,
        empty_block_compression,
    };

    let mut writer = match Writer::create(config) {
        Ok(w) => w,
        Err(e) => {
            error!("could not create writer: {e}");
            std::process::exit(2);
        }
    };

    let abort = Arc::new(AtomicBool::new(false));
    let progress = NullProgress;

    let result = acquire(
        source,
        chunk_size,
        None,
        args.workers,
        compression,
        empty_block_compression,
        abort,
        &progress,
        |_index, stored, compressed, raw_len| {
            writer.write_encoded_chunk(stored, compressed, raw_len)
        },
    );

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("acquisition failed: {e}");
            std::process::exit(2);
        }
    };

    let mut hash_values = HashMap::new();
    hash_values.insert("MD5".to_string(), outcome.md5.to_vec());
    hash_values.insert("SHA1".to_string(), outcome.sha1.to_vec());
    writer.set_hash_values(hash_values);

    match writer.finish() {
        Ok(segments) => {
            info!(
                "acquired {} chunks into {} segment(s)",
                outcome.chunks_read,
                segments.len()
            );
        }
        Err(e) => {
            error!("could not finalize image: {e}");
            std::process::exit(2);
        }
    }
}
