//! Re-encodes an image's logical byte stream into raw, a fresh EWF image,
//! or (for logical-evidence images) the original acquired files.

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use clap::Parser;
use flate2::Compression;
use log::{error, info, warn};

use exhume_ewf::format::{FormatVersion, MediaKind, SegmentNaming};
use exhume_ewf::image::Image;
use exhume_ewf::logical::{EntryKind, LogicalEntry};
use exhume_ewf::writer::{Writer, WriterConfig, DEFAULT_SEGMENT_SIZE};

#[derive(Parser)]
#[command(name = "ewfexport", version, about = "Export an EWF image to another format")]
struct Args {
    images: Vec<PathBuf>,

    #[arg(short = 'f', long = "format", default_value = "raw")]
    format: String,

    #[arg(short = 't', long = "target")]
    target: PathBuf,

    #[arg(short = 'S', long = "segsize", default_value_t = DEFAULT_SEGMENT_SIZE)]
    segment_size: u64,

    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

fn main() {
    let args = Args::parse();
    if args.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::init();
    }

    if args.images.is_empty() {
        error!("no image segments given");
        std::process::exit(1);
    }

    let image = match Image::open(&args.images, &[]) {
        Ok(img) => img,
        Err(e) => {
            error!("could not open image: {e}");
            std::process::exit(2);
        }
    };

    match args.format.as_str() {
        "raw" => {
            let mut out = match std::fs::File::create(&args.target) {
                Ok(f) => f,
                Err(e) => {
                    error!("could not create {}: {e}", args.target.display());
                    std::process::exit(2);
                }
            };
            let mut stream = image.open_stream();
            let mut buf = [0u8; 65536];
            loop {
                match stream.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if let Err(e) = out.write_all(&buf[..n]) {
                            error!("write error: {e}");
                            std::process::exit(2);
                        }
                    }
                    Err(e) => {
                        warn!("read error during export: {e}");
                        std::process::exit(3);
                    }
                }
            }
            info!("exported raw image to {}", args.target.display());
        }
        "ewf" => {
            let config = WriterConfig {
                base_path: args.target.clone(),
                naming: SegmentNaming::E01UpperCase,
                format_version: FormatVersion::V1,
                media_kind: MediaKind::Physical,
                compression: Compression::default(),
                segment_size_limit: args.segment_size,
                volume: image.volume().clone(),
                header_values: HashMap::new(),
                sectors_section_name: "sectors",
                starting_segment_number: 1,
                empty_block_compression: false,
            };
            let mut writer = match Writer::create(config) {
                Ok(w) => w,
                Err(e) => {
                    error!("could not create writer: {e}");
                    std::process::exit(2);
                }
            };

            let mut stream = image.open_stream();
            let chunk_size = image.volume().chunk_size();
            let mut buf = vec![0u8; chunk_size];
            loop {
                let mut filled = 0;
                while filled < buf.len() {
                    match stream.read(&mut buf[filled..]) {
                        Ok(0) => break,
                        Ok(n) => filled += n,
                        Err(e) => {
                            error!("read error during export: {e}");
                            std::process::exit(3);
                        }
                    }
                }
                if filled == 0 {
                    break;
                }
                if let Err(e) = writer.write_chunk(&buf[..filled]) {
                    error!("write error during export: {e}");
                    std::process::exit(2);
                }
            }

            match writer.finish() {
                Ok(segments) => info!("exported into {} segment(s)", segments.len()),
                Err(e) => {
                    error!("could not finalize exported image: {e}");
                    std::process::exit(2);
                }
            }
        }
        "files" => {
            let tree = match image.logical_tree() {
                Some(tree) => tree,
                None => {
                    error!(
                        "image carries no `ltree` section; files export requires a logical-\
                         evidence (.L01/.Lx01) input"
                    );
                    std::process::exit(1);
                }
            };

            if let Err(e) = std::fs::create_dir_all(&args.target) {
                error!("could not create {}: {e}", args.target.display());
                std::process::exit(2);
            }

            let mut stream = image.open_stream();
            let mut written = 0usize;
            for root in &tree.roots {
                if let Err(e) = export_entry(root, &args.target, &mut stream, &mut written) {
                    error!("export failed: {e}");
                    std::process::exit(2);
                }
            }
            info!(
                "exported {written} file(s) from the logical evidence tree to {}",
                args.target.display()
            );
        }
        other => {
            error!("unsupported export format {other:?}; expected raw, ewf, or files");
            std::process::exit(1);
        }
    }
}

/// Recreates one `ltree` entry under `parent_dir`, recursing into folders
/// and copying each file's logical byte range out of the chunk stream.
fn export_entry(
    entry: &LogicalEntry,
    parent_dir: &Path,
    stream: &mut exhume_ewf::stream::ChunkStream,
    written: &mut usize,
) -> std::io::Result<()> {
    let path = parent_dir.join(&entry.name);
    match entry.kind {
        EntryKind::Folder => {
            std::fs::create_dir_all(&path)?;
            for child in &entry.children {
                export_entry(child, &path, stream, written)?;
            }
        }
        EntryKind::File => {
            stream.seek(SeekFrom::Start(entry.start_offset))?;
            let mut out = std::fs::File::create(&path)?;
            let mut remaining = entry.logical_size;
            let mut buf = [0u8; 65536];
            while remaining > 0 {
                let want = remaining.min(buf.len() as u64) as usize;
                let n = stream.read(&mut buf[..want])?;
                if n == 0 {
                    break;
                }
                out.write_all(&buf[..n])?;
                remaining -= n as u64;
            }
            *written += 1;
        }
    }
    Ok(())
}
