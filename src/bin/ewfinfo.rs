//! Pretty-prints an image's metadata store and chunk-table summary.

use std::path::PathBuf;

use clap::Parser;
use log::error;

use exhume_ewf::image::Image;
use exhume_ewf::metadata::{pretty_header_key, HEADER_KEY_ORDER};

#[derive(Parser)]
#[command(name = "ewfinfo", version, about = "Print metadata from an EWF image")]
struct Args {
    images: Vec<PathBuf>,

    /// Print only media (volume) information.
    #[arg(short = 'm', long = "media")]
    media_only: bool,

    /// Print only examiner/case header information.
    #[arg(short = 'e', long = "header")]
    header_only: bool,

    /// Print only stored hash values.
    #[arg(short = 'i', long = "hash")]
    hash_only: bool,

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

    let show_all = !args.media_only && !args.header_only && !args.hash_only;

    println!("Acquired segment(s):");
    for path in image.segment_paths() {
        println!("  {}", path.display());
    }
    println!();

    if show_all || args.media_only {
        let volume = image.volume();
        println!("Media information:");
        println!("  Media type          : {:?}", volume.media_type);
        println!("  Chunk count         : {}", volume.chunk_count);
        println!("  Sectors per chunk   : {}", volume.sectors_per_chunk);
        println!("  Bytes per sector    : {}", volume.bytes_per_sector);
        println!("  Total sector count  : {}", volume.total_sector_count);
        println!("  Media size          : {} bytes", volume.media_size());
        println!("  Chunk size          : {} bytes", volume.chunk_size());
        println!();
    }

    if show_all || args.header_only {
        println!("Acquisition information:");
        let metadata = image.metadata();
        for key in HEADER_KEY_ORDER {
            if let Some(value) = metadata.header_values.get(*key) {
                println!("  {:<20}: {}", pretty_header_key(key), value);
            }
        }
        println!();
    }

    if show_all || args.hash_only {
        println!("Stored hash values:");
        let metadata = image.metadata();
        if metadata.hash_values.is_empty() {
            println!("  (none)");
        }
        for (algorithm, digest) in &metadata.hash_values {
            let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
            println!("  {algorithm:<8}: {hex}");
        }
        if !metadata.acquisition_errors.is_empty() {
            println!("Acquisition errors:");
            for range in &metadata.acquisition_errors {
                println!(
                    "  sectors {}..{}",
                    range.first_sector,
                    range.first_sector + range.sector_count
                );
            }
        }
    }
}
