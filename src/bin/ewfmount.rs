//! The read-only mount surface. Validates the image and its argument
//! surface, then reports that native FUSE/Dokan mounting requires a
//! platform adapter this crate does not provide — a deliberate, logged
//! non-goal rather than a silently-missing feature.

use std::path::PathBuf;

use clap::Parser;
use log::{error, info, warn};

use exhume_ewf::image::Image;

#[derive(Parser)]
#[command(name = "ewfmount", version, about = "Mount an EWF image (validation only)")]
struct Args {
    image: PathBuf,

    mountpoint: PathBuf,

    /// Mount as "raw" (single device file) or "files" (logical tree).
    #[arg(short = 'f', long = "format", default_value = "raw")]
    format: String,

    /// Extra FUSE options, accepted for CLI compatibility and otherwise ignored.
    #[arg(short = 'X', long = "fuse-options")]
    fuse_options: Option<String>,

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

    if let Some(opts) = &args.fuse_options {
        info!("ignoring platform FUSE options: {opts}");
    }

    let image = match Image::open(&[args.image.clone()], &[]) {
        Ok(img) => img,
        Err(e) => {
            error!("could not open image: {e}");
            std::process::exit(2);
        }
    };

    if !args.mountpoint.is_dir() {
        error!("mountpoint {} is not a directory", args.mountpoint.display());
        std::process::exit(1);
    }

    info!(
        "image validated: {} chunk(s), {} byte(s) of media, format {}",
        image.chunk_count(),
        image.volume().media_size(),
        args.format
    );

    warn!(
        "native mounting is not implemented by this crate: presenting a FUSE/Dokan filesystem \
         requires a platform-specific adapter outside this toolkit's scope. Use `ewfexport -f raw` \
         to materialize the media as a file instead."
    );
    std::process::exit(1);
}
