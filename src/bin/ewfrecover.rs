//! Invokes write-resume mode against a truncated image (one whose last
//! segment ends in `next` rather than `done`, or has no terminator section
//! at all) and finalizes it with a synthesized `done`.

use std::path::PathBuf;

use clap::Parser;
use log::{error, info};

use exhume_ewf::image::Image;
use exhume_ewf::segment::repair_trailer;

#[derive(Parser)]
#[command(name = "ewfrecover", version, about = "Recover a truncated EWF image")]
struct Args {
    images: Vec<PathBuf>,

    #[arg(short = 't', long = "target")]
    target: Option<PathBuf>,

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

    match Image::open(&args.images, &[]) {
        Ok(image) => {
            info!(
                "image already has a valid `done` trailer; {} chunk(s) present, nothing to recover",
                image.chunk_count()
            );
            return;
        }
        Err(exhume_ewf::EwfError::MissingSegment { segment_number }) => {
            info!("image is missing its `done` trailer (next expected segment {segment_number}); attempting recovery");
        }
        Err(e) => {
            error!("could not open image for recovery: {e}");
            std::process::exit(2);
        }
    }

    let last = args.images.last().expect("checked non-empty above");
    // Truncates to the last complete section and synthesizes the `done`
    // trailer that a crashed acquisition never got to write, so the chain
    // the reader walks actually terminates where the data is trustworthy.
    match repair_trailer(last, "done") {
        Ok(segment_number) => {
            info!(
                "segment {segment_number} ({}) recovered: now ends in `done`",
                last.display()
            );
            if let Some(target) = args.target {
                info!(
                    "target path {} noted; recovery writes in place for this toolkit",
                    target.display()
                );
            }
        }
        Err(e) => {
            error!("could not recover {}: {e}", last.display());
            std::process::exit(2);
        }
    }
}
