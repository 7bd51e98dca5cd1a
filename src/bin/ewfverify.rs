//! Streams an image through its configured digests and compares the result
//! against the stored `hash`/`digest` section values.

use std::io::Read;
use std::path::PathBuf;

use clap::Parser;
use log::{error, info, warn};
use md5::{Digest, Md5};
use sha1::Sha1;
use sha2::Sha256;

use exhume_ewf::image::Image;

#[derive(Parser)]
#[command(name = "ewfverify", version, about = "Verify an EWF image's integrity")]
struct Args {
    /// Segment files making up the image, in order.
    images: Vec<PathBuf>,

    /// Digest to compute: md5, sha1, sha256, all.
    #[arg(short = 'd', long = "digest", default_value = "all")]
    digest: String,

    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
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

    let want_md5 = args.digest == "md5" || args.digest == "all";
    let want_sha1 = args.digest == "sha1" || args.digest == "all";
    let want_sha256 = args.digest == "sha256" || args.digest == "all";

    let mut md5 = Md5::new();
    let mut sha1 = Sha1::new();
    let mut sha256 = Sha256::new();

    let mut stream = image.open_stream();
    let mut buf = [0u8; 65536];
    let mut read_error = false;
    loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if want_md5 {
                    md5.update(&buf[..n]);
                }
                if want_sha1 {
                    sha1.update(&buf[..n]);
                }
                if want_sha256 {
                    sha256.update(&buf[..n]);
                }
            }
            Err(e) => {
                warn!("read error while verifying: {e}");
                read_error = true;
                break;
            }
        }
    }

    if read_error {
        error!("verification aborted: a chunk failed checksum validation");
        std::process::exit(3);
    }

    let mut mismatch = false;
    if want_md5 {
        let computed = hex(&md5.finalize());
        match image.metadata().hash_values.get("MD5") {
            Some(stored) if hex(stored) == computed => info!("MD5 match: {computed}"),
            Some(stored) => {
                error!("MD5 mismatch: stored {}, computed {computed}", hex(stored));
                mismatch = true;
            }
            None => info!("MD5 (no stored value to compare): {computed}"),
        }
    }
    if want_sha1 {
        let computed = hex(&sha1.finalize());
        match image.metadata().hash_values.get("SHA1") {
            Some(stored) if hex(stored) == computed => info!("SHA1 match: {computed}"),
            Some(stored) => {
                error!("SHA1 mismatch: stored {}, computed {computed}", hex(stored));
                mismatch = true;
            }
            None => info!("SHA1 (no stored value to compare): {computed}"),
        }
    }
    if want_sha256 {
        let computed = hex(&sha256.finalize());
        info!("SHA256: {computed}");
    }

    if mismatch {
        std::process::exit(4);
    }
    info!("verification complete");
}
