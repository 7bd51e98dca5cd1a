//! Worker-pool acquisition pipeline (§5): `P` threads read and compress
//! chunks from a source concurrently while this thread drains them back
//! into chunk order and hands them to the caller's sink (typically a
//! [`crate::writer::Writer`]).
//!
//! Concurrency is plain `std::thread` + bounded `mpsc` channels, matching
//! the rest of this crate's choice to avoid pulling in an async runtime for
//! what is fundamentally a fixed, CPU-bound fan-out/fan-in.

use std::collections::BTreeMap;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread;

use flate2::Compression;
use md5::{Digest, Md5};
use sha1::Sha1;

use crate::chunk::encode_chunk;
use crate::error::{EwfError, Result};

/// What the worker pool produced: how many chunks were read, plus the
/// running MD5/SHA1 digests computed over the plaintext stream in read
/// order (§4.7 step 3 — these feed the `hash`/`digest` sections the writer
/// emits once acquisition finishes).
pub struct AcquireOutcome {
    pub chunks_read: u64,
    pub md5: [u8; 16],
    pub sha1: [u8; 20],
}

/// A source chunk read off the disk being acquired, tagged with its
/// sequence number so the reorder buffer can restore order regardless of
/// which worker finished first.
struct RawChunk {
    index: u64,
    data: Vec<u8>,
}

struct EncodedChunk {
    index: u64,
    stored: Vec<u8>,
    compressed: bool,
    raw_len: usize,
}

/// Read-side progress hooks; the CLI layer implements this to print a
/// progress bar or periodic percentage, the library itself stays silent
/// beyond `log` calls.
pub trait AcquireProgress: Send + Sync {
    fn on_chunk_done(&self, index: u64, total: Option<u64>);
    fn on_read_error(&self, index: u64, reason: &str);
}

pub struct NullProgress;
impl AcquireProgress for NullProgress {
    fn on_chunk_done(&self, _index: u64, _total: Option<u64>) {}
    fn on_read_error(&self, _index: u64, _reason: &str) {}
}

/// Drives a bounded worker pool over `source`, calling `sink` with encoded
/// chunks strictly in index order. `worker_count` of zero is treated as 1.
/// Returns the chunk count read plus the MD5/SHA1 digests computed over the
/// plaintext stream.
pub fn acquire(
    mut source: impl Read + Send + 'static,
    chunk_size: usize,
    total_chunks: Option<u64>,
    worker_count: usize,
    compression: Compression,
    empty_block_compression: bool,
    abort: Arc<AtomicBool>,
    progress: &dyn AcquireProgress,
    mut sink: impl FnMut(u64, Vec<u8>, bool, usize) -> Result<()>,
) -> Result<AcquireOutcome> {
    let worker_count = worker_count.max(1);
    let (raw_tx, raw_rx): (SyncSender<RawChunk>, Receiver<RawChunk>) =
        sync_channel(worker_count * 2);
    let (encoded_tx, encoded_rx): (SyncSender<EncodedChunk>, Receiver<EncodedChunk>) =
        sync_channel(worker_count * 2);

    let raw_rx = Arc::new(Mutex::new(raw_rx));
    let mut handles = Vec::with_capacity(worker_count);
    for _ in 0..worker_count {
        let raw_rx = Arc::clone(&raw_rx);
        let encoded_tx = encoded_tx.clone();
        let abort = Arc::clone(&abort);
        handles.push(thread::spawn(move || loop {
            if abort.load(Ordering::Relaxed) {
                break;
            }
            let chunk = {
                let rx = raw_rx.lock().expect("raw channel mutex poisoned");
                rx.recv()
            };
            let chunk = match chunk {
                Ok(c) => c,
                Err(_) => break,
            };
            let raw_len = chunk.data.len();
            match encode_chunk(&chunk.data, compression, empty_block_compression) {
                Ok((stored, compressed)) => {
                    if encoded_tx
                        .send(EncodedChunk {
                            index: chunk.index,
                            stored,
                            compressed,
                            raw_len,
                        })
                        .is_err()
                    {
                        break;
                    }
                }
                Err(_) => break,
            }
        }));
    }
    drop(encoded_tx);

    // Reader: feeds the worker pool from this thread, since `source` is
    // typically a single file handle that shouldn't be shared.
    let reader_abort = Arc::clone(&abort);
    let reader = thread::spawn(move || -> Result<(u64, [u8; 16], [u8; 20])> {
        let mut index = 0u64;
        let mut buf = vec![0u8; chunk_size];
        let mut md5 = Md5::new();
        let mut sha1 = Sha1::new();
        loop {
            if reader_abort.load(Ordering::Relaxed) {
                return Err(EwfError::Aborted);
            }
            let mut filled = 0;
            while filled < buf.len() {
                let n = source
                    .read(&mut buf[filled..])
                    .map_err(|e| EwfError::io("acquisition source", e))?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            if filled == 0 {
                break;
            }
            // Hashed here, in the single reader thread, so the digest is
            // computed over the plaintext in strict read order regardless
            // of how the worker pool interleaves compression downstream.
            md5.update(&buf[..filled]);
            sha1.update(&buf[..filled]);
            if raw_tx
                .send(RawChunk {
                    index,
                    data: buf[..filled].to_vec(),
                })
                .is_err()
            {
                break;
            }
            index += 1;
        }
        Ok((index, md5.finalize().into(), sha1.finalize().into()))
    });

    // Reorder buffer: encoded chunks can arrive out of order since workers
    // race; only ever emit strictly in ascending index order.
    let mut pending: BTreeMap<u64, EncodedChunk> = BTreeMap::new();
    let mut next_index = 0u64;
    let mut total_emitted = 0u64;

    while let Ok(chunk) = encoded_rx.recv() {
        pending.insert(chunk.index, chunk);
        while let Some(chunk) = pending.remove(&next_index) {
            sink(chunk.index, chunk.stored, chunk.compressed, chunk.raw_len)?;
            progress.on_chunk_done(chunk.index, total_chunks);
            next_index += 1;
            total_emitted += 1;
        }
    }

    for handle in handles {
        let _ = handle.join();
    }
    let (read_count, md5, sha1) = reader.join().expect("reader thread panicked")?;

    debug_assert_eq!(total_emitted, read_count);
    Ok(AcquireOutcome {
        chunks_read: read_count,
        md5,
        sha1,
    })
}
