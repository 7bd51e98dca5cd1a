//! Crate-wide error type.
//!
//! Mirrors the error kinds a segmented EWF image can raise: I/O failures
//! bubbled up from the byte-I/O pool, format-detection failures, per-section
//! corruption, and per-chunk decode/checksum failures. Higher layers (the
//! image, the writer, the CLI binaries) match on these variants to decide
//! whether a failure is locally recoverable (`table` → `table2`) or must be
//! surfaced to the caller.

use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum EwfError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unsupported format: {reason}")]
    UnsupportedFormat { reason: String },

    #[error("corrupt section at segment {segment}, offset 0x{offset:x} ({section_type}): {reason}")]
    CorruptSection {
        segment: u16,
        offset: u64,
        section_type: String,
        reason: String,
    },

    #[error("corrupt table for chunk {chunk_index}: both table and table2 failed validation")]
    CorruptTable { chunk_index: usize },

    #[error("failed to decompress chunk {chunk_index}: {reason}")]
    DecompressError { chunk_index: usize, reason: String },

    #[error("checksum mismatch for chunk {chunk_index}: expected 0x{expected:08x}, got 0x{actual:08x}")]
    ChecksumError {
        chunk_index: usize,
        expected: u32,
        actual: u32,
    },

    #[error("segment {segment_number} is missing but the image has no `done` section yet")]
    MissingSegment { segment_number: u16 },

    #[error("image opened for write has no `done` section; write-resume is required")]
    WriteResumeNeeded,

    #[error("operation aborted")]
    Aborted,

    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },
}

impl EwfError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        EwfError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<EwfError> for io::Error {
    fn from(err: EwfError) -> Self {
        match err {
            EwfError::Io { source, .. } => source,
            other => io::Error::new(io::ErrorKind::Other, other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, EwfError>;
