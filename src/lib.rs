//! A library for reading, verifying, and producing Expert Witness
//! Compression Format (EWF/E01) forensic disk images.
//!
//! The entry point is [`image::Image`]: open a physical or logical evidence
//! container from its segment (and optional delta) paths, then read its
//! media bytes through [`stream::ChunkStream`] or walk its logical file
//! tree through [`logical`]. New images are produced incrementally through
//! [`writer::Writer`], typically driven by the worker pool in [`acquire`].

pub mod acquire;
pub mod cache;
pub mod checksum;
pub mod chunk;
pub mod delta;
pub mod error;
pub mod format;
pub mod image;
pub mod io_pool;
pub mod logical;
pub mod metadata;
pub mod naming;
pub mod raw;
pub mod section;
pub mod segment;
pub mod stream;
pub mod table;
pub mod volume;
pub mod writer;

pub use error::{EwfError, Result};
pub use image::Image;
