//! Byte-I/O handle: a pool of positioned-read/write file descriptors
//! bounded at a configurable ceiling, LRU-evicted when full (§4.1).
//!
//! Every segment read in this crate goes through a [`FilePool`] — never
//! through a raw [`File`] held directly by an upper layer — so that an
//! image spanning hundreds of segments never exceeds the process's
//! descriptor budget.

use std::collections::{HashMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{EwfError, Result};

/// Default descriptor ceiling when the caller doesn't override it. Real
/// `rlimit`-aware sizing is a platform concern left to the CLI layer; the
/// library just needs a sane, conservative default.
pub const DEFAULT_MAX_OPEN_FILES: usize = 128;

struct PoolEntry {
    path: PathBuf,
    file: File,
}

/// A pool of on-demand-opened files, keyed by a small integer `path_id`
/// assigned at registration time. Thread-safe: each `path_id` is effectively
/// serialized through the pool's single mutex, and concurrent reads on
/// different `path_id`s still only block each other for the brief window of
/// opening/evicting descriptors, not for the read itself (the lock is held
/// across `read_exact`, matching the "per-path_id serializable" contract —
/// cheaper pooling schemes are left for future work, see `DESIGN.md`).
pub struct FilePool {
    paths: Vec<PathBuf>,
    writable: bool,
    max_open: usize,
    inner: Mutex<PoolInner>,
}

struct PoolInner {
    open: HashMap<usize, PoolEntry>,
    lru: VecDeque<usize>,
}

impl FilePool {
    pub fn new(paths: Vec<PathBuf>, writable: bool) -> Self {
        Self::with_capacity(paths, writable, DEFAULT_MAX_OPEN_FILES)
    }

    pub fn with_capacity(paths: Vec<PathBuf>, writable: bool, max_open: usize) -> Self {
        FilePool {
            paths,
            writable,
            max_open: max_open.max(1),
            inner: Mutex::new(PoolInner {
                open: HashMap::new(),
                lru: VecDeque::new(),
            }),
        }
    }

    /// Registers a new path, returning its `path_id`. Used by the writer
    /// when it opens a fresh segment mid-acquisition.
    pub fn register(&mut self, path: PathBuf) -> usize {
        self.paths.push(path);
        self.paths.len() - 1
    }

    pub fn path(&self, path_id: usize) -> &Path {
        &self.paths[path_id]
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    fn touch(inner: &mut PoolInner, path_id: usize) {
        inner.lru.retain(|&id| id != path_id);
        inner.lru.push_back(path_id);
    }

    fn ensure_open<'a>(&self, inner: &'a mut PoolInner, path_id: usize) -> Result<()> {
        if inner.open.contains_key(&path_id) {
            Self::touch(inner, path_id);
            return Ok(());
        }

        while inner.open.len() >= self.max_open {
            let evict_id = match inner.lru.pop_front() {
                Some(id) => id,
                None => break,
            };
            if let Some(entry) = inner.open.remove(&evict_id) {
                log::debug!("evicting pooled descriptor for {}", entry.path.display());
            }
        }

        let path = &self.paths[path_id];
        let file = OpenOptions::new()
            .read(true)
            .write(self.writable)
            .create(self.writable)
            .open(path)
            .map_err(|e| EwfError::io(path.clone(), e))?;
        log::debug!("opened pooled descriptor for {}", path.display());
        inner.open.insert(path_id, PoolEntry { path: path.clone(), file });
        inner.lru.push_back(path_id);
        Ok(())
    }

    /// Reads exactly `buf.len()` bytes from `path_id` at `offset`.
    pub fn read_at(&self, path_id: usize, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut inner = self.inner.lock().expect("file pool mutex poisoned");
        self.ensure_open(&mut inner, path_id)?;
        let entry = inner.open.get_mut(&path_id).expect("just ensured open");
        entry
            .file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| entry.file.read_exact(buf))
            .map_err(|e| EwfError::io(entry.path.clone(), e))
    }

    /// Writes `buf` at `offset`, extending the file if necessary.
    pub fn write_at(&self, path_id: usize, offset: u64, buf: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock().expect("file pool mutex poisoned");
        self.ensure_open(&mut inner, path_id)?;
        let entry = inner.open.get_mut(&path_id).expect("just ensured open");
        entry
            .file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| entry.file.write_all(buf))
            .map_err(|e| EwfError::io(entry.path.clone(), e))
    }

    pub fn flush(&self, path_id: usize) -> Result<()> {
        let mut inner = self.inner.lock().expect("file pool mutex poisoned");
        self.ensure_open(&mut inner, path_id)?;
        let entry = inner.open.get_mut(&path_id).expect("just ensured open");
        entry
            .file
            .sync_all()
            .map_err(|e| EwfError::io(entry.path.clone(), e))
    }

    pub fn file_size(&self, path_id: usize) -> Result<u64> {
        let mut inner = self.inner.lock().expect("file pool mutex poisoned");
        self.ensure_open(&mut inner, path_id)?;
        let entry = inner.open.get_mut(&path_id).expect("just ensured open");
        entry
            .file
            .metadata()
            .map(|m| m.len())
            .map_err(|e| EwfError::io(entry.path.clone(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn reads_back_what_was_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        std::fs::write(&path, b"hello world").unwrap();

        let pool = FilePool::new(vec![path], false);
        let mut buf = [0u8; 5];
        pool.read_at(0, 6, &mut buf).unwrap();
        assert_eq!(&buf, b"world");
    }

    #[test]
    fn evicts_lru_beyond_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = Vec::new();
        for i in 0..5 {
            let path = dir.path().join(format!("{i}.bin"));
            let mut f = std::fs::File::create(&path).unwrap();
            f.write_all(&[i as u8; 4]).unwrap();
            paths.push(path);
        }
        let pool = FilePool::with_capacity(paths, false, 2);
        let mut buf = [0u8; 4];
        for i in 0..5 {
            pool.read_at(i, 0, &mut buf).unwrap();
            assert_eq!(buf, [i as u8; 4]);
        }
        // Capacity-bounded: no assertion on descriptor count possible from
        // outside, but this at least exercises the eviction path without
        // panicking or losing data.
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w.bin");
        std::fs::write(&path, []).unwrap();
        let pool = FilePool::new(vec![path], true);
        pool.write_at(0, 0, b"abc").unwrap();
        let mut buf = [0u8; 3];
        pool.read_at(0, 0, &mut buf).unwrap();
        assert_eq!(&buf, b"abc");
    }
}
