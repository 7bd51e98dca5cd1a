//! Bounded LRU cache of decoded chunks, shared across readers of one image
//! (§4.5).
//!
//! Concurrent misses on the same chunk index are coalesced: the first
//! caller to miss marks the index "in flight" and the rest wait on a
//! condvar rather than each re-reading and re-decompressing the same bytes.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};

/// Default capacity, in chunks, not bytes — chunk size is fixed per image
/// so this is equivalent to a byte budget once `chunk_size` is known.
pub const DEFAULT_CAPACITY: usize = 64;

enum Slot {
    InFlight,
    Ready(Arc<Vec<u8>>),
}

struct Inner {
    slots: HashMap<usize, Slot>,
    lru: VecDeque<usize>,
    capacity: usize,
}

pub struct ChunkCache {
    inner: Mutex<Inner>,
    ready: Condvar,
}

/// What the caller should do after calling [`ChunkCache::start`].
pub enum CacheLookup {
    /// The chunk was already cached; here it is.
    Hit(Arc<Vec<u8>>),
    /// Nobody is decoding this chunk yet; the caller must decode it and
    /// call [`ChunkCache::finish`] with the result.
    Miss,
}

impl ChunkCache {
    pub fn new(capacity: usize) -> Self {
        ChunkCache {
            inner: Mutex::new(Inner {
                slots: HashMap::new(),
                lru: VecDeque::new(),
                capacity: capacity.max(1),
            }),
            ready: Condvar::new(),
        }
    }

    /// Looks up `chunk_index`. On a miss, marks it in-flight so concurrent
    /// callers block in this same call until [`Self::finish`] is called,
    /// rather than racing to decode it twice.
    pub fn start(&self, chunk_index: usize) -> CacheLookup {
        let mut inner = self.inner.lock().expect("chunk cache mutex poisoned");
        loop {
            match inner.slots.get(&chunk_index) {
                Some(Slot::Ready(data)) => {
                    let data = Arc::clone(data);
                    Self::touch(&mut inner, chunk_index);
                    return CacheLookup::Hit(data);
                }
                Some(Slot::InFlight) => {
                    inner = self.ready.wait(inner).expect("chunk cache mutex poisoned");
                    continue;
                }
                None => {
                    inner.slots.insert(chunk_index, Slot::InFlight);
                    return CacheLookup::Miss;
                }
            }
        }
    }

    /// Completes an in-flight decode, storing the result and waking any
    /// waiters. Must be called exactly once after a [`CacheLookup::Miss`].
    pub fn finish(&self, chunk_index: usize, data: Arc<Vec<u8>>) {
        let mut inner = self.inner.lock().expect("chunk cache mutex poisoned");
        Self::evict_if_needed(&mut inner);
        inner.slots.insert(chunk_index, Slot::Ready(data));
        inner.lru.push_back(chunk_index);
        self.ready.notify_all();
    }

    /// Aborts an in-flight decode (the decode attempt failed), so the slot
    /// is free for the next caller to retry rather than wedging forever.
    pub fn abort(&self, chunk_index: usize) {
        let mut inner = self.inner.lock().expect("chunk cache mutex poisoned");
        inner.slots.remove(&chunk_index);
        self.ready.notify_all();
    }

    fn touch(inner: &mut Inner, chunk_index: usize) {
        inner.lru.retain(|&i| i != chunk_index);
        inner.lru.push_back(chunk_index);
    }

    fn evict_if_needed(inner: &mut Inner) {
        while inner.lru.len() >= inner.capacity {
            let Some(victim) = inner.lru.pop_front() else {
                break;
            };
            inner.slots.remove(&victim);
        }
    }
}

impl Default for ChunkCache {
    fn default() -> Self {
        ChunkCache::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_then_hit() {
        let cache = ChunkCache::new(4);
        match cache.start(0) {
            CacheLookup::Miss => {}
            _ => panic!("expected a miss on first lookup"),
        }
        cache.finish(0, Arc::new(vec![1, 2, 3]));
        match cache.start(0) {
            CacheLookup::Hit(data) => assert_eq!(*data, vec![1, 2, 3]),
            CacheLookup::Miss => panic!("expected a hit after finish"),
        }
    }

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let cache = ChunkCache::new(2);
        for i in 0..3 {
            assert!(matches!(cache.start(i), CacheLookup::Miss));
            cache.finish(i, Arc::new(vec![i as u8]));
        }
        // chunk 0 should have been evicted to make room for chunk 2.
        assert!(matches!(cache.start(0), CacheLookup::Miss));
        cache.abort(0);
    }

    #[test]
    fn abort_frees_slot_for_retry() {
        let cache = ChunkCache::new(4);
        assert!(matches!(cache.start(5), CacheLookup::Miss));
        cache.abort(5);
        assert!(matches!(cache.start(5), CacheLookup::Miss));
    }
}
