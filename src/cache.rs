//! Block cache (§6.1.1).
//!
//! Fragments are memory-mapped, so the OS page cache already absorbs
//! repeat reads and nothing in the core requires an explicit cache to be
//! correct. `BlockCache` is a seam so a process-wide LRU can be slotted in
//! later without touching `fragment`/`merge` code; the default
//! configuration uses [`NoCache`], which does no bookkeeping at all.

use std::collections::HashMap;
use std::sync::Mutex;

/// A cache of decoded block contents keyed by `(fragment uri, block offset)`.
pub trait BlockCache: Send + Sync {
    fn get(&self, key: &(String, u64)) -> Option<Vec<u8>>;
    fn put(&self, key: (String, u64), value: Vec<u8>);
}

/// Does no caching; every lookup misses. The default, since `memmap2` plus
/// the OS page cache already does this job for free.
#[derive(Debug, Default)]
pub struct NoCache;

impl BlockCache for NoCache {
    fn get(&self, _key: &(String, u64)) -> Option<Vec<u8>> {
        None
    }

    fn put(&self, _key: (String, u64), _value: Vec<u8>) {}
}

struct Entry {
    value: Vec<u8>,
    /// Monotonic touch counter; the entry with the smallest one is evicted.
    last_used: u64,
}

struct Inner {
    entries: HashMap<(String, u64), Entry>,
    clock: u64,
    capacity: usize,
}

/// A capacity-bounded, process-wide LRU block cache. Eviction is O(n) in
/// the number of cached entries, which is fine at the block-cache scale
/// this crate operates at; a real deployment wanting a tighter bound would
/// swap this implementation out behind the same trait.
pub struct LruBlockCache {
    inner: Mutex<Inner>,
}

impl LruBlockCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                clock: 0,
                capacity,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlockCache for LruBlockCache {
    fn get(&self, key: &(String, u64)) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock().unwrap();
        inner.clock += 1;
        let clock = inner.clock;
        let entry = inner.entries.get_mut(key)?;
        entry.last_used = clock;
        Some(entry.value.clone())
    }

    fn put(&self, key: (String, u64), value: Vec<u8>) {
        let mut inner = self.inner.lock().unwrap();
        inner.clock += 1;
        let clock = inner.clock;

        if inner.capacity == 0 {
            return;
        }

        if !inner.entries.contains_key(&key) && inner.entries.len() >= inner.capacity {
            if let Some(evict_key) = inner.entries.iter().min_by_key(|(_, e)| e.last_used).map(|(k, _)| k.clone()) {
                inner.entries.remove(&evict_key);
            }
        }

        inner.entries.insert(key, Entry { value, last_used: clock });
    }
}
