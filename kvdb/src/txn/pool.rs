//! Per-thread transaction descriptor pool: 17 buckets selected by a hash
//! of the calling thread's id, each capped at 15 entries, so descriptor
//! churn on a steady set of worker threads mostly reuses heap allocations
//! instead of round-tripping the allocator on every `begin`/`free`.

use std::hash::{Hash, Hasher};

use parking_lot::Mutex;

use super::TxnInner;

const BUCKETS: usize = 17;
const BUCKET_CAP: usize = 15;

pub struct TxnPool {
    buckets: Vec<Mutex<Vec<Box<TxnInner>>>>,
}

impl TxnPool {
    pub fn new() -> Self {
        TxnPool { buckets: (0..BUCKETS).map(|_| Mutex::new(Vec::new())).collect() }
    }

    fn bucket_index() -> usize {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        std::thread::current().id().hash(&mut hasher);
        (hasher.finish() as usize) % BUCKETS
    }

    pub(crate) fn alloc(&self) -> Box<TxnInner> {
        let idx = Self::bucket_index();
        match self.buckets[idx].lock().pop() {
            Some(mut inner) => {
                inner.reset();
                inner
            }
            None => Box::new(TxnInner::new()),
        }
    }

    pub(crate) fn free(&self, mut inner: Box<TxnInner>) {
        inner.reset();
        let idx = Self::bucket_index();
        let mut bucket = self.buckets[idx].lock();
        if bucket.len() < BUCKET_CAP {
            bucket.push(inner);
        }
    }
}

impl Default for TxnPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_reuses_freed_descriptors() {
        let pool = TxnPool::new();
        let a = pool.alloc();
        let addr = a.as_ref() as *const TxnInner;
        pool.free(a);
        let b = pool.alloc();
        assert_eq!(addr, b.as_ref() as *const TxnInner);
    }

    #[test]
    fn bucket_cap_drops_excess_instead_of_growing_unbounded() {
        let pool = TxnPool::new();
        let idx = TxnPool::bucket_index();
        for _ in 0..(BUCKET_CAP + 5) {
            pool.free(Box::new(TxnInner::new()));
        }
        assert!(pool.buckets[idx].lock().len() <= BUCKET_CAP);
    }
}
