//! A minimal performance-counter registry: named, process-wide atomic
//! counters bumped on the put/get/cursor paths and surfaced through
//! `Kvdb::storage_info` for diagnostics. Not a metrics *export* pipeline
//! (out of scope per the design's non-goals) — just the in-process
//! counters a caller can poll.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

/// Counter names used by the facade; kept as constants so call sites and
/// tests can't typo a key apart.
pub mod counters {
    pub const PUT: &str = "put";
    pub const GET: &str = "get";
    pub const DELETE: &str = "delete";
    pub const PREFIX_DELETE: &str = "prefix_delete";
    pub const CURSOR_CREATE: &str = "cursor_create";
    pub const TXN_BEGIN: &str = "txn_begin";
    pub const TXN_COMMIT: &str = "txn_commit";
    pub const TXN_ABORT: &str = "txn_abort";
}

#[derive(Default)]
pub struct PerfRegistry {
    counters: RwLock<HashMap<&'static str, AtomicU64>>,
}

impl PerfRegistry {
    pub fn new() -> Self {
        PerfRegistry::default()
    }

    pub fn incr(&self, name: &'static str) {
        self.incr_by(name, 1);
    }

    pub fn incr_by(&self, name: &'static str, n: u64) {
        if let Some(counter) = self.counters.read().get(name) {
            counter.fetch_add(n, Ordering::Relaxed);
            return;
        }
        let mut counters = self.counters.write();
        counters.entry(name).or_insert_with(|| AtomicU64::new(0)).fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self, name: &str) -> u64 {
        self.counters.read().get(name).map(|c| c.load(Ordering::Relaxed)).unwrap_or(0)
    }

    pub fn snapshot(&self) -> HashMap<&'static str, u64> {
        self.counters.read().iter().map(|(k, v)| (*k, v.load(Ordering::Relaxed))).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_accumulate() {
        let p = PerfRegistry::new();
        assert_eq!(p.get(counters::PUT), 0);
        p.incr(counters::PUT);
        p.incr_by(counters::PUT, 4);
        assert_eq!(p.get(counters::PUT), 5);
    }

    #[test]
    fn unknown_counter_reads_as_zero() {
        let p = PerfRegistry::new();
        assert_eq!(p.get("nonexistent"), 0);
    }
}
