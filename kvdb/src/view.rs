//! The ViewSet (component B): an ordered multiset of live reader views,
//! sharded by cookie hash so inserts/removes from unrelated readers never
//! contend on the same lock, with a cached horizon recomputed only when the
//! removed view might have been the minimum.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::seqno::{Seqno, SeqnoClock, SEQNO_MAX};

/// A handle identifying one entry in a [`ViewSet`]. Monotonically assigned
/// and never reused while live, so removing a stale cookie can never
/// collide with a fresh view that happens to land in the same shard.
pub type ViewCookie = u64;

/// A `(seqno, cookie)` pin held by a reader. While it exists in a ViewSet,
/// no version at or before `seqno` may be reclaimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct View {
    pub seqno: Seqno,
    pub cookie: ViewCookie,
}

const SHARD_COUNT: usize = 16;

#[derive(Default)]
struct Shard {
    views: BTreeSet<(Seqno, ViewCookie)>,
}

/// A concurrency-safe ordered collection of live views plus a cached
/// horizon (the minimum live seqno, or [`SEQNO_MAX`] if empty).
///
/// The cache is advisory: it may under-claim (report a horizon lower than
/// the true minimum) but must never over-claim, since over-claiming would
/// let a caller reclaim a version a live view still needs.
pub struct ViewSet {
    shards: Vec<Mutex<Shard>>,
    next_cookie: AtomicU64,
    horizon: AtomicU64,
}

impl ViewSet {
    pub fn new() -> Self {
        ViewSet {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(Shard::default())).collect(),
            next_cookie: AtomicU64::new(1),
            horizon: AtomicU64::new(SEQNO_MAX),
        }
    }

    fn shard_for(&self, cookie: ViewCookie) -> &Mutex<Shard> {
        &self.shards[(cookie as usize) % self.shards.len()]
    }

    /// Samples `clock`'s current seqno and registers a view for it in one
    /// critical section, so no thread can observe a horizon that ignores
    /// this view while still believing the ViewSet is empty.
    pub fn insert(&self, clock: &SeqnoClock) -> View {
        let cookie = self.next_cookie.fetch_add(1, Ordering::Relaxed);
        let shard = self.shard_for(cookie);
        let mut guard = shard.lock();
        let seqno = clock.current();
        guard.views.insert((seqno, cookie));
        drop(guard);
        self.lower_horizon_to(seqno);
        View { seqno, cookie }
    }

    /// Registers a view at an already-known seqno (e.g. inheriting a
    /// transaction's view for a txn-bound cursor, which must not resample
    /// the clock).
    pub fn insert_at(&self, seqno: Seqno) -> View {
        let cookie = self.next_cookie.fetch_add(1, Ordering::Relaxed);
        let shard = self.shard_for(cookie);
        let mut guard = shard.lock();
        guard.views.insert((seqno, cookie));
        drop(guard);
        self.lower_horizon_to(seqno);
        View { seqno, cookie }
    }

    pub fn remove(&self, view: View) {
        let shard = self.shard_for(view.cookie);
        let mut guard = shard.lock();
        guard.views.remove(&(view.seqno, view.cookie));
        drop(guard);
        if view.seqno <= self.horizon.load(Ordering::Acquire) {
            self.recompute_horizon();
        }
    }

    /// The oldest seqno any live view could still observe, or
    /// [`SEQNO_MAX`] if no views are live.
    pub fn horizon(&self) -> Seqno {
        self.horizon.load(Ordering::Acquire)
    }

    pub fn live_count(&self) -> usize {
        self.shards.iter().map(|s| s.lock().views.len()).sum()
    }

    fn lower_horizon_to(&self, candidate: Seqno) {
        let mut observed = self.horizon.load(Ordering::Acquire);
        while candidate < observed {
            match self.horizon.compare_exchange_weak(
                observed,
                candidate,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(cur) => observed = cur,
            }
        }
    }

    fn recompute_horizon(&self) {
        let mut min = SEQNO_MAX;
        for shard in &self.shards {
            if let Some(&(seqno, _)) = shard.lock().views.iter().next() {
                min = min.min(seqno);
            }
        }
        self.horizon.store(min, Ordering::Release);
    }
}

impl Default for ViewSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_horizon_is_max() {
        let vs = ViewSet::new();
        assert_eq!(vs.horizon(), SEQNO_MAX);
    }

    #[test]
    fn horizon_tracks_minimum_live_view() {
        let clock = SeqnoClock::new();
        let vs = ViewSet::new();

        let v1 = vs.insert(&clock); // seqno 1
        clock.advance();
        let v2 = vs.insert(&clock); // seqno 2
        assert_eq!(vs.horizon(), v1.seqno.min(v2.seqno));

        vs.remove(v1);
        assert_eq!(vs.horizon(), v2.seqno);

        vs.remove(v2);
        assert_eq!(vs.horizon(), SEQNO_MAX);
    }

    #[test]
    fn horizon_never_older_than_extant_view() {
        let clock = SeqnoClock::new();
        let vs = ViewSet::new();
        let views: Vec<View> = (0..50)
            .map(|_| {
                clock.advance();
                vs.insert(&clock)
            })
            .collect();

        let true_min = views.iter().map(|v| v.seqno).min().unwrap();
        assert!(vs.horizon() <= true_min);

        // Remove everything but the true minimum holder; horizon must
        // converge to exactly that seqno.
        for v in views.iter().copied().filter(|v| v.seqno != true_min) {
            vs.remove(v);
        }
        assert_eq!(vs.horizon(), true_min);
    }

    #[test]
    fn removing_unknown_view_is_harmless() {
        let vs = ViewSet::new();
        vs.remove(View { seqno: 5, cookie: 999 });
        assert_eq!(vs.horizon(), SEQNO_MAX);
    }
}
