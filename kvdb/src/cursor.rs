//! The Cursor Engine (component E): a stateful ordered iterator over one
//! KVS, either free-standing (pins its own view) or bound to a
//! transaction (reads through the transaction's view plus its buffered
//! writes).
//!
//! Grounded on the host project's `mvcc::scan` iterator-over-a-snapshot
//! pattern, generalized with the explicit state machine and admission
//! control `spec.md` calls for.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::collab::{KvsId, ScanItem, Staging, Tree};
use crate::error::{CResult, Error};
use crate::kvdb::KvdbInner;
use crate::seqno::Seqno;
use crate::txn::Txn;

/// Cursor creation flags. Only [`CursorFlags::REVERSE`] is defined; see
/// `spec.md` §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CursorFlags(u32);

impl CursorFlags {
    pub const NONE: CursorFlags = CursorFlags(0);
    /// Walk the KVS from the greatest key to the least.
    pub const REVERSE: CursorFlags = CursorFlags(1 << 0);

    pub fn contains(self, other: CursorFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for CursorFlags {
    type Output = CursorFlags;
    fn bitor(self, rhs: CursorFlags) -> CursorFlags {
        CursorFlags(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorDirection {
    Forward,
    Reverse,
}

/// The cursor lifecycle. `Txn`-bound cursors additionally track the
/// transaction's generation so a commit/abort/begin on the bound
/// transaction can be detected and forces an `update` before further use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// Usable: `read` and `seek` are valid.
    Use,
    /// Bound to a transaction; behaves like `Use` but `update` re-syncs to
    /// the transaction's current write buffer and view on every call.
    Txn,
    /// Latched a fatal error; every operation but `destroy` now fails with
    /// that same error until the cursor is updated or destroyed.
    Err,
    /// Destroyed or never successfully created.
    Invalid,
}

enum Binding<S: Staging, T: Tree> {
    /// `view_seqno` is the snapshot this cursor reads through. The
    /// corresponding `ViewSet` registration is only held long enough to
    /// capture the initial scan (see the creation protocol in `create`);
    /// once released, the horizon is free to advance past it, and
    /// `Cursor::check_usable` watches for that happening.
    Standalone { db: Arc<KvdbInner<S, T>>, view_seqno: Seqno },
    Txn { generation: u64 },
}

/// An ordered, optionally prefix-restricted iterator over one KVS's
/// visible key/value pairs as of a pinned view.
pub struct Cursor<S: Staging, T: Tree> {
    db: Arc<KvdbInner<S, T>>,
    kvs: KvsId,
    prefix: Option<Vec<u8>>,
    state: CursorState,
    binding: Option<Binding<S, T>>,
    direction: CursorDirection,
    buffer: Vec<ScanItem>,
    position: usize,
    /// Set by `seek`'s optional limit: `read` reports end-of-scan once
    /// `position` reaches this index, even if the buffer holds more.
    limit_end: Option<usize>,
    latched_err: Option<Error>,
}

impl<S: Staging, T: Tree> std::fmt::Debug for Cursor<S, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor").finish_non_exhaustive()
    }
}

impl<S: Staging, T: Tree> Cursor<S, T> {
    /// Creates a cursor. `txn` is `Some` for a transaction-bound cursor;
    /// `None` for a free-standing one. Admission control rejects creation
    /// outright once the configured cursor cap is already saturated.
    pub(crate) fn create(
        db: Arc<KvdbInner<S, T>>,
        kvs: KvsId,
        prefix: Option<&[u8]>,
        flags: CursorFlags,
        txn: Option<&Txn<S, T>>,
    ) -> CResult<Self> {
        let live = db.live_cursor_count.load(Ordering::Acquire);
        if live >= db.rparams.cursor_max {
            return Err(Error::canceled("cursor admission limit reached"));
        }
        let direction =
            if flags.contains(CursorFlags::REVERSE) { CursorDirection::Reverse } else { CursorDirection::Forward };

        // Two-step protocol: register the view before pinning the scan so
        // no commit landing between the two steps can be missed, then
        // drain any commit already in flight so the pinned view reflects a
        // fully-applied snapshot. `registered_view` is released below once
        // the initial scan has captured it; from then on the Staging/Tree
        // collaborators, not this ViewSet, are responsible for the pinned
        // snapshot's data.
        let (binding, view_seqno, registered_view) = match txn {
            Some(txn) => {
                let generation = txn.generation()?;
                (Binding::Txn { generation }, txn.view_seqno()?, None)
            }
            None => {
                let view = db.cursor_views.insert(&db.clock);
                db.commit_barrier.drain();
                (Binding::Standalone { db: db.clone(), view_seqno: view.seqno }, view.seqno, Some(view))
            }
        };

        db.live_cursor_count.fetch_add(1, Ordering::AcqRel);

        let mut cursor = Cursor {
            db: db.clone(),
            kvs,
            prefix: prefix.map(|p| p.to_vec()),
            state: if matches!(binding, Binding::Txn { .. }) { CursorState::Txn } else { CursorState::Use },
            binding: Some(binding),
            direction,
            buffer: Vec::new(),
            position: 0,
            limit_end: None,
            latched_err: None,
        };
        let result = cursor.reload(view_seqno, txn);
        if let Some(view) = registered_view {
            db.cursor_views.remove(view);
        }
        result?;
        db.perf.incr(crate::perf::counters::CURSOR_CREATE);
        Ok(cursor)
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    fn reload(&mut self, view_seqno: Seqno, txn: Option<&Txn<S, T>>) -> CResult<()> {
        let scan = self
            .db
            .staging
            .scan(self.kvs, view_seqno, self.prefix.as_deref())
            .map_err(|e| self.latch(e))?;
        let mut items: Vec<ScanItem> = match self.direction {
            CursorDirection::Forward => scan.collect(),
            CursorDirection::Reverse => scan.rev().collect(),
        };

        if let Some(txn) = txn {
            self.apply_txn_overlay(&mut items, txn);
        }

        self.buffer = items;
        self.position = 0;
        self.limit_end = None;
        Ok(())
    }

    fn apply_txn_overlay(&self, items: &mut Vec<ScanItem>, txn: &Txn<S, T>) {
        for item in items.iter_mut() {
            if let Some(local) = txn.local_lookup(self.kvs, &item.0) {
                if let Some(v) = local {
                    item.1 = v;
                }
            }
        }
        items.retain(|(k, _)| txn.local_lookup(self.kvs, k).map(|v| v.is_some()).unwrap_or(true));
    }

    fn latch(&mut self, err: Error) -> Error {
        self.state = CursorState::Err;
        self.latched_err = Some(err.clone());
        err
    }

    /// A standalone cursor's pinned view is "reclaimed" once the horizon
    /// has advanced past it without this cursor having been refreshed:
    /// once `check_usable` observes that, reads fail `ESTALE` until the
    /// cursor is updated (via `refresh`) or destroyed. Bound to an explicit
    /// compaction watermark rather than the live horizon directly, since a
    /// live horizon recomputation alone says nothing about whether data
    /// below it has actually been discarded yet.
    fn is_reclaimed(&self) -> bool {
        match &self.binding {
            Some(Binding::Standalone { db, view_seqno }) => {
                *view_seqno < db.reclaimed_below.load(Ordering::Acquire)
            }
            _ => false,
        }
    }

    fn check_usable(&mut self) -> CResult<()> {
        if self.state != CursorState::Invalid && self.is_reclaimed() {
            let err = self.latch(Error::stale());
            return Err(err);
        }
        match self.state {
            CursorState::Use | CursorState::Txn => Ok(()),
            CursorState::Err => Err(self
                .latched_err
                .clone()
                .unwrap_or_else(|| Error::internal("cursor latched an error"))),
            CursorState::Invalid => Err(Error::state("cursor has been destroyed")),
        }
    }

    /// Re-syncs a `Txn`-bound cursor to its transaction's current write
    /// buffer and generation; a no-op for a standalone cursor. Must be
    /// called after the bound transaction commits, aborts, or begins
    /// again before further reads.
    pub fn update(&mut self, txn: &Txn<S, T>) -> CResult<()> {
        self.check_usable()?;
        if let Some(Binding::Txn { generation }) = &mut self.binding {
            let current_gen = txn.generation()?;
            *generation = current_gen;
        }
        let view_seqno = txn.view_seqno()?;
        self.reload(view_seqno, Some(txn))
    }

    /// Re-pins a standalone cursor to the database's current view,
    /// following the same register/drain/release protocol as creation.
    pub fn refresh(&mut self) -> CResult<()> {
        self.check_usable()?;
        let Some(Binding::Standalone { db, .. }) = self.binding.take() else {
            return Err(Error::state("refresh is only valid for a standalone cursor"));
        };
        let view = db.cursor_views.insert(&db.clock);
        db.commit_barrier.drain();
        let seqno = view.seqno;
        self.binding = Some(Binding::Standalone { db: db.clone(), view_seqno: seqno });
        let result = self.reload(seqno, None);
        db.cursor_views.remove(view);
        self.state = CursorState::Use;
        result
    }

    /// Seeks to the first buffered item at or after `key` (or, for a
    /// reverse cursor, at or before `key`). `limit` bounds subsequent
    /// `read`s to the `[key, limit]` range and is rejected outright on a
    /// reverse cursor, matching the original implementation's
    /// limit-on-reverse restriction.
    pub fn seek(&mut self, key: &[u8], limit: Option<&[u8]>) -> CResult<()> {
        self.check_usable()?;
        if limit.is_some() && self.direction == CursorDirection::Reverse {
            return Err(Error::invalid_input("cursor seek limit is invalid on a reverse cursor"));
        }
        self.position = match self.direction {
            CursorDirection::Forward => self.buffer.partition_point(|(k, _)| k.as_slice() < key),
            CursorDirection::Reverse => self.buffer.partition_point(|(k, _)| k.as_slice() > key),
        };
        self.limit_end = limit.map(|limit_key| {
            self.buffer.partition_point(|(k, _)| k.as_slice() <= limit_key)
        });
        Ok(())
    }

    /// Returns the next item in scan order, or `None` at end of scan (or
    /// at the limit set by `seek`, if any).
    pub fn read(&mut self) -> CResult<Option<ScanItem>> {
        self.check_usable()?;
        if let Some(end) = self.limit_end {
            if self.position >= end {
                return Ok(None);
            }
        }
        if self.position >= self.buffer.len() {
            return Ok(None);
        }
        let item = self.buffer[self.position].clone();
        self.position += 1;
        Ok(Some(item))
    }

    pub fn destroy(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if self.state == CursorState::Invalid {
            return;
        }
        self.binding = None;
        self.db.live_cursor_count.fetch_sub(1, Ordering::AcqRel);
        self.state = CursorState::Invalid;
    }
}

impl<S: Staging, T: Tree> Drop for Cursor<S, T> {
    fn drop(&mut self) {
        self.teardown();
    }
}

// Cursor admission, visibility, and the two-step view-pin/drain creation
// protocol are exercised end-to-end in this crate's integration tests
// (kvdb.rs), where crate::mem supplies real Staging/Tree fakes.
