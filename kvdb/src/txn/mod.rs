//! Transaction Registry & Pool (component C): per-thread pooled
//! transaction descriptors, a commit barrier that drains in-flight commits
//! before a cursor refresh can trust the commit horizon, and the
//! write-buffering transaction handle itself.
//!
//! Grounded on the host project's `mvcc::transaction::Transaction`
//! (begin/commit/abort state machine over an `Engine`), generalized to a
//! pooled descriptor plus multi-KVS write buffering.

pub mod pool;

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::collab::{KvsId, Staging, Tree};
use crate::error::{CResult, Error};
use crate::kvdb::KvdbInner;
use crate::seqno::{Seqno, SeqnoRef, SEQNO_UNDEFINED};
use crate::view::View;

pub use pool::TxnPool;

/// A transaction's lifecycle state, per the state machine the control
/// plane imposes on every descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    /// Freshly allocated or returned to the pool; not bound to a view.
    Invalid,
    Active,
    Committed,
    Aborted,
}

#[derive(Clone)]
enum PendingOp {
    Put(Vec<u8>),
    Delete,
    PrefixDelete,
}

/// The pooled, engine-agnostic payload: buffered writes plus the view this
/// transaction reads through. Kept separate from [`Txn`] so the pool can
/// hand these out without knowing `S`/`T`.
pub(crate) struct TxnInner {
    state: TxnState,
    view: Option<View>,
    commit_seqno: Seqno,
    writes: Vec<(KvsId, Vec<u8>, PendingOp)>,
    /// Bumped on every `begin`; lets a cursor bound to this transaction
    /// detect that it has moved on to a new generation and must refresh.
    generation: u64,
}

impl TxnInner {
    fn new() -> Self {
        TxnInner {
            state: TxnState::Invalid,
            view: None,
            commit_seqno: SEQNO_UNDEFINED,
            writes: Vec::new(),
            generation: 0,
        }
    }

    fn reset(&mut self) {
        self.state = TxnState::Invalid;
        self.view = None;
        self.commit_seqno = SEQNO_UNDEFINED;
        self.writes.clear();
    }
}

/// Coordinates cursor refresh with in-flight commits: a cursor that reads
/// the commit horizon must first know that no commit currently in progress
/// will land at a seqno it would otherwise have missed.
pub struct CommitBarrier {
    in_flight: Mutex<u64>,
    cv: Condvar,
}

impl CommitBarrier {
    pub fn new() -> Self {
        CommitBarrier { in_flight: Mutex::new(0), cv: Condvar::new() }
    }

    fn begin_commit(&self) {
        *self.in_flight.lock() += 1;
    }

    fn end_commit(&self) {
        let mut guard = self.in_flight.lock();
        *guard -= 1;
        if *guard == 0 {
            self.cv.notify_all();
        }
    }

    /// Blocks until every commit in progress at the time of the call has
    /// finished. New commits starting after the call don't extend the wait.
    pub fn drain(&self) {
        let mut guard = self.in_flight.lock();
        while *guard != 0 {
            self.cv.wait(&mut guard);
        }
    }
}

impl Default for CommitBarrier {
    fn default() -> Self {
        Self::new()
    }
}

/// A transaction handle bound to a database. Writes are buffered locally
/// and only staged to the collaborator on `commit`; `abort` or `Drop`
/// (while still `Active`) discard them.
pub struct Txn<S: Staging, T: Tree> {
    db: Arc<KvdbInner<S, T>>,
    inner: Option<Box<TxnInner>>,
}

impl<S: Staging, T: Tree> Txn<S, T> {
    pub(crate) fn alloc(db: Arc<KvdbInner<S, T>>, pool: &TxnPool) -> Self {
        Txn { db, inner: Some(pool.alloc()) }
    }

    pub fn state(&self) -> TxnState {
        self.inner.as_ref().map(|i| i.state).unwrap_or(TxnState::Invalid)
    }

    fn inner_mut(&mut self) -> CResult<&mut TxnInner> {
        self.inner
            .as_mut()
            .map(|b| b.as_mut())
            .ok_or_else(|| Error::internal("transaction has already been freed"))
    }

    fn inner_ref(&self) -> CResult<&TxnInner> {
        self.inner
            .as_ref()
            .map(|b| b.as_ref())
            .ok_or_else(|| Error::internal("transaction has already been freed"))
    }

    /// Binds this descriptor to a fresh view and moves it to `Active`.
    /// Valid from `Invalid`, `Committed`, or `Aborted` (i.e. the descriptor
    /// is reused rather than reallocated between transactions).
    pub fn begin(&mut self) -> CResult<()> {
        if self.state() == TxnState::Active {
            return Err(Error::state("transaction is already active"));
        }
        let view = self.db.txn_views.insert(&self.db.clock);
        let inner = self.inner_mut()?;
        inner.reset();
        inner.view = Some(view);
        inner.state = TxnState::Active;
        inner.generation = inner.generation.wrapping_add(1);
        self.db.perf.incr(crate::perf::counters::TXN_BEGIN);
        Ok(())
    }

    pub fn view_seqno(&self) -> CResult<Seqno> {
        Ok(self.inner_ref()?.view.map(|v| v.seqno).unwrap_or(SEQNO_UNDEFINED))
    }

    pub fn generation(&self) -> CResult<u64> {
        Ok(self.inner_ref()?.generation)
    }

    fn require_active(&self) -> CResult<()> {
        if self.state() != TxnState::Active {
            return Err(Error::state(format!(
                "transaction must be ACTIVE, is {:?}",
                self.state()
            )));
        }
        Ok(())
    }

    pub(crate) fn stage_put(&mut self, kvs: KvsId, key: &[u8], value: &[u8]) -> CResult<()> {
        self.require_active()?;
        let inner = self.inner_mut()?;
        inner.writes.push((kvs, key.to_vec(), PendingOp::Put(value.to_vec())));
        Ok(())
    }

    pub(crate) fn stage_delete(&mut self, kvs: KvsId, key: &[u8]) -> CResult<()> {
        self.require_active()?;
        let inner = self.inner_mut()?;
        inner.writes.push((kvs, key.to_vec(), PendingOp::Delete));
        Ok(())
    }

    pub(crate) fn stage_prefix_delete(&mut self, kvs: KvsId, prefix: &[u8]) -> CResult<()> {
        self.require_active()?;
        let inner = self.inner_mut()?;
        inner.writes.push((kvs, prefix.to_vec(), PendingOp::PrefixDelete));
        Ok(())
    }

    /// Read-your-own-writes lookup: `Some(Some(value))` for a locally
    /// buffered put, `Some(None)` for a locally buffered delete (including
    /// one implied by a prefix-delete), `None` if this key hasn't been
    /// touched locally and the caller should fall through to the
    /// collaborator's snapshot read.
    pub(crate) fn local_lookup(&self, kvs: KvsId, key: &[u8]) -> Option<Option<Vec<u8>>> {
        let inner = self.inner.as_ref()?;
        for (id, k, op) in inner.writes.iter().rev() {
            if *id != kvs {
                continue;
            }
            match op {
                PendingOp::Put(v) if k.as_slice() == key => return Some(Some(v.clone())),
                PendingOp::Delete if k.as_slice() == key => return Some(None),
                PendingOp::PrefixDelete if key.starts_with(k.as_slice()) => return Some(None),
                _ => {}
            }
        }
        None
    }

    /// Assigns a commit seqno, stages every buffered write to the
    /// collaborator under it, and releases this transaction's view.
    /// Partial application on a mid-commit error is intentionally not
    /// rolled back: a collaborator failure here is expected to also raise
    /// a health flag, and the transaction is left `Aborted`.
    pub fn commit(&mut self) -> CResult<()> {
        self.require_active()?;
        self.db.commit_barrier.begin_commit();
        let result = self.apply_writes();
        self.db.commit_barrier.end_commit();

        let inner = self.inner_mut()?;
        if let Some(view) = inner.view.take() {
            self.db.txn_views.remove(view);
        }
        match result {
            Ok(seqno) => {
                let inner = self.inner_mut()?;
                inner.commit_seqno = seqno;
                inner.state = TxnState::Committed;
                self.db.perf.incr(crate::perf::counters::TXN_COMMIT);
                Ok(())
            }
            Err(e) => {
                let inner = self.inner_mut()?;
                inner.state = TxnState::Aborted;
                Err(e)
            }
        }
    }

    fn apply_writes(&mut self) -> CResult<Seqno> {
        let seqno = self.db.clock.advance();
        let db = self.db.clone();
        let inner = self.inner_mut()?;
        for (kvs, key, op) in inner.writes.drain(..) {
            match op {
                PendingOp::Put(value) => db.staging.put(kvs, &key, &value, SeqnoRef::Txn(seqno))?,
                PendingOp::Delete => db.staging.delete(kvs, &key, SeqnoRef::Txn(seqno))?,
                PendingOp::PrefixDelete => db.staging.prefix_delete(kvs, &key, seqno).map(|_| ())?,
            }
        }
        Ok(seqno)
    }

    /// Discards buffered writes and releases this transaction's view
    /// without staging anything.
    pub fn abort(&mut self) -> CResult<()> {
        self.require_active()?;
        let db = self.db.clone();
        let inner = self.inner_mut()?;
        inner.writes.clear();
        if let Some(view) = inner.view.take() {
            db.txn_views.remove(view);
        }
        inner.state = TxnState::Aborted;
        self.db.perf.incr(crate::perf::counters::TXN_ABORT);
        Ok(())
    }

    /// Returns this descriptor to the pool, aborting it first if it is
    /// still active. Equivalent to dropping the handle.
    pub fn free(self) {
        drop(self)
    }
}

impl<S: Staging, T: Tree> Drop for Txn<S, T> {
    fn drop(&mut self) {
        if self.state() == TxnState::Active {
            let _ = self.abort();
        }
        if let Some(inner) = self.inner.take() {
            self.db.txn_pool.free(inner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_barrier_drains_immediately_when_idle() {
        let b = CommitBarrier::new();
        b.drain();
    }

    #[test]
    fn commit_barrier_tracks_nesting() {
        let b = CommitBarrier::new();
        b.begin_commit();
        b.begin_commit();
        b.end_commit();
        b.end_commit();
        b.drain();
    }
}
