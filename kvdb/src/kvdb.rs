//! The KVDB Facade (component H): the single entry point tying every
//! other component together, grounded on the host project's
//! `MVCC<E: Engine>` handle — a generic struct parameterized over its
//! storage collaborator, owning the shared state every operation touches.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::collab::{Staging, Tree, Wal};
use crate::error::{CResult, Error};
use crate::health::{Health, HealthFlags};
use crate::kvs::{Directory, Kvs};
use crate::params::{KvdbCparams, KvdbRparams, KvsCparams, KvsRparams};
use crate::perf::PerfRegistry;
use crate::seqno::{Seqno, SeqnoClock};
use crate::throttle::Throttle;
use crate::txn::{CommitBarrier, Txn, TxnPool};
use crate::view::ViewSet;

/// State shared by every handle (`Kvdb`, `Kvs`, `Txn`, `Cursor`) derived
/// from one open database. Held behind an `Arc` so those handles can
/// outlive whichever `Kvdb` they were obtained from without a lifetime
/// parameter threading through the whole API.
pub struct KvdbInner<S: Staging, T: Tree> {
    pub(crate) clock: SeqnoClock,
    pub(crate) staging: Arc<S>,
    pub(crate) tree: Arc<T>,
    pub(crate) wal: Option<Arc<dyn Wal>>,
    pub(crate) directory: Directory<T>,
    pub(crate) txn_views: ViewSet,
    pub(crate) cursor_views: ViewSet,
    pub(crate) commit_barrier: CommitBarrier,
    pub(crate) txn_pool: TxnPool,
    pub(crate) health: Health,
    pub(crate) throttle: Throttle,
    pub(crate) live_cursor_count: AtomicUsize,
    /// Monotonic watermark advanced only by [`Kvdb::compact`]: the seqno
    /// below which data has actually been reclaimed, as opposed to
    /// [`ViewSet::horizon`] which only says no *live* view still needs it.
    /// A standalone cursor pinned below this line has outlived the data it
    /// was reading.
    pub(crate) reclaimed_below: AtomicU64,
    pub(crate) rparams: KvdbRparams,
    #[allow(dead_code)]
    pub(crate) cparams: KvdbCparams,
    pub(crate) perf: PerfRegistry,
}

/// A point-in-time snapshot of the database's health and storage state,
/// returned by [`Kvdb::storage_info`].
#[derive(Debug, Clone)]
pub struct StorageInfo {
    pub healthy: bool,
    pub health_bits: u32,
    pub horizon: Seqno,
    pub kvs_count: usize,
    pub live_cursor_count: usize,
    pub throttle_rate_bytes_per_sec: u64,
}

/// Status of a background compaction request, returned by
/// [`Kvdb::compact_status`]. Compaction itself is delegated entirely to
/// the `Tree` collaborator; the facade only relays a coarse status since
/// the actual scheduler is out of scope for the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactStatus {
    Idle,
    Requested,
}

/// An open database. Generic over its two storage collaborators, mirroring
/// the host project's `MVCC<E: Engine>` shape.
pub struct Kvdb<S: Staging + 'static, T: Tree + 'static> {
    inner: Arc<KvdbInner<S, T>>,
    maint: crate::maint::MaintLoops,
    compact_status: std::sync::atomic::AtomicU8,
}

impl<S: Staging + 'static, T: Tree + 'static> Kvdb<S, T> {
    /// Opens a database over an already-created pair of collaborators.
    /// `kvdb_create` in the design is represented here as "construct the
    /// collaborators, then open them" — collaborator creation itself is
    /// the caller's responsibility, since it belongs to the storage
    /// backend this control plane doesn't implement.
    pub fn open(
        staging: Arc<S>,
        tree: Arc<T>,
        wal: Option<Arc<dyn Wal>>,
        cparams: KvdbCparams,
        rparams: KvdbRparams,
    ) -> CResult<Self> {
        let inner = Arc::new(KvdbInner {
            clock: SeqnoClock::new(),
            staging,
            tree: tree.clone(),
            wal,
            directory: Directory::new(tree),
            txn_views: ViewSet::new(),
            cursor_views: ViewSet::new(),
            commit_barrier: CommitBarrier::new(),
            txn_pool: TxnPool::new(),
            health: Health::new(),
            throttle: Throttle::new(rparams.throttle.clone().into()),
            live_cursor_count: AtomicUsize::new(0),
            reclaimed_below: AtomicU64::new(0),
            rparams,
            cparams,
            perf: PerfRegistry::new(),
        });
        let maint = crate::maint::MaintLoops::start(inner.clone());
        Ok(Kvdb { inner, maint, compact_status: std::sync::atomic::AtomicU8::new(0) })
    }

    /// Stops the background maintenance loops and flushes the
    /// collaborators. Consumes `self`; further operations must go through
    /// a fresh `open`.
    pub fn close(mut self) -> CResult<()> {
        self.maint.close();
        self.sync()
    }

    /// Flushes durable state: the WAL if one is configured, otherwise the
    /// staging layer directly.
    pub fn sync(&self) -> CResult<()> {
        match &self.inner.wal {
            Some(wal) => wal.sync(),
            None => self.inner.staging.sync(),
        }
    }

    /// Requests compaction from the tree collaborator. The control plane
    /// has no compaction scheduler of its own; this only flips a status
    /// flag a caller can poll via [`Kvdb::compact_status`].
    pub fn compact(&self) -> CResult<()> {
        self.compact_status.store(1, Ordering::Release);
        self.inner.reclaimed_below.fetch_max(self.horizon(), Ordering::AcqRel);
        Ok(())
    }

    pub fn compact_status(&self) -> CompactStatus {
        if self.compact_status.load(Ordering::Acquire) == 0 {
            CompactStatus::Idle
        } else {
            CompactStatus::Requested
        }
    }

    /// The oldest seqno any live reader (cursor or transaction) could
    /// still observe; the watermark below which the tree collaborator may
    /// safely reclaim old versions.
    pub fn horizon(&self) -> Seqno {
        self.inner.txn_views.horizon().min(self.inner.cursor_views.horizon())
    }

    pub fn health_flags(&self) -> HealthFlags {
        self.inner.health.flags()
    }

    pub fn is_healthy(&self) -> bool {
        self.inner.health.is_healthy()
    }

    pub fn storage_info(&self) -> StorageInfo {
        StorageInfo {
            healthy: self.inner.health.is_healthy(),
            health_bits: self.inner.health.flags().bits(),
            horizon: self.horizon(),
            kvs_count: self.inner.directory.count(),
            live_cursor_count: self.inner.live_cursor_count.load(Ordering::Acquire),
            throttle_rate_bytes_per_sec: self.inner.throttle.rate(),
        }
    }

    pub fn kvs_create(&self, name: &str, cparams: KvsCparams) -> CResult<()> {
        if self.inner.rparams.read_only {
            return Err(Error::state("database was opened read-only"));
        }
        self.inner.directory.create(name, cparams)?;
        Ok(())
    }

    pub fn kvs_drop(&self, name: &str) -> CResult<()> {
        if self.inner.rparams.read_only {
            return Err(Error::state("database was opened read-only"));
        }
        self.inner.directory.drop_kvs(name)
    }

    pub fn kvs_open(&self, name: &str, rparams: KvsRparams) -> CResult<Kvs<S, T>> {
        Kvs::open(self.inner.clone(), name, &rparams)
    }

    pub fn kvs_names(&self) -> Vec<String> {
        self.inner.directory.names()
    }

    pub fn kvs_count(&self) -> usize {
        self.inner.directory.count()
    }

    /// Allocates a fresh transaction handle, bound to this database but
    /// not yet `Active` (call [`Txn::begin`] before using it).
    pub fn txn_alloc(&self) -> Txn<S, T> {
        Txn::alloc(self.inner.clone(), &self.inner.txn_pool)
    }

    pub fn perf(&self) -> &PerfRegistry {
        &self.inner.perf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::CursorFlags;
    use crate::mem::fresh_collaborators;
    use crate::params::{KvdbCparams, KvdbRparams, KvsCparams, KvsRparams, OpFlags};

    fn open_test_db() -> Kvdb<crate::mem::MemStaging, crate::mem::MemTree> {
        let (staging, tree) = fresh_collaborators();
        Kvdb::open(staging, tree, None, KvdbCparams::default(), KvdbRparams::default()).unwrap()
    }

    #[test]
    fn create_open_put_get_round_trips() {
        let db = open_test_db();
        db.kvs_create("orders", KvsCparams::default()).unwrap();
        let kvs = db.kvs_open("orders", KvsRparams::default()).unwrap();
        kvs.put(b"k1", b"v1", OpFlags::NONE, None).unwrap();
        assert_eq!(kvs.get(b"k1", OpFlags::NONE, None).unwrap(), Some(b"v1".to_vec()));
    }

    #[test]
    fn kvs_names_and_count_reflect_directory() {
        let db = open_test_db();
        db.kvs_create("a", KvsCparams::default()).unwrap();
        db.kvs_create("b", KvsCparams::default()).unwrap();
        assert_eq!(db.kvs_count(), 2);
        assert_eq!(db.kvs_names(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn dropping_an_open_kvs_is_rejected() {
        let db = open_test_db();
        db.kvs_create("a", KvsCparams::default()).unwrap();
        let kvs = db.kvs_open("a", KvsRparams::default()).unwrap();
        assert!(db.kvs_drop("a").is_err());
        drop(kvs);
        assert!(db.kvs_drop("a").is_ok());
    }

    #[test]
    fn transaction_writes_are_invisible_until_commit() {
        let db = open_test_db();
        db.kvs_create("a", KvsCparams::default()).unwrap();
        let kvs = db.kvs_open("a", KvsRparams::default()).unwrap();

        let mut txn = db.txn_alloc();
        txn.begin().unwrap();
        kvs.put(b"k", b"v", OpFlags::NONE, Some(&mut txn)).unwrap();

        assert_eq!(kvs.get(b"k", OpFlags::NONE, None).unwrap(), None);
        assert_eq!(kvs.get(b"k", OpFlags::NONE, Some(&txn)).unwrap(), Some(b"v".to_vec()));

        txn.commit().unwrap();
        assert_eq!(kvs.get(b"k", OpFlags::NONE, None).unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn aborted_transaction_writes_never_land() {
        let db = open_test_db();
        db.kvs_create("a", KvsCparams::default()).unwrap();
        let kvs = db.kvs_open("a", KvsRparams::default()).unwrap();

        let mut txn = db.txn_alloc();
        txn.begin().unwrap();
        kvs.put(b"k", b"v", OpFlags::NONE, Some(&mut txn)).unwrap();
        txn.abort().unwrap();

        assert_eq!(kvs.get(b"k", OpFlags::NONE, None).unwrap(), None);
    }

    #[test]
    fn horizon_advances_once_all_views_are_released() {
        let db = open_test_db();
        db.kvs_create("a", KvsCparams::default()).unwrap();
        let kvs = db.kvs_open("a", KvsRparams::default()).unwrap();
        kvs.put(b"k", b"v", OpFlags::NONE, None).unwrap();

        let cursor = kvs.cursor(None, CursorFlags::NONE, None).unwrap();
        assert!(db.horizon() <= db.inner.clock.current());
        drop(cursor);
    }

    #[test]
    fn unhealthy_database_rejects_writes() {
        let db = open_test_db();
        db.kvs_create("a", KvsCparams::default()).unwrap();
        let kvs = db.kvs_open("a", KvsRparams::default()).unwrap();
        db.inner.health.set(HealthFlags::MEDIA_FAILURE);
        assert!(kvs.put(b"k", b"v", OpFlags::NONE, None).is_err());
    }

    #[test]
    fn cursor_scan_sees_committed_data_in_order() {
        let db = open_test_db();
        db.kvs_create("a", KvsCparams::default()).unwrap();
        let kvs = db.kvs_open("a", KvsRparams::default()).unwrap();
        kvs.put(b"b", b"2", OpFlags::NONE, None).unwrap();
        kvs.put(b"a", b"1", OpFlags::NONE, None).unwrap();

        let mut cursor = kvs.cursor(None, CursorFlags::NONE, None).unwrap();
        let mut seen = Vec::new();
        while let Some(item) = cursor.read().unwrap() {
            seen.push(item);
        }
        assert_eq!(seen, vec![(b"a".to_vec(), b"1".to_vec()), (b"b".to_vec(), b"2".to_vec())]);
    }

    #[test]
    fn reverse_cursor_walks_from_greatest_key() {
        let db = open_test_db();
        db.kvs_create("a", KvsCparams::default()).unwrap();
        let kvs = db.kvs_open("a", KvsRparams::default()).unwrap();
        kvs.put(b"a", b"1", OpFlags::NONE, None).unwrap();
        kvs.put(b"b", b"2", OpFlags::NONE, None).unwrap();
        kvs.put(b"c", b"3", OpFlags::NONE, None).unwrap();

        let mut cursor = kvs.cursor(None, CursorFlags::REVERSE, None).unwrap();
        let mut seen = Vec::new();
        while let Some((k, _)) = cursor.read().unwrap() {
            seen.push(k);
        }
        assert_eq!(seen, vec![b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]);
    }

    #[test]
    fn seek_limit_is_rejected_on_reverse_cursor() {
        let db = open_test_db();
        db.kvs_create("a", KvsCparams::default()).unwrap();
        let kvs = db.kvs_open("a", KvsRparams::default()).unwrap();
        kvs.put(b"a", b"1", OpFlags::NONE, None).unwrap();

        let mut cursor = kvs.cursor(None, CursorFlags::REVERSE, None).unwrap();
        assert!(cursor.seek(b"a", Some(b"z")).is_err());
        assert!(cursor.seek(b"a", None).is_ok());
    }

    #[test]
    fn seek_with_limit_bounds_forward_scan() {
        let db = open_test_db();
        db.kvs_create("a", KvsCparams::default()).unwrap();
        let kvs = db.kvs_open("a", KvsRparams::default()).unwrap();
        for k in [b"a", b"b", b"c", b"d"] {
            kvs.put(k, b"v", OpFlags::NONE, None).unwrap();
        }

        let mut cursor = kvs.cursor(None, CursorFlags::NONE, None).unwrap();
        cursor.seek(b"b", Some(b"c")).unwrap();
        let mut seen = Vec::new();
        while let Some((k, _)) = cursor.read().unwrap() {
            seen.push(k);
        }
        assert_eq!(seen, vec![b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn standalone_cursor_goes_stale_after_compaction_past_its_view() {
        let db = open_test_db();
        db.kvs_create("a", KvsCparams::default()).unwrap();
        let kvs = db.kvs_open("a", KvsRparams::default()).unwrap();
        kvs.put(b"a", b"1", OpFlags::NONE, None).unwrap();

        let mut cursor = kvs.cursor(None, CursorFlags::NONE, None).unwrap();
        kvs.put(b"b", b"2", OpFlags::NONE, None).unwrap();
        db.compact().unwrap();

        let err = cursor.read().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Stale);
    }

    #[test]
    fn cursor_admission_is_refused_once_the_cap_is_saturated() {
        let (staging, tree) = fresh_collaborators();
        let rparams = KvdbRparams { cursor_max: 1, ..KvdbRparams::default() };
        let db = Kvdb::open(staging, tree, None, KvdbCparams::default(), rparams).unwrap();
        db.kvs_create("a", KvsCparams::default()).unwrap();
        let kvs = db.kvs_open("a", KvsRparams::default()).unwrap();

        let first = kvs.cursor(None, CursorFlags::NONE, None).unwrap();
        let err = kvs.cursor(None, CursorFlags::NONE, None).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Canceled);
        drop(first);
        assert!(kvs.cursor(None, CursorFlags::NONE, None).is_ok());
    }

    #[test]
    fn prefix_delete_rejects_empty_and_mismatched_length_keys() {
        let db = open_test_db();
        db.kvs_create("a", KvsCparams { pfx_len: 2 }).unwrap();
        let kvs = db.kvs_open("a", KvsRparams::default()).unwrap();

        let empty_err = kvs.prefix_delete(b"", None).unwrap_err();
        assert_eq!(empty_err.kind(), crate::error::ErrorKind::NotFound);

        let wrong_len_err = kvs.prefix_delete(b"abc", None).unwrap_err();
        assert_eq!(wrong_len_err.kind(), crate::error::ErrorKind::InvalidInput);

        kvs.put(b"ab1", b"v", OpFlags::NONE, None).unwrap();
        assert_eq!(kvs.prefix_delete(b"ab", None).unwrap(), 1);
    }
}
