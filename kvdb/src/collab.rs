//! Trait boundaries for the collaborators this control plane orchestrates
//! but does not implement: the in-memory staging layer (`c0sk`), the
//! on-disk tree and its metadata log (`cn`/`cndb`), and the write-ahead
//! log (`wal`). Grounded on the host project's `storage::engine::Engine`
//! seam, generalized for multi-KVS namespacing and MVCC versioning.
//!
//! Production backends for these traits are out of scope for the control
//! plane (see `spec.md` §1); [`crate::mem`] provides a minimal in-memory
//! implementation of each, used by the facade's own tests and by the demo
//! binaries in this workspace.

use crate::error::CResult;
use crate::params::{KvsCparams, KvsRparams};
use crate::seqno::{Seqno, SeqnoRef};

/// Identifies a KVS's keyspace within the shared staging layer. Equal to
/// the KVS's `cnid`.
pub type KvsId = u64;

/// A single key/value pair as returned by a scan, paired with the seqno it
/// was written at (useful for diagnostics; ignored by ordinary readers).
pub type ScanItem = (Vec<u8>, Vec<u8>);

/// Stands in for `c0sk`: the in-memory ingest surface every KVS in a
/// database shares. MVCC-aware (callers pass the seqno a write should land
/// at, and the view a read should be taken at) and namespaced by
/// [`KvsId`] so one staging instance can back every KVS in a database.
pub trait Staging: Send + Sync {
    fn put(&self, kvs: KvsId, key: &[u8], value: &[u8], seqno: SeqnoRef) -> CResult<()>;

    fn delete(&self, kvs: KvsId, key: &[u8], seqno: SeqnoRef) -> CResult<()>;

    /// Inserts a prefix tombstone covering every key starting with
    /// `prefix`, at `seqno`. Returns the number of previously-visible keys
    /// the tombstone now hides (best-effort; may be 0 in write-optimized
    /// implementations that defer the count to compaction).
    fn prefix_delete(&self, kvs: KvsId, prefix: &[u8], seqno: Seqno) -> CResult<usize>;

    fn get(&self, kvs: KvsId, key: &[u8], view: Seqno) -> CResult<Option<Vec<u8>>>;

    /// Ordered scan of the latest visible version of each key as of `view`
    /// within `kvs`, optionally restricted to a prefix.
    fn scan(
        &self,
        kvs: KvsId,
        view: Seqno,
        prefix: Option<&[u8]>,
    ) -> CResult<Box<dyn DoubleEndedIterator<Item = ScanItem> + Send>>;

    /// Flushes the staging layer to stable media. Used by `kvdb_sync` when
    /// no WAL is configured.
    fn sync(&self) -> CResult<()>;

    /// A `0..=100` feedback sensor: ingest pressure this staging instance
    /// is under, consulted by the throttle loop.
    fn pressure(&self) -> u8;
}

/// Stands in for `cn`/`cndb`: per-KVS on-disk storage plus its metadata
/// log. `Handle` is whatever the backend needs to remember per opened KVS
/// (e.g. a tree root reference); the control plane treats it opaquely.
pub trait Tree: Send + Sync {
    type Handle: Send + Sync;

    fn create_kvs(&self, name: &str, cparams: &KvsCparams) -> CResult<KvsId>;

    fn drop_kvs(&self, cnid: KvsId) -> CResult<()>;

    fn open_kvs(&self, cnid: KvsId, rparams: &KvsRparams) -> CResult<Self::Handle>;

    fn close_kvs(&self, handle: Self::Handle) -> CResult<()>;

    /// Invoked by the KVS maintenance loop for every opened KVS, under the
    /// directory mutex, once per tick.
    fn maintain(&self, handle: &Self::Handle, now_ms: u64);

    /// A `0..=100` feedback sensor: compaction-scheduler backlog,
    /// consulted by the throttle loop alongside [`Staging::pressure`].
    fn scheduler_pressure(&self) -> u8;
}

/// Stands in for the write-ahead log. `kvdb_sync` prefers this over
/// [`Staging::sync`] when present.
pub trait Wal: Send + Sync {
    fn sync(&self) -> CResult<()>;
}

/// The single capability the core installs on the staging layer so it can
/// forward ingest notifications to the WAL, in place of a bare
/// pointer-to-function plus opaque argument.
pub trait IngestCallback: Send + Sync {
    fn on_cn_ingest(&self, seqno: Seqno, gen: u64, txn_horizon: Seqno, post: bool);
}
