//! In-memory reference implementations of the [`crate::collab`] traits.
//! Not a production backend — a `BTreeMap`-per-KVS staging layer with no
//! persistence, no compaction, and no WAL — but enough for this crate's
//! own tests and for the workspace's demo binaries to exercise the
//! control plane end to end.
//!
//! Grounded on the host project's `storage::memory::Memory`
//! (`BTreeMap`-backed `Engine` impl), extended with MVCC versioning and
//! multi-KVS namespacing.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::collab::{KvsId, ScanItem, Staging, Tree, Wal};
use crate::error::CResult;
use crate::params::{KvsCparams, KvsRparams};
use crate::seqno::{Seqno, SeqnoRef};

/// `(key, seqno) -> Option<value>`; `None` is a tombstone. Kept as a
/// separate version per write so MVCC reads can find the latest version
/// visible at a given view seqno.
type Versions = BTreeMap<(Vec<u8>, Seqno), Option<Vec<u8>>>;

#[derive(Default)]
struct KvsData {
    versions: Versions,
    /// Prefix tombstones: `(prefix, seqno)`, checked by any read whose key
    /// starts with `prefix` and whose own version predates `seqno`.
    prefix_tombstones: Vec<(Vec<u8>, Seqno)>,
}

/// Stands in for `c0sk`: one shared, lock-protected store namespaced by
/// [`KvsId`].
pub struct MemStaging {
    kvses: RwLock<BTreeMap<KvsId, KvsData>>,
}

impl MemStaging {
    pub fn new() -> Self {
        MemStaging { kvses: RwLock::new(BTreeMap::new()) }
    }

    fn resolve(seqno: SeqnoRef) -> Seqno {
        match seqno {
            SeqnoRef::Txn(s) => s,
            SeqnoRef::Single => unreachable!(
                "callers resolve SeqnoRef::Single to a concrete seqno before reaching Staging"
            ),
            SeqnoRef::Undefined => unreachable!("a write's seqno must be resolved before staging"),
        }
    }
}

impl Default for MemStaging {
    fn default() -> Self {
        Self::new()
    }
}

impl Staging for MemStaging {
    fn put(&self, kvs: KvsId, key: &[u8], value: &[u8], seqno: SeqnoRef) -> CResult<()> {
        let seqno = Self::resolve(seqno);
        let mut kvses = self.kvses.write();
        let data = kvses.entry(kvs).or_default();
        data.versions.insert((key.to_vec(), seqno), Some(value.to_vec()));
        Ok(())
    }

    fn delete(&self, kvs: KvsId, key: &[u8], seqno: SeqnoRef) -> CResult<()> {
        let seqno = Self::resolve(seqno);
        let mut kvses = self.kvses.write();
        let data = kvses.entry(kvs).or_default();
        data.versions.insert((key.to_vec(), seqno), None);
        Ok(())
    }

    fn prefix_delete(&self, kvs: KvsId, prefix: &[u8], seqno: Seqno) -> CResult<usize> {
        let mut kvses = self.kvses.write();
        let data = kvses.entry(kvs).or_default();
        let hidden = data
            .versions
            .keys()
            .filter(|(k, s)| k.starts_with(prefix) && *s < seqno)
            .count();
        data.prefix_tombstones.push((prefix.to_vec(), seqno));
        Ok(hidden)
    }

    fn get(&self, kvs: KvsId, key: &[u8], view: Seqno) -> CResult<Option<Vec<u8>>> {
        let kvses = self.kvses.read();
        let Some(data) = kvses.get(&kvs) else { return Ok(None) };
        Ok(latest_visible(data, key, view))
    }

    fn scan(
        &self,
        kvs: KvsId,
        view: Seqno,
        prefix: Option<&[u8]>,
    ) -> CResult<Box<dyn DoubleEndedIterator<Item = ScanItem> + Send>> {
        let kvses = self.kvses.read();
        let Some(data) = kvses.get(&kvs) else {
            return Ok(Box::new(Vec::new().into_iter()));
        };

        let mut keys: Vec<Vec<u8>> = data.versions.keys().map(|(k, _)| k.clone()).collect();
        keys.dedup();
        let mut out = Vec::new();
        for key in keys {
            if let Some(prefix) = prefix {
                if !key.starts_with(prefix) {
                    continue;
                }
            }
            if let Some(value) = latest_visible(data, &key, view) {
                out.push((key, value));
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(Box::new(out.into_iter()))
    }

    fn sync(&self) -> CResult<()> {
        Ok(())
    }

    fn pressure(&self) -> u8 {
        let kvses = self.kvses.read();
        let total: usize = kvses.values().map(|d| d.versions.len()).sum();
        (total / 1000).min(100) as u8
    }
}

fn latest_visible(data: &KvsData, key: &[u8], view: Seqno) -> Option<Vec<u8>> {
    let Some(((_, value_seqno), value)) = data
        .versions
        .range((key.to_vec(), 0)..=(key.to_vec(), view))
        .next_back()
    else {
        return None;
    };

    // A prefix tombstone only hides a value it postdates; a put after the
    // tombstone resurrects the key, matching ordinary tombstone-then-put
    // semantics.
    let hidden_by = data
        .prefix_tombstones
        .iter()
        .filter(|(prefix, ts)| key.starts_with(prefix.as_slice()) && *ts <= view)
        .map(|(_, ts)| *ts)
        .max();
    match hidden_by {
        Some(ts) if ts > *value_seqno => None,
        _ => value.clone(),
    }
}

/// Stands in for `cn`/`cndb`: an in-memory per-KVS registry. Since
/// [`MemStaging`] already holds all the data, a KVS's "tree handle" here
/// is just its id; `maintain` is a no-op counter bump used by tests to
/// confirm the maintenance loop is actually calling in.
pub struct MemTree {
    next_cnid: AtomicU64,
    maintain_calls: AtomicU64,
}

impl MemTree {
    pub fn new() -> Self {
        MemTree { next_cnid: AtomicU64::new(1), maintain_calls: AtomicU64::new(0) }
    }

    pub fn maintain_calls(&self) -> u64 {
        self.maintain_calls.load(Ordering::Acquire)
    }
}

impl Default for MemTree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree for MemTree {
    type Handle = KvsId;

    fn create_kvs(&self, _name: &str, _cparams: &KvsCparams) -> CResult<KvsId> {
        Ok(self.next_cnid.fetch_add(1, Ordering::AcqRel))
    }

    fn drop_kvs(&self, _cnid: KvsId) -> CResult<()> {
        Ok(())
    }

    fn open_kvs(&self, cnid: KvsId, _rparams: &KvsRparams) -> CResult<Self::Handle> {
        Ok(cnid)
    }

    fn close_kvs(&self, _handle: Self::Handle) -> CResult<()> {
        Ok(())
    }

    fn maintain(&self, _handle: &Self::Handle, _now_ms: u64) {
        self.maintain_calls.fetch_add(1, Ordering::AcqRel);
    }

    fn scheduler_pressure(&self) -> u8 {
        0
    }
}

/// Stands in for the write-ahead log when none is configured: `sync` is a
/// no-op, so `kvdb_sync` falls through to [`Staging::sync`].
pub struct NullWal;

impl Wal for NullWal {
    fn sync(&self) -> CResult<()> {
        Ok(())
    }
}

/// Convenience constructor for tests and demo binaries: a fresh
/// [`MemStaging`]/[`MemTree`] pair, already wrapped the way
/// [`crate::kvdb::Kvdb::create`] expects its collaborators.
pub fn fresh_collaborators() -> (Arc<MemStaging>, Arc<MemTree>) {
    (Arc::new(MemStaging::new()), Arc::new(MemTree::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_is_visible_at_or_after_its_seqno() {
        let s = MemStaging::new();
        s.put(1, b"k", b"v1", SeqnoRef::Txn(5)).unwrap();
        assert_eq!(s.get(1, b"k", 4).unwrap(), None);
        assert_eq!(s.get(1, b"k", 5).unwrap(), Some(b"v1".to_vec()));
    }

    #[test]
    fn later_write_shadows_earlier_one_for_views_after_it() {
        let s = MemStaging::new();
        s.put(1, b"k", b"v1", SeqnoRef::Txn(1)).unwrap();
        s.put(1, b"k", b"v2", SeqnoRef::Txn(2)).unwrap();
        assert_eq!(s.get(1, b"k", 1).unwrap(), Some(b"v1".to_vec()));
        assert_eq!(s.get(1, b"k", 2).unwrap(), Some(b"v2".to_vec()));
    }

    #[test]
    fn delete_tombstones_from_its_seqno_on() {
        let s = MemStaging::new();
        s.put(1, b"k", b"v1", SeqnoRef::Txn(1)).unwrap();
        s.delete(1, b"k", SeqnoRef::Txn(2)).unwrap();
        assert_eq!(s.get(1, b"k", 1).unwrap(), Some(b"v1".to_vec()));
        assert_eq!(s.get(1, b"k", 2).unwrap(), None);
    }

    #[test]
    fn prefix_delete_hides_matching_keys_written_before_it() {
        let s = MemStaging::new();
        s.put(1, b"ab1", b"v", SeqnoRef::Txn(1)).unwrap();
        s.put(1, b"ac1", b"v", SeqnoRef::Txn(1)).unwrap();
        let hidden = s.prefix_delete(1, b"ab", 2).unwrap();
        assert_eq!(hidden, 1);
        assert_eq!(s.get(1, b"ab1", 2).unwrap(), None);
        assert_eq!(s.get(1, b"ac1", 2).unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn write_after_prefix_delete_resurrects_the_key() {
        let s = MemStaging::new();
        s.put(1, b"ab1", b"v1", SeqnoRef::Txn(1)).unwrap();
        s.prefix_delete(1, b"ab", 2).unwrap();
        s.put(1, b"ab1", b"v2", SeqnoRef::Txn(3)).unwrap();
        assert_eq!(s.get(1, b"ab1", 2).unwrap(), None);
        assert_eq!(s.get(1, b"ab1", 3).unwrap(), Some(b"v2".to_vec()));
    }

    #[test]
    fn scan_returns_keys_in_order_restricted_to_prefix() {
        let s = MemStaging::new();
        s.put(1, b"b", b"2", SeqnoRef::Txn(1)).unwrap();
        s.put(1, b"a", b"1", SeqnoRef::Txn(1)).unwrap();
        s.put(1, b"ac", b"3", SeqnoRef::Txn(1)).unwrap();
        let items: Vec<ScanItem> = s.scan(1, 1, Some(b"a")).unwrap().collect();
        assert_eq!(items, vec![(b"a".to_vec(), b"1".to_vec()), (b"ac".to_vec(), b"3".to_vec())]);
    }

    #[test]
    fn mem_tree_assigns_distinct_ids_and_counts_maintenance() {
        let t = MemTree::new();
        let a = t.create_kvs("a", &KvsCparams::default()).unwrap();
        let b = t.create_kvs("b", &KvsCparams::default()).unwrap();
        assert_ne!(a, b);
        t.maintain(&a, 0);
        t.maintain(&a, 100);
        assert_eq!(t.maintain_calls(), 2);
    }
}
