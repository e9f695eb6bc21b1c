//! The KVS Directory (component D): the name-to-slot table shared by every
//! opened key-value store in a database, plus the public [`Kvs`] handle
//! built on top of it.
//!
//! Grounded on the host project's `storage::engine` open/close bookkeeping,
//! generalized from "one engine per database" to "up to 256 named KVSes
//! sharing one staging instance and one tree backend".

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::collab::{KvsId, Staging, Tree};
use crate::compress::{CompressDescriptor, CompressionOverride};
use crate::error::{CResult, Error};
use crate::kvdb::KvdbInner;
use crate::params::{validate_kvs_name, KvsCparams, KvsRparams, OpFlags};
use crate::perf::counters;
use crate::seqno::SeqnoRef;
use crate::txn::Txn;

/// Maximum number of named KVSes a database may hold at once, matching the
/// fixed-size slot table the design calls for.
pub const MAX_KVS: usize = 256;

struct OpenedState<T: Tree> {
    handle: T::Handle,
    compress: CompressDescriptor,
}

struct Slot<T: Tree> {
    name: String,
    cnid: KvsId,
    cparams: KvsCparams,
    refcount: AtomicUsize,
    opened: Mutex<Option<Arc<OpenedState<T>>>>,
}

struct DirectoryInner {
    by_name: HashMap<String, usize>,
}

/// The structural mutex guards only slot-table membership (create/drop and
/// name lookups); put/get/scan traffic on an already-opened KVS never
/// takes it, since that traffic only touches the `Slot`'s own atomics and
/// its `opened` cell.
pub struct Directory<T: Tree> {
    tree: Arc<T>,
    slots: Mutex<Vec<Option<Arc<Slot<T>>>>>,
    names: Mutex<DirectoryInner>,
}

impl<T: Tree> Directory<T> {
    pub fn new(tree: Arc<T>) -> Self {
        Directory {
            tree,
            slots: Mutex::new((0..MAX_KVS).map(|_| None).collect()),
            names: Mutex::new(DirectoryInner { by_name: HashMap::new() }),
        }
    }

    pub fn create(&self, name: &str, cparams: KvsCparams) -> CResult<KvsId> {
        validate_kvs_name(name)?;
        let mut names = self.names.lock();
        if names.by_name.contains_key(name) {
            return Err(Error::already_exists(format!("kvs {name:?} already exists")));
        }
        let mut slots = self.slots.lock();
        let idx = slots
            .iter()
            .position(|s| s.is_none())
            .ok_or_else(|| Error::invalid_input(format!("database already holds {MAX_KVS} KVSes")))?;

        let cnid = self.tree.create_kvs(name, &cparams)?;
        slots[idx] = Some(Arc::new(Slot {
            name: name.to_string(),
            cnid,
            cparams,
            refcount: AtomicUsize::new(0),
            opened: Mutex::new(None),
        }));
        names.by_name.insert(name.to_string(), idx);
        Ok(cnid)
    }

    pub fn drop_kvs(&self, name: &str) -> CResult<()> {
        let mut names = self.names.lock();
        let idx = *names
            .by_name
            .get(name)
            .ok_or_else(|| Error::not_found(format!("kvs {name:?} does not exist")))?;
        let mut slots = self.slots.lock();
        let slot = slots[idx].as_ref().expect("by_name entries always reference a live slot");
        if slot.refcount.load(Ordering::Acquire) > 0 {
            return Err(Error::resource(format!("kvs {name:?} is still open")));
        }
        self.tree.drop_kvs(slot.cnid)?;
        names.by_name.remove(name);
        slots[idx] = None;
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        let names = self.names.lock();
        let mut out: Vec<String> = names.by_name.keys().cloned().collect();
        out.sort();
        out
    }

    pub fn count(&self) -> usize {
        self.names.lock().by_name.len()
    }

    fn slot_by_name(&self, name: &str) -> CResult<Arc<Slot<T>>> {
        let names = self.names.lock();
        let idx = *names
            .by_name
            .get(name)
            .ok_or_else(|| Error::not_found(format!("kvs {name:?} does not exist")))?;
        let slots = self.slots.lock();
        Ok(slots[idx].clone().expect("by_name entries always reference a live slot"))
    }

    fn open_slot(&self, slot: &Arc<Slot<T>>, rparams: &KvsRparams) -> CResult<Arc<OpenedState<T>>> {
        let mut opened = slot.opened.lock();
        if let Some(state) = opened.as_ref() {
            slot.refcount.fetch_add(1, Ordering::AcqRel);
            return Ok(state.clone());
        }
        let handle = self.tree.open_kvs(slot.cnid, rparams)?;
        let state = Arc::new(OpenedState {
            handle,
            compress: CompressDescriptor::new(rparams.compression()),
        });
        *opened = Some(state.clone());
        slot.refcount.fetch_add(1, Ordering::AcqRel);
        Ok(state)
    }

    /// Called when a [`Kvs`] handle is dropped: decrements the refcount
    /// and, on the last release, closes the backend handle.
    fn release(&self, cnid: KvsId) {
        let slots = self.slots.lock();
        let Some(slot) = slots.iter().flatten().find(|s| s.cnid == cnid) else {
            return;
        };
        if slot.refcount.fetch_sub(1, Ordering::AcqRel) == 1 {
            let mut opened = slot.opened.lock();
            if let Some(state) = opened.take() {
                if let Ok(state) = Arc::try_unwrap(state) {
                    let _ = self.tree.close_kvs(state.handle);
                }
            }
        }
    }

    /// Forwarded to [`Tree::maintain`] by the maintenance loop, for every
    /// currently opened KVS, under the structural mutex.
    pub fn maintain_all(&self, now_ms: u64) {
        let slots = self.slots.lock();
        for slot in slots.iter().flatten() {
            if let Some(state) = slot.opened.lock().as_ref() {
                self.tree.maintain(&state.handle, now_ms);
            }
        }
    }
}

/// A handle to one opened, named key-value store. Put/get/delete dispatch
/// either directly to the staging layer (non-transactional) or buffer into
/// a [`Txn`] for later commit.
pub struct Kvs<S: Staging, T: Tree> {
    db: Arc<KvdbInner<S, T>>,
    cnid: KvsId,
    name: String,
    /// The KVS's configured key-prefix length, used to validate
    /// prefix-delete keys without taking the directory's structural lock.
    pfx_len: u8,
    opened: Arc<OpenedState<T>>,
}

impl<S: Staging, T: Tree> Kvs<S, T> {
    pub(crate) fn open(
        db: Arc<KvdbInner<S, T>>,
        name: &str,
        rparams: &KvsRparams,
    ) -> CResult<Self> {
        let slot = db.directory.slot_by_name(name)?;
        let opened = db.directory.open_slot(&slot, rparams)?;
        Ok(Kvs { db, cnid: slot.cnid, name: name.to_string(), pfx_len: slot.cparams.pfx_len, opened })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> KvsId {
        self.cnid
    }

    pub(crate) fn handle(&self) -> &T::Handle {
        &self.opened.handle
    }

    pub fn put(
        &self,
        key: &[u8],
        value: &[u8],
        flags: OpFlags,
        txn: Option<&mut Txn<S, T>>,
    ) -> CResult<()> {
        if self.db.health.blocks_write() {
            return Err(Error::health("database is unhealthy; writes are blocked"));
        }
        let over = if flags.contains(OpFlags::VALUE_COMPRESSION_OFF) {
            CompressionOverride::ForceOff
        } else if flags.contains(OpFlags::VALUE_COMPRESSION_ON) {
            CompressionOverride::ForceOn
        } else {
            CompressionOverride::Default
        };
        let wire = self.opened.compress.compress_for_storage(value, over);
        if !flags.contains(OpFlags::PRIORITY) {
            let sleep_ns = self.db.throttle.request((key.len() + wire.len()) as u64);
            if sleep_ns > 0 {
                std::thread::sleep(std::time::Duration::from_nanos(sleep_ns));
            }
        }
        self.db.perf.incr(counters::PUT);
        match txn {
            Some(txn) => txn.stage_put(self.cnid, key, &wire),
            None => {
                // A non-transactional write is its own single-operation
                // transaction: it still needs a real seqno from the shared
                // clock so later views can see it, it just skips the
                // buffer-then-commit dance.
                let seqno = self.db.clock.advance();
                self.db.staging.put(self.cnid, key, &wire, SeqnoRef::Txn(seqno))
            }
        }
    }

    pub fn get(
        &self,
        key: &[u8],
        flags: OpFlags,
        txn: Option<&Txn<S, T>>,
    ) -> CResult<Option<Vec<u8>>> {
        let _ = flags; // reserved: decompression is driven by the stored header, not by the caller.
        self.db.perf.incr(counters::GET);
        if let Some(txn) = txn {
            if let Some(local) = txn.local_lookup(self.cnid, key) {
                return Ok(self.decompress(local));
            }
            let view = txn.view_seqno()?;
            let stored = self.db.staging.get(self.cnid, key, view)?;
            return Ok(self.decompress(stored));
        }
        let view = self.db.clock.current();
        let stored = self.db.staging.get(self.cnid, key, view)?;
        Ok(self.decompress(stored))
    }

    fn decompress(&self, stored: Option<Vec<u8>>) -> Option<Vec<u8>> {
        stored.map(|wire| self.opened.compress.decompress_from_storage(&wire))
    }

    pub fn delete(&self, key: &[u8], txn: Option<&mut Txn<S, T>>) -> CResult<()> {
        if self.db.health.blocks_write() {
            return Err(Error::health("database is unhealthy; writes are blocked"));
        }
        self.db.perf.incr(counters::DELETE);
        match txn {
            Some(txn) => txn.stage_delete(self.cnid, key),
            None => {
                let seqno = self.db.clock.advance();
                self.db.staging.delete(self.cnid, key, SeqnoRef::Txn(seqno))
            }
        }
    }

    pub fn prefix_delete(&self, prefix: &[u8], txn: Option<&mut Txn<S, T>>) -> CResult<usize> {
        if self.db.health.blocks_write() {
            return Err(Error::health("database is unhealthy; writes are blocked"));
        }
        if prefix.is_empty() {
            return Err(Error::not_found("prefix-delete key must not be empty"));
        }
        if prefix.len() != self.pfx_len as usize {
            return Err(Error::invalid_input(format!(
                "prefix-delete key must be exactly {} bytes (this kvs's configured prefix length), got {}",
                self.pfx_len,
                prefix.len()
            )));
        }
        self.db.perf.incr(counters::PREFIX_DELETE);
        match txn {
            Some(txn) => {
                txn.stage_prefix_delete(self.cnid, prefix)?;
                Ok(0)
            }
            None => {
                let seqno = self.db.clock.advance();
                self.db.staging.prefix_delete(self.cnid, prefix, seqno)
            }
        }
    }

    pub fn cursor(
        &self,
        prefix: Option<&[u8]>,
        flags: crate::cursor::CursorFlags,
        txn: Option<&Txn<S, T>>,
    ) -> CResult<crate::cursor::Cursor<S, T>> {
        crate::cursor::Cursor::create(self.db.clone(), self.cnid, prefix, flags, txn)
    }
}

impl<S: Staging, T: Tree> Drop for Kvs<S, T> {
    fn drop(&mut self) {
        self.db.directory.release(self.cnid);
    }
}

// Directory and Kvs behavior is exercised end-to-end in this crate's
// integration tests, where crate::mem supplies real Staging/Tree fakes.
