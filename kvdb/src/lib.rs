#![allow(non_camel_case_types)]

//! `kvdb` is an embedded, multi-KVS transactional key-value database
//! engine's control plane: sequence-number allocation, MVCC snapshot
//! views, transaction buffering, a named-KVS directory, cursors, write
//! throttling, health tracking, and background maintenance, all generic
//! over the storage and write-ahead-log backends that actually persist
//! data ([`collab::Staging`], [`collab::Tree`], [`collab::Wal`]).
//!
//! This crate does not ship a production storage backend. [`mem`]
//! provides an in-memory reference implementation of the collaborator
//! traits used by this crate's own tests and by the workspace's demo
//! binaries.
//!
//! ## Getting started
//!
//! ```rust
//! use kvdb::kvdb::Kvdb;
//! use kvdb::mem::fresh_collaborators;
//! use kvdb::params::{KvdbCparams, KvdbRparams, KvsCparams, KvsRparams, OpFlags};
//!
//! fn main() -> kvdb::error::CResult<()> {
//!     let (staging, tree) = fresh_collaborators();
//!     let db = Kvdb::open(staging, tree, None, KvdbCparams::default(), KvdbRparams::default())?;
//!
//!     db.kvs_create("orders", KvsCparams::default())?;
//!     let orders = db.kvs_open("orders", KvsRparams::default())?;
//!
//!     orders.put(b"order-1", b"placed", OpFlags::NONE, None)?;
//!     assert_eq!(orders.get(b"order-1", OpFlags::NONE, None)?, Some(b"placed".to_vec()));
//!
//!     Ok(())
//! }
//! ```

pub mod collab;
pub mod compress;
pub mod cursor;
pub mod error;
pub mod health;
pub mod kvdb;
pub mod kvs;
pub mod maint;
pub mod mem;
pub mod params;
pub mod perf;
pub mod seqno;
pub mod throttle;
pub mod txn;
pub mod view;
