//! A single interactive session over one in-process [`Kvdb`], driven by a
//! tiny whitespace-split command language read from a `BufRead`. Grounded
//! on the host project's `session::Session::handle_repl` /
//! `handle_reader` split: one entry point for an interactive terminal,
//! another for piped/scripted input, sharing the same command dispatch.

use std::collections::HashMap;
use std::io::{BufRead, Write};

use kvdb::cursor::CursorFlags;
use kvdb::kvdb::Kvdb;
use kvdb::kvs::Kvs;
use kvdb::mem::{fresh_collaborators, MemStaging, MemTree};
use kvdb::params::{KvdbCparams, KvdbRparams, KvsCparams, KvsRparams, OpFlags};
use kvdb::txn::Txn;

pub struct Session {
    db: Kvdb<MemStaging, MemTree>,
    opened: HashMap<String, Kvs<MemStaging, MemTree>>,
    txn: Option<Txn<MemStaging, MemTree>>,
}

impl Session {
    pub fn new() -> anyhow::Result<Self> {
        let (staging, tree) = fresh_collaborators();
        let db = Kvdb::open(staging, tree, None, KvdbCparams::default(), KvdbRparams::default())?;
        Ok(Session { db, opened: HashMap::new(), txn: None })
    }

    /// A free function rather than a `&mut self` method, so callers can
    /// borrow `opened` here while still holding a separate borrow of
    /// `self.txn` for the same command (e.g. `put`'s transaction
    /// argument).
    fn open_kvs<'a>(
        db: &Kvdb<MemStaging, MemTree>,
        opened: &'a mut HashMap<String, Kvs<MemStaging, MemTree>>,
        name: &str,
    ) -> anyhow::Result<&'a Kvs<MemStaging, MemTree>> {
        if !opened.contains_key(name) {
            let kvs = db.kvs_open(name, KvsRparams::default())?;
            opened.insert(name.to_string(), kvs);
        }
        Ok(opened.get(name).expect("just inserted"))
    }

    /// Runs every line from `reader` as one command, writing results to
    /// `out`. Returns once the reader is exhausted or a `quit` is seen.
    pub fn handle_reader<R: BufRead, W: Write>(&mut self, reader: R, mut out: W) -> anyhow::Result<()> {
        for line in reader.lines() {
            let line = line?;
            if self.dispatch(&line, &mut out)? {
                break;
            }
        }
        Ok(())
    }

    /// Runs one command line. Returns `true` if the session should stop.
    fn dispatch<W: Write>(&mut self, line: &str, out: &mut W) -> anyhow::Result<bool> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some(&cmd) = words.first() else { return Ok(false) };

        match cmd {
            "quit" | "exit" => return Ok(true),
            "help" => writeln!(out, "{}", HELP)?,
            "kvs-create" => {
                let [name] = require(&words[1..], ["name"])?;
                self.db.kvs_create(name, KvsCparams::default())?;
                writeln!(out, "OK")?;
            }
            "kvs-drop" => {
                let [name] = require(&words[1..], ["name"])?;
                self.opened.remove(name);
                self.db.kvs_drop(name)?;
                writeln!(out, "OK")?;
            }
            "kvs-list" => {
                for name in self.db.kvs_names() {
                    writeln!(out, "{name}")?;
                }
            }
            "put" => {
                let [kvs_name, key, value] = require(&words[1..], ["kvs", "key", "value"])?;
                let kvs = Self::open_kvs(&self.db, &mut self.opened, kvs_name)?;
                kvs.put(key.as_bytes(), value.as_bytes(), OpFlags::NONE, self.txn.as_mut())?;
                writeln!(out, "OK")?;
            }
            "get" => {
                let [kvs_name, key] = require(&words[1..], ["kvs", "key"])?;
                let kvs = Self::open_kvs(&self.db, &mut self.opened, kvs_name)?;
                match kvs.get(key.as_bytes(), OpFlags::NONE, self.txn.as_ref())? {
                    Some(value) => writeln!(out, "{}", String::from_utf8_lossy(&value))?,
                    None => writeln!(out, "N/A")?,
                }
            }
            "del" => {
                let [kvs_name, key] = require(&words[1..], ["kvs", "key"])?;
                let kvs = Self::open_kvs(&self.db, &mut self.opened, kvs_name)?;
                kvs.delete(key.as_bytes(), self.txn.as_mut())?;
                writeln!(out, "OK")?;
            }
            "pfxdel" => {
                let [kvs_name, prefix] = require(&words[1..], ["kvs", "prefix"])?;
                let kvs = Self::open_kvs(&self.db, &mut self.opened, kvs_name)?;
                let hidden = kvs.prefix_delete(prefix.as_bytes(), self.txn.as_mut())?;
                writeln!(out, "OK ({hidden} hidden)")?;
            }
            "scan" => {
                let kvs_name = words.get(1).ok_or_else(|| anyhow::anyhow!("usage: scan <kvs> [prefix]"))?;
                let prefix = words.get(2).map(|p| p.as_bytes());
                let kvs = Self::open_kvs(&self.db, &mut self.opened, kvs_name)?;
                let mut cursor = kvs.cursor(prefix, CursorFlags::NONE, self.txn.as_ref())?;
                while let Some((k, v)) = cursor.read()? {
                    writeln!(out, "{} = {}", String::from_utf8_lossy(&k), String::from_utf8_lossy(&v))?;
                }
            }
            "txn-begin" => {
                let mut txn = self.db.txn_alloc();
                txn.begin()?;
                self.txn = Some(txn);
                writeln!(out, "OK")?;
            }
            "txn-commit" => {
                let mut txn = self.txn.take().ok_or_else(|| anyhow::anyhow!("no active transaction"))?;
                txn.commit()?;
                writeln!(out, "OK")?;
            }
            "txn-abort" => {
                let mut txn = self.txn.take().ok_or_else(|| anyhow::anyhow!("no active transaction"))?;
                txn.abort()?;
                writeln!(out, "OK")?;
            }
            "info" => {
                let info = self.db.storage_info();
                writeln!(
                    out,
                    "healthy={} horizon={} kvs_count={} live_cursors={} throttle_rate={}",
                    info.healthy, info.horizon, info.kvs_count, info.live_cursor_count, info.throttle_rate_bytes_per_sec
                )?;
            }
            "" => {}
            other => writeln!(out, "unrecognized command {other:?}; try 'help'")?,
        }
        Ok(false)
    }
}

const HELP: &str = "\
commands:
  kvs-create <name>             create a KVS
  kvs-drop <name>                drop a KVS (must not be open)
  kvs-list                       list KVS names
  put <kvs> <key> <value>        write a key
  get <kvs> <key>                read a key
  del <kvs> <key>                delete a key
  pfxdel <kvs> <prefix>          delete every key with the given prefix
  scan <kvs> [prefix]            print every visible key/value pair
  txn-begin                      start a transaction; subsequent put/get/del/scan use it
  txn-commit                     commit the active transaction
  txn-abort                      discard the active transaction
  info                           print storage_info()
  quit                           exit";

fn require<'a, const N: usize>(words: &'a [&'a str], names: [&'static str; N]) -> anyhow::Result<[&'a str; N]> {
    if words.len() < N {
        anyhow::bail!("usage: {}", names.join(" "));
    }
    let mut out = [""; N];
    out.copy_from_slice(&words[..N]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(session: &mut Session, script: &str) -> String {
        let mut out = Vec::new();
        session.handle_reader(script.as_bytes(), &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn put_get_round_trip_through_commands() {
        let mut session = Session::new().unwrap();
        let out = run(&mut session, "kvs-create orders\nput orders k v\nget orders k\n");
        assert!(out.contains("OK"));
        assert!(out.contains('v'));
    }

    #[test]
    fn get_missing_key_prints_not_available() {
        let mut session = Session::new().unwrap();
        let out = run(&mut session, "kvs-create orders\nget orders missing\n");
        assert!(out.contains("N/A"));
    }

    #[test]
    fn transaction_commands_buffer_until_commit() {
        let mut session = Session::new().unwrap();
        let out = run(
            &mut session,
            "kvs-create orders\ntxn-begin\nput orders k v\ntxn-commit\nget orders k\n",
        );
        assert!(out.matches("OK").count() >= 3);
        assert!(out.contains('v'));
    }
}
