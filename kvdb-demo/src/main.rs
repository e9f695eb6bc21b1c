use kvdb::cursor::CursorFlags;
use kvdb::error::CResult;
use kvdb::kvdb::Kvdb;
use kvdb::mem::fresh_collaborators;
use kvdb::params::{KvdbCparams, KvdbRparams, KvsCparams, KvsRparams, OpFlags};

fn main() {
    println!("Hello, kvdb!");

    run().unwrap();

    println!("Bye~");
}

/// Walks through the facade end to end: create a database, create and
/// open a KVS, exercise put/get/delete and a transaction, take a cursor
/// scan, and confirm the visibility rules the control plane promises.
fn run() -> CResult<()> {
    let (staging, tree) = fresh_collaborators();
    let db = Kvdb::open(staging, tree, None, KvdbCparams::default(), KvdbRparams::default())?;

    db.kvs_create("orders", KvsCparams::default())?;
    let orders = db.kvs_open("orders", KvsRparams::default())?;

    orders.put(b"b", b"2", OpFlags::NONE, None)?;
    orders.put(b"b", b"2-updated", OpFlags::NONE, None)?;

    orders.put(b"e", b"5", OpFlags::NONE, None)?;
    orders.delete(b"e", None)?;

    orders.put(b"c", b"0", OpFlags::NONE, None)?;
    orders.delete(b"c", None)?;
    orders.put(b"c", b"3", OpFlags::NONE, None)?;

    orders.put(b"a", b"1", OpFlags::NONE, None)?;

    orders.delete(b"f", None)?;

    orders.delete(b"d", None)?;
    orders.put(b"d", b"4", OpFlags::NONE, None)?;

    let mut cursor = orders.cursor(None, CursorFlags::NONE, None)?;
    let mut scanned = Vec::new();
    while let Some(item) = cursor.read()? {
        scanned.push(item);
    }
    assert_eq!(
        scanned,
        vec![
            (b"a".to_vec(), b"1".to_vec()),
            (b"b".to_vec(), b"2-updated".to_vec()),
            (b"c".to_vec(), b"3".to_vec()),
            (b"d".to_vec(), b"4".to_vec()),
        ],
    );
    cursor.destroy();

    // A transaction's writes are invisible to ordinary readers until
    // commit, then visible to everyone.
    let mut txn = db.txn_alloc();
    txn.begin()?;
    orders.put(b"g", b"6", OpFlags::NONE, Some(&mut txn))?;
    assert_eq!(orders.get(b"g", OpFlags::NONE, None)?, None);
    assert_eq!(orders.get(b"g", OpFlags::NONE, Some(&txn))?, Some(b"6".to_vec()));
    txn.commit()?;
    assert_eq!(orders.get(b"g", OpFlags::NONE, None)?, Some(b"6".to_vec()));

    println!("storage_info: {:?}", db.storage_info());

    drop(orders);
    db.kvs_drop("orders")?;
    db.close()?;

    Ok(())
}
