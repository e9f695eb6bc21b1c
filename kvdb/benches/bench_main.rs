use criterion::{black_box, criterion_group, criterion_main, Criterion};

use kvdb::kvdb::Kvdb;
use kvdb::mem::fresh_collaborators;
use kvdb::params::{KvdbCparams, KvdbRparams, KvsCparams, KvsRparams, OpFlags};

fn open_bench_db() -> Kvdb<kvdb::mem::MemStaging, kvdb::mem::MemTree> {
    let (staging, tree) = fresh_collaborators();
    let db = Kvdb::open(staging, tree, None, KvdbCparams::default(), KvdbRparams::default()).unwrap();
    db.kvs_create("bench", KvsCparams::default()).unwrap();
    db
}

fn bench_put_get(c: &mut Criterion) {
    let db = open_bench_db();
    let kvs = db.kvs_open("bench", KvsRparams::default()).unwrap();

    c.bench_function("kvs_put", |b| {
        let mut i: u64 = 0;
        b.iter(|| {
            let key = i.to_be_bytes();
            kvs.put(black_box(&key), black_box(b"value"), OpFlags::NONE, None).unwrap();
            i += 1;
        });
    });

    kvs.put(b"warm", b"value", OpFlags::NONE, None).unwrap();
    c.bench_function("kvs_get", |b| {
        b.iter(|| kvs.get(black_box(b"warm"), OpFlags::NONE, None).unwrap());
    });
}

fn bench_txn_commit(c: &mut Criterion) {
    let db = open_bench_db();
    let kvs = db.kvs_open("bench", KvsRparams::default()).unwrap();

    c.bench_function("txn_put_commit", |b| {
        let mut i: u64 = 0;
        b.iter(|| {
            let mut txn = db.txn_alloc();
            txn.begin().unwrap();
            kvs.put(&i.to_be_bytes(), b"value", OpFlags::NONE, Some(&mut txn)).unwrap();
            txn.commit().unwrap();
            i += 1;
        });
    });
}

criterion_group!(benches, bench_put_get, bench_txn_commit);
criterion_main!(benches);
