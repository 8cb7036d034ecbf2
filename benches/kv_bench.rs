use std::{
  fs,
  path::PathBuf,
  sync::atomic::{AtomicUsize, Ordering},
};

use bytes::Bytes;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use emberkv::{
  db::Engine,
  option::{IndexType, IteratorOptions, Options, WriteBatchOptions},
  util::rand_kv::{get_test_key, get_test_value},
};
use rand::Rng;

const INDEX_VARIANTS: [(&str, IndexType); 3] = [
  ("btree", IndexType::BTree),
  ("radix", IndexType::AdaptiveRadix),
  ("bptree", IndexType::BPlusTree),
];

fn bench_dir(name: &str) -> PathBuf {
  PathBuf::from(format!("/tmp/emberkv-bench/{}", name))
}

fn bench_engine(name: &str, index_type: IndexType) -> Engine {
  let dir = bench_dir(name);
  let _ = fs::remove_dir_all(&dir);
  fs::create_dir_all(&dir).unwrap();

  let mut option = Options::default();
  option.dir_path = dir;
  option.index_type = index_type;
  Engine::open(option).unwrap()
}

fn bench_put_per_index(c: &mut Criterion) {
  for (label, index_type) in INDEX_VARIANTS {
    let name = format!("put-{}", label);
    let engine = bench_engine(&name, index_type);
    let mut rnd = rand::thread_rng();

    c.bench_function(&format!("emberkv-put-{}", label), |b| {
      b.iter(|| {
        let i = rnd.gen_range(0..u32::MAX) as usize;
        engine.put(get_test_key(i), get_test_value(i)).unwrap();
      })
    });

    drop(engine);
    fs::remove_dir_all(bench_dir(&name)).unwrap();
  }
}

fn bench_get_per_index(c: &mut Criterion) {
  for (label, index_type) in INDEX_VARIANTS {
    let name = format!("get-{}", label);
    let engine = bench_engine(&name, index_type);
    for i in 0..10000 {
      engine.put(get_test_key(i), get_test_value(i)).unwrap();
    }
    let mut rnd = rand::thread_rng();

    c.bench_function(&format!("emberkv-get-{}", label), |b| {
      b.iter(|| {
        // half the lookups hit, half miss
        let i = rnd.gen_range(0..20000);
        let res = engine.get(get_test_key(i));
        if i < 10000 {
          assert!(res.is_ok());
        } else {
          assert!(res.is_err());
        }
      })
    });

    drop(engine);
    fs::remove_dir_all(bench_dir(&name)).unwrap();
  }
}

fn bench_batch_commit(c: &mut Criterion) {
  let engine = bench_engine("batch-commit", IndexType::BTree);
  let next_key = AtomicUsize::new(0);

  c.bench_function("emberkv-batch-commit-100", |b| {
    b.iter(|| {
      let base = next_key.fetch_add(100, Ordering::Relaxed);
      let wb = engine
        .new_write_batch(WriteBatchOptions {
          max_batch_num: 1000,
          sync_writes: false,
        })
        .unwrap();
      for i in base..base + 100 {
        wb.put(get_test_key(i), get_test_value(i)).unwrap();
      }
      wb.commit().unwrap();
    })
  });

  drop(engine);
  fs::remove_dir_all(bench_dir("batch-commit")).unwrap();
}

fn bench_iterator_scan(c: &mut Criterion) {
  let engine = bench_engine("scan", IndexType::BTree);
  for i in 0..5000 {
    engine
      .put(Bytes::from(format!("user/{:06}", i)), get_test_value(i))
      .unwrap();
    engine
      .put(Bytes::from(format!("order/{:06}", i)), get_test_value(i))
      .unwrap();
  }

  c.bench_function("emberkv-scan-full", |b| {
    b.iter(|| {
      let iter = engine.iter(IteratorOptions::default());
      let mut count = 0;
      while iter.next().is_some() {
        count += 1;
      }
      assert_eq!(count, 10000);
    })
  });

  c.bench_function("emberkv-scan-prefix", |b| {
    b.iter(|| {
      let iter = engine.iter(IteratorOptions {
        prefix: b"user/".to_vec(),
        reverse: false,
      });
      let mut count = 0;
      while iter.next().is_some() {
        count += 1;
      }
      assert_eq!(count, 5000);
    })
  });

  drop(engine);
  fs::remove_dir_all(bench_dir("scan")).unwrap();
}

fn bench_merge(c: &mut Criterion) {
  c.bench_function("emberkv-merge-half-dead", |b| {
    b.iter_batched(
      || {
        // start clean, a staged merge left behind would be promoted on open
        let _ = fs::remove_dir_all("/tmp/emberkv-bench/merge-merge");

        // 2000 records written, half of them deleted again
        let engine = bench_engine("merge", IndexType::BTree);
        for i in 0..2000 {
          engine.put(get_test_key(i), get_test_value(i)).unwrap();
        }
        for i in 0..1000 {
          engine.delete(get_test_key(i)).unwrap();
        }
        engine
      },
      |engine| engine.merge().unwrap(),
      BatchSize::PerIteration,
    )
  });

  let _ = fs::remove_dir_all(bench_dir("merge"));
  let _ = fs::remove_dir_all("/tmp/emberkv-bench/merge-merge");
}

criterion_group!(
  benches,
  bench_put_per_index,
  bench_get_per_index,
  bench_batch_commit,
  bench_iterator_scan,
  bench_merge
);
criterion_main!(benches);
