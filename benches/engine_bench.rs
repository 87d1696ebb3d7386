//! Benchmarks for the mutable tree and index segments: insert throughput
//! under different retention queue sizes, point lookups, and segment
//! builds.

use std::hint::black_box;
use std::sync::Arc;

use bptree_engine::keys::i32_key;
use bptree_engine::{
    BTree, BloomFilterFactory, IndexMetadata, IndexSegmentBuilder, IndexSegmentStore,
    MemoryRawStore, RawStore,
};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

// =============================================================================
// Helpers
// =============================================================================

fn populated_tree(n: i32, m: usize, capacity: usize) -> BTree {
    let md = IndexMetadata::random()
        .with_branching_factor(m)
        .expect("branching factor")
        .with_write_retention_queue(capacity, capacity / 25)
        .expect("retention queue");
    let store: Arc<dyn RawStore> = Arc::new(MemoryRawStore::new());
    let mut tree = BTree::create(store, md).expect("create");
    for k in 0..n {
        tree.insert(&i32_key(k), &k.to_le_bytes()).expect("insert");
    }
    tree
}

// =============================================================================
// Mutable tree
// =============================================================================

fn bench_tree_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree/insert");
    group.throughput(Throughput::Elements(10_000));
    for capacity in [50, 500, 5000] {
        group.bench_with_input(
            BenchmarkId::new("queue", capacity),
            &capacity,
            |b, &capacity| {
                b.iter(|| black_box(populated_tree(10_000, 32, capacity)));
            },
        );
    }
    group.finish();
}

fn bench_tree_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree/lookup");
    let mut tree = populated_tree(100_000, 64, 500);
    tree.commit().expect("commit");
    let mut rng = StdRng::seed_from_u64(1);
    group.bench_function("random_hit", |b| {
        b.iter(|| {
            let k = rng.gen_range(0..100_000);
            black_box(tree.lookup(&i32_key(k)).expect("lookup"));
        });
    });
    group.finish();
}

// =============================================================================
// Index segments
// =============================================================================

fn bench_segment_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("segment/build");
    let dir = TempDir::new().expect("tempdir");
    let mut tree = populated_tree(50_000, 64, 500);
    let md = tree
        .metadata()
        .clone()
        .with_bloom_filter(Some(BloomFilterFactory::default()));
    group.throughput(Throughput::Elements(50_000));
    for m in [32, 256, 4096] {
        group.bench_with_input(BenchmarkId::new("m", m), &m, |b, &m| {
            b.iter(|| {
                let path = dir.path().join(format!("build-{m}.seg"));
                let mut builder =
                    IndexSegmentBuilder::new(&path, 50_000, m, &md, 0, false).expect("builder");
                black_box(builder.build(tree.iter()).expect("build"));
            });
        });
    }
    group.finish();
}

fn bench_segment_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("segment/lookup");
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("lookup.seg");
    let mut tree = populated_tree(100_000, 64, 500);
    let md = tree
        .metadata()
        .clone()
        .with_bloom_filter(Some(BloomFilterFactory::default()));
    IndexSegmentBuilder::new(&path, 100_000, 256, &md, 0, false)
        .expect("builder")
        .build(tree.iter())
        .expect("build");
    let store = IndexSegmentStore::open(&path).expect("open");
    let segment = store.load_index_segment().expect("load");
    let mut rng = StdRng::seed_from_u64(2);

    group.bench_function("random_hit", |b| {
        b.iter(|| {
            let k = rng.gen_range(0..100_000);
            black_box(segment.lookup(&i32_key(k)).expect("lookup"));
        });
    });
    // misses are mostly answered by the bloom filter
    group.bench_function("random_miss", |b| {
        b.iter(|| {
            let k = rng.gen_range(100_000..200_000);
            black_box(segment.lookup(&i32_key(k)).expect("lookup"));
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_tree_insert,
    bench_tree_lookup,
    bench_segment_build,
    bench_segment_lookup
);
criterion_main!(benches);
