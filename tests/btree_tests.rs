// Mutable B+Tree tests: point operations, ranges, commit/load and the
// bloom filter lifecycle.

use std::sync::Arc;

use bptree_engine::keys::i32_key;
use bptree_engine::{
    BTree, BloomFilterFactory, Error, FileRawStore, IndexMetadata, MemoryRawStore, RawStore, Tuple,
};
use tempfile::tempdir;

fn metadata(m: usize) -> IndexMetadata {
    IndexMetadata::random()
        .with_branching_factor(m)
        .unwrap()
        .with_write_retention_queue(8, 2)
        .unwrap()
}

fn memory_store() -> Arc<dyn RawStore> {
    Arc::new(MemoryRawStore::new())
}

fn collect(iter: impl Iterator<Item = bptree_engine::Result<Tuple>>) -> Vec<Tuple> {
    iter.collect::<bptree_engine::Result<Vec<_>>>().unwrap()
}

fn keys_of(tuples: &[Tuple]) -> Vec<i32> {
    tuples
        .iter()
        .map(|(k, _)| bptree_engine::keys::decode_i32(k).unwrap())
        .collect()
}

// =============================================================================
// Test 1: Insert, lookup, replace, remove
// =============================================================================
#[test]
fn insert_lookup_remove() {
    for m in [3, 4, 5, 16] {
        let mut tree = BTree::create(memory_store(), metadata(m)).unwrap();
        for i in (0..500).rev() {
            assert_eq!(tree.insert(&i32_key(i), &i.to_be_bytes()).unwrap(), None);
        }
        assert_eq!(tree.entry_count(), 500);
        assert!(tree.height() > 0, "m={m}");

        for i in 0..500 {
            assert_eq!(
                tree.lookup(&i32_key(i)).unwrap(),
                Some(i.to_be_bytes().to_vec()),
                "m={m} key={i}"
            );
        }
        assert_eq!(tree.lookup(&i32_key(500)).unwrap(), None);
        assert!(!tree.contains(&i32_key(-1)).unwrap());

        for i in (0..500).step_by(2) {
            assert_eq!(tree.remove(&i32_key(i)).unwrap(), Some(i.to_be_bytes().to_vec()));
        }
        assert_eq!(tree.remove(&i32_key(0)).unwrap(), None);
        assert_eq!(tree.entry_count(), 250);
        for i in 0..500 {
            assert_eq!(tree.contains(&i32_key(i)).unwrap(), i % 2 == 1, "m={m} key={i}");
        }
    }
}

#[test]
fn insert_replaces_existing_value() {
    let mut tree = BTree::create(memory_store(), metadata(3)).unwrap();
    assert_eq!(tree.insert(b"spo", b"v1").unwrap(), None);
    assert_eq!(tree.insert(b"spo", b"v2").unwrap(), Some(b"v1".to_vec()));
    assert_eq!(tree.entry_count(), 1);
    assert_eq!(tree.lookup(b"spo").unwrap(), Some(b"v2".to_vec()));
}

#[test]
fn empty_keys_and_values_are_entries() {
    let mut tree = BTree::create(memory_store(), metadata(3)).unwrap();
    tree.insert(b"", b"").unwrap();
    assert_eq!(tree.lookup(b"").unwrap(), Some(Vec::new()));
    assert_eq!(collect(tree.iter()), vec![(Vec::new(), Vec::new())]);
}

// =============================================================================
// Test 2: Ranges are half-open and ordered
// =============================================================================
#[test]
fn range_bounds() {
    let mut tree = BTree::create(memory_store(), metadata(4)).unwrap();
    for i in (0..100).map(|i| i * 2) {
        tree.insert(&i32_key(i), b"").unwrap();
    }

    let all = collect(tree.iter());
    assert_eq!(keys_of(&all), (0..100).map(|i| i * 2).collect::<Vec<_>>());

    let mid = collect(tree.range_iterator(Some(&i32_key(10)), Some(&i32_key(20))));
    assert_eq!(keys_of(&mid), vec![10, 12, 14, 16, 18]);

    // bounds between keys
    let odd = collect(tree.range_iterator(Some(&i32_key(11)), Some(&i32_key(17))));
    assert_eq!(keys_of(&odd), vec![12, 14, 16]);

    let head = collect(tree.range_iterator(None, Some(&i32_key(6))));
    assert_eq!(keys_of(&head), vec![0, 2, 4]);

    let tail = collect(tree.range_iterator(Some(&i32_key(195)), None));
    assert_eq!(keys_of(&tail), vec![196, 198]);

    assert!(collect(tree.range_iterator(Some(&i32_key(20)), Some(&i32_key(20)))).is_empty());
    assert!(collect(tree.range_iterator(Some(&i32_key(30)), Some(&i32_key(10)))).is_empty());
    assert!(collect(tree.range_iterator(Some(&i32_key(1000)), None)).is_empty());
}

#[test]
fn iterator_over_empty_tree() {
    let mut tree = BTree::create(memory_store(), metadata(3)).unwrap();
    assert!(collect(tree.iter()).is_empty());
}

// =============================================================================
// Test 3: Structure counts follow splits and merges
// =============================================================================
#[test]
fn counts_follow_structure() {
    let mut tree = BTree::create(memory_store(), metadata(3)).unwrap();
    assert_eq!((tree.height(), tree.node_count(), tree.leaf_count()), (0, 0, 1));

    for i in 0..4 {
        tree.insert(&i32_key(i), b"").unwrap();
    }
    // four entries overflow a leaf of three
    assert_eq!((tree.height(), tree.node_count(), tree.leaf_count()), (1, 1, 2));

    for i in 4..1000 {
        tree.insert(&i32_key(i), b"").unwrap();
    }
    let m = 3u64;
    assert!(tree.leaf_count() >= 1000u64.div_ceil(m));
    assert!(tree.leaf_count() <= 1000 / 2);

    for i in 0..1000 {
        tree.remove(&i32_key(i)).unwrap();
    }
    assert_eq!(tree.entry_count(), 0);
    assert_eq!((tree.height(), tree.node_count(), tree.leaf_count()), (0, 0, 1));
    assert!(collect(tree.iter()).is_empty());
}

// =============================================================================
// Test 4: Commit and load
// =============================================================================
#[test]
fn commit_then_load_restores_state() {
    let store = memory_store();
    let mut tree = BTree::create(store.clone(), metadata(5).with_name("spo")).unwrap();
    for i in 0..300 {
        tree.insert(&i32_key(i), format!("v{i}").as_bytes()).unwrap();
    }
    let cp = tree.commit().unwrap();
    let (last, checkpoint) = tree.last_checkpoint().unwrap();
    assert_eq!(last, cp);
    assert_eq!(checkpoint.entry_count, 300);
    assert_eq!(checkpoint.height, tree.height());

    let mut loaded = BTree::load(store, cp, false).unwrap();
    assert_eq!(loaded.entry_count(), 300);
    assert_eq!(loaded.height(), tree.height());
    assert_eq!(loaded.leaf_count(), tree.leaf_count());
    assert_eq!(loaded.node_count(), tree.node_count());
    assert_eq!(loaded.metadata(), tree.metadata());
    assert_eq!(loaded.metadata().name(), Some("spo"));
    assert_eq!(collect(loaded.iter()), collect(tree.iter()));

    // the loaded tree keeps accepting writes
    loaded.insert(&i32_key(300), b"v300").unwrap();
    let cp2 = loaded.commit().unwrap();
    assert_ne!(cp, cp2);
}

#[test]
fn commit_without_changes_returns_previous_checkpoint() {
    let mut tree = BTree::create(memory_store(), metadata(3)).unwrap();
    tree.insert(b"a", b"1").unwrap();
    let first = tree.commit().unwrap();
    assert_eq!(tree.commit().unwrap(), first);

    // lookups and scans do not dirty the tree
    tree.lookup(b"a").unwrap();
    collect(tree.iter());
    assert_eq!(tree.commit().unwrap(), first);

    tree.insert(b"b", b"2").unwrap();
    assert_ne!(tree.commit().unwrap(), first);
}

#[test]
fn empty_tree_commits_and_loads() {
    let store = memory_store();
    let mut tree = BTree::create(store.clone(), metadata(3)).unwrap();
    let cp = tree.commit().unwrap();
    let mut loaded = BTree::load(store, cp, true).unwrap();
    assert_eq!(loaded.entry_count(), 0);
    assert_eq!(loaded.height(), 0);
    assert!(collect(loaded.iter()).is_empty());
}

#[test]
fn historical_checkpoint_stays_readable() {
    let store = memory_store();
    let mut tree = BTree::create(store.clone(), metadata(4)).unwrap();
    for i in 0..200 {
        tree.insert(&i32_key(i), b"old").unwrap();
    }
    let old = tree.commit().unwrap();

    for i in (0..200).step_by(2) {
        tree.remove(&i32_key(i)).unwrap();
    }
    for i in 200..400 {
        tree.insert(&i32_key(i), b"new").unwrap();
    }
    for i in (1..200).step_by(2) {
        tree.insert(&i32_key(i), b"new").unwrap();
    }
    let new = tree.commit().unwrap();

    let mut then = BTree::load(store.clone(), old, true).unwrap();
    let tuples = collect(then.iter());
    assert_eq!(keys_of(&tuples), (0..200).collect::<Vec<_>>());
    assert!(tuples.iter().all(|(_, v)| v == b"old"));

    let mut now = BTree::load(store, new, true).unwrap();
    assert_eq!(now.entry_count(), 300);
    assert_eq!(now.lookup(&i32_key(3)).unwrap(), Some(b"new".to_vec()));
    assert_eq!(now.lookup(&i32_key(4)).unwrap(), None);
}

#[test]
fn read_only_tree_rejects_mutation() {
    let store = memory_store();
    let mut tree = BTree::create(store.clone(), metadata(3)).unwrap();
    tree.insert(b"k", b"v").unwrap();
    let cp = tree.commit().unwrap();

    let mut ro = BTree::load(store, cp, true).unwrap();
    assert!(ro.is_read_only());
    assert!(matches!(ro.insert(b"x", b"y"), Err(Error::IllegalState(_))));
    assert!(matches!(ro.remove(b"k"), Err(Error::IllegalState(_))));
    assert!(matches!(ro.commit(), Err(Error::IllegalState(_))));
    assert_eq!(ro.lookup(b"k").unwrap(), Some(b"v".to_vec()));
}

#[test]
fn file_backed_tree_with_tiny_queue() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tree.dat");
    let md = IndexMetadata::random()
        .with_branching_factor(3)
        .unwrap()
        .with_write_retention_queue(2, 0)
        .unwrap();
    let cp = {
        let store: Arc<dyn RawStore> = Arc::new(FileRawStore::create(&path, 0).unwrap());
        let mut tree = BTree::create(store.clone(), md).unwrap();
        for i in 0..1000 {
            tree.insert(&i32_key((i * 7919) % 1000), &i.to_le_bytes()).unwrap();
        }
        // pages are persisted as they leave the queue
        assert!(tree.resident_pages() < 100);
        let cp = tree.commit().unwrap();
        store.close().unwrap();
        cp
    };

    let store: Arc<dyn RawStore> = Arc::new(FileRawStore::open(&path, 0, true).unwrap());
    let mut tree = BTree::load(store, cp, true).unwrap();
    let tuples = collect(tree.iter());
    assert_eq!(keys_of(&tuples), (0..1000).collect::<Vec<_>>());
}

// =============================================================================
// Test 5: Bloom filter lifecycle
// =============================================================================
#[test]
fn bloom_filter_persists_across_load() {
    let store = memory_store();
    let factory = BloomFilterFactory::new(1000, 0.01, 0.05).unwrap();
    let md = metadata(8).with_bloom_filter(Some(factory));
    let mut tree = BTree::create(store.clone(), md).unwrap();
    for i in 0..100 {
        tree.insert(&i32_key(i), b"").unwrap();
    }
    // replacing a value does not insert into the filter again
    tree.insert(&i32_key(0), b"again").unwrap();
    assert_eq!(tree.bloom_filter().unwrap().unwrap().inserts(), 100);

    let cp = tree.commit().unwrap();
    assert!(!tree.last_checkpoint().unwrap().1.bloom_filter.is_null());

    let mut loaded = BTree::load(store, cp, true).unwrap();
    let filter = loaded.bloom_filter().unwrap().unwrap();
    assert_eq!(filter.inserts(), 100);
    for i in 0..100 {
        assert!(filter.contains(&i32_key(i)));
    }
    for i in 0..100 {
        assert!(loaded.contains(&i32_key(i)).unwrap());
    }
}

#[test]
fn saturated_bloom_filter_is_disabled() {
    let store = memory_store();
    let factory = BloomFilterFactory::new(10, 0.01, 0.02).unwrap();
    let md = metadata(8).with_bloom_filter(Some(factory));
    let mut tree = BTree::create(store.clone(), md).unwrap();
    assert!(tree.bloom_filter().unwrap().is_some());

    for i in 0..200 {
        tree.insert(&i32_key(i), b"").unwrap();
    }
    assert!(tree.bloom_filter().unwrap().is_none());
    // lookups no longer consult the filter but still answer correctly
    for i in 0..200 {
        assert!(tree.contains(&i32_key(i)).unwrap());
    }
    assert!(!tree.contains(&i32_key(200)).unwrap());

    let cp = tree.commit().unwrap();
    assert!(tree.last_checkpoint().unwrap().1.bloom_filter.is_null());

    let mut loaded = BTree::load(store, cp, false).unwrap();
    assert!(loaded.bloom_filter().unwrap().is_none());
    loaded.insert(&i32_key(500), b"").unwrap();
    assert!(loaded.contains(&i32_key(500)).unwrap());
}

#[test]
fn tree_without_factory_has_no_filter() {
    let mut tree = BTree::create(memory_store(), metadata(3)).unwrap();
    tree.insert(b"a", b"").unwrap();
    assert!(tree.bloom_filter().unwrap().is_none());
    tree.commit().unwrap();
    assert!(tree.last_checkpoint().unwrap().1.bloom_filter.is_null());
}

#[test]
fn invalid_branching_factor_rejected() {
    assert!(matches!(
        IndexMetadata::random().with_branching_factor(2),
        Err(Error::InvalidArgument(_))
    ));
}
