//! End-to-end scenarios exercising the public tree API across page sizes
//! and key/PMNK bundles.

use foster_btree::{BTree, MemAllocator, TreeConfig, TreeError};

fn check<K, V, P, A>(tree: &BTree<K, V, P, A>)
where
    K: foster_btree::Key<P>,
    V: foster_btree::Codec,
    P: foster_btree::Pmnk,
    A: foster_btree::PageAllocator,
{
    #[cfg(debug_assertions)]
    tree.check_invariants();
    #[cfg(not(debug_assertions))]
    let _ = tree;
}

#[test]
fn basic_insert_and_lookup() {
    let mut alloc = MemAllocator::new(4096);
    let mut tree: BTree<u64, Vec<u8>, u64, _> = BTree::create(&mut alloc).unwrap();

    tree.put(&5, &b"e".to_vec()).unwrap();
    tree.put(&1, &b"a".to_vec()).unwrap();
    tree.put(&3, &b"c".to_vec()).unwrap();

    assert_eq!(tree.get(&1).unwrap(), b"a");
    assert_eq!(tree.get(&3).unwrap(), b"c");
    assert_eq!(tree.get(&5).unwrap(), b"e");
    assert_eq!(tree.get(&2), Err(TreeError::NotFound));
}

#[test]
fn duplicate_insert_is_rejected_and_original_survives() {
    let mut alloc = MemAllocator::new(4096);
    let mut tree: BTree<u64, Vec<u8>, u64, _> = BTree::create(&mut alloc).unwrap();

    assert_eq!(tree.put(&7, &b"x".to_vec()), Ok(()));
    assert_eq!(tree.put(&7, &b"y".to_vec()), Err(TreeError::Duplicate));
    assert_eq!(tree.get(&7).unwrap(), b"x");
}

#[test]
fn split_under_pressure_on_tiny_pages() {
    // 128-byte pages hold only a handful of 8-byte key / 8-byte value
    // entries, so this forces leaf splits, adoption and root growth
    let mut alloc = MemAllocator::new(128);
    let mut tree: BTree<u64, u64, u64, _> = BTree::create(&mut alloc).unwrap();

    for key in 1..=16u64 {
        tree.put(&key, &(key * 2)).unwrap();
    }

    for key in 1..=16u64 {
        assert_eq!(tree.get(&key), Ok(key * 2), "key {}", key);
    }
    let collected: Vec<u64> = tree.scan(None, None).map(|(k, _)| k).collect();
    assert_eq!(collected, (1..=16).collect::<Vec<u64>>());
    check(&tree);

    assert!(
        alloc.allocated_pages() >= 2,
        "sixteen entries cannot fit one 128-byte page"
    );
}

#[test]
fn pmnk_collisions_resolve_through_full_keys() {
    // 2-byte PMNK over 8-byte keys: the top two bytes collide on purpose
    let mut alloc = MemAllocator::new(4096);
    let mut tree: BTree<u64, Vec<u8>, u16, _> = BTree::create(&mut alloc).unwrap();

    let keys = [
        0x0001_0000_0000_0001u64,
        0x0001_0000_0000_0002u64,
        0x0001_0000_0000_0003u64,
    ];
    for (i, key) in keys.iter().enumerate() {
        tree.put(key, &vec![b'0' + i as u8]).unwrap();
    }

    for (i, key) in keys.iter().enumerate() {
        assert_eq!(tree.get(key).unwrap(), vec![b'0' + i as u8]);
    }
    let order: Vec<u64> = tree.scan(None, None).map(|(k, _)| k).collect();
    assert_eq!(order, keys.to_vec());
    check(&tree);
}

#[test]
fn variable_length_keys_and_exclusive_scan_bound() {
    let mut alloc = MemAllocator::new(4096);
    let mut tree: BTree<Vec<u8>, Vec<u8>, u32, _> = BTree::create(&mut alloc).unwrap();

    tree.put(&b"apple".to_vec(), &b"1".to_vec()).unwrap();
    tree.put(&b"banana".to_vec(), &b"2".to_vec()).unwrap();
    tree.put(&b"apricot".to_vec(), &b"3".to_vec()).unwrap();

    let hits: Vec<(Vec<u8>, Vec<u8>)> = tree
        .scan(Some(&b"apple".to_vec()), Some(&b"banana".to_vec()))
        .collect();

    assert_eq!(
        hits,
        vec![
            (b"apple".to_vec(), b"1".to_vec()),
            (b"apricot".to_vec(), b"3".to_vec()),
        ]
    );
}

#[test]
fn delete_then_reinsert_holds_exactly_one_entry() {
    let mut alloc = MemAllocator::new(4096);
    let mut tree: BTree<u64, Vec<u8>, u64, _> = BTree::create(&mut alloc).unwrap();

    tree.put(&10, &b"x".to_vec()).unwrap();
    tree.remove(&10).unwrap();
    tree.put(&10, &b"y".to_vec()).unwrap();

    assert_eq!(tree.get(&10).unwrap(), b"y");
    assert_eq!(tree.scan(None, None).count(), 1);
}

#[test]
fn removing_twice_reports_not_found_once() {
    let mut alloc = MemAllocator::new(4096);
    let mut tree: BTree<u64, u64, u64, _> = BTree::create(&mut alloc).unwrap();

    tree.put(&3, &30).unwrap();
    assert_eq!(tree.remove(&3), Ok(()));
    assert_eq!(tree.remove(&3), Err(TreeError::NotFound));
    assert_eq!(tree.get(&3), Err(TreeError::NotFound));
}

#[test]
fn every_key_survives_splits_before_any_adoption() {
    // with adoption disabled every split leaves a foster chain behind, so
    // reads have to route through foster pointers alone
    let mut alloc = MemAllocator::new(256);
    let config = TreeConfig {
        adopt_on_write: false,
        ..TreeConfig::default()
    };
    let mut tree: BTree<Vec<u8>, Vec<u8>, u32, _> =
        BTree::create_with_config(&mut alloc, config).unwrap();

    for i in 0..40u8 {
        let key = format!("key-{:02}", i).into_bytes();
        tree.put(&key, &vec![i]).unwrap();
    }

    for i in 0..40u8 {
        let key = format!("key-{:02}", i).into_bytes();
        assert_eq!(tree.get(&key).unwrap(), vec![i], "key-{:02}", i);
    }
    let scanned: Vec<Vec<u8>> = tree.scan(None, None).map(|(k, _)| k).collect();
    assert_eq!(scanned.len(), 40);
    assert!(scanned.windows(2).all(|w| w[0] < w[1]));
    check(&tree);
}

#[test]
fn exhausted_allocator_fails_put_but_not_the_tree() {
    let mut alloc = MemAllocator::with_capacity(128, 3);
    let mut tree: BTree<u64, u64, u64, _> = BTree::create(&mut alloc).unwrap();

    let mut stored = Vec::new();
    for key in 0..64u64 {
        match tree.put(&key, &key) {
            Ok(()) => stored.push(key),
            Err(TreeError::AllocFailure) => break,
            Err(err) => panic!("unexpected error {err:?}"),
        }
    }

    assert!(!stored.is_empty());
    for key in &stored {
        assert_eq!(tree.get(key), Ok(*key));
    }
}

#[test]
fn range_scan_restarts_from_the_last_key() {
    let mut alloc = MemAllocator::new(256);
    let mut tree: BTree<u64, u64, u64, _> = BTree::create(&mut alloc).unwrap();

    for key in 0..100u64 {
        tree.put(&key, &key).unwrap();
    }

    // consume half, then restart a fresh scan from where we stopped
    let first_half: Vec<u64> = tree.scan(None, None).map(|(k, _)| k).take(50).collect();
    let resume_at = first_half.last().copied().unwrap() + 1;
    let second_half: Vec<u64> =
        tree.scan(Some(&resume_at), None).map(|(k, _)| k).collect();

    assert_eq!(first_half, (0..50).collect::<Vec<u64>>());
    assert_eq!(second_half, (50..100).collect::<Vec<u64>>());
}

#[test]
fn tuple_values_ride_along() {
    let mut alloc = MemAllocator::new(4096);
    let mut tree: BTree<u64, (u32, Vec<u8>), u64, _> = BTree::create(&mut alloc).unwrap();

    tree.put(&1, &(7, b"seven".to_vec())).unwrap();
    tree.put(&2, &(8, b"eight".to_vec())).unwrap();

    assert_eq!(tree.get(&1), Ok((7, b"seven".to_vec())));
    assert_eq!(tree.get(&2), Ok((8, b"eight".to_vec())));
}

#[test]
fn mass_delete_shrinks_the_tree() {
    let mut alloc = MemAllocator::new(256);

    let root = {
        let mut tree: BTree<u64, u64, u64, _> = BTree::create(&mut alloc).unwrap();
        for key in 0..300u64 {
            tree.put(&key, &key).unwrap();
        }
        tree.root_page()
    };
    let peak = alloc.allocated_pages();

    {
        let mut tree: BTree<u64, u64, u64, _> = BTree::open(&mut alloc, root);
        for key in 0..300u64 {
            tree.remove(&key).unwrap();
        }
        assert_eq!(tree.scan(None, None).count(), 0);
        check(&tree);
    }

    assert!(
        alloc.allocated_pages() < peak / 2,
        "deletion should release merged pages: {} of {} still live",
        alloc.allocated_pages(),
        peak
    );
}
