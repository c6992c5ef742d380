mod common;

use std::{collections::BTreeSet, sync::Arc};

use rand::prelude::*;

use mini_db::{
    catalog::ColumnType,
    index::{IndexHandle, IxScan},
    init_log,
    record::Rid,
    storage::{BufferPool, DiskManager},
};

fn int_index(max_keys: Option<usize>) -> (tempfile::TempDir, Arc<IndexHandle>) {
    init_log();
    let dir = tempfile::tempdir().unwrap();
    let disk = Arc::new(DiskManager::new());
    let pool = Arc::new(BufferPool::new(disk.clone()));
    let ih = IndexHandle::create(
        disk,
        pool,
        dir.path().join("t_id.idx"),
        "t_id",
        vec![ColumnType::Int],
        vec![4],
        max_keys,
    )
    .unwrap();
    (dir, Arc::new(ih))
}

fn key(v: i32) -> [u8; 4] {
    v.to_le_bytes()
}

fn rid_for(v: i32) -> Rid {
    Rid::new(1, v as u32)
}

/// Full ordered scan, reading back the keys via the rids they were
/// inserted with.
fn scan_all(ih: &Arc<IndexHandle>) -> Vec<u32> {
    let mut scan = IxScan::new(
        ih.clone(),
        ih.leaf_begin().unwrap(),
        ih.leaf_end().unwrap(),
    );
    let mut slots = Vec::new();
    while !scan.is_end() {
        slots.push(scan.rid().unwrap().slot_no);
        scan.next().unwrap();
    }
    slots
}

#[test]
fn test_point_lookup() {
    let (_dir, ih) = int_index(None);

    assert_eq!(ih.get_value(&key(42)).unwrap(), None);
    ih.insert_entry(&key(42), rid_for(42)).unwrap();
    assert_eq!(ih.get_value(&key(42)).unwrap(), Some(rid_for(42)));

    ih.delete_entry(&key(42)).unwrap();
    assert_eq!(ih.get_value(&key(42)).unwrap(), None);
}

#[test]
fn test_duplicate_key_is_ignored() {
    let (_dir, ih) = int_index(None);

    ih.insert_entry(&key(5), rid_for(5)).unwrap();
    ih.insert_entry(&key(5), Rid::new(9, 9)).unwrap();
    // first writer wins; no duplicate entry appears
    assert_eq!(ih.get_value(&key(5)).unwrap(), Some(rid_for(5)));
    assert_eq!(scan_all(&ih), vec![5]);
}

/// With max_keys = 4, keys 1..8 split the root twice; removing 1, 2, 3
/// underflows and merges back.
#[test]
fn test_split_then_coalesce() {
    let (_dir, ih) = int_index(Some(4));

    for v in 1..=8 {
        ih.insert_entry(&key(v), rid_for(v)).unwrap();
        ih.check_integrity().unwrap();
    }
    assert_eq!(scan_all(&ih), (1..=8).collect::<Vec<u32>>());

    for v in [1, 2, 3] {
        assert!(ih.delete_entry(&key(v)).unwrap());
        ih.check_integrity().unwrap();
    }
    assert_eq!(scan_all(&ih), (4..=8).collect::<Vec<u32>>());

    for v in 4..=8 {
        assert_eq!(ih.get_value(&key(v)).unwrap(), Some(rid_for(v)));
    }
    assert_eq!(ih.get_value(&key(2)).unwrap(), None);
}

#[test]
fn test_delete_to_empty_then_reinsert() {
    let (_dir, ih) = int_index(Some(4));

    for v in 1..=6 {
        ih.insert_entry(&key(v), rid_for(v)).unwrap();
    }
    for v in 1..=6 {
        assert!(ih.delete_entry(&key(v)).unwrap());
        ih.check_integrity().unwrap();
    }
    assert_eq!(scan_all(&ih), Vec::<u32>::new());
    assert_eq!(ih.get_value(&key(3)).unwrap(), None);

    // deleting from an empty tree is a no-op
    assert!(!ih.delete_entry(&key(3)).unwrap());

    // the emptied tree grows a fresh root on the next insert
    ih.insert_entry(&key(7), rid_for(7)).unwrap();
    assert_eq!(ih.get_value(&key(7)).unwrap(), Some(rid_for(7)));
    ih.check_integrity().unwrap();
}

#[test]
fn test_bounds_and_range_scan() {
    let (_dir, ih) = int_index(Some(4));

    for v in [10, 20, 30, 40, 50, 60, 70] {
        ih.insert_entry(&key(v), rid_for(v)).unwrap();
    }

    // 20 < id <= 50
    let start = ih.upper_bound(&key(20)).unwrap();
    let end = ih.upper_bound(&key(50)).unwrap();
    let mut scan = IxScan::new(ih.clone(), start, end);
    let mut seen = Vec::new();
    while !scan.is_end() {
        seen.push(scan.rid().unwrap().slot_no);
        scan.next().unwrap();
    }
    assert_eq!(seen, vec![30, 40, 50]);

    // lower_bound lands on the key itself
    let start = ih.lower_bound(&key(30)).unwrap();
    let end = ih.leaf_end().unwrap();
    let mut scan = IxScan::new(ih.clone(), start, end);
    let mut seen = Vec::new();
    while !scan.is_end() {
        seen.push(scan.rid().unwrap().slot_no);
        scan.next().unwrap();
    }
    assert_eq!(seen, vec![30, 40, 50, 60, 70]);
}

/// Randomized churn: the scan stays sorted, lookups agree with an oracle,
/// and the structural invariants hold throughout.
#[test]
fn test_random_churn_against_oracle() {
    let (_dir, ih) = int_index(Some(6));
    let mut rng = StdRng::seed_from_u64(0x1DB);
    let mut oracle = BTreeSet::new();

    for _ in 0..500 {
        let v = rng.gen_range(0..200);
        if rng.gen_bool(0.6) {
            ih.insert_entry(&key(v), rid_for(v)).unwrap();
            oracle.insert(v);
        } else {
            let removed = ih.delete_entry(&key(v)).unwrap();
            assert_eq!(removed, oracle.remove(&v));
        }
    }
    ih.check_integrity().unwrap();

    let expected: Vec<u32> = oracle.iter().map(|v| *v as u32).collect();
    assert_eq!(scan_all(&ih), expected);

    for v in 0..200 {
        let found = ih.get_value(&key(v)).unwrap();
        assert_eq!(found.is_some(), oracle.contains(&v), "key {}", v);
    }
}

#[test]
fn test_composite_key_ordering() {
    init_log();
    let dir = tempfile::tempdir().unwrap();
    let disk = Arc::new(DiskManager::new());
    let pool = Arc::new(BufferPool::new(disk.clone()));
    let ih = Arc::new(
        IndexHandle::create(
            disk,
            pool,
            dir.path().join("t_a_b.idx"),
            "t_a_b",
            vec![ColumnType::Int, ColumnType::Int],
            vec![4, 4],
            Some(4),
        )
        .unwrap(),
    );

    let composite = |a: i32, b: i32| {
        let mut k = a.to_le_bytes().to_vec();
        k.extend_from_slice(&b.to_le_bytes());
        k
    };

    let mut slot = 0;
    let mut expected = Vec::new();
    for (a, b) in [(2, 1), (1, 9), (1, 2), (3, 0), (2, 0), (1, 1)] {
        ih.insert_entry(&composite(a, b), Rid::new(1, slot)).unwrap();
        expected.push(((a, b), slot));
        slot += 1;
    }
    ih.check_integrity().unwrap();

    // scan order is lexicographic by (a, b)
    expected.sort();
    let scanned = scan_all(&ih);
    let want: Vec<u32> = expected.iter().map(|(_, s)| *s).collect();
    assert_eq!(scanned, want);

    assert_eq!(
        ih.get_value(&composite(1, 2)).unwrap(),
        Some(Rid::new(1, 2))
    );
    assert_eq!(ih.get_value(&composite(9, 9)).unwrap(), None);
}
