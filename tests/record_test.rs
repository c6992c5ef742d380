mod common;

use std::sync::Arc;

use rand::prelude::*;

use mini_db::{
    init_log,
    record::{RecordFileHandle, RecordScan, Rid},
    storage::{BufferPool, DiskManager},
};

fn heap(record_size: usize) -> (tempfile::TempDir, Arc<RecordFileHandle>) {
    init_log();
    let dir = tempfile::tempdir().unwrap();
    let disk = Arc::new(DiskManager::new());
    let pool = Arc::new(BufferPool::new(disk.clone()));
    let fh = Arc::new(
        RecordFileHandle::create(disk, pool, dir.path().join("heap.tbl"), record_size).unwrap(),
    );
    (dir, fh)
}

#[test]
fn test_insert_get_round_trip_across_pages() {
    let record_size = 600;
    let (_dir, fh) = heap(record_size);

    let mut rids = Vec::new();
    for i in 0..50u32 {
        let buf = vec![(i % 251) as u8; record_size];
        rids.push((fh.insert_record(&buf).unwrap(), buf));
    }
    assert!(fh.num_pages() > 2, "expected the heap to spill over pages");

    for (rid, buf) in &rids {
        assert_eq!(&fh.get_record(*rid).unwrap().data, buf);
    }
}

#[test]
fn test_scan_order_is_page_then_slot() {
    let (_dir, fh) = heap(700);

    let mut rids = Vec::new();
    for i in 0..30u8 {
        rids.push(fh.insert_record(&vec![i; 700]).unwrap());
    }
    // punch some holes
    for i in [0usize, 7, 13, 29] {
        fh.delete_record(rids[i]).unwrap();
    }

    let mut seen: Vec<Rid> = Vec::new();
    let mut scan = RecordScan::new(fh.clone()).unwrap();
    while !scan.is_end() {
        seen.push(scan.rid());
        scan.next().unwrap();
    }

    let mut expected: Vec<Rid> = rids
        .iter()
        .enumerate()
        .filter(|(i, _)| ![0usize, 7, 13, 29].contains(i))
        .map(|(_, r)| *r)
        .collect();
    expected.sort();
    assert_eq!(seen, expected);
}

/// A page is on the freelist iff it still has a clear bitmap bit.
#[test]
fn test_freelist_invariant_under_random_workload() {
    let record_size = 900;
    let (_dir, fh) = heap(record_size);
    let slots_per_page = fh.slots_per_page();

    let mut rng = StdRng::seed_from_u64(0xDB);
    let mut live: Vec<Rid> = Vec::new();

    for round in 0..400 {
        if live.is_empty() || rng.gen_bool(0.6) {
            let buf = vec![rng.gen::<u8>(); record_size];
            live.push(fh.insert_record(&buf).unwrap());
        } else {
            let idx = rng.gen_range(0..live.len());
            let rid = live.swap_remove(idx);
            fh.delete_record(rid).unwrap();
        }

        if round % 50 == 0 {
            assert_freelist_invariant(&fh, slots_per_page);
        }
    }
    assert_freelist_invariant(&fh, slots_per_page);
}

fn assert_freelist_invariant(fh: &RecordFileHandle, slots_per_page: u32) {
    let free_pages = fh.freelist().unwrap();
    for page_no in 1..fh.num_pages() {
        let count = fh.page_record_count(page_no).unwrap();
        let has_free_slot = count < slots_per_page;
        assert_eq!(
            free_pages.contains(&page_no),
            has_free_slot,
            "freelist invariant broken on page {} ({} / {} slots)",
            page_no,
            count,
            slots_per_page
        );
    }
}

/// Undo paths re-insert at fixed rids; filling a mid-freelist page that way
/// must still unlink it correctly.
#[test]
fn test_insert_at_unlinks_mid_freelist_page() {
    let record_size = 1900; // 2 slots per page
    let (_dir, fh) = heap(record_size);
    assert_eq!(fh.slots_per_page(), 2);

    // three full pages
    let mut rids = Vec::new();
    for i in 0..6u8 {
        rids.push(fh.insert_record(&vec![i; record_size]).unwrap());
    }
    assert!(fh.freelist().unwrap().is_empty());

    // free one slot on pages 1 and 2; freelist order is head-insertion
    fh.delete_record(rids[0]).unwrap();
    fh.delete_record(rids[2]).unwrap();
    assert_eq!(fh.freelist().unwrap(), vec![2, 1]);

    // refill the slot on page 1 (not the head) via insert-at
    fh.insert_record_at(rids[0], &vec![9; record_size]).unwrap();
    assert_eq!(fh.freelist().unwrap(), vec![2]);

    let slots = fh.slots_per_page();
    assert_freelist_invariant(&fh, slots);
}
