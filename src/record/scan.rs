use std::sync::Arc;

use crate::{
    error::DbResult,
    record::{bitmap, RecordFileHandle, Rid, FIRST_RECORD_PAGE},
    utils::HandyRwLock,
};

/// Heap-order cursor: yields rids in `(page_no, slot_no)` lexicographic
/// order, skipping holes via the slot bitmap. Terminal once `page_no` runs
/// past the file.
pub struct RecordScan {
    fh: Arc<RecordFileHandle>,
    rid: Rid,
}

impl RecordScan {
    pub fn new(fh: Arc<RecordFileHandle>) -> DbResult<Self> {
        let mut scan = Self {
            fh,
            rid: Rid::new(FIRST_RECORD_PAGE, 0),
        };
        scan.seek_from(FIRST_RECORD_PAGE, 0)?;
        Ok(scan)
    }

    pub fn is_end(&self) -> bool {
        self.rid.page_no >= self.fh.num_pages()
    }

    pub fn rid(&self) -> Rid {
        self.rid
    }

    /// Advance to the next occupied slot.
    pub fn next(&mut self) -> DbResult<()> {
        if self.is_end() {
            return Ok(());
        }
        let (page_no, slot_no) = (self.rid.page_no, self.rid.slot_no + 1);
        self.seek_from(page_no, slot_no)
    }

    fn seek_from(&mut self, start_page: u32, start_slot: u32) -> DbResult<()> {
        let num_pages = self.fh.num_pages();
        let slots_per_page = self.fh.slots_per_page() as usize;

        for page_no in start_page..num_pages {
            let slot_start = if page_no == start_page {
                start_slot as usize
            } else {
                0
            };

            let pod = self.fh.fetch_data_page(page_no)?;
            let page = pod.rl();
            let bitmap_bytes = &page.data()[8..8 + (slots_per_page + 7) / 8];
            if let Some(slot) = bitmap::next_set(bitmap_bytes, slots_per_page, slot_start) {
                self.rid = Rid::new(page_no, slot as u32);
                return Ok(());
            }
        }

        // end of file
        self.rid = Rid::new(num_pages, 0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{BufferPool, DiskManager};

    #[test]
    fn test_scan_skips_holes() {
        let dir = tempfile::tempdir().unwrap();
        let disk = Arc::new(DiskManager::new());
        let pool = Arc::new(BufferPool::new(disk.clone()));
        let fh = Arc::new(
            RecordFileHandle::create(disk, pool, dir.path().join("t.tbl"), 8).unwrap(),
        );

        let mut rids = Vec::new();
        for i in 0..10u8 {
            rids.push(fh.insert_record(&[i; 8]).unwrap());
        }
        fh.delete_record(rids[0]).unwrap();
        fh.delete_record(rids[4]).unwrap();
        fh.delete_record(rids[9]).unwrap();

        let mut seen = Vec::new();
        let mut scan = RecordScan::new(fh.clone()).unwrap();
        while !scan.is_end() {
            seen.push(scan.rid());
            scan.next().unwrap();
        }

        let expected: Vec<Rid> = rids
            .iter()
            .enumerate()
            .filter(|(i, _)| ![0usize, 4, 9].contains(i))
            .map(|(_, r)| *r)
            .collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_scan_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let disk = Arc::new(DiskManager::new());
        let pool = Arc::new(BufferPool::new(disk.clone()));
        let fh = Arc::new(
            RecordFileHandle::create(disk, pool, dir.path().join("t.tbl"), 8).unwrap(),
        );

        let scan = RecordScan::new(fh).unwrap();
        assert!(scan.is_end());
    }
}
