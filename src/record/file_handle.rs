use std::{io::Read, path::Path, sync::Arc, sync::RwLock};

use log::debug;

use crate::{
    error::{DbError, DbResult},
    io::{Decodeable, Encodeable, SmallWriter},
    record::{bitmap, Record, Rid, FIRST_RECORD_PAGE, RECORD_FILE_HDR_PAGE},
    storage::{BufferPool, DiskManager, FileId, Page, PageId, NO_PAGE, PAGE_SIZE},
    utils::{HandyRwLock, Pod},
};

/// On-disk file header, kept on page 0 of the record file.
#[derive(Debug, Clone)]
pub struct RecordFileHdr {
    pub record_size: u32,
    pub num_pages: u32,
    pub slots_per_page: u32,
    pub bitmap_size: u32,
    pub first_free_page: u32,
}

impl Encodeable for RecordFileHdr {
    fn encode(&self) -> Vec<u8> {
        let mut writer = SmallWriter::new();
        writer.write(&self.record_size);
        writer.write(&self.num_pages);
        writer.write(&self.slots_per_page);
        writer.write(&self.bitmap_size);
        writer.write(&self.first_free_page);
        writer.to_bytes()
    }
}

impl Decodeable for RecordFileHdr {
    fn decode<R: Read>(reader: &mut R) -> DbResult<Self> {
        Ok(Self {
            record_size: u32::decode(reader)?,
            num_pages: u32::decode(reader)?,
            slots_per_page: u32::decode(reader)?,
            bitmap_size: u32::decode(reader)?,
            first_free_page: u32::decode(reader)?,
        })
    }
}

/// Data pages carry `{num_records, next_free_page}`, the slot bitmap, then
/// the slot array.
const PAGE_HDR_SIZE: usize = 8;

/// The heap record store: fixed-size records in slotted pages, with a
/// freelist threading every page that still has a free slot.
pub struct RecordFileHandle {
    fd: FileId,
    disk: Arc<DiskManager>,
    buffer_pool: Arc<BufferPool>,
    hdr: RwLock<RecordFileHdr>,
}

impl RecordFileHandle {
    pub fn create<P: AsRef<Path>>(
        disk: Arc<DiskManager>,
        buffer_pool: Arc<BufferPool>,
        path: P,
        record_size: usize,
    ) -> DbResult<Self> {
        assert!(record_size > 0 && record_size <= PAGE_SIZE - PAGE_HDR_SIZE - 1);

        let fd = disk.open_file(path)?;
        let slots_per_page = Self::calculate_slots_per_page(record_size);
        let hdr = RecordFileHdr {
            record_size: record_size as u32,
            num_pages: 1,
            slots_per_page: slots_per_page as u32,
            bitmap_size: ((slots_per_page + 7) / 8) as u32,
            first_free_page: NO_PAGE,
        };

        let handle = Self {
            fd,
            disk,
            buffer_pool,
            hdr: RwLock::new(hdr),
        };
        handle.flush_hdr(&handle.hdr.rl())?;
        Ok(handle)
    }

    pub fn open<P: AsRef<Path>>(
        disk: Arc<DiskManager>,
        buffer_pool: Arc<BufferPool>,
        path: P,
    ) -> DbResult<Self> {
        let fd = disk.open_file(path)?;
        let mut buf = vec![0u8; PAGE_SIZE];
        disk.read_page(fd, RECORD_FILE_HDR_PAGE, &mut buf)?;
        let hdr = crate::io::decode_from_bytes::<RecordFileHdr>(&buf)?;

        Ok(Self {
            fd,
            disk,
            buffer_pool,
            hdr: RwLock::new(hdr),
        })
    }

    /// Max number of slots such that the page header, the bitmap and the
    /// slot array all fit in one page.
    fn calculate_slots_per_page(record_size: usize) -> usize {
        let usable_bits = (PAGE_SIZE - PAGE_HDR_SIZE) * 8;
        let mut slots = usable_bits / (record_size * 8 + 1);
        while PAGE_HDR_SIZE + (slots + 7) / 8 + slots * record_size > PAGE_SIZE {
            slots -= 1;
        }
        slots
    }

    pub fn fd(&self) -> FileId {
        self.fd
    }

    pub fn record_size(&self) -> usize {
        self.hdr.rl().record_size as usize
    }

    pub fn num_pages(&self) -> u32 {
        self.hdr.rl().num_pages
    }

    pub fn slots_per_page(&self) -> u32 {
        self.hdr.rl().slots_per_page
    }

    /// Returns a copy of the record at `rid`.
    pub fn get_record(&self, rid: Rid) -> DbResult<Record> {
        let hdr = self.hdr.rl();
        let pod = self.fetch_page(&hdr, rid.page_no)?;
        let page = pod.rl();

        self.validate_slot(&hdr, rid)?;
        if !bitmap::is_set(self.bitmap_of(&hdr, page.data()), rid.slot_no as usize) {
            return Err(DbError::RecordNotFound(rid));
        }

        let range = self.slot_range(&hdr, rid.slot_no);
        Ok(Record::from_bytes(&page.data()[range]))
    }

    /// Insert a record into the first page with a free slot, allocating a
    /// new page when the freelist is empty.
    pub fn insert_record(&self, buf: &[u8]) -> DbResult<Rid> {
        let mut hdr = self.hdr.wl();
        assert_eq!(buf.len(), hdr.record_size as usize);

        if hdr.first_free_page == NO_PAGE {
            self.create_page(&mut hdr)?;
        }
        let page_no = hdr.first_free_page;

        let pod = self.fetch_page(&hdr, page_no)?;
        let mut page = pod.wl();

        let slot_no = bitmap::first_clear(
            self.bitmap_of(&hdr, page.data()),
            hdr.slots_per_page as usize,
        )
        .ok_or_else(|| DbError::Internal(format!("freelist page {} has no free slot", page_no)))?;

        let range = self.slot_range(&hdr, slot_no as u32);
        page.data_mut()[range].copy_from_slice(buf);
        bitmap::set(self.bitmap_of_mut(&hdr, page.data_mut()), slot_no);
        let num_records = page_num_records(page.data()) + 1;
        set_page_num_records(page.data_mut(), num_records);

        if num_records == hdr.slots_per_page {
            self.unlink_from_freelist(&mut hdr, page_no, &mut page)?;
        }

        let rid = Rid::new(page_no, slot_no as u32);
        debug!("inserted record at {}", rid);
        Ok(rid)
    }

    /// Insert at a caller-chosen position; used when undoing a delete.
    /// Fails with `SlotOccupied` when something already lives there.
    pub fn insert_record_at(&self, rid: Rid, buf: &[u8]) -> DbResult<()> {
        let mut hdr = self.hdr.wl();
        assert_eq!(buf.len(), hdr.record_size as usize);

        let pod = self.fetch_page(&hdr, rid.page_no)?;
        let mut page = pod.wl();

        self.validate_slot(&hdr, rid)?;
        if bitmap::is_set(self.bitmap_of(&hdr, page.data()), rid.slot_no as usize) {
            return Err(DbError::SlotOccupied(rid));
        }

        let range = self.slot_range(&hdr, rid.slot_no);
        page.data_mut()[range].copy_from_slice(buf);
        bitmap::set(self.bitmap_of_mut(&hdr, page.data_mut()), rid.slot_no as usize);
        let num_records = page_num_records(page.data()) + 1;
        set_page_num_records(page.data_mut(), num_records);

        if num_records == hdr.slots_per_page {
            self.unlink_from_freelist(&mut hdr, rid.page_no, &mut page)?;
        }
        Ok(())
    }

    /// Delete the record at `rid`. A page that was full rejoins the
    /// freelist head.
    pub fn delete_record(&self, rid: Rid) -> DbResult<()> {
        let mut hdr = self.hdr.wl();

        let pod = self.fetch_page(&hdr, rid.page_no)?;
        let mut page = pod.wl();

        self.validate_slot(&hdr, rid)?;
        if !bitmap::is_set(self.bitmap_of(&hdr, page.data()), rid.slot_no as usize) {
            return Err(DbError::RecordNotFound(rid));
        }

        let was_full = page_num_records(page.data()) == hdr.slots_per_page;
        bitmap::reset(self.bitmap_of_mut(&hdr, page.data_mut()), rid.slot_no as usize);
        let num_records = page_num_records(page.data()) - 1;
        set_page_num_records(page.data_mut(), num_records);

        if was_full {
            set_page_next_free(page.data_mut(), hdr.first_free_page);
            hdr.first_free_page = rid.page_no;
            self.flush_hdr(&hdr)?;
        }

        debug!("deleted record at {}", rid);
        Ok(())
    }

    /// Overwrite the record at `rid` in place. Index maintenance is the
    /// caller's job.
    pub fn update_record(&self, rid: Rid, buf: &[u8]) -> DbResult<()> {
        let hdr = self.hdr.rl();
        assert_eq!(buf.len(), hdr.record_size as usize);

        let pod = self.fetch_page(&hdr, rid.page_no)?;
        let mut page = pod.wl();

        self.validate_slot(&hdr, rid)?;
        if !bitmap::is_set(self.bitmap_of(&hdr, page.data()), rid.slot_no as usize) {
            return Err(DbError::RecordNotFound(rid));
        }

        let range = self.slot_range(&hdr, rid.slot_no);
        page.data_mut()[range].copy_from_slice(buf);
        Ok(())
    }

    /// Pages currently threaded on the freelist, head first. Diagnostic.
    pub fn freelist(&self) -> DbResult<Vec<u32>> {
        let hdr = self.hdr.rl();
        let mut pages = Vec::new();
        let mut page_no = hdr.first_free_page;
        while page_no != NO_PAGE && pages.len() <= hdr.num_pages as usize {
            pages.push(page_no);
            let pod = self.fetch_page(&hdr, page_no)?;
            let next = page_next_free(pod.rl().data());
            page_no = next;
        }
        Ok(pages)
    }

    /// Occupied-slot count of one data page. Diagnostic.
    pub fn page_record_count(&self, page_no: u32) -> DbResult<u32> {
        let hdr = self.hdr.rl();
        let pod = self.fetch_page(&hdr, page_no)?;
        let count = page_num_records(pod.rl().data());
        Ok(count)
    }

    fn validate_slot(&self, hdr: &RecordFileHdr, rid: Rid) -> DbResult<()> {
        if rid.slot_no >= hdr.slots_per_page {
            return Err(DbError::InvalidSlot(rid.slot_no));
        }
        Ok(())
    }

    fn fetch_page(&self, hdr: &RecordFileHdr, page_no: u32) -> DbResult<Pod<Page>> {
        if page_no < FIRST_RECORD_PAGE || page_no >= hdr.num_pages {
            return Err(DbError::InvalidPage(page_no));
        }
        self.buffer_pool.fetch_page(PageId::new(self.fd, page_no))
    }

    pub(crate) fn fetch_data_page(&self, page_no: u32) -> DbResult<Pod<Page>> {
        let hdr = self.hdr.rl();
        self.fetch_page(&hdr, page_no)
    }

    /// Allocate a fresh data page and push it onto the freelist head.
    fn create_page(&self, hdr: &mut RecordFileHdr) -> DbResult<()> {
        let page_no = hdr.num_pages;
        hdr.num_pages += 1;

        let pod = self.buffer_pool.new_page(PageId::new(self.fd, page_no))?;
        let mut page = pod.wl();
        set_page_num_records(page.data_mut(), 0);
        set_page_next_free(page.data_mut(), hdr.first_free_page);
        hdr.first_free_page = page_no;

        self.flush_hdr(hdr)?;
        debug!("allocated record page {}", page_no);
        Ok(())
    }

    /// Remove a now-full page from the freelist. The page is usually the
    /// list head (ordinary inserts pick the head), but an insert-at during
    /// undo can fill a page in the middle of the list.
    fn unlink_from_freelist(
        &self,
        hdr: &mut RecordFileHdr,
        page_no: u32,
        page: &mut Page,
    ) -> DbResult<()> {
        let next = page_next_free(page.data());

        if hdr.first_free_page == page_no {
            hdr.first_free_page = next;
        } else {
            let mut curr = hdr.first_free_page;
            let mut hops = 0;
            while curr != NO_PAGE && hops <= hdr.num_pages {
                let pod = self.fetch_page(hdr, curr)?;
                let mut pred = pod.wl();
                if page_next_free(pred.data()) == page_no {
                    set_page_next_free(pred.data_mut(), next);
                    break;
                }
                curr = page_next_free(pred.data());
                hops += 1;
            }
        }

        set_page_next_free(page.data_mut(), NO_PAGE);
        self.flush_hdr(hdr)?;
        Ok(())
    }

    /// Freelist transitions persist the file header immediately, bypassing
    /// the buffer pool. Best-effort durability until a WAL exists.
    fn flush_hdr(&self, hdr: &RecordFileHdr) -> DbResult<()> {
        let mut writer = SmallWriter::new();
        writer.write(hdr);
        self.disk
            .write_page(self.fd, RECORD_FILE_HDR_PAGE, &writer.to_padded_bytes(PAGE_SIZE))
    }

    fn bitmap_of<'d>(&self, hdr: &RecordFileHdr, data: &'d [u8]) -> &'d [u8] {
        &data[PAGE_HDR_SIZE..PAGE_HDR_SIZE + hdr.bitmap_size as usize]
    }

    fn bitmap_of_mut<'d>(&self, hdr: &RecordFileHdr, data: &'d mut [u8]) -> &'d mut [u8] {
        &mut data[PAGE_HDR_SIZE..PAGE_HDR_SIZE + hdr.bitmap_size as usize]
    }

    fn slot_range(&self, hdr: &RecordFileHdr, slot_no: u32) -> std::ops::Range<usize> {
        let start = PAGE_HDR_SIZE
            + hdr.bitmap_size as usize
            + slot_no as usize * hdr.record_size as usize;
        start..start + hdr.record_size as usize
    }
}

fn page_num_records(data: &[u8]) -> u32 {
    u32::from_le_bytes(data[0..4].try_into().unwrap())
}

fn set_page_num_records(data: &mut [u8], v: u32) {
    data[0..4].copy_from_slice(&v.to_le_bytes());
}

fn page_next_free(data: &[u8]) -> u32 {
    u32::from_le_bytes(data[4..8].try_into().unwrap())
}

fn set_page_next_free(data: &mut [u8], v: u32) {
    data[4..8].copy_from_slice(&v.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_handle(record_size: usize) -> (tempfile::TempDir, RecordFileHandle) {
        let dir = tempfile::tempdir().unwrap();
        let disk = Arc::new(DiskManager::new());
        let pool = Arc::new(BufferPool::new(disk.clone()));
        let fh =
            RecordFileHandle::create(disk, pool, dir.path().join("t.tbl"), record_size).unwrap();
        (dir, fh)
    }

    #[test]
    fn test_insert_get_round_trip() {
        let (_dir, fh) = test_handle(8);

        let rid = fh.insert_record(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        assert_eq!(rid, Rid::new(1, 0));
        let rec = fh.get_record(rid).unwrap();
        assert_eq!(rec.data, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_get_errors() {
        let (_dir, fh) = test_handle(8);
        let rid = fh.insert_record(&[0; 8]).unwrap();

        assert!(matches!(
            fh.get_record(Rid::new(9, 0)),
            Err(DbError::InvalidPage(9))
        ));
        assert!(matches!(
            fh.get_record(Rid::new(1, 99999)),
            Err(DbError::InvalidSlot(_))
        ));
        assert!(matches!(
            fh.get_record(Rid::new(rid.page_no, rid.slot_no + 1)),
            Err(DbError::RecordNotFound(_))
        ));
    }

    #[test]
    fn test_delete_then_slot_reuse() {
        let (_dir, fh) = test_handle(16);

        let r0 = fh.insert_record(&[7; 16]).unwrap();
        let r1 = fh.insert_record(&[8; 16]).unwrap();
        fh.delete_record(r0).unwrap();
        assert!(matches!(
            fh.delete_record(r0),
            Err(DbError::RecordNotFound(_))
        ));

        // The freed slot is the first clear bit again.
        let r2 = fh.insert_record(&[9; 16]).unwrap();
        assert_eq!(r2, r0);
        assert_eq!(fh.get_record(r1).unwrap().data, vec![8; 16]);
    }

    #[test]
    fn test_insert_at_occupied() {
        let (_dir, fh) = test_handle(8);
        let rid = fh.insert_record(&[1; 8]).unwrap();
        assert!(matches!(
            fh.insert_record_at(rid, &[2; 8]),
            Err(DbError::SlotOccupied(_))
        ));
    }

    #[test]
    fn test_freelist_page_fill_and_release() {
        // Large records keep slots_per_page small enough to fill a page.
        let record_size = 1000;
        let (_dir, fh) = test_handle(record_size);
        let slots = fh.slots_per_page();

        let mut rids = Vec::new();
        for i in 0..slots {
            rids.push(fh.insert_record(&vec![i as u8; record_size]).unwrap());
        }
        // Page 1 is full: off the freelist.
        assert!(!fh.freelist().unwrap().contains(&1));

        // The next insert allocates page 2.
        let rid = fh.insert_record(&vec![0xFF; record_size]).unwrap();
        assert_eq!(rid.page_no, 2);

        // Freeing one slot on page 1 links it back at the head.
        fh.delete_record(rids[0]).unwrap();
        assert_eq!(fh.freelist().unwrap()[0], 1);
    }
}
