use std::sync::Arc;

use log::debug;

use crate::{
    error::DbResult,
    storage::{
        disk_manager::DiskManager,
        page::{Page, PageId, PAGE_SIZE},
    },
    utils::{ConcurrentHashMap, HandyRwLock, Pod},
};

/// Maps `(file_id, page_no)` to shared page frames. There is no eviction:
/// frames live until the pool is dropped, so an `Arc` clone of a frame is a
/// pin and dropping it is the unpin.
pub struct BufferPool {
    disk: Arc<DiskManager>,
    frames: ConcurrentHashMap<PageId, Pod<Page>>,
}

impl BufferPool {
    pub fn new(disk: Arc<DiskManager>) -> Self {
        Self {
            disk,
            frames: ConcurrentHashMap::new(),
        }
    }

    /// Retrieve the specified page, reading it from disk if it is not
    /// resident yet.
    pub fn fetch_page(&self, pid: PageId) -> DbResult<Pod<Page>> {
        self.frames.get_or_insert(&pid, |pid| {
            debug!("load page from disk, pid: {}", pid);

            // stage 1: read page content
            let mut buf = vec![0u8; PAGE_SIZE];
            self.disk.read_page(pid.fd, pid.page_no, &mut buf)?;

            // stage 2: page instantiation
            let page = Page::new(*pid, buf);
            Ok(Arc::new(std::sync::RwLock::new(page)))
        })
    }

    /// Materialize a brand-new zeroed page frame. The caller owns the page
    /// numbering; the frame starts out dirty so a flush persists it.
    pub fn new_page(&self, pid: PageId) -> DbResult<Pod<Page>> {
        let mut page = Page::new_empty(pid);
        page.mark_dirty();
        let pod = Arc::new(std::sync::RwLock::new(page));
        self.frames.insert(pid, pod.clone());
        Ok(pod)
    }

    pub fn flush_page(&self, pid: PageId) -> DbResult<()> {
        if let Some(pod) = self.frames.get(&pid) {
            let mut page = pod.wl();
            if page.is_dirty() {
                self.disk.write_page(pid.fd, pid.page_no, page.data())?;
                page.clear_dirty();
            }
        }
        Ok(())
    }

    pub fn flush_all(&self) -> DbResult<()> {
        for pid in self.frames.keys() {
            self.flush_page(pid)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_and_flush() {
        let dir = tempfile::tempdir().unwrap();
        let disk = Arc::new(DiskManager::new());
        let fd = disk.open_file(dir.path().join("t.tbl")).unwrap();
        let pool = BufferPool::new(disk.clone());

        let pid = PageId::new(fd, 0);
        let pod = pool.new_page(pid).unwrap();
        pod.wl().data_mut()[0] = 0xAB;
        pool.flush_all().unwrap();

        let mut buf = vec![0u8; PAGE_SIZE];
        disk.read_page(fd, 0, &mut buf).unwrap();
        assert_eq!(buf[0], 0xAB);

        // A never-written page reads back zeroed.
        let pod = pool.fetch_page(PageId::new(fd, 7)).unwrap();
        assert!(pod.rl().data().iter().all(|b| *b == 0));
    }
}
