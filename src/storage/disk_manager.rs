use std::{
    path::Path,
    sync::{atomic::AtomicU32, atomic::Ordering, Arc},
};

use log::debug;

use crate::{
    error::{DbError, DbResult},
    io::SmallFile,
    storage::page::PAGE_SIZE,
    utils::ConcurrentHashMap,
};

pub type FileId = u32;

/// Reads and writes fixed-size pages of the files it has opened. Files are
/// addressed by the id handed out at open time.
pub struct DiskManager {
    files: ConcurrentHashMap<FileId, Arc<SmallFile>>,
    next_file_id: AtomicU32,
}

impl DiskManager {
    pub fn new() -> Self {
        Self {
            files: ConcurrentHashMap::new(),
            next_file_id: AtomicU32::new(0),
        }
    }

    /// Open (creating if necessary) the file at `path`.
    pub fn open_file<P: AsRef<Path>>(&self, path: P) -> DbResult<FileId> {
        let fd = self.next_file_id.fetch_add(1, Ordering::Relaxed);
        let file = SmallFile::open(path.as_ref(), PAGE_SIZE)?;
        self.files.insert(fd, Arc::new(file));
        debug!("opened file {:?} as fd {}", path.as_ref(), fd);
        Ok(fd)
    }

    fn get_file(&self, fd: FileId) -> DbResult<Arc<SmallFile>> {
        self.files
            .get(&fd)
            .ok_or_else(|| DbError::Internal(format!("unknown file id {}", fd)))
    }

    pub fn read_page(&self, fd: FileId, page_no: u32, buf: &mut [u8]) -> DbResult<()> {
        self.get_file(fd)?.read_page(page_no, buf)
    }

    pub fn write_page(&self, fd: FileId, page_no: u32, buf: &[u8]) -> DbResult<()> {
        self.get_file(fd)?.write_page(page_no, buf)
    }

    pub fn file_size(&self, fd: FileId) -> DbResult<u64> {
        self.get_file(fd)?.get_size()
    }
}

impl Default for DiskManager {
    fn default() -> Self {
        Self::new()
    }
}
