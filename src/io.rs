//! Little-endian serialization helpers for the fixed on-disk headers.

use std::{
    fs::{File, OpenOptions},
    io::{Cursor, Read, Seek, SeekFrom, Write},
    mem::size_of,
    path::Path,
    sync::{Mutex, MutexGuard},
};

use crate::error::{DbError, DbResult};

/// A page file behind a mutex. All offsets are in whole pages.
pub struct SmallFile {
    file: Mutex<File>,
    page_size: usize,
}

impl SmallFile {
    pub fn open<P: AsRef<Path>>(file_path: P, page_size: usize) -> DbResult<Self> {
        let f = OpenOptions::new()
            .write(true)
            .read(true)
            .create(true)
            .open(file_path)?;

        Ok(Self {
            file: Mutex::new(f),
            page_size,
        })
    }

    fn get_file(&self) -> MutexGuard<'_, File> {
        self.file.lock().unwrap()
    }

    /// Read one page into `buf`. A page past the current end of file (freshly
    /// allocated, never flushed) reads back as zeroes.
    pub fn read_page(&self, page_no: u32, buf: &mut [u8]) -> DbResult<()> {
        debug_assert_eq!(buf.len(), self.page_size);

        let mut file = self.get_file();
        let start = page_no as u64 * self.page_size as u64;
        file.seek(SeekFrom::Start(start))?;

        let mut filled = 0;
        while filled < buf.len() {
            let n = file.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf[filled..].fill(0);
        Ok(())
    }

    pub fn write_page(&self, page_no: u32, buf: &[u8]) -> DbResult<()> {
        debug_assert_eq!(buf.len(), self.page_size);

        let mut file = self.get_file();
        let start = page_no as u64 * self.page_size as u64;
        file.seek(SeekFrom::Start(start))?;
        file.write_all(buf)?;
        Ok(())
    }

    pub fn get_size(&self) -> DbResult<u64> {
        Ok(self.get_file().metadata()?.len())
    }
}

pub trait Encodeable {
    fn encode(&self) -> Vec<u8>;
}

pub trait Decodeable: Sized {
    fn decode<R: Read>(reader: &mut R) -> DbResult<Self>;
}

pub fn read_exact_from<R: Read>(reader: &mut R, bytes_count: usize) -> DbResult<Vec<u8>> {
    let mut buffer = vec![0u8; bytes_count];
    reader
        .read_exact(&mut buffer)
        .map_err(|_| DbError::Internal(format!("short read, expected {} bytes", bytes_count)))?;
    Ok(buffer)
}

pub fn decode_from_bytes<T: Decodeable>(bytes: &[u8]) -> DbResult<T> {
    let mut reader = Cursor::new(bytes);
    T::decode(&mut reader)
}

/// Accumulates encoded fields, then pads the result out to a page.
pub struct SmallWriter {
    buf: Vec<u8>,
}

impl SmallWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn write<T: Encodeable>(&mut self, obj: &T) {
        self.buf.extend_from_slice(obj.encode().as_slice());
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.buf.clone()
    }

    pub fn to_padded_bytes(&self, size: usize) -> Vec<u8> {
        let mut buf = self.buf.clone();
        assert!(
            buf.len() <= size,
            "buffer size is larger than the given size: {} > {}",
            buf.len(),
            size
        );
        buf.resize(size, 0);
        buf
    }
}

impl Default for SmallWriter {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! impl_serialization {
    (for $($t:ty),+) => {
        $(
            impl Encodeable for $t {
                fn encode(&self) -> Vec<u8> {
                    self.to_le_bytes().to_vec()
                }
            }

            impl Decodeable for $t {
                fn decode<R: Read>(reader: &mut R) -> DbResult<Self> {
                    let bytes = read_exact_from(reader, size_of::<Self>())?;
                    Ok(Self::from_le_bytes(bytes.try_into().unwrap()))
                }
            }
        )*
    }
}

impl_serialization!(for u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);
