use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::common::{ObjDbError, PageId, Result};

/// DiskManager is the storage channel of the database: it reads and writes
/// fixed-size pages of a single file. The page size is chosen when the
/// database is created and recorded in the file header; page ids are handed
/// out by the free space manager, not here.
pub struct DiskManager {
    /// The database file
    db_file: Mutex<File>,
    /// Path to the database file
    db_path: String,
    /// Page size in bytes
    page_size: usize,
    /// Number of pages currently present in the file
    num_pages: AtomicU32,
    /// Number of page reads performed
    num_reads: AtomicU32,
    /// Number of page writes performed
    num_writes: AtomicU32,
}

impl DiskManager {
    /// Opens (or creates) the database file at the given path.
    pub fn new<P: AsRef<Path>>(db_path: P, page_size: usize) -> Result<Self> {
        let path_str = db_path.as_ref().to_string_lossy().to_string();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&db_path)?;

        let file_size = file.metadata()?.len();
        let num_pages = file_size.div_ceil(page_size as u64) as u32;

        Ok(Self {
            db_file: Mutex::new(file),
            db_path: path_str,
            page_size,
            num_pages: AtomicU32::new(num_pages),
            num_reads: AtomicU32::new(0),
            num_writes: AtomicU32::new(0),
        })
    }

    /// Reads the first bytes of a file without knowing its page size yet.
    pub fn read_prefix<P: AsRef<Path>>(db_path: P, buf: &mut [u8]) -> Result<usize> {
        let mut file = File::open(db_path)?;
        let mut filled = 0;
        while filled < buf.len() {
            let n = file.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    /// Reads a page into the provided buffer, which must be exactly one page.
    /// Reading beyond the end of the file yields zeros.
    pub fn read_page(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        self.check_buffer(data.len())?;

        let offset = page_id.file_offset(self.page_size);

        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(offset))?;

        let mut filled = 0;
        while filled < data.len() {
            let n = file.read(&mut data[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled < data.len() {
            data[filled..].fill(0);
        }

        self.num_reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Writes a page from the provided buffer, growing the file if needed.
    pub fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        self.check_buffer(data.len())?;

        let offset = page_id.file_offset(self.page_size);

        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;

        self.num_pages
            .fetch_max(page_id.as_u32() + 1, Ordering::SeqCst);
        self.num_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Flushes buffered writes and forces them to stable storage.
    pub fn sync(&self) -> Result<()> {
        let mut file = self.db_file.lock();
        file.flush()?;
        file.sync_all()?;
        Ok(())
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Returns the number of pages currently present in the file.
    pub fn num_pages(&self) -> u32 {
        self.num_pages.load(Ordering::Relaxed)
    }

    pub fn num_reads(&self) -> u32 {
        self.num_reads.load(Ordering::Relaxed)
    }

    pub fn num_writes(&self) -> u32 {
        self.num_writes.load(Ordering::Relaxed)
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    fn check_buffer(&self, len: usize) -> Result<()> {
        if len != self.page_size {
            return Err(ObjDbError::PageOverflow {
                needed: len,
                available: self.page_size,
            });
        }
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let file = self.db_file.get_mut();
        let _ = file.sync_all();
    }
}
