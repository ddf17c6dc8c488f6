//! Positioned reads through a private file handle.

use sqlsift_core::{BlockSource, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// A read-only handle on a target or sidecar file.
///
/// Every trial attempt opens its own `DiskReader`, so attempts never share a
/// file offset and an abandoned attempt releases its handle on drop. The file
/// is opened without write access.
pub struct DiskReader {
    file: File,
    len: u64,
}

impl DiskReader {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new().read(true).open(path.as_ref())?;
        let len = file.metadata()?.len();

        // Attempts jump between pages rather than streaming the file.
        #[cfg(target_os = "linux")]
        {
            use rustix::fs::{fadvise, Advice};
            let _ = fadvise(&file, 0, None, Advice::Random);
        }

        Ok(Self { file, len })
    }

    /// Reads page `pgno` (1-based) of `page_size` bytes. The last page may be
    /// short; a page past the end comes back empty.
    pub fn read_page(&mut self, pgno: u32, page_size: usize) -> Result<Vec<u8>> {
        let offset = u64::from(pgno.saturating_sub(1)) * page_size as u64;
        let want = self.len.saturating_sub(offset).min(page_size as u64) as usize;
        let mut page = vec![0u8; want];
        let got = self.read_full(offset, &mut page)?;
        page.truncate(got);
        Ok(page)
    }

    /// Number of pages of `page_size` bytes, counting a trailing partial page.
    pub fn page_count(&self, page_size: usize) -> u64 {
        if page_size == 0 {
            return 0;
        }
        self.len.div_ceil(page_size as u64)
    }
}

impl BlockSource for DiskReader {
    fn read_chunk(&mut self, offset: u64, buffer: &mut [u8]) -> Result<usize> {
        self.file.seek(SeekFrom::Start(offset))?;
        Ok(self.file.read(buffer)?)
    }

    fn size(&self) -> u64 {
        self.len
    }
}
