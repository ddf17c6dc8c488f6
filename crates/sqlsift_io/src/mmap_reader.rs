use memmap2::Mmap;
use sqlsift_core::{BlockSource, CoreError, Result};
use std::fs::File;
use std::path::{Path, PathBuf};

/// Read-only memory map over a whole target database.
///
/// The mapping borrows nothing from the caller; windows and pages handed out
/// by the analysis stages borrow from [`MmapReader::as_bytes`].
pub struct MmapReader {
    path: PathBuf,
    map: Mmap,
}

impl MmapReader {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        if len == 0 {
            return Err(CoreError::InvalidFormat(format!(
                "{} is empty, nothing to map",
                path.display()
            )));
        }

        // SAFETY: the target is opened read-only and the map is never written
        // through. A concurrent writer could still change the bytes under us,
        // which at worst skews the analysis of that run.
        let map = unsafe { Mmap::map(&file) }.map_err(CoreError::Io)?;

        // Analysis sweeps the whole file once per page size.
        #[cfg(unix)]
        {
            use memmap2::Advice;
            if let Err(e) = map.advise(Advice::Sequential) {
                tracing::debug!(path = %path.display(), error = %e, "madvise failed");
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            map,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.map
    }

    /// Bytes of 1-based page `pgno`; the final page may be short.
    pub fn page(&self, pgno: u32, page_size: u32) -> Option<&[u8]> {
        let index = usize::try_from(pgno.checked_sub(1)?).ok()?;
        let start = index.checked_mul(page_size as usize)?;
        if start >= self.map.len() {
            return None;
        }
        let end = start.saturating_add(page_size as usize).min(self.map.len());
        Some(&self.map[start..end])
    }
}

impl BlockSource for MmapReader {
    fn read_chunk(&mut self, offset: u64, buffer: &mut [u8]) -> Result<usize> {
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        let available = self.map.get(start..).unwrap_or_default();
        let n = available.len().min(buffer.len());
        buffer[..n].copy_from_slice(&available[..n]);
        Ok(n)
    }

    fn size(&self) -> u64 {
        self.map.len() as u64
    }
}
