mod mmap_reader;
mod reader;
pub mod sidecar;

pub use mmap_reader::MmapReader;
pub use reader::DiskReader;

use sqlsift_core::{BlockSource, Result};
use std::io::Read;
use std::path::Path;

/// The bytes of a target or auxiliary file, mapped when possible.
///
/// Files that cannot be mapped (empty files, some special files) are read
/// into memory instead. Either way the file is opened read-only.
pub enum TargetImage {
    Mapped(MmapReader),
    Buffered(Vec<u8>),
}

impl TargetImage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path_ref = path.as_ref();
        match MmapReader::new(path_ref) {
            Ok(r) => Ok(TargetImage::Mapped(r)),
            Err(_) => {
                let mut file = std::fs::File::open(path_ref)?;
                let mut bytes = Vec::new();
                file.read_to_end(&mut bytes)?;
                Ok(TargetImage::Buffered(bytes))
            }
        }
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        match self {
            TargetImage::Mapped(r) => r.as_bytes(),
            TargetImage::Buffered(b) => b,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes().is_empty()
    }

    #[inline]
    pub fn is_mmap(&self) -> bool {
        matches!(self, TargetImage::Mapped(_))
    }
}

impl BlockSource for TargetImage {
    fn read_chunk(&mut self, offset: u64, buffer: &mut [u8]) -> Result<usize> {
        match self {
            TargetImage::Mapped(r) => r.read_chunk(offset, buffer),
            TargetImage::Buffered(bytes) => {
                let start = usize::try_from(offset).unwrap_or(usize::MAX).min(bytes.len());
                let len = buffer.len().min(bytes.len() - start);
                buffer[..len].copy_from_slice(&bytes[start..start + len]);
                Ok(len)
            }
        }
    }

    fn size(&self) -> u64 {
        match self {
            TargetImage::Mapped(r) => r.size(),
            TargetImage::Buffered(b) => b.len() as u64,
        }
    }
}
