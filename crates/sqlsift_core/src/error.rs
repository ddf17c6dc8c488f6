use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Window at offset {offset} needs {needed} bytes, only {available} available")]
    Structural {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("Offset {offset} is out of bounds (max: {max})")]
    OutOfBounds { offset: u64, max: u64 },

    #[error("Marker catalog error: {0}")]
    Catalog(String),

    #[error("Cipher error: {0}")]
    Cipher(String),
}

impl CoreError {
    /// Structural errors describe a local parse miss and never abort a search.
    #[inline]
    pub fn is_structural(&self) -> bool {
        matches!(self, Self::Structural { .. })
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
