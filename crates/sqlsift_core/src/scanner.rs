use crate::error::{CoreError, Result};
use memchr::memmem::{self, Finder};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Overlap {
    /// Resume one byte after each hit, so `"aa"` occurs twice in `"aaa"`.
    #[default]
    Allowed,
    /// Resume past the end of each hit.
    Disjoint,
}

/// A borrowed region of the scanned buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteWindow<'a> {
    offset: usize,
    bytes: &'a [u8],
}

impl<'a> ByteWindow<'a> {
    #[inline]
    pub fn new(offset: usize, bytes: &'a [u8]) -> Self {
        Self { offset, bytes }
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn end(&self) -> usize {
        self.offset + self.bytes.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[inline]
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }
}

#[must_use]
pub fn find_all(buffer: &[u8], pattern: &[u8]) -> Vec<usize> {
    find_all_with(buffer, pattern, Overlap::Allowed)
}

#[must_use]
pub fn find_all_with(buffer: &[u8], pattern: &[u8], overlap: Overlap) -> Vec<usize> {
    if pattern.is_empty() || pattern.len() > buffer.len() {
        return Vec::new();
    }
    match overlap {
        Overlap::Disjoint => memmem::find_iter(buffer, pattern).collect(),
        Overlap::Allowed => {
            let finder = Finder::new(pattern);
            let mut offsets = Vec::new();
            let mut pos = 0;
            while pos + pattern.len() <= buffer.len() {
                match finder.find(&buffer[pos..]) {
                    Some(relative) => {
                        offsets.push(pos + relative);
                        pos += relative + 1;
                    }
                    None => break,
                }
            }
            offsets
        }
    }
}

/// Returns `len` bytes starting at `offset`, failing when the region runs
/// past the end of the buffer.
pub fn window(buffer: &[u8], offset: usize, len: usize) -> Result<ByteWindow<'_>> {
    match offset.checked_add(len) {
        Some(end) if end <= buffer.len() => Ok(ByteWindow::new(offset, &buffer[offset..end])),
        _ => Err(CoreError::Structural {
            offset,
            needed: len,
            available: buffer.len().saturating_sub(offset),
        }),
    }
}

/// Returns the `len` bytes that end right before `end`.
pub fn window_before(buffer: &[u8], end: usize, len: usize) -> Result<ByteWindow<'_>> {
    if len > end || end > buffer.len() {
        return Err(CoreError::Structural {
            offset: end.saturating_sub(len),
            needed: len,
            available: end.min(buffer.len()),
        });
    }
    window(buffer, end - len, len)
}

/// Returns the region `[offset, offset + len)` clipped to the buffer.
pub fn clipped(buffer: &[u8], offset: usize, len: usize) -> ByteWindow<'_> {
    let start = offset.min(buffer.len());
    let end = offset.saturating_add(len).min(buffer.len());
    ByteWindow::new(start, &buffer[start..end])
}

pub fn read_u16_be(buffer: &[u8], offset: usize) -> Result<u16> {
    let w = window(buffer, offset, 2)?.bytes();
    Ok(u16::from_be_bytes([w[0], w[1]]))
}

pub fn read_u32_be(buffer: &[u8], offset: usize) -> Result<u32> {
    let w = window(buffer, offset, 4)?.bytes();
    Ok(u32::from_be_bytes([w[0], w[1], w[2], w[3]]))
}

pub fn read_u32_le(buffer: &[u8], offset: usize) -> Result<u32> {
    let w = window(buffer, offset, 4)?.bytes();
    Ok(u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
}

/// Fixed-size sliding windows over a buffer, yielding `(offset, entropy)`
/// with entropy normalized to `[0, 1]`.
///
/// The byte histogram is carried from one window to the next when windows
/// overlap, so each step costs `stride` updates instead of `window`.
#[derive(Debug, Clone)]
pub struct SlidingEntropy<'a> {
    buffer: &'a [u8],
    window: usize,
    stride: usize,
    next: usize,
    counts: [u32; 256],
    weighted: f64,
    current: Option<usize>,
    table: Vec<f64>,
}

#[must_use]
pub fn sliding_entropy_scan(buffer: &[u8], window: usize, stride: usize) -> SlidingEntropy<'_> {
    let table = (0..=window)
        .map(|c| {
            if c == 0 {
                0.0
            } else {
                c as f64 * (c as f64).log2()
            }
        })
        .collect();
    SlidingEntropy {
        buffer,
        window,
        stride,
        next: 0,
        counts: [0u32; 256],
        weighted: 0.0,
        current: None,
        table,
    }
}

impl SlidingEntropy<'_> {
    #[inline]
    fn add(&mut self, byte: u8) {
        let c = self.counts[byte as usize] as usize;
        self.weighted += self.table[c + 1] - self.table[c];
        self.counts[byte as usize] += 1;
    }

    #[inline]
    fn remove(&mut self, byte: u8) {
        let c = self.counts[byte as usize] as usize;
        self.weighted -= self.table[c] - self.table[c - 1];
        self.counts[byte as usize] -= 1;
    }

    fn reset_to(&mut self, offset: usize) {
        self.counts = [0u32; 256];
        self.weighted = 0.0;
        for i in offset..offset + self.window {
            self.add(self.buffer[i]);
        }
    }

    fn advance_to(&mut self, offset: usize) {
        match self.current {
            Some(prev) if offset - prev < self.window => {
                for i in prev..offset {
                    self.remove(self.buffer[i]);
                }
                for i in prev + self.window..offset + self.window {
                    self.add(self.buffer[i]);
                }
            }
            _ => self.reset_to(offset),
        }
        self.current = Some(offset);
    }

    fn current_entropy(&self) -> f64 {
        let n = self.window as f64;
        let bits = n.log2() - self.weighted / n;
        let normalized = (bits / 8.0).clamp(0.0, 1.0);
        if normalized < 1e-12 {
            0.0
        } else {
            normalized
        }
    }
}

impl Iterator for SlidingEntropy<'_> {
    type Item = (usize, f64);

    fn next(&mut self) -> Option<Self::Item> {
        if self.window == 0 || self.stride == 0 {
            return None;
        }
        let offset = self.next;
        if offset.checked_add(self.window)? > self.buffer.len() {
            return None;
        }
        self.advance_to(offset);
        self.next = offset.saturating_add(self.stride);
        Some((offset, self.current_entropy()))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.window == 0 || self.stride == 0 || self.next + self.window > self.buffer.len() {
            return (0, Some(0));
        }
        let remaining = (self.buffer.len() - self.window - self.next) / self.stride + 1;
        (remaining, Some(remaining))
    }
}
