//! Ports between the analysis core and its adapters.

use crate::candidates::{KeyCandidate, ScanInput};
use crate::error::Result;
use crate::matrix::CipherConfig;
use crate::trial::{CancelToken, TrialOutcome};
use std::path::Path;

/// A source of raw bytes addressed by offset, typically a file on disk.
pub trait BlockSource {
    /// Reads up to `buffer.len()` bytes at `offset`.
    ///
    /// Returns the number of bytes read, which is short only at the end of the
    /// source.
    fn read_chunk(&mut self, offset: u64, buffer: &mut [u8]) -> Result<usize>;

    /// Total size of the source in bytes.
    fn size(&self) -> u64;

    /// Fills `buffer` completely unless the source ends first.
    fn read_full(&mut self, offset: u64, buffer: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buffer.len() {
            let n = self.read_chunk(offset + filled as u64, &mut buffer[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }
}

/// One way of pulling key material out of a buffer.
///
/// Strategies are independent and stateless across calls; the extractor runs
/// all of them and merges the results.
pub trait CandidateStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn extract(&self, input: &ScanInput<'_>) -> Vec<KeyCandidate>;
}

/// Everything an attempt needs to know about its work item.
#[derive(Debug, Clone, Copy)]
pub struct TrialRequest<'a> {
    pub target: &'a Path,
    pub candidate: &'a KeyCandidate,
    pub config: &'a CipherConfig,
}

/// Tries one (candidate, configuration) pair against the target.
///
/// Implementations must open their own handle on the target for every call,
/// never write to it, poll `token` between expensive steps and release any
/// resources once it is cancelled. Failures are reported as outcomes, not
/// errors.
pub trait TrialBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn attempt(&self, request: &TrialRequest<'_>, token: &CancelToken) -> TrialOutcome;
}
