use super::{CandidateSource, KeyCandidate, KeyEncoding, ScanInput, STANDARD_KEY_LENGTHS};
use crate::scanner::sliding_entropy_scan;
use crate::statistics::{distinct_ratio, max_entropy_for_len};
use crate::traits::CandidateStrategy;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Confidence assigned to a window whose entropy hits the ceiling.
const ENTROPY_CONFIDENCE_SCALE: f64 = 0.6;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EntropyConfig {
    /// Minimum entropy ratio (entropy over the ceiling for the window length).
    pub threshold: f64,
    /// Windows must have strictly more distinct bytes than this share.
    pub min_distinct_ratio: f64,
    pub stride: usize,
    pub key_lengths: Vec<usize>,
    pub max_per_length: usize,
}

impl Default for EntropyConfig {
    fn default() -> Self {
        Self {
            threshold: 0.75,
            min_distinct_ratio: 0.5,
            stride: 8,
            key_lengths: STANDARD_KEY_LENGTHS.to_vec(),
            max_per_length: 64,
        }
    }
}

/// Flags fixed-length windows whose byte distribution looks like key material.
pub struct EntropyStrategy {
    config: EntropyConfig,
}

impl EntropyStrategy {
    pub fn new(config: EntropyConfig) -> Self {
        Self { config }
    }

    fn scan_length(&self, input: &ScanInput<'_>, len: usize) -> Vec<KeyCandidate> {
        let ceiling = max_entropy_for_len(len);
        if ceiling == 0.0 {
            return Vec::new();
        }
        let buffer = input.buffer;

        let mut hits: Vec<(usize, f64)> = sliding_entropy_scan(buffer, len, self.config.stride)
            .filter_map(|(offset, entropy)| {
                let ratio = (entropy / ceiling).min(1.0);
                (ratio >= self.config.threshold
                    && distinct_ratio(&buffer[offset..offset + len]) > self.config.min_distinct_ratio)
                    .then_some((offset, ratio))
            })
            .collect();

        hits.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        hits.truncate(self.config.max_per_length);

        hits.into_iter()
            .map(|(offset, ratio)| {
                KeyCandidate::new(
                    &buffer[offset..offset + len],
                    KeyEncoding::Raw,
                    CandidateSource::HighEntropyWindow,
                    ENTROPY_CONFIDENCE_SCALE * ratio,
                )
                .with_origin(input.origin)
                .with_offset(offset)
            })
            .collect()
    }
}

impl CandidateStrategy for EntropyStrategy {
    fn name(&self) -> &'static str {
        "high-entropy-window"
    }

    fn extract(&self, input: &ScanInput<'_>) -> Vec<KeyCandidate> {
        let per_length: Vec<Vec<KeyCandidate>> = self
            .config
            .key_lengths
            .par_iter()
            .map(|&len| self.scan_length(input, len))
            .collect();
        per_length.into_iter().flatten().collect()
    }
}
