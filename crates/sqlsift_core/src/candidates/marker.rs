use super::{CandidateSource, KeyCandidate, KeyEncoding, ScanInput};
use crate::scanner::{window, window_before, ByteWindow};
use crate::statistics::distinct_count;
use crate::traits::CandidateStrategy;
use std::collections::HashMap;

const MARKER_BASE_CONFIDENCE: f64 = 0.65;
const MARKER_SPECIFICITY_WEIGHT: f64 = 0.25;
const MARKER_RARITY_WEIGHT: f64 = 0.1;
const MARKER_MAX_CONFIDENCE: f64 = 0.95;

/// Takes the bytes right after and right before every catalog hit, as
/// configured by the marker's extraction rule.
#[derive(Debug, Default)]
pub struct MarkerAdjacentStrategy;

impl MarkerAdjacentStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl CandidateStrategy for MarkerAdjacentStrategy {
    fn name(&self) -> &'static str {
        "marker-adjacent"
    }

    fn extract(&self, input: &ScanInput<'_>) -> Vec<KeyCandidate> {
        let buffer = input.buffer;
        let hits = input.catalog.scan(buffer);

        let mut hits_per_marker: HashMap<usize, usize> = HashMap::new();
        for hit in &hits {
            *hits_per_marker.entry(hit.marker_index).or_default() += 1;
        }

        let mut candidates = Vec::new();
        for hit in &hits {
            let occurrences = hits_per_marker.get(&hit.marker_index).copied().unwrap_or(1);
            let confidence = (MARKER_BASE_CONFIDENCE
                + MARKER_SPECIFICITY_WEIGHT * hit.marker.specificity()
                + MARKER_RARITY_WEIGHT / occurrences as f64)
                .min(MARKER_MAX_CONFIDENCE);

            let after = hit.marker.extraction.after();
            let before = hit.marker.extraction.before();
            let regions = [
                (after > 0).then(|| window(buffer, hit.pattern_end(), after)),
                (before > 0).then(|| window_before(buffer, hit.offset, before)),
            ];

            for region in regions.into_iter().flatten() {
                let region: ByteWindow<'_> = match region {
                    Ok(w) => w,
                    Err(e) => {
                        tracing::trace!(marker = %hit.marker.name, error = %e, "skipping window");
                        continue;
                    }
                };
                if distinct_count(region.bytes()) < 2 {
                    continue;
                }
                candidates.push(
                    KeyCandidate::new(
                        region.bytes(),
                        KeyEncoding::Raw,
                        CandidateSource::MarkerAdjacent,
                        confidence,
                    )
                    .with_chain(vec![format!("marker:{}", hit.marker.name)])
                    .with_origin(input.origin)
                    .with_offset(region.offset()),
                );
            }
        }
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MarkerCatalog;
    use crate::candidates::CandidateSet;

    fn key_bytes() -> Vec<u8> {
        (0..32u8).map(|i| 0x80 | i.wrapping_mul(7)).collect()
    }

    #[test]
    fn key_marker_yields_following_bytes() {
        let catalog = MarkerCatalog::builtin();
        let mut buffer = b"KEY".to_vec();
        buffer.extend_from_slice(&key_bytes());

        let found = MarkerAdjacentStrategy.extract(&ScanInput {
            buffer: &buffer,
            origin: "t",
            catalog: &catalog,
        });
        let set: CandidateSet = found.into_iter().collect();
        let matching: Vec<_> = set.iter().filter(|c| c.value() == key_bytes().as_slice()).collect();
        assert_eq!(matching.len(), 1);
        assert_eq!(matching[0].source(), CandidateSource::MarkerAdjacent);
        assert_eq!(matching[0].offset(), Some(3));
    }

    #[test]
    fn truncated_window_is_skipped() {
        let catalog = MarkerCatalog::builtin();
        let buffer = b"\x01\x02KEY\x03\x04".to_vec();
        let found = MarkerAdjacentStrategy.extract(&ScanInput {
            buffer: &buffer,
            origin: "t",
            catalog: &catalog,
        });
        assert!(found.is_empty());
    }

    #[test]
    fn rarer_markers_score_higher() {
        let catalog = MarkerCatalog::builtin();
        let tail = key_bytes();
        let mut once = b"STICKY".to_vec();
        once.extend_from_slice(&tail);
        let mut twice = once.clone();
        twice.extend_from_slice(b"STICKY");
        twice.extend_from_slice(&tail);

        let extract = |buffer: &[u8]| {
            MarkerAdjacentStrategy.extract(&ScanInput {
                buffer,
                origin: "t",
                catalog: &catalog,
            })
        };
        let single = extract(&once)[0].confidence();
        let double = extract(&twice)[0].confidence();
        assert!(single > double);
    }
}
