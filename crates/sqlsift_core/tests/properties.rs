use proptest::collection::{hash_set, vec};
use proptest::prelude::*;
use sqlsift_core::scanner::{find_all_with, Overlap};
use sqlsift_core::statistics::{entropy, entropy_ratio};
use sqlsift_core::{
    find_all, sliding_entropy_scan, CandidateSet, CandidateSource, KeyCandidate, KeyEncoding,
    KeyExpander,
};
use std::collections::BTreeMap;

fn naive_positions(buffer: &[u8], pattern: &[u8]) -> Vec<usize> {
    if pattern.is_empty() || pattern.len() > buffer.len() {
        return Vec::new();
    }
    (0..=buffer.len() - pattern.len())
        .filter(|&i| &buffer[i..i + pattern.len()] == pattern)
        .collect()
}

type Snapshot = BTreeMap<(Vec<u8>, KeyEncoding), u64>;

fn snapshot(set: &CandidateSet) -> Snapshot {
    set.iter()
        .map(|c| ((c.value().to_vec(), c.encoding()), c.confidence().to_bits()))
        .collect()
}

fn roots(values: &[[u8; 4]], confidences: &[f64]) -> Vec<KeyCandidate> {
    values
        .iter()
        .zip(confidences.iter().cycle())
        .map(|(value, &confidence)| {
            KeyCandidate::new(
                value.to_vec(),
                KeyEncoding::Raw,
                CandidateSource::MarkerAdjacent,
                confidence,
            )
        })
        .collect()
}

proptest! {
    #[test]
    fn find_all_reports_every_occurrence(
        buffer in vec(0u8..4, 0..256),
        pattern in vec(0u8..4, 1..4),
    ) {
        let found = find_all(&buffer, &pattern);
        prop_assert_eq!(&found, &naive_positions(&buffer, &pattern));
        for offset in found {
            prop_assert_eq!(&buffer[offset..offset + pattern.len()], pattern.as_slice());
        }
    }

    #[test]
    fn disjoint_hits_never_overlap(
        buffer in vec(0u8..3, 0..256),
        pattern in vec(0u8..3, 1..4),
    ) {
        let found = find_all_with(&buffer, &pattern, Overlap::Disjoint);
        for pair in found.windows(2) {
            prop_assert!(pair[1] >= pair[0] + pattern.len());
        }
        prop_assert!(found.len() <= find_all(&buffer, &pattern).len());
    }

    #[test]
    fn entropy_stays_normalized(data in vec(any::<u8>(), 0..512)) {
        let e = entropy(&data);
        prop_assert!((0.0..=1.0).contains(&e));
        let r = entropy_ratio(&data);
        prop_assert!((0.0..=1.0 + 1e-9).contains(&r));
        prop_assert!(r + 1e-12 >= e);
    }

    #[test]
    fn sliding_scan_matches_direct_entropy(
        data in vec(any::<u8>(), 0..300),
        window in 1usize..64,
        stride in 1usize..16,
    ) {
        let scan: Vec<(usize, f64)> = sliding_entropy_scan(&data, window, stride).collect();
        let expected: Vec<usize> = if window > data.len() {
            Vec::new()
        } else {
            (0..=data.len() - window).step_by(stride).collect()
        };
        prop_assert_eq!(scan.iter().map(|(o, _)| *o).collect::<Vec<_>>(), expected);
        for (offset, value) in scan {
            let direct = entropy(&data[offset..offset + window]);
            prop_assert!((value - direct).abs() < 1e-9, "offset {} {} vs {}", offset, value, direct);
        }
    }

    #[test]
    fn candidate_set_is_unique_by_value_and_encoding(
        values in vec((vec(any::<u8>(), 1..6), 0usize..3, 0.0f64..1.0), 0..64),
    ) {
        let encodings = [KeyEncoding::Raw, KeyEncoding::Hex, KeyEncoding::Base64];
        let mut set = CandidateSet::new();
        let mut best: BTreeMap<(Vec<u8>, KeyEncoding), f64> = BTreeMap::new();
        for (value, enc, confidence) in values {
            let encoding = encodings[enc];
            set.insert(KeyCandidate::new(value.clone(), encoding, CandidateSource::HighEntropyWindow, confidence));
            let slot = best.entry((value, encoding)).or_insert(confidence);
            *slot = slot.max(confidence);
        }
        prop_assert_eq!(set.len(), best.len());
        for ((value, encoding), confidence) in best {
            let stored = set.get(&value, encoding).map(|c| c.confidence());
            prop_assert_eq!(stored, Some(confidence));
        }
    }

    #[test]
    fn expansion_is_idempotent(
        values in hash_set(any::<[u8; 4]>(), 1..5),
        confidences in vec(0.1f64..1.0, 1..5),
    ) {
        let values: Vec<[u8; 4]> = values.into_iter().collect();
        let input: CandidateSet = roots(&values, &confidences).into_iter().collect();
        let expander = KeyExpander::default();
        let once = expander.expand(&input);
        let twice = expander.expand(&once);
        prop_assert_eq!(snapshot(&once), snapshot(&twice));
    }

    #[test]
    fn expansion_ignores_input_order(
        values in hash_set(any::<[u8; 4]>(), 1..7),
        confidences in vec(0.1f64..1.0, 1..7),
    ) {
        let values: Vec<[u8; 4]> = values.into_iter().collect();
        let forward: CandidateSet = roots(&values, &confidences).into_iter().collect();
        let backward: CandidateSet = roots(&values, &confidences).into_iter().rev().collect();
        let expander = KeyExpander::default();
        prop_assert_eq!(snapshot(&expander.expand(&forward)), snapshot(&expander.expand(&backward)));
    }
}
