//! Key derivation expansion.
//!
//! Applications rarely store the SQLCipher passphrase verbatim; they hash,
//! encode, cut or join something they do store. The expander applies those
//! transforms to every extracted candidate.

use crate::candidates::{
    canonical_order, CandidateSet, CandidateSource, KeyCandidate, KeyEncoding,
    STANDARD_KEY_LENGTHS,
};
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

const DIGEST_HEX_FACTOR: f64 = 0.9;
const DIGEST_RAW_FACTOR: f64 = 0.85;
const CASE_FACTOR: f64 = 0.85;
const REVERSE_FACTOR: f64 = 0.7;
const BASE64_FACTOR: f64 = 0.8;
const TRUNCATE_FACTOR: f64 = 0.75;
const CONCAT_FACTOR: f64 = 0.7;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpansionConfig {
    pub digests: bool,
    pub truncations: bool,
    /// How many of the best other inputs each candidate is joined with.
    pub concat_partners: usize,
    pub key_lengths: Vec<usize>,
    pub max_candidates: usize,
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            digests: true,
            truncations: true,
            concat_partners: 5,
            key_lengths: STANDARD_KEY_LENGTHS.to_vec(),
            max_candidates: 4096,
        }
    }
}

pub struct KeyExpander {
    config: ExpansionConfig,
}

impl KeyExpander {
    pub fn new(config: ExpansionConfig) -> Self {
        Self { config }
    }

    /// Returns the inputs together with every derived candidate.
    ///
    /// Derived inputs are carried over but not expanded again, so feeding the
    /// output back in yields the same set.
    pub fn expand(&self, input: &CandidateSet) -> CandidateSet {
        let mut bases: Vec<&KeyCandidate> = input.iter().collect();
        bases.sort_by(|a, b| canonical_order(a, b));

        let mut out = CandidateSet::new();
        for candidate in &bases {
            out.insert((*candidate).clone());
        }

        let roots: Vec<&KeyCandidate> = bases
            .iter()
            .copied()
            .filter(|c| c.source() != CandidateSource::Derived)
            .collect();
        let partners: Vec<&KeyCandidate> = roots
            .iter()
            .copied()
            .take(self.config.concat_partners.min(5))
            .collect();

        for base in &roots {
            for derived in self.derive_all(base, &partners) {
                out.insert(derived);
            }
        }

        out.truncate_to(self.config.max_candidates);
        out
    }

    fn derive_all(&self, base: &KeyCandidate, partners: &[&KeyCandidate]) -> Vec<KeyCandidate> {
        let value = base.value();
        let mut derived = Vec::new();

        if self.config.digests {
            let digests: [(&str, Vec<u8>); 4] = [
                ("md5", Md5::digest(value).to_vec()),
                ("sha1", Sha1::digest(value).to_vec()),
                ("sha256", Sha256::digest(value).to_vec()),
                ("sha512", Sha512::digest(value).to_vec()),
            ];
            for (name, digest) in digests {
                derived.push(base.derive(
                    digest.clone(),
                    KeyEncoding::Hex,
                    format!("{name}-hex"),
                    DIGEST_HEX_FACTOR,
                ));
                derived.push(base.derive(
                    digest,
                    KeyEncoding::Raw,
                    format!("{name}-raw"),
                    DIGEST_RAW_FACTOR,
                ));
            }
        }

        if base.encoding() == KeyEncoding::Hex {
            derived.push(base.derive(
                hex::encode_upper(value).into_bytes(),
                KeyEncoding::Raw,
                "hex-upper",
                CASE_FACTOR,
            ));
            let reversed: Vec<u8> = value.iter().rev().copied().collect();
            derived.push(base.derive(reversed, KeyEncoding::Hex, "byte-reverse", REVERSE_FACTOR));
        }

        if base.encoding() != KeyEncoding::Base64 {
            derived.push(base.derive(value, KeyEncoding::Base64, "base64", BASE64_FACTOR));
        }

        if self.config.truncations {
            for &len in &self.config.key_lengths {
                if len == 0 || len >= value.len() {
                    continue;
                }
                derived.push(base.derive(
                    &value[..len],
                    base.encoding(),
                    format!("truncate-front:{len}"),
                    TRUNCATE_FACTOR,
                ));
                derived.push(base.derive(
                    &value[value.len() - len..],
                    base.encoding(),
                    format!("truncate-back:{len}"),
                    TRUNCATE_FACTOR,
                ));
            }
        }

        for partner in partners {
            if *partner == base {
                continue;
            }
            let encoding = if base.encoding() == partner.encoding() {
                base.encoding()
            } else {
                KeyEncoding::Raw
            };
            let tag = hex::encode(&partner.value()[..partner.value().len().min(4)]);
            let factor = CONCAT_FACTOR * partner.confidence().min(base.confidence())
                / base.confidence().max(f64::EPSILON);

            let mut appended = value.to_vec();
            appended.extend_from_slice(partner.value());
            derived.push(base.derive(appended, encoding, format!("concat-append:{tag}"), factor));

            let mut prepended = partner.value().to_vec();
            prepended.extend_from_slice(value);
            derived.push(base.derive(prepended, encoding, format!("concat-prepend:{tag}"), factor));
        }

        derived
    }
}

impl Default for KeyExpander {
    fn default() -> Self {
        Self::new(ExpansionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(value: &[u8], encoding: KeyEncoding, confidence: f64) -> KeyCandidate {
        KeyCandidate::new(value, encoding, CandidateSource::MarkerAdjacent, confidence)
    }

    #[test]
    fn digests_and_encodings_are_derived() {
        let input: CandidateSet = [seed(b"password", KeyEncoding::Raw, 0.8)].into_iter().collect();
        let out = KeyExpander::default().expand(&input);

        let md5 = Md5::digest(b"password").to_vec();
        let derived = out.get(&md5, KeyEncoding::Hex).unwrap();
        assert_eq!(derived.source(), CandidateSource::Derived);
        assert_eq!(derived.derivation_chain(), &["md5-hex".to_string()]);
        assert!((derived.confidence() - 0.72).abs() < 1e-9);

        assert!(out.contains(&md5, KeyEncoding::Raw));
        assert!(out.contains(b"password", KeyEncoding::Base64));
        assert!(out.contains(b"password", KeyEncoding::Raw));
    }

    #[test]
    fn hex_candidates_get_case_and_reverse_variants() {
        let input: CandidateSet = [seed(&[0xab, 0xcd], KeyEncoding::Hex, 0.5)].into_iter().collect();
        let out = KeyExpander::default().expand(&input);
        assert!(out.contains(b"ABCD", KeyEncoding::Raw));
        assert!(out.contains(&[0xcd, 0xab], KeyEncoding::Hex));
    }

    #[test]
    fn truncations_cover_standard_lengths() {
        let value: Vec<u8> = (0..64u8).collect();
        let input: CandidateSet = [seed(&value, KeyEncoding::Raw, 0.5)].into_iter().collect();
        let out = KeyExpander::default().expand(&input);
        for len in [16, 24, 32, 48] {
            assert!(out.contains(&value[..len], KeyEncoding::Raw), "front {len}");
            assert!(out.contains(&value[64 - len..], KeyEncoding::Raw), "back {len}");
        }
    }

    #[test]
    fn concatenation_uses_both_orders() {
        let input: CandidateSet = [
            seed(b"alpha", KeyEncoding::Raw, 0.9),
            seed(b"beta", KeyEncoding::Raw, 0.6),
        ]
        .into_iter()
        .collect();
        let out = KeyExpander::default().expand(&input);
        let joined = out.get(b"alphabeta", KeyEncoding::Raw).unwrap();
        assert!((joined.confidence() - 0.7 * 0.6).abs() < 1e-9);
        assert!(out.contains(b"betaalpha", KeyEncoding::Raw));
        assert!(!out.contains(b"alphaalpha", KeyEncoding::Raw));
    }

    #[test]
    fn output_is_capped() {
        let input: CandidateSet = (0..20u8)
            .map(|i| seed(&[i; 40], KeyEncoding::Raw, 0.5))
            .collect();
        let expander = KeyExpander::new(ExpansionConfig {
            max_candidates: 50,
            ..ExpansionConfig::default()
        });
        let out = expander.expand(&input);
        assert_eq!(out.len(), 50);
        assert!(out.iter().all(|c| c.confidence() >= 0.45));
    }
}
