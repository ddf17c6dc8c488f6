//! Candidate key extraction.
//!
//! Every source of key material implements [`CandidateStrategy`]; the
//! [`CandidateExtractor`] runs a list of strategies over a buffer and merges
//! their output into one deduplicated [`CandidateSet`].

mod entropy;
mod marker;
mod seed;

pub use entropy::{EntropyConfig, EntropyStrategy};
pub use marker::MarkerAdjacentStrategy;
pub use seed::{SeedStrategy, SeedValue};

use crate::catalog::MarkerCatalog;
use crate::statistics::is_hex_text;
use crate::traits::CandidateStrategy;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// Key lengths SQLCipher-style codecs accept as passphrases or raw keys.
pub const STANDARD_KEY_LENGTHS: [usize; 5] = [16, 24, 32, 48, 64];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyEncoding {
    Raw,
    Hex,
    Base64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    HighEntropyWindow,
    MarkerAdjacent,
    Derived,
    ExternalSeed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyCandidate {
    #[serde(with = "hex::serde")]
    value: Vec<u8>,
    encoding: KeyEncoding,
    source: CandidateSource,
    derivation_chain: Vec<String>,
    confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    origin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    offset: Option<usize>,
}

impl KeyCandidate {
    pub fn new(
        value: impl Into<Vec<u8>>,
        encoding: KeyEncoding,
        source: CandidateSource,
        confidence: f64,
    ) -> Self {
        Self {
            value: value.into(),
            encoding,
            source,
            derivation_chain: Vec::new(),
            confidence: clamp_confidence(confidence),
            origin: None,
            offset: None,
        }
    }

    #[must_use]
    pub fn with_chain(mut self, chain: Vec<String>) -> Self {
        self.derivation_chain = chain;
        self
    }

    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    #[must_use]
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Derives a child candidate through a named transform.
    pub fn derive(
        &self,
        value: impl Into<Vec<u8>>,
        encoding: KeyEncoding,
        transform: impl Into<String>,
        factor: f64,
    ) -> Self {
        let mut chain = self.derivation_chain.clone();
        chain.push(transform.into());
        Self {
            value: value.into(),
            encoding,
            source: CandidateSource::Derived,
            derivation_chain: chain,
            confidence: clamp_confidence(self.confidence * factor),
            origin: self.origin.clone(),
            offset: self.offset,
        }
    }

    #[inline]
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    #[inline]
    pub fn encoding(&self) -> KeyEncoding {
        self.encoding
    }

    #[inline]
    pub fn source(&self) -> CandidateSource {
        self.source
    }

    #[inline]
    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    #[inline]
    pub fn derivation_chain(&self) -> &[String] {
        &self.derivation_chain
    }

    #[inline]
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    #[inline]
    pub fn offset(&self) -> Option<usize> {
        self.offset
    }

    /// The byte string handed to the key derivation function.
    pub fn passphrase(&self) -> Cow<'_, [u8]> {
        match self.encoding {
            KeyEncoding::Raw => Cow::Borrowed(&self.value),
            KeyEncoding::Hex => Cow::Owned(hex::encode(&self.value).into_bytes()),
            KeyEncoding::Base64 => Cow::Owned(
                base64::engine::general_purpose::STANDARD
                    .encode(&self.value)
                    .into_bytes(),
            ),
        }
    }

    /// Short printable label for logs.
    pub fn label(&self) -> String {
        let shown = &self.value[..self.value.len().min(8)];
        let ellipsis = if self.value.len() > 8 { ".." } else { "" };
        format!(
            "{:?}:{}{}({}B)",
            self.encoding,
            hex::encode(shown),
            ellipsis,
            self.value.len()
        )
        .to_lowercase()
    }

    #[inline]
    fn key(&self) -> (&[u8], KeyEncoding) {
        (&self.value, self.encoding)
    }
}

impl PartialEq for KeyCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for KeyCandidate {}

impl Hash for KeyCandidate {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

#[inline]
fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

/// Orders candidates by descending confidence, then encoding and value, so
/// that any permutation of the same set sorts identically.
pub fn canonical_order(a: &KeyCandidate, b: &KeyCandidate) -> std::cmp::Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then(a.encoding.cmp(&b.encoding))
        .then_with(|| a.value.cmp(&b.value))
}

/// Insertion-ordered set of candidates, unique by `(value, encoding)`.
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    entries: Vec<KeyCandidate>,
    index: HashMap<(Vec<u8>, KeyEncoding), usize>,
}

impl CandidateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a candidate. Returns `true` when it was not present before; a
    /// duplicate only replaces the stored entry if its confidence is higher.
    pub fn insert(&mut self, candidate: KeyCandidate) -> bool {
        let key = (candidate.value.clone(), candidate.encoding);
        match self.index.get(&key) {
            Some(&idx) => {
                if candidate.confidence > self.entries[idx].confidence {
                    self.entries[idx] = candidate;
                }
                false
            }
            None => {
                self.index.insert(key, self.entries.len());
                self.entries.push(candidate);
                true
            }
        }
    }

    /// Inserts a candidate and, when its value is even-length ASCII hex text,
    /// the decoded bytes as a `Hex` candidate as well.
    pub fn insert_with_hex_variant(&mut self, candidate: KeyCandidate) {
        if candidate.encoding == KeyEncoding::Raw && is_hex_text(&candidate.value) {
            if let Ok(decoded) = hex::decode(&candidate.value) {
                let mut variant = candidate.clone();
                variant.value = decoded;
                variant.encoding = KeyEncoding::Hex;
                variant.derivation_chain.push("hex-decode".to_string());
                self.insert(variant);
            }
        }
        self.insert(candidate);
    }

    pub fn contains(&self, value: &[u8], encoding: KeyEncoding) -> bool {
        self.get(value, encoding).is_some()
    }

    pub fn get(&self, value: &[u8], encoding: KeyEncoding) -> Option<&KeyCandidate> {
        self.index
            .get(&(value.to_vec(), encoding))
            .map(|&idx| &self.entries[idx])
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyCandidate> {
        self.entries.iter()
    }

    pub fn as_slice(&self) -> &[KeyCandidate] {
        &self.entries
    }

    pub fn into_vec(self) -> Vec<KeyCandidate> {
        self.entries
    }

    /// Candidates sorted by descending confidence; insertion order breaks ties.
    pub fn by_confidence(&self) -> Vec<KeyCandidate> {
        let mut sorted = self.entries.clone();
        sorted.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        sorted
    }

    /// Keeps only the `max` best candidates in canonical order.
    pub fn truncate_to(&mut self, max: usize) {
        if self.entries.len() <= max {
            return;
        }
        let mut entries = std::mem::take(&mut self.entries);
        entries.sort_by(canonical_order);
        entries.truncate(max);
        self.index.clear();
        for candidate in entries {
            self.insert(candidate);
        }
    }
}

impl Extend<KeyCandidate> for CandidateSet {
    fn extend<I: IntoIterator<Item = KeyCandidate>>(&mut self, iter: I) {
        for candidate in iter {
            self.insert(candidate);
        }
    }
}

impl FromIterator<KeyCandidate> for CandidateSet {
    fn from_iter<I: IntoIterator<Item = KeyCandidate>>(iter: I) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

impl<'a> IntoIterator for &'a CandidateSet {
    type Item = &'a KeyCandidate;
    type IntoIter = std::slice::Iter<'a, KeyCandidate>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// A buffer handed to the strategies, tagged with where it came from.
#[derive(Debug, Clone, Copy)]
pub struct ScanInput<'a> {
    pub buffer: &'a [u8],
    pub origin: &'a str,
    pub catalog: &'a MarkerCatalog,
}

#[derive(Default)]
pub struct CandidateExtractor {
    strategies: Vec<Box<dyn CandidateStrategy>>,
}

impl CandidateExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entropy windows, marker-adjacent windows and (if any) external seeds.
    pub fn standard(entropy: EntropyConfig, seeds: Vec<SeedValue>) -> Self {
        let mut extractor = Self::new()
            .with_strategy(EntropyStrategy::new(entropy))
            .with_strategy(MarkerAdjacentStrategy::new());
        if !seeds.is_empty() {
            extractor = extractor.with_strategy(SeedStrategy::new(seeds));
        }
        extractor
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: impl CandidateStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn extract(&self, input: &ScanInput<'_>) -> CandidateSet {
        let mut set = CandidateSet::new();
        self.extract_into(&mut set, input);
        set
    }

    pub fn extract_into(&self, set: &mut CandidateSet, input: &ScanInput<'_>) {
        for strategy in &self.strategies {
            let found = strategy.extract(input);
            tracing::debug!(
                strategy = strategy.name(),
                origin = input.origin,
                found = found.len(),
                "candidate strategy finished"
            );
            for candidate in found {
                set.insert_with_hex_variant(candidate);
            }
        }
    }
}
