//! Marker catalog.
//!
//! Markers are data: a byte or text pattern, the region around a hit that may
//! hold key material, and a class. New markers can be loaded from JSON without
//! touching the scanning code. Matching runs through two Aho-Corasick automata,
//! one for exact patterns and one for ASCII case-insensitive text.

use crate::error::{CoreError, Result};
use crate::scanner::{self, clipped, ByteWindow};
use aho_corasick::{AhoCorasick, MatchKind};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerPattern {
    Bytes(Vec<u8>),
    Text(String),
}

impl MarkerPattern {
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Bytes(b) => b,
            Self::Text(t) => t.as_bytes(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

/// Region around a hit that is extracted as candidate key material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Extraction {
    FixedLengthAfter(usize),
    FixedLengthBefore(usize),
    WindowAround { before: usize, after: usize },
}

impl Extraction {
    #[inline]
    pub fn before(self) -> usize {
        match self {
            Self::FixedLengthBefore(n) => n,
            Self::WindowAround { before, .. } => before,
            Self::FixedLengthAfter(_) => 0,
        }
    }

    #[inline]
    pub fn after(self) -> usize {
        match self {
            Self::FixedLengthAfter(n) => n,
            Self::WindowAround { after, .. } => after,
            Self::FixedLengthBefore(_) => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerClass {
    Algorithm,
    Indicator,
    Structural,
}

/// Page footer slot a marker names, used by the layout analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FooterSlot {
    Iv,
    Hmac,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Marker {
    pub name: String,
    pub pattern: MarkerPattern,
    pub extraction: Extraction,
    pub class: MarkerClass,
    pub case_insensitive: bool,
    pub slot: Option<FooterSlot>,
}

impl Marker {
    pub fn text(
        name: impl Into<String>,
        text: impl Into<String>,
        extraction: Extraction,
        class: MarkerClass,
    ) -> Self {
        Self {
            name: name.into(),
            pattern: MarkerPattern::Text(text.into()),
            extraction,
            class,
            case_insensitive: false,
            slot: None,
        }
    }

    pub fn bytes(
        name: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
        extraction: Extraction,
        class: MarkerClass,
    ) -> Self {
        Self {
            name: name.into(),
            pattern: MarkerPattern::Bytes(bytes.into()),
            extraction,
            class,
            case_insensitive: false,
            slot: None,
        }
    }

    #[must_use]
    pub fn case_insensitive(mut self) -> Self {
        self.case_insensitive = matches!(self.pattern, MarkerPattern::Text(_));
        self
    }

    #[must_use]
    pub fn with_slot(mut self, slot: FooterSlot) -> Self {
        self.slot = Some(slot);
        self
    }

    /// Pattern length scaled into `[0, 1]`; 16 bytes or more is fully specific.
    #[inline]
    pub fn specificity(&self) -> f64 {
        self.pattern.len().min(16) as f64 / 16.0
    }
}

#[derive(Debug, Deserialize)]
struct MarkerSpec {
    name: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    hex: Option<String>,
    extraction: Extraction,
    class: MarkerClass,
    #[serde(default)]
    case_insensitive: bool,
    #[serde(default)]
    slot: Option<FooterSlot>,
}

impl TryFrom<MarkerSpec> for Marker {
    type Error = CoreError;

    fn try_from(spec: MarkerSpec) -> Result<Self> {
        let pattern = match (spec.text, spec.hex) {
            (Some(text), None) => MarkerPattern::Text(text),
            (None, Some(hex_str)) => MarkerPattern::Bytes(hex::decode(hex_str.trim()).map_err(
                |e| CoreError::Catalog(format!("marker '{}': bad hex pattern: {e}", spec.name)),
            )?),
            _ => {
                return Err(CoreError::Catalog(format!(
                    "marker '{}': exactly one of 'text' or 'hex' is required",
                    spec.name
                )))
            }
        };
        if pattern.is_empty() {
            return Err(CoreError::Catalog(format!(
                "marker '{}': empty pattern",
                spec.name
            )));
        }
        let case_insensitive = spec.case_insensitive && matches!(pattern, MarkerPattern::Text(_));
        Ok(Marker {
            name: spec.name,
            pattern,
            extraction: spec.extraction,
            class: spec.class,
            case_insensitive,
            slot: spec.slot,
        })
    }
}

/// One occurrence of a marker in a buffer.
#[derive(Debug, Clone, Copy)]
pub struct MarkerHit<'c, 'b> {
    pub marker: &'c Marker,
    pub marker_index: usize,
    pub offset: usize,
    /// The extraction region around the hit, clipped to the buffer.
    pub window: ByteWindow<'b>,
}

impl MarkerHit<'_, '_> {
    #[inline]
    pub fn pattern_end(&self) -> usize {
        self.offset + self.marker.pattern.len()
    }
}

#[derive(Debug, Clone)]
pub struct MarkerCatalog {
    markers: Vec<Marker>,
    exact: Option<AhoCorasick>,
    exact_map: Vec<usize>,
    folded: Option<AhoCorasick>,
    folded_map: Vec<usize>,
}

impl MarkerCatalog {
    pub fn new(markers: Vec<Marker>) -> Result<Self> {
        if let Some(m) = markers.iter().find(|m| m.pattern.is_empty()) {
            return Err(CoreError::Catalog(format!("marker '{}': empty pattern", m.name)));
        }
        let mut catalog = Self {
            markers,
            exact: None,
            exact_map: Vec::new(),
            folded: None,
            folded_map: Vec::new(),
        };
        catalog.build_matchers();
        Ok(catalog)
    }

    pub fn empty() -> Self {
        Self {
            markers: Vec::new(),
            exact: None,
            exact_map: Vec::new(),
            folded: None,
            folded_map: Vec::new(),
        }
    }

    /// Markers recovered from earlier analysis passes over real targets.
    pub fn builtin() -> Self {
        use Extraction::{FixedLengthAfter, WindowAround};
        use MarkerClass::{Algorithm, Indicator, Structural};

        let around16 = WindowAround { before: 16, after: 16 };
        let around32 = WindowAround { before: 32, after: 32 };

        let mut markers = Vec::new();
        for tag in ["AES", "CBC", "ECB", "GCM", "SHA", "MD5", "PBKDF2"] {
            markers.push(Marker::text(tag.to_ascii_lowercase(), tag, around16, Algorithm));
        }
        markers.push(Marker::text("sqlcipher", "sqlcipher", around32, Algorithm).case_insensitive());

        markers.extend([
            Marker::text("key", "key", around32, Indicator).case_insensitive(),
            Marker::text("salt", "salt", around16, Indicator).case_insensitive(),
            Marker::text("iv", "iv", FixedLengthAfter(16), Indicator)
                .case_insensitive()
                .with_slot(FooterSlot::Iv),
            Marker::text("hmac", "hmac", around32, Indicator)
                .case_insensitive()
                .with_slot(FooterSlot::Hmac),
            Marker::text("secret", "secret", around32, Indicator).case_insensitive(),
            Marker::text("passphrase", "passphrase", FixedLengthAfter(64), Indicator)
                .case_insensitive(),
            Marker::text("password", "password", FixedLengthAfter(64), Indicator)
                .case_insensitive(),
        ]);

        markers.extend([
            Marker::text("sticky", "STICKY", FixedLengthAfter(32), Structural),
            Marker::text("status_key", "STATUS_LAST_REPORT_KEY", FixedLengthAfter(32), Structural),
            Marker::bytes(
                "sticky_header",
                [
                    0xe8, 0x1b, 0x00, 0x00, 0x8a, 0x04, 0x1d, 0x53, 0x54, 0x49, 0x43, 0x4b, 0x59,
                    0x5f, 0x53, 0x45, 0x41,
                ],
                FixedLengthAfter(32),
                Structural,
            ),
            Marker::bytes(
                "mmkv_record",
                [0x05, 0xfb, 0xe0, 0xd7, 0xbb, 0x06],
                around32,
                Structural,
            ),
            Marker::bytes(
                "keyvalue_magic",
                [
                    0x53, 0xf5, 0xc7, 0xc5, 0x6b, 0x6c, 0x98, 0xc9, 0xd9, 0x21, 0x44, 0x1f, 0x64,
                    0x02, 0xbb, 0x38,
                ],
                FixedLengthAfter(32),
                Structural,
            ),
            Marker::bytes(
                "keyvalue_index",
                [
                    0xe7, 0x93, 0x82, 0xb1, 0xa5, 0x9f, 0x5a, 0xc4, 0x7e, 0x77, 0xed, 0x53, 0x7a,
                    0x6b, 0x93, 0x52,
                ],
                FixedLengthAfter(32),
                Structural,
            ),
            Marker::bytes(
                "shared_prefix",
                [0x85, 0x41, 0x67, 0x1c],
                FixedLengthAfter(32),
                Structural,
            ),
        ]);

        let mut catalog = Self {
            markers,
            ..Self::empty()
        };
        catalog.build_matchers();
        catalog
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let mut catalog = Self::empty();
        catalog.extend_from_json(json)?;
        Ok(catalog)
    }

    pub fn extend_from_json(&mut self, json: &str) -> Result<()> {
        let specs: Vec<MarkerSpec> = serde_json::from_str(json)
            .map_err(|e| CoreError::Catalog(format!("invalid marker file: {e}")))?;
        let markers = specs
            .into_iter()
            .map(Marker::try_from)
            .collect::<Result<Vec<_>>>()?;
        self.extend(markers);
        Ok(())
    }

    pub fn extend_from_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let json = std::fs::read_to_string(path.as_ref())?;
        self.extend_from_json(&json)
    }

    pub fn extend(&mut self, markers: impl IntoIterator<Item = Marker>) {
        self.markers
            .extend(markers.into_iter().filter(|m| !m.pattern.is_empty()));
        self.build_matchers();
    }

    fn build_matchers(&mut self) {
        let mut exact_patterns: Vec<&[u8]> = Vec::new();
        let mut folded_patterns: Vec<&[u8]> = Vec::new();
        self.exact_map.clear();
        self.folded_map.clear();

        for (idx, marker) in self.markers.iter().enumerate() {
            if marker.case_insensitive {
                folded_patterns.push(marker.pattern.as_bytes());
                self.folded_map.push(idx);
            } else {
                exact_patterns.push(marker.pattern.as_bytes());
                self.exact_map.push(idx);
            }
        }

        self.exact = if exact_patterns.is_empty() {
            None
        } else {
            AhoCorasick::builder()
                .match_kind(MatchKind::Standard)
                .build(&exact_patterns)
                .ok()
        };
        self.folded = if folded_patterns.is_empty() {
            None
        } else {
            AhoCorasick::builder()
                .match_kind(MatchKind::Standard)
                .ascii_case_insensitive(true)
                .build(&folded_patterns)
                .ok()
        };
    }

    #[inline]
    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.markers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Marker> {
        self.markers.iter().find(|m| m.name == name)
    }

    /// All marker occurrences in `buffer`, overlapping, ordered by offset and
    /// then by marker position in the catalog.
    pub fn scan<'c, 'b>(&'c self, buffer: &'b [u8]) -> Vec<MarkerHit<'c, 'b>> {
        let mut raw: Vec<(usize, usize)> = Vec::new();

        match &self.exact {
            Some(matcher) => raw.extend(
                matcher
                    .find_overlapping_iter(buffer)
                    .map(|m| (m.start(), self.exact_map[m.pattern().as_usize()])),
            ),
            None => self.scan_linear(buffer, false, &mut raw),
        }
        match &self.folded {
            Some(matcher) => raw.extend(
                matcher
                    .find_overlapping_iter(buffer)
                    .map(|m| (m.start(), self.folded_map[m.pattern().as_usize()])),
            ),
            None => self.scan_linear(buffer, true, &mut raw),
        }

        raw.sort_unstable();
        raw.dedup();
        raw.into_iter()
            .map(|(offset, marker_index)| {
                let marker = &self.markers[marker_index];
                let start = offset.saturating_sub(marker.extraction.before());
                let end = offset
                    .saturating_add(marker.pattern.len())
                    .saturating_add(marker.extraction.after())
                    .min(buffer.len());
                MarkerHit {
                    marker,
                    marker_index,
                    offset,
                    window: clipped(buffer, start, end - start),
                }
            })
            .collect()
    }

    fn scan_linear(&self, buffer: &[u8], folded: bool, out: &mut Vec<(usize, usize)>) {
        let indices = if folded { &self.folded_map } else { &self.exact_map };
        if indices.is_empty() {
            return;
        }
        let lowered;
        let haystack = if folded {
            lowered = buffer.to_ascii_lowercase();
            lowered.as_slice()
        } else {
            buffer
        };
        for &idx in indices {
            let pattern = self.markers[idx].pattern.as_bytes();
            let needle = if folded {
                pattern.to_ascii_lowercase()
            } else {
                pattern.to_vec()
            };
            out.extend(
                scanner::find_all(haystack, &needle)
                    .into_iter()
                    .map(|offset| (offset, idx)),
            );
        }
    }
}

impl Default for MarkerCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
