//! Page layout analysis.
//!
//! Partitions a target into pages for every candidate page size and looks for
//! the per-page footer an encrypting codec leaves behind (IV followed by an
//! HMAC tag inside the reserved region). The resulting ranking is evidence for
//! the configuration matrix, never a verdict.

use crate::catalog::{FooterSlot, MarkerCatalog};
use crate::sqlite::{self, SidecarEvidence};
use crate::statistics::looks_like_cipher;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const DEFAULT_PAGE_SIZES: [u32; 8] = [4096, 1024, 8192, 2048, 16384, 32768, 65536, 512];
pub const IV_LEN: usize = 16;
pub const SALT_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FooterLayout {
    /// IV at `P-48`, 20-byte HMAC at `P-32`.
    Reserve48,
    /// IV at `P-80`, 64-byte HMAC at `P-64`.
    Reserve80,
}

impl FooterLayout {
    pub const ALL: [FooterLayout; 2] = [Self::Reserve48, Self::Reserve80];

    #[inline]
    pub fn reserve(self) -> usize {
        match self {
            Self::Reserve48 => 48,
            Self::Reserve80 => 80,
        }
    }

    #[inline]
    pub fn hmac_len(self) -> usize {
        match self {
            Self::Reserve48 => 20,
            Self::Reserve80 => 64,
        }
    }

    #[inline]
    pub fn iv_offset(self, page_len: usize) -> Option<usize> {
        page_len.checked_sub(self.reserve())
    }

    #[inline]
    pub fn hmac_offset(self, page_len: usize) -> Option<usize> {
        page_len.checked_sub(self.reserve() - IV_LEN)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageRecord {
    pub page_index: usize,
    pub offset: usize,
    pub assumed_page_size: u32,
    pub has_salt: bool,
    pub has_iv_marker: bool,
    pub has_hmac_marker: bool,
    pub salt_hex: Option<String>,
    pub footer_layout: Option<FooterLayout>,
}

impl PageRecord {
    #[inline]
    pub fn has_footer(&self) -> bool {
        self.footer_layout.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Page sizes to try, in preference order for tie-breaking.
    pub page_sizes: Vec<u32>,
    pub max_pages_per_size: usize,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            page_sizes: DEFAULT_PAGE_SIZES.to_vec(),
            max_pages_per_size: 4096,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageSizeHint {
    pub page_size: u32,
    pub source: String,
}

impl PageSizeHint {
    pub fn new(page_size: u32, source: impl Into<String>) -> Self {
        Self {
            page_size,
            source: source.into(),
        }
    }

    pub fn from_sidecars(sidecars: &[SidecarEvidence]) -> Vec<Self> {
        sidecars
            .iter()
            .filter_map(|s| {
                s.page_size_hint
                    .map(|size| Self::new(size, format!("{:?}", s.kind).to_lowercase()))
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageSizeScore {
    pub page_size: u32,
    pub score: f64,
    pub pages_examined: usize,
    pub footer_pages: usize,
    pub divides_file: bool,
    pub hinted_by: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LayoutReport {
    pub file_len: usize,
    pub plaintext: bool,
    pub header_page_size: Option<u32>,
    pub salt_hex: Option<String>,
    pub ranking: Vec<PageSizeScore>,
    #[serde(skip)]
    pub records: Vec<PageRecord>,
}

impl LayoutReport {
    /// Page sizes ordered from most to least likely.
    pub fn ranked_page_sizes(&self) -> Vec<u32> {
        self.ranking.iter().map(|s| s.page_size).collect()
    }

    /// The top-ranked page size when it is backed by positive evidence.
    pub fn detected_page_size(&self) -> Option<u32> {
        self.ranking
            .first()
            .filter(|s| s.score > 0.0)
            .map(|s| s.page_size)
    }

    pub fn records_for(&self, page_size: u32) -> impl Iterator<Item = &PageRecord> {
        self.records
            .iter()
            .filter(move |r| r.assumed_page_size == page_size)
    }

    pub fn footer_pages(&self) -> usize {
        self.records.iter().filter(|r| r.has_footer()).count()
    }
}

pub struct PageLayoutAnalyzer<'c> {
    config: LayoutConfig,
    catalog: &'c MarkerCatalog,
}

impl<'c> PageLayoutAnalyzer<'c> {
    pub fn new(config: LayoutConfig, catalog: &'c MarkerCatalog) -> Self {
        Self { config, catalog }
    }

    pub fn analyze(&self, buffer: &[u8], hints: &[PageSizeHint]) -> LayoutReport {
        let plaintext = sqlite::is_plaintext(buffer);
        let header_page_size = if plaintext {
            sqlite::header_page_size(buffer)
        } else {
            None
        };

        // A plaintext database has no footer, so marker text inside it is
        // just schema or row data.
        let mut iv_marks = HashSet::new();
        let mut hmac_marks = HashSet::new();
        let hits = if plaintext {
            Vec::new()
        } else {
            self.catalog.scan(buffer)
        };
        for hit in hits {
            match hit.marker.slot {
                Some(FooterSlot::Iv) => {
                    iv_marks.insert(hit.offset);
                }
                Some(FooterSlot::Hmac) => {
                    hmac_marks.insert(hit.offset);
                }
                None => {}
            }
        }

        let mut page_sizes: Vec<u32> = self
            .config
            .page_sizes
            .iter()
            .copied()
            .filter(|s| sqlite::is_valid_page_size(*s))
            .collect();
        for extra in header_page_size
            .into_iter()
            .chain(hints.iter().map(|h| h.page_size))
        {
            if sqlite::is_valid_page_size(extra) && !page_sizes.contains(&extra) {
                page_sizes.push(extra);
            }
        }

        let mut records = Vec::new();
        let mut ranking = Vec::with_capacity(page_sizes.len());
        for (preference, &page_size) in page_sizes.iter().enumerate() {
            let start = records.len();
            self.partition(buffer, page_size, plaintext, &iv_marks, &hmac_marks, &mut records);
            let pages = &records[start..];

            let full_pages: Vec<&PageRecord> = pages
                .iter()
                .filter(|r| r.offset + page_size as usize <= buffer.len())
                .collect();
            let footer_pages = full_pages.iter().filter(|r| r.has_footer()).count();
            let divides_file = !buffer.is_empty() && buffer.len() % page_size as usize == 0;

            let mut hinted_by: Vec<String> = hints
                .iter()
                .filter(|h| h.page_size == page_size)
                .map(|h| h.source.clone())
                .collect();
            if header_page_size == Some(page_size) {
                hinted_by.push("header".to_string());
            }

            let mut score = 0.0;
            if !full_pages.is_empty() {
                score += 0.4 * footer_pages as f64 / full_pages.len() as f64;
            }
            if divides_file {
                score += 0.2;
            }
            if header_page_size == Some(page_size) {
                score += 0.6;
            }
            score += 0.3 * hints.iter().filter(|h| h.page_size == page_size).count().min(2) as f64;

            ranking.push((
                preference,
                PageSizeScore {
                    page_size,
                    score,
                    pages_examined: pages.len(),
                    footer_pages,
                    divides_file,
                    hinted_by,
                },
            ));
        }

        ranking.sort_by(|(pa, a), (pb, b)| b.score.total_cmp(&a.score).then(pa.cmp(pb)));

        let salt_hex = if !plaintext && buffer.len() >= SALT_LEN {
            Some(hex::encode(&buffer[..SALT_LEN]))
        } else {
            None
        };

        LayoutReport {
            file_len: buffer.len(),
            plaintext,
            header_page_size,
            salt_hex,
            ranking: ranking.into_iter().map(|(_, s)| s).collect(),
            records,
        }
    }

    fn partition(
        &self,
        buffer: &[u8],
        page_size: u32,
        plaintext: bool,
        iv_marks: &HashSet<usize>,
        hmac_marks: &HashSet<usize>,
        out: &mut Vec<PageRecord>,
    ) {
        let size = page_size as usize;
        let pages = buffer.len().div_ceil(size).min(self.config.max_pages_per_size);

        for page_index in 0..pages {
            let offset = page_index * size;
            let end = (offset + size).min(buffer.len());
            let page = &buffer[offset..end];

            let mut has_iv_marker = false;
            let mut has_hmac_marker = false;
            let mut footer_layout = None;
            if page.len() == size {
                for layout in FooterLayout::ALL {
                    let (Some(iv_at), Some(hmac_at)) =
                        (layout.iv_offset(size), layout.hmac_offset(size))
                    else {
                        continue;
                    };
                    let iv = marks_slot(
                        iv_marks,
                        offset + iv_at,
                        &page[iv_at..iv_at + IV_LEN],
                        plaintext,
                    );
                    let hmac = marks_slot(
                        hmac_marks,
                        offset + hmac_at,
                        &page[hmac_at..hmac_at + layout.hmac_len()],
                        plaintext,
                    );
                    has_iv_marker |= iv;
                    has_hmac_marker |= hmac;
                    if iv && hmac && footer_layout.is_none() {
                        footer_layout = Some(layout);
                    }
                }
            }

            let (has_salt, salt_hex) = if page_index == 0 && !plaintext && page.len() >= SALT_LEN {
                (true, Some(hex::encode(&page[..SALT_LEN])))
            } else {
                (false, None)
            };

            out.push(PageRecord {
                page_index,
                offset,
                assumed_page_size: page_size,
                has_salt,
                has_iv_marker,
                has_hmac_marker,
                salt_hex,
                footer_layout,
            });
        }
    }
}

fn marks_slot(marks: &HashSet<usize>, absolute: usize, slot: &[u8], plaintext: bool) -> bool {
    !plaintext && (marks.contains(&absolute) || looks_like_cipher(slot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{RngCore, SeedableRng};

    fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut buf = vec![0u8; len];
        rng.fill_bytes(&mut buf);
        buf
    }

    #[test]
    fn record_offsets_follow_page_size() {
        let catalog = MarkerCatalog::builtin();
        let analyzer = PageLayoutAnalyzer::new(LayoutConfig::default(), &catalog);
        let buffer = random_bytes(3 * 1024 + 100, 1);
        let report = analyzer.analyze(&buffer, &[]);
        for record in &report.records {
            assert_eq!(
                record.offset,
                record.page_index * record.assumed_page_size as usize
            );
        }
        let partial: Vec<_> = report.records_for(1024).collect();
        assert_eq!(partial.len(), 4);
        assert!(partial[3].footer_layout.is_none());
    }

    #[test]
    fn plaintext_file_has_no_footer_evidence() {
        let catalog = MarkerCatalog::builtin();
        let analyzer = PageLayoutAnalyzer::new(LayoutConfig::default(), &catalog);
        let mut buffer = random_bytes(4096 * 2, 2);
        buffer[..16].copy_from_slice(sqlite::PLAINTEXT_MAGIC);
        buffer[16..18].copy_from_slice(&4096u16.to_be_bytes());

        let report = analyzer.analyze(&buffer, &[]);
        assert!(report.plaintext);
        assert_eq!(report.header_page_size, Some(4096));
        assert_eq!(report.detected_page_size(), Some(4096));
        assert!(report.salt_hex.is_none());
        assert!(report.records.iter().all(|r| !r.has_salt && !r.has_footer()));
    }

    #[test]
    fn cipher_file_ranks_dividing_page_size_first() {
        let catalog = MarkerCatalog::builtin();
        let analyzer = PageLayoutAnalyzer::new(
            LayoutConfig {
                page_sizes: vec![4096, 1024, 2048],
                max_pages_per_size: 64,
            },
            &catalog,
        );
        let buffer = random_bytes(1024 * 5, 3);

        let report = analyzer.analyze(&buffer, &[]);
        assert!(!report.plaintext);
        assert_eq!(report.ranked_page_sizes()[0], 1024);
        let first = report.records_for(1024).next().unwrap();
        assert!(first.has_salt);
        assert_eq!(first.salt_hex.as_deref(), Some(hex::encode(&buffer[..16]).as_str()));
        assert!(report.footer_pages() > 0);
    }

    #[test]
    fn sidecar_hint_outranks_tie() {
        let catalog = MarkerCatalog::builtin();
        let analyzer = PageLayoutAnalyzer::new(LayoutConfig::default(), &catalog);
        let buffer = random_bytes(8192 * 2, 4);
        let hints = vec![PageSizeHint::new(8192, "wal")];

        let report = analyzer.analyze(&buffer, &hints);
        assert_eq!(report.detected_page_size(), Some(8192));
        assert_eq!(report.ranking[0].hinted_by, vec!["wal".to_string()]);
    }

    #[test]
    fn iv_marker_counts_without_entropy() {
        let catalog = MarkerCatalog::builtin();
        let analyzer = PageLayoutAnalyzer::new(
            LayoutConfig {
                page_sizes: vec![512],
                max_pages_per_size: 16,
            },
            &catalog,
        );
        let mut buffer = vec![0u8; 512];
        buffer[512 - 48..512 - 46].copy_from_slice(b"IV");
        let report = analyzer.analyze(&buffer, &[]);
        assert!(!report.plaintext);
        let record = &report.records[0];
        assert!(record.has_iv_marker);
        assert!(!record.has_hmac_marker);
        assert!(record.footer_layout.is_none());
    }

    #[test]
    fn schema_text_in_plaintext_page_is_not_a_footer_marker() {
        let catalog = MarkerCatalog::builtin();
        let analyzer = PageLayoutAnalyzer::new(
            LayoutConfig {
                page_sizes: vec![4096],
                max_pages_per_size: 16,
            },
            &catalog,
        );
        let sql = b"CREATE TABLE private(id)";
        let iv_in_sql = 15;
        assert_eq!(&sql[iv_in_sql..iv_in_sql + 2], b"iv");

        let mut buffer = vec![0u8; 4096];
        buffer[..16].copy_from_slice(sqlite::PLAINTEXT_MAGIC);
        buffer[16..18].copy_from_slice(&4096u16.to_be_bytes());
        let at = 4096 - 48 - iv_in_sql;
        buffer[at..at + sql.len()].copy_from_slice(sql);
        // An "hmac" word where the 64-byte tag of the wider footer would sit.
        buffer[4096 - 64..4096 - 60].copy_from_slice(b"hmac");

        let report = analyzer.analyze(&buffer, &[]);
        assert!(report.plaintext);
        let page0: Vec<_> = report.records.iter().filter(|r| r.page_index == 0).collect();
        assert!(!page0.is_empty());
        for record in page0 {
            assert!(!record.has_iv_marker);
            assert!(!record.has_hmac_marker);
            assert!(record.footer_layout.is_none());
        }
    }

    #[test]
    fn empty_buffer_yields_empty_report() {
        let catalog = MarkerCatalog::builtin();
        let analyzer = PageLayoutAnalyzer::new(LayoutConfig::default(), &catalog);
        let report = analyzer.analyze(&[], &[]);
        assert!(report.records.is_empty());
        assert_eq!(report.detected_page_size(), None);
    }
}
