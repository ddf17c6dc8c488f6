//! Cipher configuration matrix.
//!
//! The matrix is declared as data ([`MatrixDimensions`]) and enumerated into
//! coherent [`CipherConfig`]s. Ordering is a separate step driven by layout
//! evidence.

use crate::error::{CoreError, Result};
use crate::layout::FooterLayout;
use crate::sqlite::is_valid_page_size;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CipherVersion {
    V1,
    V3,
    V4,
}

impl CipherVersion {
    pub const ALL: [CipherVersion; 3] = [Self::V1, Self::V3, Self::V4];

    #[inline]
    pub fn has_hmac(self) -> bool {
        !matches!(self, Self::V1)
    }

    /// KDF iteration count the version uses when none is configured.
    pub fn default_iterations(self) -> u32 {
        match self {
            Self::V1 => 4000,
            Self::V3 => 64000,
            Self::V4 => 256000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KdfAlgorithm {
    #[serde(rename = "PBKDF2_HMAC_SHA1")]
    Pbkdf2HmacSha1,
    #[serde(rename = "PBKDF2_HMAC_SHA256")]
    Pbkdf2HmacSha256,
    #[serde(rename = "PBKDF2_HMAC_SHA512")]
    Pbkdf2HmacSha512,
}

impl KdfAlgorithm {
    pub const ALL: [KdfAlgorithm; 3] = [
        Self::Pbkdf2HmacSha1,
        Self::Pbkdf2HmacSha256,
        Self::Pbkdf2HmacSha512,
    ];

    /// The HMAC algorithm built on the same digest.
    pub fn matching_hmac(self) -> HmacAlgorithm {
        match self {
            Self::Pbkdf2HmacSha1 => HmacAlgorithm::HmacSha1,
            Self::Pbkdf2HmacSha256 => HmacAlgorithm::HmacSha256,
            Self::Pbkdf2HmacSha512 => HmacAlgorithm::HmacSha512,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HmacAlgorithm {
    #[serde(rename = "HMAC_SHA1")]
    HmacSha1,
    #[serde(rename = "HMAC_SHA256")]
    HmacSha256,
    #[serde(rename = "HMAC_SHA512")]
    HmacSha512,
}

impl HmacAlgorithm {
    #[inline]
    pub fn digest_len(self) -> usize {
        match self {
            Self::HmacSha1 => 20,
            Self::HmacSha256 => 32,
            Self::HmacSha512 => 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CipherConfig {
    pub version: CipherVersion,
    pub page_size: u32,
    pub kdf_algorithm: KdfAlgorithm,
    pub kdf_iterations: u32,
    pub hmac_algorithm: HmacAlgorithm,
    pub salt_size: usize,
}

impl CipherConfig {
    /// SQLCipher 3 defaults.
    pub fn v3(page_size: u32) -> Self {
        Self {
            version: CipherVersion::V3,
            page_size,
            kdf_algorithm: KdfAlgorithm::Pbkdf2HmacSha1,
            kdf_iterations: 64000,
            hmac_algorithm: HmacAlgorithm::HmacSha1,
            salt_size: 16,
        }
    }

    /// SQLCipher 4 defaults.
    pub fn v4(page_size: u32) -> Self {
        Self {
            version: CipherVersion::V4,
            page_size,
            kdf_algorithm: KdfAlgorithm::Pbkdf2HmacSha512,
            kdf_iterations: 256000,
            hmac_algorithm: HmacAlgorithm::HmacSha512,
            salt_size: 16,
        }
    }

    /// Bytes reserved at the end of every page for the IV and HMAC tag,
    /// rounded up to the AES block size.
    pub fn reserve_size(&self) -> usize {
        if self.version.has_hmac() {
            (16 + self.hmac_algorithm.digest_len()).div_ceil(16) * 16
        } else {
            16
        }
    }

    pub fn hmac_len(&self) -> usize {
        if self.version.has_hmac() {
            self.hmac_algorithm.digest_len()
        } else {
            0
        }
    }

    pub fn footer_layout(&self) -> Option<FooterLayout> {
        FooterLayout::ALL
            .into_iter()
            .find(|l| self.version.has_hmac() && l.reserve() == self.reserve_size())
    }

    /// True for parameter combinations some codec version actually writes.
    pub fn is_coherent(&self) -> bool {
        match self.version {
            CipherVersion::V1 => {
                self.kdf_algorithm == KdfAlgorithm::Pbkdf2HmacSha1
                    && self.hmac_algorithm == HmacAlgorithm::HmacSha1
            }
            CipherVersion::V3 => {
                self.kdf_algorithm == KdfAlgorithm::Pbkdf2HmacSha1
                    && self.hmac_algorithm == HmacAlgorithm::HmacSha1
            }
            CipherVersion::V4 => {
                !(self.kdf_algorithm == KdfAlgorithm::Pbkdf2HmacSha1
                    && self.hmac_algorithm == HmacAlgorithm::HmacSha1)
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !is_valid_page_size(self.page_size) {
            return Err(CoreError::InvalidFormat(format!(
                "page size {} is not a power of two in 512..=65536",
                self.page_size
            )));
        }
        if !matches!(self.salt_size, 16 | 32) {
            return Err(CoreError::InvalidFormat(format!(
                "salt size {} is not 16 or 32",
                self.salt_size
            )));
        }
        if self.kdf_iterations == 0 {
            return Err(CoreError::InvalidFormat("zero KDF iterations".to_string()));
        }
        if self.salt_size + self.reserve_size() + 16 > self.page_size as usize {
            return Err(CoreError::InvalidFormat(format!(
                "page size {} leaves no room for data",
                self.page_size
            )));
        }
        Ok(())
    }

    /// Whether the version, KDF and HMAC all match the version's defaults.
    pub fn is_generation_default(&self) -> bool {
        let defaults = match self.version {
            CipherVersion::V1 | CipherVersion::V3 => {
                (KdfAlgorithm::Pbkdf2HmacSha1, HmacAlgorithm::HmacSha1)
            }
            CipherVersion::V4 => (KdfAlgorithm::Pbkdf2HmacSha512, HmacAlgorithm::HmacSha512),
        };
        (self.kdf_algorithm, self.hmac_algorithm) == defaults
            && self.kdf_iterations == self.version.default_iterations()
            && self.salt_size == 16
    }
}

impl fmt::Display for CipherConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}/{}/{:?}/{}/{:?}/salt{}",
            self.version,
            self.page_size,
            self.kdf_algorithm,
            self.kdf_iterations,
            self.hmac_algorithm,
            self.salt_size
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatrixDimensions {
    pub versions: Vec<CipherVersion>,
    pub page_sizes: Vec<u32>,
    pub kdf_algorithms: Vec<KdfAlgorithm>,
    pub kdf_iterations: Vec<u32>,
    pub hmac_algorithms: Vec<HmacAlgorithm>,
    pub salt_sizes: Vec<usize>,
}

impl Default for MatrixDimensions {
    fn default() -> Self {
        Self {
            versions: CipherVersion::ALL.to_vec(),
            page_sizes: vec![1024, 4096, 8192],
            kdf_algorithms: KdfAlgorithm::ALL.to_vec(),
            kdf_iterations: vec![4000, 64000, 256000],
            hmac_algorithms: vec![HmacAlgorithm::HmacSha1, HmacAlgorithm::HmacSha512],
            salt_sizes: vec![16, 32],
        }
    }
}

impl MatrixDimensions {
    /// Adds a page size found by layout analysis, if not already present.
    #[must_use]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        if is_valid_page_size(page_size) && !self.page_sizes.contains(&page_size) {
            self.page_sizes.push(page_size);
        }
        self
    }

    /// Adds iteration counts a database profile is known to use.
    #[must_use]
    pub fn with_kdf_iterations(mut self, iterations: &[u32]) -> Self {
        for &count in iterations {
            if count > 0 && !self.kdf_iterations.contains(&count) {
                self.kdf_iterations.push(count);
            }
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.versions.is_empty()
            || self.page_sizes.is_empty()
            || self.kdf_algorithms.is_empty()
            || self.kdf_iterations.is_empty()
            || self.hmac_algorithms.is_empty()
            || self.salt_sizes.is_empty()
        {
            return Err(CoreError::InvalidFormat(
                "every matrix dimension needs at least one value".to_string(),
            ));
        }
        if let Some(bad) = self.page_sizes.iter().find(|s| !is_valid_page_size(**s)) {
            return Err(CoreError::InvalidFormat(format!("invalid page size {bad}")));
        }
        if let Some(bad) = self.salt_sizes.iter().find(|s| !matches!(**s, 16 | 32)) {
            return Err(CoreError::InvalidFormat(format!("invalid salt size {bad}")));
        }
        if self.kdf_iterations.contains(&0) {
            return Err(CoreError::InvalidFormat("zero KDF iterations".to_string()));
        }
        Ok(())
    }

    /// Size of the raw cartesian product before pruning.
    pub fn product(&self) -> usize {
        self.versions.len()
            * self.page_sizes.len()
            * self.kdf_algorithms.len()
            * self.kdf_iterations.len()
            * self.hmac_algorithms.len()
            * self.salt_sizes.len()
    }
}

/// Every coherent configuration in the product, each exactly once, in
/// dimension order.
pub fn enumerate(dims: &MatrixDimensions) -> Vec<CipherConfig> {
    let mut seen = HashSet::new();
    let mut configs = Vec::new();
    for &version in &dims.versions {
        for &page_size in &dims.page_sizes {
            for &kdf_algorithm in &dims.kdf_algorithms {
                for &kdf_iterations in &dims.kdf_iterations {
                    for &hmac_algorithm in &dims.hmac_algorithms {
                        for &salt_size in &dims.salt_sizes {
                            let config = CipherConfig {
                                version,
                                page_size,
                                kdf_algorithm,
                                kdf_iterations,
                                hmac_algorithm,
                                salt_size,
                            };
                            if config.is_coherent()
                                && config.validate().is_ok()
                                && seen.insert(config)
                            {
                                configs.push(config);
                            }
                        }
                    }
                }
            }
        }
    }
    configs
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatrixSummary {
    pub dimensions: MatrixDimensions,
    pub product: usize,
    pub cardinality: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WeightedConfig {
    pub config: CipherConfig,
    pub weight: f64,
}

#[derive(Debug, Clone)]
pub struct ConfigMatrix {
    configs: Vec<CipherConfig>,
    summary: MatrixSummary,
}

impl ConfigMatrix {
    pub fn build(dims: MatrixDimensions) -> Self {
        let configs = enumerate(&dims);
        let summary = MatrixSummary {
            product: dims.product(),
            cardinality: configs.len(),
            dimensions: dims,
        };
        Self { configs, summary }
    }

    #[inline]
    pub fn configs(&self) -> &[CipherConfig] {
        &self.configs
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.configs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    #[inline]
    pub fn summary(&self) -> &MatrixSummary {
        &self.summary
    }

    /// Orders configurations by the rank of their page size in
    /// `ranked_page_sizes`, then by whether they match their version's
    /// defaults or use one of `hinted_iterations`. Equal weights keep
    /// enumeration order.
    pub fn prioritize(
        &self,
        ranked_page_sizes: &[u32],
        hinted_iterations: &[u32],
    ) -> Vec<WeightedConfig> {
        let mut weighted: Vec<WeightedConfig> = self
            .configs
            .iter()
            .map(|config| {
                let rank = ranked_page_sizes
                    .iter()
                    .position(|s| *s == config.page_size)
                    .unwrap_or(ranked_page_sizes.len());
                let page_weight = 1.0 / (1.0 + rank as f64);
                let default_weight = if config.is_generation_default() { 1.0 } else { 0.8 };
                let hint_weight = if hinted_iterations.contains(&config.kdf_iterations) {
                    1.25
                } else {
                    1.0
                };
                WeightedConfig {
                    config: *config,
                    weight: page_weight * default_weight * hint_weight,
                }
            })
            .collect();
        weighted.sort_by(|a, b| b.weight.total_cmp(&a.weight));
        weighted
    }
}
