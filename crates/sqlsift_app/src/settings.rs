//! Search configuration, loadable from JSON and overridable from the CLI.

use crate::error::{SearchError, SearchResult};
use serde::{Deserialize, Serialize};
use sqlsift_core::candidates::EntropyConfig;
use sqlsift_core::{ExpansionConfig, LayoutConfig, MatrixDimensions};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const MIN_ENTROPY_THRESHOLD: f64 = 0.6;
pub const MAX_ENTROPY_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub workers: usize,
    pub attempt_timeout_ms: u64,
    /// Whole-search deadline; `None` runs until success or exhaustion.
    pub search_timeout_secs: Option<u64>,
    pub queue_capacity: usize,
    /// How long a stopped search waits for in-flight attempts to report.
    pub cancel_grace_ms: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get().clamp(4, 8),
            attempt_timeout_ms: 30_000,
            search_timeout_secs: None,
            queue_capacity: 64,
            cancel_grace_ms: 250,
        }
    }
}

impl HarnessConfig {
    #[inline]
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    #[inline]
    pub fn search_timeout(&self) -> Option<Duration> {
        self.search_timeout_secs.map(Duration::from_secs)
    }

    #[inline]
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub entropy: EntropyConfig,
    pub layout: LayoutConfig,
    pub expansion: ExpansionConfig,
    pub matrix: MatrixDimensions,
    pub harness: HarnessConfig,
    /// Where the report goes; next to the target when unset.
    pub output_dir: Option<PathBuf>,
}

impl SearchConfig {
    pub fn load(path: impl AsRef<Path>) -> SearchResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| SearchError::Config(format!("{}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| SearchError::Config(format!("{}: {e}", path.display())))?;
        Ok(config)
    }

    pub fn validate(&self) -> SearchResult<()> {
        let h = &self.harness;
        if h.workers == 0 {
            return Err(SearchError::Config("workers must be at least 1".into()));
        }
        if h.attempt_timeout_ms == 0 {
            return Err(SearchError::Config("attempt timeout must be positive".into()));
        }
        if h.search_timeout_secs == Some(0) {
            return Err(SearchError::Config("search timeout must be positive".into()));
        }
        if h.queue_capacity == 0 {
            return Err(SearchError::Config("queue capacity must be positive".into()));
        }
        let threshold = self.entropy.threshold;
        if !(MIN_ENTROPY_THRESHOLD..=MAX_ENTROPY_THRESHOLD).contains(&threshold) {
            return Err(SearchError::Config(format!(
                "entropy threshold {threshold} outside {MIN_ENTROPY_THRESHOLD}..={MAX_ENTROPY_THRESHOLD}"
            )));
        }
        if self.entropy.stride == 0 {
            return Err(SearchError::Config("entropy stride must be positive".into()));
        }
        if self.layout.page_sizes.is_empty() {
            return Err(SearchError::Config("layout needs at least one page size".into()));
        }
        self.matrix
            .validate()
            .map_err(|e| SearchError::Config(e.to_string()))
    }
}
