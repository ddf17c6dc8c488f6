use crate::report::ResultAggregator;
use crate::settings::SearchConfig;
use sqlsift_core::candidates::SeedValue;
use sqlsift_core::{CancelToken, MarkerCatalog};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Everything one search shares between its threads.
///
/// The context is built once, wrapped in an `Arc` and handed to the harness;
/// nothing about a search lives in globals.
pub struct SearchContext {
    target: PathBuf,
    config: SearchConfig,
    catalog: Arc<MarkerCatalog>,
    seeds: Vec<SeedValue>,
    aux_files: Vec<PathBuf>,
    stop: CancelToken,
    aggregator: Arc<ResultAggregator>,
    show_progress: bool,
}

impl SearchContext {
    pub fn new(target: impl Into<PathBuf>, config: SearchConfig) -> Self {
        Self {
            target: target.into(),
            config,
            catalog: Arc::new(MarkerCatalog::builtin()),
            seeds: Vec::new(),
            aux_files: Vec::new(),
            stop: CancelToken::new(),
            aggregator: Arc::new(ResultAggregator::new()),
            show_progress: false,
        }
    }

    #[must_use]
    pub fn with_catalog(mut self, catalog: MarkerCatalog) -> Self {
        self.catalog = Arc::new(catalog);
        self
    }

    #[must_use]
    pub fn with_seeds(mut self, seeds: Vec<SeedValue>) -> Self {
        self.seeds = seeds;
        self
    }

    #[must_use]
    pub fn with_aux_files(mut self, files: Vec<PathBuf>) -> Self {
        self.aux_files = files;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn catalog(&self) -> &MarkerCatalog {
        &self.catalog
    }

    pub fn seeds(&self) -> &[SeedValue] {
        &self.seeds
    }

    pub fn aux_files(&self) -> &[PathBuf] {
        &self.aux_files
    }

    /// Cancelling this token stops the whole search.
    pub fn stop_token(&self) -> &CancelToken {
        &self.stop
    }

    pub fn aggregator(&self) -> &Arc<ResultAggregator> {
        &self.aggregator
    }

    pub fn show_progress(&self) -> bool {
        self.show_progress
    }
}
