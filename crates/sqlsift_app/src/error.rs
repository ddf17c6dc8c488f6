use sqlsift_core::CoreError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SearchError {
    /// The target could not be read before any attempt ran.
    #[error("cannot read target {}: {source}", path.display())]
    Target {
        path: PathBuf,
        #[source]
        source: CoreError,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("cannot write report {}: {source}", path.display())]
    Report {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SearchError {
    pub fn target(path: impl Into<PathBuf>, source: impl Into<CoreError>) -> Self {
        Self::Target {
            path: path.into(),
            source: source.into(),
        }
    }
}

pub type SearchResult<T> = std::result::Result<T, SearchError>;
