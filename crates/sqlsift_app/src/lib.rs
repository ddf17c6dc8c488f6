//! sqlsift: searches for the key of a SQLCipher-style encrypted database.
//!
//! [`search::run`] drives the whole pipeline; the CLI in `main.rs` is a thin
//! wrapper around it.

pub mod backend;
pub mod context;
pub mod engine;
pub mod error;
pub mod report;
pub mod search;
pub mod settings;

pub use backend::SqlCipherBackend;
pub use context::SearchContext;
pub use error::{SearchError, SearchResult};
pub use report::{ResultAggregator, SearchReport, SearchStatus, TrialAttempt};
pub use settings::{HarnessConfig, SearchConfig};
