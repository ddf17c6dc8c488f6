pub mod candidates;
pub mod catalog;
pub mod cipher;
mod error;
pub mod expand;
pub mod layout;
pub mod matrix;
pub mod profiles;
pub mod scanner;
pub mod sqlite;
pub mod statistics;
mod traits;
pub mod trial;

pub use candidates::{
    CandidateExtractor, CandidateSet, CandidateSource, KeyCandidate, KeyEncoding, ScanInput,
};
pub use catalog::{Marker, MarkerCatalog, MarkerClass};
pub use error::{CoreError, Result};
pub use expand::{ExpansionConfig, KeyExpander};
pub use layout::{LayoutConfig, LayoutReport, PageLayoutAnalyzer};
pub use matrix::{CipherConfig, ConfigMatrix, MatrixDimensions};
pub use profiles::DatabaseProfile;
pub use scanner::{find_all, sliding_entropy_scan, ByteWindow};
pub use traits::{BlockSource, CandidateStrategy, TrialBackend, TrialRequest};
pub use trial::{CancelToken, TrialOutcome};
