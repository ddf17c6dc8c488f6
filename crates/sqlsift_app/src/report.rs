//! Attempt ledger and the JSON search report.

use crate::error::{SearchError, SearchResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use sqlsift_core::layout::LayoutReport;
use sqlsift_core::matrix::MatrixSummary;
use sqlsift_core::sqlite::SidecarEvidence;
use sqlsift_core::{CipherConfig, KeyCandidate, TrialOutcome};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const REPORT_SUFFIX: &str = ".sqlsift.json";

/// One finished (candidate, configuration) attempt.
#[derive(Debug, Clone, Serialize)]
pub struct TrialAttempt {
    pub sequence: usize,
    pub candidate: KeyCandidate,
    pub config: CipherConfig,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub outcome: TrialOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStatus {
    Success,
    Exhausted,
    Cancelled,
    Unencrypted,
}

#[derive(Default)]
struct Ledger {
    attempts: Vec<TrialAttempt>,
    winner: Option<usize>,
}

/// Append-only record of every attempt, shared by all workers.
#[derive(Default)]
pub struct ResultAggregator {
    ledger: Mutex<Ledger>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempt(&self, attempt: TrialAttempt) {
        self.ledger.lock().attempts.push(attempt);
    }

    /// Claims the win for `sequence`. Only the first caller gets `true`.
    pub fn mark_winner(&self, sequence: usize) -> bool {
        let mut ledger = self.ledger.lock();
        if ledger.winner.is_some() {
            return false;
        }
        ledger.winner = Some(sequence);
        true
    }

    pub fn has_winner(&self) -> bool {
        self.ledger.lock().winner.is_some()
    }

    pub fn winner(&self) -> Option<TrialAttempt> {
        let ledger = self.ledger.lock();
        let sequence = ledger.winner?;
        ledger
            .attempts
            .iter()
            .find(|a| a.sequence == sequence)
            .cloned()
    }

    pub fn attempts_executed(&self) -> usize {
        self.ledger.lock().attempts.len()
    }

    pub fn attempts(&self) -> Vec<TrialAttempt> {
        self.ledger.lock().attempts.clone()
    }

    pub fn outcome_counts(&self) -> BTreeMap<&'static str, usize> {
        let ledger = self.ledger.lock();
        let mut counts = BTreeMap::new();
        for attempt in &ledger.attempts {
            *counts.entry(attempt.outcome.label()).or_insert(0) += 1;
        }
        counts
    }

    pub fn serialize(&self, header: ReportHeader, status: SearchStatus) -> SearchReport {
        let attempts = self.attempts();
        let winning_attempt = self.winner();
        let tables = match winning_attempt.as_ref().map(|a| &a.outcome) {
            Some(TrialOutcome::Success { tables }) => tables.clone(),
            _ => Vec::new(),
        };
        SearchReport {
            target_file: header.target_file,
            target_sha256: header.target_sha256,
            target_len: header.target_len,
            status,
            profile: header.profile,
            total_candidates: header.candidates.len(),
            total_configs: header.configs.len(),
            matrix: header.matrix,
            attempts_executed: attempts.len(),
            outcome_counts: self.outcome_counts(),
            winning_attempt,
            tables,
            layout: header.layout,
            sidecars: header.sidecars,
            candidates: header.candidates,
            configs: header.configs,
            attempts,
            started_at: header.started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Search facts known before the harness runs.
#[derive(Debug, Clone)]
pub struct ReportHeader {
    pub target_file: String,
    pub target_sha256: String,
    pub target_len: u64,
    pub profile: Option<String>,
    pub matrix: Option<MatrixSummary>,
    pub layout: Option<LayoutReport>,
    pub sidecars: Vec<SidecarEvidence>,
    pub candidates: Vec<KeyCandidate>,
    pub configs: Vec<CipherConfig>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchReport {
    pub target_file: String,
    pub target_sha256: String,
    pub target_len: u64,
    pub status: SearchStatus,
    pub profile: Option<String>,
    pub total_candidates: usize,
    pub total_configs: usize,
    pub matrix: Option<MatrixSummary>,
    pub attempts_executed: usize,
    pub outcome_counts: BTreeMap<&'static str, usize>,
    pub winning_attempt: Option<TrialAttempt>,
    pub tables: Vec<String>,
    pub layout: Option<LayoutReport>,
    pub sidecars: Vec<SidecarEvidence>,
    pub candidates: Vec<KeyCandidate>,
    pub configs: Vec<CipherConfig>,
    pub attempts: Vec<TrialAttempt>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// `<output_dir>/<file name>.sqlsift.json`, with the target's own directory
/// as the default output directory.
pub fn report_path(target: &Path, output_dir: Option<&Path>) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "target".to_string());
    let dir = output_dir
        .map(Path::to_path_buf)
        .or_else(|| target.parent().map(Path::to_path_buf))
        .unwrap_or_default();
    dir.join(format!("{name}{REPORT_SUFFIX}"))
}

pub fn write_report(report: &SearchReport, path: &Path) -> SearchResult<()> {
    let io_err = |source| SearchError::Report {
        path: path.to_path_buf(),
        source,
    };
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(io_err)?;
    }
    let json = serde_json::to_string_pretty(report)
        .map_err(|e| io_err(std::io::Error::other(e)))?;
    fs::write(path, json).map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlsift_core::{CandidateSource, KeyEncoding};
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    fn attempt(sequence: usize, outcome: TrialOutcome) -> TrialAttempt {
        TrialAttempt {
            sequence,
            candidate: KeyCandidate::new(
                b"k".to_vec(),
                KeyEncoding::Raw,
                CandidateSource::ExternalSeed,
                1.0,
            ),
            config: CipherConfig::v4(4096),
            started_at: Utc::now(),
            elapsed_ms: 1,
            outcome,
        }
    }

    fn header() -> ReportHeader {
        ReportHeader {
            target_file: "t.db".into(),
            target_sha256: "00".into(),
            target_len: 0,
            profile: None,
            matrix: None,
            layout: None,
            sidecars: Vec::new(),
            candidates: Vec::new(),
            configs: Vec::new(),
            started_at: Utc::now(),
        }
    }

    #[test]
    fn only_first_winner_counts() {
        let aggregator = Arc::new(ResultAggregator::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let aggregator = Arc::clone(&aggregator);
                thread::spawn(move || aggregator.mark_winner(i))
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
    }

    #[test]
    fn concurrent_records_are_all_kept() {
        let aggregator = Arc::new(ResultAggregator::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let aggregator = Arc::clone(&aggregator);
                thread::spawn(move || {
                    for i in 0..50 {
                        aggregator.record_attempt(attempt(t * 50 + i, TrialOutcome::WrongKeyOrConfig));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(aggregator.attempts_executed(), 200);
        assert_eq!(aggregator.outcome_counts()["wrong_key_or_config"], 200);
    }

    #[test]
    fn report_carries_winner_tables() {
        let aggregator = ResultAggregator::new();
        aggregator.record_attempt(attempt(0, TrialOutcome::WrongKeyOrConfig));
        aggregator.record_attempt(attempt(1, TrialOutcome::Success { tables: vec!["msg".into()] }));
        assert!(aggregator.mark_winner(1));

        let report = aggregator.serialize(header(), SearchStatus::Success);
        assert_eq!(report.attempts_executed, 2);
        assert_eq!(report.winning_attempt.as_ref().map(|a| a.sequence), Some(1));
        assert_eq!(report.tables, vec!["msg".to_string()]);
    }

    #[test]
    fn report_lands_next_to_target_by_default() {
        let path = report_path(Path::new("/evidence/chat.db"), None);
        assert_eq!(path, PathBuf::from("/evidence/chat.db.sqlsift.json"));
        let path = report_path(Path::new("/evidence/chat.db"), Some(Path::new("/out")));
        assert_eq!(path, PathBuf::from("/out/chat.db.sqlsift.json"));
    }

    #[test]
    fn written_report_is_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("t.db.sqlsift.json");
        let report = ResultAggregator::new().serialize(header(), SearchStatus::Exhausted);
        write_report(&report, &path).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["status"], "exhausted");
        assert_eq!(value["attempts_executed"], 0);
    }
}
