mod common;

use common::*;
use indicatif::ProgressBar;
use rusqlite::{Connection, OpenFlags};
use sha2::{Digest, Sha256};
use sqlsift::engine::{schedule, Harness};
use sqlsift::report::{report_path, write_report};
use sqlsift::search;
use sqlsift::{ResultAggregator, SearchContext, SearchStatus, SqlCipherBackend};
use sqlsift_core::candidates::SeedValue;
use sqlsift_core::matrix::WeightedConfig;
use sqlsift_core::{
    CancelToken, CandidateSource, CipherConfig, KeyCandidate, KeyEncoding, TrialBackend,
    TrialOutcome, TrialRequest,
};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn sha256_hex(path: &Path) -> String {
    format!("{:x}", Sha256::digest(fs::read(path).unwrap()))
}

/// Delegates to the real backend, except that one candidate hangs and
/// ignores cancellation.
struct StallingBackend {
    inner: SqlCipherBackend,
    stall_on: &'static [u8],
    stall_for: Duration,
}

impl TrialBackend for StallingBackend {
    fn name(&self) -> &'static str {
        "stalling"
    }

    fn attempt(&self, request: &TrialRequest<'_>, token: &CancelToken) -> TrialOutcome {
        if request.candidate.value() == self.stall_on {
            thread::sleep(self.stall_for);
        }
        self.inner.attempt(request, token)
    }
}

#[test]
fn plaintext_target_is_reported_unencrypted() {
    let dir = TempDir::new().unwrap();
    let target = write_file(dir.path(), "plain.db", &plain_database(0));

    let ctx = SearchContext::new(&target, search_config())
        .with_seeds(vec![SeedValue::from_bytes(PASSPHRASE)]);
    let run = search::run(&ctx, Arc::new(SqlCipherBackend::new())).unwrap();

    assert_eq!(run.report.status, SearchStatus::Unencrypted);
    assert_eq!(run.report.attempts_executed, 0);
    assert_eq!(run.report.total_candidates, 0);
    assert!(run.harness.is_none());
    assert!(run.report.winning_attempt.is_none());
}

#[test]
fn seeded_key_is_verified_and_reported() {
    let dir = TempDir::new().unwrap();
    let config = fast_v4();
    let target = write_file(dir.path(), "vault.db", &sealed_database(PASSPHRASE, &config, 7));
    let before = sha256_hex(&target);

    let ctx = SearchContext::new(&target, search_config()).with_seeds(vec![
        SeedValue::parse("wrong-guess").unwrap(),
        SeedValue::from_bytes(PASSPHRASE),
    ]);
    let run = search::run(&ctx, Arc::new(SqlCipherBackend::new())).unwrap();
    let report = &run.report;

    assert_eq!(report.status, SearchStatus::Success);
    assert_eq!(report.tables, vec![TABLE.to_string()]);
    let winner = report.winning_attempt.as_ref().unwrap();
    assert_eq!(winner.candidate.value(), PASSPHRASE);
    assert_eq!(winner.candidate.encoding(), KeyEncoding::Raw);
    assert_eq!(winner.config, config);
    assert!(winner.outcome.is_success());

    let harness = run.harness.unwrap();
    assert!(harness.executed < harness.scheduled);
    assert_eq!(report.attempts_executed, report.attempts.len());

    assert_eq!(report.target_sha256, before);
    assert_eq!(sha256_hex(&target), before);

    let path = report_path(&target, None);
    assert_eq!(path, dir.path().join("vault.db.sqlsift.json"));
    write_report(report, &path).unwrap();
    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json["status"], "success");
    assert_eq!(json["tables"][0], TABLE);
    assert_eq!(json["target_sha256"], before.as_str());
}

#[test]
fn key_next_to_marker_in_aux_file_is_found() {
    let dir = TempDir::new().unwrap();
    let config = fast_v3();
    let target = write_file(dir.path(), "notes.db", &sealed_database(PASSPHRASE, &config, 11));
    let aux = write_file(dir.path(), "app.conf", &config_blob_with_key(PASSPHRASE));

    let ctx = SearchContext::new(&target, search_config()).with_aux_files(vec![aux]);
    let run = search::run(&ctx, Arc::new(SqlCipherBackend::new())).unwrap();

    assert_eq!(run.report.status, SearchStatus::Success);
    let winner = run.report.winning_attempt.unwrap();
    assert_eq!(winner.candidate.value(), PASSPHRASE);
    assert_eq!(winner.candidate.origin(), Some("aux:app.conf"));
    assert_eq!(winner.config, config);
}

#[test]
fn wrong_seeds_exhaust_the_search() {
    let dir = TempDir::new().unwrap();
    let target = write_file(dir.path(), "vault.db", &sealed_database(PASSPHRASE, &fast_v4(), 3));

    let mut config = search_config();
    config.expansion.max_candidates = 16;
    let ctx = SearchContext::new(&target, config)
        .with_seeds(vec![SeedValue::parse("hunter2").unwrap()]);
    let run = search::run(&ctx, Arc::new(SqlCipherBackend::new())).unwrap();

    assert_eq!(run.report.status, SearchStatus::Exhausted);
    assert!(run.report.winning_attempt.is_none());
    assert!(run.report.tables.is_empty());
    let harness = run.harness.unwrap();
    assert_eq!(harness.executed, harness.scheduled);
    assert_eq!(run.report.attempts_executed, harness.scheduled);
    assert_eq!(
        run.report.outcome_counts.get("wrong_key_or_config").copied(),
        Some(harness.scheduled)
    );
}

#[test]
fn verified_key_exports_a_readable_copy() {
    let dir = TempDir::new().unwrap();
    let config = fast_v4();
    let target = write_file(dir.path(), "vault.db", &sealed_database(PASSPHRASE, &config, 21));

    let backend = Arc::new(SqlCipherBackend::new());
    let ctx = SearchContext::new(&target, search_config())
        .with_seeds(vec![SeedValue::from_bytes(PASSPHRASE)]);
    let run = search::run(&ctx, backend.clone()).unwrap();
    let winner = run.report.winning_attempt.unwrap();

    let dest = dir.path().join("out").join("vault.plain.db");
    fs::create_dir_all(dest.parent().unwrap()).unwrap();
    let damaged = backend
        .export(&target, &winner.candidate, &winner.config, &dest)
        .unwrap();
    assert_eq!(damaged, 0);

    let conn = Connection::open_with_flags(&dest, OpenFlags::SQLITE_OPEN_READ_ONLY).unwrap();
    let names: Vec<String> = conn
        .prepare("SELECT name FROM sqlite_master WHERE type = 'table'")
        .unwrap()
        .query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(names, vec![TABLE.to_string()]);
    let rows: i64 = conn
        .query_row(&format!("SELECT count(*) FROM {TABLE}"), [], |row| row.get(0))
        .unwrap();
    assert_eq!(rows, 0);
}

#[test]
fn hung_attempts_time_out_without_stalling_the_search() {
    let dir = TempDir::new().unwrap();
    let target = write_file(dir.path(), "vault.db", &sealed_database(PASSPHRASE, &fast_v4(), 5));

    let mut config = search_config();
    config.harness.attempt_timeout_ms = 300;
    let ctx = SearchContext::new(&target, config).with_seeds(vec![
        SeedValue::from_bytes(&b"aaa-stall"[..]),
        SeedValue::from_bytes(PASSPHRASE),
    ]);
    let backend = Arc::new(StallingBackend {
        inner: SqlCipherBackend::new(),
        stall_on: b"aaa-stall",
        stall_for: Duration::from_secs(5),
    });

    let start = Instant::now();
    let run = search::run(&ctx, backend).unwrap();

    assert_eq!(run.report.status, SearchStatus::Success);
    assert!(run.report.outcome_counts.get("timeout").copied().unwrap_or(0) >= 1);
    assert!(start.elapsed() < Duration::from_secs(4));
}

#[test]
fn timed_out_attempts_leave_no_scratch_copies() {
    let dir = TempDir::new().unwrap();
    let scratch = dir.path().join("scratch");
    fs::create_dir(&scratch).unwrap();
    let target = write_file(dir.path(), "vault.db", &sealed_database(PASSPHRASE, &fast_v4(), 17));

    // Far more KDF rounds than fit in the attempt timeout.
    let slow = CipherConfig {
        kdf_iterations: 1_000_000,
        ..fast_v4()
    };
    let candidates: Vec<_> = [PASSPHRASE, &b"second-guess"[..]]
        .into_iter()
        .map(|v| KeyCandidate::new(v.to_vec(), KeyEncoding::Raw, CandidateSource::ExternalSeed, 1.0))
        .collect();
    let mut harness_config = search_config().harness;
    harness_config.attempt_timeout_ms = 200;

    let aggregator = Arc::new(ResultAggregator::new());
    let backend = Arc::new(SqlCipherBackend::new().with_scratch_dir(&scratch));
    let summary = Harness::new(harness_config, backend).run(
        &target,
        schedule(&candidates, &[WeightedConfig { config: slow, weight: 1.0 }]),
        &aggregator,
        &CancelToken::new(),
        &ProgressBar::hidden(),
    );

    assert_eq!(summary.executed, 2);
    assert_eq!(aggregator.outcome_counts().get("timeout").copied(), Some(2));
    assert_eq!(fs::read_dir(&scratch).unwrap().count(), 0);
}

#[test]
fn stopped_search_is_reported_cancelled() {
    let dir = TempDir::new().unwrap();
    let target = write_file(dir.path(), "vault.db", &sealed_database(PASSPHRASE, &fast_v4(), 9));

    let ctx = SearchContext::new(&target, search_config())
        .with_seeds(vec![SeedValue::from_bytes(PASSPHRASE)]);
    ctx.stop_token().cancel();
    let run = search::run(&ctx, Arc::new(SqlCipherBackend::new())).unwrap();

    assert_eq!(run.report.status, SearchStatus::Cancelled);
    assert!(run.report.winning_attempt.is_none());
}

#[test]
fn analysis_uses_wal_page_size_hint() {
    let dir = TempDir::new().unwrap();
    let sealed = sealed_database(PASSPHRASE, &fast_v4(), 13);
    let target = write_file(dir.path(), "vault.db", &sealed);
    write_file(dir.path(), "vault.db-wal", &wal_header(&sealed));

    let ctx = SearchContext::new(&target, search_config())
        .with_seeds(vec![SeedValue::from_bytes(PASSPHRASE)]);
    let analysis = search::analyze(&ctx).unwrap();

    assert!(!analysis.plaintext);
    assert_eq!(analysis.sidecars.len(), 1);
    assert!(analysis.sidecars[0].magic_ok);
    assert!(analysis.sidecars[0].shares_salt);
    assert_eq!(analysis.detected_page_size(), Some(PAGE_SIZE));
    assert!(analysis.candidates.contains(PASSPHRASE, KeyEncoding::Raw));
    assert!(analysis
        .matrix
        .configs()
        .iter()
        .all(|c| c.page_size == PAGE_SIZE));
}

#[test]
fn known_header_profile_adds_iteration_hints() {
    let dir = TempDir::new().unwrap();
    let magic = [
        0x53, 0xf5, 0xc7, 0xc5, 0x6b, 0x6c, 0x98, 0xc9, 0xd9, 0x21, 0x44, 0x1f, 0x64, 0x02, 0xbb,
        0x38,
    ];
    let sealed = sealed_database_with_salt(PASSPHRASE, &fast_v4(), &magic, 19);
    let target = write_file(dir.path(), "KeyValue.db", &sealed);

    let ctx = SearchContext::new(&target, search_config())
        .with_seeds(vec![SeedValue::from_bytes(PASSPHRASE)]);
    let analysis = search::analyze(&ctx).unwrap();

    assert_eq!(analysis.profile.map(|p| p.name), Some("keyvalue"));
    assert_eq!(analysis.hinted_iterations(), &[64000, 4000]);
    let iterations = &analysis.matrix.summary().dimensions.kdf_iterations;
    assert_eq!(iterations, &vec![2, 64000, 4000]);

    let ordered = analysis
        .matrix
        .prioritize(&analysis.layout.ranked_page_sizes(), analysis.hinted_iterations());
    assert!(matches!(ordered[0].config.kdf_iterations, 64000 | 4000));

    ctx.stop_token().cancel();
    let run = search::run(&ctx, Arc::new(SqlCipherBackend::new())).unwrap();
    assert_eq!(run.report.status, SearchStatus::Cancelled);
    assert_eq!(run.report.profile.as_deref(), Some("keyvalue"));
}

#[test]
fn missing_target_is_an_error() {
    let dir = TempDir::new().unwrap();
    let ctx = SearchContext::new(dir.path().join("absent.db"), search_config());
    assert!(search::run(&ctx, Arc::new(SqlCipherBackend::new())).is_err());
}
