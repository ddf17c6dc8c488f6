//! The end-to-end search: analyze the target, build candidates and
//! configurations, run the harness and assemble the report.

use crate::context::SearchContext;
use crate::engine::{schedule, Harness, HarnessSummary, StopReason};
use crate::error::{SearchError, SearchResult};
use crate::report::{ReportHeader, SearchReport, SearchStatus};
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use sha2::{Digest, Sha256};
use sqlsift_core::candidates::{CandidateExtractor, EntropyStrategy, MarkerAdjacentStrategy};
use sqlsift_core::layout::{LayoutReport, PageSizeHint};
use sqlsift_core::profiles;
use sqlsift_core::sqlite::{self, SidecarEvidence};
use sqlsift_core::{
    CandidateSet, ConfigMatrix, DatabaseProfile, KeyExpander, PageLayoutAnalyzer, ScanInput,
    TrialBackend,
};
use sqlsift_io::{sidecar, TargetImage};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Everything learned about the target before any attempt runs.
pub struct Analysis {
    pub target_sha256: String,
    pub target_len: u64,
    pub plaintext: bool,
    /// Known application database the header matched, if any.
    pub profile: Option<&'static DatabaseProfile>,
    pub layout: LayoutReport,
    pub sidecars: Vec<SidecarEvidence>,
    pub candidates: CandidateSet,
    pub matrix: ConfigMatrix,
}

impl Analysis {
    pub fn detected_page_size(&self) -> Option<u32> {
        self.layout.detected_page_size()
    }

    pub fn hinted_iterations(&self) -> &'static [u32] {
        self.profile.map(|p| p.kdf_iterations).unwrap_or_default()
    }
}

/// Runs every analysis stage on the target without trying any key.
pub fn analyze(ctx: &SearchContext) -> SearchResult<Analysis> {
    let target = ctx.target();
    let image = TargetImage::open(target).map_err(|e| SearchError::target(target, e))?;
    let bytes = image.bytes();
    let target_sha256 = format!("{:x}", Sha256::digest(bytes));
    let plaintext = sqlite::is_plaintext(bytes);
    info!(
        target = %target.display(),
        len = bytes.len(),
        mapped = image.is_mmap(),
        plaintext,
        "target opened"
    );

    let head = &bytes[..bytes.len().min(sqlite::HEADER_LEN)];
    let sidecars = match sidecar::discover(target, head) {
        Ok(found) => found,
        Err(e) => {
            warn!(error = %e, "sidecar inspection failed, continuing without");
            Vec::new()
        }
    };
    for found in &sidecars {
        debug!(
            kind = ?found.kind,
            path = %found.path,
            magic_ok = found.magic_ok,
            page_size = ?found.page_size_hint,
            "sidecar found"
        );
    }

    let profile = if plaintext {
        None
    } else {
        profiles::identify(head)
    };
    if let Some(profile) = profile {
        info!(
            profile = profile.name,
            page_size = ?profile.page_size,
            iterations = ?profile.kdf_iterations,
            "header matches a known database profile"
        );
    }

    let config = ctx.config();
    let mut hints = PageSizeHint::from_sidecars(&sidecars);
    hints.extend(profile.and_then(DatabaseProfile::page_size_hint));
    let layout = PageLayoutAnalyzer::new(config.layout.clone(), ctx.catalog()).analyze(bytes, &hints);
    info!(
        detected = ?layout.detected_page_size(),
        footer_pages = layout.footer_pages(),
        "layout analyzed"
    );

    let candidates = if plaintext {
        CandidateSet::new()
    } else {
        collect_candidates(ctx, bytes)
    };

    let mut dims = config.matrix.clone();
    if let Some(page_size) = layout.detected_page_size() {
        dims = dims.with_page_size(page_size);
    }
    if let Some(profile) = profile {
        dims = dims.with_kdf_iterations(profile.kdf_iterations);
    }
    let matrix = ConfigMatrix::build(dims);

    Ok(Analysis {
        target_sha256,
        target_len: bytes.len() as u64,
        plaintext,
        profile,
        layout,
        sidecars,
        candidates,
        matrix,
    })
}

fn collect_candidates(ctx: &SearchContext, target_bytes: &[u8]) -> CandidateSet {
    let config = ctx.config();
    let extractor = CandidateExtractor::standard(config.entropy.clone(), ctx.seeds().to_vec());
    let mut found = extractor.extract(&ScanInput {
        buffer: target_bytes,
        origin: "target",
        catalog: ctx.catalog(),
    });

    let aux_extractor = CandidateExtractor::new()
        .with_strategy(EntropyStrategy::new(config.entropy.clone()))
        .with_strategy(MarkerAdjacentStrategy::new());
    for path in ctx.aux_files() {
        match TargetImage::open(path) {
            Ok(image) => {
                let origin = aux_origin(path);
                aux_extractor.extract_into(
                    &mut found,
                    &ScanInput {
                        buffer: image.bytes(),
                        origin: &origin,
                        catalog: ctx.catalog(),
                    },
                );
            }
            Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable auxiliary file"),
        }
    }

    let expanded = KeyExpander::new(config.expansion.clone()).expand(&found);
    info!(
        extracted = found.len(),
        expanded = expanded.len(),
        "candidate keys ready"
    );
    expanded
}

fn aux_origin(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    format!("aux:{name}")
}

fn progress_bar(ctx: &SearchContext, total: usize) -> ProgressBar {
    if !ctx.show_progress() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("[{elapsed_precise}] [{bar:50.cyan/blue}] {pos}/{len} attempts ({eta})")
    {
        pb.set_style(style.progress_chars("##-"));
    }
    pb
}

/// The outcome of [`run`]: the report plus harness statistics, if the
/// harness ran at all.
pub struct SearchRun {
    pub report: SearchReport,
    pub harness: Option<HarnessSummary>,
}

/// Analyzes the target and tries every (candidate, configuration) pair with
/// `backend` until one verifies.
///
/// Only an unreadable target is an error; every other failure ends up in the
/// report.
pub fn run(ctx: &SearchContext, backend: Arc<dyn TrialBackend>) -> SearchResult<SearchRun> {
    let started_at = Utc::now();
    ctx.config().validate()?;
    let analysis = analyze(ctx)?;

    let weighted = analysis
        .matrix
        .prioritize(&analysis.layout.ranked_page_sizes(), analysis.hinted_iterations());
    let candidates = analysis.candidates.by_confidence();
    let header = ReportHeader {
        target_file: ctx.target().display().to_string(),
        target_sha256: analysis.target_sha256.clone(),
        target_len: analysis.target_len,
        profile: analysis.profile.map(|p| p.name.to_string()),
        matrix: Some(analysis.matrix.summary().clone()),
        layout: Some(analysis.layout.clone()),
        sidecars: analysis.sidecars.clone(),
        candidates: candidates.clone(),
        configs: analysis.matrix.configs().to_vec(),
        started_at,
    };

    if analysis.plaintext {
        info!("target carries the plaintext SQLite header, nothing to search");
        let report = ctx
            .aggregator()
            .serialize(header, SearchStatus::Unencrypted);
        return Ok(SearchRun {
            report,
            harness: None,
        });
    }

    let work = schedule(&candidates, &weighted);
    let progress = progress_bar(ctx, work.len());
    let harness = Harness::new(ctx.config().harness.clone(), backend);
    let summary = harness.run(
        ctx.target(),
        work,
        ctx.aggregator(),
        ctx.stop_token(),
        &progress,
    );
    progress.finish_and_clear();

    let status = match summary.stop {
        StopReason::Winner => SearchStatus::Success,
        StopReason::Exhausted => SearchStatus::Exhausted,
        StopReason::Deadline | StopReason::Interrupted => SearchStatus::Cancelled,
    };
    let report = ctx.aggregator().serialize(header, status);
    Ok(SearchRun {
        report,
        harness: Some(summary),
    })
}
