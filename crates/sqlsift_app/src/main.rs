//! sqlsift - key search for SQLCipher-style encrypted databases.

use anyhow::{Context, Result};
use clap::Parser;
use humansize::{format_size, BINARY};
use sqlsift::report::{report_path, write_report};
use sqlsift::search::{self, Analysis, SearchRun};
use sqlsift::{SearchConfig, SearchContext, SearchStatus, SqlCipherBackend};
use sqlsift_core::candidates::SeedValue;
use sqlsift_core::MarkerCatalog;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sqlsift")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Encrypted database file. It is only ever opened for reading.
    target: PathBuf,

    /// Key guess: hex:<digits>, base64:<text>, raw:<text> or plain text.
    #[arg(short, long = "seed")]
    seeds: Vec<String>,

    /// File with one seed per line; blank lines and `#` comments are skipped.
    #[arg(long)]
    seed_list: Option<PathBuf>,

    /// Application file to mine for key material as well.
    #[arg(long)]
    aux: Vec<PathBuf>,

    /// JSON marker catalog extending the built-in markers.
    #[arg(long)]
    markers: Vec<PathBuf>,

    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long)]
    workers: Option<usize>,

    #[arg(long)]
    attempt_timeout_ms: Option<u64>,

    #[arg(long)]
    search_timeout_secs: Option<u64>,

    #[arg(long)]
    entropy_threshold: Option<f64>,

    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Write the decrypted database here when a key verifies.
    #[arg(long)]
    export: Option<PathBuf>,

    /// Stop after layout analysis and candidate extraction.
    #[arg(long, default_value_t = false)]
    analyze_only: bool,

    #[arg(long, default_value_t = false)]
    no_progress: bool,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = build_config(&args)?;
    let seeds = collect_seeds(&args)?;
    let mut catalog = MarkerCatalog::builtin();
    for path in &args.markers {
        catalog
            .extend_from_file(path)
            .with_context(|| format!("Failed to load markers from {}", path.display()))?;
    }

    let output_dir = config.output_dir.clone();
    let ctx = SearchContext::new(&args.target, config)
        .with_catalog(catalog)
        .with_seeds(seeds)
        .with_aux_files(args.aux.clone())
        .with_progress(!args.no_progress);

    let stop = ctx.stop_token().clone();
    ctrlc::set_handler(move || {
        stop.cancel();
    })
    .context("Failed to set Ctrl+C handler")?;

    if args.analyze_only {
        let analysis = search::analyze(&ctx)?;
        print_analysis(&args.target, &analysis);
        return Ok(());
    }

    let start_time = Instant::now();
    let backend = Arc::new(SqlCipherBackend::new());
    let run = search::run(&ctx, backend.clone())?;

    let path = report_path(&args.target, output_dir.as_deref());
    write_report(&run.report, &path)?;

    if let (Some(dest), Some(winner)) = (&args.export, &run.report.winning_attempt) {
        let damaged = backend
            .export(&args.target, &winner.candidate, &winner.config, dest)
            .with_context(|| format!("Failed to export to {}", dest.display()))?;
        if damaged > 0 {
            tracing::warn!(damaged, "exported copy has pages that did not decrypt");
        }
    }

    print_summary(&run, &path, start_time.elapsed().as_secs_f64());
    Ok(())
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_config(args: &Args) -> Result<SearchConfig> {
    let mut config = match &args.config {
        Some(path) => SearchConfig::load(path)?,
        None => SearchConfig::default(),
    };
    if let Some(workers) = args.workers {
        config.harness.workers = workers;
    }
    if let Some(ms) = args.attempt_timeout_ms {
        config.harness.attempt_timeout_ms = ms;
    }
    if let Some(secs) = args.search_timeout_secs {
        config.harness.search_timeout_secs = Some(secs);
    }
    if let Some(threshold) = args.entropy_threshold {
        config.entropy.threshold = threshold;
    }
    if let Some(dir) = &args.output_dir {
        config.output_dir = Some(dir.clone());
    }
    config.validate()?;
    Ok(config)
}

fn collect_seeds(args: &Args) -> Result<Vec<SeedValue>> {
    let mut seeds = Vec::new();
    for raw in &args.seeds {
        seeds.push(SeedValue::parse(raw).with_context(|| format!("Invalid seed {raw:?}"))?);
    }
    if let Some(path) = &args.seed_list {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read seed list {}", path.display()))?;
        for (line_no, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            seeds.push(
                SeedValue::parse(line)
                    .with_context(|| format!("{}:{}: invalid seed", path.display(), line_no + 1))?,
            );
        }
    }
    Ok(seeds)
}

fn print_analysis(target: &Path, analysis: &Analysis) {
    println!("\n╔════════════════════════════════════════╗");
    println!("║         === Analysis Finished ===      ║");
    println!("╠════════════════════════════════════════╣");
    println!(
        "║ Target Size:        {:>18} ║",
        format_size(analysis.target_len, BINARY)
    );
    println!("║ Plaintext Header:   {:>18} ║", analysis.plaintext);
    println!(
        "║ Known Profile:      {:>18} ║",
        analysis.profile.map_or("none", |p| p.name)
    );
    println!(
        "║ Detected Page Size: {:>18} ║",
        analysis
            .detected_page_size()
            .map_or_else(|| "unknown".to_string(), |s| s.to_string())
    );
    println!(
        "║ Footer Pages:       {:>18} ║",
        analysis.layout.footer_pages()
    );
    println!("║ Sidecars:           {:>18} ║", analysis.sidecars.len());
    println!("║ Candidate Keys:     {:>18} ║", analysis.candidates.len());
    println!("║ Configurations:     {:>18} ║", analysis.matrix.len());
    println!("╚════════════════════════════════════════╝");
    println!("Target: {}", target.display());
    for candidate in analysis.candidates.by_confidence().iter().take(10) {
        println!("  {:.3}  {}", candidate.confidence(), candidate.label());
    }
}

fn print_summary(run: &SearchRun, report: &Path, elapsed_secs: f64) {
    let r = &run.report;
    println!("\n╔════════════════════════════════════════╗");
    match r.status {
        SearchStatus::Success => println!("║          === Key Verified ===          ║"),
        SearchStatus::Exhausted => println!("║       === Search Exhausted ===         ║"),
        SearchStatus::Cancelled => println!("║       === Search Cancelled ===         ║"),
        SearchStatus::Unencrypted => println!("║       === Target Unencrypted ===       ║"),
    }
    println!("╠════════════════════════════════════════╣");
    println!(
        "║ Elapsed Time:       {:>18} ║",
        format!("{elapsed_secs:.1}s")
    );
    println!(
        "║ Target Size:        {:>18} ║",
        format_size(r.target_len, BINARY)
    );
    println!("║ Candidate Keys:     {:>18} ║", r.total_candidates);
    println!("║ Configurations:     {:>18} ║", r.total_configs);
    println!("║ Attempts Executed:  {:>18} ║", r.attempts_executed);
    if let Some(summary) = &run.harness {
        println!("║ Attempts Scheduled: {:>18} ║", summary.scheduled);
    }
    for (outcome, count) in &r.outcome_counts {
        println!("║ {:<19} {:>18} ║", format!("{outcome}:"), count);
    }
    println!("╚════════════════════════════════════════╝");

    if let Some(winner) = &r.winning_attempt {
        println!("Key:    {}", winner.candidate.label());
        println!("Config: {}", winner.config);
        println!("Tables: {}", r.tables.join(", "));
    }
    println!("Report: {}", report.display());
}
