//! bloatfuzz entry point.
//!
//! Wires the pieces together: CLI parsing, configuration resolution,
//! compiler discovery, corpus loading, signal handling, and the search
//! controller with its checkpoint, analytics, and report sinks.

mod discovery;
mod signals;

use anyhow::{Context, Result};
use bloat_common::config::FuzzConfig;
use bloat_core::analytics::Analytics;
use bloat_core::checkpoint::CheckpointStore;
use bloat_core::corpus::load_corpus;
use bloat_core::oracle::Oracle;
use bloat_core::report::ReportWriter;
use bloat_core::search::{CancelToken, Controller};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// bloatfuzz command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "bloatfuzz",
    about = "Differential codegen-size fuzzer for C compilers",
    version,
    long_about = None
)]
struct Args {
    /// Current compiler to test (name or path).
    #[arg(long, default_value = "gcc")]
    compiler: String,

    /// Worker pool size (0 = all available cores).
    #[arg(long, short = 'j', default_value = "0")]
    jobs: usize,

    /// Stop after this many accepted regressions (overrides config file).
    #[arg(long, short = 't')]
    threshold: Option<usize>,

    /// Interestingness ratio threshold (overrides config file).
    #[arg(long, short = 'r')]
    ratio: Option<f64>,

    /// Seed corpus directory (overrides config file).
    #[arg(long, value_name = "DIR")]
    corpus: Option<PathBuf>,

    /// Output directory for reports, analytics, and triage files.
    #[arg(long, short = 'o', value_name = "DIR")]
    output: Option<PathBuf>,

    /// Optimization level (1-3).
    #[arg(long)]
    opt_level: Option<u8>,

    /// Resume from a checkpoint file.
    #[arg(long, value_name = "FILE")]
    resume: Option<PathBuf>,

    /// Path to a configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);
    info!(version = env!("CARGO_PKG_VERSION"), "starting bloatfuzz");

    let config = build_config(&args)?;
    info!(
        corpus = %config.corpus_dir.display(),
        output = %config.output_dir.display(),
        ratio = config.ratio_threshold,
        jobs = config.jobs,
        "configuration loaded"
    );

    let compilers =
        discovery::discover(&args.compiler).context("compiler discovery failed")?;
    info!(
        current = %compilers.current,
        family = %compilers.family,
        major = compilers.major,
        older = ?compilers.older,
        "compiler set resolved"
    );

    let templates = load_corpus(&config.corpus_dir, config.max_source_lines)
        .context("failed to load seed corpus")?;
    anyhow::ensure!(
        !templates.is_empty(),
        "no fuzzable seeds under {}",
        config.corpus_dir.display()
    );

    let cancel = CancelToken::new();
    signals::register(&cancel);

    let oracle = Oracle::new(&compilers.current, &compilers.older, &config)
        .context("failed to set up the compilation oracle")?;

    let checkpoint_path = args
        .resume
        .clone()
        .unwrap_or_else(|| config.output_dir.join("checkpoint.json"));
    let checkpoint = CheckpointStore::new(checkpoint_path);
    let resumed = if args.resume.is_some() {
        checkpoint.load().context("failed to load checkpoint")?
    } else {
        Vec::new()
    };

    let mut controller = Controller::new(Arc::new(oracle), config.clone(), cancel)
        .with_analytics(Analytics::new(&config.output_dir))
        .with_reporter(ReportWriter::new(
            config.output_dir.join("reports"),
            &compilers.current,
        ))
        .with_checkpoint(checkpoint)
        .with_resumed(resumed);

    let outcome = controller.run(templates);

    if outcome.cancelled {
        warn!("search cancelled, partial results kept");
    }
    for result in &outcome.accepted {
        if let Some(entry) = &result.max_ratio {
            info!(
                file = %result.source_path.display(),
                ratio = entry.ratio,
                against = %entry.compiler,
                "accepted regression"
            );
        }
    }
    info!(
        accepted = outcome.accepted.len(),
        rounds = outcome.rounds,
        "run complete"
    );
    Ok(())
}

/// Initialize logging with the specified log level.
fn init_logging(level: &str) {
    let filter = format!("bloat_cli={level},bloat_core={level},bloat_common={level}");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_target(true)
        .init();
}

/// Resolve the configuration and apply command-line overrides.
fn build_config(args: &Args) -> Result<FuzzConfig> {
    let mut config = load_config_file(args)?;
    if args.jobs > 0 {
        config.jobs = args.jobs;
    }
    if let Some(threshold) = args.threshold {
        config.accept_threshold = threshold;
    }
    if let Some(ratio) = args.ratio {
        config.ratio_threshold = ratio;
    }
    if let Some(corpus) = &args.corpus {
        config.corpus_dir = corpus.clone();
    }
    if let Some(output) = &args.output {
        config.output_dir = output.clone();
    }
    if let Some(level) = args.opt_level {
        config.opt_level = level;
    }
    if config.jobs == 0 {
        config.jobs = num_cpus::get();
    }
    config.validate()?;
    Ok(config)
}

/// Load the configuration file.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `BLOATFUZZ_CONFIG` environment variable
/// 3. `config/default.toml` (local development)
/// 4. Built-in defaults
fn load_config_file(args: &Args) -> Result<FuzzConfig> {
    if let Some(config_path) = &args.config {
        info!(?config_path, "loading config from command-line argument");
        return FuzzConfig::from_file(config_path)
            .with_context(|| format!("failed to load config from {}", config_path.display()));
    }

    if let Ok(env_path) = std::env::var("BLOATFUZZ_CONFIG") {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "loading config from BLOATFUZZ_CONFIG");
            return FuzzConfig::from_file(&config_path).with_context(|| {
                format!("failed to load config from BLOATFUZZ_CONFIG={env_path}")
            });
        }
        warn!(
            path = %env_path,
            "BLOATFUZZ_CONFIG set but file does not exist, checking other locations"
        );
    }

    let local_path = PathBuf::from("config/default.toml");
    if local_path.exists() {
        info!(?local_path, "loading config from local path");
        return FuzzConfig::from_file(&local_path)
            .with_context(|| format!("failed to load config from {}", local_path.display()));
    }

    info!("no config file found, using built-in defaults");
    Ok(FuzzConfig::default())
}
