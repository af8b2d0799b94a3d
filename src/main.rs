//! layercheck CLI - capture and compare layer snapshots across backends

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use layercheck::snapshot::{list_reference_artifacts, LayerDictionary};
use layercheck::{
    capture, Backend, CaptureOptions, CheckConfig, ComparisonEngine, ComparisonSummary, ModelConfig,
    ReportLogger, SequentialNet, VERSION,
};

/// layercheck - layer-by-layer numerical equivalence between two backends
#[derive(Parser, Debug)]
#[command(name = "layercheck")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// YAML file with directory, epsilon and reporting settings
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by the comparing run modes
#[derive(clap::Args, Debug)]
struct CompareArgs {
    /// Directory holding the reference capture
    #[arg(long)]
    collect_dir: Option<PathBuf>,

    /// Directory holding the target capture and comparison output
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Relative-difference threshold
    #[arg(short, long)]
    epsilon: Option<f64>,

    /// Do not write OUT diff record files
    #[arg(long)]
    no_diffs: bool,

    /// Comparison worker threads (0 = one per core)
    #[arg(long)]
    threads: Option<usize>,

    /// Exit with an error if any artifact mismatched or failed to load
    #[arg(long)]
    fail_on_mismatch: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Capture layer data on the chosen backend
    Collect {
        /// Path to the model definition
        #[arg(short, long)]
        model: Option<PathBuf>,

        /// Backend evaluating the layers (cpu or candle)
        #[arg(short, long, default_value = "cpu")]
        backend: Backend,

        /// Output directory (defaults to the configured collect directory)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Write target-side (TAR) files instead of reference-side (REF)
        #[arg(long)]
        target: bool,
    },

    /// Capture the target backend against a reference capture and compare
    Compare {
        /// Path to the model definition
        #[arg(short, long)]
        model: Option<PathBuf>,

        /// Backend under test (cpu or candle)
        #[arg(short, long, default_value = "candle")]
        backend: Backend,

        /// Let divergence propagate instead of replaying reference tensors
        #[arg(long)]
        no_replay: bool,

        #[command(flatten)]
        compare: CompareArgs,
    },

    /// Compare existing reference and target captures
    Diff {
        #[command(flatten)]
        compare: CompareArgs,
    },

    /// Show the parsed model definition
    Info {
        /// Path to the model definition
        #[arg(short, long)]
        model: Option<PathBuf>,
    },
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

fn create_progress_bar(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    pb.set_message(msg.to_string());
    pb
}

fn load_model(model: Option<PathBuf>) -> Result<ModelConfig> {
    let path = model.context("Need a model definition! Pass --model <file>")?;
    ModelConfig::load(&path)
}

fn build_net(config: &ModelConfig, backend: Backend) -> Result<SequentialNet> {
    let pb = create_progress_bar(&format!("Building '{}' on {}...", config.name, backend));
    let net = SequentialNet::build(config, backend)?;
    pb.finish_with_message(format!("Built {} layers on {}", config.layers.len(), backend));
    Ok(net)
}

fn load_settings(path: Option<&PathBuf>) -> Result<CheckConfig> {
    match path {
        Some(path) => CheckConfig::load(path),
        None => Ok(CheckConfig::default()),
    }
}

fn apply_overrides(mut settings: CheckConfig, args: &CompareArgs) -> Result<CheckConfig> {
    if let Some(dir) = &args.collect_dir {
        settings.collect_dir = dir.clone();
    }
    if let Some(dir) = &args.output_dir {
        settings.compare_output_dir = dir.clone();
    }
    if let Some(epsilon) = args.epsilon {
        settings.epsilon = epsilon;
    }
    if let Some(threads) = args.threads {
        settings.threads = threads;
    }
    if args.no_diffs {
        settings.write_diffs = false;
    }
    settings.validate()?;
    Ok(settings)
}

fn ensure_dir(dir: &Path) {
    if let Err(e) = std::fs::create_dir_all(dir) {
        tracing::error!("Could not create directory {:?}: {}", dir, e);
    }
}

/// Report log at `path`, or console-only reporting when it cannot be created
fn open_report_log(path: &Path) -> ReportLogger {
    match ReportLogger::create(path) {
        Ok(logger) => {
            if let Some(path) = logger.path() {
                info!("Report log: {:?}", path);
            }
            logger
        }
        Err(e) => {
            tracing::warn!("{:#}; reporting to the console only", e);
            ReportLogger::from_writer(std::io::sink()).with_echo(true)
        }
    }
}

/// Info files for `compare`: the target run just captured, then the collect directory
fn compare_dictionary_candidates(settings: &CheckConfig, target_info: PathBuf) -> Vec<PathBuf> {
    vec![
        target_info,
        settings.collect_dir.join(Backend::Reference.info_file_name()),
        settings.collect_dir.join(Backend::Candle.info_file_name()),
    ]
}

/// Info files for `diff`: the comparison output directory first, then the collect directory
fn diff_dictionary_candidates(settings: &CheckConfig) -> Vec<PathBuf> {
    [&settings.compare_output_dir, &settings.collect_dir]
        .into_iter()
        .flat_map(|dir| [Backend::Candle, Backend::Reference].map(|b| dir.join(b.info_file_name())))
        .collect()
}

fn run_comparison(settings: &CheckConfig, logger: &ReportLogger, dictionary_candidates: &[PathBuf]) -> Result<ComparisonSummary> {
    let keys = list_reference_artifacts(&settings.collect_dir)?;
    let dictionary = LayerDictionary::load_first(dictionary_candidates);
    let engine = ComparisonEngine::from_config(settings);

    let pb = ProgressBar::new(keys.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap(),
    );
    pb.set_message("comparing");

    let compare = || engine.run_with_progress(&keys, &dictionary, logger, || pb.inc(1));
    let summary = if settings.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(settings.threads)
            .build()
            .context("Failed to build comparison thread pool")?
            .install(compare)
    } else {
        compare()
    };

    pb.finish_and_clear();
    Ok(summary)
}

fn finish(summary: ComparisonSummary, fail_on_mismatch: bool) -> Result<()> {
    info!("{}", summary);
    if fail_on_mismatch && !summary.all_passed() {
        anyhow::bail!(
            "{} of {} artifacts mismatched or failed to load",
            summary.total - summary.passed,
            summary.total
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    info!("layercheck v{}", VERSION);
    let settings = load_settings(cli.settings.as_ref())?;

    match cli.command {
        Commands::Collect { model, backend, output_dir, target } => {
            let config = load_model(model)?;
            let output_dir = output_dir.unwrap_or(settings.collect_dir);
            info!("Use {} backend, output {:?}", backend, output_dir);

            let mut net = build_net(&config, backend)?;
            let options = if target {
                CaptureOptions::target(&output_dir, backend.info_file_name())
            } else {
                CaptureOptions::reference(&output_dir, backend.info_file_name())
            };

            ensure_dir(&output_dir);
            let logger = open_report_log(&output_dir.join(&settings.log_file));
            let summary = capture(&mut net, &options, &logger)?;
            info!("Captured '{}' on {}, final output: {:?}", net.name(), net.backend(), net.final_output().data());
            if summary.failed > 0 {
                tracing::warn!("{} snapshot files could not be written", summary.failed);
            }
            Ok(())
        }

        Commands::Compare { model, backend, no_replay, compare } => {
            let config = load_model(model)?;
            let settings = apply_overrides(settings, &compare)?;
            let mut net = build_net(&config, backend)?;

            let mut options = CaptureOptions::target(&settings.compare_output_dir, backend.info_file_name());
            if !no_replay {
                options = options.with_replay(&settings.collect_dir);
            }

            ensure_dir(&settings.compare_output_dir);
            let logger = open_report_log(&settings.log_path());
            let captured = capture(&mut net, &options, &logger)?;
            if captured.injection_failures > 0 {
                tracing::warn!("{} reference tensors could not be replayed", captured.injection_failures);
            }

            let candidates = compare_dictionary_candidates(&settings, options.info_path());
            let summary = run_comparison(&settings, &logger, &candidates)?;
            finish(summary, compare.fail_on_mismatch)
        }

        Commands::Diff { compare } => {
            let settings = apply_overrides(settings, &compare)?;
            ensure_dir(&settings.compare_output_dir);
            let logger = open_report_log(&settings.log_path());

            let candidates = diff_dictionary_candidates(&settings);
            let summary = run_comparison(&settings, &logger, &candidates)?;
            finish(summary, compare.fail_on_mismatch)
        }

        Commands::Info { model } => {
            let config = load_model(model)?;
            println!("{:#?}", config);
            Ok(())
        }
    }
}
