//! sp500 CLI — run the daily pipeline or drive its stages one at a time.
//!
//! Commands:
//! - `run` — fetch → publish → transform → load, exit status 1 on failure
//! - `universe` — print the normalized ticker universe
//! - `fetch` — fetch and stage the raw dataset, print its path
//! - `publish <RAW>` — copy a raw artifact to the remote store
//! - `transform <RAW>` — transform a raw artifact, print the new artifact's path
//! - `load <TRANSFORMED>` — bulk-load a transformed artifact
//! - `staging status` — list staged artifacts

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use sp500_core::load::{load, LoadMode};
use sp500_core::staging::{list_artifacts, run_stamp, StagingWriter};
use sp500_core::transform::transform;
use sp500_runner::{HandoffKey, Pipeline, PipelineConfig, RunContext, RunReport};

const DEFAULT_LOG_FILTER: &str = "sp500=info,sp500_core=info,sp500_runner=info";

#[derive(Parser)]
#[command(
    name = "sp500",
    about = "sp500 — daily S&P 500 price pipeline (fetch, stage, transform, load)"
)]
struct Cli {
    /// Path to a TOML config file. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Staging directory, overriding `[staging] data_dir`.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log line format (stderr). Filter with RUST_LOG.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Compact,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all four stages for today.
    Run {
        /// Print the run report as JSON on stdout.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Fetch and print the normalized ticker universe.
    Universe,
    /// Fetch the universe and daily bars, stage the raw artifact.
    Fetch,
    /// Copy a staged raw artifact to the remote store.
    Publish {
        /// Path of the raw artifact.
        raw: PathBuf,
    },
    /// Transform a staged raw artifact.
    Transform {
        /// Path of the raw artifact.
        raw: PathBuf,
    },
    /// Bulk-load a transformed artifact into the destination table.
    Load {
        /// Path of the transformed artifact.
        transformed: PathBuf,

        /// Override `[warehouse] mode`.
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,
    },
    /// Staging directory commands.
    Staging {
        #[command(subcommand)]
        action: StagingAction,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Append,
    Upsert,
}

impl From<ModeArg> for LoadMode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::Append => LoadMode::Append,
            ModeArg::Upsert => LoadMode::Upsert,
        }
    }
}

#[derive(Subcommand)]
enum StagingAction {
    /// List staged artifacts with size and modification time.
    Status,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    let config = load_config(cli.config.as_deref(), cli.data_dir)?;

    match cli.command {
        Commands::Run { json } => run_pipeline(&config, json),
        Commands::Universe => run_universe(&config),
        Commands::Fetch => run_fetch(&config),
        Commands::Publish { raw } => run_publish(&config, &raw),
        Commands::Transform { raw } => run_transform(&config, &raw),
        Commands::Load { transformed, mode } => run_load(&config, &transformed, mode),
        Commands::Staging {
            action: StagingAction::Status,
        } => run_staging_status(&config.staging.data_dir),
    }
}

fn init_logging(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn load_config(path: Option<&Path>, data_dir: Option<PathBuf>) -> Result<PipelineConfig> {
    let mut config = match path {
        Some(p) => PipelineConfig::from_file(p)
            .with_context(|| format!("loading config {}", p.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(dir) = data_dir {
        config.staging.data_dir = dir;
    }
    Ok(config)
}

fn now_context() -> RunContext {
    RunContext::new(chrono::Local::now().naive_local())
}

fn run_pipeline(config: &PipelineConfig, json: bool) -> Result<()> {
    let pipeline = Pipeline::from_config(config)?;
    let report = pipeline.run(chrono::Local::now().naive_local());

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }

    if !report.succeeded() {
        bail!(
            "run {} failed at {} stage: {}",
            report.run_stamp,
            report.failed_stage.as_deref().unwrap_or("unknown"),
            report.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn run_universe(config: &PipelineConfig) -> Result<()> {
    let source = config.universe_source();
    let universe = source.fetch_universe()?;
    for symbol in universe.symbols() {
        println!("{symbol}");
    }
    eprintln!("{} symbols from {}", universe.len(), source.name());
    Ok(())
}

fn run_fetch(config: &PipelineConfig) -> Result<()> {
    let pipeline = Pipeline::from_config(config)?;
    let (ctx, report) = pipeline.fetch_stage(&now_context())?;

    if !report.failures.is_empty() {
        eprintln!(
            "{} of {} symbols failed:",
            report.failures.len(),
            report.universe_size
        );
        for failure in &report.failures {
            eprintln!("  {}: {}", failure.symbol, failure.error);
        }
    }
    if let Some(raw) = ctx.handoff().get(HandoffKey::RawLocation) {
        println!("{raw}");
    }
    Ok(())
}

fn run_publish(config: &PipelineConfig, raw: &Path) -> Result<()> {
    let publisher = config.publisher()?;
    let remote = publisher.publish_remote(raw)?;
    println!("{remote}");
    Ok(())
}

fn run_transform(config: &PipelineConfig, raw: &Path) -> Result<()> {
    let stamp = run_stamp(chrono::Local::now().naive_local());
    let writer = StagingWriter::new(&config.staging.data_dir, stamp);
    let outcome = transform(raw, &writer)?;
    eprintln!(
        "{} rows, {} symbols, blake3 {}",
        outcome.location.rows, outcome.symbols, outcome.location.digest
    );
    println!("{}", outcome.location.path.display());
    Ok(())
}

fn run_load(config: &PipelineConfig, transformed: &Path, mode: Option<ModeArg>) -> Result<()> {
    let warehouse = config.warehouse();
    let mode = mode.map(LoadMode::from).unwrap_or(config.warehouse.mode);
    let rows = load(transformed, &warehouse, &config.warehouse.table, mode)?;
    println!(
        "{rows} rows loaded into {} ({})",
        config.warehouse.table,
        warehouse.path().display()
    );
    Ok(())
}

fn run_staging_status(data_dir: &Path) -> Result<()> {
    let artifacts = list_artifacts(data_dir)
        .with_context(|| format!("listing {}", data_dir.display()))?;

    if artifacts.is_empty() {
        println!("Staging is empty: {}", data_dir.display());
        return Ok(());
    }

    let total: u64 = artifacts.iter().map(|a| a.size).sum();
    println!("Staging: {}", data_dir.display());
    println!("Artifacts: {}", artifacts.len());
    println!("Total size: {}", format_size(total));
    println!();
    println!("{:<48} {:>10}  {:<19}", "Artifact", "Size", "Modified");
    println!("{}", "-".repeat(79));
    for a in &artifacts {
        let modified = a
            .modified
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("{:<48} {:>10}  {:<19}", a.name, format_size(a.size), modified);
    }
    Ok(())
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

fn print_summary(report: &RunReport) {
    println!();
    println!("=== Run {} ===", report.run_stamp);
    println!("State:          {}", report.state);
    println!(
        "Fetched:        {} of {} symbols",
        report.rows_fetched, report.universe_size
    );
    if !report.failed_symbols.is_empty() {
        println!("Failed symbols: {}", report.failed_symbols.join(", "));
    }
    println!("Loaded:         {} rows", report.rows_loaded);
    for (key, value) in report.handoff.iter() {
        println!("{:<16}{value}", format!("{key}:"));
    }
    if let Some(err) = &report.error {
        println!("Error:          {err}");
    }
}
