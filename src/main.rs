//! fermentwatch CLI
//!
//! ```bash
//! fermentwatch analyze --csv tank_7.csv --out report.json
//! fermentwatch profiles --out data/golden_profiles.json
//! fermentwatch validate --csv tank_7.csv
//! ```

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use fermentwatch::config::{self, EngineConfig};
use fermentwatch::ingest;
use fermentwatch::profiles::{GoldenProfileStore, ProfileSynthesis};
use fermentwatch::AnalysisCoordinator;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "fermentwatch")]
#[command(about = "Fermentation tank time-series analysis")]
#[command(version)]
struct CliArgs {
    /// Engine config TOML (default: $FERMENTWATCH_CONFIG, then ./fermentwatch.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Full run: map, validate, clean, label, detect; JSON report
    Analyze {
        /// Input CSV with a timestamp column
        #[arg(long)]
        csv: PathBuf,
        /// Write the report here instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Also write the cleaned frame as CSV
        #[arg(long)]
        cleaned_out: Option<PathBuf>,
    },

    /// Write the default golden profiles as JSON
    Profiles {
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Run the input validation rules only
    Validate {
        #[arg(long)]
        csv: PathBuf,
    },
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    // stdout carries reports, so logs go to stderr
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(p) => EngineConfig::load_from_file(p)
            .with_context(|| format!("Failed to load config {}", p.display())),
        None => Ok(EngineConfig::load()),
    }
}

fn write_json<T: Serialize>(value: &T, out: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize report")?;
    match out {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
            info!(path = %path.display(), "Report written");
        }
        None => {
            let mut stdout = io::stdout().lock();
            writeln!(stdout, "{json}").context("Failed to write to stdout")?;
        }
    }
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_logging(args.json_logs);

    let engine_config = load_config(args.config.as_deref())?;
    info!(run = %engine_config.run.name, primary = %engine_config.run.primary_channel, "fermentwatch starting");
    config::init(engine_config);
    let cfg = config::get();

    match args.command {
        Command::Analyze { csv, out, cleaned_out } => {
            let (frame, summary) =
                ingest::read_csv(&csv).with_context(|| format!("Failed to read {}", csv.display()))?;
            info!(rows = summary.rows, groups = summary.groups, "Input loaded");

            let mut coordinator = AnalysisCoordinator::new(cfg).context("Failed to prepare golden profiles")?;
            let report = coordinator.analyze(&frame);

            if let Some(path) = cleaned_out {
                ingest::write_csv_file(coordinator.cleaned(), &path)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                info!(path = %path.display(), rows = coordinator.cleaned().len(), "Cleaned frame written");
            }
            write_json(&report, out.as_deref())
        }

        Command::Profiles { out } => {
            let store = GoldenProfileStore::with_defaults(&ProfileSynthesis::from_config(cfg))
                .context("Failed to synthesize golden profiles")?;
            store
                .save(&out)
                .with_context(|| format!("Failed to write {}", out.display()))?;
            Ok(())
        }

        Command::Validate { csv } => {
            let (frame, _) =
                ingest::read_csv(&csv).with_context(|| format!("Failed to read {}", csv.display()))?;
            let mut coordinator = AnalysisCoordinator::with_profiles(cfg, GoldenProfileStore::new());
            let result = coordinator.validate(&frame);
            write_json(&result, None)?;
            if !result.passed {
                anyhow::bail!("{} validation rule(s) failed", result.errors.len());
            }
            Ok(())
        }
    }
}
