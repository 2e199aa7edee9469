use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod aggregate;
mod cohort;
mod config;
mod error;
mod ingest;
mod ledger;
mod models;
mod output;
mod period;
mod pipeline;
mod report;
mod snapshot;

use config::Settings;
use models::Degree;

#[derive(Parser)]
#[command(name = "cohort-kpi")]
#[command(about = "Longitudinal enrollment, retention and graduation KPIs from registry exports", long_about = None)]
struct Cli {
    /// JSON file overriding the built-in institution settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute the aggregate, graduate and non-completer tables
    Aggregate {
        /// Directory of per-sub-period exports named <period><sub>.csv
        #[arg(long)]
        input: PathBuf,
        #[arg(long, default_value = "out")]
        out: PathBuf,
    },
    /// Generate a markdown KPI summary
    Report {
        #[arg(long)]
        input: PathBuf,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Show the period sequence and each degree's lookback period
    Sequence,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("COHORT_KPI_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn compute(settings: &Arc<Settings>, input: &Path) -> anyhow::Result<pipeline::KpiRun> {
    let (registry, load) = ingest::load_directory(Arc::clone(settings), input)
        .await
        .with_context(|| format!("failed to load exports from {}", input.display()))?;
    let run = pipeline::run(settings, &registry, load)?;
    Ok(run)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let settings = Arc::new(Settings::load(cli.config.as_deref())?);

    match cli.command {
        Commands::Aggregate { input, out } => {
            let run = compute(&settings, &input).await?;
            let written = output::write_all(&settings, &run, &out)?;
            println!(
                "{} aggregate rows, {} graduates, {} non-completers (run {}).",
                run.aggregates.len(),
                run.graduates.len(),
                run.non_completers.len(),
                run.run_id
            );
            for path in written {
                println!("- {}", path.display());
            }
        }
        Commands::Report { input, out } => {
            let run = compute(&settings, &input).await?;
            let report = report::build_report(&settings, &run, chrono::Utc::now());
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        Commands::Sequence => {
            let sequence = settings.period_sequence()?;
            for period in sequence.members() {
                let previous = sequence
                    .previous(*period)?
                    .map(|p| settings.period_label(p))
                    .unwrap_or_else(|| "-".to_string());
                let mut lookbacks = Vec::new();
                for degree in Degree::ALL {
                    let n = settings.lookback(Some(degree));
                    let target = sequence
                        .n_before(*period, n)?
                        .map(|p| settings.period_label(p))
                        .unwrap_or_else(|| "-".to_string());
                    lookbacks.push(format!("{degree:?} {n} -> {target}"));
                }
                println!(
                    "{} (previous {}): {}",
                    settings.period_label(*period),
                    previous,
                    lookbacks.join(", ")
                );
            }
        }
    }

    Ok(())
}
