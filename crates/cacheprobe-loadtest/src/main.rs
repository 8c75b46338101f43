//! # Cacheprobe CLI
//!
//! Command-line interface for characterizing the decision cache of a
//! SubjectAccessReview service.
//!
//! ## Usage
//!
//! ```bash
//! # Warm the cache with 1000 entries
//! cacheprobe run cache-warmup --target https://guard.example:8443
//!
//! # Bursty traffic, results saved for later comparison
//! cacheprobe run burst-load --max-vus 300 --output burst.json
//!
//! # Show the cache keys a strategy produces
//! cacheprobe keys --strategy warmup --count 20
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cacheprobe_core::{IdentityPool, PayloadStrategy};
use cacheprobe_loadtest::compare::{load_summary, Comparison};
use cacheprobe_loadtest::*;

#[derive(Parser)]
#[command(name = "cacheprobe")]
#[command(author = "Cacheprobe Contributors")]
#[command(version)]
#[command(about = "Cache characterization harness for SubjectAccessReview services", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log line format
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KeyStrategy {
    Favoring,
    Defeating,
    Warmup,
    HighCardinality,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario
    Run {
        #[arg(value_enum)]
        scenario: ScenarioKind,

        #[command(flatten)]
        harness: HarnessArgs,

        /// Write the run summary as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Compare saved run summaries against a baseline
    Compare {
        /// Baseline summary
        baseline: PathBuf,

        /// Candidate summaries
        #[arg(required = true)]
        candidates: Vec<PathBuf>,
    },

    /// Print the cache keys a payload strategy generates
    Keys {
        #[arg(long, value_enum, default_value = "favoring")]
        strategy: KeyStrategy,

        /// Number of keys
        #[arg(short, long, default_value = "10")]
        count: u64,

        /// Number of synthetic identities
        #[arg(long, default_value = "100")]
        pool_size: usize,
    },
}

fn init_tracing(verbose: bool, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(fmt::layer()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    info!("Cacheprobe v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Run {
            scenario,
            harness,
            output,
        } => {
            let config = harness.into_config(scenario.default_pool_size());
            let passes = run(scenario, config, output).await?;
            if !passes {
                std::process::exit(1);
            }
        }
        Commands::Compare {
            baseline,
            candidates,
        } => compare(&baseline, &candidates)?,
        Commands::Keys {
            strategy,
            count,
            pool_size,
        } => print_keys(strategy, count, pool_size)?,
    }

    Ok(())
}

async fn run(scenario: ScenarioKind, config: HarnessConfig, output: Option<PathBuf>) -> Result<bool> {
    config.validate().context("Invalid configuration")?;

    let options = ClientOptions::from_config(&config)?;
    let client = HttpAuthzClient::new(&config.target_url, options)?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, stopping new requests");
                cancel.cancel();
            }
        });
    }

    let (summary, thresholds) =
        run_scenario(scenario, &config, Arc::new(client), cancel).await?;

    println!("{}", summary.digest());
    thresholds.print_report();

    if let Some(path) = output {
        let json = summary
            .to_json_pretty()
            .context("Failed to serialize run summary")?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Results saved to {}", path.display());
    }

    Ok(thresholds.passes)
}

fn compare(baseline: &Path, candidates: &[PathBuf]) -> Result<()> {
    let base = load_summary(baseline)?;
    println!("\nBaseline: {} ({})", baseline.display(), base.scenario);

    for path in candidates {
        let candidate = load_summary(path)?;
        if candidate.scenario != base.scenario {
            warn!(
                "{} ran {} but the baseline ran {}",
                path.display(),
                candidate.scenario,
                base.scenario
            );
        }
        let label = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        print!("{}", Comparison::new(label, &base, &candidate).render());
    }
    Ok(())
}

fn print_keys(strategy: KeyStrategy, count: u64, pool_size: usize) -> Result<()> {
    let pool = IdentityPool::build(pool_size)?;
    let strategy = match strategy {
        KeyStrategy::Favoring => PayloadStrategy::CacheFavoring { modulo: None },
        KeyStrategy::Defeating => PayloadStrategy::CacheDefeating,
        KeyStrategy::Warmup => PayloadStrategy::WarmupDiverse,
        KeyStrategy::HighCardinality => PayloadStrategy::HighCardinality,
    };

    for iteration in 0..count {
        let request = strategy.generate(&pool, 1, iteration);
        println!("{:>6}  {}", iteration, request.cache_key());
    }
    Ok(())
}
