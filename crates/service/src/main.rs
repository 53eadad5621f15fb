use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use extract::ExtractionPolicy;
use service::maintenance::purge_older_than;
use service::{AppConfig, CacheStore, Metrics, ParseService};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing_subscriber::EnvFilter;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

#[derive(Parser)]
#[command(
    name = "docparse",
    about = "Structured entity extraction from PDF and Word documents, with a persistent cache",
    version
)]
struct Cli {
    /// JSON config file (defaults apply when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a document and print the entity bundle
    Parse {
        path: PathBuf,
        /// Schema version (latest registered when omitted)
        #[arg(long)]
        schema_version: Option<u32>,
        /// Skip the understanding service
        #[arg(long)]
        heuristic_only: bool,
        /// Print plain-text context relevant to this request instead of JSON
        #[arg(long)]
        context: Option<String>,
        #[arg(long, default_value_t = 4000)]
        max_context_chars: usize,
    },
    /// Show cache usage
    Stats,
    /// Delete cache files older than the given age
    Purge {
        #[arg(long)]
        older_than_days: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let mut config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Parse {
            path,
            schema_version,
            heuristic_only,
            context,
            max_context_chars,
        } => {
            if heuristic_only {
                config.policy = ExtractionPolicy::HeuristicOnly;
            }
            run_parse(&config, &path, schema_version, context.as_deref(), max_context_chars).await
        }
        Commands::Stats => run_stats(&config).await,
        Commands::Purge { older_than_days } => run_purge(&config, older_than_days),
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

async fn run_parse(
    config: &AppConfig,
    path: &std::path::Path,
    schema_version: Option<u32>,
    context: Option<&str>,
    max_context_chars: usize,
) -> Result<()> {
    let metrics = Metrics::new();
    let cache = Arc::new(CacheStore::open(config.cache.clone(), metrics.clone()).context("Failed to open cache")?);
    let service = ParseService::from_config(config, cache.clone());

    let version = match schema_version {
        Some(v) => v,
        None => service
            .schemas()
            .latest()
            .map(|s| s.version)
            .context("No schema registered")?,
    };
    let outcome = service
        .parse(path, version)
        .await
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    match context {
        Some(query) => {
            let schema = service
                .schemas()
                .get(version)
                .context("Schema disappeared from registry")?;
            println!(
                "{}",
                outcome.bundle.relevant_context(&schema, query, max_context_chars)
            );
        }
        None => println!("{}", serde_json::to_string_pretty(&outcome)?),
    }

    cache.close();
    tracing::debug!(metrics = ?metrics.snapshot(), "Run metrics");
    Ok(())
}

async fn run_stats(config: &AppConfig) -> Result<()> {
    let cache = CacheStore::open(config.cache.clone(), Metrics::new()).context("Failed to open cache")?;
    let stats = cache.stats().await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    cache.close();
    Ok(())
}

fn run_purge(config: &AppConfig, older_than_days: u64) -> Result<()> {
    let disk = service::persist::DiskTier::open(&config.cache.dir)
        .with_context(|| format!("Failed to open cache dir {}", config.cache.dir.display()))?;
    let max_age = purge_age(older_than_days)?;
    let report = purge_older_than(&disk, max_age, SystemTime::now())?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn purge_age(older_than_days: u64) -> Result<Duration> {
    older_than_days
        .checked_mul(SECS_PER_DAY)
        .map(Duration::from_secs)
        .with_context(|| format!("--older-than-days {older_than_days} is too large"))
}
