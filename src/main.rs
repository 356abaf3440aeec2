//! Listing Harvester main entry point
//!
//! This is the command-line interface for the listing harvester.

use anyhow::Context;
use clap::Parser;
use listing_harvester::config::{load_config_with_hash, Config};
use listing_harvester::fetch::HttpSessionFactory;
use listing_harvester::output::print_report;
use listing_harvester::storage::open_store;
use listing_harvester::{Catalog, HarvestError, Harvester, Store};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Listing Harvester: crawl, extract and persist paginated listings
///
/// Crawls every configured target, extracts one record per listing item with
/// the target's field rules, and upserts the records into SQLite. Unchanged
/// records are left untouched.
#[derive(Parser, Debug)]
#[command(name = "listing-harvester")]
#[command(version)]
#[command(about = "Concurrent listing harvester", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and list the targets without crawling
    #[arg(long)]
    dry_run: bool,

    /// Only harvest the given target (repeatable)
    #[arg(long = "target", value_name = "KEY")]
    targets: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let mut catalog = Catalog::from_config(&config).context("Failed to build target catalog")?;
    catalog.select_targets(&cli.targets)?;

    if cli.dry_run {
        handle_dry_run(&config, &catalog);
        Ok(())
    } else {
        handle_harvest(config, catalog, &config_hash).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("listing_harvester=info,warn"),
            1 => EnvFilter::new("listing_harvester=debug,info"),
            2 => EnvFilter::new("listing_harvester=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and shows what would be harvested
fn handle_dry_run(config: &Config, catalog: &Catalog) {
    println!("=== Listing Harvester Dry Run ===\n");

    println!("Pool:");
    println!("  Crawl workers: {}", config.pool.crawl_workers);
    println!("  Parse workers: {}", config.pool.parse_workers);
    println!("  Queue capacity: {}", config.pool.queue_capacity);

    println!("\nRetry:");
    println!("  Max attempts: {}", config.retry.max_attempts);
    println!(
        "  Backoff: {}ms x{} (max {}ms)",
        config.retry.base_delay_ms, config.retry.backoff_factor, config.retry.max_delay_ms
    );
    println!("  Retry on empty: {}", config.retry.retry_on_empty);

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);

    println!("\nSchemas ({}):", catalog.schemas().len());
    for schema in catalog.schemas() {
        println!(
            "  - {} (key: {}, {} fields)",
            schema.id,
            schema.natural_key,
            schema.fields.len()
        );
    }

    println!("\nTargets ({}):", catalog.targets().len());
    for target in catalog.targets() {
        println!(
            "  - {} -> {} ({} rules)",
            target.key,
            target.schema_id,
            target.rules.len()
        );
        println!("    * {}", target.url);
    }

    println!("\n✓ Configuration is valid");
    println!("✓ Would harvest {} targets", catalog.targets().len());
}

/// Handles the main harvest operation
async fn handle_harvest(config: Config, catalog: Catalog, config_hash: &str) -> anyhow::Result<()> {
    let store = open_store(Path::new(&config.output.database_path)).with_context(|| {
        format!("Failed to open database {}", config.output.database_path)
    })?;
    let store: Arc<dyn Store> = Arc::new(store);
    let factory = Arc::new(HttpSessionFactory::new(&config.fetch));

    let harvester = Harvester::new(&config, catalog, Arc::clone(&store), factory);
    let report = match harvester.run().await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!("Harvest failed: {}", e);
            return Err(e.into());
        }
    };

    print_report(&report);

    let run_id = store.record_run(&report.to_run_record(config_hash))?;
    tracing::debug!("Recorded run {}", run_id);

    if report.all_failed() {
        return Err(HarvestError::AllTargetsFailed(report.targets_total).into());
    }

    Ok(())
}
