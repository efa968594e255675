//! # BOOM Walker
//!
//! Command-line driver: walks the configured species input and spools one task
//! graph per taxon that needs computing.

use anyhow::{Context, Result};
use boom_walker::catalog::{Catalog, InMemoryCatalog, PgCatalog};
use boom_walker::config::{ConfigManager, WalkerConfig};
use boom_walker::execution::SpoolDirectoryEngine;
use boom_walker::logging::init_structured_logging;
use boom_walker::orchestration::SpeciesWalker;
use boom_walker::taxonomy::{StaticTaxonomyResolver, TaxonomyResolver};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "boom-walker")]
#[command(about = "Walk species occurrence data and submit per-taxon task graphs")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a walk until the input is exhausted or interrupted
    Walk {
        /// Walker configuration file (TOML)
        #[arg(short, long, env = "BOOM_WALKER_CONFIG")]
        config: PathBuf,

        /// Environment overlay to merge (defaults to BOOM_ENV)
        #[arg(short, long)]
        environment: Option<String>,

        /// Use a process-local catalog instead of PostgreSQL
        #[arg(long)]
        in_memory: bool,

        /// Stop after this many ticks
        #[arg(long)]
        max_ticks: Option<usize>,
    },

    /// Load and validate a configuration file without walking
    Validate {
        #[arg(short, long)]
        config: PathBuf,

        #[arg(short, long)]
        environment: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_structured_logging();

    let outcome = match cli.command {
        Commands::Walk {
            config,
            environment,
            in_memory,
            max_ticks,
        } => run_walk(config, environment, in_memory, max_ticks).await,
        Commands::Validate {
            config,
            environment,
        } => validate(config, environment),
    };

    if let Err(e) = outcome {
        error!("❌ {e:#}");
        eprintln!("boom-walker: {e:#}");
        process::exit(1);
    }
}

fn validate(path: PathBuf, environment: Option<String>) -> Result<()> {
    let manager = ConfigManager::load_from_file(&path, environment.as_deref())
        .with_context(|| format!("loading {}", path.display()))?;
    println!("✅ {} is valid for environment '{}'", path.display(), manager.environment());
    println!("{}", serde_json::to_string_pretty(&manager.debug_config())?);
    Ok(())
}

async fn open_catalog(config: &WalkerConfig, in_memory: bool) -> Result<Arc<dyn Catalog>> {
    if in_memory {
        let catalog = InMemoryCatalog::new();
        if let Some(name) = &config.taxonomy.source_name {
            catalog.seed_taxon_source(name);
        }
        return Ok(Arc::new(catalog));
    }

    let url = config
        .database
        .url
        .as_deref()
        .context("database.url is required unless --in-memory is given")?;
    let catalog = PgCatalog::connect(
        url,
        config.database.max_connections,
        Duration::from_secs(config.database.acquire_timeout_seconds),
    )
    .await?;
    catalog.migrate().await?;
    if let Some(name) = &config.taxonomy.source_name {
        catalog.register_taxon_source(name, None).await?;
    }
    Ok(Arc::new(catalog))
}

async fn load_taxonomy(config: &WalkerConfig) -> Result<Option<Arc<dyn TaxonomyResolver>>> {
    let (Some(name), Some(dump)) = (&config.taxonomy.source_name, &config.taxonomy.dump_path)
    else {
        return Ok(None);
    };
    let contents = tokio::fs::read_to_string(dump)
        .await
        .with_context(|| format!("reading taxonomy dump {}", dump.display()))?;
    let resolver = StaticTaxonomyResolver::from_tsv(name.clone(), &contents);
    info!(source = %name, records = resolver.len(), "Loaded taxonomy dump");
    let resolver: Arc<dyn TaxonomyResolver> = Arc::new(resolver);
    Ok(Some(resolver))
}

async fn run_walk(
    path: PathBuf,
    environment: Option<String>,
    in_memory: bool,
    max_ticks: Option<usize>,
) -> Result<()> {
    let manager = ConfigManager::load_from_file(&path, environment.as_deref())
        .with_context(|| format!("loading {}", path.display()))?;
    let config = manager.config().clone();
    let descriptor = config.datasource.clone();

    let catalog = open_catalog(&config, in_memory).await?;
    let taxonomy = load_taxonomy(&config).await?;
    let engine = Arc::new(SpoolDirectoryEngine::new(&config.storage.spool_dir));

    let mut walker = SpeciesWalker::new(config, catalog, taxonomy, engine).await?;
    let stop = walker.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current taxon");
            stop.stop();
        }
    });

    let mut ticks = 0usize;
    let mut graphs = 0usize;
    loop {
        let summary = walker.start_walk(&descriptor).await?;
        ticks += 1;
        graphs += summary.graphs_submitted;
        info!(
            tick = ticks,
            taxa_seen = summary.taxa_seen,
            taxa_skipped = summary.taxa_skipped,
            graphs_submitted = summary.graphs_submitted,
            position = summary.position,
            "Tick complete"
        );

        if summary.finished || walker.state().is_terminal() {
            break;
        }
        if max_ticks.is_some_and(|max| ticks >= max) {
            info!(ticks, "Tick limit reached");
            break;
        }
    }

    println!("boom-walker: {graphs} graphs submitted over {ticks} ticks");
    Ok(())
}
