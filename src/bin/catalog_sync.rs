use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use giftcard_catalog_sync::config::{SyncConfig, LOGGED_KEYS};
use giftcard_catalog_sync::database_ops::{catalog_counts, orphan_counts, Db};
use giftcard_catalog_sync::orchestrator;
use giftcard_catalog_sync::tracing::{init_tracing, DEFAULT_FILTER};
use giftcard_catalog_sync::util::env::{db_url, init_env, preflight_check};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "catalog_sync", version, about = "Gift-card catalog scraper and store-link reconciler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Crawl the catalog and reconcile products and stores into the database
    Sync {
        /// Reconcile against an in-memory catalog instead of the database
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        /// Also write the crawl result to this JSON file
        #[arg(long)]
        snapshot_out: Option<PathBuf>,
    },
    /// Crawl only and write the result to a JSON snapshot
    Scrape {
        #[arg(long)]
        output: PathBuf,
    },
    /// Reconcile a previously written snapshot
    SyncFile {
        #[arg(long)]
        input: PathBuf,
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Print catalog row counts
    Counts,
    /// Apply pending SQL migrations
    Migrate,
}

impl Commands {
    fn needs_database(&self) -> bool {
        match self {
            Commands::Sync { dry_run, .. } | Commands::SyncFile { dry_run, .. } => !dry_run,
            Commands::Scrape { .. } => false,
            Commands::Counts | Commands::Migrate => true,
        }
    }
}

async fn connect(cfg: &SyncConfig) -> Result<Db> {
    let url = db_url()?;
    Db::connect(&url, cfg.max_connections).await
}

#[tokio::main]
async fn main() -> Result<()> {
    init_env();
    init_tracing(DEFAULT_FILTER)?;
    let cli = Cli::parse();

    let required: &[&str] = if cli.command.needs_database() {
        &["DATABASE_URL|DB_URL|DB_HOST"]
    } else {
        &[]
    };
    preflight_check("catalog_sync", required, LOGGED_KEYS)?;
    let cfg = SyncConfig::from_env().context("loading configuration")?;

    match cli.command {
        Commands::Sync { dry_run, snapshot_out } => {
            let db = if dry_run { None } else { Some(connect(&cfg).await?) };
            orchestrator::run_catalog_sync(&cfg, db.as_ref(), snapshot_out.as_deref()).await?;
        }
        Commands::Scrape { output } => {
            let snapshot = orchestrator::scrape(&cfg).await?;
            snapshot.write_to(&output)?;
            info!(path = %output.display(), products = snapshot.products.len(), "wrote snapshot");
        }
        Commands::SyncFile { input, dry_run } => {
            let snapshot = orchestrator::load_snapshot(&cfg, &input)?;
            if dry_run {
                orchestrator::dry_run(&cfg, &snapshot.products).await?;
            } else {
                let db = connect(&cfg).await?;
                orchestrator::sync_to_db(&cfg, &db, &snapshot.products).await?;
            }
        }
        Commands::Counts => {
            let db = connect(&cfg).await?;
            let counts = catalog_counts(&db).await?;
            let orphans = orphan_counts(&db).await?;
            println!("{counts}");
            println!("products without stores: {}", orphans.products_without_stores);
            println!("stores without products: {}", orphans.stores_without_products);
        }
        Commands::Migrate => {
            let db = connect(&cfg).await?;
            let ran = db.run_migrations().await?;
            println!("applied {ran} migration(s)");
        }
    }
    Ok(())
}
