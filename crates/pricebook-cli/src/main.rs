use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use pricebook_sync::{Backend, IngestConfig};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "pricebook")]
#[command(about = "Retailer price and discount catalog ingestion")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Directory holding the CSV exports (overrides PRICEBOOK_DATA_DIR).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Write a JSON and markdown run report under this directory.
    #[arg(long, global = true)]
    reports_dir: Option<PathBuf>,

    /// Storage backend: postgres or memory.
    #[arg(long, global = true)]
    backend: Option<Backend>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the gated ingestion pass (default).
    Ingest,
    /// Apply database migrations and exit.
    Migrate,
    /// Print catalog row counts.
    Counts,
}

impl Cli {
    fn apply(&self, config: &mut IngestConfig) {
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(dir) = &self.reports_dir {
            config.reports_dir = Some(dir.clone());
        }
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let mut config = IngestConfig::from_env()?;
    cli.apply(&mut config);

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match cli.command.unwrap_or(Commands::Ingest) {
        Commands::Ingest => {
            let catalog = pricebook_sync::connect_catalog(&config).await?;
            let report = pricebook_sync::run_ingestion_with_config(&config, catalog).await?;
            println!("{}", report.summary_line());
        }
        Commands::Migrate => {
            // connect_catalog migrates on connect for postgres.
            if config.backend == Backend::Memory {
                println!("memory backend has no schema to migrate");
            } else {
                pricebook_sync::connect_catalog(&config).await?;
                println!("migrations applied");
            }
        }
        Commands::Counts => {
            let catalog = pricebook_sync::connect_catalog(&config).await?;
            println!(
                "stores={} products={} price_entries={} discounts={}",
                catalog.count_stores().await?,
                catalog.count_products().await?,
                catalog.count_price_entries().await?,
                catalog.count_discounts().await?
            );
        }
    }

    Ok(())
}
