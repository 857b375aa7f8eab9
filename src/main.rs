//! Hatchery catalog scraper CLI.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hatch_scraper::cli::{self, Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hatch_scraper=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Categories { site } => cli::run_categories(cli.config, site).await,
        Commands::Products { site, category } => {
            cli::run_products(cli.config, site, category).await
        }
        Commands::Crawl { site, output } => cli::run_crawl(cli.config, site, output).await,
        Commands::Images { records, sink } => cli::run_images(cli.config, records, sink).await,
    }
}
