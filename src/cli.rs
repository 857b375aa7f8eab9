//! CLI commands for the hatchery scraper.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::scraper::{Crawler, ImagePipeline};
use crate::types::{BreedRecord, CrawlOutcome, RunSummary};

#[derive(Parser)]
#[command(name = "hatch-scraper")]
#[command(version, about = "Chicken breed catalog scraper and image collector", long_about = None)]
pub struct Cli {
    /// Config file (defaults to ./hatcheries.{toml,yaml,json} when present)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List category links discovered on a site
    Categories {
        /// Configured site name
        site: String,
    },

    /// List deduplicated product references for a site
    Products {
        /// Configured site name
        site: String,

        /// Restrict to one category URL
        #[arg(long)]
        category: Option<String>,
    },

    /// Crawl sites into breed records
    Crawl {
        /// Site to crawl; all configured sites when omitted
        #[arg(short, long)]
        site: Option<String>,

        /// Where to write the records JSON
        #[arg(short, long, default_value = "records.json")]
        output: PathBuf,
    },

    /// Download images for previously crawled records
    Images {
        /// Records JSON produced by `crawl`
        #[arg(value_name = "RECORDS")]
        records: PathBuf,

        /// Override the configured sink directory
        #[arg(long)]
        sink: Option<String>,
    },
}

/// List a site's categories as JSON on stdout
pub async fn run_categories(config_path: Option<String>, site_name: String) -> anyhow::Result<()> {
    let config = AppConfig::load(config_path.as_deref())?;
    let site = config
        .site(&site_name)
        .with_context(|| format!("no configured site named '{}'", site_name))?;

    let crawler = Crawler::new(site.clone())?;
    let categories = crawler.list_categories().await?;
    println!("{}", serde_json::to_string_pretty(&categories)?);
    Ok(())
}

/// List a site's products (one category or all), deduplicated
pub async fn run_products(
    config_path: Option<String>,
    site_name: String,
    category_url: Option<String>,
) -> anyhow::Result<()> {
    let config = AppConfig::load(config_path.as_deref())?;
    let site = config
        .site(&site_name)
        .with_context(|| format!("no configured site named '{}'", site_name))?;

    let crawler = Crawler::new(site.clone())?;
    let categories = match category_url {
        Some(url) => vec![crate::types::CategoryLink {
            name: site_name.clone(),
            url,
        }],
        None => crawler.list_categories().await?,
    };

    let dedup = crate::scraper::crawler::DedupSet::new();
    let mut products = Vec::new();
    for category in &categories {
        match crawler.list_products(category).await {
            Ok(refs) => {
                for product in refs {
                    if dedup.insert(&product.url) {
                        products.push(product);
                    }
                }
            }
            Err(e) => warn!("category '{}' failed: {}", category.url, e),
        }
    }

    println!("{}", serde_json::to_string_pretty(&products)?);
    Ok(())
}

/// Crawl one or all configured sites and write records to disk
pub async fn run_crawl(
    config_path: Option<String>,
    site_name: Option<String>,
    output: PathBuf,
) -> anyhow::Result<()> {
    let config = AppConfig::load(config_path.as_deref())?;

    let sites: Vec<_> = match &site_name {
        Some(name) => vec![config
            .site(name)
            .with_context(|| format!("no configured site named '{}'", name))?
            .clone()],
        None => config.sites.clone(),
    };
    if sites.is_empty() {
        anyhow::bail!("no sites configured; nothing to crawl");
    }

    // Ctrl-C stops issuing new fetches; in-flight work drains under
    // the configured grace period
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("cancellation requested; draining in-flight fetches");
            signal_cancel.cancel();
        }
    });
    let grace = Duration::from_secs(config.crawl.cancel_grace_secs);

    let mut records: Vec<BreedRecord> = Vec::new();
    let mut totals = RunSummary::default();
    for site in sites {
        let name = site.name.clone();
        info!("crawling {}", name);
        let crawler = Arc::new(Crawler::new(site)?);
        let CrawlOutcome { records: found, summary } =
            crawler.crawl(cancel.clone(), grace).await;
        info!(
            "{}: {} records, {} failed, {} categories failed",
            name, summary.records_produced, summary.products_failed, summary.categories_failed
        );
        records.extend(found);
        merge_summary(&mut totals, summary);
        if cancel.is_cancelled() {
            break;
        }
    }

    tokio::fs::write(&output, serde_json::to_vec_pretty(&records)?)
        .await
        .with_context(|| format!("writing {}", output.display()))?;

    info!(
        "run complete: {} records written to {} ({} products failed, {} categories failed)",
        records.len(),
        output.display(),
        totals.products_failed,
        totals.categories_failed
    );
    for skip in &totals.skipped {
        info!("skipped {}: {}", skip.url, skip.reason);
    }
    Ok(())
}

/// Feed saved records through the image pipeline
pub async fn run_images(
    config_path: Option<String>,
    records_path: PathBuf,
    sink: Option<String>,
) -> anyhow::Result<()> {
    let mut config = AppConfig::load(config_path.as_deref())?;
    if let Some(sink) = sink {
        config.images.sink_dir = sink;
    }

    let raw = tokio::fs::read_to_string(&records_path)
        .await
        .with_context(|| format!("reading {}", records_path.display()))?;
    let records: Vec<BreedRecord> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing {}", records_path.display()))?;

    let user_agent = config
        .sites
        .first()
        .map(|s| s.user_agent.clone())
        .unwrap_or_else(|| "hatch-scraper/0.3".to_string());
    let pipeline = ImagePipeline::new(&config.images, &user_agent)?;

    let mut valid = 0usize;
    let mut failed = 0usize;
    for record in &records {
        let assets = pipeline.download_images(record).await;
        valid += assets.iter().filter(|a| a.valid).count();
        failed += assets.iter().filter(|a| !a.valid).count();
    }
    info!(
        "image pipeline complete: {} valid, {} failed across {} breeds",
        valid,
        failed,
        records.len()
    );
    Ok(())
}

fn merge_summary(into: &mut RunSummary, from: RunSummary) {
    into.categories_visited += from.categories_visited;
    into.categories_failed += from.categories_failed;
    into.products_discovered += from.products_discovered;
    into.records_produced += from.records_produced;
    into.products_failed += from.products_failed;
    into.skipped.extend(from.skipped);
}
