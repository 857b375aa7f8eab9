//! Catalog crawler: site → categories → products → breed records.
//!
//! Per-item failures are absorbed into the run summary; a single
//! unreachable page never aborts a run. The only state shared across
//! concurrent detail fetches is the deduplicated-URL set.

use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{CartFlowConfig, FieldChains, ListingConfig, RenderMode, SiteConfig};
use crate::scraper::{absolutize, normalize_url, selectors, tables, text};
use crate::scraper::browser::BrowserSession;
use crate::scraper::fetcher::Fetcher;
use crate::types::{
    BreedRecord, CategoryLink, CrawlOutcome, PriceEntry, ProductRef, RunSummary, Skipped,
};

/// Visited-URL set with atomic insert-if-absent; the one piece of
/// mutable state crossing fetch boundaries.
#[derive(Default)]
pub struct DedupSet {
    seen: Mutex<HashSet<String>>,
}

impl DedupSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the normalized URL was not seen before
    pub fn insert(&self, url: &str) -> bool {
        let key = normalize_url(url);
        self.seen.lock().unwrap().insert(key)
    }
}

fn parse_selectors(raw: &[String]) -> Vec<Selector> {
    raw.iter()
        .filter_map(|s| Selector::parse(s).ok())
        .collect()
}

fn element_text(el: ElementRef) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// Extract category links from a listing page
fn parse_category_links(html: &str, base_url: &str, listing: &ListingConfig) -> Vec<CategoryLink> {
    let document = Html::parse_document(html);
    let mut links = Vec::new();
    let mut seen = HashSet::new();

    for selector in parse_selectors(&listing.category_selectors) {
        for el in document.select(&selector) {
            let href = match el.value().attr("href") {
                Some(h) if !h.is_empty() => h,
                _ => continue,
            };
            let url = absolutize(base_url, href);
            if seen.insert(normalize_url(&url)) {
                links.push(CategoryLink {
                    name: element_text(el),
                    url,
                });
            }
        }
        if !links.is_empty() {
            break;
        }
    }
    links
}

/// Extract product references from a category page. Product cards are
/// tried selector by selector; the first selector that matches any
/// cards wins. Pages without recognizable cards fall back to scanning
/// product links document-wide.
fn parse_product_refs(
    html: &str,
    base_url: &str,
    listing: &ListingConfig,
    fields: &FieldChains,
) -> Vec<ProductRef> {
    let document = Html::parse_document(html);
    let link_selectors = parse_selectors(&listing.product_link_selectors);
    let mut refs = Vec::new();

    for selector in parse_selectors(&listing.product_card_selectors) {
        for card in document.select(&selector) {
            let Some(href) = card_href(card, &link_selectors) else {
                continue;
            };
            let url = absolutize(base_url, &href);
            let candidate_name = selectors::resolve(card, &url, &fields.name).unwrap_or_default();
            refs.push(ProductRef {
                candidate_name,
                url,
            });
        }
        if !refs.is_empty() {
            return refs;
        }
    }

    // No cards matched; fall back to bare product links
    for selector in &link_selectors {
        for el in document.select(selector) {
            let Some(href) = el.value().attr("href") else {
                continue;
            };
            if href.is_empty() {
                continue;
            }
            let url = absolutize(base_url, href);
            let name = element_text(el);
            let candidate_name = if selectors::is_usable(&name) {
                name
            } else {
                String::new()
            };
            refs.push(ProductRef {
                candidate_name,
                url,
            });
        }
        if !refs.is_empty() {
            break;
        }
    }
    refs
}

/// Find the explicit next-page link, if the site paginates statically
fn parse_next_page(html: &str, base_url: &str, listing: &ListingConfig) -> Option<String> {
    let selector = listing.next_page_selector.as_ref()?;
    let selector = Selector::parse(selector).ok()?;
    let document = Html::parse_document(html);
    document
        .select(&selector)
        .next()
        .and_then(|el| el.value().attr("href"))
        .map(|href| absolutize(base_url, href))
}

fn card_href(card: ElementRef, link_selectors: &[Selector]) -> Option<String> {
    if card.value().name() == "a" {
        if let Some(href) = card.value().attr("href") {
            return Some(href.to_string());
        }
    }
    for selector in link_selectors {
        if let Some(href) = card
            .select(selector)
            .filter_map(|el| el.value().attr("href"))
            .find(|h| !h.is_empty())
        {
            return Some(href.to_string());
        }
    }
    None
}

/// Build the canonical record from a detail page DOM
fn build_record(
    html: &str,
    site: &SiteConfig,
    product: &ProductRef,
    location: Option<String>,
) -> BreedRecord {
    let document = Html::parse_document(html);
    let root = document.root_element();
    let url = &product.url;

    let resolved = selectors::resolve(root, url, &site.fields.name);
    let candidate = resolved
        .as_deref()
        .or(if product.candidate_name.is_empty() {
            None
        } else {
            Some(product.candidate_name.as_str())
        });
    let name = text::resolve_breed_name(candidate, url);

    let description =
        selectors::resolve(root, url, &site.fields.description).unwrap_or_default();

    let mut prices = parse_first_table(root, &site.tables.pricing_table_selectors, |table| {
        tables::parse_pricing(table)
    });
    if prices.is_empty() {
        // No tier table; a lone listed price still gets recorded
        if let Some(price) = selectors::resolve(root, url, &site.fields.price) {
            let mut tiers = indexmap::IndexMap::new();
            tiers.insert("each".to_string(), price);
            prices.push(PriceEntry {
                sex: "All".to_string(),
                tiers,
            });
        }
    }

    let mut availability =
        parse_first_table(root, &site.tables.availability_table_selectors, |table| {
            tables::parse_availability_matrix(table, &site.tables)
        });
    if availability.is_empty() {
        availability =
            parse_first_table(root, &site.tables.availability_table_selectors, |table| {
                tables::parse_availability_cells(table, &site.tables)
            });
    }

    let images: Vec<String> = selectors::resolve_all(root, url, &site.fields.images)
        .into_iter()
        .map(|src| text::strip_size_limits(&absolutize(&site.base_url, &src)))
        .collect();

    BreedRecord {
        name,
        prices,
        availability,
        description,
        location,
        images,
        source_url: url.clone(),
    }
}

fn parse_first_table<T>(
    root: ElementRef,
    table_selectors: &[String],
    parse: impl Fn(ElementRef) -> Vec<T>,
) -> Vec<T> {
    for selector in parse_selectors(table_selectors) {
        if let Some(table) = root.select(&selector).next() {
            let parsed = parse(table);
            if !parsed.is_empty() {
                return parsed;
            }
        }
    }
    Vec::new()
}

/// Run product detail fetches concurrently under a worker limit,
/// honoring cancellation with a drain grace period. Results and
/// failures are folded into the returned records/summary pair.
pub async fn collect_details<F, Fut>(
    products: Vec<ProductRef>,
    workers: usize,
    cancel: CancellationToken,
    grace: Duration,
    fetch: F,
) -> (Vec<BreedRecord>, Vec<Skipped>)
where
    F: Fn(ProductRef) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<BreedRecord, Skipped>> + Send + 'static,
{
    let fetch = Arc::new(fetch);
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut join_set = JoinSet::new();

    for product in products {
        if cancel.is_cancelled() {
            break;
        }
        let fetch = fetch.clone();
        let semaphore = semaphore.clone();
        let cancel = cancel.clone();
        join_set.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            if cancel.is_cancelled() {
                return Err(Skipped {
                    url: product.url.clone(),
                    reason: "cancelled before fetch".to_string(),
                });
            }
            fetch(product).await
        });
    }

    let mut records = Vec::new();
    let mut skipped = Vec::new();
    let mut deadline: Option<tokio::time::Instant> = None;

    loop {
        if cancel.is_cancelled() && deadline.is_none() {
            deadline = Some(tokio::time::Instant::now() + grace);
        }

        let next = match deadline {
            Some(deadline) => {
                match tokio::time::timeout_at(deadline, join_set.join_next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        // Grace expired: hard-abort whatever is left
                        join_set.abort_all();
                        while let Some(result) = join_set.join_next().await {
                            match result {
                                Ok(Ok(record)) => records.push(record),
                                Ok(Err(skip)) => skipped.push(skip),
                                Err(_) => skipped.push(Skipped {
                                    url: String::new(),
                                    reason: "aborted after cancellation grace".to_string(),
                                }),
                            }
                        }
                        break;
                    }
                }
            }
            None => join_set.join_next().await,
        };

        match next {
            Some(Ok(Ok(record))) => records.push(record),
            Some(Ok(Err(skip))) => skipped.push(skip),
            Some(Err(e)) => skipped.push(Skipped {
                url: String::new(),
                reason: format!("detail task failed: {}", e),
            }),
            None => break,
        }
    }

    (records, skipped)
}

/// Crawler for one configured hatchery site
pub struct Crawler {
    site: SiteConfig,
    fetcher: Arc<Fetcher>,
}

impl Crawler {
    pub fn new(site: SiteConfig) -> anyhow::Result<Self> {
        site.validate()?;
        let fetcher = Arc::new(Fetcher::for_site(&site)?);
        Ok(Self { site, fetcher })
    }

    pub fn site(&self) -> &SiteConfig {
        &self.site
    }

    /// List category pages from the site's listing entry point. Sites
    /// without a category layer yield one pseudo-category covering the
    /// listing itself.
    pub async fn list_categories(&self) -> anyhow::Result<Vec<CategoryLink>> {
        let html = self.listing_html(&self.site.listing_url).await?;
        let mut categories =
            parse_category_links(&html, &self.site.base_url, &self.site.listing);
        if categories.is_empty() {
            debug!("no category links on {}; treating listing as flat", self.site.listing_url);
            categories.push(CategoryLink {
                name: self.site.name.clone(),
                url: self.site.listing_url.clone(),
            });
        }
        Ok(categories)
    }

    /// List products in one category, following pagination until
    /// exhausted (next-page links on static sites, the load-more loop
    /// on browser-rendered ones).
    pub async fn list_products(&self, category: &CategoryLink) -> anyhow::Result<Vec<ProductRef>> {
        let mut refs = Vec::new();

        match self.site.mode {
            RenderMode::Browser => {
                let html = self.listing_html(&category.url).await?;
                refs.extend(parse_product_refs(
                    &html,
                    &self.site.base_url,
                    &self.site.listing,
                    &self.site.fields,
                ));
            }
            RenderMode::Static => {
                let mut next = Some(category.url.clone());
                while let Some(url) = next {
                    let html = self.fetcher.fetch(&url).await?;
                    refs.extend(parse_product_refs(
                        &html,
                        &self.site.base_url,
                        &self.site.listing,
                        &self.site.fields,
                    ));
                    next = parse_next_page(&html, &self.site.base_url, &self.site.listing);
                }
            }
        }
        Ok(refs)
    }

    /// Fetch one product's detail page and build its record. Failures
    /// come back as a skip reason, never as a panic or crawl abort.
    pub async fn fetch_detail(&self, product: &ProductRef) -> Result<BreedRecord, Skipped> {
        let (html, location) = match self.site.mode {
            RenderMode::Static => {
                let html = self.fetcher.fetch(&product.url).await.map_err(|e| Skipped {
                    url: product.url.clone(),
                    reason: e.to_string(),
                })?;
                // Static markup can still hide the shipping location
                // behind an add-to-cart flow
                let location = match &self.site.cart_flow {
                    Some(flow) => self.location_via_browser(&product.url, flow).await,
                    None => None,
                };
                (html, location)
            }
            RenderMode::Browser => self
                .fetch_detail_browser(&product.url)
                .await
                .map_err(|e| Skipped {
                    url: product.url.clone(),
                    reason: e.to_string(),
                })?,
        };

        Ok(build_record(&html, &self.site, product, location))
    }

    /// One scoped browser session per product: expand accordions,
    /// snapshot the DOM, optionally run the cart flow for the shipping
    /// location. The session closes on every path.
    async fn fetch_detail_browser(&self, url: &str) -> anyhow::Result<(String, Option<String>)> {
        let session = BrowserSession::open(url, &self.site.user_agent).await?;
        let result = self.drive_detail_session(&session).await;
        session.close().await;
        result
    }

    async fn drive_detail_session(
        &self,
        session: &BrowserSession,
    ) -> anyhow::Result<(String, Option<String>)> {
        session.expand_sections(&self.site.expand_selectors).await;
        let html = session.snapshot_html().await?;
        let location = match &self.site.cart_flow {
            Some(flow) => session.shipping_location(flow, &self.site.base_url).await,
            None => None,
        };
        Ok((html, location))
    }

    /// Scoped session used only for the cart-flow location on
    /// otherwise static sites; any failure just leaves location empty
    async fn location_via_browser(&self, url: &str, flow: &CartFlowConfig) -> Option<String> {
        let session = match BrowserSession::open(url, &self.site.user_agent).await {
            Ok(session) => session,
            Err(e) => {
                warn!("browser unavailable for location on {}: {}", url, e);
                return None;
            }
        };
        let location = session.shipping_location(flow, &self.site.base_url).await;
        session.close().await;
        location
    }

    /// Full traversal: categories → deduplicated products → concurrent
    /// detail fetches. Always returns whatever was extracted plus the
    /// summary of what was not.
    pub async fn crawl(
        self: Arc<Self>,
        cancel: CancellationToken,
        grace: Duration,
    ) -> CrawlOutcome {
        let mut summary = RunSummary::default();

        let categories = match self.list_categories().await {
            Ok(categories) => categories,
            Err(e) => {
                warn!("{}: listing failed: {}", self.site.name, e);
                summary.categories_failed += 1;
                return CrawlOutcome {
                    records: Vec::new(),
                    summary,
                };
            }
        };
        info!("{}: {} categories", self.site.name, categories.len());

        let dedup = DedupSet::new();
        let mut products = Vec::new();
        for category in &categories {
            if cancel.is_cancelled() {
                break;
            }
            summary.categories_visited += 1;
            match self.list_products(category).await {
                Ok(refs) => {
                    for product in refs {
                        if dedup.insert(&product.url) {
                            products.push(product);
                        }
                    }
                }
                Err(e) => {
                    warn!("{}: category '{}' failed: {}", self.site.name, category.url, e);
                    summary.categories_failed += 1;
                }
            }
        }
        summary.products_discovered = products.len();
        info!(
            "{}: {} unique products discovered",
            self.site.name,
            products.len()
        );

        let crawler = self.clone();
        let (records, skipped) = collect_details(
            products,
            self.site.workers,
            cancel,
            grace,
            move |product| {
                let crawler = crawler.clone();
                async move { crawler.fetch_detail(&product).await }
            },
        )
        .await;

        summary.records_produced = records.len();
        summary.products_failed = skipped.len();
        summary.skipped = skipped;

        CrawlOutcome { records, summary }
    }

    /// Obtain listing HTML respecting the site's rendering mode
    async fn listing_html(&self, url: &str) -> anyhow::Result<String> {
        match self.site.mode {
            RenderMode::Static => Ok(self.fetcher.fetch(url).await?),
            RenderMode::Browser => {
                let session = BrowserSession::open(url, &self.site.user_agent).await?;
                let result = session.load_all(&self.site.listing.load_more_selectors).await;
                session.close().await;
                result
            }
        }
    }
}
