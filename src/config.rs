//! Configuration for hatchery sources and the crawl/image pipelines.
//!
//! One [`SiteConfig`] per hatchery. Structural differences between
//! sites live entirely in these records (strategy chains, table
//! selectors, interactive flows), so onboarding a new source is a
//! config change, not new control flow.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::scraper::selectors::Strategy;

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/120.0.0.0 Safari/537.36"
        .to_string()
}

fn default_headers() -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            "Accept".to_string(),
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8"
                .to_string(),
        ),
        ("Accept-Language".to_string(), "en-US,en;q=0.9".to_string()),
    ])
}

fn default_politeness_ms() -> u64 {
    1000
}

fn default_max_retries() -> u32 {
    3
}

fn default_workers() -> usize {
    4
}

/// How a site's pages are obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    /// Plain HTTP fetch; markup is complete server-side
    #[default]
    Static,
    /// Headless browser; content is rendered client-side or needs
    /// interaction to appear
    Browser,
}

fn default_category_selectors() -> Vec<String> {
    vec![
        ".title-content-wrapper a".to_string(),
        "li.product-category a".to_string(),
    ]
}

fn default_product_card_selectors() -> Vec<String> {
    vec![
        ".product-item".to_string(),
        "li.type-product".to_string(),
        ".product-card".to_string(),
        ".grid-product".to_string(),
        "div.productOuter".to_string(),
    ]
}

fn default_product_link_selectors() -> Vec<String> {
    vec![
        "a.details".to_string(),
        "a[href*='/products/']".to_string(),
        "a".to_string(),
    ]
}

fn default_next_page_selector() -> Option<String> {
    Some("li.next-page a".to_string())
}

fn default_load_more_selectors() -> Vec<String> {
    vec![
        "button.load-more".to_string(),
        "a.load-more".to_string(),
        ".load-more-button".to_string(),
        ".view-more".to_string(),
        "[data-action='load-more']".to_string(),
        ".btn--load-more".to_string(),
        ".loadmore".to_string(),
        "#more".to_string(),
        ".more-products".to_string(),
    ]
}

/// Selectors for walking listing pages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingConfig {
    #[serde(default = "default_category_selectors")]
    pub category_selectors: Vec<String>,
    #[serde(default = "default_product_card_selectors")]
    pub product_card_selectors: Vec<String>,
    #[serde(default = "default_product_link_selectors")]
    pub product_link_selectors: Vec<String>,
    /// Explicit pagination link on static sites
    #[serde(default = "default_next_page_selector")]
    pub next_page_selector: Option<String>,
    /// Candidate "load more" controls on dynamic sites, tried in order
    #[serde(default = "default_load_more_selectors")]
    pub load_more_selectors: Vec<String>,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            category_selectors: default_category_selectors(),
            product_card_selectors: default_product_card_selectors(),
            product_link_selectors: default_product_link_selectors(),
            next_page_selector: default_next_page_selector(),
            load_more_selectors: default_load_more_selectors(),
        }
    }
}

fn default_name_chain() -> Vec<Strategy> {
    vec![
        Strategy::Text {
            selector: "h1.product_title".to_string(),
        },
        Strategy::Text {
            selector: ".product-title".to_string(),
        },
        Strategy::Text {
            selector: "h2".to_string(),
        },
        Strategy::Text {
            selector: "h3".to_string(),
        },
        Strategy::ImgAlt {
            selector: "img".to_string(),
        },
        Strategy::UrlSlug,
    ]
}

fn default_price_chain() -> Vec<Strategy> {
    vec![
        Strategy::Text {
            selector: "span.woocommerce-Price-amount".to_string(),
        },
        Strategy::Text {
            selector: "span.price.only-price".to_string(),
        },
        Strategy::Text {
            selector: ".price".to_string(),
        },
    ]
}

fn default_description_chain() -> Vec<Strategy> {
    vec![
        Strategy::Text {
            selector: ".woocommerce-product-details__short-description".to_string(),
        },
        Strategy::Text {
            selector: ".product-description".to_string(),
        },
        Strategy::Text {
            selector: ".product__description".to_string(),
        },
    ]
}

fn default_image_chain() -> Vec<Strategy> {
    vec![
        Strategy::ImageSource {
            selector: ".swiper-wrapper img".to_string(),
        },
        Strategy::ImageSource {
            selector: ".product-single__photo img".to_string(),
        },
        Strategy::ImageSource {
            selector: ".product__photo img".to_string(),
        },
        Strategy::ImageSource {
            selector: ".product-image img".to_string(),
        },
        Strategy::ImageSource {
            selector: "figure img".to_string(),
        },
        Strategy::ImageSource {
            selector: ".carousel img".to_string(),
        },
    ]
}

/// Per-field extraction strategy chains for product detail pages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldChains {
    #[serde(default = "default_name_chain")]
    pub name: Vec<Strategy>,
    #[serde(default = "default_price_chain")]
    pub price: Vec<Strategy>,
    #[serde(default = "default_description_chain")]
    pub description: Vec<Strategy>,
    #[serde(default = "default_image_chain")]
    pub images: Vec<Strategy>,
}

impl Default for FieldChains {
    fn default() -> Self {
        Self {
            name: default_name_chain(),
            price: default_price_chain(),
            description: default_description_chain(),
            images: default_image_chain(),
        }
    }
}

fn default_pricing_table_selectors() -> Vec<String> {
    vec![
        ".prices-table".to_string(),
        "table.mmSkuPriceTable".to_string(),
        ".pricing-table".to_string(),
    ]
}

fn default_availability_table_selectors() -> Vec<String> {
    vec!["#availTable".to_string(), "#show_avail table".to_string()]
}

fn default_date_format() -> String {
    "%b %d, %Y".to_string()
}

fn default_available_marker() -> String {
    "prodAvailAvail".to_string()
}

fn default_limited_marker() -> String {
    "prodAvailLtd".to_string()
}

fn default_not_available_marker() -> String {
    "prodAvailNA".to_string()
}

fn default_check_marker() -> String {
    "fa-check".to_string()
}

/// Selectors and markers for pricing/availability table fragments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    #[serde(default = "default_pricing_table_selectors")]
    pub pricing_table_selectors: Vec<String>,
    #[serde(default = "default_availability_table_selectors")]
    pub availability_table_selectors: Vec<String>,
    /// Expected source format of availability column dates
    #[serde(default = "default_date_format")]
    pub date_format: String,
    #[serde(default = "default_available_marker")]
    pub available_marker: String,
    #[serde(default = "default_limited_marker")]
    pub limited_marker: String,
    #[serde(default = "default_not_available_marker")]
    pub not_available_marker: String,
    /// Class of a bare check-mark cell in simple availability grids
    #[serde(default = "default_check_marker")]
    pub check_marker: String,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            pricing_table_selectors: default_pricing_table_selectors(),
            availability_table_selectors: default_availability_table_selectors(),
            date_format: default_date_format(),
            available_marker: default_available_marker(),
            limited_marker: default_limited_marker(),
            not_available_marker: default_not_available_marker(),
            check_marker: default_check_marker(),
        }
    }
}

fn default_quantity_selector() -> Option<String> {
    Some(".plus".to_string())
}

fn default_quantity_clicks() -> u32 {
    5
}

fn default_cart_path() -> String {
    "/cart".to_string()
}

fn default_add_to_cart_selectors() -> Vec<String> {
    vec![
        "button.add-to-cart-button".to_string(),
        "button[name='add']".to_string(),
    ]
}

fn default_location_selectors() -> Vec<String> {
    vec![".location-heading".to_string()]
}

/// Simulated add-to-cart flow used to surface the shipping location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartFlowConfig {
    /// Quantity increment control clicked before adding to cart
    #[serde(default = "default_quantity_selector")]
    pub quantity_selector: Option<String>,
    #[serde(default = "default_quantity_clicks")]
    pub quantity_clicks: u32,
    #[serde(default = "default_add_to_cart_selectors")]
    pub add_to_cart_selectors: Vec<String>,
    #[serde(default = "default_cart_path")]
    pub cart_path: String,
    #[serde(default = "default_location_selectors")]
    pub location_selectors: Vec<String>,
    /// Known warehouse locations; a match wins over the raw text
    #[serde(default)]
    pub known_locations: Vec<String>,
}

impl Default for CartFlowConfig {
    fn default() -> Self {
        Self {
            quantity_selector: default_quantity_selector(),
            quantity_clicks: default_quantity_clicks(),
            add_to_cart_selectors: default_add_to_cart_selectors(),
            cart_path: default_cart_path(),
            location_selectors: default_location_selectors(),
            known_locations: Vec::new(),
        }
    }
}

/// Immutable configuration for one hatchery source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    pub name: String,
    pub base_url: String,
    /// Entry page listing categories (or products directly when the
    /// site has no category layer)
    pub listing_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_headers")]
    pub headers: BTreeMap<String, String>,
    /// Minimum wait between consecutive requests to this host
    #[serde(default = "default_politeness_ms")]
    pub politeness_delay_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Concurrent detail-fetch limit
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub mode: RenderMode,
    #[serde(default)]
    pub listing: ListingConfig,
    #[serde(default)]
    pub fields: FieldChains,
    #[serde(default)]
    pub tables: TableConfig,
    /// Accordion/expand controls opened on detail pages before the
    /// DOM snapshot (availability calendars, quick stats)
    #[serde(default)]
    pub expand_selectors: Vec<String>,
    /// Present only on sites where shipping location requires the
    /// interactive cart flow
    #[serde(default)]
    pub cart_flow: Option<CartFlowConfig>,
}

impl SiteConfig {
    /// Minimal config for one source; everything else defaults
    pub fn new(name: &str, base_url: &str, listing_url: &str) -> Self {
        Self {
            name: name.to_string(),
            base_url: base_url.to_string(),
            listing_url: listing_url.to_string(),
            user_agent: default_user_agent(),
            headers: default_headers(),
            politeness_delay_ms: default_politeness_ms(),
            max_retries: default_max_retries(),
            workers: default_workers(),
            mode: RenderMode::Static,
            listing: ListingConfig::default(),
            fields: FieldChains::default(),
            tables: TableConfig::default(),
            expand_selectors: Vec::new(),
            cart_flow: None,
        }
    }

    /// Startup validation; a malformed site config is the one fatal
    /// error class in the system
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("site config is missing a name");
        }
        if !self.base_url.starts_with("http") {
            anyhow::bail!("site '{}': base_url must be absolute", self.name);
        }
        if !self.listing_url.starts_with("http") {
            anyhow::bail!("site '{}': listing_url must be absolute", self.name);
        }
        if self.workers == 0 {
            anyhow::bail!("site '{}': workers must be at least 1", self.name);
        }
        Ok(())
    }
}

fn default_sink_dir() -> String {
    "data/images/train".to_string()
}

fn default_download_delay_ms() -> u64 {
    1000
}

/// Image acquisition settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagesConfig {
    #[serde(default = "default_sink_dir")]
    pub sink_dir: String,
    /// Fixed wait between consecutive downloads
    #[serde(default = "default_download_delay_ms")]
    pub download_delay_ms: u64,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            sink_dir: default_sink_dir(),
            download_delay_ms: default_download_delay_ms(),
        }
    }
}

fn default_grace_secs() -> u64 {
    30
}

/// Run-wide crawl settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// How long in-flight work may drain after cancellation before
    /// being aborted
    #[serde(default = "default_grace_secs")]
    pub cancel_grace_secs: u64,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            cancel_grace_secs: default_grace_secs(),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub sites: Vec<SiteConfig>,
    #[serde(default)]
    pub images: ImagesConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
}

impl AppConfig {
    /// Load configuration from defaults, an optional config file and
    /// HATCH-prefixed environment variables
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        let file = path.unwrap_or("hatcheries");
        let config = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name(file).required(path.is_some()))
            .add_source(
                config::Environment::with_prefix("HATCH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let app: AppConfig = config.try_deserialize()?;
        for site in &app.sites {
            site.validate()?;
        }
        Ok(app)
    }

    /// Find a configured site by name
    pub fn site(&self, name: &str) -> Option<&SiteConfig> {
        self.sites.iter().find(|s| s.name == name)
    }
}
