//! Catalog extraction engine for hatchery commerce sites.
//!
//! Fetching, browser automation, selector-fallback parsing, table
//! normalization and crawl orchestration live here.

pub mod browser;
pub mod crawler;
pub mod fetcher;
pub mod images;
pub mod selectors;
pub mod tables;
pub mod text;

pub use browser::BrowserSession;
pub use crawler::Crawler;
pub use fetcher::Fetcher;
pub use images::ImagePipeline;

/// Normalize a URL for deduplication: drop the query string, fragment
/// and trailing slash. Two listings of the same product under
/// different tracking parameters collapse to one key.
pub fn normalize_url(url: &str) -> String {
    let without_fragment = url.split('#').next().unwrap_or(url);
    let without_query = without_fragment.split('?').next().unwrap_or(without_fragment);
    without_query.trim_end_matches('/').to_string()
}

/// Resolve a possibly relative href against a site's base URL
pub fn absolutize(base_url: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else if let Some(rest) = href.strip_prefix("//") {
        format!("https://{}", rest)
    } else if href.starts_with('/') {
        format!("{}{}", base_url.trim_end_matches('/'), href)
    } else {
        format!("{}/{}", base_url.trim_end_matches('/'), href)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_url_strips_query_and_slash() {
        assert_eq!(
            normalize_url("https://x.example/products/buff-orpington?variant=2&ref=grid"),
            "https://x.example/products/buff-orpington"
        );
        assert_eq!(
            normalize_url("https://x.example/products/buff-orpington/"),
            "https://x.example/products/buff-orpington"
        );
        assert_eq!(
            normalize_url("https://x.example/products/buff-orpington#reviews"),
            "https://x.example/products/buff-orpington"
        );
    }

    #[test]
    fn test_normalize_url_equal_under_differing_queries() {
        let a = normalize_url("https://x.example/p/silkie?utm=a");
        let b = normalize_url("https://x.example/p/silkie/?utm=b");
        assert_eq!(a, b);
    }

    #[test]
    fn test_absolutize() {
        assert_eq!(
            absolutize("https://x.example", "/products/silkie"),
            "https://x.example/products/silkie"
        );
        assert_eq!(
            absolutize("https://x.example/", "//cdn.x.example/a.jpg"),
            "https://cdn.x.example/a.jpg"
        );
        assert_eq!(
            absolutize("https://x.example", "https://y.example/p"),
            "https://y.example/p"
        );
        assert_eq!(
            absolutize("https://x.example", "products/silkie"),
            "https://x.example/products/silkie"
        );
    }
}
