//! Ordered fallback chains for extracting one logical field from
//! heterogeneous DOM shapes.
//!
//! Each site lists, per field, a sequence of strategies tried in order.
//! The first strategy producing a non-empty value that is not listing
//! boilerplate wins. When the whole chain misses, the field is reported
//! absent and the caller applies its own fallback (e.g. name from the
//! URL slug). This is what lets one crawl loop serve structurally
//! different sites without per-site branches.

use scraper::{ElementRef, Selector};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::text;

/// Button/badge texts that must never be mistaken for field values
const BOILERPLATE: [&str; 6] = [
    "buy now",
    "add to cart",
    "added to cart",
    "view details",
    "learn more",
    "sold out",
];

/// One way to pull a field value out of a DOM context
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Strategy {
    /// Inner text of the first element matching a CSS selector
    Text { selector: String },
    /// An attribute of the first element matching a CSS selector
    Attr { selector: String, attr: String },
    /// Alt text of a matching image
    ImgAlt { selector: String },
    /// Highest-resolution candidate of a matching element's srcset,
    /// falling back to src/data-src
    ImageSource { selector: String },
    /// Title-cased slug of the context URL
    UrlSlug,
}

/// Whether a candidate value is usable as a field result
pub fn is_usable(value: &str) -> bool {
    let lowered = value.trim().to_lowercase();
    !lowered.is_empty() && !BOILERPLATE.iter().any(|b| lowered.contains(b))
}

fn parse_selector(raw: &str) -> Option<Selector> {
    match Selector::parse(raw) {
        Ok(sel) => Some(sel),
        Err(_) => {
            warn!("ignoring unparseable selector: {}", raw);
            None
        }
    }
}

fn element_text(el: ElementRef) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// First source URL attribute present on an image-like element
fn image_source(el: ElementRef) -> Option<String> {
    if let Some(srcset) = el.value().attr("srcset").or(el.value().attr("data-srcset")) {
        if let Some(best) = text::largest_srcset_candidate(srcset) {
            return Some(best);
        }
    }
    el.value()
        .attr("src")
        .or(el.value().attr("data-src"))
        .or(el.value().attr("data-full-size-url"))
        .map(str::to_string)
}

impl Strategy {
    /// Evaluate against `scope`, returning every match in document order
    fn apply_all(&self, scope: ElementRef, url: &str) -> Vec<String> {
        match self {
            Strategy::Text { selector } => {
                let Some(sel) = parse_selector(selector) else {
                    return Vec::new();
                };
                scope.select(&sel).map(element_text).collect()
            }
            Strategy::Attr { selector, attr } => {
                let Some(sel) = parse_selector(selector) else {
                    return Vec::new();
                };
                scope
                    .select(&sel)
                    .filter_map(|el| el.value().attr(attr))
                    .map(|v| v.trim().to_string())
                    .collect()
            }
            Strategy::ImgAlt { selector } => {
                let Some(sel) = parse_selector(selector) else {
                    return Vec::new();
                };
                scope
                    .select(&sel)
                    .filter_map(|el| el.value().attr("alt"))
                    .map(|v| v.trim().to_string())
                    .collect()
            }
            Strategy::ImageSource { selector } => {
                let Some(sel) = parse_selector(selector) else {
                    return Vec::new();
                };
                scope.select(&sel).filter_map(image_source).collect()
            }
            Strategy::UrlSlug => {
                let name = text::name_from_url(url);
                if name.is_empty() {
                    Vec::new()
                } else {
                    vec![name]
                }
            }
        }
    }
}

/// Resolve one field: first strategy in the chain whose first usable
/// match is non-empty wins. `None` means the field is absent.
pub fn resolve(scope: ElementRef, url: &str, chain: &[Strategy]) -> Option<String> {
    for strategy in chain {
        if let Some(value) = strategy
            .apply_all(scope, url)
            .into_iter()
            .find(|v| is_usable(v))
        {
            return Some(value);
        }
    }
    None
}

/// Resolve a multi-valued field (image URL lists): the first strategy
/// yielding any usable values contributes all of them, deduplicated in
/// document order.
pub fn resolve_all(scope: ElementRef, url: &str, chain: &[Strategy]) -> Vec<String> {
    for strategy in chain {
        let values: Vec<String> = strategy
            .apply_all(scope, url)
            .into_iter()
            .filter(|v| is_usable(v))
            .collect();
        if !values.is_empty() {
            let mut seen = std::collections::HashSet::new();
            return values
                .into_iter()
                .filter(|v| seen.insert(v.clone()))
                .collect();
        }
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    fn name_chain() -> Vec<Strategy> {
        vec![
            Strategy::Text {
                selector: "h2.product-title".to_string(),
            },
            Strategy::ImgAlt {
                selector: "img".to_string(),
            },
            Strategy::UrlSlug,
        ]
    }

    #[test]
    fn test_first_strategy_wins() {
        let html = Html::parse_fragment(
            r#"<div><h2 class="product-title">Silver Laced Wyandotte</h2>
               <img alt="other name" src="x.jpg"></div>"#,
        );
        let name = resolve(
            html.root_element(),
            "https://x.example/products/slw",
            &name_chain(),
        );
        assert_eq!(name.unwrap(), "Silver Laced Wyandotte");
    }

    #[test]
    fn test_fallback_to_alt_text() {
        let html = Html::parse_fragment(
            r#"<div><img alt="Black Australorp" src="x.jpg"></div>"#,
        );
        let name = resolve(
            html.root_element(),
            "https://x.example/products/black-australorp",
            &name_chain(),
        );
        assert_eq!(name.unwrap(), "Black Australorp");
    }

    #[test]
    fn test_fallback_to_url_slug() {
        let html = Html::parse_fragment("<div><span>no name here at all</span></div>");
        let name = resolve(
            html.root_element(),
            "https://x.example/products/golden-comet",
            &name_chain(),
        );
        assert_eq!(name.unwrap(), "Golden_Comet");
    }

    #[test]
    fn test_boilerplate_rejected() {
        let html = Html::parse_fragment(
            r#"<div><h2 class="product-title">Buy Now</h2>
               <img alt="Easter Egger" src="x.jpg"></div>"#,
        );
        let name = resolve(
            html.root_element(),
            "https://x.example/products/easter-egger",
            &name_chain(),
        );
        assert_eq!(name.unwrap(), "Easter Egger");
    }

    #[test]
    fn test_absent_field_is_none() {
        let html = Html::parse_fragment("<div></div>");
        let price = resolve(
            html.root_element(),
            "https://x.example/products/p",
            &[Strategy::Text {
                selector: ".price".to_string(),
            }],
        );
        assert!(price.is_none());
    }

    #[test]
    fn test_resolve_all_collects_and_dedups() {
        let html = Html::parse_fragment(
            r#"<div class="swiper-wrapper">
                 <img src="https://cdn.example/a.jpg">
                 <img src="https://cdn.example/b.jpg">
                 <img src="https://cdn.example/a.jpg">
               </div>"#,
        );
        let urls = resolve_all(
            html.root_element(),
            "https://x.example/products/p",
            &[Strategy::ImageSource {
                selector: ".swiper-wrapper img".to_string(),
            }],
        );
        assert_eq!(
            urls,
            vec![
                "https://cdn.example/a.jpg".to_string(),
                "https://cdn.example/b.jpg".to_string()
            ]
        );
    }

    #[test]
    fn test_srcset_prefers_largest() {
        let html = Html::parse_fragment(
            r#"<img srcset="https://cdn.example/a_200x.jpg 200w, https://cdn.example/a_1200x.jpg 1200w">"#,
        );
        let urls = resolve_all(
            html.root_element(),
            "https://x.example/p",
            &[Strategy::ImageSource {
                selector: "img".to_string(),
            }],
        );
        assert_eq!(urls, vec!["https://cdn.example/a_1200x.jpg".to_string()]);
    }

    #[test]
    fn test_unparseable_selector_skipped() {
        let html = Html::parse_fragment(r#"<div><h3>Dominique</h3></div>"#);
        let chain = vec![
            Strategy::Text {
                selector: "h3:contains('x')".to_string(), // not valid CSS
            },
            Strategy::Text {
                selector: "h3".to_string(),
            },
        ];
        let name = resolve(html.root_element(), "https://x.example/p", &chain);
        assert_eq!(name.unwrap(), "Dominique");
    }
}
