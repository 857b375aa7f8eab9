//! Record types produced by the catalog crawler.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A category listing page discovered on a hatchery site
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryLink {
    pub name: String,
    pub url: String,
}

/// A product page discovered on a category listing.
///
/// The orchestrator deduplicates these by normalized URL before any
/// detail fetch, so its working set holds at most one per product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductRef {
    /// Name as it appeared on the listing card; may be empty or
    /// boilerplate and is re-resolved on the detail page.
    pub candidate_name: String,
    pub url: String,
}

/// Tiered prices for one sex label.
///
/// Sex vocabulary is whatever the source uses ("Female"/"Male"/
/// "Straight Run" on one site, "Pullet"/"Cockerel" on another); no
/// cross-site canonicalization is applied. Tier order follows the
/// source table's column order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceEntry {
    pub sex: String,
    pub tiers: IndexMap<String, String>,
}

/// Stock status of one sex on one ship date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AvailabilityStatus {
    Available,
    Limited,
    NotAvailable,
}

/// Status plus remaining count for one sex in an availability cell
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SexSlot {
    pub status: AvailabilityStatus,
    /// Remaining count for Limited; 0 for NotAvailable; null when
    /// the source shows availability without a count.
    pub available: Option<u32>,
}

impl SexSlot {
    pub fn available() -> Self {
        Self {
            status: AvailabilityStatus::Available,
            available: None,
        }
    }

    pub fn limited(count: u32) -> Self {
        Self {
            status: AvailabilityStatus::Limited,
            available: Some(count),
        }
    }

    pub fn not_available() -> Self {
        Self {
            status: AvailabilityStatus::NotAvailable,
            available: Some(0),
        }
    }
}

/// Availability of each sex on one hatch/ship date
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityEntry {
    /// ISO-8601 date (YYYY-MM-DD)
    pub date: String,
    #[serde(rename = "perSex")]
    pub per_sex: BTreeMap<String, SexSlot>,
}

/// Canonical aggregated data for one chicken variety from one source.
///
/// Built once per product detail fetch and immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreedRecord {
    pub name: String,
    pub prices: Vec<PriceEntry>,
    pub availability: Vec<AvailabilityEntry>,
    pub description: String,
    pub location: Option<String>,
    pub images: Vec<String>,
    #[serde(rename = "sourceURL")]
    pub source_url: String,
}

/// A downloaded and validated image file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageAsset {
    #[serde(rename = "sourceURL")]
    pub source_url: String,
    pub content_hash: String,
    pub local_path: PathBuf,
    pub dimensions: (u32, u32),
    pub valid: bool,
}

/// A per-item failure that was absorbed rather than raised
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skipped {
    pub url: String,
    pub reason: String,
}

/// Aggregate outcome of a crawl run.
///
/// Per-item errors land here instead of aborting the run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub categories_visited: usize,
    pub categories_failed: usize,
    pub products_discovered: usize,
    pub records_produced: usize,
    pub products_failed: usize,
    pub skipped: Vec<Skipped>,
}

/// Records plus the summary of what was skipped along the way
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlOutcome {
    pub records: Vec<BreedRecord>,
    pub summary: RunSummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_serialization_shape() {
        let mut tiers = IndexMap::new();
        tiers.insert("1-5".to_string(), "$4.25".to_string());
        tiers.insert("6-15".to_string(), "$3.80".to_string());

        let mut per_sex = BTreeMap::new();
        per_sex.insert("Female".to_string(), SexSlot::limited(3));
        per_sex.insert("Male".to_string(), SexSlot::not_available());

        let record = BreedRecord {
            name: "Buff_Orpington".to_string(),
            prices: vec![PriceEntry {
                sex: "Female".to_string(),
                tiers,
            }],
            availability: vec![AvailabilityEntry {
                date: "2025-03-17".to_string(),
                per_sex,
            }],
            description: "A calm dual-purpose bird".to_string(),
            location: None,
            images: vec!["https://example.com/buff.jpg".to_string()],
            source_url: "https://example.com/products/buff-orpington".to_string(),
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["name"], "Buff_Orpington");
        assert_eq!(json["sourceURL"], "https://example.com/products/buff-orpington");
        assert_eq!(json["prices"][0]["tiers"]["1-5"], "$4.25");
        assert_eq!(
            json["availability"][0]["perSex"]["Female"]["status"],
            "Limited"
        );
        assert_eq!(json["availability"][0]["perSex"]["Female"]["available"], 3);
        assert_eq!(
            json["availability"][0]["perSex"]["Male"]["status"],
            "NotAvailable"
        );
        assert_eq!(json["availability"][0]["perSex"]["Male"]["available"], 0);
        assert_eq!(json["location"], serde_json::Value::Null);
    }

    #[test]
    fn test_tier_order_preserved() {
        let mut tiers = IndexMap::new();
        tiers.insert("5-9".to_string(), "$5.10".to_string());
        tiers.insert("10-14".to_string(), "$4.40".to_string());
        tiers.insert("15+".to_string(), "$3.95".to_string());

        let json = serde_json::to_string(&tiers).unwrap();
        let pos_a = json.find("5-9").unwrap();
        let pos_b = json.find("10-14").unwrap();
        let pos_c = json.find("15+").unwrap();
        assert!(pos_a < pos_b && pos_b < pos_c);
    }
}
