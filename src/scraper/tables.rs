//! Normalizers for raw pricing and availability table fragments.
//!
//! Hatchery sites disagree on table markup: some use real `<table>`
//! elements, some div grids; availability is either a date-column ×
//! sex-row matrix or a grid of date cells with per-sex badges. These
//! transforms reduce all of them to the canonical record shapes.

use chrono::NaiveDate;
use indexmap::IndexMap;
use regex::Regex;
use scraper::{ElementRef, Selector};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::config::TableConfig;
use crate::types::{AvailabilityEntry, PriceEntry, SexSlot};

fn sel(raw: &str) -> Selector {
    Selector::parse(raw).unwrap()
}

fn cell_text(el: ElementRef) -> String {
    el.text().collect::<String>().replace('\u{a0}', " ").trim().to_string()
}

/// Normalize a pricing table: a header row of quantity-tier labels and
/// one row per sex with positionally matching price cells.
///
/// Tier labels and price cells are zipped by position; a length
/// mismatch truncates to the shorter side and logs the inconsistency.
pub fn parse_pricing(table: ElementRef) -> Vec<PriceEntry> {
    // Div-grid shape first (`.thead`/`.tbody` with labeled cells);
    // the quantity cell's first span is the tier label
    let tier_spans = sel(".thead .item-quantity span:first-child");
    let mut tiers: Vec<String> = table
        .select(&tier_spans)
        .map(cell_text)
        .filter(|t| !t.is_empty())
        .collect();

    let mut rows: Vec<(String, Vec<String>)> = Vec::new();

    if !tiers.is_empty() {
        let row_sel = sel(".tbody");
        let sex_sel = sel(".field-header");
        let price_sel = sel(".item-price");
        for row in table.select(&row_sel) {
            let Some(sex) = row.select(&sex_sel).next().map(cell_text) else {
                continue;
            };
            let prices: Vec<String> = row
                .select(&price_sel)
                .map(cell_text)
                .filter(|p| !p.is_empty())
                .collect();
            rows.push((sex, prices));
        }
    } else {
        // Plain <table>: header cells are tier labels, body rows lead
        // with the sex label
        let header_sel = sel("thead th, thead td");
        tiers = table
            .select(&header_sel)
            .map(cell_text)
            .filter(|t| !t.is_empty())
            .collect();

        let row_sel = sel("tbody tr");
        let td_sel = sel("td, th");
        for row in table.select(&row_sel) {
            let mut cells = row.select(&td_sel).map(cell_text);
            let Some(sex) = cells.next() else { continue };
            if sex.is_empty() {
                continue;
            }
            rows.push((sex, cells.collect()));
        }
    }

    let mut entries = Vec::new();
    for (sex, prices) in rows {
        if prices.len() != tiers.len() {
            warn!(
                "pricing row '{}' has {} cells for {} tier labels; truncating",
                sex,
                prices.len(),
                tiers.len()
            );
        }
        let mut tier_map = IndexMap::new();
        for (tier, price) in tiers.iter().zip(prices.iter()) {
            tier_map.insert(tier.clone(), price.clone());
        }
        if !tier_map.is_empty() {
            entries.push(PriceEntry {
                sex,
                tiers: tier_map,
            });
        }
    }
    entries
}

/// Parse a source-format date header, re-emitting ISO-8601.
fn parse_date(raw: &str, format: &str) -> Option<String> {
    let cleaned = raw.replace('\u{a0}', " ");
    let cleaned = cleaned.trim();
    match NaiveDate::parse_from_str(cleaned, format) {
        Ok(date) => Some(date.format("%Y-%m-%d").to_string()),
        Err(e) => {
            debug!("skipping unparseable date column '{}': {}", cleaned, e);
            None
        }
    }
}

fn class_attr(el: ElementRef) -> String {
    el.value().attr("class").unwrap_or("").to_string()
}

/// Classify one availability cell from its marker classes and text
fn classify_cell(classes: &str, text: &str, cfg: &TableConfig) -> SexSlot {
    let count_re = Regex::new(r"\((\d+)\s*avail\)").unwrap();
    if classes.contains(&cfg.limited_marker) {
        let count = count_re
            .captures(text)
            .and_then(|caps| caps[1].parse::<u32>().ok());
        return SexSlot {
            status: crate::types::AvailabilityStatus::Limited,
            available: count,
        };
    }
    if classes.contains(&cfg.available_marker) || classes.contains(&cfg.check_marker) {
        return SexSlot::available();
    }
    SexSlot::not_available()
}

/// Whether any descendant of the cell carries one of the marker classes
fn cell_marker(el: ElementRef, cfg: &TableConfig) -> Option<String> {
    let any = sel("*");
    let own = class_attr(el);
    if has_marker(&own, cfg) {
        return Some(own);
    }
    el.select(&any)
        .map(class_attr)
        .find(|classes| has_marker(classes, cfg))
}

fn has_marker(classes: &str, cfg: &TableConfig) -> bool {
    classes.contains(&cfg.available_marker)
        || classes.contains(&cfg.limited_marker)
        || classes.contains(&cfg.not_available_marker)
        || classes.contains(&cfg.check_marker)
}

/// Normalize a date-column × sex-row availability matrix.
///
/// Header cells after the corner are dates in the site's configured
/// format; each body row leads with a sex label. A header date that
/// fails to parse drops that column for every row rather than failing
/// the table.
pub fn parse_availability_matrix(table: ElementRef, cfg: &TableConfig) -> Vec<AvailabilityEntry> {
    let header_sel = sel("thead th, thead td");
    let dates: Vec<Option<String>> = table
        .select(&header_sel)
        .skip(1) // corner cell above the sex column
        .map(|th| parse_date(&cell_text(th), &cfg.date_format))
        .collect();

    let row_sel = sel("tbody tr");
    let td_sel = sel("td");

    let mut by_date: IndexMap<String, BTreeMap<String, SexSlot>> = IndexMap::new();
    for row in table.select(&row_sel) {
        let mut cells = row.select(&td_sel);
        let Some(sex) = cells.next().map(cell_text) else {
            continue;
        };
        if sex.is_empty() {
            continue;
        }
        for (idx, cell) in cells.enumerate() {
            let Some(Some(date)) = dates.get(idx) else {
                continue; // unparseable or missing header: skip column
            };
            let slot = match cell_marker(cell, cfg) {
                Some(classes) => classify_cell(&classes, &cell_text(cell), cfg),
                None => SexSlot::not_available(),
            };
            by_date.entry(date.clone()).or_default().insert(sex.clone(), slot);
        }
    }

    by_date
        .into_iter()
        .map(|(date, per_sex)| AvailabilityEntry { date, per_sex })
        .collect()
}

/// Normalize a grid of date cells, each holding the date on its first
/// line and one badge per sex (`F (3 avail)` etc.) below it.
pub fn parse_availability_cells(grid: ElementRef, cfg: &TableConfig) -> Vec<AvailabilityEntry> {
    let cell_sel = sel("td");
    let badge_sel = sel("span");

    let mut entries = Vec::new();
    for cell in grid.select(&cell_sel) {
        let text = cell_text(cell);
        if text.is_empty() {
            continue;
        }
        let Some(date_line) = text.lines().next() else {
            continue;
        };
        let Some(date) = parse_date(date_line, &cfg.date_format) else {
            continue;
        };

        let mut per_sex = BTreeMap::new();
        for badge in cell.select(&badge_sel) {
            let badge_text = cell_text(badge);
            let label = badge_text
                .split('(')
                .next()
                .unwrap_or("")
                .trim()
                .to_string();
            if label.is_empty() {
                continue;
            }
            let slot = classify_cell(&class_attr(badge), &badge_text, cfg);
            per_sex.insert(label, slot);
        }
        if !per_sex.is_empty() {
            entries.push(AvailabilityEntry { date, per_sex });
        }
    }
    entries
}
