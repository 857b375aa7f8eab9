//! Breed name cleaning and URL-derived naming.

use regex::Regex;

/// Clean a raw breed name into the canonical directory-safe form.
///
/// Strips boilerplate tokens ("chicken", "breed", "chicks", "poultry"),
/// removes parenthetical asides, collapses non-alphanumeric runs into
/// single underscores and trims boundary underscores. Returns an empty
/// string when nothing usable remains; callers fall back to the URL slug.
pub fn clean_breed_name(name: &str) -> String {
    let mut cleaned = name.to_string();

    // Drop parenthetical asides first so their contents never survive
    let parens = Regex::new(r"\([^)]*\)").unwrap();
    cleaned = parens.replace_all(&cleaned, " ").to_string();

    let boilerplate = Regex::new(r"(?i)\b(chickens?|chicks?|breeds?|poultry)\b").unwrap();
    cleaned = boilerplate.replace_all(&cleaned, " ").to_string();

    let separators = Regex::new(r"[^a-zA-Z0-9]+").unwrap();
    cleaned = separators.replace_all(&cleaned, "_").to_string();

    cleaned.trim_matches('_').to_string()
}

/// Derive a title-cased name from the product URL slug.
///
/// `https://shop.example/products/barred-rock?variant=1` -> `Barred_Rock`
pub fn name_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let slug = path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path);

    let titled = slug
        .split(['-', '_'])
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ");

    clean_breed_name(&titled)
}

/// Resolve the final name for a record: cleaned candidate if usable,
/// URL slug otherwise. Never returns an empty string for a non-empty URL.
pub fn resolve_breed_name(candidate: Option<&str>, url: &str) -> String {
    if let Some(raw) = candidate {
        let cleaned = clean_breed_name(raw);
        if !cleaned.is_empty() {
            return cleaned;
        }
    }
    name_from_url(url)
}

/// Strip size-limiting query parameters and CDN size suffixes from an
/// image URL so the highest-resolution variant is requested.
pub fn strip_size_limits(url: &str) -> String {
    let mut cleaned = url.split('?').next().unwrap_or(url).to_string();

    for suffix in ["_small", "_medium", "_large", "_100x", "_200x", "_400x"] {
        cleaned = cleaned.replace(suffix, "");
    }
    let dims = Regex::new(r"_\d+x\d+").unwrap();
    cleaned = dims.replace_all(&cleaned, "").to_string();
    let width = Regex::new(r"_\d+x").unwrap();
    cleaned = width.replace_all(&cleaned, "").to_string();

    cleaned
}

/// Pick the highest-resolution candidate out of a `srcset` attribute
pub fn largest_srcset_candidate(srcset: &str) -> Option<String> {
    srcset
        .split(',')
        .last()
        .map(|part| part.trim().split(' ').next().unwrap_or("").to_string())
        .filter(|url| !url.is_empty())
}
