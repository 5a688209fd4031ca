//! Fuzzy mapping of source column headers onto canonical Shopify import headers.

use std::collections::BTreeMap;

use similar::TextDiff;

/// Source header → canonical header, `None` when nothing was close enough.
pub type HeaderMapping = BTreeMap<String, Option<String>>;

pub const SHOPIFY_HEADERS: &[&str] = &[
    "Handle",
    "Title",
    "Body (HTML)",
    "Vendor",
    "Type",
    "Tags",
    "Variant SKU",
    "Variant Price",
    "Variant Requires Shipping",
    "Image Src",
    "Image Alt Text",
];

/// Minimum [`similarity`] for a header to be mapped.
pub const MATCH_CUTOFF: f64 = 0.6;

pub fn map_headers<S: AsRef<str>>(headers: &[S]) -> HeaderMapping {
    headers
        .iter()
        .map(|header| {
            let header = header.as_ref();
            let matched = closest_match(header, SHOPIFY_HEADERS, MATCH_CUTOFF);
            (header.to_string(), matched.map(str::to_string))
        })
        .collect()
}

/// The candidate most similar to `word`, if any reaches `cutoff`. Ties go to the candidate
/// that sorts last.
pub fn closest_match<'a>(word: &str, candidates: &[&'a str], cutoff: f64) -> Option<&'a str> {
    candidates
        .iter()
        .map(|candidate| (similarity(word, candidate), *candidate))
        .filter(|(score, _)| *score >= cutoff)
        .max_by(|(a, a_name), (b, b_name)| a.total_cmp(b).then_with(|| a_name.cmp(b_name)))
        .map(|(_, candidate)| candidate)
}

/// Twice the number of matched characters over the total number of characters, in
/// `0.0..=1.0`. Two empty strings are a full match.
pub fn similarity(a: &str, b: &str) -> f64 {
    f64::from(TextDiff::from_chars(a, b).ratio())
}
