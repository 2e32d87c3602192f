// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Idempotent normalization of raw extracted strings into typed fields:
//! whitespace collapsing, tracking-parameter stripping, price-range parsing,
//! unit canonicalization, and date parsing to UTC. [`clean_product`] and
//! [`clean_supplier`] compose these into the two record shapes the
//! coordinator persists.
//!
//! Every function here must satisfy `clean(clean(x)) == clean(x)` — see the
//! `proptest` suite at the bottom.

use chrono::{DateTime, TimeZone, Utc};
use marketsync_extract::{RawProduct, RawSupplier};

/// Collapse runs of whitespace (including full-width spaces) to single ASCII
/// spaces and trim the ends.
#[must_use]
pub fn normalize_whitespace(input: &str) -> String {
    input
        .split(|c: char| c.is_whitespace() || c == '\u{3000}')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

const TRACKING_PARAMS: &[&str] = &["utm_source", "utm_medium", "utm_campaign", "utm_term", "utm_content", "spm", "scm", "tracelog"];

/// Strip known tracking query parameters from a URL, leaving the rest of the
/// query string intact and sorted for determinism.
#[must_use]
pub fn strip_tracking_params(raw_url: &str) -> String {
    let Ok(mut url) = url::Url::parse(raw_url) else {
        return raw_url.to_string();
    };
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !TRACKING_PARAMS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        let mut pairs = kept;
        pairs.sort();
        let qs = pairs
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        url.set_query(Some(&qs));
    }
    url.to_string()
}

/// A parsed price range with its currency.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceRange {
    /// Lower bound, inclusive.
    pub min: f64,
    /// Upper bound, inclusive. Equal to `min` for a single-price listing.
    pub max: f64,
}

/// Parse a raw price string such as `"¥12.5"`, `"¥12.5 - ¥18.0"`, or
/// `"¥12.5/piece"` into a [`PriceRange`] and an ISO 4217 currency code.
///
/// Returns `None` if no numeric price could be found.
#[must_use]
pub fn parse_price_range(text: &str) -> Option<(PriceRange, String)> {
    let text = normalize_whitespace(text);
    let currency = if text.contains('¥') || text.contains("CNY") {
        "CNY"
    } else if text.contains('$') {
        "USD"
    } else if text.contains('€') {
        "EUR"
    } else {
        "CNY"
    };
    let before_unit = text.split('/').next().unwrap_or(&text);
    let numbers: Vec<f64> = before_unit
        .split(|c: char| !c.is_ascii_digit() && c != '.')
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<f64>().ok())
        .collect();
    match numbers.as_slice() {
        [] => None,
        [single] => Some((
            PriceRange {
                min: *single,
                max: *single,
            },
            currency.to_string(),
        )),
        [a, b, ..] => {
            let (min, max) = if a <= b { (*a, *b) } else { (*b, *a) };
            Some((PriceRange { min, max }, currency.to_string()))
        }
    }
}

/// Extract the unit a price is quoted per, e.g. `"piece"` from `"¥12.5/piece"`.
#[must_use]
pub fn parse_price_unit(text: &str) -> Option<String> {
    let text = normalize_whitespace(text);
    let raw_unit = text.split('/').nth(1)?;
    canonicalize_unit(raw_unit)
}

const UNIT_SYNONYMS: &[(&[&str], &str)] = &[
    (&["piece", "pieces", "pc", "pcs", "个", "件"], "piece"),
    (&["kg", "kilogram", "kilograms", "千克", "公斤"], "kg"),
    (&["m", "meter", "meters", "米"], "m"),
    (&["m2", "m²", "sqm", "square meter", "平方米"], "m²"),
    (&["pair", "pairs", "双", "对"], "pair"),
    (&["set", "sets", "套"], "set"),
];

/// Canonicalize a free-form unit string to one of `{piece, kg, m, m², pair, set}`.
///
/// Returns `None` for units outside this closed set (an unrecognized unit is
/// preserved verbatim by the caller, not silently discarded).
#[must_use]
pub fn canonicalize_unit(raw: &str) -> Option<String> {
    let normalized = normalize_whitespace(raw).to_lowercase();
    UNIT_SYNONYMS
        .iter()
        .find(|(synonyms, _)| synonyms.contains(&normalized.as_str()))
        .map(|(_, canonical)| (*canonical).to_string())
}

/// Parse a date string in one of the common marketplace formats into a UTC
/// timestamp. Bare dates are assumed to be at midnight UTC+8 (the reference
/// marketplace's timezone) and converted to UTC.
#[must_use]
pub fn parse_date_to_utc(text: &str) -> Option<DateTime<Utc>> {
    let text = normalize_whitespace(text);
    if let Ok(dt) = DateTime::parse_from_rfc3339(&text) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y/%m/%d %H:%M:%S"] {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(&text, fmt) {
            let offset = chrono::FixedOffset::east_opt(8 * 3600)?;
            return offset
                .from_local_datetime(&naive)
                .single()
                .map(|dt| dt.with_timezone(&Utc));
        }
    }
    for fmt in ["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(date) = chrono::NaiveDate::parse_from_str(&text, fmt) {
            let naive = date.and_hms_opt(0, 0, 0)?;
            let offset = chrono::FixedOffset::east_opt(8 * 3600)?;
            return offset
                .from_local_datetime(&naive)
                .single()
                .map(|dt| dt.with_timezone(&Utc));
        }
    }
    None
}

/// A [`RawProduct`] with every field normalized into plain, trimmed strings.
/// Numeric/typed fields are parsed by the validator, not here — this stage
/// only normalizes text, it does not reject anything.
#[derive(Debug, Clone, Default)]
pub struct CleanedProduct {
    /// Matched rule-set, carried through unchanged.
    pub rule_set: String,
    /// Normalized title.
    pub title: Option<String>,
    /// Normalized subtitle.
    pub subtitle: Option<String>,
    /// Parsed price range and currency, if `price_text` was parseable.
    pub price: Option<(PriceRange, String)>,
    /// Canonical price unit, if present.
    pub price_unit: Option<String>,
    /// Parsed minimum order quantity.
    pub moq: Option<u64>,
    /// Main image URL with tracking parameters stripped.
    pub main_image_url: Option<String>,
    /// Detail image URLs with tracking parameters stripped.
    pub detail_image_urls: Vec<String>,
    /// Specification rows with normalized whitespace.
    pub specifications: Vec<(String, String)>,
    /// Category id, verbatim.
    pub category_id: Option<String>,
    /// Normalized category name.
    pub category_name: Option<String>,
    /// Source id, verbatim (immutable identity, never normalized).
    pub source_id: Option<String>,
}

/// Clean a [`RawProduct`] into a [`CleanedProduct`]. Idempotent: cleaning an
/// already-cleaned product (re-run through [`RawProduct`]-shaped input)
/// produces the same output.
#[must_use]
pub fn clean_product(raw: &RawProduct) -> CleanedProduct {
    let moq = raw.moq_text.as_deref().and_then(parse_moq);
    CleanedProduct {
        rule_set: raw.rule_set.clone(),
        title: raw.title.as_deref().map(normalize_whitespace),
        subtitle: raw.subtitle.as_deref().map(normalize_whitespace),
        price: raw.price_text.as_deref().and_then(parse_price_range),
        price_unit: raw.price_text.as_deref().and_then(parse_price_unit),
        moq,
        main_image_url: raw.main_image_url.as_deref().map(strip_tracking_params),
        detail_image_urls: raw.detail_image_urls.iter().map(|u| strip_tracking_params(u)).collect(),
        specifications: raw
            .specifications
            .iter()
            .map(|(k, v)| (normalize_whitespace(k), normalize_whitespace(v)))
            .collect(),
        category_id: raw.category_id.clone(),
        category_name: raw.category_name.as_deref().map(normalize_whitespace),
        source_id: raw.source_id.clone(),
    }
}

fn parse_moq(text: &str) -> Option<u64> {
    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// A [`RawSupplier`] with every field normalized, plus a best-effort
/// province/city split and rating parse. Business type is not inferred here
/// — that classification stays with the validator/upsert layer, which has
/// visibility into the full product mix.
#[derive(Debug, Clone, Default)]
pub struct CleanedSupplier {
    /// Matched rule-set, carried through unchanged.
    pub rule_set: String,
    /// Source id, verbatim.
    pub source_id: Option<String>,
    /// Normalized display name.
    pub name: Option<String>,
    /// Normalized legal/company name.
    pub company_name: Option<String>,
    /// Province, if `location_text` split cleanly.
    pub province: Option<String>,
    /// City, if `location_text` split cleanly.
    pub city: Option<String>,
    /// Parsed rating in `[0.0, 5.0]`.
    pub rating: Option<f64>,
    /// Carried through unchanged.
    pub verified_badge_present: bool,
}

/// Clean a [`RawSupplier`] into a [`CleanedSupplier`].
#[must_use]
pub fn clean_supplier(raw: &RawSupplier) -> CleanedSupplier {
    let (province, city) = raw
        .location_text
        .as_deref()
        .map(normalize_whitespace)
        .and_then(|text| {
            let mut parts = text.splitn(2, |c: char| c == ' ' || c == '-' || c == '·');
            let province = parts.next().map(str::to_string);
            let city = parts.next().map(str::to_string);
            province.map(|p| (Some(p), city))
        })
        .unwrap_or((None, None));

    CleanedSupplier {
        rule_set: raw.rule_set.clone(),
        source_id: raw.source_id.clone(),
        name: raw.name.as_deref().map(normalize_whitespace),
        company_name: raw.company_name.as_deref().map(normalize_whitespace),
        province,
        city,
        rating: raw.rating_text.as_deref().and_then(parse_rating),
        verified_badge_present: raw.verified_badge_present,
    }
}

fn parse_rating(text: &str) -> Option<f64> {
    let text = normalize_whitespace(text);
    let before_scale = text.split('/').next().unwrap_or(&text);
    let numeric: String = before_scale.chars().filter(|c| c.is_ascii_digit() || *c == '.').collect();
    let value: f64 = numeric.parse().ok()?;
    (0.0..=5.0).contains(&value).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn whitespace_normalization_is_idempotent() {
        let input = "  foo\u{3000}\u{3000}bar\t baz  ";
        let once = normalize_whitespace(input);
        let twice = normalize_whitespace(&once);
        assert_eq!(once, twice);
        assert_eq!(once, "foo bar baz");
    }

    #[test]
    fn strips_utm_params_but_keeps_others() {
        let url = "https://example.com/p?id=1&utm_source=wechat&utm_campaign=spring";
        let cleaned = strip_tracking_params(url);
        assert_eq!(cleaned, "https://example.com/p?id=1");
    }

    #[test]
    fn parses_single_and_range_prices() {
        let (range, currency) = parse_price_range("¥12.5").unwrap();
        assert_eq!(range, PriceRange { min: 12.5, max: 12.5 });
        assert_eq!(currency, "CNY");

        let (range, _) = parse_price_range("¥12.5 - ¥18.0").unwrap();
        assert_eq!(range, PriceRange { min: 12.5, max: 18.0 });
    }

    #[test]
    fn parses_price_with_unit() {
        let unit = parse_price_unit("¥12.5/piece").unwrap();
        assert_eq!(unit, "piece");
    }

    #[test]
    fn unit_synonyms_canonicalize() {
        assert_eq!(canonicalize_unit("个").as_deref(), Some("piece"));
        assert_eq!(canonicalize_unit("Kilograms").as_deref(), Some("kg"));
        assert_eq!(canonicalize_unit("banana"), None);
    }

    #[test]
    fn cleans_supplier_location_and_rating() {
        let raw = RawSupplier {
            rule_set: "default".to_string(),
            source_id: Some("SUP-1".to_string()),
            name: Some("  Huarong Hardware Co  ".to_string()),
            company_name: Some("Huarong Hardware Co., Ltd".to_string()),
            location_text: Some("Guangdong Dongguan".to_string()),
            rating_text: Some("4.8 / 5.0".to_string()),
            verified_badge_present: true,
        };
        let cleaned = clean_supplier(&raw);
        assert_eq!(cleaned.name.as_deref(), Some("Huarong Hardware Co"));
        assert_eq!(cleaned.province.as_deref(), Some("Guangdong"));
        assert_eq!(cleaned.city.as_deref(), Some("Dongguan"));
        assert_eq!(cleaned.rating, Some(4.8));
        assert!(cleaned.verified_badge_present);
    }

    #[test]
    fn date_formats_convert_to_utc() {
        let dt = parse_date_to_utc("2024-05-01 12:00:00").unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-05-01T04:00:00+00:00");
        let bare = parse_date_to_utc("2024-05-01").unwrap();
        assert_eq!(bare.to_rfc3339(), "2024-04-30T16:00:00+00:00");
    }

    proptest! {
        #[test]
        fn whitespace_normalize_is_idempotent_prop(s in ".{0,50}") {
            let once = normalize_whitespace(&s);
            let twice = normalize_whitespace(&once);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn unit_canonicalize_is_idempotent_prop(s in "[a-zA-Z ]{0,20}") {
            if let Some(canonical) = canonicalize_unit(&s) {
                let again = canonicalize_unit(&canonical);
                prop_assert_eq!(Some(canonical), again);
            }
        }
    }
}
