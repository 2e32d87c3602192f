// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Selects a tagged CSS selector rule-set for an HTML page by confidence
//! score, then pulls raw (uncleaned) field strings through it.
//!
//! The scoring shape — score every known rule-set, keep the highest-confidence
//! match above a floor, carry an evidence trail — is adapted from the
//! ancestor workspace's `DialectDetector` (`abp-dialect::DialectDetector`),
//! swapping JSON-key heuristics for CSS-selector hits.

use scraper::{Html, Selector};

/// A page layout could not be matched to any known rule-set confidently enough.
#[derive(Debug, Clone)]
pub struct MalformedPage {
    /// The best-scoring rule-set and its score, if any rule-set scored above zero.
    pub best_guess: Option<(String, f64)>,
    /// Evidence collected for the best guess, if any.
    pub evidence: Vec<String>,
}

impl std::fmt::Display for MalformedPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.best_guess {
            Some((name, score)) => write!(f, "no rule-set matched confidently (closest: {name} at {score:.2})"),
            None => write!(f, "no rule-set matched"),
        }
    }
}

impl std::error::Error for MalformedPage {}

/// Minimum confidence required to accept a rule-set match.
pub const CONFIDENCE_FLOOR: f64 = 0.5;

/// The kind of page a rule-set is written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    /// A single product's detail page.
    ProductDetail,
    /// A supplier's profile page.
    SupplierProfile,
}

/// Raw, uncleaned strings pulled off a product detail page.
#[derive(Debug, Clone, Default)]
pub struct RawProduct {
    /// Matched rule-set name, for diagnostics and `SyncRun::recommendations`.
    pub rule_set: String,
    /// Title text.
    pub title: Option<String>,
    /// Subtitle text.
    pub subtitle: Option<String>,
    /// Raw price text, e.g. `"¥12.5 - ¥18.0"`.
    pub price_text: Option<String>,
    /// Raw MOQ text.
    pub moq_text: Option<String>,
    /// Main image URL.
    pub main_image_url: Option<String>,
    /// Detail image URLs, in document order.
    pub detail_image_urls: Vec<String>,
    /// Raw key/value specification rows.
    pub specifications: Vec<(String, String)>,
    /// Source category id, if present in a data attribute.
    pub category_id: Option<String>,
    /// Source category display name.
    pub category_name: Option<String>,
    /// The external source id for this product.
    pub source_id: Option<String>,
}

/// Raw, uncleaned strings pulled off a supplier profile page.
#[derive(Debug, Clone, Default)]
pub struct RawSupplier {
    /// Matched rule-set name.
    pub rule_set: String,
    /// Supplier source id.
    pub source_id: Option<String>,
    /// Display name.
    pub name: Option<String>,
    /// Legal/company name.
    pub company_name: Option<String>,
    /// Raw province/city text.
    pub location_text: Option<String>,
    /// Raw rating text.
    pub rating_text: Option<String>,
    /// Whether a "verified" badge element was present.
    pub verified_badge_present: bool,
}

/// A named, versioned set of CSS selectors for one page layout, plus the
/// marker selectors used to score how well a document matches it.
pub struct RuleSet {
    /// Stable rule-set identifier, e.g. `"product_detail_v3"`.
    pub name: &'static str,
    /// The page kind this rule-set targets.
    pub kind: PageKind,
    markers: Vec<(&'static str, f64)>,
    title: Option<&'static str>,
    subtitle: Option<&'static str>,
    price: Option<&'static str>,
    moq: Option<&'static str>,
    main_image: Option<&'static str>,
    detail_images: Option<&'static str>,
    spec_rows: Option<&'static str>,
    category_id_attr: Option<(&'static str, &'static str)>,
    category_name: Option<&'static str>,
    source_id_attr: Option<(&'static str, &'static str)>,
    name_sel: Option<&'static str>,
    company_name_sel: Option<&'static str>,
    location_sel: Option<&'static str>,
    rating_sel: Option<&'static str>,
    verified_badge_sel: Option<&'static str>,
}

fn select_one(doc: &Html, sel: &str) -> Option<String> {
    let selector = Selector::parse(sel).ok()?;
    doc.select(&selector)
        .next()
        .map(|e| e.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn select_attr(doc: &Html, sel: &str, attr: &str) -> Option<String> {
    let selector = Selector::parse(sel).ok()?;
    doc.select(&selector).next().and_then(|e| e.value().attr(attr)).map(str::to_string)
}

fn select_many(doc: &Html, sel: &str) -> Vec<String> {
    let Ok(selector) = Selector::parse(sel) else { return Vec::new() };
    doc.select(&selector)
        .filter_map(|e| e.value().attr("src").or_else(|| e.value().attr("href")))
        .map(str::to_string)
        .collect()
}

fn count_matches(doc: &Html, sel: &str) -> usize {
    let Ok(selector) = Selector::parse(sel) else { return 0 };
    doc.select(&selector).count()
}

impl RuleSet {
    fn score(&self, doc: &Html) -> (f64, Vec<String>) {
        let mut score = 0.0;
        let mut evidence = Vec::new();
        for (marker, weight) in &self.markers {
            if count_matches(doc, marker) > 0 {
                score += weight;
                evidence.push(format!("matched marker `{marker}`"));
            }
        }
        (score.min(1.0), evidence)
    }

    fn extract_product(&self, doc: &Html) -> RawProduct {
        RawProduct {
            rule_set: self.name.to_string(),
            title: self.title.and_then(|s| select_one(doc, s)),
            subtitle: self.subtitle.and_then(|s| select_one(doc, s)),
            price_text: self.price.and_then(|s| select_one(doc, s)),
            moq_text: self.moq.and_then(|s| select_one(doc, s)),
            main_image_url: self.main_image.and_then(|s| select_attr(doc, s, "src")),
            detail_image_urls: self.detail_images.map(|s| select_many(doc, s)).unwrap_or_default(),
            specifications: self
                .spec_rows
                .map(|s| extract_spec_rows(doc, s))
                .unwrap_or_default(),
            category_id: self.category_id_attr.and_then(|(s, a)| select_attr(doc, s, a)),
            category_name: self.category_name.and_then(|s| select_one(doc, s)),
            source_id: self.source_id_attr.and_then(|(s, a)| select_attr(doc, s, a)),
        }
    }

    fn extract_supplier(&self, doc: &Html) -> RawSupplier {
        RawSupplier {
            rule_set: self.name.to_string(),
            source_id: self.source_id_attr.and_then(|(s, a)| select_attr(doc, s, a)),
            name: self.name_sel.and_then(|s| select_one(doc, s)),
            company_name: self.company_name_sel.and_then(|s| select_one(doc, s)),
            location_text: self.location_sel.and_then(|s| select_one(doc, s)),
            rating_text: self.rating_sel.and_then(|s| select_one(doc, s)),
            verified_badge_present: self
                .verified_badge_sel
                .is_some_and(|s| count_matches(doc, s) > 0),
        }
    }
}

fn extract_spec_rows(doc: &Html, row_selector: &str) -> Vec<(String, String)> {
    let Ok(selector) = Selector::parse(row_selector) else { return Vec::new() };
    doc.select(&selector)
        .filter_map(|row| {
            let mut cells = row.text().map(str::trim).filter(|t| !t.is_empty());
            let key = cells.next()?.to_string();
            let value = cells.next()?.to_string();
            Some((key, value))
        })
        .collect()
}

/// The default rule-sets this build ships, covering two generations of
/// product-detail layout and one supplier-profile layout.
#[must_use]
pub fn default_rule_sets() -> Vec<RuleSet> {
    vec![
        RuleSet {
            name: "product_detail_v1",
            kind: PageKind::ProductDetail,
            markers: vec![
                (".product-title", 0.3),
                (".price-range", 0.3),
                ("[data-product-id]", 0.4),
            ],
            title: Some(".product-title"),
            subtitle: Some(".product-subtitle"),
            price: Some(".price-range"),
            moq: Some(".moq-value"),
            main_image: Some(".main-image img"),
            detail_images: Some(".detail-images img"),
            spec_rows: Some("table.specs tr"),
            category_id_attr: Some((".breadcrumb [data-category-id]", "data-category-id")),
            category_name: Some(".breadcrumb .current"),
            source_id_attr: Some(("[data-product-id]", "data-product-id")),
            name_sel: None,
            company_name_sel: None,
            location_sel: None,
            rating_sel: None,
            verified_badge_sel: None,
        },
        RuleSet {
            name: "product_detail_v2",
            kind: PageKind::ProductDetail,
            markers: vec![
                ("h1.pdp-title", 0.35),
                (".pdp-price", 0.35),
                ("[data-sku]", 0.3),
            ],
            title: Some("h1.pdp-title"),
            subtitle: Some(".pdp-subtitle"),
            price: Some(".pdp-price"),
            moq: Some(".pdp-moq"),
            main_image: Some(".pdp-gallery img.main"),
            detail_images: Some(".pdp-gallery img.thumb"),
            spec_rows: Some(".pdp-specs .row"),
            category_id_attr: Some(("nav.crumbs [data-cat]", "data-cat")),
            category_name: Some("nav.crumbs .active"),
            source_id_attr: Some(("[data-sku]", "data-sku")),
            name_sel: None,
            company_name_sel: None,
            location_sel: None,
            rating_sel: None,
            verified_badge_sel: None,
        },
        RuleSet {
            name: "supplier_profile_v1",
            kind: PageKind::SupplierProfile,
            markers: vec![
                (".company-name", 0.3),
                (".supplier-id", 0.4),
                (".verified-badge, .company-rating", 0.3),
            ],
            title: None,
            subtitle: None,
            price: None,
            moq: None,
            main_image: None,
            detail_images: None,
            spec_rows: None,
            category_id_attr: None,
            category_name: None,
            source_id_attr: Some((".supplier-id", "data-supplier-id")),
            name_sel: Some(".shop-name"),
            company_name_sel: Some(".company-name"),
            location_sel: Some(".company-location"),
            rating_sel: Some(".company-rating"),
            verified_badge_sel: Some(".verified-badge"),
        },
    ]
}

/// Picks the highest-confidence [`RuleSet`] of `kind` for `html` and runs it.
pub struct Extractor {
    rule_sets: Vec<RuleSet>,
}

impl Extractor {
    /// Build an extractor from a set of rule-sets (see [`default_rule_sets`]).
    #[must_use]
    pub fn new(rule_sets: Vec<RuleSet>) -> Self {
        Self { rule_sets }
    }

    fn best_match(&self, doc: &Html, kind: PageKind) -> Result<(&RuleSet, Vec<String>), MalformedPage> {
        let mut best: Option<(&RuleSet, f64, Vec<String>)> = None;
        for rule_set in self.rule_sets.iter().filter(|r| r.kind == kind) {
            let (score, evidence) = rule_set.score(doc);
            if score > 0.0 && best.as_ref().is_none_or(|(_, s, _)| score > *s) {
                best = Some((rule_set, score, evidence));
            }
        }
        match best {
            Some((rule_set, score, evidence)) if score >= CONFIDENCE_FLOOR => Ok((rule_set, evidence)),
            Some((rule_set, score, evidence)) => Err(MalformedPage {
                best_guess: Some((rule_set.name.to_string(), score)),
                evidence,
            }),
            None => Err(MalformedPage {
                best_guess: None,
                evidence: Vec::new(),
            }),
        }
    }

    /// Extract a [`RawProduct`] from `html`.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedPage`] if no rule-set scores at or above
    /// [`CONFIDENCE_FLOOR`].
    pub fn extract_product(&self, html: &str) -> Result<RawProduct, MalformedPage> {
        let doc = Html::parse_document(html);
        let (rule_set, evidence) = self.best_match(&doc, PageKind::ProductDetail)?;
        tracing::debug!(target: "marketsync.extract", rule_set = rule_set.name, ?evidence, "matched rule-set");
        Ok(rule_set.extract_product(&doc))
    }

    /// Extract a [`RawSupplier`] from `html`.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedPage`] if no rule-set scores at or above
    /// [`CONFIDENCE_FLOOR`].
    pub fn extract_supplier(&self, html: &str) -> Result<RawSupplier, MalformedPage> {
        let doc = Html::parse_document(html);
        let (rule_set, evidence) = self.best_match(&doc, PageKind::SupplierProfile)?;
        tracing::debug!(target: "marketsync.extract", rule_set = rule_set.name, ?evidence, "matched rule-set");
        Ok(rule_set.extract_supplier(&doc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const V1_PAGE: &str = r#"
        <html><body>
        <div data-product-id="SRC-1">
        <h1 class="product-title">Steel Bolt</h1>
        <div class="price-range">¥1.2 - ¥1.8</div>
        <div class="moq-value">100 pieces</div>
        <div class="main-image"><img src="https://example.com/a.jpg"></div>
        </div>
        </body></html>
    "#;

    const UNKNOWN_PAGE: &str = "<html><body><p>hello</p></body></html>";

    #[test]
    fn matches_v1_rule_set_with_high_confidence() {
        let extractor = Extractor::new(default_rule_sets());
        let product = extractor.extract_product(V1_PAGE).unwrap();
        assert_eq!(product.rule_set, "product_detail_v1");
        assert_eq!(product.title.as_deref(), Some("Steel Bolt"));
        assert_eq!(product.source_id.as_deref(), Some("SRC-1"));
    }

    #[test]
    fn unknown_layout_is_malformed() {
        let extractor = Extractor::new(default_rule_sets());
        let err = extractor.extract_product(UNKNOWN_PAGE).unwrap_err();
        assert!(err.best_guess.is_none());
    }

    #[test]
    fn confidence_floor_rejects_partial_matches() {
        let partial = r#"<html><body><div data-product-id="x"></div></body></html>"#;
        let extractor = Extractor::new(default_rule_sets());
        let err = extractor.extract_product(partial).unwrap_err();
        let (name, score) = err.best_guess.unwrap();
        assert_eq!(name, "product_detail_v1");
        assert!(score < CONFIDENCE_FLOOR);
    }
}
