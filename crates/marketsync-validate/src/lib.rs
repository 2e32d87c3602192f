// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Field and cross-field validation that accumulates every violation found
//! rather than failing fast, with a severity dimension on each finding.
//!
//! Adapted from the ancestor workspace's `RequestValidator::validate_work_order`
//! (`abp-daemon::validation`): one pass per entity that pushes into a shared
//! `Vec` instead of short-circuiting on the first problem. Here each pushed
//! item also carries a `(field, severity, code, message)` shape instead of a
//! bare string, and `error`-severity findings gate persistence while
//! `warning`/`info` do not.

use marketsync_core::{ImageKind, Product, ProductImage, Supplier};
use serde::{Deserialize, Serialize};

/// How serious a [`Finding`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Blocks persistence of the record.
    Error,
    /// Persisted, but surfaced to operators.
    Warning,
    /// Informational only.
    Info,
}

/// A single validation finding.
#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    /// Dotted field path the finding concerns.
    pub field: String,
    /// Severity of the finding.
    pub severity: Severity,
    /// Stable machine-readable code, e.g. `"price_range_inverted"`.
    pub code: &'static str,
    /// Human-readable message.
    pub message: String,
}

/// All findings for one validated entity.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    /// Every finding, in the order discovered.
    pub findings: Vec<Finding>,
}

impl ValidationReport {
    fn push(&mut self, field: &str, severity: Severity, code: &'static str, message: impl Into<String>) {
        self.findings.push(Finding {
            field: field.to_string(),
            severity,
            code,
            message: message.into(),
        });
    }

    /// `true` if persistence should be blocked (any `Error`-severity finding).
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.findings.iter().any(|f| f.severity == Severity::Error)
    }

    /// Findings of exactly this severity.
    #[must_use]
    pub fn of_severity(&self, severity: Severity) -> Vec<&Finding> {
        self.findings.iter().filter(|f| f.severity == severity).collect()
    }
}

const MAX_TITLE_LENGTH: usize = 2_000;
const MAX_RATING: f64 = 5.0;

/// Validate a [`Product`], accumulating every violation.
#[must_use]
pub fn validate_product(product: &Product) -> ValidationReport {
    let mut report = ValidationReport::default();

    if product.source_id.trim().is_empty() {
        report.push("source_id", Severity::Error, "missing_source_id", "source_id must not be empty");
    }
    if product.title.trim().is_empty() {
        report.push("title", Severity::Error, "missing_title", "title must not be empty");
    } else if product.title.len() > MAX_TITLE_LENGTH {
        report.push(
            "title",
            Severity::Warning,
            "title_too_long",
            format!("title exceeds {MAX_TITLE_LENGTH} characters"),
        );
    }

    if product.price_min.is_nan() || product.price_min.is_infinite() {
        report.push("price_min", Severity::Error, "price_not_finite", "price_min must be finite");
    }
    if product.price_max.is_nan() || product.price_max.is_infinite() {
        report.push("price_max", Severity::Error, "price_not_finite", "price_max must be finite");
    }
    if product.price_min < 0.0 || product.price_max < 0.0 {
        report.push("price_min", Severity::Error, "price_negative", "prices must not be negative");
    }
    if product.price_min > product.price_max {
        report.push(
            "price_min",
            Severity::Error,
            "price_range_inverted",
            format!("price_min ({}) exceeds price_max ({})", product.price_min, product.price_max),
        );
    }

    if product.currency.len() != 3 || !product.currency.chars().all(|c| c.is_ascii_uppercase()) {
        report.push(
            "currency",
            Severity::Warning,
            "currency_not_iso4217",
            format!("currency `{}` does not look like an ISO 4217 code", product.currency),
        );
    }

    if let Some(rating) = product.rating {
        if !(0.0..=MAX_RATING).contains(&rating) {
            report.push("rating", Severity::Error, "rating_out_of_range", "rating must be in [0.0, 5.0]");
        }
    }

    if product.moq == Some(0) {
        report.push("moq", Severity::Warning, "moq_zero", "moq of zero is unusual, treating as unset would be safer");
    }

    if product.main_image_url.is_none() {
        report.push("main_image_url", Severity::Info, "missing_main_image", "no main image url present");
    }

    report
}

/// Validate a [`Supplier`], accumulating every violation.
#[must_use]
pub fn validate_supplier(supplier: &Supplier) -> ValidationReport {
    let mut report = ValidationReport::default();

    if supplier.source_id.trim().is_empty() {
        report.push("source_id", Severity::Error, "missing_source_id", "source_id must not be empty");
    }
    if supplier.name.trim().is_empty() {
        report.push("name", Severity::Error, "missing_name", "name must not be empty");
    }
    if let Some(rating) = supplier.rating {
        if !(0.0..=MAX_RATING).contains(&rating) {
            report.push("rating", Severity::Error, "rating_out_of_range", "rating must be in [0.0, 5.0]");
        }
    }
    if let Some(rate) = supplier.response_rate {
        if !(0.0..=1.0).contains(&rate) {
            report.push("response_rate", Severity::Error, "response_rate_out_of_range", "response_rate must be in [0.0, 1.0]");
        }
    }
    if supplier.verified_flag && supplier.verification_level.is_none() {
        report.push(
            "verification_level",
            Severity::Warning,
            "verified_without_level",
            "supplier is marked verified but carries no verification_level",
        );
    }

    report
}

/// Validate the full set of [`ProductImage`] rows belonging to one product,
/// enforcing `ProductImage`'s documented cross-row invariants: exactly one
/// `Main` image, and `order_index` unique per `kind`.
#[must_use]
pub fn validate_product_images(images: &[ProductImage]) -> ValidationReport {
    let mut report = ValidationReport::default();

    let main_count = images.iter().filter(|i| i.kind == ImageKind::Main).count();
    match main_count {
        0 => report.push("kind", Severity::Warning, "no_main_image", "product has no Main image"),
        1 => {}
        n => report.push("kind", Severity::Error, "multiple_main_images", format!("product has {n} Main images, expected exactly one")),
    }

    let mut seen: std::collections::HashSet<(ImageKind, u32)> = std::collections::HashSet::new();
    for image in images {
        if !seen.insert((image.kind, image.order_index)) {
            report.push(
                "order_index",
                Severity::Error,
                "duplicate_order_index",
                format!("order_index {} duplicated for kind {:?}", image.order_index, image.kind),
            );
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use marketsync_core::{BusinessType, ProductStatus, SyncStatus};
    use uuid::Uuid;

    fn base_product() -> Product {
        Product {
            id: Uuid::new_v4(),
            source_id: "SRC-1".to_string(),
            title: "Widget".to_string(),
            subtitle: None,
            description: None,
            price_min: 1.0,
            price_max: 2.0,
            currency: "CNY".to_string(),
            moq: Some(10),
            price_unit: None,
            main_image_url: Some("https://example.com/a.jpg".to_string()),
            detail_images: vec![],
            specifications: Default::default(),
            supplier_ref: Uuid::new_v4(),
            canonical_of: None,
            sales_count: 0,
            review_count: 0,
            rating: Some(4.5),
            category_id: None,
            category_name: None,
            status: ProductStatus::Active,
            sync_status: SyncStatus::Pending,
            last_sync_time: None,
            deleted: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn valid_product_has_no_errors() {
        let report = validate_product(&base_product());
        assert!(!report.has_errors());
    }

    #[test]
    fn accumulates_multiple_errors_instead_of_short_circuiting() {
        let mut product = base_product();
        product.source_id = String::new();
        product.title = String::new();
        product.price_min = 10.0;
        product.price_max = 5.0;
        let report = validate_product(&product);
        let codes: Vec<&str> = report.findings.iter().map(|f| f.code).collect();
        assert!(codes.contains(&"missing_source_id"));
        assert!(codes.contains(&"missing_title"));
        assert!(codes.contains(&"price_range_inverted"));
        assert!(report.has_errors());
    }

    #[test]
    fn out_of_range_rating_is_an_error() {
        let mut product = base_product();
        product.rating = Some(9.0);
        let report = validate_product(&product);
        assert!(report.has_errors());
    }

    #[test]
    fn missing_main_image_is_informational_only() {
        let mut product = base_product();
        product.main_image_url = None;
        let report = validate_product(&product);
        assert!(!report.has_errors());
        assert_eq!(report.of_severity(Severity::Info).len(), 1);
    }

    #[test]
    fn verified_without_level_is_a_warning() {
        let supplier = Supplier {
            id: Uuid::new_v4(),
            source_id: "S1".to_string(),
            name: "Acme".to_string(),
            company_name: "Acme Co".to_string(),
            contact: Default::default(),
            province: None,
            city: None,
            rating: Some(4.0),
            response_rate: Some(0.9),
            product_count: 0,
            business_type: BusinessType::Manufacturer,
            main_products: vec![],
            verified_flag: true,
            verification_level: None,
            deleted: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let report = validate_supplier(&supplier);
        assert!(!report.has_errors());
        assert_eq!(report.of_severity(Severity::Warning).len(), 1);
    }

    fn sample_image(kind: ImageKind, order_index: u32) -> ProductImage {
        ProductImage {
            id: Uuid::new_v4(),
            product_ref: Uuid::new_v4(),
            url: "https://example.com/a.jpg".to_string(),
            kind,
            order_index,
            alt_text: None,
            file_size: None,
            width: None,
            height: None,
        }
    }

    #[test]
    fn single_main_image_has_no_errors() {
        let images = vec![sample_image(ImageKind::Main, 0), sample_image(ImageKind::Detail, 0)];
        let report = validate_product_images(&images);
        assert!(!report.has_errors());
    }

    #[test]
    fn two_main_images_is_an_error() {
        let images = vec![sample_image(ImageKind::Main, 0), sample_image(ImageKind::Main, 1)];
        let report = validate_product_images(&images);
        assert!(report.has_errors());
    }

    #[test]
    fn duplicate_order_index_within_a_kind_is_an_error() {
        let images = vec![sample_image(ImageKind::Detail, 0), sample_image(ImageKind::Detail, 0)];
        let report = validate_product_images(&images);
        let codes: Vec<&str> = report.findings.iter().map(|f| f.code).collect();
        assert!(codes.contains(&"duplicate_order_index"));
    }

    #[test]
    fn same_order_index_across_different_kinds_is_fine() {
        let images = vec![sample_image(ImageKind::Main, 0), sample_image(ImageKind::Detail, 0)];
        let report = validate_product_images(&images);
        assert!(!report.has_errors());
    }
}
