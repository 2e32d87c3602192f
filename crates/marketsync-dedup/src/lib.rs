// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Cross-listing duplicate detection: a weighted composite similarity score
//! over title/price/supplier/MOQ, and deterministic master selection among a
//! group of duplicates.
//!
//! The scored-matching shape is adapted from the ancestor workspace's
//! `CapabilityNegotiator::best_match` (`abp-core::negotiate`): score every
//! candidate, keep matches above a floor, and break ties with an explicit,
//! documented comparator rather than the first element encountered.
//!
//! Title similarity for non-Latin titles uses character-trigram Jaccard
//! rather than a token-based measure, since CJK titles are rarely
//! whitespace-segmented into comparable tokens.

use chrono::{DateTime, Utc};
use marketsync_core::Product;
use std::collections::BTreeSet;
use uuid::Uuid;

/// Similarity score at or above which two products are considered duplicates.
pub const SIMILARITY_THRESHOLD: f64 = 0.85;

/// Per-field weights in the composite similarity score. Must sum to `1.0`.
#[derive(Debug, Clone, Copy)]
pub struct SimilarityWeights {
    /// Weight for title similarity.
    pub title: f64,
    /// Weight for price_min closeness.
    pub price: f64,
    /// Weight for same-supplier agreement.
    pub supplier: f64,
    /// Weight for MOQ closeness.
    pub moq: f64,
}

impl Default for SimilarityWeights {
    fn default() -> Self {
        Self {
            title: 0.4,
            price: 0.3,
            supplier: 0.2,
            moq: 0.1,
        }
    }
}

/// Character trigrams of `s`, lower-cased, whitespace-collapsed.
fn trigrams(s: &str) -> BTreeSet<String> {
    let normalized: String = s.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ");
    let chars: Vec<char> = normalized.chars().collect();
    if chars.len() < 3 {
        return BTreeSet::from([normalized]);
    }
    chars
        .windows(3)
        .map(|w| w.iter().collect::<String>())
        .collect()
}

/// Character-trigram Jaccard similarity in `[0.0, 1.0]`.
#[must_use]
pub fn trigram_jaccard(a: &str, b: &str) -> f64 {
    let ta = trigrams(a);
    let tb = trigrams(b);
    if ta.is_empty() && tb.is_empty() {
        return 1.0;
    }
    let intersection = ta.intersection(&tb).count();
    let union = ta.union(&tb).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

fn closeness(a: f64, b: f64) -> f64 {
    let denom = a.abs().max(b.abs()).max(1.0);
    1.0 - ((a - b).abs() / denom).min(1.0)
}

/// Compute the weighted composite similarity between two products.
#[must_use]
pub fn composite_similarity(a: &Product, b: &Product, weights: &SimilarityWeights) -> f64 {
    let title_sim = trigram_jaccard(&a.title, &b.title);
    let price_sim = closeness(a.price_min, b.price_min);
    let supplier_sim = if a.supplier_ref == b.supplier_ref { 1.0 } else { 0.0 };
    let moq_sim = match (a.moq, b.moq) {
        (Some(x), Some(y)) => closeness(x as f64, y as f64),
        (None, None) => 1.0,
        _ => 0.5,
    };

    weights.title * title_sim + weights.price * price_sim + weights.supplier * supplier_sim + weights.moq * moq_sim
}

/// `true` if `a` and `b` score at or above [`SIMILARITY_THRESHOLD`].
#[must_use]
pub fn is_duplicate(a: &Product, b: &Product, weights: &SimilarityWeights) -> bool {
    composite_similarity(a, b, weights) >= SIMILARITY_THRESHOLD
}

/// A product plus the supplier-verification flag needed for master selection.
#[derive(Debug, Clone)]
pub struct DedupCandidate {
    /// The candidate product.
    pub product: Product,
    /// Whether the owning supplier is marketplace-verified.
    pub supplier_verified: bool,
}

/// Select the master among a non-empty group of duplicate candidates.
///
/// Ordering, most to least significant: verified supplier, higher
/// `sales_count`, earlier `created_at`, then lexicographically smaller
/// `source_id` as a final deterministic tie-break.
///
/// # Panics
///
/// Panics if `candidates` is empty.
#[must_use]
pub fn select_master(candidates: &[DedupCandidate]) -> &DedupCandidate {
    candidates
        .iter()
        .max_by(|a, b| {
            a.supplier_verified
                .cmp(&b.supplier_verified)
                .then_with(|| a.product.sales_count.cmp(&b.product.sales_count))
                .then_with(|| b.product.created_at.cmp(&a.product.created_at))
                .then_with(|| b.product.source_id.cmp(&a.product.source_id))
        })
        .expect("candidates must be non-empty")
}

/// One group of mutually-duplicate products with its chosen master.
#[derive(Debug, Clone)]
pub struct DedupGroup {
    /// Internal id of the selected master.
    pub master_id: Uuid,
    /// Internal ids of every non-master member, each pointing back to `master_id`
    /// via `canonical_of` at the persistence layer.
    pub duplicate_ids: Vec<Uuid>,
}

/// Group a candidate set into duplicate clusters using a two-stage match:
/// an exact `(supplier_ref, normalized title)` pass first (cheap, catches the
/// common case of re-crawling the same listing), then pairwise composite
/// similarity for anything the exact pass missed.
///
/// `O(n^2)` in the similarity stage; acceptable for the per-page candidate
/// sets this runs over, not for a whole-catalog pass.
#[must_use]
pub fn group_duplicates(candidates: Vec<DedupCandidate>, weights: &SimilarityWeights) -> Vec<DedupGroup> {
    let n = candidates.len();
    let mut parent: Vec<usize> = (0..n).collect();

    fn find(parent: &mut [usize], i: usize) -> usize {
        if parent[i] != i {
            parent[i] = find(parent, parent[i]);
        }
        parent[i]
    }

    fn union(parent: &mut [usize], a: usize, b: usize) {
        let ra = find(parent, a);
        let rb = find(parent, b);
        if ra != rb {
            parent[ra] = rb;
        }
    }

    for i in 0..n {
        for j in (i + 1)..n {
            let exact = candidates[i].product.supplier_ref == candidates[j].product.supplier_ref
                && candidates[i].product.title.trim().to_lowercase() == candidates[j].product.title.trim().to_lowercase();
            let similar = exact || is_duplicate(&candidates[i].product, &candidates[j].product, weights);
            if similar {
                union(&mut parent, i, j);
            }
        }
    }

    let mut clusters: std::collections::HashMap<usize, Vec<usize>> = std::collections::HashMap::new();
    for i in 0..n {
        let root = find(&mut parent, i);
        clusters.entry(root).or_default().push(i);
    }

    clusters
        .into_values()
        .filter(|members| members.len() > 1)
        .map(|members| {
            let group: Vec<DedupCandidate> = members.iter().map(|&i| candidates[i].clone()).collect();
            let master = select_master(&group);
            let master_id = master.product.id;
            let duplicate_ids = group
                .iter()
                .map(|c| c.product.id)
                .filter(|id| *id != master_id)
                .collect();
            DedupGroup { master_id, duplicate_ids }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketsync_core::{ProductStatus, SyncStatus};

    fn product(source_id: &str, title: &str, price: f64, sales: u64, created_at: DateTime<Utc>) -> Product {
        Product {
            id: Uuid::new_v4(),
            source_id: source_id.to_string(),
            title: title.to_string(),
            subtitle: None,
            description: None,
            price_min: price,
            price_max: price,
            currency: "CNY".to_string(),
            moq: Some(10),
            price_unit: None,
            main_image_url: None,
            detail_images: vec![],
            specifications: Default::default(),
            supplier_ref: Uuid::nil(),
            canonical_of: None,
            sales_count: sales,
            review_count: 0,
            rating: None,
            category_id: None,
            category_name: None,
            status: ProductStatus::Active,
            sync_status: SyncStatus::Pending,
            last_sync_time: None,
            deleted: false,
            created_at,
            updated_at: created_at,
        }
    }

    #[test]
    fn identical_titles_score_high() {
        let a = product("A", "Stainless Steel Bolt M6", 1.0, 0, Utc::now());
        let b = product("B", "Stainless Steel Bolt M6", 1.0, 0, Utc::now());
        assert!(is_duplicate(&a, &b, &SimilarityWeights::default()));
    }

    #[test]
    fn unrelated_titles_score_low() {
        let a = product("A", "Stainless Steel Bolt M6", 1.0, 0, Utc::now());
        let b = product("B", "Organic Cotton T-Shirt", 50.0, 0, Utc::now());
        assert!(!is_duplicate(&a, &b, &SimilarityWeights::default()));
    }

    #[test]
    fn chinese_titles_use_trigram_similarity() {
        let sim = trigram_jaccard("不锈钢螺栓M6", "不锈钢螺栓M6规格");
        assert!(sim > 0.5);
    }

    #[test]
    fn master_selection_prefers_verified_then_sales_then_earliest() {
        let now = Utc::now();
        let unverified = DedupCandidate {
            product: product("B", "x", 1.0, 1000, now),
            supplier_verified: false,
        };
        let verified = DedupCandidate {
            product: product("A", "x", 1.0, 1, now),
            supplier_verified: true,
        };
        let master = select_master(&[unverified, verified.clone()]);
        assert_eq!(master.product.source_id, verified.product.source_id);
    }

    #[test]
    fn grouping_links_duplicates_to_one_master() {
        let now = Utc::now();
        let a = DedupCandidate { product: product("A", "Widget Pro", 9.99, 500, now), supplier_verified: true };
        let b = DedupCandidate { product: product("B", "Widget Pro", 9.99, 10, now), supplier_verified: false };
        let c = DedupCandidate { product: product("C", "Completely Different Item", 2.0, 10, now), supplier_verified: false };
        let mut candidates = vec![a.clone(), b, c];
        candidates[0].product.supplier_ref = Uuid::nil();
        candidates[1].product.supplier_ref = Uuid::nil();
        let groups = group_duplicates(candidates, &SimilarityWeights::default());
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].master_id, a.product.id);
        assert_eq!(groups[0].duplicate_ids.len(), 1);
    }
}
