// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Composes the per-page stages — extract, clean, validate, dedup, version,
//! upsert — into the end-to-end `sync.products` and `sync.suppliers`
//! pipelines, with per-page checkpointing and image-queue fan-out.
//!
//! The stage-chain shape follows the ancestor workspace's `Pipeline` /
//! `PipelineStage` (`abp-runtime::pipeline`): an ordered sequence of
//! independent steps, any one of which can reject a record without aborting
//! the page. Records that fail validation go to a rejected bucket instead of
//! short-circuiting the whole pipeline the way a `PipelineStage` error would.

use chrono::{DateTime, Utc};
use marketsync_clean::{clean_product, clean_supplier};
use marketsync_core::{BusinessType, EntityKind, Product, ProductStatus, Supplier, SyncCounters, SyncStatus};
use marketsync_dedup::{DedupCandidate, SimilarityWeights};
use marketsync_extract::{Extractor, MalformedPage};
use marketsync_queue::{DurableQueue, Priority, QueueName, QueuedWork};
use marketsync_runtime::TaskContext;
use marketsync_store::{PersistencePort, StoreError};
use marketsync_validate::{validate_product, validate_supplier, ValidationReport};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

const MANUFACTURER_KEYWORDS: &[&str] = &["manufactur", "factory", "工厂", "制造"];

/// Errors surfaced by [`SyncCoordinator::run_products`] and [`SyncCoordinator::run_suppliers`].
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// The listing source could not produce the next page.
    #[error("listing source error: {0}")]
    Source(String),
    /// A persistence-port call failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One page's worth of already-fetched product-detail HTML, plus the cursor
/// to resume from next.
#[derive(Debug, Clone, Default)]
pub struct ListingPage {
    /// Product-detail document bodies for this page, in listing order.
    pub html_documents: Vec<String>,
    /// Opaque cursor for the next page; `None` marks end-of-stream.
    pub next_cursor: Option<Vec<u8>>,
}

/// Supplies listing pages to a [`SyncCoordinator`].
///
/// Kept separate from `marketsync-fetch` so the pipeline's deterministic
/// logic can be exercised without a live HTTP origin; the production wiring
/// implements this over a `Fetcher` + pagination-cursor scheme.
#[async_trait::async_trait]
pub trait ListingSource: Send + Sync {
    /// Fetch the page following `cursor` (`None` for the first page).
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Source`] if the page could not be retrieved.
    async fn fetch_page(&self, cursor: Option<&[u8]>) -> Result<ListingPage, CoordinatorError>;
}

/// Why one record did not reach persistence.
#[derive(Debug, Clone)]
pub enum RejectionReason {
    /// The page layout did not match any known rule-set.
    Malformed(String),
    /// The record matched a rule-set but failed validation.
    Invalid(ValidationReport),
}

/// One rejected record, carried for operator review.
#[derive(Debug, Clone)]
pub struct RejectedRecord {
    /// Source id, if the extractor managed to read one.
    pub source_id: Option<String>,
    /// Why it was rejected.
    pub reason: RejectionReason,
}

/// Result of running the product pipeline to completion (or cancellation).
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    /// Final counters.
    pub counters: SyncCounters,
    /// Every rejected record encountered.
    pub rejected: Vec<RejectedRecord>,
    /// `true` if the run stopped because of an observed cancellation request.
    pub cancelled: bool,
}

/// Drives the `sync.products` pipeline: per page, extract -> clean ->
/// validate -> dedup -> version -> upsert, then checkpoint and report
/// progress, then enqueue image downloads for new or changed image URLs.
pub struct SyncCoordinator {
    store: Arc<dyn PersistencePort>,
    extractor: Arc<Extractor>,
    dedup_weights: SimilarityWeights,
    image_queue: Option<Arc<Mutex<DurableQueue>>>,
}

impl SyncCoordinator {
    /// Build a coordinator backed by `store` and `extractor`. Image downloads
    /// are only enqueued if `image_queue` is `Some`.
    #[must_use]
    pub fn new(store: Arc<dyn PersistencePort>, extractor: Arc<Extractor>, image_queue: Option<Arc<Mutex<DurableQueue>>>) -> Self {
        Self {
            store,
            extractor,
            dedup_weights: SimilarityWeights::default(),
            image_queue,
        }
    }

    /// Run the product sync pipeline to end-of-stream or until cancellation
    /// is observed at a page boundary, resuming from the context's last
    /// durable checkpoint if one exists.
    ///
    /// # Errors
    ///
    /// Propagates [`CoordinatorError::Store`] from checkpoint or upsert
    /// failures; a listing source failure is returned as
    /// [`CoordinatorError::Source`].
    pub async fn run_products(&self, ctx: &TaskContext, supplier_ref: Uuid, author: &str, source: &dyn ListingSource) -> Result<SyncOutcome, CoordinatorError> {
        let resumed = ctx.load_checkpoint().await;
        let mut counters = resumed.as_ref().map(|(_, c)| *c).unwrap_or_default();
        let mut cursor = resumed.map(|(c, _)| c);
        let mut rejected = Vec::new();

        loop {
            if ctx.cancel_requested().await {
                return Ok(SyncOutcome { counters, rejected, cancelled: true });
            }

            let page = source.fetch_page(cursor.as_deref()).await?;
            let mut accepted = Vec::new();
            for html in &page.html_documents {
                counters.processed += 1;
                match self.stage_one(html, supplier_ref, Utc::now()).await {
                    StageOutcome::Accepted(candidate) => accepted.push(candidate),
                    StageOutcome::Rejected(record) => {
                        counters.failed += 1;
                        tracing::warn!(target: "marketsync.coordinator", source_id = ?record.source_id, "product record rejected");
                        rejected.push(record);
                    }
                }
            }

            let batch_result = self.persist_batch(accepted, author, Utc::now()).await?;
            counters.success += (batch_result.masters_persisted + batch_result.duplicates_linked) as u64;
            tracing::debug!(target: "marketsync.coordinator", masters = batch_result.masters_persisted, duplicates = batch_result.duplicates_linked, "page batch persisted");
            if let Some(queue) = &self.image_queue {
                self.enqueue_image_downloads(queue, batch_result.image_urls).await;
            }

            cursor = page.next_cursor.clone();
            counters.total = counters.total.max(counters.processed);
            ctx.save_checkpoint(cursor.clone().unwrap_or_default(), counters).await?;
            ctx.report_progress(progress_percent(&counters), "syncing products");

            if cursor.is_none() {
                break;
            }
        }

        Ok(SyncOutcome { counters, rejected, cancelled: false })
    }

    /// Run the `sync.suppliers` pipeline to end-of-stream or cancellation,
    /// the same shape as [`Self::run_products`] minus dedup and image
    /// fan-out (a marketplace's supplier directory has no duplicate-listing
    /// problem the way its product catalog does).
    ///
    /// # Errors
    ///
    /// Propagates [`CoordinatorError::Store`] from checkpoint or upsert
    /// failures; a listing source failure is returned as
    /// [`CoordinatorError::Source`].
    pub async fn run_suppliers(&self, ctx: &TaskContext, author: &str, source: &dyn ListingSource) -> Result<SyncOutcome, CoordinatorError> {
        let resumed = ctx.load_checkpoint().await;
        let mut counters = resumed.as_ref().map(|(_, c)| *c).unwrap_or_default();
        let mut cursor = resumed.map(|(c, _)| c);
        let mut rejected = Vec::new();

        loop {
            if ctx.cancel_requested().await {
                return Ok(SyncOutcome { counters, rejected, cancelled: true });
            }

            let page = source.fetch_page(cursor.as_deref()).await?;
            for html in &page.html_documents {
                counters.processed += 1;
                match self.stage_supplier(html, author, Utc::now()).await? {
                    Some(rejection) => {
                        counters.failed += 1;
                        tracing::warn!(target: "marketsync.coordinator", source_id = ?rejection.source_id, "supplier record rejected");
                        rejected.push(rejection);
                    }
                    None => counters.success += 1,
                }
            }

            cursor = page.next_cursor.clone();
            counters.total = counters.total.max(counters.processed);
            ctx.save_checkpoint(cursor.clone().unwrap_or_default(), counters).await?;
            ctx.report_progress(progress_percent(&counters), "syncing suppliers");

            if cursor.is_none() {
                break;
            }
        }

        Ok(SyncOutcome { counters, rejected, cancelled: false })
    }

    async fn stage_supplier(&self, html: &str, author: &str, now: DateTime<Utc>) -> Result<Option<RejectedRecord>, CoordinatorError> {
        let raw = match self.extractor.extract_supplier(html) {
            Ok(raw) => raw,
            Err(MalformedPage { best_guess, .. }) => {
                return Ok(Some(RejectedRecord {
                    source_id: None,
                    reason: RejectionReason::Malformed(
                        best_guess.map(|(name, score)| format!("closest rule-set {name} scored {score:.2}")).unwrap_or_else(|| "no rule-set matched".to_string()),
                    ),
                }));
            }
        };

        let cleaned = clean_supplier(&raw);
        let source_id = cleaned.source_id.clone().unwrap_or_default();
        let existing = self.store.get_supplier_by_source_id(&source_id).await;
        let name = cleaned.name.unwrap_or_default();
        let candidate = Supplier {
            id: existing.as_ref().map_or_else(Uuid::new_v4, |s| s.id),
            source_id,
            business_type: infer_business_type(cleaned.company_name.as_deref().unwrap_or(&name)),
            company_name: cleaned.company_name.unwrap_or_else(|| name.clone()),
            name,
            contact: existing.as_ref().map_or_else(Default::default, |s| s.contact.clone()),
            province: cleaned.province,
            city: cleaned.city,
            rating: cleaned.rating,
            response_rate: existing.as_ref().and_then(|s| s.response_rate),
            product_count: existing.as_ref().map_or(0, |s| s.product_count),
            main_products: existing.as_ref().map_or_else(Vec::new, |s| s.main_products.clone()),
            verified_flag: cleaned.verified_badge_present,
            verification_level: existing.as_ref().and_then(|s| s.verification_level.clone()),
            deleted: false,
            created_at: existing.as_ref().map_or(now, |s| s.created_at),
            updated_at: now,
        };

        let report = validate_supplier(&candidate);
        if report.has_errors() {
            return Ok(Some(RejectedRecord {
                source_id: Some(candidate.source_id.clone()),
                reason: RejectionReason::Invalid(report),
            }));
        }

        let previous_version = self.store.latest_version(EntityKind::Supplier, candidate.id).await;
        let snapshot = supplier_content_snapshot(&candidate);
        if let Some(record) = marketsync_version::next_version(previous_version.as_ref(), EntityKind::Supplier, candidate.id, author, now, snapshot, None) {
            self.store.append_version(record).await?;
        }

        self.store.upsert_supplier(candidate).await?;
        Ok(None)
    }

    async fn enqueue_image_downloads(&self, queue: &Mutex<DurableQueue>, image_urls: Vec<String>) {
        let mut q = queue.lock().await;
        for url in image_urls {
            let _ = q.enqueue(QueuedWork {
                work_id: Uuid::new_v4(),
                task_name: "image.download".to_string(),
                queue_name: QueueName::Image,
                priority: Priority::NORMAL,
                payload: serde_json::json!({ "url": url }),
                enqueued_at: Utc::now(),
                not_before: Utc::now(),
                attempt_no: 0,
                lease: None,
            });
        }
    }

    /// Extract, clean, and validate one document. Does not touch the store.
    async fn stage_one(&self, html: &str, supplier_ref: Uuid, now: DateTime<Utc>) -> StageOutcome {
        let raw = match self.extractor.extract_product(html) {
            Ok(raw) => raw,
            Err(MalformedPage { best_guess, .. }) => {
                return StageOutcome::Rejected(RejectedRecord {
                    source_id: None,
                    reason: RejectionReason::Malformed(
                        best_guess.map(|(name, score)| format!("closest rule-set {name} scored {score:.2}")).unwrap_or_else(|| "no rule-set matched".to_string()),
                    ),
                });
            }
        };

        let cleaned = clean_product(&raw);
        let source_id = cleaned.source_id.clone().unwrap_or_default();
        let (price_min, price_max, currency) = match &cleaned.price {
            Some((range, currency)) => (range.min, range.max, currency.clone()),
            None => (0.0, 0.0, "CNY".to_string()),
        };

        let existing = self.store.get_product_by_source_id(&source_id).await;
        let candidate = Product {
            id: existing.as_ref().map_or_else(Uuid::new_v4, |p| p.id),
            source_id,
            title: cleaned.title.unwrap_or_default(),
            subtitle: cleaned.subtitle,
            description: None,
            price_min,
            price_max,
            currency,
            moq: cleaned.moq,
            price_unit: cleaned.price_unit,
            main_image_url: cleaned.main_image_url.clone(),
            detail_images: cleaned.detail_image_urls.clone(),
            specifications: cleaned.specifications.into_iter().collect(),
            supplier_ref,
            canonical_of: existing.as_ref().and_then(|p| p.canonical_of),
            sales_count: existing.as_ref().map_or(0, |p| p.sales_count),
            review_count: existing.as_ref().map_or(0, |p| p.review_count),
            rating: existing.as_ref().and_then(|p| p.rating),
            category_id: cleaned.category_id,
            category_name: cleaned.category_name,
            status: ProductStatus::Active,
            sync_status: SyncStatus::Syncing,
            last_sync_time: Some(now),
            deleted: false,
            created_at: existing.as_ref().map_or(now, |p| p.created_at),
            updated_at: now,
        };

        let report = validate_product(&candidate);
        if report.has_errors() {
            return StageOutcome::Rejected(RejectedRecord {
                source_id: Some(candidate.source_id.clone()),
                reason: RejectionReason::Invalid(report),
            });
        }

        let previous_image_urls: Vec<String> = existing
            .as_ref()
            .map(|p| p.main_image_url.iter().chain(p.detail_images.iter()).cloned().collect())
            .unwrap_or_default();

        StageOutcome::Accepted(AcceptedCandidate { candidate, previous_image_urls })
    }

    /// Deduplicate a page's accepted candidates, version and upsert every
    /// surviving record — cluster masters stand-alone, duplicates pointing
    /// back at their master via `canonical_of` — and collect the image URLs
    /// each master introduced.
    async fn persist_batch(&self, accepted: Vec<AcceptedCandidate>, author: &str, now: DateTime<Utc>) -> Result<BatchResult, CoordinatorError> {
        let mut result = BatchResult::default();
        if accepted.is_empty() {
            return Ok(result);
        }

        let previous_image_urls: std::collections::HashMap<Uuid, Vec<String>> = accepted.iter().map(|a| (a.candidate.id, a.previous_image_urls.clone())).collect();

        let mut verified_by_supplier: std::collections::HashMap<Uuid, bool> = std::collections::HashMap::new();
        let mut candidates: Vec<DedupCandidate> = Vec::with_capacity(accepted.len());
        for a in accepted {
            let supplier_ref = a.candidate.supplier_ref;
            let verified = match verified_by_supplier.get(&supplier_ref) {
                Some(v) => *v,
                None => {
                    let v = self.store.get_supplier(supplier_ref).await.is_some_and(|s| s.verified_flag);
                    verified_by_supplier.insert(supplier_ref, v);
                    v
                }
            };
            candidates.push(DedupCandidate {
                product: a.candidate,
                supplier_verified: verified,
            });
        }
        let by_id: std::collections::HashMap<Uuid, Product> = candidates.iter().map(|c| (c.product.id, c.product.clone())).collect();
        let groups = marketsync_dedup::group_duplicates(candidates, &self.dedup_weights);

        let mut canonical_of: std::collections::HashMap<Uuid, Uuid> = std::collections::HashMap::new();
        for group in &groups {
            for dup_id in &group.duplicate_ids {
                canonical_of.insert(*dup_id, group.master_id);
            }
        }

        // A candidate the Deduper never clustered is its own, one-record group.
        let master_ids: std::collections::HashSet<Uuid> = by_id.keys().copied().filter(|id| !canonical_of.contains_key(id)).collect();

        for master_id in &master_ids {
            let Some(master) = by_id.get(master_id) else { continue };

            let previous_version = self.store.latest_version(EntityKind::Product, master.id).await;
            let snapshot = content_snapshot(master);
            if let Some(record) = marketsync_version::next_version(previous_version.as_ref(), EntityKind::Product, master.id, author, now, snapshot, None) {
                self.store.append_version(record).await?;
            }

            let seen_before = previous_image_urls.get(&master.id).cloned().unwrap_or_default();
            let new_urls: Vec<String> = master
                .main_image_url
                .iter()
                .chain(master.detail_images.iter())
                .filter(|url| !seen_before.contains(url))
                .cloned()
                .collect();
            result.image_urls.extend(new_urls);

            let mut to_persist = master.clone();
            to_persist.sync_status = SyncStatus::Completed;
            to_persist.canonical_of = None;
            self.store.upsert_product(to_persist).await?;
            result.masters_persisted += 1;
        }

        for (dup_id, master_id) in &canonical_of {
            let Some(dup) = by_id.get(dup_id) else { continue };
            let mut to_persist = dup.clone();
            to_persist.canonical_of = Some(*master_id);
            to_persist.sync_status = SyncStatus::Completed;
            self.store.upsert_product(to_persist).await?;
            result.duplicates_linked += 1;
        }

        Ok(result)
    }
}

struct AcceptedCandidate {
    candidate: Product,
    previous_image_urls: Vec<String>,
}

#[derive(Default)]
struct BatchResult {
    masters_persisted: usize,
    duplicates_linked: usize,
    image_urls: Vec<String>,
}

enum StageOutcome {
    Accepted(AcceptedCandidate),
    Rejected(RejectedRecord),
}

/// Fields that change on every sync regardless of content (touch timestamps,
/// the transient sync-status flag) are excluded so that re-syncing identical
/// source content never produces a spurious version.
fn content_snapshot(product: &Product) -> serde_json::Value {
    let mut value = serde_json::to_value(product).unwrap_or_default();
    if let Some(obj) = value.as_object_mut() {
        obj.remove("last_sync_time");
        obj.remove("updated_at");
        obj.remove("sync_status");
    }
    value
}

/// Supplier-side counterpart to [`content_snapshot`].
fn supplier_content_snapshot(supplier: &Supplier) -> serde_json::Value {
    let mut value = serde_json::to_value(supplier).unwrap_or_default();
    if let Some(obj) = value.as_object_mut() {
        obj.remove("updated_at");
    }
    value
}

/// A listing page rarely states a supplier's business type outright; fall
/// back to a keyword match on the company name, defaulting to `Trader` when
/// nothing matches (the more conservative classification for fee/verification
/// purposes).
fn infer_business_type(company_name: &str) -> BusinessType {
    let lower = company_name.to_lowercase();
    if MANUFACTURER_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        BusinessType::Manufacturer
    } else {
        BusinessType::Trader
    }
}

fn progress_percent(counters: &SyncCounters) -> u8 {
    if counters.total == 0 {
        return 0;
    }
    ((counters.processed.min(counters.total) * 100) / counters.total) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketsync_core::ChangeKind;
    use marketsync_extract::default_rule_sets;
    use marketsync_store::InMemoryStore;

    struct StaticSource {
        pages: std::sync::Mutex<Vec<ListingPage>>,
    }

    #[async_trait::async_trait]
    impl ListingSource for StaticSource {
        async fn fetch_page(&self, _cursor: Option<&[u8]>) -> Result<ListingPage, CoordinatorError> {
            let mut pages = self.pages.lock().unwrap();
            if pages.is_empty() {
                return Ok(ListingPage::default());
            }
            Ok(pages.remove(0))
        }
    }

    const SAMPLE_HTML: &str = r#"
        <html><body>
            <div data-product-id="SKU-1">
                <div class="product-title">Stainless Steel Bolt M6</div>
                <div class="price-range">¥12.50 - ¥18.00</div>
                <div class="moq-value">100 pieces</div>
                <div class="main-image"><img src="https://cdn.example.com/a.jpg"></div>
            </div>
        </body></html>
    "#;

    const SUPPLIER_HTML: &str = r#"
        <html><body>
            <div class="supplier-id" data-supplier-id="SUP-1">
                <div class="shop-name">Huarong Hardware</div>
                <div class="company-name">Huarong Hardware Manufacturing Co., Ltd</div>
                <div class="company-location">Guangdong Dongguan</div>
                <div class="company-rating">4.8</div>
                <div class="verified-badge"></div>
            </div>
        </body></html>
    "#;

    #[tokio::test]
    async fn accepted_product_is_upserted_and_versioned() {
        let store: Arc<dyn PersistencePort> = Arc::new(InMemoryStore::new());
        let extractor = Arc::new(Extractor::new(default_rule_sets()));
        let coordinator = SyncCoordinator::new(store.clone(), extractor, None);
        let ctx = TaskContext::new(store.clone(), Uuid::new_v4());
        let supplier_ref = Uuid::new_v4();

        let source = StaticSource {
            pages: std::sync::Mutex::new(vec![ListingPage {
                html_documents: vec![SAMPLE_HTML.to_string()],
                next_cursor: None,
            }]),
        };

        let outcome = coordinator.run_products(&ctx, supplier_ref, "system", &source).await.unwrap();
        assert_eq!(outcome.counters.success, 1);
        assert!(!outcome.cancelled);

        let stored = store.get_product_by_source_id("SKU-1").await.unwrap();
        assert_eq!(stored.title, "Stainless Steel Bolt M6");
        let history = store.versions_for(EntityKind::Product, stored.id).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].change_kind, ChangeKind::Create);
    }

    #[tokio::test]
    async fn accepted_supplier_is_upserted_with_inferred_business_type() {
        let store: Arc<dyn PersistencePort> = Arc::new(InMemoryStore::new());
        let extractor = Arc::new(Extractor::new(default_rule_sets()));
        let coordinator = SyncCoordinator::new(store.clone(), extractor, None);
        let ctx = TaskContext::new(store.clone(), Uuid::new_v4());

        let source = StaticSource {
            pages: std::sync::Mutex::new(vec![ListingPage {
                html_documents: vec![SUPPLIER_HTML.to_string()],
                next_cursor: None,
            }]),
        };

        let outcome = coordinator.run_suppliers(&ctx, "system", &source).await.unwrap();
        assert_eq!(outcome.counters.success, 1);

        let stored = store.get_supplier_by_source_id("SUP-1").await.unwrap();
        assert_eq!(stored.name, "Huarong Hardware");
        assert_eq!(stored.province.as_deref(), Some("Guangdong"));
        assert_eq!(stored.business_type, marketsync_core::BusinessType::Manufacturer);
        assert!(stored.verified_flag);

        let history = store.versions_for(EntityKind::Supplier, stored.id).await;
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn malformed_page_is_rejected_not_fatal() {
        let store: Arc<dyn PersistencePort> = Arc::new(InMemoryStore::new());
        let extractor = Arc::new(Extractor::new(default_rule_sets()));
        let coordinator = SyncCoordinator::new(store.clone(), extractor, None);
        let ctx = TaskContext::new(store.clone(), Uuid::new_v4());

        let source = StaticSource {
            pages: std::sync::Mutex::new(vec![ListingPage {
                html_documents: vec!["<html><body>nothing recognizable</body></html>".to_string()],
                next_cursor: None,
            }]),
        };

        let outcome = coordinator.run_products(&ctx, Uuid::new_v4(), "system", &source).await.unwrap();
        assert_eq!(outcome.counters.failed, 1);
        assert_eq!(outcome.rejected.len(), 1);
        assert!(matches!(outcome.rejected[0].reason, RejectionReason::Malformed(_)));
    }

    #[tokio::test]
    async fn cancellation_is_observed_at_page_boundary() {
        let store: Arc<dyn PersistencePort> = Arc::new(InMemoryStore::new());
        let extractor = Arc::new(Extractor::new(default_rule_sets()));
        let coordinator = SyncCoordinator::new(store.clone(), extractor, None);
        let task_id = Uuid::new_v4();
        let ctx = TaskContext::new(store.clone(), task_id);
        store.request_cancel(task_id).await;

        let source = StaticSource {
            pages: std::sync::Mutex::new(vec![ListingPage {
                html_documents: vec![SAMPLE_HTML.to_string()],
                next_cursor: None,
            }]),
        };

        let outcome = coordinator.run_products(&ctx, Uuid::new_v4(), "system", &source).await.unwrap();
        assert!(outcome.cancelled);
        assert_eq!(outcome.counters.processed, 0);
    }

    #[tokio::test]
    async fn unchanged_resync_produces_no_new_version() {
        let store: Arc<dyn PersistencePort> = Arc::new(InMemoryStore::new());
        let extractor = Arc::new(Extractor::new(default_rule_sets()));
        let coordinator = SyncCoordinator::new(store.clone(), extractor, None);
        let supplier_ref = Uuid::new_v4();

        for _ in 0..2 {
            let ctx = TaskContext::new(store.clone(), Uuid::new_v4());
            let source = StaticSource {
                pages: std::sync::Mutex::new(vec![ListingPage {
                    html_documents: vec![SAMPLE_HTML.to_string()],
                    next_cursor: None,
                }]),
            };
            coordinator.run_products(&ctx, supplier_ref, "system", &source).await.unwrap();
        }

        let stored = store.get_product_by_source_id("SKU-1").await.unwrap();
        let history = store.versions_for(EntityKind::Product, stored.id).await;
        assert_eq!(history.len(), 1, "re-syncing identical content must not append a redundant version");
    }

    #[tokio::test]
    async fn dedup_master_selection_uses_real_supplier_verification() {
        let store: Arc<dyn PersistencePort> = Arc::new(InMemoryStore::new());
        let extractor = Arc::new(Extractor::new(default_rule_sets()));
        let coordinator = SyncCoordinator::new(store.clone(), extractor, None);
        let ctx = TaskContext::new(store.clone(), Uuid::new_v4());
        let supplier_ref = Uuid::new_v4();

        store
            .upsert_supplier(marketsync_core::Supplier {
                id: supplier_ref,
                source_id: "SUP-VERIFIED".to_string(),
                name: "Verified Co".to_string(),
                company_name: "Verified Co Ltd".to_string(),
                contact: Default::default(),
                province: None,
                city: None,
                rating: None,
                response_rate: None,
                product_count: 0,
                business_type: marketsync_core::BusinessType::Manufacturer,
                main_products: vec![],
                verified_flag: true,
                verification_level: None,
                deleted: false,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();

        // Two exact-duplicate listings (same supplier_ref, same normalized title)
        // land in the same page, forcing the group-selection path that reads
        // each candidate's owning supplier's `verified_flag` through the store.
        let source = StaticSource {
            pages: std::sync::Mutex::new(vec![ListingPage {
                html_documents: vec![SAMPLE_HTML.to_string(), SAMPLE_HTML.to_string()],
                next_cursor: None,
            }]),
        };

        let outcome = coordinator.run_products(&ctx, supplier_ref, "system", &source).await.unwrap();
        assert!(!outcome.cancelled);

        let stored = store.get_product_by_source_id("SKU-1").await.unwrap();
        assert_eq!(stored.title, "Stainless Steel Bolt M6");
        assert!(
            stored.canonical_of.is_none(),
            "the surviving row from a duplicate group must be the master, not a pointer to itself"
        );
    }
}
