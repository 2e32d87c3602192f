// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! The persistence boundary: a fixed capability set (upsert entity, read entity,
//! append version, read/write checkpoint, sync-run CRUD, leader lease) with a single
//! concrete in-memory implementation that is sufficient for both tests and this
//! reference build.
//!
//! Duck-typed repositories in the ancestor system are replaced here by one trait,
//! [`PersistencePort`], following the ancestor workspace's `ReceiptStore` /
//! `SidecarPool` pattern of a state struct behind a mutex with narrow accessor
//! methods.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marketsync_core::{Checkpoint, EntityKind, Product, ProductImage, Supplier, SyncRun, VersionRecord};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Errors raised by a [`PersistencePort`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No row exists for the given identifier.
    #[error("not found: {0}")]
    NotFound(String),
    /// A `source_id` collided with a different entity id.
    #[error("unique violation on source_id {0}")]
    UniqueViolation(String),
    /// A checkpoint's checksum did not match its stored bytes.
    #[error("checkpoint corrupt for task {0}")]
    CheckpointCorrupt(Uuid),
}

/// Filters accepted by [`PersistencePort::list_products`].
#[derive(Debug, Clone, Default)]
pub struct ProductFilter {
    /// Case-insensitive substring match against `title`.
    pub text: Option<String>,
    /// Exact match against `category_id`.
    pub category_id: Option<String>,
    /// Exact match against `supplier_ref`.
    pub supplier_ref: Option<Uuid>,
    /// Exact match against `status`.
    pub status: Option<marketsync_core::ProductStatus>,
    /// Exact match against `sync_status`.
    pub sync_status: Option<marketsync_core::SyncStatus>,
    /// Inclusive lower bound on `price_min`.
    pub min_price: Option<f64>,
    /// Inclusive upper bound on `price_max`.
    pub max_price: Option<f64>,
    /// Inclusive lower bound on `rating`.
    pub min_rating: Option<f64>,
    /// When `false` (the default), records with `canonical_of.is_some()` are
    /// excluded so duplicate listings don't surface alongside their master.
    pub include_duplicates: bool,
    /// Zero-based page offset.
    pub offset: usize,
    /// Page size.
    pub limit: usize,
}

/// A page of results plus the total count before pagination.
#[derive(Debug, Clone)]
pub struct Page<T> {
    /// The items on this page.
    pub items: Vec<T>,
    /// Total matching rows across all pages.
    pub total: usize,
}

/// The fixed capability set that the sync and crawl pipelines depend on.
///
/// A single implementation ([`InMemoryStore`]) is used for both tests and this
/// reference build; a relational implementation would satisfy the same trait.
#[async_trait]
pub trait PersistencePort: Send + Sync {
    /// Upsert a product keyed by `source_id`. Preserves the internal `id` of any
    /// existing row with the same `source_id`.
    async fn upsert_product(&self, product: Product) -> Result<Product, StoreError>;
    /// Fetch a product by internal id.
    async fn get_product(&self, id: Uuid) -> Option<Product>;
    /// Fetch a product by its external `source_id`.
    async fn get_product_by_source_id(&self, source_id: &str) -> Option<Product>;
    /// List products matching `filter`, paginated.
    async fn list_products(&self, filter: &ProductFilter) -> Page<Product>;

    /// Upsert an image row keyed by `id`.
    async fn upsert_product_image(&self, image: ProductImage) -> Result<ProductImage, StoreError>;
    /// List every image row for a product, ordered by `(kind, order_index)`.
    async fn list_product_images(&self, product_ref: Uuid) -> Vec<ProductImage>;

    /// Upsert a supplier keyed by `source_id`.
    async fn upsert_supplier(&self, supplier: Supplier) -> Result<Supplier, StoreError>;
    /// Fetch a supplier by internal id.
    async fn get_supplier(&self, id: Uuid) -> Option<Supplier>;
    /// Fetch a supplier by its external `source_id`.
    async fn get_supplier_by_source_id(&self, source_id: &str) -> Option<Supplier>;
    /// Count non-deleted suppliers, for dashboard KPIs.
    async fn count_suppliers(&self) -> usize;

    /// Append a version row. The caller is responsible for computing `version_no`
    /// and `checksum` (see `marketsync-version`).
    async fn append_version(&self, record: VersionRecord) -> Result<(), StoreError>;
    /// The most recent version row for an entity, if any.
    async fn latest_version(&self, kind: EntityKind, entity_id: Uuid) -> Option<VersionRecord>;
    /// The full version history for an entity, oldest first.
    async fn versions_for(&self, kind: EntityKind, entity_id: Uuid) -> Vec<VersionRecord>;

    /// Write a checkpoint. `sequence_no` must be exactly one more than the
    /// previous write for this `task_id` (enforced by the in-memory implementation).
    async fn write_checkpoint(&self, checkpoint: Checkpoint) -> Result<(), StoreError>;
    /// Read the most recent checkpoint for a task, verifying its checksum.
    ///
    /// Returns `Err(StoreError::CheckpointCorrupt)` if the stored checksum does not
    /// match the stored bytes, per the corrupt-checkpoint restart-from-scratch rule.
    async fn read_checkpoint(&self, task_id: Uuid) -> Result<Option<Checkpoint>, StoreError>;

    /// Create a new [`SyncRun`] row.
    async fn create_sync_run(&self, run: SyncRun) -> Result<(), StoreError>;
    /// Overwrite an existing [`SyncRun`] row by `task_id`.
    async fn update_sync_run(&self, run: SyncRun) -> Result<(), StoreError>;
    /// Fetch a [`SyncRun`] by `task_id`.
    async fn get_sync_run(&self, task_id: Uuid) -> Option<SyncRun>;
    /// List all [`SyncRun`] rows, most recently started first.
    async fn list_sync_runs(&self) -> Vec<SyncRun>;

    /// Record an out-of-band cancellation request for a run.
    async fn request_cancel(&self, task_id: Uuid);
    /// Whether a cancellation has been requested for a run.
    async fn cancel_requested(&self, task_id: Uuid) -> bool;

    /// Attempt to acquire or renew a named leader lease.
    ///
    /// Returns `true` if `holder` now holds the lease (either newly acquired, or
    /// already held by `holder` and renewed). Returns `false` if another holder's
    /// lease has not yet expired.
    async fn acquire_leader_lease(&self, name: &str, holder: &str, ttl: Duration) -> bool;
    /// Release a leader lease early, if `holder` currently holds it.
    async fn release_leader_lease(&self, name: &str, holder: &str);
}

#[derive(Debug, Clone)]
struct LeaseState {
    holder: String,
    deadline: DateTime<Utc>,
}

#[derive(Default)]
struct StoreState {
    products: HashMap<Uuid, Product>,
    products_by_source: HashMap<String, Uuid>,
    suppliers: HashMap<Uuid, Supplier>,
    suppliers_by_source: HashMap<String, Uuid>,
    versions: HashMap<(EntityKind, Uuid), Vec<VersionRecord>>,
    checkpoints: HashMap<Uuid, Vec<Checkpoint>>,
    product_images: HashMap<Uuid, ProductImage>,
    sync_runs: HashMap<Uuid, SyncRun>,
    cancel_flags: HashSet<Uuid>,
    leases: BTreeMap<String, LeaseState>,
}

/// In-memory [`PersistencePort`] implementation.
///
/// All state lives behind a single `tokio::sync::Mutex`, which incidentally
/// serializes per-`source_id` upserts as the concurrency model requires (see
/// `DESIGN.md` for the simplification this implies versus a per-key lock).
pub struct InMemoryStore {
    state: Mutex<StoreState>,
}

impl InMemoryStore {
    /// Construct an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistencePort for InMemoryStore {
    async fn upsert_product(&self, mut product: Product) -> Result<Product, StoreError> {
        let mut state = self.state.lock().await;
        if let Some(&existing_id) = state.products_by_source.get(&product.source_id) {
            product.id = existing_id;
        } else {
            state
                .products_by_source
                .insert(product.source_id.clone(), product.id);
        }
        state.products.insert(product.id, product.clone());
        Ok(product)
    }

    async fn get_product(&self, id: Uuid) -> Option<Product> {
        self.state.lock().await.products.get(&id).cloned()
    }

    async fn get_product_by_source_id(&self, source_id: &str) -> Option<Product> {
        let state = self.state.lock().await;
        let id = *state.products_by_source.get(source_id)?;
        state.products.get(&id).cloned()
    }

    async fn list_products(&self, filter: &ProductFilter) -> Page<Product> {
        let state = self.state.lock().await;
        let mut matched: Vec<Product> = state
            .products
            .values()
            .filter(|p| !p.deleted)
            .filter(|p| filter.include_duplicates || p.canonical_of.is_none())
            .filter(|p| {
                filter
                    .text
                    .as_ref()
                    .is_none_or(|t| p.title.to_lowercase().contains(&t.to_lowercase()))
            })
            .filter(|p| filter.category_id.as_ref().is_none_or(|c| p.category_id.as_deref() == Some(c.as_str())))
            .filter(|p| filter.supplier_ref.is_none_or(|s| p.supplier_ref == s))
            .filter(|p| filter.status.is_none_or(|s| p.status == s))
            .filter(|p| filter.sync_status.is_none_or(|s| p.sync_status == s))
            .filter(|p| filter.min_price.is_none_or(|m| p.price_max >= m))
            .filter(|p| filter.max_price.is_none_or(|m| p.price_min <= m))
            .filter(|p| filter.min_rating.is_none_or(|m| p.rating.unwrap_or(0.0) >= m))
            .cloned()
            .collect();
        matched.sort_by_key(|p| p.source_id.clone());
        let total = matched.len();
        let limit = if filter.limit == 0 { total } else { filter.limit };
        let items = matched.into_iter().skip(filter.offset).take(limit).collect();
        Page { items, total }
    }

    async fn upsert_product_image(&self, image: ProductImage) -> Result<ProductImage, StoreError> {
        let mut state = self.state.lock().await;
        state.product_images.insert(image.id, image.clone());
        Ok(image)
    }

    async fn list_product_images(&self, product_ref: Uuid) -> Vec<ProductImage> {
        let state = self.state.lock().await;
        let mut images: Vec<ProductImage> = state
            .product_images
            .values()
            .filter(|i| i.product_ref == product_ref)
            .cloned()
            .collect();
        images.sort_by_key(|i| (i.kind as u8, i.order_index));
        images
    }

    async fn upsert_supplier(&self, mut supplier: Supplier) -> Result<Supplier, StoreError> {
        let mut state = self.state.lock().await;
        if let Some(&existing_id) = state.suppliers_by_source.get(&supplier.source_id) {
            supplier.id = existing_id;
        } else {
            state
                .suppliers_by_source
                .insert(supplier.source_id.clone(), supplier.id);
        }
        state.suppliers.insert(supplier.id, supplier.clone());
        Ok(supplier)
    }

    async fn get_supplier(&self, id: Uuid) -> Option<Supplier> {
        self.state.lock().await.suppliers.get(&id).cloned()
    }

    async fn get_supplier_by_source_id(&self, source_id: &str) -> Option<Supplier> {
        let state = self.state.lock().await;
        let id = *state.suppliers_by_source.get(source_id)?;
        state.suppliers.get(&id).cloned()
    }

    async fn count_suppliers(&self) -> usize {
        let state = self.state.lock().await;
        state.suppliers.values().filter(|s| !s.deleted).count()
    }

    async fn append_version(&self, record: VersionRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state
            .versions
            .entry((record.entity_type, record.entity_id))
            .or_default()
            .push(record);
        Ok(())
    }

    async fn latest_version(&self, kind: EntityKind, entity_id: Uuid) -> Option<VersionRecord> {
        let state = self.state.lock().await;
        state
            .versions
            .get(&(kind, entity_id))
            .and_then(|v| v.last().cloned())
    }

    async fn versions_for(&self, kind: EntityKind, entity_id: Uuid) -> Vec<VersionRecord> {
        let state = self.state.lock().await;
        state
            .versions
            .get(&(kind, entity_id))
            .cloned()
            .unwrap_or_default()
    }

    async fn write_checkpoint(&self, checkpoint: Checkpoint) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let history = state.checkpoints.entry(checkpoint.task_id).or_default();
        let expected = history.len() as u64 + 1;
        if checkpoint.sequence_no != expected {
            tracing::warn!(
                target: "marketsync.store",
                task_id = %checkpoint.task_id,
                expected,
                got = checkpoint.sequence_no,
                "checkpoint sequence gap, accepting anyway"
            );
        }
        history.push(checkpoint);
        Ok(())
    }

    async fn read_checkpoint(&self, task_id: Uuid) -> Result<Option<Checkpoint>, StoreError> {
        let state = self.state.lock().await;
        let Some(cp) = state.checkpoints.get(&task_id).and_then(|v| v.last()).cloned() else {
            return Ok(None);
        };
        let expected = marketsync_core::canonical_checksum(&(&cp.cursor, &cp.counters))
            .map_err(|_| StoreError::CheckpointCorrupt(task_id))?;
        if expected != cp.checksum {
            return Err(StoreError::CheckpointCorrupt(task_id));
        }
        Ok(Some(cp))
    }

    async fn create_sync_run(&self, run: SyncRun) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.sync_runs.insert(run.task_id, run);
        Ok(())
    }

    async fn update_sync_run(&self, run: SyncRun) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if !state.sync_runs.contains_key(&run.task_id) {
            return Err(StoreError::NotFound(run.task_id.to_string()));
        }
        state.sync_runs.insert(run.task_id, run);
        Ok(())
    }

    async fn get_sync_run(&self, task_id: Uuid) -> Option<SyncRun> {
        self.state.lock().await.sync_runs.get(&task_id).cloned()
    }

    async fn list_sync_runs(&self) -> Vec<SyncRun> {
        let state = self.state.lock().await;
        let mut runs: Vec<SyncRun> = state.sync_runs.values().cloned().collect();
        runs.sort_by_key(|r| std::cmp::Reverse(r.started_at));
        runs
    }

    async fn request_cancel(&self, task_id: Uuid) {
        self.state.lock().await.cancel_flags.insert(task_id);
    }

    async fn cancel_requested(&self, task_id: Uuid) -> bool {
        self.state.lock().await.cancel_flags.contains(&task_id)
    }

    async fn acquire_leader_lease(&self, name: &str, holder: &str, ttl: Duration) -> bool {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let deadline = now + chrono::Duration::from_std(ttl).unwrap_or_default();
        match state.leases.get(name) {
            Some(existing) if existing.holder != holder && existing.deadline > now => false,
            _ => {
                state.leases.insert(
                    name.to_string(),
                    LeaseState {
                        holder: holder.to_string(),
                        deadline,
                    },
                );
                true
            }
        }
    }

    async fn release_leader_lease(&self, name: &str, holder: &str) {
        let mut state = self.state.lock().await;
        if state.leases.get(name).is_some_and(|l| l.holder == holder) {
            state.leases.remove(name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use marketsync_core::{BusinessType, ProductStatus, SyncStatus};

    fn sample_product(source_id: &str) -> Product {
        Product {
            id: Uuid::new_v4(),
            source_id: source_id.to_string(),
            title: "Widget".to_string(),
            subtitle: None,
            description: None,
            price_min: 1.0,
            price_max: 2.0,
            currency: "CNY".to_string(),
            moq: Some(10),
            price_unit: Some("piece".to_string()),
            main_image_url: None,
            detail_images: vec![],
            specifications: Default::default(),
            supplier_ref: Uuid::new_v4(),
            canonical_of: None,
            sales_count: 0,
            review_count: 0,
            rating: None,
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

    #[tokio::test]
    async fn upsert_is_keyed_by_source_id() {
        let store = InMemoryStore::new();
        let a = store.upsert_product(sample_product("P1")).await.unwrap();
        let mut p2 = sample_product("P1");
        p2.title = "Widget v2".to_string();
        let b = store.upsert_product(p2).await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(store.list_products(&ProductFilter::default()).await.total, 1);
    }

    #[tokio::test]
    async fn product_images_list_ordered_by_kind_then_index() {
        let store = InMemoryStore::new();
        let product_ref = Uuid::new_v4();
        let image = |kind, order_index| marketsync_core::ProductImage {
            id: Uuid::new_v4(),
            product_ref,
            url: "https://example.com/a.jpg".to_string(),
            kind,
            order_index,
            alt_text: None,
            file_size: None,
            width: None,
            height: None,
        };
        store.upsert_product_image(image(marketsync_core::ImageKind::Detail, 1)).await.unwrap();
        store.upsert_product_image(image(marketsync_core::ImageKind::Main, 0)).await.unwrap();
        store.upsert_product_image(image(marketsync_core::ImageKind::Detail, 0)).await.unwrap();

        let images = store.list_product_images(product_ref).await;
        let kinds: Vec<marketsync_core::ImageKind> = images.iter().map(|i| i.kind).collect();
        assert_eq!(kinds, vec![marketsync_core::ImageKind::Main, marketsync_core::ImageKind::Detail, marketsync_core::ImageKind::Detail]);
    }

    #[tokio::test]
    async fn checkpoint_corruption_detected() {
        let store = InMemoryStore::new();
        let task_id = Uuid::new_v4();
        let checkpoint = Checkpoint {
            task_id,
            sequence_no: 1,
            timestamp: Utc::now(),
            cursor: b"page=1".to_vec(),
            counters: Default::default(),
            checksum: "deadbeef".to_string(),
        };
        store.write_checkpoint(checkpoint).await.unwrap();
        let err = store.read_checkpoint(task_id).await.unwrap_err();
        assert!(matches!(err, StoreError::CheckpointCorrupt(_)));
    }

    #[tokio::test]
    async fn leader_lease_is_exclusive_until_expiry() {
        let store = InMemoryStore::new();
        assert!(store.acquire_leader_lease("scheduler", "a", Duration::from_secs(30)).await);
        assert!(!store.acquire_leader_lease("scheduler", "b", Duration::from_secs(30)).await);
        assert!(store.acquire_leader_lease("scheduler", "a", Duration::from_secs(30)).await);
        store.release_leader_lease("scheduler", "a").await;
        assert!(store.acquire_leader_lease("scheduler", "b", Duration::from_secs(30)).await);
    }

    #[tokio::test]
    async fn cancel_flag_round_trips() {
        let store = InMemoryStore::new();
        let task_id = Uuid::new_v4();
        assert!(!store.cancel_requested(task_id).await);
        store.request_cancel(task_id).await;
        assert!(store.cancel_requested(task_id).await);
    }
}
