// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! marketsync-core
//!
//! The canonical entity contract shared by every other crate in this workspace.
//! If you only take one dependency, take this one.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Current contract version embedded in version rows and HTTP responses.
///
/// # Examples
///
/// ```
/// assert_eq!(marketsync_core::CONTRACT_VERSION, "marketsync/v1");
/// ```
pub const CONTRACT_VERSION: &str = "marketsync/v1";

/// Business type of a [`Supplier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BusinessType {
    /// Manufactures the goods it lists.
    Manufacturer,
    /// Resells goods manufactured elsewhere.
    Trader,
    /// An unincorporated individual seller.
    Individual,
}

/// A supplier record upserted by its immutable `source_id`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Supplier {
    /// Internal identifier.
    pub id: Uuid,
    /// External, immutable, unique identifier from the source marketplace.
    pub source_id: String,
    /// Display name.
    pub name: String,
    /// Legal/company name.
    pub company_name: String,
    /// Free-form contact channels (phone, email, wechat, ...).
    pub contact: BTreeMap<String, String>,
    /// Province of operation.
    pub province: Option<String>,
    /// City of operation.
    pub city: Option<String>,
    /// Rating in `[0.0, 5.0]`, if known.
    pub rating: Option<f64>,
    /// Response rate in `[0.0, 1.0]`, if known.
    pub response_rate: Option<f64>,
    /// Derived count of active products; never authored directly.
    pub product_count: u64,
    /// Declared business type.
    pub business_type: BusinessType,
    /// Headline product categories, in source order.
    pub main_products: Vec<String>,
    /// Whether the marketplace has verified this supplier.
    pub verified_flag: bool,
    /// Verification tier (marketplace-specific, e.g. "gold", "assessed").
    pub verification_level: Option<String>,
    /// Soft-delete tombstone.
    pub deleted: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

/// Lifecycle status of a [`Product`], independent of its sync state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    /// Listed and purchasable.
    Active,
    /// Temporarily unlisted.
    Inactive,
    /// Permanently delisted by the supplier or marketplace.
    Discontinued,
}

/// In-flight synchronization state of a [`Product`], independent of [`ProductStatus`].
///
/// Kept as a field distinct from `status` per the import-time status mapping decision
/// recorded in `DESIGN.md`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Queued for sync but not yet started.
    Pending,
    /// Currently being synced.
    Syncing,
    /// Last sync attempt succeeded.
    Completed,
    /// Last sync attempt failed.
    Failed,
}

/// A product record upserted by its immutable `source_id`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Product {
    /// Internal identifier.
    pub id: Uuid,
    /// External, immutable, unique identifier from the source marketplace.
    pub source_id: String,
    /// Title.
    pub title: String,
    /// Subtitle, if any.
    pub subtitle: Option<String>,
    /// Full description.
    pub description: Option<String>,
    /// Minimum unit price. Invariant: `price_min <= price_max`.
    pub price_min: f64,
    /// Maximum unit price.
    pub price_max: f64,
    /// ISO 4217 currency code.
    pub currency: String,
    /// Minimum order quantity.
    pub moq: Option<u64>,
    /// Canonical unit the price is quoted per (piece, kg, m, ...).
    pub price_unit: Option<String>,
    /// Primary listing image URL.
    pub main_image_url: Option<String>,
    /// Ordered detail image URLs.
    pub detail_images: Vec<String>,
    /// Free-form attribute map (color, material, ...).
    pub specifications: BTreeMap<String, String>,
    /// Owning supplier. Invariant: must resolve to a non-deleted [`Supplier`].
    pub supplier_ref: Uuid,
    /// `Some(master_id)` when the Deduper has folded this record into another
    /// as a duplicate; `None` for a master record (or one not yet grouped).
    pub canonical_of: Option<Uuid>,
    /// Cumulative unit sales, if known.
    pub sales_count: u64,
    /// Review count.
    pub review_count: u64,
    /// Aggregate rating in `[0.0, 5.0]`, if known.
    pub rating: Option<f64>,
    /// Source category id.
    pub category_id: Option<String>,
    /// Source category display name.
    pub category_name: Option<String>,
    /// Listing lifecycle status.
    pub status: ProductStatus,
    /// In-flight sync status.
    pub sync_status: SyncStatus,
    /// Timestamp of the last successful or attempted sync.
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Soft-delete tombstone.
    pub deleted: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

/// The role a [`ProductImage`] plays on its product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ImageKind {
    /// The single primary listing image.
    Main,
    /// A supplementary detail image.
    Detail,
    /// A generated thumbnail.
    Thumbnail,
}

/// An image attached to a [`Product`].
///
/// Invariants: exactly one `Main` per product; `order_index` unique per `(product_ref, kind)`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProductImage {
    /// Internal identifier.
    pub id: Uuid,
    /// Owning product.
    pub product_ref: Uuid,
    /// Source or content-addressed URL.
    pub url: String,
    /// Role of this image.
    pub kind: ImageKind,
    /// Zero-based position among images of the same kind.
    pub order_index: u32,
    /// Alt text, if known.
    pub alt_text: Option<String>,
    /// File size in bytes, once downloaded.
    pub file_size: Option<u64>,
    /// Pixel width, once downloaded.
    pub width: Option<u32>,
    /// Pixel height, once downloaded.
    pub height: Option<u32>,
}

/// The kind of change a [`VersionRecord`] captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// First version of an entity.
    Create,
    /// A field-level change to an existing entity.
    Update,
    /// Soft deletion.
    Delete,
    /// Restoration from a prior tombstoned state.
    Restore,
}

/// The entity kind a [`VersionRecord`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A [`Product`].
    Product,
    /// A [`Supplier`].
    Supplier,
}

/// A single added/removed/modified field captured by a structural diff.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct FieldChange {
    /// Dotted field path, e.g. `"price_min"`.
    pub field: String,
    /// Value before the change, or `None` if the field was newly added.
    pub before: Option<serde_json::Value>,
    /// Value after the change, or `None` if the field was removed.
    pub after: Option<serde_json::Value>,
}

/// An immutable, append-only record of one entity's state at a point in time.
///
/// Invariants: `version_no` dense and monotonic per `(entity_type, entity_id)`; `checksum`
/// matches `snapshot`'s canonical byte encoding; a `Create` is always `version_no == 1` and has
/// no diff against a prior.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VersionRecord {
    /// Kind of entity this version belongs to.
    pub entity_type: EntityKind,
    /// Identifier of the entity.
    pub entity_id: Uuid,
    /// 1-based, dense, monotonic version number for this entity.
    pub version_no: u64,
    /// What kind of change this version represents.
    pub change_kind: ChangeKind,
    /// Who or what produced this version (a task name, operator id, or `"system"`).
    pub author: String,
    /// When this version was recorded.
    pub timestamp: DateTime<Utc>,
    /// SHA-256 hex digest of `snapshot`'s canonical byte encoding.
    pub checksum: String,
    /// Full canonical snapshot at this version.
    pub snapshot: serde_json::Value,
    /// Field-level diff against the previous version, empty for `Create`.
    pub diff: Vec<FieldChange>,
}

/// Operation category of a [`SyncRun`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    /// A full re-sync of the filter's scope.
    Full,
    /// An incremental sync since the last successful run.
    Incremental,
    /// Triggered directly by an operator.
    Manual,
    /// Triggered by the scheduler.
    Scheduled,
}

/// What kind of entity a [`SyncRun`] operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    /// Products only.
    Product,
    /// Suppliers only.
    Supplier,
    /// Images only.
    Image,
    /// Everything.
    All,
}

/// Status of a [`SyncRun`]. See [`SyncRunState`] for the transition rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SyncRunStatus {
    /// Created but not yet leased by a worker.
    Pending,
    /// Actively processing.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an unrecoverable error or excessive failure ratio.
    Failed,
    /// Cancelled by an operator.
    Cancelled,
}

impl SyncRunStatus {
    /// `true` once a run can no longer change state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled
        )
    }
}

/// Running counters for a [`SyncRun`]. Invariant: `processed == success + failed + skipped`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct SyncCounters {
    /// Total records expected, if known up front.
    pub total: u64,
    /// Records processed so far (success + failed + skipped).
    pub processed: u64,
    /// Records accepted and persisted.
    pub success: u64,
    /// Records that failed irrecoverably.
    pub failed: u64,
    /// Records skipped (e.g. already up to date).
    pub skipped: u64,
}

impl SyncCounters {
    /// `true` when `processed == success + failed + skipped`.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.processed == self.success + self.failed + self.skipped
    }

    /// Failure ratio among processed records, `0.0` when nothing has been processed.
    #[must_use]
    pub fn failure_ratio(&self) -> f64 {
        if self.processed == 0 {
            return 0.0;
        }
        self.failed as f64 / self.processed as f64
    }
}

/// Top-k error codes with occurrence counts, carried on a [`SyncRun`].
pub type ErrorDigest = BTreeMap<String, u64>;

/// One operator-visible execution of a data-sync pipeline over a filter.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SyncRun {
    /// Identifier of the driving task (matches a `QueuedWork::work_id` once leased).
    pub task_id: Uuid,
    /// Symbolic task handler name, e.g. `"sync.products"`.
    pub task_name: String,
    /// Why this run was started.
    pub operation_type: OperationType,
    /// What kind of entity this run syncs.
    pub sync_type: SyncType,
    /// Current status.
    pub status: SyncRunStatus,
    /// Progress percentage in `[0, 100]`.
    pub progress: u8,
    /// Running counters.
    pub counters: SyncCounters,
    /// When the run started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the run finished (terminal states only).
    pub finished_at: Option<DateTime<Utc>>,
    /// Top error codes with counts.
    pub error_digest: ErrorDigest,
    /// Snapshot of the configuration used for this run.
    pub config_snapshot: serde_json::Value,
    /// Human-readable suggestions, e.g. "extractor rule outdated for list_page v3".
    pub recommendations: Vec<String>,
    /// If this run is a retry, the run it superseded.
    pub retried_from: Option<Uuid>,
}

impl SyncRun {
    /// Wall-clock duration once finished.
    #[must_use]
    pub fn duration_ms(&self) -> Option<i64> {
        let (start, end) = (self.started_at?, self.finished_at?);
        (end - start).num_milliseconds().into()
    }
}

/// A durable, opaque cursor plus counters that permits resuming a task.
///
/// Invariant: `sequence_no` dense per `task_id`; `checksum` validates on read.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Checkpoint {
    /// Task this checkpoint belongs to.
    pub task_id: Uuid,
    /// 1-based, dense sequence number for this task.
    pub sequence_no: u64,
    /// When this checkpoint was written.
    pub timestamp: DateTime<Utc>,
    /// Opaque cursor bytes owned by the handler.
    pub cursor: Vec<u8>,
    /// Counters snapshot at this checkpoint.
    pub counters: SyncCounters,
    /// SHA-256 hex digest over `cursor` and the serialized `counters`.
    pub checksum: String,
}

/// Compute the canonical byte encoding of a serializable value.
///
/// Uses `serde_json::to_vec` of the value as serialized through `serde_json::Value`
/// after re-parsing, which sorts object keys (`serde_json`'s `Map` is a `BTreeMap`
/// when the `preserve_order` feature is not enabled), giving a deterministic encoding
/// independent of struct field declaration order.
///
/// # Errors
///
/// Returns an error if `value` cannot be serialized to JSON.
pub fn canonical_bytes<T: Serialize>(value: &T) -> serde_json::Result<Vec<u8>> {
    let as_value: serde_json::Value = serde_json::to_value(value)?;
    serde_json::to_vec(&as_value)
}

/// Compute the SHA-256 hex digest of a value's canonical byte encoding.
///
/// # Errors
///
/// Returns an error if `value` cannot be serialized to JSON.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeMap;
/// let mut m = BTreeMap::new();
/// m.insert("a", 1);
/// let checksum = marketsync_core::canonical_checksum(&m).unwrap();
/// assert_eq!(checksum.len(), 64);
/// ```
pub fn canonical_checksum<T: Serialize>(value: &T) -> serde_json::Result<String> {
    let bytes = canonical_bytes(value)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}
