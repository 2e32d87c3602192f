// SPDX-License-Identifier: MIT OR Apache-2.0
//! [`TaskHandler`] implementations a worker process registers against a
//! [`TaskRegistry`](marketsync_runtime::TaskRegistry).

use async_trait::async_trait;
use marketsync_coordinator::{ListingSource, SyncCoordinator};
use marketsync_core::{ImageKind, ProductImage};
use marketsync_error::ErrorCode;
use marketsync_fetch::{Fetcher, RetryConfig};
use marketsync_runtime::{TaskContext, TaskError, TaskHandler};
use marketsync_store::PersistencePort;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// Runs `sync.products` by delegating to a [`SyncCoordinator`] bound to a
/// fixed supplier and listing source.
pub struct SyncProductsHandler {
    coordinator: Arc<SyncCoordinator>,
    supplier_ref: Uuid,
    source: Arc<dyn ListingSource>,
}

impl SyncProductsHandler {
    /// Build a handler that syncs products for `supplier_ref` from `source`.
    #[must_use]
    pub fn new(coordinator: Arc<SyncCoordinator>, supplier_ref: Uuid, source: Arc<dyn ListingSource>) -> Self {
        Self { coordinator, supplier_ref, source }
    }
}

#[async_trait]
impl TaskHandler for SyncProductsHandler {
    async fn run(&self, args: serde_json::Value, ctx: &TaskContext) -> Result<(), TaskError> {
        let author = args.get("author").and_then(|v| v.as_str()).unwrap_or("marketsync-cli");
        let supplier_ref = args
            .get("supplier_ref")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
            .unwrap_or(self.supplier_ref);
        self.coordinator
            .run_products(ctx, supplier_ref, author, self.source.as_ref())
            .await
            .map_err(|e| TaskError::classified(ErrorCode::StoreUnavailable, e.to_string()))?;
        Ok(())
    }
}

/// Runs `sync.suppliers` by delegating to a [`SyncCoordinator`].
pub struct SyncSuppliersHandler {
    coordinator: Arc<SyncCoordinator>,
    source: Arc<dyn ListingSource>,
}

impl SyncSuppliersHandler {
    /// Build a handler that syncs suppliers from `source`.
    #[must_use]
    pub fn new(coordinator: Arc<SyncCoordinator>, source: Arc<dyn ListingSource>) -> Self {
        Self { coordinator, source }
    }
}

#[async_trait]
impl TaskHandler for SyncSuppliersHandler {
    async fn run(&self, args: serde_json::Value, ctx: &TaskContext) -> Result<(), TaskError> {
        let author = args.get("author").and_then(|v| v.as_str()).unwrap_or("marketsync-cli");
        self.coordinator
            .run_suppliers(ctx, author, self.source.as_ref())
            .await
            .map_err(|e| TaskError::classified(ErrorCode::StoreUnavailable, e.to_string()))?;
        Ok(())
    }
}

/// Runs `image.download`: fetches the `url` named in the payload, writes it
/// under `image_dir` keyed by its content-addressed checksum, and records a
/// [`ProductImage`] row pointing at that object key.
pub struct ImageDownloadHandler {
    fetcher: Fetcher,
    retry: RetryConfig,
    image_dir: PathBuf,
    store: Arc<dyn PersistencePort>,
}

impl ImageDownloadHandler {
    /// Build a handler that downloads into `image_dir` via `fetcher` and
    /// records the resulting row through `store`.
    #[must_use]
    pub fn new(fetcher: Fetcher, image_dir: PathBuf, store: Arc<dyn PersistencePort>) -> Self {
        Self { fetcher, retry: RetryConfig::default(), image_dir, store }
    }
}

#[async_trait]
impl TaskHandler for ImageDownloadHandler {
    async fn run(&self, args: serde_json::Value, ctx: &TaskContext) -> Result<(), TaskError> {
        let url = args
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| TaskError::classified(ErrorCode::BadRequest, "missing url"))?;
        let product_ref = args
            .get("product_ref")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| TaskError::classified(ErrorCode::BadRequest, "missing or invalid product_ref"))?;
        let kind: ImageKind = args
            .get("kind")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e: serde_json::Error| TaskError::classified(ErrorCode::BadRequest, e.to_string()))?
            .unwrap_or(ImageKind::Detail);
        let order_index = args.get("order_index").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
        let alt_text = args.get("alt_text").and_then(|v| v.as_str()).map(str::to_string);

        let page = self.fetcher.fetch(url, &self.retry).await.map_err(|e| TaskError::classified(ErrorCode::Timeout, e.to_string()))?;

        let digest = marketsync_core::canonical_checksum(&page.body).unwrap_or_default();
        tokio::fs::create_dir_all(&self.image_dir).await.map_err(|e| TaskError::classified(ErrorCode::StoreUnavailable, e.to_string()))?;
        let dest = self.image_dir.join(&digest);
        tokio::fs::write(&dest, page.body.as_bytes()).await.map_err(|e| TaskError::classified(ErrorCode::StoreUnavailable, e.to_string()))?;

        let mut siblings = self.store.list_product_images(product_ref).await;
        let image = ProductImage {
            id: Uuid::new_v4(),
            product_ref,
            url: dest.display().to_string(),
            kind,
            order_index,
            alt_text,
            file_size: Some(page.body.len() as u64),
            width: None,
            height: None,
        };
        siblings.push(image.clone());
        let report = marketsync_validate::validate_product_images(&siblings);
        if report.has_errors() {
            return Err(TaskError::classified(
                ErrorCode::ValidationError,
                format!("image violates ProductImage invariants: {:?}", report.of_severity(marketsync_validate::Severity::Error)),
            ));
        }

        self.store
            .upsert_product_image(image)
            .await
            .map_err(|e| TaskError::classified(ErrorCode::StoreUnavailable, e.to_string()))?;

        ctx.report_progress(100, "downloaded");
        Ok(())
    }
}
