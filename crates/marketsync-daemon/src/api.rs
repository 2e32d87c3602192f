// SPDX-License-Identifier: MIT OR Apache-2.0
//! HTTP request/response envelopes and the structured [`ApiError`] every
//! handler returns on failure.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use marketsync_core::{OperationType, SyncCounters, SyncRunStatus, SyncType};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Query parameters accepted by `GET /products`.
#[derive(Debug, Default, Deserialize)]
pub struct ProductListQuery {
    /// Case-insensitive substring match against `title`.
    pub text: Option<String>,
    /// Exact match against `category_id`.
    pub category: Option<String>,
    /// Exact match against `supplier_ref`.
    pub supplier: Option<Uuid>,
    /// Exact match against `status`.
    pub status: Option<marketsync_core::ProductStatus>,
    /// Exact match against `sync_status`.
    pub sync_status: Option<marketsync_core::SyncStatus>,
    /// Inclusive lower bound on price.
    pub min_price: Option<f64>,
    /// Inclusive upper bound on price.
    pub max_price: Option<f64>,
    /// Inclusive lower bound on rating.
    pub min_rating: Option<f64>,
    /// Zero-based page offset, defaulting to 0.
    pub offset: Option<usize>,
    /// Page size, defaulting to 50.
    pub limit: Option<usize>,
}

const DEFAULT_PAGE_SIZE: usize = 50;

impl From<ProductListQuery> for marketsync_store::ProductFilter {
    fn from(q: ProductListQuery) -> Self {
        marketsync_store::ProductFilter {
            text: q.text,
            category_id: q.category,
            supplier_ref: q.supplier,
            status: q.status,
            sync_status: q.sync_status,
            min_price: q.min_price,
            max_price: q.max_price,
            min_rating: q.min_rating,
            include_duplicates: false,
            offset: q.offset.unwrap_or(0),
            limit: q.limit.unwrap_or(DEFAULT_PAGE_SIZE),
        }
    }
}

/// Response body for `GET /products`.
#[derive(Debug, Serialize)]
pub struct ProductListResponse {
    /// Matching products on this page.
    pub items: Vec<marketsync_core::Product>,
    /// Total matching rows across all pages.
    pub total: usize,
    /// Offset this page started from.
    pub offset: usize,
    /// Page size requested.
    pub limit: usize,
}

/// Response body for `POST /products/{id}/sync` and the enqueue-sync-record
/// handlers: the caller gets back the identifier of the work it created.
#[derive(Debug, Serialize)]
pub struct WorkAccepted {
    /// Identifier of the enqueued work item or `SyncRun`.
    pub work_id: Uuid,
}

/// Query parameters accepted by `POST /sync-records/{id}/retry`.
#[derive(Debug, Default, Deserialize)]
pub struct RetrySyncRunQuery {
    /// Carry the prior run's last checkpoint over to the retry instead of
    /// starting from the beginning.
    #[serde(default)]
    pub resume_from_checkpoint: bool,
}

/// Request body for `POST /sync-records`.
#[derive(Debug, Deserialize)]
pub struct CreateSyncRunRequest {
    /// Why this run was started.
    pub operation_type: OperationType,
    /// What kind of entity this run syncs.
    pub sync_type: SyncType,
    /// Opaque filter the coordinator's listing source should apply, echoed
    /// back verbatim in the stored `config_snapshot`.
    #[serde(default)]
    pub source_filter: serde_json::Value,
}

/// Response body for `POST /sync-records`.
#[derive(Debug, Serialize)]
pub struct SyncRunCreated {
    /// Newly created run's task id.
    pub task_id: Uuid,
}

/// Response body for `GET /sync-records/progress/{task_id}`.
#[derive(Debug, Serialize)]
pub struct ProgressResponse {
    /// The run's task id.
    pub task_id: Uuid,
    /// Current status.
    pub status: SyncRunStatus,
    /// Progress percentage in `[0, 100]`.
    pub progress: u8,
    /// Running counters.
    pub counters: SyncCounters,
}

/// Response body for `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `"ok"` or `"degraded"`.
    pub status: String,
    /// Contract version reported by the server.
    pub contract_version: &'static str,
    /// Server uptime in seconds.
    pub uptime_seconds: i64,
    /// Total queued work items across all queues.
    pub queue_depth: usize,
    /// Live WebSocket subscriber count.
    pub push_subscribers: usize,
}

/// Structured API error returned on failure, mirroring the ancestor
/// workspace's discriminated `ApiError` (`abp-daemon::api`): a stable code, a
/// human message, and an HTTP status derived from the code.
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    /// Machine-readable error code, e.g. `"not_found"`.
    pub code: &'static str,
    /// Human-readable message.
    pub message: String,
    #[serde(skip)]
    status: StatusCode,
}

impl ApiError {
    /// 404 — resource not found.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self { code: "not_found", message: message.into(), status: StatusCode::NOT_FOUND }
    }

    /// 400 — the request was malformed or invalid.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self { code: "invalid_request", message: message.into(), status: StatusCode::BAD_REQUEST }
    }

    /// 409 — conflicting state (e.g. retrying a run that hasn't finished).
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self { code: "conflict", message: message.into(), status: StatusCode::CONFLICT }
    }

    /// 500 — unexpected internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self { code: "internal_error", message: message.into(), status: StatusCode::INTERNAL_SERVER_ERROR }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_carries_its_status_code() {
        let err = ApiError::not_found("no such product");
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn product_list_query_defaults_page_size() {
        let filter: marketsync_store::ProductFilter = ProductListQuery::default().into();
        assert_eq!(filter.limit, DEFAULT_PAGE_SIZE);
        assert_eq!(filter.offset, 0);
        assert!(!filter.include_duplicates);
    }
}
