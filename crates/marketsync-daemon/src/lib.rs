// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! The administrative HTTP control plane plus the real-time push surface
//! described in `SPEC_FULL.md` §6: list/inspect products, create and manage
//! `SyncRun`s, read dashboard KPIs, and subscribe to push events over a
//! WebSocket.
//!
//! Router composition follows the ancestor workspace's `abp-daemon::build_app`:
//! one `AppState` behind an `Arc`, routes registered on a single `Router`,
//! `tower_http::cors` plus two `axum::middleware::from_fn` layers stacked on
//! top. The daemon itself never runs a sync pipeline inline — it only
//! creates `SyncRun` rows and enqueues `QueuedWork`; a `marketsync-runtime`
//! worker process (see `marketsync-cli`'s `worker` subcommand) does the work.

pub mod api;
pub mod events;
pub mod middleware;
pub mod ws;

use api::{
    ApiError, CreateSyncRunRequest, HealthResponse, ProductListQuery, ProductListResponse,
    ProgressResponse, RetrySyncRunQuery, SyncRunCreated, WorkAccepted,
};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use events::{Channel, EventBus};
use marketsync_core::{Checkpoint, OperationType, SyncRun, SyncRunStatus, SyncType};
use marketsync_queue::{DurableQueue, Priority, QueueName, QueuedWork};
use marketsync_store::{PersistencePort, StoreError};
use marketsync_supervise::SupervisionThresholds;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Shared state handed to every handler.
pub struct AppState {
    /// The persistence boundary.
    pub store: Arc<dyn PersistencePort>,
    /// The queue sync and image work is enqueued onto.
    pub queue: Arc<Mutex<DurableQueue>>,
    /// The real-time push hub.
    pub events: EventBus,
    /// Thresholds used to decide whether `/health` reports degraded.
    pub thresholds: SupervisionThresholds,
    /// When this daemon process started, for uptime reporting.
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Construct state bound to `store` and `queue`, starting the uptime
    /// clock at `now`.
    #[must_use]
    pub fn new(store: Arc<dyn PersistencePort>, queue: Arc<Mutex<DurableQueue>>, now: DateTime<Utc>) -> Self {
        Self {
            store,
            queue,
            events: EventBus::new(),
            thresholds: SupervisionThresholds::default(),
            started_at: now,
        }
    }
}

/// Build the Axum router with every administrative and push route mounted.
#[must_use]
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/products", get(list_products))
        .route("/products/{id}", get(get_product))
        .route("/products/{id}/sync", post(sync_product))
        .route("/sync-records", post(create_sync_run))
        .route("/sync-records/{id}/cancel", post(cancel_sync_run))
        .route("/sync-records/{id}/retry", post(retry_sync_run))
        .route("/sync-records/progress/{task_id}", get(get_progress))
        .route("/dashboard/stats", get(get_dashboard_stats))
        .route("/ws", get(ws::upgrade))
        .layer(axum::middleware::from_fn(middleware::request_logger))
        .layer(axum::middleware::from_fn(middleware::request_id_middleware))
        .layer(middleware::cors_layer())
        .with_state(state)
}

async fn get_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let now = Utc::now();
    let stats = state.queue.lock().await.stats(now);
    let degraded = stats.total >= state.thresholds.max_queue_depth;

    let body = HealthResponse {
        status: if degraded { "degraded".to_string() } else { "ok".to_string() },
        contract_version: marketsync_core::CONTRACT_VERSION,
        uptime_seconds: (now - state.started_at).num_seconds().max(0),
        queue_depth: stats.total,
        push_subscribers: state.events.subscriber_count().await,
    };

    let status = if degraded { StatusCode::SERVICE_UNAVAILABLE } else { StatusCode::OK };
    (status, Json(body))
}

async fn list_products(Query(query): Query<ProductListQuery>, State(state): State<Arc<AppState>>) -> Json<ProductListResponse> {
    let filter: marketsync_store::ProductFilter = query.into();
    let offset = filter.offset;
    let limit = filter.limit;
    let page = state.store.list_products(&filter).await;
    Json(ProductListResponse { items: page.items, total: page.total, offset, limit })
}

async fn get_product(Path(id): Path<Uuid>, State(state): State<Arc<AppState>>) -> Result<Json<marketsync_core::Product>, ApiError> {
    state
        .store
        .get_product(id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("no product with id {id}")))
}

async fn sync_product(Path(id): Path<Uuid>, State(state): State<Arc<AppState>>) -> Result<(StatusCode, Json<WorkAccepted>), ApiError> {
    if state.store.get_product(id).await.is_none() {
        return Err(ApiError::not_found(format!("no product with id {id}")));
    }

    let work_id = Uuid::new_v4();
    enqueue(&state, work_id, "sync.products", QueueName::Default, Priority::HIGH, serde_json::json!({ "product_id": id }))
        .await
        .map_err(ApiError::internal)?;

    Ok((StatusCode::ACCEPTED, Json(WorkAccepted { work_id })))
}

fn task_name_for(sync_type: SyncType) -> &'static str {
    match sync_type {
        SyncType::Product => "sync.products",
        SyncType::Supplier => "sync.suppliers",
        SyncType::Image => "image.download",
        SyncType::All => "batch.import",
    }
}

async fn create_sync_run(State(state): State<Arc<AppState>>, Json(req): Json<CreateSyncRunRequest>) -> Result<(StatusCode, Json<SyncRunCreated>), ApiError> {
    let task_id = Uuid::new_v4();
    let task_name = task_name_for(req.sync_type);
    let now = Utc::now();

    let run = SyncRun {
        task_id,
        task_name: task_name.to_string(),
        operation_type: req.operation_type,
        sync_type: req.sync_type,
        status: SyncRunStatus::Pending,
        progress: 0,
        counters: Default::default(),
        started_at: Some(now),
        finished_at: None,
        error_digest: Default::default(),
        config_snapshot: req.source_filter,
        recommendations: Vec::new(),
        retried_from: None,
    };
    state.store.create_sync_run(run).await.map_err(|e| ApiError::internal(e.to_string()))?;

    let priority = match req.operation_type {
        OperationType::Manual => Priority::HIGH,
        OperationType::Scheduled | OperationType::Full | OperationType::Incremental => Priority::NORMAL,
    };
    enqueue(&state, task_id, task_name, QueueName::DataSync, priority, serde_json::json!({ "task_id": task_id }))
        .await
        .map_err(ApiError::internal)?;

    Ok((StatusCode::ACCEPTED, Json(SyncRunCreated { task_id })))
}

async fn cancel_sync_run(Path(id): Path<Uuid>, State(state): State<Arc<AppState>>) -> Result<StatusCode, ApiError> {
    if state.store.get_sync_run(id).await.is_none() {
        return Err(ApiError::not_found(format!("no sync run with task id {id}")));
    }
    state.store.request_cancel(id).await;
    Ok(StatusCode::ACCEPTED)
}

async fn retry_sync_run(
    Path(id): Path<Uuid>,
    Query(params): Query<RetrySyncRunQuery>,
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<SyncRunCreated>), ApiError> {
    let previous = state.store.get_sync_run(id).await.ok_or_else(|| ApiError::not_found(format!("no sync run with task id {id}")))?;
    if !previous.status.is_terminal() {
        return Err(ApiError::conflict(format!("sync run {id} has not finished yet")));
    }

    let task_id = Uuid::new_v4();
    let task_name = previous.task_name.clone();
    let now = Utc::now();
    let mut counters = marketsync_core::SyncCounters::default();

    if params.resume_from_checkpoint {
        match state.store.read_checkpoint(previous.task_id).await {
            Ok(Some(checkpoint)) => {
                counters = checkpoint.counters;
                carry_over_checkpoint(state.store.as_ref(), task_id, checkpoint.cursor, counters).await.map_err(|e| ApiError::internal(e.to_string()))?;
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(target: "marketsync.daemon", %err, task_id = %previous.task_id, "could not read prior checkpoint, retrying from the beginning");
            }
        }
    }

    let run = SyncRun {
        task_id,
        task_name: task_name.clone(),
        operation_type: previous.operation_type,
        sync_type: previous.sync_type,
        status: SyncRunStatus::Pending,
        progress: 0,
        counters,
        started_at: Some(now),
        finished_at: None,
        error_digest: Default::default(),
        config_snapshot: previous.config_snapshot.clone(),
        recommendations: Vec::new(),
        retried_from: Some(previous.task_id),
    };
    state.store.create_sync_run(run).await.map_err(|e| ApiError::internal(e.to_string()))?;
    enqueue(&state, task_id, &task_name, QueueName::DataSync, Priority::HIGH, serde_json::json!({ "task_id": task_id }))
        .await
        .map_err(ApiError::internal)?;

    Ok((StatusCode::ACCEPTED, Json(SyncRunCreated { task_id })))
}

/// Re-key the previous task's last checkpoint under the retry's fresh
/// `task_id`, so the retried run's [`marketsync_runtime::TaskContext`] (keyed
/// by `task_id`) resumes from it instead of starting over.
async fn carry_over_checkpoint(
    store: &dyn PersistencePort,
    task_id: Uuid,
    cursor: Vec<u8>,
    counters: marketsync_core::SyncCounters,
) -> Result<(), StoreError> {
    let checksum = marketsync_core::canonical_checksum(&(&cursor, &counters)).unwrap_or_default();
    store
        .write_checkpoint(Checkpoint {
            task_id,
            sequence_no: 1,
            timestamp: Utc::now(),
            cursor,
            counters,
            checksum,
        })
        .await
}

async fn get_progress(Path(task_id): Path<Uuid>, State(state): State<Arc<AppState>>) -> Result<Json<ProgressResponse>, ApiError> {
    let run = state.store.get_sync_run(task_id).await.ok_or_else(|| ApiError::not_found(format!("no sync run with task id {task_id}")))?;
    Ok(Json(ProgressResponse { task_id: run.task_id, status: run.status, progress: run.progress, counters: run.counters }))
}

async fn get_dashboard_stats(State(state): State<Arc<AppState>>) -> Json<marketsync_supervise::DashboardStats> {
    Json(marketsync_supervise::dashboard_stats(state.store.as_ref(), Utc::now()).await)
}

async fn enqueue(state: &AppState, work_id: Uuid, task_name: &str, queue_name: QueueName, priority: Priority, payload: serde_json::Value) -> Result<(), String> {
    let now = Utc::now();
    let mut queue = state.queue.lock().await;
    queue
        .enqueue(QueuedWork {
            work_id,
            task_name: task_name.to_string(),
            queue_name,
            priority,
            payload,
            enqueued_at: now,
            not_before: now,
            attempt_no: 0,
            lease: None,
        })
        .map_err(|e| e.to_string())?;
    drop(queue);
    state.events.publish(Channel::SyncProgress, Some(work_id), serde_json::json!({ "status": "queued", "task_name": task_name })).await;
    Ok(())
}
