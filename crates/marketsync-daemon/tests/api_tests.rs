// SPDX-License-Identifier: MIT OR Apache-2.0
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use http_body_util::BodyExt;
use marketsync_daemon::{AppState, build_app};
use marketsync_queue::DurableQueue;
use marketsync_store::InMemoryStore;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower::ServiceExt;

fn test_state() -> Arc<AppState> {
    let store: Arc<dyn marketsync_store::PersistencePort> = Arc::new(InMemoryStore::new());
    let queue = Arc::new(Mutex::new(DurableQueue::new(16)));
    Arc::new(AppState::new(store, queue, Utc::now()))
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_reports_ok_when_queue_is_shallow() {
    let app = build_app(test_state());
    let resp = app.oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn unknown_product_is_404() {
    let app = build_app(test_state());
    let id = uuid::Uuid::new_v4();
    let resp = app.oneshot(Request::builder().uri(format!("/products/{id}")).body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn empty_product_list_has_zero_total() {
    let app = build_app(test_state());
    let resp = app.oneshot(Request::builder().uri("/products").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["total"], 0);
}

#[tokio::test]
async fn creating_a_sync_run_enqueues_work_and_returns_202() {
    let state = test_state();
    let app = build_app(state.clone());

    let body = serde_json::json!({
        "operation_type": "manual",
        "sync_type": "product",
        "source_filter": {"category": "fasteners"},
    });
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/sync-records")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let json = body_json(resp).await;
    let task_id: uuid::Uuid = serde_json::from_value(json["task_id"].clone()).unwrap();

    let run = state.store.get_sync_run(task_id).await.unwrap();
    assert_eq!(run.task_name, "sync.products");
    assert_eq!(state.queue.lock().await.len(), 1);
}

#[tokio::test]
async fn cancelling_an_unknown_run_is_404() {
    let app = build_app(test_state());
    let id = uuid::Uuid::new_v4();
    let resp = app.oneshot(Request::builder().method("POST").uri(format!("/sync-records/{id}/cancel")).body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn retrying_a_still_running_run_is_a_conflict() {
    let state = test_state();
    let app = build_app(state.clone());

    let run = marketsync_core::SyncRun {
        task_id: uuid::Uuid::new_v4(),
        task_name: "sync.products".to_string(),
        operation_type: marketsync_core::OperationType::Manual,
        sync_type: marketsync_core::SyncType::Product,
        status: marketsync_core::SyncRunStatus::Running,
        progress: 40,
        counters: Default::default(),
        started_at: Some(Utc::now()),
        finished_at: None,
        error_digest: Default::default(),
        config_snapshot: serde_json::json!({}),
        recommendations: vec![],
        retried_from: None,
    };
    let task_id = run.task_id;
    state.store.create_sync_run(run).await.unwrap();

    let resp = app.oneshot(Request::builder().method("POST").uri(format!("/sync-records/{task_id}/retry")).body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn retry_without_flag_starts_from_an_empty_checkpoint() {
    let state = test_state();
    let app = build_app(state.clone());

    let previous_id = uuid::Uuid::new_v4();
    let run = marketsync_core::SyncRun {
        task_id: previous_id,
        task_name: "sync.products".to_string(),
        operation_type: marketsync_core::OperationType::Manual,
        sync_type: marketsync_core::SyncType::Product,
        status: marketsync_core::SyncRunStatus::Failed,
        progress: 60,
        counters: marketsync_core::SyncCounters { processed: 6, success: 6, ..Default::default() },
        started_at: Some(Utc::now()),
        finished_at: Some(Utc::now()),
        error_digest: Default::default(),
        config_snapshot: serde_json::json!({}),
        recommendations: vec![],
        retried_from: None,
    };
    state.store.create_sync_run(run).await.unwrap();
    state
        .store
        .write_checkpoint(marketsync_core::Checkpoint {
            task_id: previous_id,
            sequence_no: 1,
            timestamp: Utc::now(),
            cursor: b"page=3".to_vec(),
            counters: marketsync_core::SyncCounters { processed: 6, success: 6, ..Default::default() },
            checksum: String::new(),
        })
        .await
        .unwrap();

    let resp = app.oneshot(Request::builder().method("POST").uri(format!("/sync-records/{previous_id}/retry")).body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let json = body_json(resp).await;
    let retried_id: uuid::Uuid = serde_json::from_value(json["task_id"].clone()).unwrap();

    let retried = state.store.get_sync_run(retried_id).await.unwrap();
    assert_eq!(retried.retried_from, Some(previous_id));
    assert_eq!(retried.counters.processed, 0, "without the flag, a retry starts from scratch");
    assert!(state.store.read_checkpoint(retried_id).await.unwrap().is_none());
}

#[tokio::test]
async fn retry_with_resume_flag_carries_the_checkpoint_over() {
    let state = test_state();
    let app = build_app(state.clone());

    let previous_id = uuid::Uuid::new_v4();
    let run = marketsync_core::SyncRun {
        task_id: previous_id,
        task_name: "sync.products".to_string(),
        operation_type: marketsync_core::OperationType::Manual,
        sync_type: marketsync_core::SyncType::Product,
        status: marketsync_core::SyncRunStatus::Failed,
        progress: 60,
        counters: marketsync_core::SyncCounters { processed: 6, success: 6, ..Default::default() },
        started_at: Some(Utc::now()),
        finished_at: Some(Utc::now()),
        error_digest: Default::default(),
        config_snapshot: serde_json::json!({}),
        recommendations: vec![],
        retried_from: None,
    };
    state.store.create_sync_run(run).await.unwrap();
    let prior_counters = marketsync_core::SyncCounters { processed: 6, success: 6, ..Default::default() };
    state
        .store
        .write_checkpoint(marketsync_core::Checkpoint {
            task_id: previous_id,
            sequence_no: 1,
            timestamp: Utc::now(),
            cursor: b"page=3".to_vec(),
            counters: prior_counters,
            checksum: String::new(),
        })
        .await
        .unwrap();

    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/sync-records/{previous_id}/retry?resume_from_checkpoint=true"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let json = body_json(resp).await;
    let retried_id: uuid::Uuid = serde_json::from_value(json["task_id"].clone()).unwrap();

    let retried = state.store.get_sync_run(retried_id).await.unwrap();
    assert_eq!(retried.counters.processed, 6, "resuming should carry the prior counters over");

    let checkpoint = state.store.read_checkpoint(retried_id).await.unwrap().expect("checkpoint carried over under the new task id");
    assert_eq!(checkpoint.cursor, b"page=3");
    assert_eq!(checkpoint.counters.processed, 6);
}

#[tokio::test]
async fn dashboard_stats_counts_active_runs() {
    let state = test_state();
    let app = build_app(state.clone());

    let run = marketsync_core::SyncRun {
        task_id: uuid::Uuid::new_v4(),
        task_name: "sync.products".to_string(),
        operation_type: marketsync_core::OperationType::Manual,
        sync_type: marketsync_core::SyncType::Product,
        status: marketsync_core::SyncRunStatus::Running,
        progress: 10,
        counters: Default::default(),
        started_at: Some(Utc::now()),
        finished_at: None,
        error_digest: Default::default(),
        config_snapshot: serde_json::json!({}),
        recommendations: vec![],
        retried_from: None,
    };
    state.store.create_sync_run(run).await.unwrap();

    let resp = app.oneshot(Request::builder().uri("/dashboard/stats").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["active_runs"], 1);
}
