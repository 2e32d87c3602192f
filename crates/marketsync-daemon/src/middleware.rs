// SPDX-License-Identifier: MIT OR Apache-2.0
//! Request-id tagging, structured request logging, and permissive CORS for
//! the administrative surface. Adapted from the ancestor workspace's
//! `abp-daemon::middleware`.

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

/// A unique request identifier, available as an Axum extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub Uuid);

/// Tags each request with a [`RequestId`] and echoes it as `x-request-id`.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let id = RequestId(Uuid::new_v4());
    req.extensions_mut().insert(id);
    let mut resp = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&id.0.to_string()) {
        resp.headers_mut().insert("x-request-id", value);
    }
    resp
}

/// Logs method, path, status, and duration for each request via `tracing`.
pub async fn request_logger(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let start = Instant::now();

    let resp = next.run(req).await;

    tracing::info!(
        target: "marketsync.daemon.http",
        http_method = %method,
        http_path = %path,
        http_status = resp.status().as_u16(),
        http_duration_ms = start.elapsed().as_millis() as u64,
        "request completed"
    );

    resp
}

/// Permissive CORS layer suitable for the reference build; a production
/// deployment would scope origins from [`marketsync_config::MarketsyncConfig`]
/// instead.
#[must_use]
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
}
