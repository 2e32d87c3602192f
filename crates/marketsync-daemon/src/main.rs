// SPDX-License-Identifier: MIT OR Apache-2.0
//! Administrative daemon entry point: load configuration, bind a listener,
//! serve the router built by [`marketsync_daemon::build_app`].

use chrono::Utc;
use marketsync_daemon::AppState;
use marketsync_queue::DurableQueue;
use marketsync_store::InMemoryStore;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))).init();

    let mut config = marketsync_config::load_config(None)?;
    marketsync_config::apply_env_overrides(&mut config);
    for warning in marketsync_config::validate_config(&config)? {
        tracing::warn!(target: "marketsync.daemon", ?warning, "configuration warning");
    }
    let store: Arc<dyn marketsync_store::PersistencePort> = Arc::new(InMemoryStore::new());
    let queue = Arc::new(Mutex::new(DurableQueue::new(DEFAULT_QUEUE_CAPACITY)));
    let state = Arc::new(AppState::new(store, queue, Utc::now()));
    let app = marketsync_daemon::build_app(state);

    let addr = format!("0.0.0.0:{}", std::env::var("PORT").unwrap_or_else(|_| "8080".to_string()));
    tracing::info!(target: "marketsync.daemon", %addr, db_url = ?config.db_url, "starting administrative daemon");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
