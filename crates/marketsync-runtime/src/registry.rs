// SPDX-License-Identifier: MIT OR Apache-2.0
//! Typed registry of named task handlers.

use crate::context::TaskContext;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Errors a [`TaskHandler`] can return.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    /// The underlying operation failed with a classified error code.
    #[error("{code}: {message}")]
    Classified {
        /// The error's machine-readable code.
        code: marketsync_error::ErrorCode,
        /// Human-readable detail.
        message: String,
    },
    /// The task observed a cancellation request at a safe point.
    #[error("cancelled")]
    Cancelled,
}

impl TaskError {
    /// Build a classified error.
    #[must_use]
    pub fn classified(code: marketsync_error::ErrorCode, message: impl Into<String>) -> Self {
        Self::Classified {
            code,
            message: message.into(),
        }
    }
}

/// A named, invokable unit of work.
///
/// Mirrors the ancestor workspace's `Backend` trait (`abp-integrations`):
/// one `run` entry point taking the work's arguments and an execution
/// context, returning `Result<(), TaskError>`.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Execute this task with the decoded arguments and a live context.
    ///
    /// # Errors
    ///
    /// Returns a [`TaskError`] describing why the task could not complete.
    async fn run(&self, args: serde_json::Value, ctx: &TaskContext) -> Result<(), TaskError>;
}

/// Maps symbolic task names (`"crawl.fetch_products"`, `"image.download"`, …)
/// to their [`TaskHandler`] implementation.
#[derive(Default, Clone)]
pub struct TaskRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl TaskRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `name`, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, handler: impl TaskHandler + 'static) {
        self.handlers.insert(name.into(), Arc::new(handler));
    }

    /// Look up a handler by its symbolic name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(name).cloned()
    }

    /// Sorted list of registered task names.
    #[must_use]
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// `true` if a handler is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }
}

/// The 16 task handler names a complete worker pool registers.
pub const KNOWN_TASK_NAMES: &[&str] = &[
    "crawl.fetch_products",
    "crawl.fetch_product_details",
    "crawl.fetch_suppliers",
    "crawl.sync_category",
    "image.download",
    "image.resize",
    "image.optimize",
    "image.thumbnail",
    "sync.products",
    "sync.suppliers",
    "sync.validate",
    "sync.cleanup_duplicates",
    "batch.import",
    "batch.export",
    "batch.update",
    "batch.delete",
];
