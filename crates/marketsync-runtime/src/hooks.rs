// SPDX-License-Identifier: MIT OR Apache-2.0
//! Lifecycle hooks for worker-pool extensibility.
//!
//! Register [`TaskLifecycleHook`] implementations with a [`HookRegistry`] to
//! observe task start/complete/error without modifying the worker loop —
//! the same extension shape as the ancestor workspace's `LifecycleHook` /
//! `HookRegistry` (`abp-runtime::hooks`).

use crate::registry::TaskError;

/// Extension point called at well-defined moments in a task's lifecycle.
/// All methods default to no-ops so a hook only overrides what it needs.
pub trait TaskLifecycleHook: Send + Sync {
    /// Called immediately before a leased task is invoked.
    fn on_task_start(&self, _task_name: &str) {}

    /// Called after a task's handler returns successfully.
    fn on_task_complete(&self, _task_name: &str) {}

    /// Called when a task's handler returns an error.
    fn on_task_error(&self, _task_name: &str, _error: &TaskError) {}

    /// Human-readable name for logging and diagnostics.
    fn name(&self) -> &str;
}

/// Ordered collection of [`TaskLifecycleHook`]s, fired in registration order.
#[derive(Default)]
pub struct HookRegistry {
    hooks: Vec<Box<dyn TaskLifecycleHook>>,
}

impl HookRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a hook.
    pub fn register(&mut self, hook: Box<dyn TaskLifecycleHook>) {
        self.hooks.push(hook);
    }

    /// Fire [`TaskLifecycleHook::on_task_start`] on every registered hook.
    pub fn fire_start(&self, task_name: &str) {
        for hook in &self.hooks {
            hook.on_task_start(task_name);
        }
    }

    /// Fire [`TaskLifecycleHook::on_task_complete`] on every registered hook.
    pub fn fire_complete(&self, task_name: &str) {
        for hook in &self.hooks {
            hook.on_task_complete(task_name);
        }
    }

    /// Fire [`TaskLifecycleHook::on_task_error`] on every registered hook.
    pub fn fire_error(&self, task_name: &str, error: &TaskError) {
        for hook in &self.hooks {
            hook.on_task_error(task_name, error);
        }
    }

    /// Number of registered hooks.
    #[must_use]
    pub fn hook_count(&self) -> usize {
        self.hooks.len()
    }
}

/// Logs task lifecycle transitions via `tracing`.
pub struct LoggingHook;

impl TaskLifecycleHook for LoggingHook {
    fn on_task_start(&self, task_name: &str) {
        tracing::info!(target: "marketsync.hooks", task_name, "task starting");
    }

    fn on_task_complete(&self, task_name: &str) {
        tracing::info!(target: "marketsync.hooks", task_name, "task complete");
    }

    fn on_task_error(&self, task_name: &str, error: &TaskError) {
        tracing::error!(target: "marketsync.hooks", task_name, %error, "task failed");
    }

    fn name(&self) -> &str {
        "logging"
    }
}
