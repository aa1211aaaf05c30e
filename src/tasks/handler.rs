//! Task-type handlers and their registry.
//!
//! Task types are an open string resolved against registered handlers
//! behind one capability interface — adding a kind is a registration
//! call, not a new branch.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use tokio::sync::RwLock;

use crate::feed::Feed;
use crate::reminders::ReminderRegistry;
use crate::tasks::model::AutoTask;

/// Snapshot of registry statistics exposed to handlers.
#[derive(Debug, Clone, Default)]
pub struct TaskStats {
    /// Active tasks across all owners.
    pub active_tasks: usize,
    /// Total execution log entries currently retained.
    pub log_entries: usize,
    /// The executing owner's active tasks as `(title, execution_count)`.
    pub owner_tasks: Vec<(String, u64)>,
}

/// Everything a handler may touch while executing.
pub struct HandlerContext {
    /// Handlers deliver their payloads by creating reminders.
    pub reminders: Arc<ReminderRegistry>,
    /// Optional external data provider.
    pub feed: Option<Arc<dyn Feed>>,
    /// Statistics snapshot taken at execution time.
    pub stats: TaskStats,
    /// Scheduler-local wall clock at execution time.
    pub now: NaiveDateTime,
}

/// A registered task kind.
///
/// Returning `None` means the handler produced nothing; the run is
/// recorded as unsuccessful without raising.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// The `task_type` tag this handler answers to.
    fn task_type(&self) -> &str;

    async fn execute(&self, task: &AutoTask, ctx: &HandlerContext) -> Option<String>;
}

/// Registry mapping task-type tags to handlers.
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn TaskHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler under its own tag.
    pub async fn register(&self, handler: Arc<dyn TaskHandler>) {
        let tag = handler.task_type().to_string();
        self.handlers.write().await.insert(tag.clone(), handler);
        tracing::debug!("Registered task handler: {}", tag);
    }

    /// Resolve a task type to its handler.
    pub async fn resolve(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.read().await.get(task_type).cloned()
    }

    /// Whether a task type is registered.
    pub async fn has(&self, task_type: &str) -> bool {
        self.handlers.read().await.contains_key(task_type)
    }

    /// All registered tags.
    pub async fn list(&self) -> Vec<String> {
        self.handlers.read().await.keys().cloned().collect()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
