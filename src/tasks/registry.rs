//! Auto-task registry — CRUD, trigger lifecycle, handler execution.
//!
//! Mirrors the reminder registry's lock discipline: one mutex over the
//! in-memory state, public methods lock once, the store is re-read before
//! reads and mutations.

use std::sync::Arc;

use chrono::{NaiveDateTime, Utc};
use tokio::sync::Mutex;

use crate::config::TaskConfig;
use crate::error::RegistryError;
use crate::feed::Feed;
use crate::ids;
use crate::reminders::ReminderRegistry;
use crate::store::dataset::Dataset;
use crate::store::{FileStore, OwnerMap};
use crate::tasks::handler::{HandlerContext, HandlerRegistry, TaskStats};
use crate::tasks::model::{
    AutoTask, ExecutionLog, ExecutionLogEntry, NewTask, parse_schedule_time,
};
use crate::tasks::trigger::TriggerTable;

/// Guarded registry state.
#[derive(Default)]
struct TaskState {
    records: OwnerMap<AutoTask>,
    log: ExecutionLog,
    triggers: TriggerTable,
}

/// Registry of recurring automated jobs.
pub struct TaskRegistry {
    config: TaskConfig,
    store: FileStore<OwnerMap<AutoTask>>,
    logs: FileStore<ExecutionLog>,
    handlers: Arc<HandlerRegistry>,
    reminders: Arc<ReminderRegistry>,
    feed: Option<Arc<dyn Feed>>,
    /// Scheduler-local UTC offset, fixed at construction.
    local_offset: chrono::FixedOffset,
    state: Mutex<TaskState>,
}

impl TaskRegistry {
    pub fn new(
        config: TaskConfig,
        store: FileStore<OwnerMap<AutoTask>>,
        logs: FileStore<ExecutionLog>,
        handlers: Arc<HandlerRegistry>,
        reminders: Arc<ReminderRegistry>,
        feed: Option<Arc<dyn Feed>>,
    ) -> Self {
        let local_offset = *chrono::Local::now().offset();
        Self {
            config,
            store,
            logs,
            handlers,
            reminders,
            feed,
            local_offset,
            state: Mutex::new(TaskState::default()),
        }
    }

    /// Load persisted state and register triggers for every active task.
    /// Call once at startup.
    pub async fn init(&self, now: NaiveDateTime) {
        let mut state = self.state.lock().await;
        state.records = self.store.load().await;
        state.log = self.logs.load().await;

        let state = &mut *state;
        let mut registered = 0usize;
        for (_, tasks) in state.records.iter_owners() {
            for task in tasks.values() {
                if task.is_active {
                    state
                        .triggers
                        .register_task(task, &self.config, self.local_offset, now);
                    registered += 1;
                }
            }
        }
        tracing::info!(
            tasks = state.records.total(),
            registered,
            "Task registry initialized"
        );
    }

    /// Create a task and register its trigger. Returns the generated id.
    pub async fn create(&self, owner_id: &str, input: NewTask) -> Result<String, RegistryError> {
        if owner_id.trim().is_empty() {
            return Err(invalid("owner_id", "must not be empty"));
        }
        if input.title.trim().is_empty() {
            return Err(invalid("title", "must not be empty"));
        }
        if input.task_type.trim().is_empty() {
            return Err(invalid("task_type", "must not be empty"));
        }
        if !self.handlers.has(&input.task_type).await {
            return Err(invalid(
                "task_type",
                format!("no handler registered for '{}'", input.task_type),
            ));
        }
        if input.schedule_pattern.uses_schedule_time()
            && parse_schedule_time(&input.schedule_time).is_none()
        {
            return Err(invalid(
                "schedule_time",
                format!("'{}' is not HH:MM", input.schedule_time),
            ));
        }

        let mut state = self.state.lock().await;
        state.records = self.store.load().await;

        if state.records.count(owner_id) >= self.config.max_per_owner {
            return Err(RegistryError::QuotaExceeded {
                max: self.config.max_per_owner,
            });
        }

        let mut task_id = ids::generate("task");
        while state.records.get(owner_id, &task_id).is_some() {
            task_id = ids::generate("task");
        }

        let task = AutoTask {
            task_id: task_id.clone(),
            owner_id: owner_id.to_string(),
            task_type: input.task_type,
            title: input.title,
            description: input.description,
            schedule_pattern: input.schedule_pattern,
            schedule_time: input.schedule_time,
            parameters: input.parameters,
            is_active: true,
            created_at: Utc::now(),
            last_executed: None,
            execution_count: 0,
        };

        let now = self.local_now();
        state
            .triggers
            .register_task(&task, &self.config, self.local_offset, now);
        if task.schedule_pattern == crate::tasks::model::SchedulePattern::Daily {
            // A daily task created just after its nominal time would wait a
            // full day; give it a near-term first run instead.
            state
                .triggers
                .register_bootstrap(&task_id, self.config.bootstrap_delay, now);
        }
        state.records.insert(task);

        self.store.save(&state.records).await?;
        tracing::info!(owner = owner_id, task = %task_id, "Created auto-task");
        Ok(task_id)
    }

    /// List an owner's tasks, oldest first. Re-reads the store.
    pub async fn list(&self, owner_id: &str) -> Vec<AutoTask> {
        let mut state = self.state.lock().await;
        state.records = self.store.load().await;
        let mut items: Vec<AutoTask> = state.records.owner(owner_id).cloned().collect();
        items.sort_by_key(|t| t.created_at);
        items
    }

    /// Flip a task's active flag, adding or removing its trigger
    /// registration. Returns the new active state.
    pub async fn toggle_active(
        &self,
        owner_id: &str,
        task_id: &str,
    ) -> Result<bool, RegistryError> {
        let mut state = self.state.lock().await;
        state.records = self.store.load().await;

        let now = self.local_now();
        let state = &mut *state;
        let task = state
            .records
            .get_mut(owner_id, task_id)
            .ok_or_else(|| not_found(task_id))?;

        task.is_active = !task.is_active;
        let active = task.is_active;
        if active {
            state
                .triggers
                .register_task(task, &self.config, self.local_offset, now);
        } else {
            state.triggers.clear_task(task_id);
        }

        self.store.save(&state.records).await?;
        tracing::info!(owner = owner_id, task = %task_id, active, "Toggled auto-task");
        Ok(active)
    }

    /// Delete a task and deregister its triggers.
    pub async fn delete(&self, owner_id: &str, task_id: &str) -> Result<bool, RegistryError> {
        let mut state = self.state.lock().await;
        state.records = self.store.load().await;

        if state.records.remove(owner_id, task_id).is_none() {
            return Err(not_found(task_id));
        }
        state.triggers.clear_task(task_id);
        self.store.save(&state.records).await?;

        state.records = self.store.load().await;
        if state.records.get(owner_id, task_id).is_some() {
            tracing::error!(owner = owner_id, task = %task_id, "Delete did not survive reload");
            return Ok(false);
        }
        tracing::info!(owner = owner_id, task = %task_id, "Deleted auto-task");
        Ok(true)
    }

    /// Execute one task by id: resolve its handler, run it, record the
    /// outcome. Returns whether the run was successful.
    pub async fn execute(&self, task_id: &str) -> Result<bool, RegistryError> {
        let mut state = self.state.lock().await;
        state.records = self.store.load().await;

        let Some(task) = find_task(&state.records, task_id).cloned() else {
            return Err(not_found(task_id));
        };
        if !task.is_active {
            tracing::debug!(task = %task_id, "Skipping execution of inactive task");
            return Ok(false);
        }

        let now = Utc::now();
        let result = match self.handlers.resolve(&task.task_type).await {
            Some(handler) => {
                let ctx = HandlerContext {
                    reminders: Arc::clone(&self.reminders),
                    feed: self.feed.clone(),
                    stats: stats_for(&state, &task.owner_id),
                    now: self.local_now(),
                };
                handler.execute(&task, &ctx).await
            }
            None => {
                tracing::warn!(task = %task_id, task_type = %task.task_type, "No handler registered");
                None
            }
        };
        let success = result.is_some();

        if let Some(record) = state.records.get_mut(&task.owner_id, task_id) {
            record.execution_count += 1;
            // last_executed only moves forward.
            record.last_executed = Some(record.last_executed.map_or(now, |t| t.max(now)));
        }
        state.log.push(ExecutionLogEntry {
            task_id: task_id.to_string(),
            executed_at: now,
            result,
            success,
        });
        state.log.truncate_to_window(self.config.log_window);
        state.triggers.clear_bootstrap(task_id);

        self.store.save(&state.records).await?;
        self.logs.save(&state.log).await?;

        tracing::info!(task = %task_id, success, "Executed auto-task");
        Ok(success)
    }

    /// Poll-loop entry: run every task whose trigger is due at `now`.
    /// Per-item failures are logged and never halt the scan.
    pub async fn run_due(&self, now: NaiveDateTime) -> usize {
        let due = {
            let mut state = self.state.lock().await;
            state.triggers.due(now)
        };

        let mut executed = 0usize;
        for task_id in due {
            match self.execute(&task_id).await {
                Ok(_) => executed += 1,
                Err(e) => {
                    tracing::error!(task = %task_id, "Scheduled execution failed: {}", e);
                }
            }
        }
        executed
    }

    /// Recent execution log entries, newest last.
    pub async fn recent_log(&self, limit: usize) -> Vec<ExecutionLogEntry> {
        let mut state = self.state.lock().await;
        state.log = self.logs.load().await;
        let entries = state.log.entries();
        let start = entries.len().saturating_sub(limit);
        entries[start..].to_vec()
    }

    fn local_now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// Find a task by id across owners.
fn find_task<'a>(records: &'a OwnerMap<AutoTask>, task_id: &str) -> Option<&'a AutoTask> {
    records
        .iter_owners()
        .find_map(|(_, tasks)| tasks.get(task_id))
}

fn stats_for(state: &TaskState, owner_id: &str) -> TaskStats {
    let active_tasks = state
        .records
        .iter_owners()
        .flat_map(|(_, tasks)| tasks.values())
        .filter(|t| t.is_active)
        .count();
    let owner_tasks = state
        .records
        .owner(owner_id)
        .filter(|t| t.is_active)
        .map(|t| (t.title.clone(), t.execution_count))
        .collect();
    TaskStats {
        active_tasks,
        log_entries: state.log.len(),
        owner_tasks,
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> RegistryError {
    RegistryError::InvalidInput {
        field,
        reason: reason.into(),
    }
}

fn not_found(id: &str) -> RegistryError {
    RegistryError::NotFound { id: id.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReminderConfig;
    use crate::reminders::model::parse_fire_at;
    use crate::tasks::builtin::{DigestHandler, UsageReportHandler};
    use crate::tasks::handler::TaskHandler;
    use crate::tasks::model::SchedulePattern;
    use async_trait::async_trait;
    use tempfile::TempDir;

    /// Handler that returns no result, for failure-path tests.
    struct EmptyHandler;

    #[async_trait]
    impl TaskHandler for EmptyHandler {
        fn task_type(&self) -> &str {
            "empty"
        }
        async fn execute(&self, _task: &AutoTask, _ctx: &HandlerContext) -> Option<String> {
            None
        }
    }

    async fn registry_at(dir: &TempDir) -> TaskRegistry {
        let reminders = Arc::new(ReminderRegistry::new(
            ReminderConfig::default(),
            FileStore::new(vec![dir.path().join("reminders.json")]),
        ));
        let handlers = Arc::new(HandlerRegistry::new());
        handlers.register(Arc::new(DigestHandler)).await;
        handlers.register(Arc::new(UsageReportHandler)).await;
        handlers.register(Arc::new(EmptyHandler)).await;
        TaskRegistry::new(
            TaskConfig::default(),
            FileStore::new(vec![dir.path().join("auto_tasks.json")]),
            FileStore::new(vec![dir.path().join("task_logs.json")]),
            handlers,
            reminders,
            None,
        )
    }

    fn new_task(task_type: &str, pattern: SchedulePattern) -> NewTask {
        NewTask {
            task_type: task_type.to_string(),
            title: format!("{task_type} task"),
            description: "test task".to_string(),
            schedule_pattern: pattern,
            schedule_time: "09:00".to_string(),
            parameters: serde_json::Map::new(),
        }
    }

    fn at(s: &str) -> NaiveDateTime {
        parse_fire_at(s).unwrap()
    }

    #[tokio::test]
    async fn create_and_list() {
        let dir = TempDir::new().unwrap();
        let registry = registry_at(&dir).await;

        let id = registry
            .create("u1", new_task("daily_digest", SchedulePattern::Daily))
            .await
            .unwrap();
        let tasks = registry.list("u1").await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].task_id, id);
        assert!(tasks[0].is_active);
    }

    #[tokio::test]
    async fn create_rejects_unknown_handler_and_bad_time() {
        let dir = TempDir::new().unwrap();
        let registry = registry_at(&dir).await;

        let err = registry
            .create("u1", new_task("nonexistent", SchedulePattern::Daily))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidInput { field: "task_type", .. }));

        let mut bad_time = new_task("daily_digest", SchedulePattern::Daily);
        bad_time.schedule_time = "nine".to_string();
        let err = registry.create("u1", bad_time).await.unwrap_err();
        assert!(matches!(err, RegistryError::InvalidInput { field: "schedule_time", .. }));
    }

    #[tokio::test]
    async fn quota_enforced() {
        let dir = TempDir::new().unwrap();
        let registry = registry_at(&dir).await;
        // Default max is 20; create up to it.
        for _ in 0..20 {
            registry
                .create("u1", new_task("daily_digest", SchedulePattern::Daily))
                .await
                .unwrap();
        }
        let err = registry
            .create("u1", new_task("daily_digest", SchedulePattern::Daily))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::QuotaExceeded { .. }));
    }

    #[tokio::test]
    async fn execute_records_outcome_and_counters() {
        let dir = TempDir::new().unwrap();
        let registry = registry_at(&dir).await;
        let id = registry
            .create("u1", new_task("usage_report", SchedulePattern::Weekly))
            .await
            .unwrap();

        assert!(registry.execute(&id).await.unwrap());

        let tasks = registry.list("u1").await;
        assert_eq!(tasks[0].execution_count, 1);
        assert!(tasks[0].last_executed.is_some());

        let log = registry.recent_log(10).await;
        assert_eq!(log.len(), 1);
        assert!(log[0].success);
        assert_eq!(log[0].task_id, id);
    }

    #[tokio::test]
    async fn empty_handler_result_is_failed_run_not_error() {
        let dir = TempDir::new().unwrap();
        let registry = registry_at(&dir).await;
        let id = registry
            .create("u1", new_task("empty", SchedulePattern::Hourly))
            .await
            .unwrap();

        assert!(!registry.execute(&id).await.unwrap());

        let tasks = registry.list("u1").await;
        // The run still counts.
        assert_eq!(tasks[0].execution_count, 1);
        let log = registry.recent_log(10).await;
        assert!(!log[0].success);
        assert!(log[0].result.is_none());
    }

    #[tokio::test]
    async fn execute_unknown_id_is_not_found() {
        let dir = TempDir::new().unwrap();
        let registry = registry_at(&dir).await;
        let err = registry.execute("task_0_000").await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound { .. }));
    }

    #[tokio::test]
    async fn toggle_removes_trigger_so_time_advance_does_not_execute() {
        let dir = TempDir::new().unwrap();
        let registry = registry_at(&dir).await;
        let id = registry
            .create("u1", new_task("usage_report", SchedulePattern::Weekly))
            .await
            .unwrap();

        // Deactivate, then simulate the poll loop far in the future: the
        // trigger registration is gone, so nothing runs.
        assert!(!registry.toggle_active("u1", &id).await.unwrap());
        let executed = registry.run_due(at("2030-01-01 09:00")).await;
        assert_eq!(executed, 0);
        assert_eq!(registry.list("u1").await[0].execution_count, 0);

        // Reactivation re-registers.
        assert!(registry.toggle_active("u1", &id).await.unwrap());
        let executed = registry.run_due(at("2030-01-06 09:00")).await;
        assert_eq!(executed, 1);
    }

    #[tokio::test]
    async fn delete_deregisters_and_survives_reload() {
        let dir = TempDir::new().unwrap();
        let registry = registry_at(&dir).await;
        let id = registry
            .create("u1", new_task("daily_digest", SchedulePattern::Daily))
            .await
            .unwrap();

        assert!(registry.delete("u1", &id).await.unwrap());
        assert!(registry.list("u1").await.is_empty());
        assert_eq!(registry.run_due(at("2030-01-01 09:00")).await, 0);

        let fresh = registry_at(&dir).await;
        fresh.init(at("2025-01-01 08:00")).await;
        assert!(fresh.list("u1").await.is_empty());
    }

    #[tokio::test]
    async fn init_registers_persisted_active_tasks() {
        let dir = TempDir::new().unwrap();
        let first = registry_at(&dir).await;
        first
            .create("u1", new_task("usage_report", SchedulePattern::Daily))
            .await
            .unwrap();

        // A new process over the same files picks the task up again.
        let second = registry_at(&dir).await;
        second.init(at("2025-01-01 08:00")).await;
        // 09:00 JST nominal time; in tests the exact local instant depends
        // on the host offset, so just advance a full week.
        let executed = second.run_due(at("2025-01-08 09:00")).await;
        assert_eq!(executed, 1);
    }

    #[tokio::test]
    async fn owner_scoping_on_toggle_and_delete() {
        let dir = TempDir::new().unwrap();
        let registry = registry_at(&dir).await;
        let id = registry
            .create("u1", new_task("daily_digest", SchedulePattern::Daily))
            .await
            .unwrap();

        assert!(matches!(
            registry.toggle_active("u2", &id).await.unwrap_err(),
            RegistryError::NotFound { .. }
        ));
        assert!(matches!(
            registry.delete("u2", &id).await.unwrap_err(),
            RegistryError::NotFound { .. }
        ));
    }
}
