//! Engine facade over the registries.
//!
//! The gateway hands every inbound event here: duplicates are dropped
//! through the TTL window, same-owner requests are serialized, free text
//! is classified, and the structured request is dispatched to the right
//! registry. Replies are human-readable; internal failures surface only
//! as "temporarily unavailable".

use std::sync::Arc;

use crate::classify::{Classifier, StructuredRequest};
use crate::dedup::{OwnerGate, SeenKeys};
use crate::error::RegistryError;
use crate::reminders::{ReminderRegistry, format::format_list};
use crate::tasks::{TaskRegistry, model::format_task_list};

/// Shared dependencies of the engine facade.
pub struct EngineDeps {
    pub reminders: Arc<ReminderRegistry>,
    pub tasks: Arc<TaskRegistry>,
    pub classifier: Arc<dyn Classifier>,
}

/// Request-handling front of the scheduling engine.
pub struct Engine {
    deps: EngineDeps,
    seen: SeenKeys,
    gate: OwnerGate,
}

impl Engine {
    pub fn new(deps: EngineDeps, event_ttl: std::time::Duration) -> Self {
        Self {
            deps,
            seen: SeenKeys::new(event_ttl),
            gate: OwnerGate::new(),
        }
    }

    /// Handle one inbound event. Returns `None` for duplicate events,
    /// otherwise the reply to show the owner.
    pub async fn handle_event(
        &self,
        owner_id: &str,
        event_key: &str,
        text: &str,
    ) -> Option<String> {
        if !self.seen.insert(event_key).await {
            tracing::debug!(owner = owner_id, event = event_key, "Dropping duplicate event");
            return None;
        }
        let _owner_guard = self.gate.acquire(owner_id).await;

        let request = match self.deps.classifier.classify(text).await {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(owner = owner_id, "Classification failed: {}", e);
                return Some("⚠️ Sorry, that's temporarily unavailable. Please try again.".to_string());
            }
        };
        Some(self.dispatch(owner_id, request).await)
    }

    /// Dispatch a structured request and render the reply.
    pub async fn dispatch(&self, owner_id: &str, request: StructuredRequest) -> String {
        let now = chrono::Local::now().naive_local();
        match request {
            StructuredRequest::CreateReminder(input) => {
                match self.deps.reminders.create(owner_id, input).await {
                    Ok(id) => format!("✅ Reminder set. 🆔 {id}"),
                    Err(e) => friendly(e),
                }
            }
            StructuredRequest::ListReminders => {
                format_list(&self.deps.reminders.list(owner_id).await, now)
            }
            StructuredRequest::UpdateReminder { id, changes } => {
                match self.deps.reminders.update(owner_id, &id, changes).await {
                    Ok(true) => format!("✅ Reminder updated: {id}"),
                    Ok(false) => "Nothing to change.".to_string(),
                    Err(e) => friendly(e),
                }
            }
            StructuredRequest::AcknowledgeReminder { id } => {
                match self.deps.reminders.acknowledge(owner_id, &id).await {
                    Ok(true) => format!("✅ Acknowledged: {id}"),
                    Ok(false) => format!("Already acknowledged: {id}"),
                    Err(e) => friendly(e),
                }
            }
            StructuredRequest::DeleteReminder { id } => {
                match self.deps.reminders.delete(owner_id, &id).await {
                    Ok(true) => format!("🗑️ Deleted: {id}"),
                    Ok(false) => "❌ Delete could not be confirmed. Please check the list.".to_string(),
                    Err(e) => friendly(e),
                }
            }
            StructuredRequest::DeleteAllReminders => {
                match self.deps.reminders.delete_all(owner_id).await {
                    Ok(0) => "No reminders to delete.".to_string(),
                    Ok(count) => format!("🗑️ Deleted {count} reminder(s)."),
                    Err(e) => friendly(e),
                }
            }
            StructuredRequest::CreateTask(input) => {
                match self.deps.tasks.create(owner_id, input).await {
                    Ok(id) => format!("✅ Auto-task created. 🆔 {id}"),
                    Err(e) => friendly(e),
                }
            }
            StructuredRequest::ListTasks => {
                format_task_list(&self.deps.tasks.list(owner_id).await)
            }
            StructuredRequest::ToggleTask { id } => {
                match self.deps.tasks.toggle_active(owner_id, &id).await {
                    Ok(true) => format!("✅ Task enabled: {id}"),
                    Ok(false) => format!("⏸️ Task disabled: {id}"),
                    Err(e) => friendly(e),
                }
            }
            StructuredRequest::DeleteTask { id } => {
                match self.deps.tasks.delete(owner_id, &id).await {
                    Ok(true) => format!("🗑️ Task deleted: {id}"),
                    Ok(false) => "❌ Delete could not be confirmed. Please check the list.".to_string(),
                    Err(e) => friendly(e),
                }
            }
            StructuredRequest::Unknown => {
                "🤔 I couldn't work out what to schedule from that. Try \
                 'remind me at 2025-01-01 09:00 to ...'."
                    .to_string()
            }
        }
    }
}

/// Map a registry error to a user-visible message. Input problems are
/// explained; internal failures are not leaked.
fn friendly(error: RegistryError) -> String {
    match error {
        RegistryError::InvalidInput { field, reason } => {
            format!("⚠️ {field}: {reason}")
        }
        RegistryError::NotFound { id } => format!("❌ Nothing found with id {id}."),
        RegistryError::QuotaExceeded { max } => {
            format!("⚠️ You've hit the limit of {max}. Delete something first.")
        }
        RegistryError::Persistence(e) => {
            tracing::error!("Persistence failure surfaced to user: {}", e);
            "⚠️ Sorry, that's temporarily unavailable. Please try again.".to_string()
        }
    }
}
