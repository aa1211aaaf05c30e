//! Reminder registry — CRUD, fire-and-reschedule, delivery dedup.
//!
//! One mutex guards all in-memory state; every public method locks once at
//! the top and works on the guarded state directly, so the locking
//! discipline is structural rather than flag-based. The store is re-read
//! at the start of read and mutate operations to bound lost updates
//! against other processes sharing the same files.

use std::collections::HashMap;

use chrono::{Duration, NaiveDateTime, Utc};
use tokio::sync::Mutex;

use crate::config::ReminderConfig;
use crate::delivery::Sender;
use crate::error::{RegistryError, SendError};
use crate::ids;
use crate::reminders::model::{
    HistoryEvent, HistoryKind, NewReminder, Notification, ReminderUpdate, format_fire_at,
    parse_fire_at,
};
use crate::reminders::schedule::{self, DueState};
use crate::store::{FileStore, OwnerMap};

/// Guarded registry state.
#[derive(Default)]
struct ReminderState {
    records: OwnerMap<Notification>,
    /// Per-id last successful delivery, for the dedup window.
    last_delivered: HashMap<String, NaiveDateTime>,
    /// Set after a blocked delivery channel; all sends pause until then.
    blocked_until: Option<NaiveDateTime>,
}

/// Registry of user-scoped reminders.
pub struct ReminderRegistry {
    config: ReminderConfig,
    store: FileStore<OwnerMap<Notification>>,
    state: Mutex<ReminderState>,
}

impl ReminderRegistry {
    pub fn new(config: ReminderConfig, store: FileStore<OwnerMap<Notification>>) -> Self {
        Self {
            config,
            store,
            state: Mutex::new(ReminderState::default()),
        }
    }

    /// Create a reminder. Returns the generated id.
    pub async fn create(
        &self,
        owner_id: &str,
        input: NewReminder,
    ) -> Result<String, RegistryError> {
        if owner_id.trim().is_empty() {
            return Err(invalid("owner_id", "must not be empty"));
        }
        if input.title.trim().is_empty() {
            return Err(invalid("title", "must not be empty"));
        }
        if input.body.trim().is_empty() {
            return Err(invalid("body", "must not be empty"));
        }
        if parse_fire_at(&input.fire_at).is_none() {
            return Err(invalid(
                "fire_at",
                format!("'{}' is not a recognized timestamp", input.fire_at),
            ));
        }

        let mut state = self.state.lock().await;
        // Pick up concurrent writers before inserting.
        state.records = self.store.load().await;

        if state.records.count(owner_id) >= self.config.max_per_owner {
            return Err(RegistryError::QuotaExceeded {
                max: self.config.max_per_owner,
            });
        }

        let mut id = ids::generate("n");
        while state.records.get(owner_id, &id).is_some() {
            id = ids::generate("n");
        }

        let now = Utc::now();
        state.records.insert(Notification {
            id: id.clone(),
            owner_id: owner_id.to_string(),
            title: input.title,
            body: input.body,
            fire_at: input.fire_at,
            priority: input.priority,
            repeat: input.repeat,
            acknowledged: false,
            created_at: now,
            updated_at: now,
            history: vec![HistoryEvent::new(HistoryKind::Created, now)],
        });

        self.store.save(&state.records).await?;
        tracing::info!(owner = owner_id, id = %id, "Created reminder");
        Ok(id)
    }

    /// List an owner's reminders, soonest first. Always re-reads the store
    /// so readers observe cross-process writes.
    pub async fn list(&self, owner_id: &str) -> Vec<Notification> {
        let mut state = self.state.lock().await;
        state.records = self.store.load().await;
        let mut items: Vec<Notification> = state.records.owner(owner_id).cloned().collect();
        items.sort_by_key(|n| n.fire_time().unwrap_or(NaiveDateTime::MAX));
        items
    }

    /// Apply a partial update. Only the allow-listed fields are mutable;
    /// a no-op update returns `false`.
    pub async fn update(
        &self,
        owner_id: &str,
        id: &str,
        update: ReminderUpdate,
    ) -> Result<bool, RegistryError> {
        if let Some(fire_at) = &update.fire_at
            && parse_fire_at(fire_at).is_none()
        {
            return Err(invalid(
                "fire_at",
                format!("'{fire_at}' is not a recognized timestamp"),
            ));
        }

        let mut state = self.state.lock().await;
        state.records = self.store.load().await;

        let record = state
            .records
            .get_mut(owner_id, id)
            .ok_or_else(|| not_found(id))?;

        let mut changes = Vec::new();
        if let Some(title) = update.title
            && title != record.title
        {
            changes.push(format!("title: {} -> {}", record.title, title));
            record.title = title;
        }
        if let Some(body) = update.body
            && body != record.body
        {
            changes.push("body".to_string());
            record.body = body;
        }
        if let Some(fire_at) = update.fire_at
            && fire_at != record.fire_at
        {
            changes.push(format!("fire_at: {} -> {}", record.fire_at, fire_at));
            record.fire_at = fire_at;
        }
        if let Some(priority) = update.priority
            && priority != record.priority
        {
            changes.push(format!("priority: {} -> {}", record.priority, priority));
            record.priority = priority;
        }
        if let Some(repeat) = update.repeat
            && repeat != record.repeat
        {
            changes.push(format!("repeat: {} -> {}", record.repeat, repeat));
            record.repeat = repeat;
        }

        if changes.is_empty() {
            return Ok(false);
        }

        let now = Utc::now();
        record.updated_at = now;
        record
            .history
            .push(HistoryEvent::with_changes(HistoryKind::Updated, now, changes));

        self.store.save(&state.records).await?;
        tracing::debug!(owner = owner_id, id, "Updated reminder");
        Ok(true)
    }

    /// Mark a reminder acknowledged. Returns `false` when it already was.
    pub async fn acknowledge(&self, owner_id: &str, id: &str) -> Result<bool, RegistryError> {
        let mut state = self.state.lock().await;
        state.records = self.store.load().await;

        let record = state
            .records
            .get_mut(owner_id, id)
            .ok_or_else(|| not_found(id))?;
        if record.acknowledged {
            return Ok(false);
        }

        let now = Utc::now();
        record.acknowledged = true;
        record.updated_at = now;
        record
            .history
            .push(HistoryEvent::new(HistoryKind::Acknowledged, now));

        self.store.save(&state.records).await?;
        Ok(true)
    }

    /// Delete a reminder. Re-verifies post-save that the removal stuck;
    /// a verification mismatch reports failure, not false success.
    pub async fn delete(&self, owner_id: &str, id: &str) -> Result<bool, RegistryError> {
        let mut state = self.state.lock().await;
        state.records = self.store.load().await;

        if state.records.remove(owner_id, id).is_none() {
            return Err(not_found(id));
        }
        self.store.save(&state.records).await?;

        state.records = self.store.load().await;
        if state.records.get(owner_id, id).is_some() {
            tracing::error!(owner = owner_id, id, "Delete did not survive reload");
            return Ok(false);
        }
        tracing::info!(owner = owner_id, id, "Deleted reminder");
        Ok(true)
    }

    /// Delete all of an owner's reminders, returning how many went away.
    pub async fn delete_all(&self, owner_id: &str) -> Result<usize, RegistryError> {
        let mut state = self.state.lock().await;
        state.records = self.store.load().await;

        let removed = state.records.remove_owner(owner_id);
        if removed == 0 {
            return Ok(0);
        }
        self.store.save(&state.records).await?;

        state.records = self.store.load().await;
        if state.records.has_owner(owner_id) {
            tracing::error!(owner = owner_id, "Delete-all did not survive reload");
            return Ok(0);
        }
        tracing::info!(owner = owner_id, removed, "Deleted all reminders");
        Ok(removed)
    }

    /// Scan for due items and deliver them through `sender`.
    ///
    /// Repeating items are rescheduled past `now`; one-shots are removed
    /// after delivery. Items missed by more than the grace period roll
    /// forward (or, for one-shots, are removed) without a late delivery.
    /// Returns the number of deliveries made.
    pub async fn fire_due(
        &self,
        now: NaiveDateTime,
        sender: &dyn Sender,
    ) -> Result<usize, RegistryError> {
        let mut state = self.state.lock().await;
        state.records = self.store.load().await;

        if let Some(until) = state.blocked_until {
            if now < until {
                tracing::debug!(until = %until, "Delivery paused after channel block");
                return Ok(0);
            }
            state.blocked_until = None;
        }

        let tolerance = to_chrono(self.config.due_tolerance);
        let grace = to_chrono(self.config.grace_period);
        let buffer = to_chrono(self.config.reschedule_buffer);
        let cooldown = to_chrono(self.config.delivery_cooldown);
        let max_steps = self.config.max_catchup_steps;

        let mut fired = 0usize;
        let mut remove = Vec::new();
        let mut reschedule = Vec::new();

        let state = &mut *state;
        let (records, last_delivered) = (&state.records, &mut state.last_delivered);

        'scan: for (owner_id, items) in records.iter_owners() {
            for (id, item) in items {
                let Some(fire_at) = item.fire_time() else {
                    tracing::warn!(owner = %owner_id, id = %id, fire_at = %item.fire_at, "Skipping reminder with unparseable fire time");
                    continue;
                };

                match schedule::classify(fire_at, now, tolerance, grace) {
                    DueState::Upcoming => {}
                    DueState::Stale => {
                        if item.repeat.is_repeating() {
                            let next =
                                schedule::catch_up(fire_at, item.repeat, now, buffer, max_steps);
                            tracing::info!(
                                owner = %owner_id,
                                id = %id,
                                next = %next,
                                "Rolling missed repeating reminder forward without delivery"
                            );
                            reschedule.push((owner_id.clone(), id.clone(), next));
                        } else {
                            tracing::info!(owner = %owner_id, id = %id, "Removing expired one-off reminder");
                            remove.push((owner_id.clone(), id.clone()));
                        }
                    }
                    DueState::Due => {
                        if let Some(last) = last_delivered.get(id)
                            && now - *last < cooldown
                        {
                            tracing::debug!(owner = %owner_id, id = %id, "Suppressing duplicate delivery inside cooldown");
                            continue;
                        }

                        match sender.send(owner_id, &item.title, &item.body).await {
                            Ok(()) => {
                                last_delivered.insert(id.clone(), now);
                                fired += 1;
                                tracing::info!(owner = %owner_id, id = %id, title = %item.title, "Delivered reminder");
                                if item.repeat.is_repeating() {
                                    let next = schedule::catch_up(
                                        schedule::advance(fire_at, item.repeat),
                                        item.repeat,
                                        now,
                                        buffer,
                                        max_steps,
                                    );
                                    reschedule.push((owner_id.clone(), id.clone(), next));
                                } else {
                                    remove.push((owner_id.clone(), id.clone()));
                                }
                            }
                            Err(SendError::Blocked(reason)) => {
                                let until = now + to_chrono(self.config.blocked_pause);
                                tracing::warn!(
                                    owner = %owner_id,
                                    id = %id,
                                    until = %until,
                                    "Delivery channel blocked, pausing all sends: {}",
                                    reason
                                );
                                state.blocked_until = Some(until);
                                break 'scan;
                            }
                            Err(SendError::Transient(reason)) => {
                                tracing::warn!(
                                    owner = %owner_id,
                                    id = %id,
                                    "Transient delivery failure, leaving for next cycle: {}",
                                    reason
                                );
                            }
                        }
                    }
                }
            }
        }

        let modified = !remove.is_empty() || !reschedule.is_empty();
        for (owner_id, id) in remove {
            state.records.remove(&owner_id, &id);
        }
        for (owner_id, id, next) in reschedule {
            if let Some(record) = state.records.get_mut(&owner_id, &id) {
                record.fire_at = format_fire_at(next);
                record.updated_at = Utc::now();
            }
        }

        if modified {
            self.store.save(&state.records).await?;
        }
        Ok(fired)
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

fn to_chrono(d: std::time::Duration) -> Duration {
    Duration::from_std(d).unwrap_or_else(|_| Duration::seconds(60))
}
