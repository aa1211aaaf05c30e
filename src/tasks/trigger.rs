//! Trigger table for the task poll loop.
//!
//! Each registration precomputes its next-due instant in scheduler-local
//! time; the poll loop asks `due()` which task ids should run and the
//! table advances (or retires) the entries itself. Tags let a task's
//! registrations be cleared without touching its record.

use chrono::{Datelike, Duration, FixedOffset, NaiveDateTime, NaiveTime, Timelike, Weekday};

use crate::config::TaskConfig;
use crate::tasks::model::{AutoTask, SchedulePattern, parse_schedule_time};

/// How a registered entry recurs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TriggerSlot {
    Daily,
    Weekly,
    Hourly,
    /// Fires once, then retires.
    Once,
}

/// One registration in the table.
#[derive(Debug, Clone)]
struct TriggerEntry {
    tag: String,
    task_id: String,
    slot: TriggerSlot,
    next_due: NaiveDateTime,
}

/// The scheduler's trigger table.
#[derive(Debug, Default)]
pub struct TriggerTable {
    entries: Vec<TriggerEntry>,
}

impl TriggerTable {
    /// Register (or re-register) a task's recurring trigger.
    ///
    /// Daily and weekly patterns fire at the task's nominal "HH:MM",
    /// converted from the reference timezone into scheduler-local time so
    /// the trigger lands at the intended wall-clock moment regardless of
    /// host timezone. Weekly tasks fire on Mondays. An unparseable
    /// schedule time falls back to the current time-of-day.
    pub fn register_task(
        &mut self,
        task: &AutoTask,
        config: &TaskConfig,
        local_offset: FixedOffset,
        now: NaiveDateTime,
    ) {
        let nominal = parse_schedule_time(&task.schedule_time).unwrap_or_else(|| {
            if task.schedule_pattern.uses_schedule_time() {
                tracing::warn!(
                    task = %task.task_id,
                    schedule_time = %task.schedule_time,
                    "Unparseable schedule time, falling back to current time-of-day"
                );
            }
            now.time()
        });
        let local = to_local_time(nominal, config.reference_offset, local_offset);

        let (slot, next_due) = match task.schedule_pattern {
            SchedulePattern::Daily => (TriggerSlot::Daily, next_daily(local, now)),
            SchedulePattern::Weekly => {
                (TriggerSlot::Weekly, next_weekday(Weekday::Mon, local, now))
            }
            SchedulePattern::Hourly => (TriggerSlot::Hourly, next_top_of_hour(now)),
        };

        self.clear(&task.task_id);
        self.entries.push(TriggerEntry {
            tag: task.task_id.clone(),
            task_id: task.task_id.clone(),
            slot,
            next_due,
        });
        tracing::info!(
            task = %task.task_id,
            pattern = %task.schedule_pattern,
            nominal = %task.schedule_time,
            next = %next_due,
            "Registered task trigger"
        );
    }

    /// Register a one-shot bootstrap fire for a fresh daily task so it does
    /// not wait a full day for its first run. The entry retires after one
    /// fire and is also cleared by any execution of the task.
    pub fn register_bootstrap(
        &mut self,
        task_id: &str,
        delay: std::time::Duration,
        now: NaiveDateTime,
    ) {
        let tag = bootstrap_tag(task_id);
        self.clear(&tag);
        let next_due = now + Duration::from_std(delay).unwrap_or_else(|_| Duration::minutes(2));
        self.entries.push(TriggerEntry {
            tag,
            task_id: task_id.to_string(),
            slot: TriggerSlot::Once,
            next_due,
        });
        tracing::info!(task = %task_id, next = %next_due, "Registered bootstrap trigger");
    }

    /// Remove all registrations under a tag. Returns whether any existed.
    pub fn clear(&mut self, tag: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.tag != tag);
        before != self.entries.len()
    }

    /// Remove everything belonging to a task (trigger and bootstrap).
    pub fn clear_task(&mut self, task_id: &str) {
        self.clear(task_id);
        self.clear(&bootstrap_tag(task_id));
    }

    /// Clear a task's bootstrap registration, if present.
    pub fn clear_bootstrap(&mut self, task_id: &str) -> bool {
        self.clear(&bootstrap_tag(task_id))
    }

    /// Collect the task ids due at `now`, advancing recurring entries and
    /// retiring one-shots.
    pub fn due(&mut self, now: NaiveDateTime) -> Vec<String> {
        let mut ids = Vec::new();
        self.entries.retain_mut(|entry| {
            if entry.next_due > now {
                return true;
            }
            ids.push(entry.task_id.clone());
            match entry.slot {
                TriggerSlot::Once => false,
                slot => {
                    entry.next_due = advance_past(entry.next_due, slot, now);
                    true
                }
            }
        });
        ids
    }

    /// Next-due instant for a tag, if registered.
    pub fn next_due_for(&self, tag: &str) -> Option<NaiveDateTime> {
        self.entries.iter().find(|e| e.tag == tag).map(|e| e.next_due)
    }

    /// Whether a tag is registered.
    pub fn has(&self, tag: &str) -> bool {
        self.entries.iter().any(|e| e.tag == tag)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn bootstrap_tag(task_id: &str) -> String {
    format!("bootstrap_{task_id}")
}

/// Shift a nominal time-of-day from the reference offset into the local
/// offset, wrapping around midnight.
pub fn to_local_time(nominal: NaiveTime, reference: FixedOffset, local: FixedOffset) -> NaiveTime {
    let shift = i64::from(local.local_minus_utc()) - i64::from(reference.local_minus_utc());
    nominal.overflowing_add_signed(Duration::seconds(shift)).0
}

fn next_daily(at: NaiveTime, now: NaiveDateTime) -> NaiveDateTime {
    let candidate = now.date().and_time(at);
    if candidate > now {
        candidate
    } else {
        candidate + Duration::days(1)
    }
}

fn next_weekday(weekday: Weekday, at: NaiveTime, now: NaiveDateTime) -> NaiveDateTime {
    let mut candidate = now.date().and_time(at);
    for _ in 0..8 {
        if candidate.weekday() == weekday && candidate > now {
            return candidate;
        }
        candidate += Duration::days(1);
    }
    candidate
}

fn next_top_of_hour(now: NaiveDateTime) -> NaiveDateTime {
    let truncated = now
        .with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now);
    truncated + Duration::hours(1)
}

/// Advance a recurring entry until it lands past `now`.
fn advance_past(mut next_due: NaiveDateTime, slot: TriggerSlot, now: NaiveDateTime) -> NaiveDateTime {
    let period = match slot {
        TriggerSlot::Daily => Duration::days(1),
        TriggerSlot::Weekly => Duration::days(7),
        TriggerSlot::Hourly => Duration::hours(1),
        TriggerSlot::Once => return next_due,
    };
    // Usually one step; more when the process slept across occurrences.
    for _ in 0..10_000 {
        next_due += period;
        if next_due > now {
            return next_due;
        }
    }
    tracing::warn!(next = %next_due, "Trigger advance hit the iteration cap");
    next_due
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reminders::model::parse_fire_at;
    use chrono::Utc;

    fn at(s: &str) -> NaiveDateTime {
        parse_fire_at(s).unwrap()
    }

    fn offset(hours: i32) -> FixedOffset {
        FixedOffset::east_opt(hours * 3600).unwrap()
    }

    fn task(pattern: SchedulePattern, time: &str) -> AutoTask {
        AutoTask {
            task_id: "task_1_100".to_string(),
            owner_id: "u1".to_string(),
            task_type: "daily_digest".to_string(),
            title: "t".to_string(),
            description: "d".to_string(),
            schedule_pattern: pattern,
            schedule_time: time.to_string(),
            parameters: serde_json::Map::new(),
            is_active: true,
            created_at: Utc::now(),
            last_executed: None,
            execution_count: 0,
        }
    }

    fn config() -> TaskConfig {
        TaskConfig::default() // reference offset +09:00
    }

    #[test]
    fn local_time_conversion_shifts_by_offset_difference() {
        let nine_jst = parse_schedule_time("09:00").unwrap();
        // Host at UTC: 09:00 JST is 00:00 local.
        let local = to_local_time(nine_jst, offset(9), offset(0));
        assert_eq!(local, parse_schedule_time("00:00").unwrap());
        // Host in the same zone: unchanged.
        let same = to_local_time(nine_jst, offset(9), offset(9));
        assert_eq!(same, nine_jst);
    }

    #[test]
    fn local_time_conversion_wraps_midnight() {
        let early = parse_schedule_time("03:00").unwrap();
        // 03:00 at +09:00 is 18:00 the previous day at -00... i.e. wraps.
        let local = to_local_time(early, offset(9), offset(0));
        assert_eq!(local, parse_schedule_time("18:00").unwrap());
    }

    #[test]
    fn daily_registers_today_when_still_ahead() {
        let mut table = TriggerTable::default();
        // 09:00 JST == 09:00 local when host offset matches the reference.
        let now = at("2025-01-01 08:00");
        table.register_task(&task(SchedulePattern::Daily, "09:00"), &config(), offset(9), now);
        assert_eq!(table.next_due_for("task_1_100").unwrap(), at("2025-01-01 09:00"));
    }

    #[test]
    fn daily_registers_tomorrow_when_past() {
        let mut table = TriggerTable::default();
        let now = at("2025-01-01 10:00");
        table.register_task(&task(SchedulePattern::Daily, "09:00"), &config(), offset(9), now);
        assert_eq!(table.next_due_for("task_1_100").unwrap(), at("2025-01-02 09:00"));
    }

    #[test]
    fn weekly_lands_on_monday() {
        let mut table = TriggerTable::default();
        // 2025-01-01 is a Wednesday; next Monday is 2025-01-06.
        let now = at("2025-01-01 10:00");
        table.register_task(&task(SchedulePattern::Weekly, "09:00"), &config(), offset(9), now);
        assert_eq!(table.next_due_for("task_1_100").unwrap(), at("2025-01-06 09:00"));
    }

    #[test]
    fn hourly_fires_at_top_of_next_hour() {
        let mut table = TriggerTable::default();
        let now = at("2025-01-01 10:25");
        table.register_task(&task(SchedulePattern::Hourly, ""), &config(), offset(9), now);
        assert_eq!(table.next_due_for("task_1_100").unwrap(), at("2025-01-01 11:00"));
    }

    #[test]
    fn due_advances_recurring_entry() {
        let mut table = TriggerTable::default();
        let now = at("2025-01-01 08:00");
        table.register_task(&task(SchedulePattern::Daily, "09:00"), &config(), offset(9), now);

        let due = table.due(at("2025-01-01 09:00"));
        assert_eq!(due, vec!["task_1_100".to_string()]);
        assert_eq!(table.next_due_for("task_1_100").unwrap(), at("2025-01-02 09:00"));

        // Not due again until tomorrow.
        assert!(table.due(at("2025-01-01 09:01")).is_empty());
    }

    #[test]
    fn due_skips_missed_occurrences() {
        let mut table = TriggerTable::default();
        let now = at("2025-01-01 08:00");
        table.register_task(&task(SchedulePattern::Daily, "09:00"), &config(), offset(9), now);

        // The process slept for three days: one fire, next lands ahead of now.
        let due = table.due(at("2025-01-04 12:00"));
        assert_eq!(due.len(), 1);
        assert_eq!(table.next_due_for("task_1_100").unwrap(), at("2025-01-05 09:00"));
    }

    #[test]
    fn bootstrap_retires_after_one_fire() {
        let mut table = TriggerTable::default();
        let now = at("2025-01-01 08:00");
        table.register_bootstrap("task_1_100", std::time::Duration::from_secs(120), now);
        assert!(table.has("bootstrap_task_1_100"));

        let due = table.due(at("2025-01-01 08:02"));
        assert_eq!(due, vec!["task_1_100".to_string()]);
        assert!(!table.has("bootstrap_task_1_100"));
    }

    #[test]
    fn clear_task_removes_trigger_and_bootstrap() {
        let mut table = TriggerTable::default();
        let now = at("2025-01-01 08:00");
        table.register_task(&task(SchedulePattern::Daily, "09:00"), &config(), offset(9), now);
        table.register_bootstrap("task_1_100", std::time::Duration::from_secs(120), now);
        assert_eq!(table.len(), 2);

        table.clear_task("task_1_100");
        assert!(table.is_empty());
    }

    #[test]
    fn reregistration_replaces_old_entry() {
        let mut table = TriggerTable::default();
        let now = at("2025-01-01 08:00");
        table.register_task(&task(SchedulePattern::Daily, "09:00"), &config(), offset(9), now);
        table.register_task(&task(SchedulePattern::Daily, "10:00"), &config(), offset(9), now);
        assert_eq!(table.len(), 1);
        assert_eq!(table.next_due_for("task_1_100").unwrap(), at("2025-01-01 10:00"));
    }
}
