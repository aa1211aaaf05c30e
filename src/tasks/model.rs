//! Auto-task data model.

use std::str::FromStr;

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::store::dataset::{
    Dataset, Decoded, OwnerMap, Record, decode_owner_map, validate_owner_map,
};

/// Recurrence pattern of an auto-task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulePattern {
    Daily,
    Weekly,
    Hourly,
}

impl SchedulePattern {
    /// Whether the pattern uses the task's nominal "HH:MM".
    pub fn uses_schedule_time(&self) -> bool {
        matches!(self, SchedulePattern::Daily | SchedulePattern::Weekly)
    }
}

impl std::fmt::Display for SchedulePattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulePattern::Daily => write!(f, "daily"),
            SchedulePattern::Weekly => write!(f, "weekly"),
            SchedulePattern::Hourly => write!(f, "hourly"),
        }
    }
}

impl FromStr for SchedulePattern {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(SchedulePattern::Daily),
            "weekly" => Ok(SchedulePattern::Weekly),
            "hourly" => Ok(SchedulePattern::Hourly),
            other => Err(format!("unknown schedule pattern: {other}")),
        }
    }
}

/// Parse a task's nominal "HH:MM".
pub fn parse_schedule_time(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw, "%H:%M").ok()
}

/// A recurring automated job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoTask {
    pub task_id: String,
    pub owner_id: String,
    /// Names a registered handler.
    pub task_type: String,
    pub title: String,
    pub description: String,
    pub schedule_pattern: SchedulePattern,
    /// "HH:MM" in the configured reference timezone; meaningful for
    /// daily/weekly patterns only.
    pub schedule_time: String,
    /// Opaque parameters handed to the handler.
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_executed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub execution_count: u64,
}

fn default_active() -> bool {
    true
}

impl Record for AutoTask {
    fn id(&self) -> &str {
        &self.task_id
    }
    fn owner(&self) -> &str {
        &self.owner_id
    }
}

impl Dataset for OwnerMap<AutoTask> {
    const NAME: &'static str = "auto_tasks";

    fn decode(value: serde_json::Value) -> Decoded<Self> {
        decode_owner_map(value)
    }

    fn validate(&self) -> Result<(), StoreError> {
        validate_owner_map(self)
    }

    fn len(&self) -> usize {
        self.total()
    }
}

/// Input for creating a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub task_type: String,
    pub title: String,
    pub description: String,
    pub schedule_pattern: SchedulePattern,
    #[serde(default)]
    pub schedule_time: String,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

/// One recorded task execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub task_id: String,
    pub executed_at: DateTime<Utc>,
    pub result: Option<String>,
    pub success: bool,
}

/// Append-only execution log, truncated to a recent window on persist.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct ExecutionLog(Vec<ExecutionLogEntry>);

impl ExecutionLog {
    pub fn push(&mut self, entry: ExecutionLogEntry) {
        self.0.push(entry);
    }

    /// Drop everything but the most recent `window` entries.
    pub fn truncate_to_window(&mut self, window: usize) {
        if self.0.len() > window {
            let drop = self.0.len() - window;
            self.0.drain(..drop);
        }
    }

    pub fn entries(&self) -> &[ExecutionLogEntry] {
        &self.0
    }
}

impl Dataset for ExecutionLog {
    const NAME: &'static str = "task_logs";

    fn decode(value: serde_json::Value) -> Decoded<Self> {
        let mut entries = Vec::new();
        let mut skipped = 0usize;
        let serde_json::Value::Array(raw) = value else {
            tracing::warn!("Execution log root is not an array, treating as empty");
            return Decoded {
                data: ExecutionLog::default(),
                skipped,
            };
        };
        for item in raw {
            match serde_json::from_value::<ExecutionLogEntry>(item) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!("Dropping undecodable log entry: {}", e);
                    skipped += 1;
                }
            }
        }
        Decoded {
            data: ExecutionLog(entries),
            skipped,
        }
    }

    fn validate(&self) -> Result<(), StoreError> {
        for entry in &self.0 {
            if entry.task_id.trim().is_empty() {
                return Err(StoreError::InvalidRecord {
                    id: "(log entry)".to_string(),
                    reason: "empty task_id".to_string(),
                });
            }
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.0.len()
    }
}

/// Render an owner's tasks as a readable list.
pub fn format_task_list(tasks: &[AutoTask]) -> String {
    if tasks.is_empty() {
        return "🤖 No auto-tasks configured.".to_string();
    }
    let mut lines = vec!["🤖 Auto-tasks:".to_string()];
    for (index, task) in tasks.iter().enumerate() {
        let status = if task.is_active { "✅ active" } else { "❌ inactive" };
        lines.push(format!("{}. {} ({})", index + 1, task.title, status));
        lines.push(format!(
            "   ⏰ {} {} · {} runs",
            task.schedule_pattern, task.schedule_time, task.execution_count
        ));
        if let Some(last) = task.last_executed {
            lines.push(format!("   📅 last run {}", last.format("%Y-%m-%d %H:%M")));
        }
        lines.push(format!("   🆔 {}", task.task_id));
    }
    lines.join("\n")
}
