//! Reminder data model.

use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::store::dataset::{
    Dataset, Decoded, OwnerMap, Record, decode_owner_map, validate_owner_map,
};

/// Accepted `fire_at` timestamp formats. The first entry is the canonical
/// format everything is written back in.
pub const FIRE_AT_FORMATS: &[&str] = &["%Y-%m-%d %H:%M", "%Y/%m/%d %H:%M", "%Y-%m-%dT%H:%M:%S"];

/// Parse a `fire_at` string under any accepted format.
pub fn parse_fire_at(raw: &str) -> Option<NaiveDateTime> {
    FIRE_AT_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

/// Render a fire time in the canonical format.
pub fn format_fire_at(at: NaiveDateTime) -> String {
    at.format(FIRE_AT_FORMATS[0]).to_string()
}

/// Reminder priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub fn icon(&self) -> &'static str {
        match self {
            Priority::High => "🔴",
            Priority::Medium => "🟡",
            Priority::Low => "🟢",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::High => write!(f, "high"),
            Priority::Medium => write!(f, "medium"),
            Priority::Low => write!(f, "low"),
        }
    }
}

impl FromStr for Priority {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// Repeat cadence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Repeat {
    #[default]
    None,
    Daily,
    Weekly,
    Monthly,
}

impl Repeat {
    pub fn is_repeating(&self) -> bool {
        !matches!(self, Repeat::None)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Repeat::None => "one-off",
            Repeat::Daily => "daily",
            Repeat::Weekly => "weekly",
            Repeat::Monthly => "monthly",
        }
    }
}

impl std::fmt::Display for Repeat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Repeat::None => write!(f, "none"),
            Repeat::Daily => write!(f, "daily"),
            Repeat::Weekly => write!(f, "weekly"),
            Repeat::Monthly => write!(f, "monthly"),
        }
    }
}

impl FromStr for Repeat {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Repeat::None),
            "daily" => Ok(Repeat::Daily),
            "weekly" => Ok(Repeat::Weekly),
            "monthly" => Ok(Repeat::Monthly),
            other => Err(format!("unknown repeat: {other}")),
        }
    }
}

/// Kind of audit event recorded on a reminder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryKind {
    Created,
    Updated,
    Acknowledged,
}

/// One append-only audit entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub kind: HistoryKind,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<String>,
}

impl HistoryEvent {
    pub fn new(kind: HistoryKind, at: DateTime<Utc>) -> Self {
        Self {
            kind,
            at,
            changes: Vec::new(),
        }
    }

    pub fn with_changes(kind: HistoryKind, at: DateTime<Utc>, changes: Vec<String>) -> Self {
        Self { kind, at, changes }
    }
}

/// A user-scoped, time-triggered reminder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub body: String,
    /// Naive local timestamp string; see [`FIRE_AT_FORMATS`].
    pub fire_at: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub repeat: Repeat,
    #[serde(default)]
    pub acknowledged: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub history: Vec<HistoryEvent>,
}

impl Notification {
    /// The parsed fire time, or `None` when the stored string is corrupt.
    pub fn fire_time(&self) -> Option<NaiveDateTime> {
        parse_fire_at(&self.fire_at)
    }
}

impl Record for Notification {
    fn id(&self) -> &str {
        &self.id
    }
    fn owner(&self) -> &str {
        &self.owner_id
    }
}

impl Dataset for OwnerMap<Notification> {
    const NAME: &'static str = "reminders";

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

/// Input for creating a reminder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReminder {
    pub title: String,
    pub body: String,
    pub fire_at: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub repeat: Repeat,
}

/// Partial update; only the allow-listed fields are mutable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReminderUpdate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub fire_at: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub repeat: Option<Repeat>,
}

impl ReminderUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.body.is_none()
            && self.fire_at.is_none()
            && self.priority.is_none()
            && self.repeat.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_all_accepted_formats() {
        assert!(parse_fire_at("2025-01-01 09:00").is_some());
        assert!(parse_fire_at("2025/01/01 09:00").is_some());
        assert!(parse_fire_at("2025-01-01T09:00:00").is_some());
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_fire_at("tomorrow morning").is_none());
        assert!(parse_fire_at("2025-13-01 09:00").is_none());
        assert!(parse_fire_at("").is_none());
    }

    #[test]
    fn format_uses_canonical_pattern() {
        let at = parse_fire_at("2025/01/01 09:05").unwrap();
        assert_eq!(format_fire_at(at), "2025-01-01 09:05");
    }

    #[test]
    fn priority_roundtrip() {
        for p in [Priority::High, Priority::Medium, Priority::Low] {
            let parsed: Priority = p.to_string().parse().unwrap();
            assert_eq!(parsed, p);
        }
    }

    #[test]
    fn repeat_roundtrip() {
        for r in [Repeat::None, Repeat::Daily, Repeat::Weekly, Repeat::Monthly] {
            let parsed: Repeat = r.to_string().parse().unwrap();
            assert_eq!(parsed, r);
        }
    }

    #[test]
    fn repeat_serde_is_lowercase() {
        let json = serde_json::to_string(&Repeat::Weekly).unwrap();
        assert_eq!(json, "\"weekly\"");
    }

    #[test]
    fn notification_defaults_on_deserialize() {
        let raw = serde_json::json!({
            "id": "n_1_100",
            "owner_id": "u1",
            "title": "t",
            "body": "b",
            "fire_at": "2025-01-01 09:00",
            "created_at": "2025-01-01T00:00:00Z",
            "updated_at": "2025-01-01T00:00:00Z",
        });
        let n: Notification = serde_json::from_value(raw).unwrap();
        assert_eq!(n.priority, Priority::Medium);
        assert_eq!(n.repeat, Repeat::None);
        assert!(!n.acknowledged);
        assert!(n.history.is_empty());
    }

    #[test]
    fn update_is_empty() {
        assert!(ReminderUpdate::default().is_empty());
        let update = ReminderUpdate {
            title: Some("x".to_string()),
            ..Default::default()
        };
        assert!(!update.is_empty());
    }
}
