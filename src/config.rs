//! Configuration types.
//!
//! All configuration is built once at process start (either from defaults or
//! from `TICKLER_*` environment variables) and handed into each component's
//! constructor. There is no ambient global configuration.

use std::path::PathBuf;
use std::time::Duration;

use chrono::FixedOffset;

use crate::error::ConfigError;

/// Storage layout: a primary data directory plus ordered backup directories.
///
/// Each dataset lives in one file per directory; the first writable path is
/// the primary copy, the rest are redundant replicas.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Primary data directory.
    pub data_dir: PathBuf,
    /// Ordered backup directories.
    pub backup_dirs: Vec<PathBuf>,
    /// Optional out-of-process backup mirror.
    pub mirror: Option<MirrorConfig>,
}

impl StorageConfig {
    /// Candidate file paths for a dataset, primary first.
    pub fn dataset_paths(&self, file_name: &str) -> Vec<PathBuf> {
        std::iter::once(&self.data_dir)
            .chain(self.backup_dirs.iter())
            .map(|dir| dir.join(file_name))
            .collect()
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            backup_dirs: vec![std::env::temp_dir().join("tickler")],
            mirror: None,
        }
    }
}

/// Out-of-process backup mirror settings.
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    /// Blob endpoint; datasets are PUT/GET at `{endpoint}/{dataset}`.
    pub endpoint: String,
    /// Optional bearer token.
    pub token: Option<String>,
    /// Minimum interval between remote backups per dataset.
    pub cooldown: Duration,
    /// Local directories used when the remote mirror is unreachable.
    pub fallback_dirs: Vec<PathBuf>,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            token: None,
            cooldown: Duration::from_secs(30 * 60),
            fallback_dirs: vec![std::env::temp_dir().join("tickler-mirror")],
        }
    }
}

/// Reminder registry and poll-loop settings.
#[derive(Debug, Clone)]
pub struct ReminderConfig {
    /// Sleep between due-item scans.
    pub poll_interval: Duration,
    /// Maximum reminders per owner.
    pub max_per_owner: usize,
    /// Trailing window before `now` within which an item counts as due.
    pub due_tolerance: Duration,
    /// Per-item delivery dedup window.
    pub delivery_cooldown: Duration,
    /// Items further in the past than this roll forward without delivery.
    pub grace_period: Duration,
    /// A rescheduled fire time must land at least this far past `now`.
    pub reschedule_buffer: Duration,
    /// Pause after a blocked delivery channel.
    pub blocked_pause: Duration,
    /// Hard cap on catch-up advance iterations.
    pub max_catchup_steps: u32,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            max_per_owner: 100,
            due_tolerance: Duration::from_secs(60),
            delivery_cooldown: Duration::from_secs(5 * 60),
            grace_period: Duration::from_secs(30 * 60),
            reschedule_buffer: Duration::from_secs(60),
            blocked_pause: Duration::from_secs(60 * 60),
            max_catchup_steps: 100,
        }
    }
}

/// Auto-task registry and trigger settings.
#[derive(Debug, Clone)]
pub struct TaskConfig {
    /// Sleep between trigger-table scans.
    pub poll_interval: Duration,
    /// Maximum tasks per owner.
    pub max_per_owner: usize,
    /// Timezone in which task `schedule_time` values are expressed.
    pub reference_offset: FixedOffset,
    /// Execution log entries kept on persist.
    pub log_window: usize,
    /// Delay before the one-shot bootstrap fire of a fresh daily task.
    pub bootstrap_delay: Duration,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            max_per_owner: 20,
            // +09:00 — schedule times are interpreted as JST unless overridden.
            reference_offset: FixedOffset::east_opt(9 * 3600)
                .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset is valid")),
            log_window: 100,
            bootstrap_delay: Duration::from_secs(2 * 60),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub storage: StorageConfig,
    pub reminders: ReminderConfig,
    pub tasks: TaskConfig,
    /// TTL for the inbound-event dedup window.
    pub event_ttl: Duration,
    /// Directory for the rolling file log; stderr-only when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            reminders: ReminderConfig::default(),
            tasks: TaskConfig::default(),
            event_ttl: Duration::from_secs(10 * 60),
            log_dir: None,
        }
    }
}

impl EngineConfig {
    /// Build a configuration from `TICKLER_*` environment variables.
    ///
    /// Unset variables keep their defaults; malformed numeric values are
    /// logged and fall back. A malformed timezone offset is an error rather
    /// than a silent fallback — schedules firing in the wrong zone are much
    /// harder to notice than a failed start.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let storage = StorageConfig {
            data_dir: env_path("TICKLER_DATA_DIR").unwrap_or(defaults.storage.data_dir),
            backup_dirs: env_path_list("TICKLER_BACKUP_DIRS")
                .unwrap_or(defaults.storage.backup_dirs),
            mirror: mirror_from_env(),
        };

        let rd = defaults.reminders;
        let reminders = ReminderConfig {
            poll_interval: env_secs("TICKLER_REMINDER_POLL_SECS", rd.poll_interval),
            max_per_owner: env_usize("TICKLER_MAX_REMINDERS_PER_OWNER", rd.max_per_owner),
            due_tolerance: env_secs("TICKLER_DUE_TOLERANCE_SECS", rd.due_tolerance),
            delivery_cooldown: env_secs("TICKLER_DELIVERY_COOLDOWN_SECS", rd.delivery_cooldown),
            grace_period: env_secs("TICKLER_GRACE_PERIOD_SECS", rd.grace_period),
            reschedule_buffer: rd.reschedule_buffer,
            blocked_pause: env_secs("TICKLER_BLOCKED_PAUSE_SECS", rd.blocked_pause),
            max_catchup_steps: rd.max_catchup_steps,
        };

        let td = defaults.tasks;
        let reference_offset = match std::env::var("TICKLER_REFERENCE_OFFSET") {
            Ok(raw) => parse_offset(&raw).ok_or_else(|| ConfigError::InvalidValue {
                key: "TICKLER_REFERENCE_OFFSET".to_string(),
                message: format!("expected ±HH:MM, got '{raw}'"),
            })?,
            Err(_) => td.reference_offset,
        };
        let tasks = TaskConfig {
            poll_interval: env_secs("TICKLER_TASK_POLL_SECS", td.poll_interval),
            max_per_owner: env_usize("TICKLER_MAX_TASKS_PER_OWNER", td.max_per_owner),
            reference_offset,
            log_window: env_usize("TICKLER_LOG_WINDOW", td.log_window),
            bootstrap_delay: td.bootstrap_delay,
        };

        Ok(Self {
            storage,
            reminders,
            tasks,
            event_ttl: env_secs("TICKLER_EVENT_TTL_SECS", defaults.event_ttl),
            log_dir: env_path("TICKLER_LOG_DIR"),
        })
    }
}

/// Parse a `±HH:MM` UTC offset.
pub fn parse_offset(raw: &str) -> Option<FixedOffset> {
    let raw = raw.trim();
    let (sign, rest) = match raw.as_bytes().first()? {
        b'+' => (1, &raw[1..]),
        b'-' => (-1, &raw[1..]),
        _ => (1, raw),
    };
    let (hours, minutes) = rest.split_once(':')?;
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

fn mirror_from_env() -> Option<MirrorConfig> {
    let endpoint = std::env::var("TICKLER_MIRROR_ENDPOINT").ok()?;
    let defaults = MirrorConfig::default();
    Some(MirrorConfig {
        endpoint,
        token: std::env::var("TICKLER_MIRROR_TOKEN").ok(),
        cooldown: env_secs("TICKLER_MIRROR_COOLDOWN_SECS", defaults.cooldown),
        fallback_dirs: env_path_list("TICKLER_MIRROR_FALLBACK_DIRS")
            .unwrap_or(defaults.fallback_dirs),
    })
}

fn env_secs(key: &str, default: Duration) -> Duration {
    match std::env::var(key) {
        Ok(raw) => match raw.parse::<u64>() {
            Ok(secs) => Duration::from_secs(secs),
            Err(_) => {
                tracing::warn!(key, value = %raw, "Ignoring malformed duration, using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(raw) => match raw.parse::<usize>() {
            Ok(n) => n,
            Err(_) => {
                tracing::warn!(key, value = %raw, "Ignoring malformed number, using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key).ok().map(PathBuf::from)
}

fn env_path_list(key: &str) -> Option<Vec<PathBuf>> {
    let raw = std::env::var(key).ok()?;
    Some(
        raw.split(':')
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dataset_paths_primary_first() {
        let config = StorageConfig {
            data_dir: PathBuf::from("/a"),
            backup_dirs: vec![PathBuf::from("/b"), PathBuf::from("/c")],
            mirror: None,
        };
        let paths = config.dataset_paths("reminders.json");
        assert_eq!(paths.len(), 3);
        assert_eq!(paths[0], PathBuf::from("/a/reminders.json"));
        assert_eq!(paths[2], PathBuf::from("/c/reminders.json"));
    }

    #[test]
    fn parse_offset_positive() {
        let offset = parse_offset("+09:00").unwrap();
        assert_eq!(offset.local_minus_utc(), 9 * 3600);
    }

    #[test]
    fn parse_offset_negative() {
        let offset = parse_offset("-05:30").unwrap();
        assert_eq!(offset.local_minus_utc(), -(5 * 3600 + 30 * 60));
    }

    #[test]
    fn parse_offset_rejects_garbage() {
        assert!(parse_offset("not an offset").is_none());
        assert!(parse_offset("+25:00").is_none());
        assert!(parse_offset("").is_none());
    }

    #[test]
    fn defaults_are_sane() {
        let config = EngineConfig::default();
        assert_eq!(config.reminders.max_per_owner, 100);
        assert_eq!(config.reminders.due_tolerance.as_secs(), 60);
        assert_eq!(config.tasks.reference_offset.local_minus_utc(), 9 * 3600);
    }
}
