//! Reminder registry: user-scoped, time-triggered notifications with
//! optional repeat cadence.

pub mod format;
pub mod model;
pub mod registry;
pub mod schedule;

pub use model::{HistoryEvent, HistoryKind, NewReminder, Notification, Priority, ReminderUpdate, Repeat};
pub use registry::ReminderRegistry;
