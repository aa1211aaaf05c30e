//! Text rendering of reminder lists for the delivery channel.

use chrono::NaiveDateTime;

use crate::reminders::model::Notification;

/// Render an owner's reminders as a readable list, soonest first.
pub fn format_list(items: &[Notification], now: NaiveDateTime) -> String {
    if items.is_empty() {
        return "📝 No reminders set.".to_string();
    }

    let mut lines = vec!["📋 Your reminders:".to_string()];
    for (index, item) in items.iter().enumerate() {
        let status = if item.acknowledged { "✅" } else { "⏳" };
        match item.fire_time() {
            Some(at) => {
                lines.push(format!(
                    "{}. {} {} {} — {} ({}) {}",
                    index + 1,
                    status,
                    item.priority.icon(),
                    item.title,
                    at.format("%m/%d %H:%M"),
                    item.repeat.label(),
                    relative(at, now),
                ));
            }
            None => {
                lines.push(format!(
                    "{}. ❓ {} {} — unreadable time",
                    index + 1,
                    item.priority.icon(),
                    item.title,
                ));
            }
        }
        lines.push(format!("   🆔 {}", item.id));
    }
    lines.join("\n")
}

/// Human-readable distance between a fire time and now.
fn relative(at: NaiveDateTime, now: NaiveDateTime) -> String {
    let seconds = (at - now).num_seconds();
    let (magnitude, past) = if seconds < 0 {
        (-seconds, true)
    } else {
        (seconds, false)
    };
    let phrase = if magnitude < 3600 {
        format!("{}m", magnitude / 60)
    } else if magnitude < 86_400 {
        format!("{}h", magnitude / 3600)
    } else {
        format!("{}d", magnitude / 86_400)
    };
    if past {
        format!("{phrase} ago")
    } else {
        format!("in {phrase}")
    }
}
