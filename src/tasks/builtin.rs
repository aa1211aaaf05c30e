//! Built-in task handlers.
//!
//! Each handler composes a payload and delivers it by creating a reminder
//! for the task's owner — the registry then carries it to the delivery
//! channel like any other notification.

use async_trait::async_trait;

use crate::reminders::model::{NewReminder, Priority, Repeat, format_fire_at};
use crate::tasks::handler::{HandlerContext, TaskHandler};
use crate::tasks::model::AutoTask;

/// Composes a daily digest from the configured topics.
pub struct DigestHandler;

/// Watches keywords and alerts when the hit count crosses a threshold.
pub struct KeywordWatchHandler;

/// Renders the owner's task statistics as a report.
pub struct UsageReportHandler;

#[async_trait]
impl TaskHandler for DigestHandler {
    fn task_type(&self) -> &str {
        "daily_digest"
    }

    async fn execute(&self, task: &AutoTask, ctx: &HandlerContext) -> Option<String> {
        let topics = string_list(task, "topics");
        let topics = if topics.is_empty() {
            vec!["headlines".to_string()]
        } else {
            topics
        };

        let body = match &ctx.feed {
            Some(feed) => {
                let mut sections = vec!["🌤️ Good morning! Today's digest:".to_string()];
                let mut found = 0usize;
                for topic in &topics {
                    let items = feed.search(topic, 3).await;
                    if items.is_empty() {
                        continue;
                    }
                    sections.push(format!("\n📌 {topic}:"));
                    for item in items {
                        found += 1;
                        sections.push(format!("• {} — {}", item.title, item.link));
                    }
                }
                if found == 0 {
                    sections.push("Nothing new on your topics today.".to_string());
                }
                sections.join("\n")
            }
            None => format!(
                "🌤️ Good morning! The digest source is currently unavailable; \
                 ask for '{}' later to get the latest.",
                topics.join(", ")
            ),
        };

        deliver(ctx, task, "🌤️ Daily digest", &body, Priority::Medium).await?;
        Some(format!("digest delivered ({} topics)", topics.len()))
    }
}

#[async_trait]
impl TaskHandler for KeywordWatchHandler {
    fn task_type(&self) -> &str {
        "keyword_watch"
    }

    async fn execute(&self, task: &AutoTask, ctx: &HandlerContext) -> Option<String> {
        let feed = ctx.feed.as_ref()?;
        let keywords = string_list(task, "keywords");
        if keywords.is_empty() {
            tracing::warn!(task = %task.task_id, "keyword_watch task has no keywords");
            return None;
        }
        let threshold = task
            .parameters
            .get("alert_threshold")
            .and_then(|v| v.as_u64())
            .unwrap_or(3) as usize;

        let mut alerts = Vec::new();
        for keyword in &keywords {
            let items = feed.search(keyword, 5).await;
            if items.len() >= threshold {
                let latest = items.first().map(|i| i.title.clone()).unwrap_or_default();
                alerts.push((keyword.clone(), items.len(), latest));
            }
        }

        if alerts.is_empty() {
            return Some("no keywords above threshold".to_string());
        }

        let mut lines = vec!["🚨 Keyword alert:".to_string()];
        for (keyword, count, latest) in &alerts {
            lines.push(format!("🔍 {keyword}: {count} new hits — latest: {latest}"));
        }
        deliver(ctx, task, "🚨 Keyword alert", &lines.join("\n"), Priority::High).await?;
        Some(format!("alerted on {} keyword(s)", alerts.len()))
    }
}

#[async_trait]
impl TaskHandler for UsageReportHandler {
    fn task_type(&self) -> &str {
        "usage_report"
    }

    async fn execute(&self, task: &AutoTask, ctx: &HandlerContext) -> Option<String> {
        let mut lines = vec![
            "📊 Usage report".to_string(),
            format!("🤖 Active tasks: {}", ctx.stats.active_tasks),
            format!("📝 Recorded executions: {}", ctx.stats.log_entries),
        ];
        if !ctx.stats.owner_tasks.is_empty() {
            lines.push("🔄 Your tasks:".to_string());
            for (title, runs) in &ctx.stats.owner_tasks {
                lines.push(format!("• {title} ({runs} runs)"));
            }
        }
        deliver(ctx, task, "📊 Usage report", &lines.join("\n"), Priority::Low).await?;
        Some("usage report delivered".to_string())
    }
}

/// Create the payload reminder, due now, for the task's owner.
async fn deliver(
    ctx: &HandlerContext,
    task: &AutoTask,
    title: &str,
    body: &str,
    priority: Priority,
) -> Option<String> {
    let input = NewReminder {
        title: title.to_string(),
        body: body.to_string(),
        fire_at: format_fire_at(ctx.now),
        priority,
        repeat: Repeat::None,
    };
    match ctx.reminders.create(&task.owner_id, input).await {
        Ok(id) => Some(id),
        Err(e) => {
            tracing::warn!(task = %task.task_id, "Handler could not deliver its payload: {}", e);
            None
        }
    }
}

/// Read a parameter that is a list of strings (a bare string counts as a
/// one-element list).
fn string_list(task: &AutoTask, key: &str) -> Vec<String> {
    match task.parameters.get(key) {
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect(),
        Some(serde_json::Value::String(one)) => vec![one.clone()],
        _ => Vec::new(),
    }
}
