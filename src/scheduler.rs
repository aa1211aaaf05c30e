//! Poll loops.
//!
//! One timer-driven loop per registry, spawned at startup and stopped
//! through a shared watch channel. Per-item failures are handled inside
//! the registries; whole-cycle failures here back off exponentially up to
//! a cap and are logged without crashing the process.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::delivery::Sender;
use crate::reminders::ReminderRegistry;
use crate::tasks::TaskRegistry;

/// Consecutive failures after which the backoff stops growing and the
/// cycle is reported as persistently failing.
const MAX_BACKOFF_DOUBLINGS: u32 = 4;

/// Spawn the reminder poll loop: scan for due items every `interval` and
/// deliver them through `sender`.
pub fn spawn_reminder_loop(
    registry: Arc<ReminderRegistry>,
    sender: Arc<dyn Sender>,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip the immediate first tick.
        ticker.tick().await;
        let mut failures: u32 = 0;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = chrono::Local::now().naive_local();
                    match registry.fire_due(now, sender.as_ref()).await {
                        Ok(fired) => {
                            if fired > 0 {
                                tracing::info!(fired, "Reminder scan complete");
                            }
                            failures = 0;
                        }
                        Err(e) => {
                            failures += 1;
                            let delay = backoff(interval, failures);
                            if failures > MAX_BACKOFF_DOUBLINGS {
                                tracing::error!(
                                    failures,
                                    "Reminder scan failing persistently, continuing at capped backoff: {}",
                                    e
                                );
                            } else {
                                tracing::warn!(failures, retry_in = ?delay, "Reminder scan failed: {}", e);
                            }
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
                _ = stop.changed() => {
                    tracing::info!("Reminder poll loop stopping");
                    break;
                }
            }
        }
    })
}

/// Spawn the task trigger loop: run due auto-tasks every `interval`.
pub fn spawn_task_loop(
    registry: Arc<TaskRegistry>,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = chrono::Local::now().naive_local();
                    let executed = registry.run_due(now).await;
                    if executed > 0 {
                        tracing::info!(executed, "Task trigger scan complete");
                    }
                }
                _ = stop.changed() => {
                    tracing::info!("Task poll loop stopping");
                    break;
                }
            }
        }
    })
}

/// Exponential backoff from the base interval, capped.
fn backoff(base: Duration, failures: u32) -> Duration {
    let doublings = failures.saturating_sub(1).min(MAX_BACKOFF_DOUBLINGS);
    base.saturating_mul(1u32 << doublings)
}
