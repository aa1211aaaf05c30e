use std::sync::Arc;

use tickler::config::EngineConfig;
use tickler::delivery::ConsoleSender;
use tickler::reminders::ReminderRegistry;
use tickler::scheduler;
use tickler::store::{FileStore, Mirror};
use tickler::tasks::builtin::{DigestHandler, KeywordWatchHandler, UsageReportHandler};
use tickler::tasks::{HandlerRegistry, TaskRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = EngineConfig::from_env()?;

    // Initialize tracing; file logging is optional.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _log_guard = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "tickler.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .init();
            None
        }
    };

    eprintln!("⏰ tickler v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Data dir: {}", config.storage.data_dir.display());
    eprintln!(
        "   Backups: {}",
        config
            .storage
            .backup_dirs
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    eprintln!(
        "   Poll: reminders every {}s, tasks every {}s",
        config.reminders.poll_interval.as_secs(),
        config.tasks.poll_interval.as_secs()
    );

    // ── Storage ─────────────────────────────────────────────────────────
    let mirror = config.storage.mirror.clone().map(|m| {
        eprintln!("   Mirror: {}", m.endpoint);
        Arc::new(Mirror::new(m))
    });
    let mut reminder_store = FileStore::new(config.storage.dataset_paths("reminders.json"));
    let mut task_store = FileStore::new(config.storage.dataset_paths("auto_tasks.json"));
    let mut log_store = FileStore::new(config.storage.dataset_paths("task_logs.json"));
    if let Some(mirror) = &mirror {
        reminder_store = reminder_store.with_mirror(Arc::clone(mirror));
        task_store = task_store.with_mirror(Arc::clone(mirror));
        log_store = log_store.with_mirror(Arc::clone(mirror));
    }

    // ── Registries ──────────────────────────────────────────────────────
    let reminders = Arc::new(ReminderRegistry::new(
        config.reminders.clone(),
        reminder_store,
    ));

    let handlers = Arc::new(HandlerRegistry::new());
    handlers.register(Arc::new(DigestHandler)).await;
    handlers.register(Arc::new(KeywordWatchHandler)).await;
    handlers.register(Arc::new(UsageReportHandler)).await;
    eprintln!("   Handlers: {}", handlers.list().await.join(", "));

    let tasks = Arc::new(TaskRegistry::new(
        config.tasks.clone(),
        task_store,
        log_store,
        Arc::clone(&handlers),
        Arc::clone(&reminders),
        None, // No feed provider wired by default.
    ));
    tasks.init(chrono::Local::now().naive_local()).await;

    // ── Poll loops ──────────────────────────────────────────────────────
    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    let sender = Arc::new(ConsoleSender);
    let reminder_loop = scheduler::spawn_reminder_loop(
        Arc::clone(&reminders),
        sender,
        config.reminders.poll_interval,
        stop_rx.clone(),
    );
    let task_loop =
        scheduler::spawn_task_loop(Arc::clone(&tasks), config.tasks.poll_interval, stop_rx);

    eprintln!("   Running. Ctrl-C to stop.\n");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    let _ = stop_tx.send(true);
    let _ = reminder_loop.await;
    let _ = task_loop.await;

    Ok(())
}
