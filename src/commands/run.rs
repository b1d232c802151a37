//! Run command
//!
//! Opens the ladder store, builds the actuator and notifier, and drives the
//! reconciliation loop until Ctrl+C.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info, warn};

use grid_ladder::actuator::{Actuator, PaperActuator};
use grid_ladder::config::NotifierKind;
use grid_ladder::notifier::{LogNotifier, Notifier, TelegramNotifier};
use grid_ladder::scheduler::{shutdown, FileTaskSource, ReconciliationLoop, TaskSource};
use grid_ladder::store::{LadderStore, SqliteLadderStore};

use super::load_config;

pub fn run(config_path: String, tasks_override: Option<String>, state_db: Option<String>) -> Result<()> {
    dotenv::dotenv().ok();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(run_async(config_path, tasks_override, state_db))
}

async fn run_async(
    config_path: String,
    tasks_override: Option<String>,
    state_db: Option<String>,
) -> Result<()> {
    let mut config = load_config(&config_path)?;
    if let Some(path) = tasks_override {
        info!("Overriding task file to: {}", path);
        config.scheduler.tasks_path = path.into();
    }
    if let Some(path) = state_db {
        info!("Overriding state database to: {}", path);
        config.store.path = path.into();
    }

    info!("============================================================");
    info!("GRID LADDER - PAPER ACTUATOR");
    info!("Tasks:          {}", config.scheduler.tasks_path.display());
    info!("State database: {}", config.store.path.display());
    info!("Match mode:     {:?}", config.engine.match_mode);
    info!("Max deviation:  {:.1}%", config.engine.max_price_deviation * 100.0);
    if let Some(window) = config.scheduler.blackout {
        info!("Blackout:       {}", window);
    }
    info!("============================================================");

    let tasks = FileTaskSource::new(&config.scheduler.tasks_path);
    let initial = tasks
        .load()
        .context(format!("Failed to load tasks from {}", tasks.path().display()))?;
    info!("Loaded {} tasks", initial.len());

    let store = SqliteLadderStore::open(&config.store.path).context(format!(
        "Failed to open state database {}",
        config.store.path.display()
    ))?;
    let ladders = store.list_ladders()?;
    if ladders.is_empty() {
        warn!("State database has no ladders; import one with the import command");
    } else {
        info!("Ladders in store: {}", ladders.join(", "));
    }

    let notifier: Arc<dyn Notifier> = match config.notifier.kind {
        NotifierKind::Log => Arc::new(LogNotifier),
        NotifierKind::Telegram => {
            let telegram = &config.notifier.telegram;
            if !telegram.has_operator() && !telegram.has_admin() {
                warn!("Telegram notifier selected but no bot is configured");
            }
            Arc::new(TelegramNotifier::new(telegram).context("Failed to build Telegram client")?)
        }
    };

    let actuator: Arc<dyn Actuator> = Arc::new(PaperActuator::new(&config.paper));
    let store: Arc<dyn LadderStore> = Arc::new(store);
    let tasks: Arc<dyn TaskSource> = Arc::new(tasks);

    let mut reconciler = ReconciliationLoop::new(&config, actuator, store, notifier, tasks);

    let (trigger, shutdown) = shutdown::channel();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, initiating shutdown...");
                trigger.trigger();
            }
            Err(e) => {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
        }
    });

    reconciler.run(shutdown).await;

    info!("Shutdown complete");
    Ok(())
}
