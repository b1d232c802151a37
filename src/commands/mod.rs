pub mod clear_halt;
pub mod import;
pub mod run;
pub mod status;

use anyhow::{Context, Result};
use grid_ladder::Config;

/// Load the configuration file, reporting which file failed
pub fn load_config(config_path: &str) -> Result<Config> {
    Config::from_file(config_path).context(format!("Failed to load config from {}", config_path))
}

/// Single-threaded runtime for the short maintenance commands
pub fn maintenance_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")
}
