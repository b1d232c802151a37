//! Configuration management
//!
//! Handles loading and parsing of the JSON configuration file, with
//! environment variable overrides for notifier credentials.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::oms::MatchMode;
use crate::scheduler::window::TimeWindow;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub paper: PaperConfig,
}

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Config = serde_json::from_str(&contents)?;

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Load notifier credentials from environment if set
    pub fn apply_env(&mut self) {
        let telegram = &mut self.notifier.telegram;
        if let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN") {
            telegram.operator_token = Some(token);
        }
        if let Ok(chat) = std::env::var("TELEGRAM_CHAT_ID") {
            telegram.operator_chat_id = Some(chat);
        }
        if let Ok(token) = std::env::var("TELEGRAM_ADMIN_BOT_TOKEN") {
            telegram.admin_token = Some(token);
        }
        if let Ok(chat) = std::env::var("TELEGRAM_ADMIN_CHAT_ID") {
            telegram.admin_chat_id = Some(chat);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let engine = &self.engine;
        if !(engine.max_price_deviation.is_finite() && engine.max_price_deviation > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "engine.max_price_deviation must be > 0, got {}",
                engine.max_price_deviation
            )));
        }
        if engine.drift_warning_threshold < 0 {
            return Err(ConfigError::Invalid(format!(
                "engine.drift_warning_threshold must be >= 0, got {}",
                engine.drift_warning_threshold
            )));
        }
        if !(engine.order_price_epsilon.is_finite() && engine.order_price_epsilon > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "engine.order_price_epsilon must be > 0, got {}",
                engine.order_price_epsilon
            )));
        }
        if self.scheduler.actuator_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.actuator_timeout_secs must be > 0".to_string(),
            ));
        }
        if self.notifier.kind == NotifierKind::Telegram
            && !self.notifier.telegram.has_operator()
            && !self.notifier.telegram.has_admin()
        {
            return Err(ConfigError::Invalid(
                "telegram notifier needs at least one bot token and chat id".to_string(),
            ));
        }
        Ok(())
    }
}

/// Decision thresholds of the ladder engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum relative distance between order price and market price
    pub max_price_deviation: f64,
    /// `|raw drift|` above which a warning is emitted
    pub drift_warning_threshold: i64,
    /// Open-order price tolerance when comparing with targets
    pub order_price_epsilon: f64,
    pub match_mode: MatchMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_price_deviation: 0.10,
            drift_warning_threshold: 50,
            order_price_epsilon: 0.01,
            match_mode: MatchMode::Quantity,
        }
    }
}

/// Reconciliation loop timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Task file, re-read every pass
    pub tasks_path: PathBuf,
    pub pass_delay_secs: u64,
    pub surface_backoff_secs: u64,
    pub recovery_backoff_secs: u64,
    pub idle_backoff_secs: u64,
    pub actuator_timeout_secs: u64,
    /// Global suspension window (e.g. an exchange maintenance hour)
    pub blackout: Option<TimeWindow>,
    /// Window in which daily fill counters are reset
    pub daily_reset: Option<TimeWindow>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            tasks_path: PathBuf::from("configs/tasks.json"),
            pass_delay_secs: 5,
            surface_backoff_secs: 60,
            recovery_backoff_secs: 10,
            idle_backoff_secs: 10,
            actuator_timeout_secs: 30,
            blackout: None,
            daily_reset: TimeWindow::parse("09:00", "10:00").ok(),
        }
    }
}

impl SchedulerConfig {
    pub fn pass_delay(&self) -> Duration {
        Duration::from_secs(self.pass_delay_secs)
    }

    pub fn surface_backoff(&self) -> Duration {
        Duration::from_secs(self.surface_backoff_secs)
    }

    pub fn recovery_backoff(&self) -> Duration {
        Duration::from_secs(self.recovery_backoff_secs)
    }

    pub fn idle_backoff(&self) -> Duration {
        Duration::from_secs(self.idle_backoff_secs)
    }

    pub fn actuator_timeout(&self) -> Duration {
        Duration::from_secs(self.actuator_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            path: PathBuf::from("state/ladders.db"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifierKind {
    #[default]
    Log,
    Telegram,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    pub kind: NotifierKind,
    pub telegram: TelegramConfig,
}

/// Telegram bots; the admin bot mirrors every event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator_chat_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_chat_id: Option<String>,
    /// Identical messages within this window are dropped
    pub duplicate_window_secs: u64,
    pub api_base: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        TelegramConfig {
            operator_token: None,
            operator_chat_id: None,
            admin_token: None,
            admin_chat_id: None,
            duplicate_window_secs: 3,
            api_base: "https://api.telegram.org".to_string(),
        }
    }
}

impl TelegramConfig {
    pub fn has_operator(&self) -> bool {
        self.operator_token.is_some() && self.operator_chat_id.is_some()
    }

    pub fn has_admin(&self) -> bool {
        self.admin_token.is_some() && self.admin_chat_id.is_some()
    }
}

/// Paper actuator starting state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaperConfig {
    pub cash: f64,
    pub prices: HashMap<String, f64>,
    pub positions: HashMap<String, i64>,
    /// Fill resting orders as soon as the price crosses them
    pub fill_on_cross: bool,
}

impl Default for PaperConfig {
    fn default() -> Self {
        PaperConfig {
            cash: 1_000_000.0,
            prices: HashMap::new(),
            positions: HashMap::new(),
            fill_on_cross: true,
        }
    }
}
