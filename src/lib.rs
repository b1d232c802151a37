//! Grid Ladder
//!
//! Reconciles a brokerage position against a tiered grid ladder and admits
//! at most one buy and one sell limit order per ladder per cycle. The
//! terminal is reached through an [`actuator::Actuator`]; ladders, operator
//! controls and telemetry live in a [`store::LadderStore`].

pub mod actuator;
pub mod config;
pub mod error;
pub mod notifier;
pub mod oms;
pub mod scheduler;
pub mod store;
pub mod types;

pub use config::Config;
pub use types::*;
