//! Error taxonomy for the ladder engine
//!
//! Every failure a cycle can hit is one of these variants. Only
//! [`ActuatorError::Unavailable`] and configuration errors are allowed to
//! stop anything larger than a single ladder cycle.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::types::MatchBasis;

/// Failures reported by (or about) the actuator
#[derive(Debug, Error)]
pub enum ActuatorError {
    /// Retry on the next scheduled cycle
    #[error("actuator call failed: {0}")]
    Transient(String),

    /// Fatal for the cycle, not for the process
    #[error("actuator call `{operation}` timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// The terminal session is gone; requires reconnecting
    #[error("actuator unavailable: {0}")]
    Unavailable(String),
}

impl ActuatorError {
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, ActuatorError::Unavailable(_))
    }
}

/// Ladder store failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("ladder `{0}` not found")]
    LadderNotFound(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("invalid stored value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },

    #[error("failed to read ladder rows: {0}")]
    Csv(#[from] csv::Error),

    #[error("store lock poisoned")]
    Poisoned,

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Task file decoding failures, reported per task record
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TaskParseError {
    #[error("unknown task type `{0}`")]
    UnknownType(String),

    #[error("unknown task status `{0}`")]
    UnknownStatus(String),

    #[error("{kind} task needs {expected} detail fields, found {found}")]
    MissingFields {
        kind: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("invalid time `{value}` for {field}")]
    InvalidTime { field: &'static str, value: String },

    #[error("invalid interval `{0}`")]
    InvalidInterval(String),
}

/// Configuration loading failures (fatal at startup)
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// No rung in the ladder was a usable candidate
#[derive(Debug, Clone, PartialEq, Error)]
#[error("no ladder rung matches {basis} {value}")]
pub struct NoTierMatch {
    pub basis: MatchBasis,
    pub value: f64,
}

/// Notification delivery failures; never fatal
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("notification rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Why a single ladder cycle was abandoned
#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    NoTierMatch(#[from] NoTierMatch),

    #[error("could not cancel stale open order at {open_price}")]
    CancelFailed { open_price: f64 },

    #[error(transparent)]
    Actuator(#[from] ActuatorError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CycleError {
    /// Whether the whole session must be torn down and reconnected
    pub fn is_session_fatal(&self) -> bool {
        match self {
            CycleError::Actuator(e) => e.is_session_fatal(),
            _ => false,
        }
    }
}
