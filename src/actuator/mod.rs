//! Actuator abstraction
//!
//! The actuator is whatever drives the trading terminal: a desktop
//! automation driver, an exchange API client, or the in-memory
//! [`PaperActuator`]. The engine only talks to it through [`Actuator`].

pub mod paper;

pub use paper::PaperActuator;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::error::ActuatorError;
use crate::types::Side;

/// A limit order ready for submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub instrument: String,
    pub side: Side,
    pub price: f64,
    pub quantity: i64,
}

/// What the terminal answered to a submission
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Accepted,
    InsufficientFunds,
    Failed(String),
}

/// Credentials and extras for a login task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub account_id: String,
    /// Remaining task fields (certificate index, program path, password...)
    pub extra: Vec<String>,
}

#[async_trait]
pub trait Actuator: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the terminal surface is present and usable
    async fn surface_ready(&self) -> Result<bool, ActuatorError>;

    /// Whether the terminal session is still alive
    async fn session_alive(&self) -> Result<bool, ActuatorError>;

    async fn login(&self, request: &LoginRequest) -> Result<bool, ActuatorError>;

    async fn get_position(&self, instrument: &str) -> Result<i64, ActuatorError>;

    async fn get_price(&self, instrument: &str) -> Result<f64, ActuatorError>;

    /// Price of an open unfilled order, if any
    async fn has_open_order(&self, instrument: &str) -> Result<Option<f64>, ActuatorError>;

    async fn cancel_order(&self, instrument: &str) -> Result<bool, ActuatorError>;

    async fn submit_order(&self, order: &OrderRequest) -> Result<SubmitOutcome, ActuatorError>;
}

/// Wraps an actuator so that every call is bounded by a timeout
pub struct TimedActuator {
    inner: Arc<dyn Actuator>,
    timeout: Duration,
}

impl TimedActuator {
    pub fn new(inner: Arc<dyn Actuator>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T, ActuatorError>
    where
        T: Send,
        F: Future<Output = Result<T, ActuatorError>> + Send,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "Actuator {} call {} timed out after {:?}",
                    self.inner.name(),
                    operation,
                    self.timeout
                );
                Err(ActuatorError::Timeout {
                    operation,
                    after: self.timeout,
                })
            }
        }
    }
}

#[async_trait]
impl Actuator for TimedActuator {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn surface_ready(&self) -> Result<bool, ActuatorError> {
        self.bounded("surface_ready", self.inner.surface_ready()).await
    }

    async fn session_alive(&self) -> Result<bool, ActuatorError> {
        self.bounded("session_alive", self.inner.session_alive()).await
    }

    async fn login(&self, request: &LoginRequest) -> Result<bool, ActuatorError> {
        self.bounded("login", self.inner.login(request)).await
    }

    async fn get_position(&self, instrument: &str) -> Result<i64, ActuatorError> {
        self.bounded("get_position", self.inner.get_position(instrument))
            .await
    }

    async fn get_price(&self, instrument: &str) -> Result<f64, ActuatorError> {
        self.bounded("get_price", self.inner.get_price(instrument)).await
    }

    async fn has_open_order(&self, instrument: &str) -> Result<Option<f64>, ActuatorError> {
        self.bounded("has_open_order", self.inner.has_open_order(instrument))
            .await
    }

    async fn cancel_order(&self, instrument: &str) -> Result<bool, ActuatorError> {
        self.bounded("cancel_order", self.inner.cancel_order(instrument))
            .await
    }

    async fn submit_order(&self, order: &OrderRequest) -> Result<SubmitOutcome, ActuatorError> {
        self.bounded("submit_order", self.inner.submit_order(order))
            .await
    }
}
