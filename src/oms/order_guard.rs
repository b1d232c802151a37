//! Outstanding order guard
//!
//! Keeps a ladder from stacking orders: an unfilled order at one of this
//! cycle's targets means the previous decision is still working, anything
//! else is stale and gets cancelled before new orders go out.

use tracing::{info, warn};

use crate::actuator::Actuator;
use crate::error::ActuatorError;
use crate::types::Side;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GuardDecision {
    /// Nothing outstanding (or a stale order was cancelled)
    Proceed { cancelled: Option<f64> },
    /// An order at one of the current targets is still open
    Waiting { open_price: f64, side: Side },
    /// A stale order could not be cancelled
    CancelFailed { open_price: f64 },
}

/// Which target, if any, an open order price sits on
pub fn classify_open_order(
    open_price: f64,
    buy_target: f64,
    sell_target: f64,
    epsilon: f64,
) -> Option<Side> {
    if (open_price - buy_target).abs() < epsilon {
        Some(Side::Buy)
    } else if (open_price - sell_target).abs() < epsilon {
        Some(Side::Sell)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OutstandingOrderGuard {
    epsilon: f64,
}

impl OutstandingOrderGuard {
    pub fn new(epsilon: f64) -> Self {
        Self { epsilon }
    }

    pub async fn check(
        &self,
        actuator: &dyn Actuator,
        instrument: &str,
        buy_target: f64,
        sell_target: f64,
    ) -> Result<GuardDecision, ActuatorError> {
        let Some(open_price) = actuator.has_open_order(instrument).await? else {
            return Ok(GuardDecision::Proceed { cancelled: None });
        };

        if let Some(side) = classify_open_order(open_price, buy_target, sell_target, self.epsilon) {
            info!(
                "{}: open {} order at {:.2} still matches target, waiting",
                instrument, side, open_price
            );
            return Ok(GuardDecision::Waiting { open_price, side });
        }

        info!(
            "{}: stale open order at {:.2} (targets buy {:.2} / sell {:.2}), cancelling",
            instrument, open_price, buy_target, sell_target
        );
        if actuator.cancel_order(instrument).await? {
            Ok(GuardDecision::Proceed {
                cancelled: Some(open_price),
            })
        } else {
            warn!("{}: failed to cancel open order at {:.2}", instrument, open_price);
            Ok(GuardDecision::CancelFailed { open_price })
        }
    }
}

impl Default for OutstandingOrderGuard {
    fn default() -> Self {
        Self::new(0.01)
    }
}
