//! Order execution
//!
//! Thin pass-through from an approved admission to the actuator.

use tracing::{info, warn};

use crate::actuator::{Actuator, OrderRequest, SubmitOutcome};
use crate::error::ActuatorError;

#[derive(Debug, Clone, Copy, Default)]
pub struct OrderExecutor;

impl OrderExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Submit one order. Terminal refusals come back as [`SubmitOutcome`],
    /// transport problems as [`ActuatorError`].
    pub async fn submit(
        &self,
        actuator: &dyn Actuator,
        order: &OrderRequest,
    ) -> Result<SubmitOutcome, ActuatorError> {
        info!(
            "Submitting {} {} x{} @ {:.2} via {}",
            order.side,
            order.instrument,
            order.quantity,
            order.price,
            actuator.name()
        );

        let outcome = actuator.submit_order(order).await;
        match &outcome {
            Ok(SubmitOutcome::Accepted) => {
                info!("{} order accepted for {}", order.side, order.instrument)
            }
            Ok(SubmitOutcome::InsufficientFunds) => warn!(
                "{} order for {} refused: insufficient funds",
                order.side, order.instrument
            ),
            Ok(SubmitOutcome::Failed(reason)) => warn!(
                "{} order for {} failed: {}",
                order.side, order.instrument, reason
            ),
            Err(e) => warn!("{} order for {} errored: {}", order.side, order.instrument, e),
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::PaperActuator;
    use crate::config::PaperConfig;
    use crate::types::Side;

    #[tokio::test]
    async fn test_submit_passes_outcome_through() {
        let mut config = PaperConfig::default();
        config.cash = 100.0;
        config.prices.insert("ACME".to_string(), 10.0);
        let paper = PaperActuator::new(&config);
        let executor = OrderExecutor::new();

        let small = OrderRequest {
            instrument: "ACME".to_string(),
            side: Side::Buy,
            price: 9.0,
            quantity: 5,
        };
        assert_eq!(
            executor.submit(&paper, &small).await.unwrap(),
            SubmitOutcome::Accepted
        );

        let large = OrderRequest {
            quantity: 50,
            ..small
        };
        assert_eq!(
            executor.submit(&paper, &large).await.unwrap(),
            SubmitOutcome::InsufficientFunds
        );
        assert_eq!(paper.submissions().len(), 2);
    }
}
