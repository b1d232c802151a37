//! Paper actuator
//!
//! In-memory terminal simulator. Limit orders rest until the price crosses
//! them; buys are checked against available cash and sells against free
//! holdings.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

use super::{Actuator, LoginRequest, OrderRequest, SubmitOutcome};
use crate::config::PaperConfig;
use crate::error::ActuatorError;
use crate::types::Side;

#[derive(Debug, Clone, PartialEq)]
struct RestingOrder {
    side: Side,
    price: f64,
    quantity: i64,
}

#[derive(Debug)]
struct PaperBook {
    prices: HashMap<String, f64>,
    positions: HashMap<String, i64>,
    resting: HashMap<String, Vec<RestingOrder>>,
    cash: f64,
    surface_ready: bool,
    session_alive: bool,
    reject_cancels: bool,
    submissions: Vec<OrderRequest>,
    logins: Vec<String>,
}

impl PaperBook {
    fn reserved_cash(&self) -> f64 {
        self.resting
            .values()
            .flatten()
            .filter(|o| o.side == Side::Buy)
            .map(|o| o.price * o.quantity as f64)
            .sum()
    }

    fn free_holdings(&self, instrument: &str) -> i64 {
        let held = self.positions.get(instrument).copied().unwrap_or(0);
        let committed: i64 = self
            .resting
            .get(instrument)
            .map(|orders| {
                orders
                    .iter()
                    .filter(|o| o.side == Side::Sell)
                    .map(|o| o.quantity)
                    .sum()
            })
            .unwrap_or(0);
        held - committed
    }

    /// Fill every resting order the current price has crossed
    fn settle(&mut self, instrument: &str) {
        let Some(&price) = self.prices.get(instrument) else {
            return;
        };
        let Some(orders) = self.resting.get_mut(instrument) else {
            return;
        };

        let mut filled = Vec::new();
        orders.retain(|o| {
            let crossed = match o.side {
                Side::Buy => price <= o.price,
                Side::Sell => price >= o.price,
            };
            if crossed {
                filled.push(o.clone());
            }
            !crossed
        });

        for order in filled {
            let position = self.positions.entry(instrument.to_string()).or_insert(0);
            let notional = order.price * order.quantity as f64;
            match order.side {
                Side::Buy => {
                    *position += order.quantity;
                    self.cash -= notional;
                }
                Side::Sell => {
                    *position -= order.quantity;
                    self.cash += notional;
                }
            }
            info!(
                "Paper fill: {} {} x{} @ {:.2} (position now {})",
                order.side, instrument, order.quantity, order.price, position
            );
        }
    }
}

pub struct PaperActuator {
    book: Mutex<PaperBook>,
    fill_on_cross: bool,
}

impl PaperActuator {
    pub fn new(config: &PaperConfig) -> Self {
        Self {
            book: Mutex::new(PaperBook {
                prices: config.prices.clone(),
                positions: config.positions.clone(),
                resting: HashMap::new(),
                cash: config.cash,
                surface_ready: true,
                session_alive: true,
                reject_cancels: false,
                submissions: Vec::new(),
                logins: Vec::new(),
            }),
            fill_on_cross: config.fill_on_cross,
        }
    }

    fn book(&self) -> MutexGuard<'_, PaperBook> {
        self.book.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move the market; crossed resting orders fill immediately
    pub fn set_price(&self, instrument: &str, price: f64) {
        let mut book = self.book();
        book.prices.insert(instrument.to_string(), price);
        if self.fill_on_cross {
            book.settle(instrument);
        }
    }

    pub fn set_position(&self, instrument: &str, quantity: i64) {
        self.book().positions.insert(instrument.to_string(), quantity);
    }

    pub fn set_cash(&self, cash: f64) {
        self.book().cash = cash;
    }

    pub fn cash(&self) -> f64 {
        self.book().cash
    }

    pub fn set_surface_ready(&self, ready: bool) {
        self.book().surface_ready = ready;
    }

    pub fn set_session_alive(&self, alive: bool) {
        self.book().session_alive = alive;
    }

    /// Make cancel requests fail, as a stuck terminal would
    pub fn set_reject_cancels(&self, reject: bool) {
        self.book().reject_cancels = reject;
    }

    /// Place a resting order directly, bypassing the engine
    pub fn place_resting(&self, instrument: &str, side: Side, price: f64, quantity: i64) {
        self.book()
            .resting
            .entry(instrument.to_string())
            .or_default()
            .push(RestingOrder {
                side,
                price,
                quantity,
            });
    }

    pub fn open_order_count(&self, instrument: &str) -> usize {
        self.book().resting.get(instrument).map_or(0, Vec::len)
    }

    /// Every order the engine submitted, accepted or not
    pub fn submissions(&self) -> Vec<OrderRequest> {
        self.book().submissions.clone()
    }

    pub fn logins(&self) -> Vec<String> {
        self.book().logins.clone()
    }

    fn ensure_session(book: &PaperBook) -> Result<(), ActuatorError> {
        if book.session_alive {
            Ok(())
        } else {
            Err(ActuatorError::Unavailable("paper session closed".to_string()))
        }
    }
}

#[async_trait]
impl Actuator for PaperActuator {
    fn name(&self) -> &str {
        "paper"
    }

    async fn surface_ready(&self) -> Result<bool, ActuatorError> {
        Ok(self.book().surface_ready)
    }

    async fn session_alive(&self) -> Result<bool, ActuatorError> {
        Ok(self.book().session_alive)
    }

    async fn login(&self, request: &LoginRequest) -> Result<bool, ActuatorError> {
        let mut book = self.book();
        book.session_alive = true;
        book.logins.push(request.account_id.clone());
        info!("Paper login for account {}", request.account_id);
        Ok(true)
    }

    async fn get_position(&self, instrument: &str) -> Result<i64, ActuatorError> {
        let book = self.book();
        Self::ensure_session(&book)?;
        Ok(book.positions.get(instrument).copied().unwrap_or(0))
    }

    async fn get_price(&self, instrument: &str) -> Result<f64, ActuatorError> {
        let book = self.book();
        Self::ensure_session(&book)?;
        book.prices
            .get(instrument)
            .copied()
            .ok_or_else(|| ActuatorError::Transient(format!("no price for {}", instrument)))
    }

    async fn has_open_order(&self, instrument: &str) -> Result<Option<f64>, ActuatorError> {
        let book = self.book();
        Self::ensure_session(&book)?;
        Ok(book
            .resting
            .get(instrument)
            .and_then(|orders| orders.first())
            .map(|o| o.price))
    }

    async fn cancel_order(&self, instrument: &str) -> Result<bool, ActuatorError> {
        let mut book = self.book();
        Self::ensure_session(&book)?;
        if book.reject_cancels {
            return Ok(false);
        }
        let removed = book.resting.remove(instrument).map_or(0, |o| o.len());
        debug!("Paper cancel on {}: {} orders removed", instrument, removed);
        Ok(true)
    }

    async fn submit_order(&self, order: &OrderRequest) -> Result<SubmitOutcome, ActuatorError> {
        let mut book = self.book();
        Self::ensure_session(&book)?;
        book.submissions.push(order.clone());

        if order.quantity <= 0 || order.price <= 0.0 {
            return Ok(SubmitOutcome::Failed(format!(
                "invalid order {} x{} @ {}",
                order.side, order.quantity, order.price
            )));
        }

        match order.side {
            Side::Buy => {
                let available = book.cash - book.reserved_cash();
                if order.price * order.quantity as f64 > available {
                    return Ok(SubmitOutcome::InsufficientFunds);
                }
            }
            Side::Sell => {
                if order.quantity > book.free_holdings(&order.instrument) {
                    return Ok(SubmitOutcome::Failed("not enough free holdings".to_string()));
                }
            }
        }

        book.resting
            .entry(order.instrument.clone())
            .or_default()
            .push(RestingOrder {
                side: order.side,
                price: order.price,
                quantity: order.quantity,
            });
        if self.fill_on_cross {
            book.settle(&order.instrument);
        }

        Ok(SubmitOutcome::Accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn paper() -> PaperActuator {
        let mut config = PaperConfig::default();
        config.cash = 1_000.0;
        config.prices.insert("ACME".to_string(), 10.0);
        PaperActuator::new(&config)
    }

    fn order(side: Side, price: f64, quantity: i64) -> OrderRequest {
        OrderRequest {
            instrument: "ACME".to_string(),
            side,
            price,
            quantity,
        }
    }

    #[tokio::test]
    async fn test_resting_buy_fills_when_price_crosses() {
        let p = paper();
        let outcome = p.submit_order(&order(Side::Buy, 9.0, 10)).await.unwrap();
        assert_eq!(outcome, SubmitOutcome::Accepted);
        assert_eq!(p.has_open_order("ACME").await.unwrap(), Some(9.0));
        assert_eq!(p.get_position("ACME").await.unwrap(), 0);

        p.set_price("ACME", 8.9);
        assert_eq!(p.has_open_order("ACME").await.unwrap(), None);
        assert_eq!(p.get_position("ACME").await.unwrap(), 10);
        assert_relative_eq!(p.cash(), 910.0);
    }

    #[tokio::test]
    async fn test_buy_beyond_available_cash_is_insufficient_funds() {
        let p = paper();
        assert_eq!(
            p.submit_order(&order(Side::Buy, 9.0, 200)).await.unwrap(),
            SubmitOutcome::InsufficientFunds
        );
        // reserved cash counts against the next order
        assert_eq!(
            p.submit_order(&order(Side::Buy, 9.0, 60)).await.unwrap(),
            SubmitOutcome::Accepted
        );
        assert_eq!(
            p.submit_order(&order(Side::Buy, 9.0, 60)).await.unwrap(),
            SubmitOutcome::InsufficientFunds
        );
    }

    #[tokio::test]
    async fn test_sell_needs_free_holdings() {
        let p = paper();
        p.set_position("ACME", 5);
        assert!(matches!(
            p.submit_order(&order(Side::Sell, 12.0, 6)).await.unwrap(),
            SubmitOutcome::Failed(_)
        ));
        assert_eq!(
            p.submit_order(&order(Side::Sell, 12.0, 5)).await.unwrap(),
            SubmitOutcome::Accepted
        );
    }

    #[tokio::test]
    async fn test_cancel_can_be_rejected() {
        let p = paper();
        p.place_resting("ACME", Side::Buy, 9.5, 1);
        p.set_reject_cancels(true);
        assert!(!p.cancel_order("ACME").await.unwrap());
        assert_eq!(p.open_order_count("ACME"), 1);

        p.set_reject_cancels(false);
        assert!(p.cancel_order("ACME").await.unwrap());
        assert_eq!(p.open_order_count("ACME"), 0);
    }

    #[tokio::test]
    async fn test_closed_session_is_unavailable() {
        let p = paper();
        p.set_session_alive(false);
        let err = p.get_price("ACME").await.unwrap_err();
        assert!(err.is_session_fatal());
    }
}
