//! Order admission
//!
//! Every order passes through [`AdmissionController::evaluate`] before it
//! reaches the actuator. Rules run in a fixed order and the first failing
//! rule decides the verdict.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{DriftRecord, HaltLatch, LadderRung, Side};

/// Why an order was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    HaltActive,
    SameTierRepeat,
    BelowCostBasisViolation,
    PriceDeviationExceeded,
    ZeroQuantity,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RejectReason::HaltActive => "halt active",
            RejectReason::SameTierRepeat => "same tier as last approved buy",
            RejectReason::BelowCostBasisViolation => "cost basis violation",
            RejectReason::PriceDeviationExceeded => "price deviation exceeded",
            RejectReason::ZeroQuantity => "zero quantity",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionVerdict {
    Approved,
    Rejected(RejectReason),
}

impl AdmissionVerdict {
    pub fn is_approved(&self) -> bool {
        matches!(self, AdmissionVerdict::Approved)
    }
}

/// Inputs for one side's admission check
#[derive(Debug, Clone, Copy)]
pub struct AdmissionRequest<'a> {
    pub side: Side,
    pub rung: &'a LadderRung,
    pub drift: &'a DriftRecord,
    pub current_price: f64,
    pub average_cost: f64,
    pub last_approved_tier: Option<&'a str>,
    pub halt: HaltLatch,
}

fn to_decimal(value: f64) -> Option<Decimal> {
    Decimal::try_from(value).ok()
}

/// Relative distance of an order price from the market price.
///
/// `None` when the market price is not positive or either price has no
/// decimal form.
pub fn price_deviation(order_price: f64, current_price: f64) -> Option<Decimal> {
    let order = to_decimal(order_price)?;
    let current = to_decimal(current_price)?;
    if current <= Decimal::ZERO {
        return None;
    }
    Some((order - current).abs() / current)
}

/// Whether `order_price` sits further than `max_deviation` from the market.
///
/// Compared as `|order - current| > max_deviation * current` in decimal so a
/// price exactly on the boundary stays admissible.
pub fn exceeds_deviation(order_price: f64, current_price: f64, max_deviation: f64) -> bool {
    match (
        to_decimal(order_price),
        to_decimal(current_price),
        to_decimal(max_deviation),
    ) {
        (Some(order), Some(current), Some(max)) if current > Decimal::ZERO => {
            (order - current).abs() > max * current
        }
        _ => true,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AdmissionController {
    max_price_deviation: f64,
}

impl AdmissionController {
    pub fn new(max_price_deviation: f64) -> Self {
        Self { max_price_deviation }
    }

    pub fn max_price_deviation(&self) -> f64 {
        self.max_price_deviation
    }

    pub fn evaluate(&self, req: &AdmissionRequest<'_>) -> AdmissionVerdict {
        match req.side {
            Side::Buy => self.evaluate_buy(req),
            Side::Sell => self.evaluate_sell(req),
        }
    }

    fn evaluate_buy(&self, req: &AdmissionRequest<'_>) -> AdmissionVerdict {
        use RejectReason::*;

        if req.halt.buy_halt {
            return AdmissionVerdict::Rejected(HaltActive);
        }
        if req.last_approved_tier == Some(req.rung.tier_id.as_str()) {
            return AdmissionVerdict::Rejected(SameTierRepeat);
        }
        // only buy below the average cost
        if req.current_price >= req.average_cost {
            return AdmissionVerdict::Rejected(BelowCostBasisViolation);
        }
        // a buy far above market would fill instantly at a bad price
        if req.rung.buy_price > req.current_price
            && exceeds_deviation(req.rung.buy_price, req.current_price, self.max_price_deviation)
        {
            return AdmissionVerdict::Rejected(PriceDeviationExceeded);
        }
        if req.drift.adjusted_buy_quantity <= 0 {
            return AdmissionVerdict::Rejected(ZeroQuantity);
        }

        AdmissionVerdict::Approved
    }

    fn evaluate_sell(&self, req: &AdmissionRequest<'_>) -> AdmissionVerdict {
        use RejectReason::*;

        if req.halt.sell_halt {
            return AdmissionVerdict::Rejected(HaltActive);
        }
        // only sell above the average cost
        if req.current_price <= req.average_cost {
            return AdmissionVerdict::Rejected(BelowCostBasisViolation);
        }
        if req.rung.sell_price < req.current_price
            && exceeds_deviation(req.rung.sell_price, req.current_price, self.max_price_deviation)
        {
            return AdmissionVerdict::Rejected(PriceDeviationExceeded);
        }
        if req.drift.adjusted_sell_quantity <= 0 {
            return AdmissionVerdict::Rejected(ZeroQuantity);
        }

        AdmissionVerdict::Approved
    }
}

impl Default for AdmissionController {
    fn default() -> Self {
        Self::new(0.10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn rung(tier: &str, buy_price: f64, sell_price: f64) -> LadderRung {
        LadderRung {
            tier_id: tier.to_string(),
            avg_price_threshold: None,
            target_quantity: 10,
            buy_price,
            buy_quantity: 5,
            sell_price,
            sell_quantity: 5,
        }
    }

    fn drift(buy: i64, sell: i64) -> DriftRecord {
        DriftRecord {
            raw_difference: 0,
            adjusted_buy_quantity: buy,
            adjusted_sell_quantity: sell,
        }
    }

    fn request<'a>(
        side: Side,
        rung: &'a LadderRung,
        drift: &'a DriftRecord,
        price: f64,
        cost: f64,
    ) -> AdmissionRequest<'a> {
        AdmissionRequest {
            side,
            rung,
            drift,
            current_price: price,
            average_cost: cost,
            last_approved_tier: None,
            halt: HaltLatch::default(),
        }
    }

    #[test]
    fn test_price_deviation() {
        assert_eq!(price_deviation(110.0, 100.0), Some(dec!(0.1)));
        assert_eq!(price_deviation(90.0, 100.0), Some(dec!(0.1)));
        assert_eq!(price_deviation(9.9, 9.0), Some(dec!(0.1)));
        assert_eq!(price_deviation(10.0, 0.0), None);
        assert_eq!(price_deviation(f64::NAN, 10.0), None);
    }

    #[test]
    fn test_exceeds_deviation_boundary() {
        assert!(!exceeds_deviation(9.9, 9.0, 0.10));
        assert!(!exceeds_deviation(8.1, 9.0, 0.10));
        assert!(!exceeds_deviation(1.1, 1.0, 0.10));
        assert!(!exceeds_deviation(0.33, 0.30, 0.10));
        assert!(exceeds_deviation(9.91, 9.0, 0.10));
        assert!(exceeds_deviation(8.09, 9.0, 0.10));
        assert!(exceeds_deviation(10.0, 0.0, 0.10));
        assert!(exceeds_deviation(f64::INFINITY, 9.0, 0.10));
    }

    #[test]
    fn test_buy_approved_below_cost() {
        let r = rung("B", 99.0, 120.0);
        let d = drift(5, 5);
        let ctrl = AdmissionController::default();
        assert_eq!(
            ctrl.evaluate(&request(Side::Buy, &r, &d, 100.0, 110.0)),
            AdmissionVerdict::Approved
        );
    }

    #[test]
    fn test_no_buy_at_or_above_cost() {
        let r = rung("B", 99.0, 120.0);
        let d = drift(5, 5);
        let ctrl = AdmissionController::default();
        for (price, cost) in [(100.0, 100.0), (100.0, 90.0), (0.5, 0.0)] {
            assert_eq!(
                ctrl.evaluate(&request(Side::Buy, &r, &d, price, cost)),
                AdmissionVerdict::Rejected(RejectReason::BelowCostBasisViolation)
            );
        }
    }

    #[test]
    fn test_price_equal_cost_rejects_both_sides() {
        let r = rung("B", 99.0, 101.0);
        let d = drift(5, 5);
        let ctrl = AdmissionController::default();
        for side in [Side::Buy, Side::Sell] {
            assert_eq!(
                ctrl.evaluate(&request(side, &r, &d, 100.0, 100.0)),
                AdmissionVerdict::Rejected(RejectReason::BelowCostBasisViolation)
            );
        }
    }

    #[test]
    fn test_halt_dominates_every_other_rule() {
        let r = rung("B", 99.0, 101.0);
        let d = drift(5, 5);
        let ctrl = AdmissionController::default();

        // inputs that would otherwise approve
        let mut buy = request(Side::Buy, &r, &d, 100.0, 110.0);
        buy.halt.buy_halt = true;
        assert_eq!(
            ctrl.evaluate(&buy),
            AdmissionVerdict::Rejected(RejectReason::HaltActive)
        );

        let mut sell = request(Side::Sell, &r, &d, 100.0, 90.0);
        sell.halt.sell_halt = true;
        assert_eq!(
            ctrl.evaluate(&sell),
            AdmissionVerdict::Rejected(RejectReason::HaltActive)
        );

        // and inputs that would fail later rules too
        let zero = drift(0, 0);
        let mut both = request(Side::Buy, &r, &zero, 100.0, 50.0);
        both.halt.buy_halt = true;
        both.last_approved_tier = Some("B");
        assert_eq!(
            ctrl.evaluate(&both),
            AdmissionVerdict::Rejected(RejectReason::HaltActive)
        );
    }

    #[test]
    fn test_opposite_halt_does_not_block() {
        let r = rung("B", 99.0, 101.0);
        let d = drift(5, 5);
        let ctrl = AdmissionController::default();
        let mut buy = request(Side::Buy, &r, &d, 100.0, 110.0);
        buy.halt.sell_halt = true;
        assert!(ctrl.evaluate(&buy).is_approved());
    }

    #[test]
    fn test_same_tier_repeat_blocks_buy_only() {
        let r = rung("B", 99.0, 101.0);
        let d = drift(5, 5);
        let ctrl = AdmissionController::default();

        let mut buy = request(Side::Buy, &r, &d, 100.0, 110.0);
        buy.last_approved_tier = Some("B");
        assert_eq!(
            ctrl.evaluate(&buy),
            AdmissionVerdict::Rejected(RejectReason::SameTierRepeat)
        );

        let mut sell = request(Side::Sell, &r, &d, 100.0, 90.0);
        sell.last_approved_tier = Some("B");
        assert!(ctrl.evaluate(&sell).is_approved());
    }

    #[test]
    fn test_exactly_ten_percent_deviation_passes() {
        let d = drift(5, 5);
        let ctrl = AdmissionController::new(0.10);

        let r = rung("B", 110.0, 90.0);
        assert!(ctrl.evaluate(&request(Side::Buy, &r, &d, 100.0, 200.0)).is_approved());
        assert!(ctrl.evaluate(&request(Side::Sell, &r, &d, 100.0, 50.0)).is_approved());

        let r = rung("B", 110.01, 89.99);
        assert_eq!(
            ctrl.evaluate(&request(Side::Buy, &r, &d, 100.0, 200.0)),
            AdmissionVerdict::Rejected(RejectReason::PriceDeviationExceeded)
        );
        assert_eq!(
            ctrl.evaluate(&request(Side::Sell, &r, &d, 100.0, 50.0)),
            AdmissionVerdict::Rejected(RejectReason::PriceDeviationExceeded)
        );
    }

    #[test]
    fn test_boundary_prices_off_a_decimal_grid_pass() {
        let d = drift(5, 5);
        let ctrl = AdmissionController::new(0.10);

        let r = rung("B", 9.9, 8.1);
        assert_eq!(
            ctrl.evaluate(&request(Side::Buy, &r, &d, 9.0, 100.0)),
            AdmissionVerdict::Approved
        );
        assert_eq!(
            ctrl.evaluate(&request(Side::Sell, &r, &d, 9.0, 1.0)),
            AdmissionVerdict::Approved
        );

        let r = rung("B", 1.1, 0.9);
        assert!(ctrl.evaluate(&request(Side::Buy, &r, &d, 1.0, 100.0)).is_approved());
        assert!(ctrl.evaluate(&request(Side::Sell, &r, &d, 1.0, 0.5)).is_approved());

        let r = rung("B", 9.91, 8.09);
        assert_eq!(
            ctrl.evaluate(&request(Side::Buy, &r, &d, 9.0, 100.0)),
            AdmissionVerdict::Rejected(RejectReason::PriceDeviationExceeded)
        );
        assert_eq!(
            ctrl.evaluate(&request(Side::Sell, &r, &d, 9.0, 1.0)),
            AdmissionVerdict::Rejected(RejectReason::PriceDeviationExceeded)
        );
    }

    #[test]
    fn test_deviation_only_counts_in_the_unfavourable_direction() {
        let d = drift(5, 5);
        let ctrl = AdmissionController::default();

        // buy far below market and sell far above market are resting orders
        let r = rung("B", 50.0, 200.0);
        assert!(ctrl.evaluate(&request(Side::Buy, &r, &d, 100.0, 150.0)).is_approved());
        assert!(ctrl.evaluate(&request(Side::Sell, &r, &d, 100.0, 50.0)).is_approved());
    }

    #[test]
    fn test_zero_quantity_rejected_last() {
        let r = rung("B", 99.0, 101.0);
        let zero = drift(0, 0);
        let ctrl = AdmissionController::default();
        assert_eq!(
            ctrl.evaluate(&request(Side::Buy, &r, &zero, 100.0, 110.0)),
            AdmissionVerdict::Rejected(RejectReason::ZeroQuantity)
        );
        assert_eq!(
            ctrl.evaluate(&request(Side::Sell, &r, &zero, 100.0, 90.0)),
            AdmissionVerdict::Rejected(RejectReason::ZeroQuantity)
        );
    }

    #[test]
    fn test_sell_rejected_at_or_below_cost() {
        let r = rung("B", 99.0, 101.0);
        let d = drift(5, 5);
        let ctrl = AdmissionController::default();
        assert_eq!(
            ctrl.evaluate(&request(Side::Sell, &r, &d, 100.0, 105.0)),
            AdmissionVerdict::Rejected(RejectReason::BelowCostBasisViolation)
        );
    }
}
