//! Core data types used across the ladder engine

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Validation errors for ladder rung rows
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RungValidationError {
    #[error("tier id must not be empty")]
    EmptyTierId,

    #[error("{field} ({value}) must be >= 0")]
    NegativeQuantity { field: &'static str, value: i64 },

    #[error("{field} ({value}) must be a finite price >= 0")]
    InvalidPrice { field: &'static str, value: f64 },
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a tier match was computed against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchBasis {
    Price,
    Quantity,
}

impl fmt::Display for MatchBasis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchBasis::Price => write!(f, "price"),
            MatchBasis::Quantity => write!(f, "quantity"),
        }
    }
}

/// One configured price/quantity level of a ladder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LadderRung {
    pub tier_id: String,
    /// Average-price level this rung is keyed on for price matching.
    /// `None` (or zero) rungs are invisible to price matching.
    #[serde(default)]
    pub avg_price_threshold: Option<f64>,
    pub target_quantity: i64,
    pub buy_price: f64,
    pub buy_quantity: i64,
    pub sell_price: f64,
    pub sell_quantity: i64,
}

impl LadderRung {
    /// Create a new rung with validation
    pub fn new(
        tier_id: impl Into<String>,
        avg_price_threshold: Option<f64>,
        target_quantity: i64,
        buy_price: f64,
        buy_quantity: i64,
        sell_price: f64,
        sell_quantity: i64,
    ) -> Result<Self, RungValidationError> {
        let rung = Self {
            tier_id: tier_id.into(),
            avg_price_threshold,
            target_quantity,
            buy_price,
            buy_quantity,
            sell_price,
            sell_quantity,
        };
        rung.validate()?;
        Ok(rung)
    }

    pub fn validate(&self) -> Result<(), RungValidationError> {
        if self.tier_id.trim().is_empty() {
            return Err(RungValidationError::EmptyTierId);
        }

        for (field, value) in [
            ("target_quantity", self.target_quantity),
            ("buy_quantity", self.buy_quantity),
            ("sell_quantity", self.sell_quantity),
        ] {
            if value < 0 {
                return Err(RungValidationError::NegativeQuantity { field, value });
            }
        }

        for (field, value) in [("buy_price", self.buy_price), ("sell_price", self.sell_price)] {
            if !value.is_finite() || value < 0.0 {
                return Err(RungValidationError::InvalidPrice { field, value });
            }
        }

        if let Some(threshold) = self.avg_price_threshold {
            if !threshold.is_finite() || threshold < 0.0 {
                return Err(RungValidationError::InvalidPrice {
                    field: "avg_price_threshold",
                    value: threshold,
                });
            }
        }

        Ok(())
    }

    /// Threshold usable for price matching (defined and non-zero)
    pub fn price_threshold(&self) -> Option<f64> {
        self.avg_price_threshold.filter(|t| *t > 0.0)
    }

    pub fn order_price(&self, side: Side) -> f64 {
        match side {
            Side::Buy => self.buy_price,
            Side::Sell => self.sell_price,
        }
    }
}

/// A rung row that failed validation, reported per row
#[derive(Debug, Clone, PartialEq)]
pub struct RungIssue {
    /// Zero-based row position in the stored sequence
    pub row: usize,
    pub tier_id: String,
    pub error: RungValidationError,
}

/// Validated, ordered ladder rungs for one cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ladder {
    rungs: Vec<LadderRung>,
}

impl Ladder {
    /// Build a ladder from stored rows, keeping the valid ones in order
    pub fn from_rows(rows: Vec<LadderRung>) -> (Self, Vec<RungIssue>) {
        let mut rungs = Vec::with_capacity(rows.len());
        let mut issues = Vec::new();

        for (row, rung) in rows.into_iter().enumerate() {
            match rung.validate() {
                Ok(()) => rungs.push(rung),
                Err(error) => issues.push(RungIssue {
                    row,
                    tier_id: rung.tier_id,
                    error,
                }),
            }
        }

        (Self { rungs }, issues)
    }

    pub fn rungs(&self) -> &[LadderRung] {
        &self.rungs
    }

    pub fn len(&self) -> usize {
        self.rungs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rungs.is_empty()
    }

    /// Whether any rung expects an empty position
    pub fn has_flat_rung(&self) -> bool {
        self.rungs.iter().any(|r| r.target_quantity == 0)
    }
}

/// Position state read fresh every cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSnapshot {
    pub actual_quantity: i64,
    /// Holdings recorded by the previous cycle
    pub last_known_quantity: i64,
    pub current_price: f64,
    pub average_cost: f64,
}

impl PositionSnapshot {
    /// Holding change since the previous cycle (fills)
    pub fn quantity_change(&self) -> i64 {
        self.actual_quantity - self.last_known_quantity
    }
}

/// Divergence between actual holdings and the matched rung
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftRecord {
    /// `actual - target`: positive = excess holding, negative = shortfall
    pub raw_difference: i64,
    pub adjusted_buy_quantity: i64,
    pub adjusted_sell_quantity: i64,
}

impl DriftRecord {
    pub fn between(rung: &LadderRung, actual_quantity: i64) -> Self {
        let raw_difference = actual_quantity - rung.target_quantity;
        Self {
            raw_difference,
            adjusted_buy_quantity: (rung.buy_quantity - raw_difference).max(0),
            adjusted_sell_quantity: (rung.sell_quantity + raw_difference).max(0),
        }
    }

    /// Drift that leaves the rung's order sizes untouched
    pub fn neutral(rung: &LadderRung) -> Self {
        Self {
            raw_difference: 0,
            adjusted_buy_quantity: rung.buy_quantity.max(0),
            adjusted_sell_quantity: rung.sell_quantity.max(0),
        }
    }

    pub fn quantity(&self, side: Side) -> i64 {
        match side {
            Side::Buy => self.adjusted_buy_quantity,
            Side::Sell => self.adjusted_sell_quantity,
        }
    }
}

/// Per-side circuit breaker persisted by the ladder store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HaltLatch {
    pub buy_halt: bool,
    pub sell_halt: bool,
}

impl HaltLatch {
    pub fn is_halted(&self, side: Side) -> bool {
        match side {
            Side::Buy => self.buy_halt,
            Side::Sell => self.sell_halt,
        }
    }

    pub fn set(&mut self, side: Side, halted: bool) {
        match side {
            Side::Buy => self.buy_halt = halted,
            Side::Sell => self.sell_halt = halted,
        }
    }
}

/// Why the engine engaged a halt latch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HaltCause {
    /// Holding more than the matched rung's buy quantity above target
    ExcessHolding,
    /// Holding less than target by more than the rung's sell quantity
    Shortfall,
    PriceDeviation,
    InsufficientFunds,
}

impl fmt::Display for HaltCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HaltCause::ExcessHolding => "holdings above ladder",
            HaltCause::Shortfall => "holdings below ladder",
            HaltCause::PriceDeviation => "order price too far from market",
            HaltCause::InsufficientFunds => "insufficient funds",
        };
        write!(f, "{}", s)
    }
}

/// Operator-owned control cells of a ladder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LadderControl {
    pub buy_enabled: bool,
    pub sell_enabled: bool,
    pub halt: HaltLatch,
    /// Tier of the most recent accepted buy
    pub last_approved_tier: Option<String>,
}

impl Default for LadderControl {
    fn default() -> Self {
        Self {
            buy_enabled: true,
            sell_enabled: true,
            halt: HaltLatch::default(),
            last_approved_tier: None,
        }
    }
}

impl LadderControl {
    pub fn is_enabled(&self, side: Side) -> bool {
        match side {
            Side::Buy => self.buy_enabled,
            Side::Sell => self.sell_enabled,
        }
    }
}

/// Telemetry written back to the store by the engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LadderTelemetry {
    /// Last observed holding change, cleared once holdings match a rung again
    pub last_drift: i64,
    pub buy_fill_count: u32,
    pub sell_fill_count: u32,
    pub last_reset_date: Option<NaiveDate>,
    pub current_tier: Option<String>,
    pub last_known_quantity: Option<i64>,
    pub last_price: Option<f64>,
}

/// Everything the engine reads from the store for one ladder cycle
#[derive(Debug, Clone, PartialEq)]
pub struct LadderSnapshot {
    pub ladder_id: String,
    pub instrument: String,
    pub average_cost: f64,
    pub ladder: Ladder,
    pub issues: Vec<RungIssue>,
    pub control: LadderControl,
    pub telemetry: LadderTelemetry,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rung(tier: &str, target: i64, buy_q: i64, sell_q: i64) -> LadderRung {
        LadderRung {
            tier_id: tier.to_string(),
            avg_price_threshold: None,
            target_quantity: target,
            buy_price: 10.0,
            buy_quantity: buy_q,
            sell_price: 12.0,
            sell_quantity: sell_q,
        }
    }

    #[test]
    fn test_rung_rejects_negative_quantity() {
        let err = LadderRung::new("A", None, 0, 10.0, -1, 12.0, 5).unwrap_err();
        assert_eq!(
            err,
            RungValidationError::NegativeQuantity {
                field: "buy_quantity",
                value: -1
            }
        );
    }

    #[test]
    fn test_rung_rejects_empty_tier() {
        assert_eq!(
            LadderRung::new("  ", None, 0, 10.0, 1, 12.0, 5).unwrap_err(),
            RungValidationError::EmptyTierId
        );
    }

    #[test]
    fn test_zero_threshold_is_not_a_price_threshold() {
        let mut r = rung("A", 0, 5, 5);
        r.avg_price_threshold = Some(0.0);
        assert_eq!(r.price_threshold(), None);
        r.avg_price_threshold = Some(9.5);
        assert_eq!(r.price_threshold(), Some(9.5));
    }

    #[test]
    fn test_ladder_reports_bad_rows_and_keeps_order() {
        let rows = vec![rung("A", 0, 5, 5), rung("B", -3, 5, 5), rung("C", 10, 5, 5)];
        let (ladder, issues) = Ladder::from_rows(rows);

        let tiers: Vec<&str> = ladder.rungs().iter().map(|r| r.tier_id.as_str()).collect();
        assert_eq!(tiers, vec!["A", "C"]);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].row, 1);
        assert_eq!(issues[0].tier_id, "B");
    }

    #[test]
    fn test_drift_adjustment_never_negative() {
        for base_buy in [0_i64, 1, 5, 50] {
            for base_sell in [0_i64, 1, 5, 50] {
                for raw in -120_i64..=120 {
                    let r = rung("X", 100, base_buy, base_sell);
                    let drift = DriftRecord::between(&r, 100 + raw);
                    assert_eq!(drift.raw_difference, raw);
                    assert!(drift.adjusted_buy_quantity >= 0);
                    assert!(drift.adjusted_sell_quantity >= 0);
                    assert_eq!(drift.adjusted_buy_quantity, (base_buy - raw).max(0));
                    assert_eq!(drift.adjusted_sell_quantity, (base_sell + raw).max(0));
                }
            }
        }
    }

    #[test]
    fn test_halt_latch_sides_are_independent() {
        let mut latch = HaltLatch::default();
        latch.set(Side::Sell, true);
        assert!(latch.is_halted(Side::Sell));
        assert!(!latch.is_halted(Side::Buy));
    }

    #[test]
    fn test_quantity_change() {
        let pos = PositionSnapshot {
            actual_quantity: 12,
            last_known_quantity: 15,
            current_price: 10.0,
            average_cost: 11.0,
        };
        assert_eq!(pos.quantity_change(), -3);
    }
}
