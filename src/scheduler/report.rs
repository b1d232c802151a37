//! Per-cycle result of a ladder reconciliation

use std::fmt;

use crate::oms::RejectReason;
use crate::types::{DriftRecord, Side};

/// What happened to one side of the ladder this cycle
#[derive(Debug, Clone, PartialEq)]
pub enum SideStatus {
    /// Not evaluated (an open order is still working)
    Skipped,
    /// Disabled by the operator
    Disabled,
    Rejected(RejectReason),
    Submitted { price: f64, quantity: i64 },
    InsufficientFunds,
    Failed(String),
}

impl SideStatus {
    pub fn is_submitted(&self) -> bool {
        matches!(self, SideStatus::Submitted { .. })
    }
}

impl fmt::Display for SideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SideStatus::Skipped => write!(f, "skipped"),
            SideStatus::Disabled => write!(f, "disabled"),
            SideStatus::Rejected(reason) => write!(f, "rejected ({})", reason),
            SideStatus::Submitted { price, quantity } => {
                write!(f, "submitted {} @ {:.2}", quantity, price)
            }
            SideStatus::InsufficientFunds => write!(f, "insufficient funds"),
            SideStatus::Failed(reason) => write!(f, "failed ({})", reason),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CycleOutcome {
    /// Both sides went through admission
    Evaluated,
    /// An open order at a current target is still working
    Waiting { open_price: f64, side: Side },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub ladder_id: String,
    pub instrument: String,
    pub tier_id: String,
    pub actual_quantity: i64,
    pub target_quantity: i64,
    pub current_price: f64,
    pub average_cost: f64,
    /// Holding change detected since the previous cycle
    pub fill_change: i64,
    pub drift: DriftRecord,
    pub buy_price: f64,
    pub sell_price: f64,
    pub outcome: CycleOutcome,
    pub buy: SideStatus,
    pub sell: SideStatus,
}

impl CycleReport {
    pub fn status(&self, side: Side) -> &SideStatus {
        match side {
            Side::Buy => &self.buy,
            Side::Sell => &self.sell,
        }
    }

    pub fn submitted_count(&self) -> usize {
        [&self.buy, &self.sell]
            .iter()
            .filter(|s| s.is_submitted())
            .count()
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[{}] {} tier {}", self.ladder_id, self.instrument, self.tier_id)?;
        writeln!(
            f,
            "holding {} / target {} (drift {:+})",
            self.actual_quantity, self.target_quantity, self.drift.raw_difference
        )?;
        writeln!(
            f,
            "price {:.2} / avg cost {:.2}",
            self.current_price, self.average_cost
        )?;
        if let CycleOutcome::Waiting { open_price, side } = self.outcome {
            return write!(f, "waiting on open {} order @ {:.2}", side, open_price);
        }
        writeln!(
            f,
            "buy {} @ {:.2}: {}",
            self.drift.adjusted_buy_quantity, self.buy_price, self.buy
        )?;
        write!(
            f,
            "sell {} @ {:.2}: {}",
            self.drift.adjusted_sell_quantity, self.sell_price, self.sell
        )
    }
}
