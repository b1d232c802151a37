//! Ladder store
//!
//! Source of rungs and operator control cells, sink for telemetry and halt
//! latches. Writes are last-write-wins; repeating one is harmless.

pub mod import;
pub mod memory;
pub mod sqlite;

pub use import::{read_rungs_csv, read_rungs_from_reader};
pub use memory::MemoryLadderStore;
pub use sqlite::SqliteLadderStore;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::StoreError;
use crate::types::{LadderRung, LadderSnapshot, LadderTelemetry, Side};

/// Partial telemetry write; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetryUpdate {
    pub last_drift: Option<i64>,
    pub buy_fill_count: Option<u32>,
    pub sell_fill_count: Option<u32>,
    pub last_reset_date: Option<NaiveDate>,
    pub current_tier: Option<String>,
    pub last_known_quantity: Option<i64>,
    pub last_price: Option<f64>,
}

impl TelemetryUpdate {
    /// Zeroed counters stamped with the reset date
    pub fn daily_reset(date: NaiveDate) -> Self {
        Self {
            last_drift: Some(0),
            buy_fill_count: Some(0),
            sell_fill_count: Some(0),
            last_reset_date: Some(date),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply_to(&self, telemetry: &mut LadderTelemetry) {
        if let Some(v) = self.last_drift {
            telemetry.last_drift = v;
        }
        if let Some(v) = self.buy_fill_count {
            telemetry.buy_fill_count = v;
        }
        if let Some(v) = self.sell_fill_count {
            telemetry.sell_fill_count = v;
        }
        if let Some(v) = self.last_reset_date {
            telemetry.last_reset_date = Some(v);
        }
        if let Some(v) = &self.current_tier {
            telemetry.current_tier = Some(v.clone());
        }
        if let Some(v) = self.last_known_quantity {
            telemetry.last_known_quantity = Some(v);
        }
        if let Some(v) = self.last_price {
            telemetry.last_price = Some(v);
        }
    }
}

/// A ladder as written by the import tooling
#[derive(Debug, Clone, PartialEq)]
pub struct LadderDefinition {
    pub ladder_id: String,
    pub instrument: String,
    pub average_cost: f64,
    /// Stored as given; validation happens when a snapshot is loaded
    pub rungs: Vec<LadderRung>,
}

#[async_trait]
pub trait LadderStore: Send + Sync {
    async fn load_snapshot(&self, ladder_id: &str) -> Result<LadderSnapshot, StoreError>;

    async fn set_halt(&self, ladder_id: &str, side: Side, halted: bool) -> Result<(), StoreError>;

    async fn set_last_approved_tier(
        &self,
        ladder_id: &str,
        tier_id: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn write_telemetry(
        &self,
        ladder_id: &str,
        update: &TelemetryUpdate,
    ) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daily_reset_update() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        let mut telemetry = LadderTelemetry {
            last_drift: 4,
            buy_fill_count: 3,
            sell_fill_count: 1,
            current_tier: Some("B".to_string()),
            ..LadderTelemetry::default()
        };
        TelemetryUpdate::daily_reset(date).apply_to(&mut telemetry);
        assert_eq!(telemetry.last_drift, 0);
        assert_eq!(telemetry.buy_fill_count, 0);
        assert_eq!(telemetry.sell_fill_count, 0);
        assert_eq!(telemetry.last_reset_date, Some(date));
        // untouched
        assert_eq!(telemetry.current_tier.as_deref(), Some("B"));
    }

    #[test]
    fn test_empty_update() {
        assert!(TelemetryUpdate::default().is_empty());
        let update = TelemetryUpdate {
            last_price: Some(1.0),
            ..TelemetryUpdate::default()
        };
        assert!(!update.is_empty());
    }
}
