//! In-memory ladder store, used by tests and dry runs

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::{LadderDefinition, LadderStore, TelemetryUpdate};
use crate::error::StoreError;
use crate::types::{Ladder, LadderControl, LadderRung, LadderSnapshot, LadderTelemetry, Side};

#[derive(Debug, Clone)]
struct StoredLadder {
    instrument: String,
    average_cost: f64,
    rows: Vec<LadderRung>,
    control: LadderControl,
    telemetry: LadderTelemetry,
}

#[derive(Default)]
pub struct MemoryLadderStore {
    ladders: Mutex<HashMap<String, StoredLadder>>,
    unavailable: AtomicBool,
}

impl MemoryLadderStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn ladders(&self) -> Result<MutexGuard<'_, HashMap<String, StoredLadder>>, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        self.ladders.lock().map_err(|_| StoreError::Poisoned)
    }

    fn with_ladder<T>(
        &self,
        ladder_id: &str,
        f: impl FnOnce(&mut StoredLadder) -> T,
    ) -> Result<T, StoreError> {
        let mut ladders = self.ladders()?;
        let ladder = ladders
            .get_mut(ladder_id)
            .ok_or_else(|| StoreError::LadderNotFound(ladder_id.to_string()))?;
        Ok(f(ladder))
    }

    /// Insert or replace a ladder definition, keeping existing control and telemetry
    pub fn save_ladder(&self, definition: LadderDefinition) -> Result<(), StoreError> {
        let mut ladders = self.ladders()?;
        let entry = ladders
            .entry(definition.ladder_id)
            .or_insert_with(|| StoredLadder {
                instrument: String::new(),
                average_cost: 0.0,
                rows: Vec::new(),
                control: LadderControl::default(),
                telemetry: LadderTelemetry::default(),
            });
        entry.instrument = definition.instrument;
        entry.average_cost = definition.average_cost;
        entry.rows = definition.rungs;
        Ok(())
    }

    pub fn set_average_cost(&self, ladder_id: &str, average_cost: f64) -> Result<(), StoreError> {
        self.with_ladder(ladder_id, |l| l.average_cost = average_cost)
    }

    pub fn set_enabled(&self, ladder_id: &str, side: Side, enabled: bool) -> Result<(), StoreError> {
        self.with_ladder(ladder_id, |l| match side {
            Side::Buy => l.control.buy_enabled = enabled,
            Side::Sell => l.control.sell_enabled = enabled,
        })
    }

    pub fn control(&self, ladder_id: &str) -> Result<LadderControl, StoreError> {
        self.with_ladder(ladder_id, |l| l.control.clone())
    }

    pub fn telemetry(&self, ladder_id: &str) -> Result<LadderTelemetry, StoreError> {
        self.with_ladder(ladder_id, |l| l.telemetry.clone())
    }

    /// Simulate the backing store going away
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl LadderStore for MemoryLadderStore {
    async fn load_snapshot(&self, ladder_id: &str) -> Result<LadderSnapshot, StoreError> {
        let stored = self.with_ladder(ladder_id, |l| l.clone())?;
        let (ladder, issues) = Ladder::from_rows(stored.rows);
        Ok(LadderSnapshot {
            ladder_id: ladder_id.to_string(),
            instrument: stored.instrument,
            average_cost: stored.average_cost,
            ladder,
            issues,
            control: stored.control,
            telemetry: stored.telemetry,
        })
    }

    async fn set_halt(&self, ladder_id: &str, side: Side, halted: bool) -> Result<(), StoreError> {
        self.with_ladder(ladder_id, |l| l.control.halt.set(side, halted))
    }

    async fn set_last_approved_tier(
        &self,
        ladder_id: &str,
        tier_id: Option<&str>,
    ) -> Result<(), StoreError> {
        let tier = tier_id.map(str::to_string);
        self.with_ladder(ladder_id, |l| l.control.last_approved_tier = tier)
    }

    async fn write_telemetry(
        &self,
        ladder_id: &str,
        update: &TelemetryUpdate,
    ) -> Result<(), StoreError> {
        self.with_ladder(ladder_id, |l| update.apply_to(&mut l.telemetry))
    }
}
