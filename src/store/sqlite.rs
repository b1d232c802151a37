// SQLite ladder store
//
// Persists ladder definitions, operator control cells, halt latches and
// engine telemetry. One row per ladder in `ladders`, ordered rungs in
// `rungs`.

use async_trait::async_trait;
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use super::{LadderDefinition, LadderStore, TelemetryUpdate};
use crate::error::StoreError;
use crate::types::{
    HaltLatch, Ladder, LadderControl, LadderRung, LadderSnapshot, LadderTelemetry, Side,
};

const DATE_FORMAT: &str = "%Y-%m-%d";

// =============================================================================
// Store Implementation
// =============================================================================

#[derive(Clone)]
pub struct SqliteLadderStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLadderStore {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Unavailable(format!("{}: {}", parent.display(), e))
                })?;
            }
        }

        let conn = Connection::open(db_path)?;

        // WAL lets the status command read while the loop writes
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let store = Self::from_connection(conn)?;
        info!("SQLite ladder store opened: {}", db_path.display());
        Ok(store)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.create_tables()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn create_tables(&self) -> Result<(), StoreError> {
        let conn = self.conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS ladders (
                ladder_id TEXT PRIMARY KEY,
                instrument TEXT NOT NULL,
                average_cost REAL NOT NULL DEFAULT 0,
                buy_enabled INTEGER NOT NULL DEFAULT 1,
                sell_enabled INTEGER NOT NULL DEFAULT 1,
                buy_halt INTEGER NOT NULL DEFAULT 0,
                sell_halt INTEGER NOT NULL DEFAULT 0,
                last_approved_tier TEXT,
                last_drift INTEGER NOT NULL DEFAULT 0,
                buy_fill_count INTEGER NOT NULL DEFAULT 0,
                sell_fill_count INTEGER NOT NULL DEFAULT 0,
                last_reset_date TEXT,
                current_tier TEXT,
                last_known_quantity INTEGER,
                last_price REAL,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS rungs (
                ladder_id TEXT NOT NULL REFERENCES ladders(ladder_id) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                tier_id TEXT NOT NULL,
                avg_price_threshold REAL,
                target_quantity INTEGER NOT NULL,
                buy_price REAL NOT NULL,
                buy_quantity INTEGER NOT NULL,
                sell_price REAL NOT NULL,
                sell_quantity INTEGER NOT NULL,
                PRIMARY KEY (ladder_id, position)
            )",
            [],
        )?;

        debug!("Ladder schema created/verified");
        Ok(())
    }

    /// Insert or update a ladder and replace its rungs
    ///
    /// Control cells and telemetry of an existing ladder are kept.
    pub fn save_ladder(&self, definition: &LadderDefinition) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO ladders (ladder_id, instrument, average_cost)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(ladder_id) DO UPDATE SET
                instrument = excluded.instrument,
                average_cost = excluded.average_cost,
                updated_at = CURRENT_TIMESTAMP",
            params![definition.ladder_id, definition.instrument, definition.average_cost],
        )?;

        tx.execute(
            "DELETE FROM rungs WHERE ladder_id = ?1",
            params![definition.ladder_id],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO rungs
                 (ladder_id, position, tier_id, avg_price_threshold, target_quantity,
                  buy_price, buy_quantity, sell_price, sell_quantity)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for (position, rung) in definition.rungs.iter().enumerate() {
                stmt.execute(params![
                    definition.ladder_id,
                    position as i64,
                    rung.tier_id,
                    rung.avg_price_threshold,
                    rung.target_quantity,
                    rung.buy_price,
                    rung.buy_quantity,
                    rung.sell_price,
                    rung.sell_quantity,
                ])?;
            }
        }

        tx.commit()?;

        info!(
            "Ladder saved: {} [{}] {} rungs, avg cost {:.2}",
            definition.ladder_id,
            definition.instrument,
            definition.rungs.len(),
            definition.average_cost
        );
        Ok(())
    }

    pub fn list_ladders(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT ladder_id FROM ladders ORDER BY ladder_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    pub fn set_average_cost(&self, ladder_id: &str, average_cost: f64) -> Result<(), StoreError> {
        self.update_ladder(
            ladder_id,
            "UPDATE ladders SET average_cost = ?2, updated_at = CURRENT_TIMESTAMP
             WHERE ladder_id = ?1",
            average_cost,
        )
    }

    pub fn set_enabled(&self, ladder_id: &str, side: Side, enabled: bool) -> Result<(), StoreError> {
        let sql = match side {
            Side::Buy => {
                "UPDATE ladders SET buy_enabled = ?2, updated_at = CURRENT_TIMESTAMP
                 WHERE ladder_id = ?1"
            }
            Side::Sell => {
                "UPDATE ladders SET sell_enabled = ?2, updated_at = CURRENT_TIMESTAMP
                 WHERE ladder_id = ?1"
            }
        };
        self.update_ladder(ladder_id, sql, enabled)
    }

    fn update_ladder<V: rusqlite::ToSql>(
        &self,
        ladder_id: &str,
        sql: &str,
        value: V,
    ) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(sql, params![ladder_id, value])?;
        if changed == 0 {
            return Err(StoreError::LadderNotFound(ladder_id.to_string()));
        }
        Ok(())
    }

    fn read_snapshot(&self, ladder_id: &str) -> Result<LadderSnapshot, StoreError> {
        let conn = self.conn()?;

        let header = conn
            .query_row(
                "SELECT instrument, average_cost, buy_enabled, sell_enabled, buy_halt,
                        sell_halt, last_approved_tier, last_drift, buy_fill_count,
                        sell_fill_count, last_reset_date, current_tier,
                        last_known_quantity, last_price
                 FROM ladders WHERE ladder_id = ?1",
                params![ladder_id],
                LadderHeader::from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::LadderNotFound(ladder_id.to_string()))?;

        let mut stmt = conn.prepare(
            "SELECT tier_id, avg_price_threshold, target_quantity, buy_price,
                    buy_quantity, sell_price, sell_quantity
             FROM rungs WHERE ladder_id = ?1 ORDER BY position",
        )?;
        let rows = stmt
            .query_map(params![ladder_id], |row| {
                Ok(LadderRung {
                    tier_id: row.get(0)?,
                    avg_price_threshold: row.get(1)?,
                    target_quantity: row.get(2)?,
                    buy_price: row.get(3)?,
                    buy_quantity: row.get(4)?,
                    sell_price: row.get(5)?,
                    sell_quantity: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let (ladder, issues) = Ladder::from_rows(rows);
        let (instrument, average_cost, control, telemetry) = header.into_parts()?;

        debug!(
            "Loaded ladder {}: {} rungs ({} invalid)",
            ladder_id,
            ladder.len(),
            issues.len()
        );

        Ok(LadderSnapshot {
            ladder_id: ladder_id.to_string(),
            instrument,
            average_cost,
            ladder,
            issues,
            control,
            telemetry,
        })
    }
}

// =============================================================================
// Row Mapping
// =============================================================================

struct LadderHeader {
    instrument: String,
    average_cost: f64,
    buy_enabled: bool,
    sell_enabled: bool,
    buy_halt: bool,
    sell_halt: bool,
    last_approved_tier: Option<String>,
    last_drift: i64,
    buy_fill_count: i64,
    sell_fill_count: i64,
    last_reset_date: Option<String>,
    current_tier: Option<String>,
    last_known_quantity: Option<i64>,
    last_price: Option<f64>,
}

impl LadderHeader {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            instrument: row.get(0)?,
            average_cost: row.get(1)?,
            buy_enabled: row.get::<_, i64>(2)? != 0,
            sell_enabled: row.get::<_, i64>(3)? != 0,
            buy_halt: row.get::<_, i64>(4)? != 0,
            sell_halt: row.get::<_, i64>(5)? != 0,
            last_approved_tier: row.get(6)?,
            last_drift: row.get(7)?,
            buy_fill_count: row.get(8)?,
            sell_fill_count: row.get(9)?,
            last_reset_date: row.get(10)?,
            current_tier: row.get(11)?,
            last_known_quantity: row.get(12)?,
            last_price: row.get(13)?,
        })
    }

    fn into_parts(self) -> Result<(String, f64, LadderControl, LadderTelemetry), StoreError> {
        let last_reset_date = self
            .last_reset_date
            .map(|d| {
                NaiveDate::parse_from_str(&d, DATE_FORMAT).map_err(|_| StoreError::InvalidValue {
                    field: "last_reset_date",
                    value: d.clone(),
                })
            })
            .transpose()?;

        let control = LadderControl {
            buy_enabled: self.buy_enabled,
            sell_enabled: self.sell_enabled,
            halt: HaltLatch {
                buy_halt: self.buy_halt,
                sell_halt: self.sell_halt,
            },
            last_approved_tier: self.last_approved_tier,
        };

        let telemetry = LadderTelemetry {
            last_drift: self.last_drift,
            buy_fill_count: count("buy_fill_count", self.buy_fill_count)?,
            sell_fill_count: count("sell_fill_count", self.sell_fill_count)?,
            last_reset_date,
            current_tier: self.current_tier,
            last_known_quantity: self.last_known_quantity,
            last_price: self.last_price,
        };

        Ok((self.instrument, self.average_cost, control, telemetry))
    }
}

fn count(field: &'static str, value: i64) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::InvalidValue {
        field,
        value: value.to_string(),
    })
}

// =============================================================================
// LadderStore Implementation
// =============================================================================

#[async_trait]
impl LadderStore for SqliteLadderStore {
    async fn load_snapshot(&self, ladder_id: &str) -> Result<LadderSnapshot, StoreError> {
        self.read_snapshot(ladder_id)
    }

    async fn set_halt(&self, ladder_id: &str, side: Side, halted: bool) -> Result<(), StoreError> {
        let sql = match side {
            Side::Buy => {
                "UPDATE ladders SET buy_halt = ?2, updated_at = CURRENT_TIMESTAMP
                 WHERE ladder_id = ?1"
            }
            Side::Sell => {
                "UPDATE ladders SET sell_halt = ?2, updated_at = CURRENT_TIMESTAMP
                 WHERE ladder_id = ?1"
            }
        };
        self.update_ladder(ladder_id, sql, halted)?;
        info!("Ladder {}: {} halt set to {}", ladder_id, side, halted);
        Ok(())
    }

    async fn set_last_approved_tier(
        &self,
        ladder_id: &str,
        tier_id: Option<&str>,
    ) -> Result<(), StoreError> {
        self.update_ladder(
            ladder_id,
            "UPDATE ladders SET last_approved_tier = ?2, updated_at = CURRENT_TIMESTAMP
             WHERE ladder_id = ?1",
            tier_id,
        )
    }

    async fn write_telemetry(
        &self,
        ladder_id: &str,
        update: &TelemetryUpdate,
    ) -> Result<(), StoreError> {
        if update.is_empty() {
            return Ok(());
        }

        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE ladders SET
                last_drift = COALESCE(?2, last_drift),
                buy_fill_count = COALESCE(?3, buy_fill_count),
                sell_fill_count = COALESCE(?4, sell_fill_count),
                last_reset_date = COALESCE(?5, last_reset_date),
                current_tier = COALESCE(?6, current_tier),
                last_known_quantity = COALESCE(?7, last_known_quantity),
                last_price = COALESCE(?8, last_price),
                updated_at = CURRENT_TIMESTAMP
             WHERE ladder_id = ?1",
            params![
                ladder_id,
                update.last_drift,
                update.buy_fill_count,
                update.sell_fill_count,
                update
                    .last_reset_date
                    .map(|d| d.format(DATE_FORMAT).to_string()),
                update.current_tier,
                update.last_known_quantity,
                update.last_price,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::LadderNotFound(ladder_id.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rung(tier: &str, target: i64) -> LadderRung {
        LadderRung {
            tier_id: tier.to_string(),
            avg_price_threshold: Some(100.0 - target as f64),
            target_quantity: target,
            buy_price: 95.0,
            buy_quantity: 5,
            sell_price: 105.0,
            sell_quantity: 5,
        }
    }

    fn definition() -> LadderDefinition {
        LadderDefinition {
            ladder_id: "L1".to_string(),
            instrument: "ACME".to_string(),
            average_cost: 101.5,
            rungs: vec![rung("A", 0), rung("B", 10), rung("C", 20)],
        }
    }

    #[tokio::test]
    async fn test_save_and_load_keeps_rung_order() {
        let store = SqliteLadderStore::in_memory().unwrap();
        store.save_ladder(&definition()).unwrap();

        let snapshot = store.load_snapshot("L1").await.unwrap();
        assert_eq!(snapshot.instrument, "ACME");
        assert_eq!(snapshot.average_cost, 101.5);
        let tiers: Vec<&str> = snapshot
            .ladder
            .rungs()
            .iter()
            .map(|r| r.tier_id.as_str())
            .collect();
        assert_eq!(tiers, vec!["A", "B", "C"]);
        assert_eq!(snapshot.ladder.rungs()[1].avg_price_threshold, Some(90.0));
        assert!(snapshot.control.buy_enabled && snapshot.control.sell_enabled);
        assert_eq!(snapshot.telemetry, LadderTelemetry::default());
    }

    #[tokio::test]
    async fn test_invalid_rows_surface_as_issues() {
        let store = SqliteLadderStore::in_memory().unwrap();
        let mut def = definition();
        def.rungs[2].sell_quantity = -1;
        store.save_ladder(&def).unwrap();

        let snapshot = store.load_snapshot("L1").await.unwrap();
        assert_eq!(snapshot.ladder.len(), 2);
        assert_eq!(snapshot.issues.len(), 1);
        assert_eq!(snapshot.issues[0].row, 2);
    }

    #[tokio::test]
    async fn test_halt_and_tier_persist_across_reimport() {
        let store = SqliteLadderStore::in_memory().unwrap();
        store.save_ladder(&definition()).unwrap();
        store.set_halt("L1", Side::Sell, true).await.unwrap();
        store.set_last_approved_tier("L1", Some("B")).await.unwrap();

        let mut def = definition();
        def.rungs.truncate(2);
        store.save_ladder(&def).unwrap();

        let snapshot = store.load_snapshot("L1").await.unwrap();
        assert_eq!(snapshot.ladder.len(), 2);
        assert!(snapshot.control.halt.sell_halt);
        assert!(!snapshot.control.halt.buy_halt);
        assert_eq!(snapshot.control.last_approved_tier.as_deref(), Some("B"));

        store.set_halt("L1", Side::Sell, false).await.unwrap();
        let snapshot = store.load_snapshot("L1").await.unwrap();
        assert!(!snapshot.control.halt.sell_halt);
    }

    #[tokio::test]
    async fn test_partial_telemetry_writes() {
        let store = SqliteLadderStore::in_memory().unwrap();
        store.save_ladder(&definition()).unwrap();

        let date = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        store
            .write_telemetry(
                "L1",
                &TelemetryUpdate {
                    last_drift: Some(3),
                    buy_fill_count: Some(2),
                    current_tier: Some("B".to_string()),
                    last_known_quantity: Some(13),
                    last_price: Some(97.25),
                    last_reset_date: Some(date),
                    ..TelemetryUpdate::default()
                },
            )
            .await
            .unwrap();
        store
            .write_telemetry(
                "L1",
                &TelemetryUpdate {
                    last_price: Some(98.0),
                    ..TelemetryUpdate::default()
                },
            )
            .await
            .unwrap();

        let t = store.load_snapshot("L1").await.unwrap().telemetry;
        assert_eq!(t.last_drift, 3);
        assert_eq!(t.buy_fill_count, 2);
        assert_eq!(t.sell_fill_count, 0);
        assert_eq!(t.current_tier.as_deref(), Some("B"));
        assert_eq!(t.last_known_quantity, Some(13));
        assert_eq!(t.last_price, Some(98.0));
        assert_eq!(t.last_reset_date, Some(date));
    }

    #[tokio::test]
    async fn test_unknown_ladder() {
        let store = SqliteLadderStore::in_memory().unwrap();
        assert!(matches!(
            store.load_snapshot("missing").await,
            Err(StoreError::LadderNotFound(_))
        ));
        assert!(matches!(
            store.set_halt("missing", Side::Buy, true).await,
            Err(StoreError::LadderNotFound(_))
        ));
    }

    #[test]
    fn test_operator_updates() {
        let store = SqliteLadderStore::in_memory().unwrap();
        store.save_ladder(&definition()).unwrap();
        store.set_enabled("L1", Side::Buy, false).unwrap();
        store.set_average_cost("L1", 99.0).unwrap();
        assert_eq!(store.list_ladders().unwrap(), vec!["L1".to_string()]);

        let snapshot = store.read_snapshot("L1").unwrap();
        assert!(!snapshot.control.buy_enabled);
        assert!(snapshot.control.sell_enabled);
        assert_eq!(snapshot.average_cost, 99.0);
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let dir = std::env::temp_dir().join(format!("grid_ladder_store_{}", std::process::id()));
        let path = dir.join("nested").join("ladders.db");
        let store = SqliteLadderStore::open(&path).unwrap();
        store.save_ladder(&definition()).unwrap();
        assert!(path.exists());
        drop(store);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
