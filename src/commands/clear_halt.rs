//! Clear-halt command
//!
//! Halts only ever latch inside the engine; releasing one is an operator
//! decision made here.

use anyhow::Result;
use tracing::info;

use grid_ladder::store::{LadderStore, SqliteLadderStore};
use grid_ladder::Side;

use super::{load_config, maintenance_runtime};
use crate::HaltSide;

pub fn run(config_path: String, ladder_id: String, side: HaltSide) -> Result<()> {
    let config = load_config(&config_path)?;
    let store = SqliteLadderStore::open(&config.store.path)?;

    let sides: &[Side] = match side {
        HaltSide::Buy => &[Side::Buy],
        HaltSide::Sell => &[Side::Sell],
        HaltSide::Both => &[Side::Buy, Side::Sell],
    };

    let runtime = maintenance_runtime()?;
    runtime.block_on(async {
        let before = store.load_snapshot(&ladder_id).await?.control.halt;
        for &side in sides {
            store.set_halt(&ladder_id, side, false).await?;
            if before.is_halted(side) {
                info!("Cleared {} halt on ladder {}", side, ladder_id);
            }
        }
        anyhow::Ok(())
    })?;

    println!("Halt cleared on ladder {} ({:?})", ladder_id, side);
    Ok(())
}
