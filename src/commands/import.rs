//! Import command

use anyhow::{Context, Result};
use tracing::{info, warn};

use grid_ladder::store::{read_rungs_csv, LadderDefinition, SqliteLadderStore};
use grid_ladder::Ladder;

use super::load_config;

pub fn run(
    config_path: String,
    ladder_id: String,
    instrument: String,
    average_cost: f64,
    csv_path: String,
) -> Result<()> {
    if !(average_cost.is_finite() && average_cost >= 0.0) {
        anyhow::bail!("Average cost must be a non-negative number, got {}", average_cost);
    }

    let config = load_config(&config_path)?;

    let rungs = read_rungs_csv(&csv_path).context(format!("Failed to read {}", csv_path))?;
    info!("Read {} rungs from {}", rungs.len(), csv_path);

    let (ladder, issues) = Ladder::from_rows(rungs.clone());
    for issue in &issues {
        warn!("Row {} ({}) will be ignored: {}", issue.row, issue.tier_id, issue.error);
    }
    if ladder.is_empty() {
        anyhow::bail!("{} contains no valid rungs", csv_path);
    }

    let store = SqliteLadderStore::open(&config.store.path).context(format!(
        "Failed to open state database {}",
        config.store.path.display()
    ))?;
    store.save_ladder(&LadderDefinition {
        ladder_id: ladder_id.clone(),
        instrument: instrument.clone(),
        average_cost,
        rungs,
    })?;

    println!(
        "Imported ladder {} ({}) with {} rungs, {} ignored",
        ladder_id,
        instrument,
        ladder.len(),
        issues.len()
    );
    Ok(())
}
