//! Status command

use anyhow::Result;

use grid_ladder::store::{LadderStore, SqliteLadderStore};
use grid_ladder::LadderSnapshot;

use super::{load_config, maintenance_runtime};

pub fn run(config_path: String, ladder_id: Option<String>) -> Result<()> {
    let config = load_config(&config_path)?;
    let store = SqliteLadderStore::open(&config.store.path)?;

    let ladder_ids = match ladder_id {
        Some(id) => vec![id],
        None => store.list_ladders()?,
    };
    if ladder_ids.is_empty() {
        println!("No ladders in {}", config.store.path.display());
        return Ok(());
    }

    let runtime = maintenance_runtime()?;
    for id in ladder_ids {
        let snapshot = runtime.block_on(store.load_snapshot(&id))?;
        print_snapshot(&snapshot);
    }
    Ok(())
}

fn print_snapshot(snapshot: &LadderSnapshot) {
    let control = &snapshot.control;
    let telemetry = &snapshot.telemetry;

    println!("\n{}", "=".repeat(60));
    println!("LADDER {} ({})", snapshot.ladder_id, snapshot.instrument);
    println!("{}", "=".repeat(60));
    println!("Average Cost:       {:.2}", snapshot.average_cost);
    println!(
        "Buy:                {}{}",
        if control.buy_enabled { "enabled" } else { "disabled" },
        if control.halt.buy_halt { ", HALTED" } else { "" }
    );
    println!(
        "Sell:               {}{}",
        if control.sell_enabled { "enabled" } else { "disabled" },
        if control.halt.sell_halt { ", HALTED" } else { "" }
    );
    println!(
        "Last Approved Tier: {}",
        control.last_approved_tier.as_deref().unwrap_or("-")
    );
    println!("Current Tier:       {}", telemetry.current_tier.as_deref().unwrap_or("-"));
    println!(
        "Last Known Qty:     {}",
        telemetry
            .last_known_quantity
            .map(|q| q.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    println!("Last Drift:         {:+}", telemetry.last_drift);
    println!(
        "Fills Today:        {} buy / {} sell",
        telemetry.buy_fill_count, telemetry.sell_fill_count
    );
    if let Some(date) = telemetry.last_reset_date {
        println!("Last Reset:         {}", date);
    }

    println!("\n{:<8} {:>10} {:>8} {:>10} {:>8} {:>10} {:>8}", "Tier", "Threshold", "Target", "Buy", "BuyQty", "Sell", "SellQty");
    for rung in snapshot.ladder.rungs() {
        let threshold = rung
            .price_threshold()
            .map(|t| format!("{:.2}", t))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<8} {:>10} {:>8} {:>10.2} {:>8} {:>10.2} {:>8}",
            rung.tier_id,
            threshold,
            rung.target_quantity,
            rung.buy_price,
            rung.buy_quantity,
            rung.sell_price,
            rung.sell_quantity
        );
    }
    for issue in &snapshot.issues {
        println!("  row {} ({}) ignored: {}", issue.row, issue.tier_id, issue.error);
    }
}
