//! Checkpoint store commands: history, prune and stats.

use anyhow::Result;
use chrono::Utc;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use uuid::Uuid;

use crate::state::AppState;

pub async fn show_history(
    state: &AppState,
    plan_id: Uuid,
    unit: Option<&str>,
    json: bool,
) -> Result<()> {
    let mut history = state.checkpoints().history(plan_id).await?;
    if let Some(unit) = unit {
        history.retain(|cp| cp.unit_id == unit);
    }
    history.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.seq.cmp(&b.seq)));

    if json {
        println!("{}", serde_json::to_string_pretty(&history)?);
        return Ok(());
    }

    if history.is_empty() {
        println!();
        println!("  No checkpoints for plan {plan_id}.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Time").fg(Color::Cyan),
            Cell::new("Unit"),
            Cell::new("Seq"),
            Cell::new("State"),
            Cell::new("Attempt"),
            Cell::new("Artifacts"),
            Cell::new("Reason"),
        ]);

    for cp in &history {
        table.add_row(vec![
            Cell::new(cp.timestamp.format("%H:%M:%S%.3f")),
            Cell::new(&cp.unit_id),
            Cell::new(cp.seq),
            Cell::new(cp.state),
            Cell::new(cp.attempt),
            Cell::new(cp.artifact_refs.len()),
            Cell::new(cp.reason.as_deref().unwrap_or("")),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

pub async fn prune(state: &AppState, json: bool) -> Result<()> {
    let policy = state.settings.retention;
    let removed = state.checkpoints().prune(&policy, Utc::now()).await?;
    let compacted = if removed > 0 { state.pool.compact().await? } else { 0 };
    tracing::debug!(removed, compacted, "checkpoint retention applied");

    if json {
        let out = serde_json::json!({
            "removed": removed,
            "max_age_days": policy.max_age_days,
            "max_count": policy.max_count,
            "wal_frames_compacted": compacted,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!();
        println!(
            "  {} Pruned {} checkpoint(s) (older than {} days, beyond {} per unit)",
            style("*").green().bold(),
            removed,
            policy.max_age_days,
            policy.max_count
        );
        println!();
    }
    Ok(())
}

pub async fn show_stats(state: &AppState, json: bool) -> Result<()> {
    let stats = state.checkpoints().stats().await?;

    if json {
        let out = serde_json::json!({
            "plans": stats.plans,
            "checkpoints": stats.checkpoints,
            "raw_bytes": stats.raw_bytes,
            "stored_bytes": stats.stored_bytes,
            "compression_ratio": stats.compression_ratio(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("  Data dir:    {}", style(state.data_dir.display()).dim());
    println!("  Plans:       {}", stats.plans);
    println!("  Checkpoints: {}", stats.checkpoints);
    println!(
        "  Storage:     {} bytes ({} uncompressed, ratio {:.2})",
        stats.stored_bytes,
        stats.raw_bytes,
        stats.compression_ratio()
    );
    println!();
    Ok(())
}
