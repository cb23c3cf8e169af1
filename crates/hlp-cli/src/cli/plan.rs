//! Plan lifecycle commands: run, resume, status, rollback, validate and list.

use std::path::Path;

use anyhow::{Result, anyhow, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use hlp_core::circuit_breaker::CircuitStats;
use hlp_core::dag::PlanGraph;
use hlp_core::definition::{load_plan_file, normalize_plan};
use hlp_core::event::PlanSubscription;
use hlp_core::executor::PlanStatusReport;
use hlp_types::event::ExecutorEvent;
use hlp_types::rollback::{RollbackGranularity, RollbackReport};
use hlp_types::state::{PlanStatus, UnitState};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::state::AppState;

// ---------------------------------------------------------------------------
// Run / resume
// ---------------------------------------------------------------------------

pub async fn run_plan(
    state: &AppState,
    file: &Path,
    trip: &[String],
    json: bool,
    quiet: bool,
) -> Result<()> {
    let plan = load_plan_file(file).map_err(|e| anyhow!("Failed to load plan: {e}"))?;
    let name = plan.name.clone();
    for resource in trip {
        tracing::info!(resource = %resource, "circuit opened by operator");
        state.executor.breakers().trip(resource);
    }
    let progress = state.executor.subscribe_plan(plan.id);
    let plan_id = state.executor.submit(plan).await?;

    let mut printer = None;
    if !json && !quiet {
        println!();
        println!(
            "  {} Submitted plan '{}'",
            style("*").green().bold(),
            style(&name).cyan()
        );
        println!("  ID: {plan_id}");
        println!();
        printer = Some(tokio::spawn(print_progress(progress)));
    }

    let report = wait_or_cancel(state, plan_id).await;
    join_printer(printer, report.is_ok()).await;
    let outcome = finish(&report?, json, quiet);
    if !json && !quiet {
        print_circuits(&state.executor.breakers().snapshot());
    }
    outcome
}

pub async fn resume_plan(state: &AppState, plan_id: Uuid, json: bool, quiet: bool) -> Result<()> {
    let progress = state.executor.subscribe_plan(plan_id);
    state.executor.resume(plan_id).await?;

    let mut printer = None;
    if !json && !quiet {
        println!();
        println!("  {} Resuming plan {plan_id}", style("*").green().bold());
        println!();
        printer = Some(tokio::spawn(print_progress(progress)));
    }

    let report = wait_or_cancel(state, plan_id).await;
    join_printer(printer, report.is_ok()).await;
    let outcome = finish(&report?, json, quiet);
    if !json && !quiet {
        print_circuits(&state.executor.breakers().snapshot());
    }
    outcome
}

/// Print settled unit states and scheduled retries as they happen.
async fn print_progress(mut progress: PlanSubscription) {
    while let Some(event) = progress.next().await {
        match event {
            ExecutorEvent::UnitTransitioned { unit_id, to, attempt, .. } => {
                let marker = match to {
                    UnitState::Completed => style("+").green().bold(),
                    UnitState::Failed => style("x").red().bold(),
                    UnitState::RolledBack => style("<").yellow().bold(),
                    UnitState::Aborted => style("-").dim(),
                    _ => continue,
                };
                println!("  {marker} {unit_id} {to} (attempt {attempt})");
            }
            ExecutorEvent::RetryScheduled {
                unit_id, delay_ms, ..
            } => {
                println!("  {} {unit_id} retry in {delay_ms}ms", style("~").yellow());
            }
            _ => {}
        }
    }
}

/// The printer ends on the plan's last event; without a report that event
/// may never come.
async fn join_printer(printer: Option<JoinHandle<()>>, finished: bool) {
    let Some(printer) = printer else {
        return;
    };
    if finished {
        let _ = printer.await;
    } else {
        printer.abort();
    }
}

/// Wait for the plan; Ctrl+C cancels it and waits for in-flight units.
async fn wait_or_cancel(state: &AppState, plan_id: Uuid) -> Result<PlanStatusReport> {
    tokio::select! {
        report = state.executor.wait(plan_id) => Ok(report?),
        _ = tokio::signal::ctrl_c() => {
            eprintln!("  {} Cancelling, waiting for running units...", style("!").yellow().bold());
            state.executor.cancel(plan_id).await?;
            Ok(state.executor.wait(plan_id).await?)
        }
    }
}

fn finish(report: &PlanStatusReport, json: bool, quiet: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else if !quiet {
        print_report(report);
    }
    if report.status != PlanStatus::Completed {
        bail!("plan {} finished {}", report.plan_id, report.status);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

pub async fn show_status(state: &AppState, plan_id: Uuid, json: bool) -> Result<()> {
    let report = state.executor.status(plan_id).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &PlanStatusReport) {
    println!();
    println!(
        "  Plan '{}' {}",
        style(&report.name).cyan(),
        plan_status_label(report.status)
    );
    println!("  ID: {}", report.plan_id);
    println!();

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Phase").fg(Color::Cyan),
            Cell::new("Unit"),
            Cell::new("State"),
            Cell::new("Attempts"),
            Cell::new("Artifacts"),
            Cell::new("Last error"),
        ]);

    for unit in report.units() {
        table.add_row(vec![
            Cell::new(&unit.phase_id),
            Cell::new(&unit.unit_id),
            state_cell(unit.state),
            Cell::new(unit.attempt),
            Cell::new(unit.artifacts.len()),
            Cell::new(unit.last_error.as_deref().unwrap_or("")),
        ]);
    }
    println!("{table}");

    let unresolved = report.unresolved_artifacts();
    if !unresolved.is_empty() {
        println!();
        println!(
            "  {} {} artifact(s) could not be compensated:",
            style("!").red().bold(),
            unresolved.len()
        );
        for artifact in unresolved {
            println!(
                "    {} ({}): {}",
                artifact.id,
                artifact.unit_id,
                artifact.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
    println!();
}

/// Breakers touched during the run; nothing when no unit named a resource.
fn print_circuits(circuits: &[CircuitStats]) {
    if circuits.is_empty() {
        return;
    }
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Resource").fg(Color::Cyan),
            Cell::new("Circuit"),
            Cell::new("Calls"),
            Cell::new("Failed"),
            Cell::new("Rejected"),
        ]);
    for circuit in circuits {
        let state = Cell::new(&circuit.state);
        let state = match circuit.state.as_str() {
            "closed" => state.fg(Color::Green),
            "open" => state.fg(Color::Red),
            _ => state.fg(Color::Yellow),
        };
        table.add_row(vec![
            Cell::new(&circuit.resource),
            state,
            Cell::new(circuit.total_calls),
            Cell::new(circuit.failed_calls),
            Cell::new(circuit.rejected_calls),
        ]);
    }
    println!("{table}");
}

fn plan_status_label(status: PlanStatus) -> String {
    let label = status.to_string();
    match status {
        PlanStatus::Completed => style(label).green().bold().to_string(),
        PlanStatus::Failed | PlanStatus::Degraded => style(label).red().bold().to_string(),
        PlanStatus::RolledBack | PlanStatus::Cancelled | PlanStatus::Interrupted => {
            style(label).yellow().bold().to_string()
        }
        PlanStatus::Pending | PlanStatus::Running => style(label).cyan().to_string(),
    }
}

fn state_cell(state: UnitState) -> Cell {
    let cell = Cell::new(state);
    match state {
        UnitState::Completed => cell.fg(Color::Green),
        UnitState::Failed => cell.fg(Color::Red),
        UnitState::Retrying | UnitState::RollingBack | UnitState::RolledBack => {
            cell.fg(Color::Yellow)
        }
        UnitState::Running | UnitState::Queued => cell.fg(Color::Cyan),
        UnitState::Pending | UnitState::Aborted => cell.fg(Color::DarkGrey),
    }
}

// ---------------------------------------------------------------------------
// Rollback
// ---------------------------------------------------------------------------

pub async fn rollback(
    state: &AppState,
    plan_id: Uuid,
    granularity: RollbackGranularity,
    target: &str,
    json: bool,
) -> Result<()> {
    let report = state.executor.rollback(plan_id, granularity, target).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_rollback(&report);
    }
    if !report.is_clean() {
        bail!("{} artifact(s) could not be compensated", report.failed.len());
    }
    Ok(())
}

fn print_rollback(report: &RollbackReport) {
    println!();
    println!(
        "  {} Rolled back {} '{}'",
        if report.is_clean() {
            style("*").green().bold()
        } else {
            style("!").red().bold()
        },
        report.granularity,
        style(&report.target_id).cyan()
    );
    println!("  Compensated: {}", list_or_dash(&report.succeeded));
    println!("  Skipped:     {}", list_or_dash(&report.skipped));
    println!("  Units:       {}", list_or_dash(&report.units_rolled_back));
    for failure in &report.failed {
        println!(
            "  {} {} ({}): {}",
            style("failed").red(),
            failure.artifact_id,
            failure.unit_id,
            failure.error
        );
    }
    println!();
}

fn list_or_dash(items: &[String]) -> String {
    if items.is_empty() {
        "-".to_string()
    } else {
        items.join(", ")
    }
}

// ---------------------------------------------------------------------------
// Validate
// ---------------------------------------------------------------------------

pub fn validate(file: &Path, json: bool) -> Result<()> {
    let mut plan = load_plan_file(file).map_err(|e| anyhow!("Plan validation failed: {e}"))?;
    normalize_plan(&mut plan);
    let graph = PlanGraph::build(&plan).map_err(|e| anyhow!("Plan validation failed: {e}"))?;

    let waves: Vec<Vec<String>> = graph
        .waves()
        .into_iter()
        .map(|wave| wave.into_iter().map(|idx| graph.node(idx).id.clone()).collect())
        .collect();

    if json {
        let out = serde_json::json!({
            "name": plan.name,
            "phases": plan.phases.len(),
            "units": plan.unit_count(),
            "waves": waves,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Plan '{}' is valid",
        style("*").green().bold(),
        style(&plan.name).cyan()
    );
    println!("  Phases: {}", plan.phases.len());
    println!("  Units: {}", plan.unit_count());
    for (i, wave) in waves.iter().enumerate() {
        println!("  Wave {}: {}", i + 1, wave.join(", "));
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

pub async fn list_plans(state: &AppState, json: bool) -> Result<()> {
    let plans = state.checkpoints().list_plans().await?;

    if json {
        let out: Vec<_> = plans
            .iter()
            .map(|p| {
                serde_json::json!({
                    "id": p.id.to_string(),
                    "name": p.name,
                    "version": p.version,
                    "units": p.unit_count,
                    "created_at": p.created_at.to_rfc3339(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if plans.is_empty() {
        println!();
        println!("  No plans stored.");
        println!("  Run one with: {}", style("hlpx run <plan.yaml>").dim());
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("ID").fg(Color::Cyan),
            Cell::new("Name"),
            Cell::new("Version"),
            Cell::new("Units"),
            Cell::new("Created"),
        ]);

    for p in &plans {
        table.add_row(vec![
            Cell::new(p.id),
            Cell::new(&p.name),
            Cell::new(&p.version),
            Cell::new(p.unit_count),
            Cell::new(p.created_at.format("%Y-%m-%d %H:%M:%S")),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_accepts_well_formed_plan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.yaml");
        std::fs::write(
            &path,
            r#"
name: release
phases:
  - id: build
    units:
      - id: a
      - id: b
        depends_on: [a]
"#,
        )
        .unwrap();
        validate(&path, true).unwrap();
    }

    #[test]
    fn validate_rejects_unknown_dependency() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.yaml");
        std::fs::write(
            &path,
            r#"
name: release
phases:
  - id: build
    units:
      - id: a
        depends_on: [ghost]
"#,
        )
        .unwrap();
        let err = validate(&path, true).unwrap_err();
        assert!(err.to_string().contains("Plan validation failed"), "got: {err}");
    }

    #[test]
    fn list_or_dash_handles_empty() {
        assert_eq!(list_or_dash(&[]), "-");
        assert_eq!(list_or_dash(&["a".to_string(), "b".to_string()]), "a, b");
    }
}
